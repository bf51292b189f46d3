pub mod balance;
pub mod cleanup;
pub mod nodes;
pub mod rebalance;
