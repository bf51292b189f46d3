pub mod config;

pub use config::{connect, ConnectionArgs, RunArgs};
