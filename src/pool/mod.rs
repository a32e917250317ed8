pub mod config;
pub mod manager;

pub use manager::{Connector, Pool};
