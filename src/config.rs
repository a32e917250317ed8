//! Database settings.
//!
//! [`DatabaseConfig`] lives next to the pool it sizes; it is re-exported here
//! so hosts can write `breakwater::config::DatabaseConfig::load()`.

pub use crate::pool::config::{DatabaseConfig, ENV_PREFIX};
