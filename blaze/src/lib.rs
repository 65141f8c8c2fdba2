//! Blaze mail gateway: configuration loading and server orchestration.

pub mod config;
pub mod gateway;

pub use config::{Config, ConfigError};
pub use gateway::Gateway;
