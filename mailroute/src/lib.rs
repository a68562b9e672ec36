//! The mailroute controller: configuration loading and component wiring.

pub mod config;
pub mod controller;

pub use config::{Config, ConfigError, RedisConfig};
pub use controller::Mailroute;
