//! machlink Settings Crate
//!
//! Handles connection configuration, its persistence, and change
//! notification for the connection supervisor.

pub mod config;
pub mod error;
pub mod manager;

pub use config::{Config, ConnectionSettings, PollingSettings, RestSettings, RpcSettings};
pub use error::{ConfigError, ConfigResult, SettingsError, SettingsResult};
pub use manager::SettingsManager;
