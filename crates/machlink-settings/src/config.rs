//! Configuration for machlink
//!
//! Provides configuration file handling and validation.
//! Supports JSON and TOML file formats stored in platform-specific directories.
//!
//! Configuration is organized into logical sections:
//! - Connection settings (backend, address, credentials, timeouts)
//! - RPC controller bring-up parameters
//! - REST firmware bring-up parameters and persisted defaults
//! - Polling overrides applied on top of each backend's tuning

use machlink_core::{BackendKind, BackendTuning, PollPeriods};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult, SettingsError, SettingsResult};

/// Connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Which backend to talk to
    pub backend: BackendKind,
    /// Hostname or IP address of the machine
    pub host: String,
    /// Port; the backend's default when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Session password (REST firmware)
    pub password: String,
    /// Transport connect/request timeout in milliseconds
    pub timeout_ms: u64,
    /// Reconnect when settings change
    pub auto_reconnect: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Rpc,
            host: "127.0.0.1".to_string(),
            port: None,
            password: String::new(),
            timeout_ms: 5000,
            auto_reconnect: true,
        }
    }
}

impl ConnectionSettings {
    /// Default TCP port of the RPC controller
    pub const RPC_PORT: u16 = 5000;
    /// Default HTTP port of the REST firmware
    pub const REST_PORT: u16 = 80;

    /// Port to connect to
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(match self.backend {
            BackendKind::Rpc => Self::RPC_PORT,
            BackendKind::Rest => Self::REST_PORT,
        })
    }

    /// Transport timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// RPC controller bring-up parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcSettings {
    /// Boot mode selected after connecting
    pub boot_mode: u16,
    /// Process mode selected after reset
    pub process_mode: u16,
    /// Reference all axes during bring-up
    pub home_on_connect: bool,
    /// Upper bound on homing, in milliseconds
    pub homing_timeout_ms: u64,
    /// Upper bound on the controller reporting itself up, in milliseconds
    pub system_up_timeout_ms: u64,
    /// Upper bound on cycle start/stop and feed hold taking effect, in milliseconds
    pub control_timeout_ms: u64,
    /// Sampling interval of wait helpers, in milliseconds
    pub wait_interval_ms: u64,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            boot_mode: 1,
            process_mode: 2,
            home_on_connect: true,
            homing_timeout_ms: 60_000,
            system_up_timeout_ms: 10_000,
            control_timeout_ms: 5_000,
            wait_interval_ms: 50,
        }
    }
}

/// REST firmware bring-up parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestSettings {
    /// Macro file provisioning persisted globals
    pub defaults_file: String,
    /// Upper bound on homing, in milliseconds
    pub homing_timeout_ms: u64,
    /// Upper bound on job start, stop and pause taking effect, in milliseconds
    pub control_timeout_ms: u64,
    /// Sampling interval of wait helpers, in milliseconds
    pub wait_interval_ms: u64,
    /// Overrides for persisted global defaults, keyed by global name
    pub variable_defaults: BTreeMap<String, String>,
}

impl Default for RestSettings {
    fn default() -> Self {
        Self {
            defaults_file: "machlink-defaults.g".to_string(),
            homing_timeout_ms: 60_000,
            control_timeout_ms: 5_000,
            wait_interval_ms: 100,
            variable_defaults: BTreeMap::new(),
        }
    }
}

/// Overrides applied on top of a backend's default tuning
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    /// Poll periods, highest priority first
    #[serde(skip_serializing_if = "Option::is_none")]
    pub periods_ms: Option<[u64; 5]>,
    /// Bulk buffer refresh period
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bulk_period_ms: Option<u64>,
    /// Interval between bring-up steps
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roll_interval_ms: Option<u64>,
    /// Bound on each transport call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_timeout_ms: Option<u64>,
    /// Soft failures tolerated per phase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries_per_phase: Option<u32>,
}

impl PollingSettings {
    /// Default tuning for `kind` with these overrides applied
    pub fn tuning_for(&self, kind: BackendKind) -> BackendTuning {
        let mut tuning = BackendTuning::for_kind(kind);
        if let Some(periods) = self.periods_ms {
            tuning.periods = PollPeriods::from_millis(periods);
        }
        if let Some(ms) = self.bulk_period_ms {
            tuning.bulk_period = Duration::from_millis(ms);
        }
        if let Some(ms) = self.roll_interval_ms {
            tuning.roll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.call_timeout_ms {
            tuning.call_timeout = Duration::from_millis(ms);
        }
        if let Some(retries) = self.max_retries_per_phase {
            tuning.retry.max_retries_per_phase = retries;
        }
        tuning
    }
}

/// Complete configuration
///
/// Aggregates all settings sections and provides file I/O operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Connection settings
    pub connection: ConnectionSettings,
    /// RPC controller settings
    pub rpc: RpcSettings,
    /// REST firmware settings
    pub rest: RestSettings,
    /// Polling overrides
    pub polling: PollingSettings,
}

fn out_of_range(key: &str, value: impl ToString) -> ConfigError {
    ConfigError::ValueOutOfRange {
        key: key.to_string(),
        value: value.to_string(),
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SettingsError::LoadError(format!("{}: {}", path.display(), e)))?;

        let config: Self = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content)?
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&content)?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.display().to_string()).into());
        };

        config.validate()?;
        Ok(config)
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::to_string_pretty(self)?
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            toml::to_string_pretty(self)?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.display().to_string()).into());
        };

        std::fs::write(path, content)
            .map_err(|e| SettingsError::SaveError(format!("{}: {}", path.display(), e)))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> ConfigResult<()> {
        // Connection
        if self.connection.host.trim().is_empty() {
            return Err(ConfigError::MissingKey("connection.host".to_string()));
        }
        if self.connection.timeout_ms == 0 {
            return Err(out_of_range("connection.timeout_ms", 0));
        }
        if self.connection.port == Some(0) {
            return Err(out_of_range("connection.port", 0));
        }

        // RPC
        if self.rpc.homing_timeout_ms == 0 {
            return Err(out_of_range("rpc.homing_timeout_ms", 0));
        }
        if self.rpc.system_up_timeout_ms == 0 {
            return Err(out_of_range("rpc.system_up_timeout_ms", 0));
        }
        if self.rpc.control_timeout_ms == 0 {
            return Err(out_of_range("rpc.control_timeout_ms", 0));
        }
        if self.rpc.wait_interval_ms == 0 {
            return Err(out_of_range("rpc.wait_interval_ms", 0));
        }

        // REST
        let file = self.rest.defaults_file.trim();
        if file.is_empty() {
            return Err(ConfigError::MissingKey("rest.defaults_file".to_string()));
        }
        if file.contains('/') || file.contains('"') {
            return Err(out_of_range("rest.defaults_file", file));
        }
        if self.rest.homing_timeout_ms == 0 {
            return Err(out_of_range("rest.homing_timeout_ms", 0));
        }
        if self.rest.control_timeout_ms == 0 {
            return Err(out_of_range("rest.control_timeout_ms", 0));
        }
        if self.rest.wait_interval_ms == 0 {
            return Err(out_of_range("rest.wait_interval_ms", 0));
        }

        // Polling
        if let Some(periods) = self.polling.periods_ms {
            if periods.contains(&0) {
                return Err(out_of_range("polling.periods_ms", 0));
            }
            if periods.windows(2).any(|w| w[0] > w[1]) {
                return Err(out_of_range("polling.periods_ms", format!("{:?}", periods)));
            }
        }
        for (key, value) in [
            ("polling.bulk_period_ms", self.polling.bulk_period_ms),
            ("polling.roll_interval_ms", self.polling.roll_interval_ms),
            ("polling.call_timeout_ms", self.polling.call_timeout_ms),
        ] {
            if value == Some(0) {
                return Err(out_of_range(key, 0));
            }
        }

        Ok(())
    }

    /// Tuning for the configured backend
    pub fn tuning(&self) -> BackendTuning {
        self.polling.tuning_for(self.connection.backend)
    }
}
