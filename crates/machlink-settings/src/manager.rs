//! Settings manager
//!
//! Owns the live configuration. Every accepted change is published on a
//! `watch` channel so the connection supervisor can reconnect.

use std::path::{Path, PathBuf};
use tokio::sync::watch;

use crate::config::Config;
use crate::error::{ConfigError, SettingsError, SettingsResult};

/// Current configuration plus where it is persisted
pub struct SettingsManager {
    path: Option<PathBuf>,
    config: watch::Sender<Config>,
}

impl SettingsManager {
    const APP_DIR: &'static str = "machlink";
    const CONFIG_FILE: &'static str = "config.toml";

    /// Manage an in-memory configuration
    pub fn new(config: Config) -> Self {
        Self {
            path: None,
            config: watch::channel(config).0,
        }
    }

    /// Platform configuration directory for machlink
    pub fn config_dir() -> SettingsResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(Self::APP_DIR))
            .ok_or_else(|| {
                ConfigError::UnsupportedPlatform(std::env::consts::OS.to_string()).into()
            })
    }

    /// Default configuration file path
    pub fn config_file_path() -> SettingsResult<PathBuf> {
        Ok(Self::config_dir()?.join(Self::CONFIG_FILE))
    }

    /// Create the configuration directory if needed
    pub fn ensure_config_dir() -> SettingsResult<PathBuf> {
        let dir = Self::config_dir()?;
        std::fs::create_dir_all(&dir)
            .map_err(|e| SettingsError::ConfigDirectory(format!("{}: {}", dir.display(), e)))?;
        Ok(dir)
    }

    /// Load from `path`, falling back to defaults when it does not exist
    pub fn open(path: impl AsRef<Path>) -> SettingsResult<Self> {
        let path = path.as_ref().to_path_buf();
        let config = if path.exists() {
            Config::load_from_file(&path)?
        } else {
            tracing::info!(path = %path.display(), "No configuration file, using defaults");
            Config::default()
        };
        Ok(Self {
            path: Some(path),
            config: watch::channel(config).0,
        })
    }

    /// Load from the default location
    pub fn open_default() -> SettingsResult<Self> {
        Self::open(Self::config_file_path()?)
    }

    /// Where the configuration is persisted
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Snapshot of the current configuration
    pub fn current(&self) -> Config {
        self.config.borrow().clone()
    }

    /// Configuration changes
    pub fn subscribe(&self) -> watch::Receiver<Config> {
        self.config.subscribe()
    }

    /// Replace the configuration. Returns whether it changed.
    pub fn replace(&self, config: Config) -> SettingsResult<bool> {
        config.validate()?;
        let changed = self.config.send_if_modified(|current| {
            if *current == config {
                false
            } else {
                *current = config;
                true
            }
        });
        if changed {
            tracing::info!("Configuration updated");
        }
        Ok(changed)
    }

    /// Edit the configuration in place. Invalid edits are rejected whole.
    pub fn update<F>(&self, edit: F) -> SettingsResult<bool>
    where
        F: FnOnce(&mut Config),
    {
        let mut config = self.current();
        edit(&mut config);
        self.replace(config)
    }

    /// Persist to the managed path
    pub fn save(&self) -> SettingsResult<()> {
        let path = self
            .path
            .as_deref()
            .ok_or_else(|| SettingsError::SaveError("no configuration path".to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.config.borrow().save_to_file(path)
    }
}

impl Default for SettingsManager {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
