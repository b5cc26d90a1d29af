//! Configuration management

use crate::sync::SyncSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub sync: SyncConfig,
    pub server: ServerConfig,
}

/// General settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Socket directory
    pub runtime_dir: Option<PathBuf>,

    /// Where joined-session identities are kept
    pub data_dir: Option<PathBuf>,
}

/// Client synchronization timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Minimum milliseconds between change-triggered re-fetches
    pub refetch_throttle_ms: u64,

    /// Milliseconds of local inactivity before an unconfirmed vote is dropped
    pub optimistic_quiescence_ms: u64,

    /// Polling period in milliseconds when the change feed is down
    pub degraded_poll_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            refetch_throttle_ms: 500,
            optimistic_quiescence_ms: 1000,
            degraded_poll_ms: 2000,
        }
    }
}

impl SyncConfig {
    pub fn settings(&self) -> SyncSettings {
        SyncSettings {
            refetch_interval: Duration::from_millis(self.refetch_throttle_ms),
            quiescence: Duration::from_millis(self.optimistic_quiescence_ms),
            poll_interval: Duration::from_millis(self.degraded_poll_ms.max(1)),
        }
    }
}

/// Server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Buffered change events per subscription before drops
    pub subscription_buffer: usize,

    /// Buffered outbound messages per client
    pub client_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            subscription_buffer: 64,
            client_buffer: 256,
        }
    }
}

impl Config {
    /// Load config from the default location, or defaults if absent
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load config from a file, or defaults if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            Self::from_toml(&content)
                .with_context(|| format!("Invalid config {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("planning-poker")
            .join("config.toml")
    }

    /// Get the runtime directory for sockets
    pub fn runtime_dir(&self) -> PathBuf {
        self.general
            .runtime_dir
            .clone()
            .or_else(dirs::runtime_dir)
            .unwrap_or_else(std::env::temp_dir)
            .join("planning-poker")
    }

    /// Get the directory for client identities
    pub fn data_dir(&self) -> PathBuf {
        self.general
            .data_dir
            .clone()
            .or_else(dirs::data_dir)
            .unwrap_or_else(std::env::temp_dir)
            .join("planning-poker")
    }

    /// Get socket path for a named server
    pub fn socket_path(&self, server_name: &str) -> PathBuf {
        self.runtime_dir().join(format!("{}.sock", server_name))
    }
}
