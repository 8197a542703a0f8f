//! Dripflow configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DripflowConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub stores: StoreConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

impl DripflowConfig {
    /// Load config from the default path (~/.dripflow/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::DripflowError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| crate::error::DripflowError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Dripflow home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".dripflow")
    }
}

/// Scheduler loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between due-subscription polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Max subscriptions processed per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Re-defer delay while a conversation is agent-paused.
    #[serde(default = "default_pause_defer")]
    pub pause_defer_secs: u64,
}

fn default_poll_interval() -> u64 { 60 }
fn default_batch_size() -> usize { 50 }
fn default_pause_defer() -> u64 { 3600 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
            pause_defer_secs: default_pause_defer(),
        }
    }
}

/// Store paths — two independent databases, never joined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_definitions_db")]
    pub definitions_db: String,
    #[serde(default = "default_runtime_db")]
    pub runtime_db: String,
}

fn default_definitions_db() -> String { "~/.dripflow/definitions.db".into() }
fn default_runtime_db() -> String { "~/.dripflow/runtime.db".into() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            definitions_db: default_definitions_db(),
            runtime_db: default_runtime_db(),
        }
    }
}

/// Messaging gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Cloud API base URL (overridable for tests/staging).
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_api_base() -> String { "https://graph.facebook.com/v21.0".into() }
fn default_timeout() -> u64 { 30 }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Trigger-event ingest (HTTP) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 3400 }

impl Default for IngestConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}
