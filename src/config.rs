//! Application configuration.
//!
//! Everything components need — partner endpoints, keys, retry knobs, store
//! location — is loaded into one explicit struct and passed to constructors.
//! No ambient process state.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub partner: PartnerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    /// Demo accounts provisioned on first boot when the store is empty.
    #[serde(default)]
    pub seed_users: Vec<SeedUser>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PartnerConfig {
    /// Partner API base, e.g. "http://localhost:3030".
    pub api_url: String,
    /// Partner-hosted payment page for deposit links.
    pub payments_url: String,
    pub partner_id: String,
    /// Display name this platform registers with the partner.
    pub platform: String,
    /// Hex-encoded 32-byte Ed25519 signing seed.
    pub signing_key_hex: String,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Reconciliation poll interval. The fixed interval is also the only
    /// throttle after a failed tick.
    #[serde(default = "default_events_interval_ms")]
    pub events_interval_ms: u64,
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_events_interval_ms() -> u64 {
    5000
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoreConfig {
    pub data_dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data/ledger".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SeedUser {
    pub id: String,
    pub username: String,
}

impl AppConfig {
    /// Load `config/{env}.yaml`.
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        Self::load_path(format!("config/{env}.yaml"))
    }

    pub fn load_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_yaml::from_str(&content)?)
    }
}
