//! Configuration for field-collect

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Default data directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("field-collect")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub location: LocationConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Installation identifier sent with every submission
    #[serde(default = "default_device_id")]
    pub id: String,

    /// Directory holding the queue database and proofs
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Base URL of the ledger API
    #[serde(default = "default_ledger_url")]
    pub base_url: String,

    /// Bearer token, if the ledger requires one
    #[serde(default)]
    pub api_key: Option<String>,

    /// Upper bound on one submission attempt
    #[serde(default = "default_submit_timeout")]
    pub submit_timeout_secs: u64,
}

/// Where fixes come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationSourceKind {
    /// No positioning capability
    None,
    /// A configured surveyed coordinate
    Fixed,
}

/// What to do when no fix can be obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationPolicy {
    /// Refuse the submission
    Strict,
    /// Save without geo
    Lenient,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    #[serde(default = "default_location_source")]
    pub source: LocationSourceKind,

    #[serde(default)]
    pub latitude: f64,

    #[serde(default)]
    pub longitude: f64,

    #[serde(default = "default_accuracy")]
    pub accuracy_meters: f64,

    /// Fix timeout in seconds
    #[serde(default = "default_location_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_location_policy")]
    pub policy: LocationPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Periodic drain interval when the last pass was clean
    #[serde(default = "default_sync_interval")]
    pub interval_secs: u64,

    /// Concurrent submissions within one drain pass
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,

    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,

    /// Randomise backoff delays by up to 25%
    #[serde(default = "default_true")]
    pub jitter: bool,
}

// Defaults
fn default_device_id() -> String { "unregistered-device".to_string() }
fn default_ledger_url() -> String { "http://localhost:8080/api/v1".to_string() }
fn default_submit_timeout() -> u64 { 15 }
fn default_location_source() -> LocationSourceKind { LocationSourceKind::None }
fn default_accuracy() -> f64 { 25.0 }
fn default_location_timeout() -> u64 { 10 }
fn default_location_policy() -> LocationPolicy { LocationPolicy::Lenient }
fn default_sync_interval() -> u64 { 60 }
fn default_max_in_flight() -> usize { 4 }
fn default_backoff_base() -> u64 { 5 }
fn default_backoff_max() -> u64 { 900 }
fn default_true() -> bool { true }

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: default_device_id(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            base_url: default_ledger_url(),
            api_key: None,
            submit_timeout_secs: default_submit_timeout(),
        }
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            source: default_location_source(),
            latitude: 0.0,
            longitude: 0.0,
            accuracy_meters: default_accuracy(),
            timeout_secs: default_location_timeout(),
            policy: default_location_policy(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sync_interval(),
            max_in_flight: default_max_in_flight(),
            backoff_base_secs: default_backoff_base(),
            backoff_max_secs: default_backoff_max(),
            jitter: true,
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.max_in_flight == 0 {
            return Err(ConfigError::Invalid("sync.max_in_flight must be at least 1".into()));
        }
        // Zero here would let the scheduler drain back to back
        if self.sync.interval_secs == 0 || self.sync.backoff_base_secs == 0 {
            return Err(ConfigError::Invalid(
                "sync.interval_secs and sync.backoff_base_secs must be at least 1".into(),
            ));
        }
        if self.sync.backoff_base_secs > self.sync.backoff_max_secs {
            return Err(ConfigError::Invalid(
                "sync.backoff_base_secs exceeds sync.backoff_max_secs".into(),
            ));
        }
        if self.ledger.submit_timeout_secs == 0 || self.location.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be at least one second".into()));
        }
        Ok(())
    }

    /// Queue database path
    pub fn queue_db_path(&self) -> PathBuf {
        self.device.data_dir.join(crate::store::QUEUE_DB_FILE)
    }

    /// Proof attachment directory
    pub fn proofs_dir(&self) -> PathBuf {
        self.device.data_dir.join("proofs")
    }
}
