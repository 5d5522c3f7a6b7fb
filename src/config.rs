use serde::Deserialize;
use std::path::Path;

use crate::error::{ClientError, Result};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Wallet owning every tracked activity. Activities cannot be tracked
    /// without one; the identity layer above supplies it.
    pub wallet_address: Option<String>,
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub tracker: TrackerConfig,
    pub rewards: RewardsConfig,
    pub transfer: TransferConfig,
    pub realtime: RealtimeConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Ordered candidate base URLs, primary first.
    pub endpoints: Vec<String>,
    pub request_timeout_secs: u64,
    pub probe_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub backoff_base_secs: u64,
    pub retry_ceiling: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RewardsConfig {
    pub sync_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Content-addressed storage gateway.
    pub gateway: String,
    pub chunk_size_bytes: usize,
    pub max_concurrent_uploads: usize,
    pub chunk_retries: u32,
    pub chunk_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// host:port of the push endpoint.
    pub addr: String,
    pub reconnect_delay_secs: u64,
    pub heartbeat_interval_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![
                "https://api.axon.network".to_string(),
                "https://api2.axon.network".to_string(),
                "https://api-fallback.axon.network".to_string(),
            ],
            request_timeout_secs: 10,
            probe_timeout_secs: 5,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            backoff_base_secs: 60,
            retry_ceiling: 5,
        }
    }
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: 90,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            gateway: "http://127.0.0.1:8080".to_string(),
            chunk_size_bytes: 32 * 1024 * 1024,
            max_concurrent_uploads: 3,
            chunk_retries: 3,
            chunk_timeout_secs: 30,
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            addr: "api.axon.network:7788".to_string(),
            reconnect_delay_secs: 5,
            heartbeat_interval_secs: 30,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("failed to read {}: {e}", path.display())))?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| ClientError::Config(format!("failed to parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the config file if present, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(Config::default())
        }
    }

    fn validate(&self) -> Result<()> {
        if self.api.endpoints.is_empty() {
            return Err(ClientError::Config("api.endpoints must not be empty".into()));
        }
        if self.transfer.chunk_size_bytes == 0 {
            return Err(ClientError::Config("transfer.chunk_size_bytes must be > 0".into()));
        }
        if self.transfer.max_concurrent_uploads == 0 {
            return Err(ClientError::Config(
                "transfer.max_concurrent_uploads must be > 0".into(),
            ));
        }
        Ok(())
    }
}
