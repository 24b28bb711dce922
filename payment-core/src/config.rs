//! Configuration for the payment core

use crate::types::Currency;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Payment core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Supported settlement currency
    pub currency: Currency,

    /// RocksDB configuration
    pub rocksdb: RocksDbConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/payments"),
            service_name: "payment-core".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            currency: Currency::USD,
            rocksdb: RocksDbConfig::default(),
        }
    }
}

/// RocksDB tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDbConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Target file size (MB)
    pub target_file_size_mb: u64,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            target_file_size_mb: 64,
            max_background_jobs: 4,
        }
    }
}

impl Config {
    /// Load from TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Load from environment variables, falling back to defaults
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("PAYMENTS_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(currency) = std::env::var("PAYMENTS_CURRENCY") {
            config.currency = Currency::parse(&currency)
                .ok_or_else(|| crate::Error::Config(format!("Unknown currency: {currency}")))?;
        }

        Ok(config)
    }
}
