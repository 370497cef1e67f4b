use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Whether a transfer records only the sender's entry, or a matching
/// `TRANSFER_CREDIT` entry for the receiver as well.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferEntries {
    #[default]
    SenderOnly,
    SenderAndReceiver,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdConfig {
    /// Upper bound on draws for a fresh account number or transaction id.
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for IdConfig {
    fn default() -> Self {
        Self {
            max_attempts: 16,
            backoff_ms: 2,
        }
    }
}

impl IdConfig {
    /// Exponential, capped at 1024 times the base delay.
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(1 << attempt.min(10)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file. The in-memory store is used when unset.
    pub database: Option<PathBuf>,
    pub lock_timeout_ms: u64,
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: None,
            lock_timeout_ms: 5000,
            busy_timeout_ms: 5000,
        }
    }
}

impl StoreConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub default_account_type: String,
    pub transfer_entries: TransferEntries,
    pub ids: IdConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            default_account_type: "SAVINGS".to_string(),
            transfer_entries: TransferEntries::default(),
            ids: IdConfig::default(),
            store: StoreConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl LedgerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }
}
