//! Service configuration: TOML file plus environment overrides.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

const DEFAULT_DATA_DIR: &str = "./data/wallet-indexer";
const DEFAULT_BLOCK_REWARD_LOCK: u32 = 300;
const DEFAULT_MAX_GAP: u16 = 20;
const DEFAULT_HISTORY_PAGE_SIZE: u32 = 20;

/// Environment variable overriding the block reward maturity offset.
pub const BLOCK_REWARD_LOCK_ENV: &str = "BLOCK_REWARD_LOCK";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IndexerConfig {
    /// Directory holding the projection database.
    pub data_dir: PathBuf,
    /// Height offset applied to block outputs before they unlock.
    pub block_reward_lock: u32,
    /// Gap limit used when materializing newly registered wallets.
    pub max_gap: u16,
    /// History rows returned when a query omits `count`.
    pub history_page_size: u32,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            block_reward_lock: DEFAULT_BLOCK_REWARD_LOCK,
            max_gap: DEFAULT_MAX_GAP,
            history_page_size: DEFAULT_HISTORY_PAGE_SIZE,
        }
    }
}

impl IndexerConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Apply environment overrides. Unparsable values are ignored with a
    /// warning rather than aborting startup.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(raw) = env::var(BLOCK_REWARD_LOCK_ENV) {
            match raw.parse::<u32>() {
                Ok(value) => self.block_reward_lock = value,
                Err(_) => warn!(value = %raw, "ignoring unparsable BLOCK_REWARD_LOCK"),
            }
        }
        self
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("indexer.redb")
    }
}
