use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lodestake_sdk::batch::{DEFAULT_CHUNK_SIZE, DEFAULT_INTER_BATCH_DELAY};
use lodestake_sdk::{BatchConfig, Network, ProtocolParams};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

pub const CONFIG_FILE: &str = "lodestake.json";
pub const PROJECT_ID_ENV: &str = "LODESTAKE_PROJECT_ID";
pub const MNEMONIC_ENV: &str = "LODESTAKE_MNEMONIC";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// Persisted app config
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub network: Network,
    /// Indexer base URL; the network's public default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexer_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Wallet account index the keys are derived for.
    pub account: u32,
    pub allow_fallback: bool,
    pub batch_chunk_size: usize,
    pub batch_delay_secs: u64,
    pub protocol: ProtocolParams,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            network: Network::Preprod,
            indexer_url: None,
            project_id: None,
            account: 0,
            allow_fallback: true,
            batch_chunk_size: DEFAULT_CHUNK_SIZE,
            batch_delay_secs: DEFAULT_INTER_BATCH_DELAY.as_secs(),
            protocol: ProtocolParams::default(),
        }
    }
}

impl AppConfig {
    pub fn path(data_dir: &Path) -> PathBuf {
        data_dir.join(CONFIG_FILE)
    }

    /// Read `lodestake.json` from `data_dir`, or defaults when it does not
    /// exist yet. Environment overrides are applied either way.
    pub fn load(data_dir: &Path) -> Result<Self, ConfigError> {
        let path = Self::path(data_dir);
        let mut config = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            log::info!("no config at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Write the config back. The project id is never persisted when it
    /// came from the environment.
    pub fn save(&self, data_dir: &Path) -> Result<(), ConfigError> {
        let path = Self::path(data_dir);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut on_disk = self.clone();
        if std::env::var(PROJECT_ID_ENV).is_ok() {
            on_disk.project_id = None;
        }
        fs::write(&path, serde_json::to_string_pretty(&on_disk)?)?;
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Some(project_id) = non_empty_env(PROJECT_ID_ENV) {
            self.project_id = Some(project_id);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_chunk_size == 0 {
            return Err(ConfigError::Invalid("batchChunkSize must be > 0".into()));
        }
        if self.protocol.max_tx_size == 0 {
            return Err(ConfigError::Invalid("protocol.max_tx_size must be > 0".into()));
        }
        if self.protocol.collateral_min_lovelace > self.protocol.collateral_max_lovelace {
            return Err(ConfigError::Invalid(
                "collateral window minimum exceeds its maximum".into(),
            ));
        }
        Ok(())
    }

    pub fn indexer_url(&self) -> &str {
        self.indexer_url
            .as_deref()
            .unwrap_or_else(|| self.network.default_indexer_url())
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            chunk_size: self.batch_chunk_size,
            inter_batch_delay: Duration::from_secs(self.batch_delay_secs),
        }
    }
}

/// The wallet mnemonic from `LODESTAKE_MNEMONIC`, if set.
pub fn mnemonic_from_env() -> Option<Zeroizing<String>> {
    non_empty_env(MNEMONIC_ENV).map(Zeroizing::new)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|trimmed| !trimmed.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"network":"mainnet"}"#).unwrap();
        assert_eq!(config.network, Network::Mainnet);
        assert_eq!(config.batch_chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.protocol, ProtocolParams::default());
        assert!(config.allow_fallback);
    }

    #[test]
    fn indexer_url_defaults_per_network() {
        let mut config = AppConfig::default();
        assert_eq!(config.indexer_url(), Network::Preprod.default_indexer_url());
        config.indexer_url = Some("http://localhost:3000".into());
        assert_eq!(config.indexer_url(), "http://localhost:3000");
    }

    #[test]
    fn zero_chunk_size_is_invalid() {
        let config = AppConfig {
            batch_chunk_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
