//! CLI configuration

use std::path::{Path, PathBuf};

use loom_core::{KeyDescriptor, Network};
use loom_weave::BalanceReport;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "LOOM_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Federation members and signing threshold
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    pub members: Vec<KeyDescriptor>,
    /// Required signers; a majority when unset
    pub threshold: Option<usize>,
}

/// Inputs for `weave layer`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaveConfig {
    pub inputs: Vec<Value>,
}

/// Reports imported before any file given to `aggregate`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub inputs: Vec<BalanceReport>,
}

/// Loom configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoomConfig {
    pub network: Network,
    /// Local key; a random key is generated when no material is given
    pub key: KeyDescriptor,
    pub federation: FederationConfig,
    pub weave: WeaveConfig,
    pub aggregator: AggregatorConfig,
}

impl LoomConfig {
    /// Default config location: `$XDG_CONFIG_HOME/loom/config.json`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("loom")
            .join("config.json")
    }

    /// Explicit path, then `LOOM_CONFIG`, then the default location
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .unwrap_or_else(Self::default_path)
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise defaults
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Key descriptor with the top-level network applied
    pub fn key_descriptor(&self) -> KeyDescriptor {
        let mut descriptor = self.key.clone();
        descriptor.network = self.network;
        descriptor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = LoomConfig {
            network: Network::Testnet,
            key: KeyDescriptor::private("11".repeat(32)),
            federation: FederationConfig {
                members: vec![KeyDescriptor::public(
                    "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
                )],
                threshold: Some(1),
            },
            weave: WeaveConfig {
                inputs: vec![json!("a"), json!({"b": 1})],
            },
            aggregator: AggregatorConfig {
                inputs: vec![BalanceReport::new(3, 2, 1)],
            },
        };
        config.save(&path).unwrap();

        let loaded = LoomConfig::load(&path).unwrap();
        assert_eq!(loaded.network, Network::Testnet);
        assert_eq!(loaded.key.private.as_deref(), Some("11".repeat(32).as_str()));
        assert_eq!(loaded.federation.members.len(), 1);
        assert_eq!(loaded.federation.threshold, Some(1));
        assert_eq!(loaded.weave.inputs, config.weave.inputs);
        assert_eq!(loaded.aggregator.inputs, config.aggregator.inputs);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"network": "regtest", "key": {"index": 4}}"#).unwrap();

        let config = LoomConfig::load(&path).unwrap();
        assert_eq!(config.network, Network::Regtest);
        assert_eq!(config.key.index, Some(4));
        assert!(config.federation.members.is_empty());
        assert_eq!(config.key_descriptor().network, Network::Regtest);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoomConfig::load_or_default(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.network, Network::Mainnet);
        assert!(LoomConfig::load(&dir.path().join("absent.json")).is_err());
    }

    #[test]
    fn test_explicit_path_wins() {
        let explicit = Path::new("/tmp/explicit.json");
        assert_eq!(LoomConfig::resolve_path(Some(explicit)), explicit);
    }
}
