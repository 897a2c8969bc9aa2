use serde::{Serialize, Deserialize};
use std::fs;
use std::path::{Path, PathBuf};
use log::info;

use crate::network::types::{parse_host_list, HostSpec};

mod network;
mod numeric;

pub use network::{ManagerConfig, DEFAULT_MAGIC, DEFAULT_PORT};
pub use numeric::parse_u64;

/// Errors raised while loading or saving configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to write config file {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid network magic {0:?}")]
    InvalidMagic(String),
}

/// Main configuration file for the peer manager
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Manager settings
    pub network: ManagerConfig,

    /// Initial candidates: `"host"`, `["host", port]` or `{ host, port }`
    pub seeds: Vec<serde_json::Value>,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml(&config_str)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(text)?;
        config.network = config.network.normalize();
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let config_str = toml::to_string_pretty(self)?;

        fs::write(path, config_str).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Generate a default configuration file if it doesn't exist
    pub fn generate_default<P: AsRef<Path>>(path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if path.exists() {
            info!("Config file already exists at {:?}", path);
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        Config::default().save(path)?;

        info!("Generated default config at {:?}", path);
        Ok(())
    }

    /// Override the network magic from a command-line style string
    pub fn set_magic(&mut self, magic: &str) -> Result<(), ConfigError> {
        let value = parse_u64(magic)
            .and_then(|m| u32::try_from(m).ok())
            .ok_or_else(|| ConfigError::InvalidMagic(magic.to_string()))?;
        self.network.magic = value;
        Ok(())
    }

    /// Seed entries as host specs; malformed entries are dropped
    pub fn seed_hosts(&self) -> Vec<HostSpec> {
        let (specs, _skipped) = parse_host_list(&serde_json::Value::Array(self.seeds.clone()));
        specs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("manager.toml");

        let mut config = Config::default();
        config.network.min_peers = 5;
        config.network.shutdown_grace_ms = Some(2_000);
        config.seeds = vec![
            serde_json::json!("seed.example.org"),
            serde_json::json!(["10.0.0.7", 18333]),
        ];
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(
            loaded.seed_hosts(),
            vec![
                HostSpec::Host("seed.example.org".to_string()),
                HostSpec::HostPort("10.0.0.7".to_string(), 18333),
            ]
        );
    }

    #[test]
    fn test_generate_default_keeps_existing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("manager.toml");

        Config::generate_default(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), Config::default());

        fs::write(&path, "[network]\nmin_peers = 1\n").unwrap();
        Config::generate_default(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap().network.min_peers, 1);
    }

    #[test]
    fn test_load_normalizes() {
        let config = Config::from_toml("[network]\nmin_peers = 10\nmax_peers = 4\n").unwrap();
        assert_eq!(config.network.max_peers, 10);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let err = Config::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_set_magic() {
        let mut config = Config::default();
        config.set_magic("0x0B110907").unwrap();
        assert_eq!(config.network.magic, 0x0B110907);

        assert!(matches!(config.set_magic("0x1FFFFFFFF"), Err(ConfigError::InvalidMagic(_))));
        assert!(config.set_magic("testnet").is_err());
    }
}
