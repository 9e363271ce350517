//! Configuration file support for a weft node.
//!
//! Loads an optional `weft.toml` from the data directory. If no config file
//! exists, defaults are used; a malformed file logs a warning and falls
//! back to defaults rather than refusing to start.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct WeftConfig {
    pub node: NodeConfig,
}

/// Node configuration section.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Directory holding the ledger database and the node key.
    pub data_dir: String,
    /// File name of the node's Ed25519 keypair, relative to `data_dir`.
    pub key_file: String,
    /// Storage engine cache budget in megabytes.
    pub db_cache_mb: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            data_dir: "./weft-data".into(),
            key_file: "node.key".into(),
            db_cache_mb: 64,
        }
    }
}

impl WeftConfig {
    /// Load configuration from `weft.toml` in the given directory.
    /// Returns `Default` if the file doesn't exist.
    pub fn load(data_dir: &Path) -> Self {
        let config_path = data_dir.join("weft.toml");
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str::<WeftConfig>(&contents) {
                Ok(mut config) => {
                    // the directory we found the file in wins over the
                    // default data_dir baked into the struct
                    if config.node.data_dir == NodeConfig::default().data_dir {
                        config.node.data_dir = data_dir.display().to_string();
                    }
                    tracing::info!(path = %config_path.display(), "Loaded configuration");
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        path = %config_path.display(),
                        error = %e,
                        "Malformed config file, using defaults"
                    );
                    let mut config = WeftConfig::default();
                    config.node.data_dir = data_dir.display().to_string();
                    config
                }
            },
            Err(_) => {
                let mut config = WeftConfig::default();
                config.node.data_dir = data_dir.display().to_string();
                config
            }
        }
    }

    /// Absolute location of the node key file.
    pub fn key_path(&self) -> PathBuf {
        Path::new(&self.node.data_dir).join(&self.node.key_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = WeftConfig::load(dir.path());
        assert_eq!(config.node.data_dir, dir.path().display().to_string());
        assert_eq!(config.node.key_file, "node.key");
        assert_eq!(config.node.db_cache_mb, 64);
    }

    #[test]
    fn partial_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("weft.toml"), "[node]\ndb_cache_mb = 256\n").unwrap();
        let config = WeftConfig::load(dir.path());
        assert_eq!(config.node.db_cache_mb, 256);
        assert_eq!(config.node.key_file, "node.key");
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("weft.toml"), "not toml at all [").unwrap();
        let config = WeftConfig::load(dir.path());
        assert_eq!(config.node.db_cache_mb, 64);
    }

    #[test]
    fn key_path_joins_data_dir() {
        let mut config = WeftConfig::default();
        config.node.data_dir = "/tmp/weft".into();
        assert_eq!(config.key_path(), Path::new("/tmp/weft/node.key"));
    }
}
