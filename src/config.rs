//! Configuration module for Roost

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::paths;

/// Prune trigger threshold: 100 MiB
const DEFAULT_MAX_CACHE_BYTES: u64 = 100 * 1024 * 1024;

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Override of the platform cache root directory
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Total on-disk size above which `prune()` starts deleting entries
    #[serde(default = "default_max_cache_bytes")]
    pub max_cache_bytes: u64,

    /// File extension used for derived cache keys
    #[serde(default = "default_image_format")]
    pub image_format: String,

    /// API-version path marker; everything before it is stripped when
    /// deriving a cache key from a remote URI
    #[serde(default = "default_version_marker")]
    pub version_marker: String,

    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_max_cache_bytes() -> u64 {
    DEFAULT_MAX_CACHE_BYTES
}

fn default_image_format() -> String {
    "jpg".to_string()
}

fn default_version_marker() -> String {
    "/v2/".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: None,
            max_cache_bytes: default_max_cache_bytes(),
            image_format: default_image_format(),
            version_marker: default_version_marker(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Result<PathBuf> {
        paths::config_path()
    }

    /// Load config from the default path or create default
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        Self::load_from(&path)
    }

    /// Load config from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to the default path
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path()?;
        self.save_to(&path)
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Resolve the cache root, honoring the override when set
    pub fn cache_root(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(paths::default_cache_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.max_cache_bytes, 100 * 1024 * 1024);
        assert_eq!(config.image_format, "jpg");
        assert_eq!(config.version_marker, "/v2/");
        assert_eq!(config.request_timeout_secs, 30);
        assert!(config.cache_dir.is_none());
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.image_format, "jpg");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.max_cache_bytes = 1024;
        config.image_format = "png".to_string();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.max_cache_bytes, 1024);
        assert_eq!(loaded.image_format, "png");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "image_format = \"webp\"\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.image_format, "webp");
        assert_eq!(config.version_marker, "/v2/");
    }
}
