//! Common paths for Roost cache storage
//!
//! All cache state lives under a single root (the platform cache directory
//! by default, e.g. ~/.cache/roost/):
//! - images/ - one file per cache key, flat, no subdirectories
//! - index.json - last-access index used to order pruning

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the default Roost cache root (`<platform-cache-dir>/roost/`).
///
/// Falls back to a directory under the system temp dir when the platform
/// cache directory cannot be determined.
pub fn default_cache_root() -> PathBuf {
    dirs::cache_dir().map_or_else(|| std::env::temp_dir().join("roost-cache"), |d| d.join("roost"))
}

/// Get the flat images directory under a cache root, creating it if absent.
pub fn images_dir(root: &Path) -> Result<PathBuf> {
    let dir = root.join("images");
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create cache directory {}", dir.display()))?;
    Ok(dir)
}

/// Get the last-access index path for a cache root.
///
/// The index sits beside the images directory, not inside it, so the
/// listing of images/ stays the sole source of truth for what is cached.
pub fn index_path(root: &Path) -> PathBuf {
    root.join("index.json")
}

/// Get the default config file path (`<platform-config-dir>/roost/config.toml`).
pub fn config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Could not determine config directory")?
        .join("roost");
    Ok(config_dir.join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_images_dir_is_idempotent() {
        let dir = tempdir().unwrap();
        let first = images_dir(dir.path()).unwrap();
        let second = images_dir(dir.path()).unwrap();
        assert_eq!(first, second);
        assert!(first.is_dir());
    }

    #[test]
    fn test_index_path_is_outside_images_dir() {
        let dir = tempdir().unwrap();
        let images = images_dir(dir.path()).unwrap();
        let index = index_path(dir.path());
        assert!(!index.starts_with(&images));
    }
}
