//! The cache store: on-disk entries, reference locks, and pruning.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::cache::fetch::{self, FetchRequest};
use crate::config::Config;
use crate::paths;

/// Shared holder registry: cache key → holder ids currently depending on it.
type LockRegistry = Arc<Mutex<HashMap<String, HashSet<Uuid>>>>;

/// Disk-backed image cache.
///
/// An explicit instance, cheap to clone (all state behind an `Arc`), so
/// tests can build isolated stores instead of sharing process-wide state.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<Inner>,
}

struct Inner {
    images_dir: PathBuf,
    index_path: PathBuf,
    max_cache_bytes: u64,
    image_format: String,
    version_marker: String,
    client: reqwest::Client,
    /// Keys that must survive pruning while any holder remains
    locks: LockRegistry,
    /// Per-key download gates for in-flight de-duplication
    inflight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Last access per key, orders prune candidates oldest-first
    index: Mutex<HashMap<String, DateTime<Utc>>>,
}

/// Opaque proof that a consumer depends on a cache entry.
///
/// Holding a token keeps the entry safe from pruning; dropping it releases
/// the hold. Tokens are not cloneable, so holds cannot be duplicated, and a
/// consumer dropped mid-fetch cannot leak one.
pub struct UseToken {
    key: String,
    holder: Uuid,
    locks: LockRegistry,
}

impl Drop for UseToken {
    fn drop(&mut self) {
        if let Ok(mut locks) = self.locks.lock()
            && let Some(holders) = locks.get_mut(&self.key)
        {
            holders.remove(&self.holder);
            // An emptied holder set is removed entirely so a stale entry
            // never blocks pruning or leaks memory
            if holders.is_empty() {
                locks.remove(&self.key);
            }
        }
    }
}

impl UseToken {
    /// The cache key this token holds.
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// What one pruning pass did.
#[derive(Debug, Default, Clone, Copy)]
pub struct PruneReport {
    /// Entries found in the images directory
    pub scanned_files: usize,
    /// Total entry bytes before any deletion
    pub total_bytes_before: u64,
    /// Entries deleted
    pub deleted_files: usize,
    /// Bytes freed by deletion
    pub freed_bytes: u64,
    /// Over-threshold candidates kept because a holder was registered
    pub skipped_locked: usize,
}

impl PruneReport {
    /// Total entry bytes remaining after the pass.
    pub fn total_bytes_after(&self) -> u64 {
        self.total_bytes_before - self.freed_bytes
    }
}

/// Current cache occupancy.
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    /// Number of cached entries
    pub entries: usize,
    /// Total bytes across entries
    pub total_bytes: u64,
}

impl CacheStore {
    /// Open (or create) the cache under the configured root.
    ///
    /// Creates the images directory if absent and loads the last-access
    /// index. Safe to call repeatedly over the same root.
    pub fn open(config: &Config) -> Result<Self> {
        let root = config.cache_root();
        let images_dir = paths::images_dir(&root)?;
        let index_path = paths::index_path(&root);
        let index = load_index(&index_path);

        Ok(Self {
            inner: Arc::new(Inner {
                images_dir,
                index_path,
                max_cache_bytes: config.max_cache_bytes,
                image_format: config.image_format.clone(),
                version_marker: config.version_marker.clone(),
                client: fetch::build_client(config.request_timeout_secs),
                locks: Arc::new(Mutex::new(HashMap::new())),
                inflight: Mutex::new(HashMap::new()),
                index: Mutex::new(index),
            }),
        })
    }

    /// The flat directory holding one file per cache key.
    pub fn images_dir(&self) -> &Path {
        &self.inner.images_dir
    }

    /// Default file extension for derived keys.
    pub fn default_format(&self) -> &str {
        &self.inner.image_format
    }

    /// Configured API-version marker used in key derivation.
    pub fn version_marker(&self) -> &str {
        &self.inner.version_marker
    }

    /// On-disk path for a cache key. Pure mapping, the file may not exist.
    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.inner.images_dir.join(key)
    }

    /// Copy a local file into the cache under `key`.
    pub async fn import_local_file(&self, source: &Path, key: &str) -> Result<PathBuf> {
        let target = self.entry_path(key);
        tokio::fs::copy(source, &target).await.with_context(|| {
            format!("Failed to import {} as cache entry {key}", source.display())
        })?;
        self.touch(key);
        Ok(target)
    }

    /// Resolve a cache key to a displayable `file://` URI.
    ///
    /// Errors when the entry does not exist.
    pub fn resolve_cached_uri(&self, key: &str) -> Result<String> {
        let path = self.entry_path(key);
        if !path.is_file() {
            bail!("No cache entry for key {key}");
        }
        let absolute = path
            .canonicalize()
            .with_context(|| format!("Failed to resolve cache entry {key}"))?;
        Ok(format!("file://{}", absolute.display()))
    }

    /// Register a hold on `key`, keeping its entry safe from pruning until
    /// the returned token is dropped.
    pub fn begin_use(&self, key: &str) -> UseToken {
        let holder = Uuid::new_v4();
        self.inner
            .locks
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .insert(holder);
        UseToken {
            key: key.to_string(),
            holder,
            locks: Arc::clone(&self.inner.locks),
        }
    }

    /// Whether any holder is currently registered for `key`.
    pub fn is_locked(&self, key: &str) -> bool {
        self.inner
            .locks
            .lock()
            .unwrap()
            .get(key)
            .is_some_and(|holders| !holders.is_empty())
    }

    /// Record a cache hit on `key` for prune ordering.
    pub fn touch(&self, key: &str) {
        self.inner
            .index
            .lock()
            .unwrap()
            .insert(key.to_string(), Utc::now());
    }

    /// Delete the entry for `key`, idempotently, along with any staged
    /// `.part` file.
    pub async fn remove_entry(&self, key: &str) {
        let target = self.entry_path(key);
        fetch::remove_if_present(&target).await;
        fetch::remove_partial(&target).await;
        self.inner.index.lock().unwrap().remove(key);
    }

    /// Download a remote resource into the entry for `key`.
    ///
    /// Returns `true` only when the entry is present afterwards: either the
    /// server answered 2xx, or a concurrent fetch of the same key already
    /// landed it. On any failure the partial file is removed and `false` is
    /// returned; errors are logged, never raised. No internal retry.
    ///
    /// Concurrent fetches of the same key serialize on a per-key gate, so
    /// only one download hits the network; late requesters observe the
    /// entry present and return without re-downloading.
    pub async fn fetch_and_cache(&self, key: &str, request: FetchRequest) -> bool {
        let target = self.entry_path(key);

        loop {
            let gate = self.gate(key);
            let guard = gate.lock().await;

            // A finished downloader retires its gate before releasing it, so
            // acquiring a gate that is no longer in the map means the map has
            // moved on; loop to take the current one. This keeps two tasks
            // from ever downloading the same key at once.
            if !self.gate_is_current(key, &gate) {
                drop(guard);
                continue;
            }

            // A concurrent fetch may have completed while we waited
            if target.is_file() {
                self.touch(key);
                self.retire_gate(key, &gate);
                return true;
            }

            let outcome = fetch::download_to(&self.inner.client, &request, &target).await;
            let fetched = match outcome {
                Ok(()) => {
                    self.touch(key);
                    if let Err(e) = self.flush_index() {
                        tracing::debug!("Failed to persist access index: {e}");
                    }
                    tracing::debug!("Cached {key}");
                    true
                }
                Err(e) => {
                    tracing::warn!("Failed to fetch {}: {e}", request.url);
                    fetch::remove_partial(&target).await;
                    false
                }
            };
            self.retire_gate(key, &gate);
            return fetched;
        }
    }

    /// Prune the cache back under the size threshold.
    ///
    /// A no-op when the images directory is missing. Deletes unlocked
    /// entries oldest-access-first until the total is at or under the
    /// threshold; entries with a registered holder are skipped, so when all
    /// candidates are locked the total may remain above the threshold.
    pub async fn prune(&self) -> Result<PruneReport> {
        let mut report = PruneReport::default();
        if !self.inner.images_dir.is_dir() {
            return Ok(report);
        }

        let mut candidates = self.scan_entries().await?;
        report.scanned_files = candidates.len();
        report.total_bytes_before = candidates.iter().map(|c| c.size).sum();

        let mut remaining = report.total_bytes_before;
        if remaining <= self.inner.max_cache_bytes {
            return Ok(report);
        }

        // Oldest access first; entries never seen by the index go first
        candidates.sort_by_key(|c| c.last_access);

        for candidate in &candidates {
            if remaining <= self.inner.max_cache_bytes {
                break;
            }
            if self.is_locked(&candidate.key) {
                report.skipped_locked += 1;
                continue;
            }
            fetch::remove_if_present(&self.inner.images_dir.join(&candidate.key)).await;
            self.inner.index.lock().unwrap().remove(&candidate.key);
            remaining -= candidate.size;
            report.deleted_files += 1;
            report.freed_bytes += candidate.size;
        }

        self.flush_index()?;
        tracing::debug!(
            "Pruned {} entries ({} bytes), {} locked entries kept",
            report.deleted_files,
            report.freed_bytes,
            report.skipped_locked
        );
        Ok(report)
    }

    /// Current entry count and total size.
    pub async fn stats(&self) -> Result<CacheStats> {
        let entries = self.scan_entries().await?;
        Ok(CacheStats {
            entries: entries.len(),
            total_bytes: entries.iter().map(|c| c.size).sum(),
        })
    }

    /// Persist the last-access index beside the images directory.
    pub fn flush_index(&self) -> Result<()> {
        let snapshot = self.inner.index.lock().unwrap().clone();
        let content =
            serde_json::to_string_pretty(&snapshot).context("Failed to serialize access index")?;
        std::fs::write(&self.inner.index_path, content)
            .context("Failed to write access index")?;
        Ok(())
    }

    /// List cache entries with sizes and last-access times. Staged `.part`
    /// files and anything that is not a plain file are skipped.
    async fn scan_entries(&self) -> Result<Vec<EntryMeta>> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.inner.images_dir)
            .await
            .context("Failed to list cache directory")?;

        while let Some(entry) = dir.next_entry().await.context("Failed to read cache entry")? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.ends_with(".part") {
                continue;
            }
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let last_access = self.inner.index.lock().unwrap().get(&name).copied();
            entries.push(EntryMeta {
                key: name,
                size: metadata.len(),
                last_access,
            });
        }

        Ok(entries)
    }

    /// The per-key download gate, created on first use.
    fn gate(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.inner
                .inflight
                .lock()
                .unwrap()
                .entry(key.to_string())
                .or_default(),
        )
    }

    /// Whether `gate` is still the one registered for `key`.
    fn gate_is_current(&self, key: &str, gate: &Arc<tokio::sync::Mutex<()>>) -> bool {
        self.inner
            .inflight
            .lock()
            .unwrap()
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, gate))
    }

    /// Retire a key's gate once its download settled. Removes the gate only
    /// when it is still the registered one, so a stale holder can never
    /// evict a fresh gate another requester is already using. Called while
    /// the guard is still held: the retired gate leaves the map before any
    /// waiter can acquire it, and waiters detect the stale gate and re-take
    /// the current one.
    fn retire_gate(&self, key: &str, gate: &Arc<tokio::sync::Mutex<()>>) {
        let mut inflight = self.inner.inflight.lock().unwrap();
        if inflight.get(key).is_some_and(|current| Arc::ptr_eq(current, gate)) {
            inflight.remove(key);
        }
    }
}

struct EntryMeta {
    key: String,
    size: u64,
    last_access: Option<DateTime<Utc>>,
}

/// Load the persisted access index, treating a missing or unreadable file
/// as an empty index.
fn load_index(path: &Path) -> HashMap<String, DateTime<Utc>> {
    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("Discarding corrupt access index: {e}");
            HashMap::new()
        }),
        Err(_) => HashMap::new(),
    }
}
