//! Disk-backed caching of remotely fetched images.
//!
//! This module owns the flat on-disk images directory: deterministic
//! cache-key derivation, streamed downloads with in-flight de-duplication,
//! per-consumer reference locks that shield entries from eviction, and a
//! size-triggered pruning pass ordered by last access.

mod fetch;
mod key;
mod store;

pub use fetch::{AUTH_TOKEN_HEADER, FetchError, FetchRequest, ProgressFn};

#[cfg(test)]
pub(crate) use fetch::tests as test_support;
pub use key::{derive_key, is_remote, request_uri};
pub use store::{CacheStats, CacheStore, PruneReport, UseToken};
