//! # Roost 🪺
//!
//! A disk-backed cache for remotely fetched images.
//!
//! ## Overview
//!
//! Roost gives image-heavy clients one place to park remote images: a flat
//! on-disk directory keyed deterministically by resource path and request
//! parameters, so the same logical image hits the cache across consumers
//! and across sessions. Consumers hold use tokens that shield entries from
//! eviction, downloads of the same key are de-duplicated, and a pruning
//! pass keeps total disk usage bounded, oldest access first.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CachedImageView                         │
//! │  Derives a key, holds a use token, resolves hit/fetch/fall  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       CacheStore                            │
//! │                                                             │
//! │ • entry paths + file:// URIs     • lock registry (tokens)   │
//! │ • streamed fetch + dedup gates   • size-bounded pruning     │
//! │ • local imports                  • last-access index        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//! ┌─────────────────┐ ┌─────────────────┐ ┌─────────────────┐
//! │     Config      │ │      Paths      │ │   Filesystem    │
//! │                 │ │                 │ │                 │
//! │ • Thresholds    │ │ • Cache root    │ │ • images/ flat  │
//! │ • Key format    │ │ • Index path    │ │ • index.json    │
//! └─────────────────┘ └─────────────────┘ └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`cache`] — the store: keys, downloads, locks, pruning
//! - [`config`] — configuration management
//! - [`paths`] — cache directory layout
//! - [`view`] — cache-aware image consumer
//!
//! ## Example
//!
//! ```no_run
//! use roost::{CacheStore, Config, ImageProps, CachedImageView};
//!
//! # async fn load() -> anyhow::Result<()> {
//! let store = CacheStore::open(&Config::load()?)?;
//! let props = ImageProps::remote(
//!     "https://api.example.com/v2/badges/42/image",
//!     "assets/placeholder.png",
//! );
//! let mut view = CachedImageView::mount(props, &store).await;
//! view.resolve(&store).await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees
//!
//! - **Deterministic keys** — same resource + params, same key, always
//! - **No partial files** — downloads stage at a `.part` sibling
//! - **No eviction races** — held entries survive pruning structurally
//! - **One download per key** — concurrent fetches coalesce
//! - **Silent degradation** — a failed image falls back, never errors

#![doc(html_root_url = "https://docs.rs/roost/0.1.0")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::return_self_not_must_use)]

pub mod cache;
pub mod config;
pub mod paths;
pub mod view;

// Re-export main types for convenience
pub use cache::{CacheStats, CacheStore, FetchRequest, PruneReport, UseToken};
pub use config::Config;
pub use view::{CachedImageView, ImageProps, ImageSource, ViewState};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Repository URL
pub const REPO_URL: &str = "https://github.com/ricardodantas/roost";
