//! Cache-aware image view: the consumer side of the image cache.
//!
//! A [`CachedImageView`] derives a cache key for its source, holds a use
//! token for its lifetime so pruning cannot delete the entry out from under
//! it, and resolves to a ready state through the cache: hit, fetch-then-hit,
//! or fallback to a bundled default. Failures never surface as errors; the
//! worst outcome for a single image is its default placeholder.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::cache::{self, CacheStore, FetchRequest, UseToken};

/// Where an image comes from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// A remote http(s) resource, fetched through the cache
    Remote(String),
    /// A local or bundled asset, used as-is and never cached
    Local(PathBuf),
}

/// Consumer-facing props for a cached image.
pub struct ImageProps {
    /// The image source
    pub source: ImageSource,
    /// Resize/format hints appended to remote requests as a query string
    pub params: BTreeMap<String, String>,
    /// Explicit cache key; wins over derivation when set
    pub cache_key: Option<String>,
    /// Delete any existing entry on mount to force a fresh fetch
    pub cache_disabled: bool,
    /// Bundled asset rendered when the remote image cannot be shown
    pub default_source: PathBuf,
    /// Cache-key extension override; the store's default when `None`
    pub image_format: Option<String>,
    /// Session token forwarded on the fetch
    pub auth_token: Option<String>,
    /// Caller-constrained display width
    pub width: Option<u32>,
    /// Caller-constrained display height
    pub height: Option<u32>,
}

impl ImageProps {
    /// Props for a remote image with defaults for everything else.
    pub fn remote(uri: impl Into<String>, default_source: impl Into<PathBuf>) -> Self {
        Self {
            source: ImageSource::Remote(uri.into()),
            params: BTreeMap::new(),
            cache_key: None,
            cache_disabled: false,
            default_source: default_source.into(),
            image_format: None,
            auth_token: None,
            width: None,
            height: None,
        }
    }

    /// Props for a local asset.
    pub fn local(path: impl Into<PathBuf>, default_source: impl Into<PathBuf>) -> Self {
        Self {
            source: ImageSource::Local(path.into()),
            ..Self::remote(String::new(), default_source)
        }
    }
}

/// Where the view currently is in its loading lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewState {
    /// Not yet resolved; render a placeholder
    Pending,
    /// The image at `path` is confirmed loadable
    Ready {
        /// Path to the displayable file
        path: PathBuf,
        /// Intrinsic pixel width
        width: u32,
        /// Intrinsic pixel height
        height: u32,
    },
    /// The remote image could not be shown; render the default source
    Fallback {
        /// Path to the bundled default asset
        path: PathBuf,
    },
}

/// One mounted image consumer.
///
/// Dropping the view releases its use token on every exit path, including
/// mid-fetch; an in-flight download it triggered keeps running and lands in
/// the shared cache regardless.
pub struct CachedImageView {
    source: ImageSource,
    request_url: String,
    cache_key: String,
    cache_disabled: bool,
    default_source: PathBuf,
    auth_token: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    state: ViewState,
    _token: Option<UseToken>,
}

impl CachedImageView {
    /// Mount a view against a store.
    ///
    /// For remote sources this registers a hold on the derived cache key
    /// and, when `cache_disabled` is set, deletes any existing entry so the
    /// next resolve fetches fresh bytes. Local sources skip caching
    /// entirely.
    pub async fn mount(props: ImageProps, store: &CacheStore) -> Self {
        let (request_url, cache_key, token) = match &props.source {
            ImageSource::Remote(uri) if cache::is_remote(uri) => {
                let format = props
                    .image_format
                    .as_deref()
                    .unwrap_or_else(|| store.default_format());
                let key = props.cache_key.clone().unwrap_or_else(|| {
                    cache::derive_key(uri, &props.params, format, store.version_marker())
                });
                let url = cache::request_uri(uri, &props.params);
                if props.cache_disabled {
                    store.remove_entry(&key).await;
                }
                (url, key.clone(), Some(store.begin_use(&key)))
            }
            _ => (String::new(), String::new(), None),
        };

        Self {
            source: props.source,
            request_url,
            cache_key,
            cache_disabled: props.cache_disabled,
            default_source: props.default_source,
            auth_token: props.auth_token,
            width: props.width,
            height: props.height,
            state: ViewState::Pending,
            _token: token,
        }
    }

    /// Drive the view to `Ready` or `Fallback`.
    ///
    /// Remote flow: read intrinsic dimensions at the optimistic cache path
    /// (a hit); on a miss or corrupt file, fetch into the cache and try
    /// again; on any failure fall back to the default source. Local sources
    /// are ready immediately.
    pub async fn resolve(&mut self, store: &CacheStore) -> &ViewState {
        if self.state != ViewState::Pending {
            return &self.state;
        }

        self.state = match &self.source {
            ImageSource::Local(path) => match read_dimensions(path) {
                Some((width, height)) => ViewState::Ready {
                    path: path.clone(),
                    width,
                    height,
                },
                None => self.fallback(),
            },
            ImageSource::Remote(uri) if cache::is_remote(uri) => {
                self.resolve_remote(store).await
            }
            // A non-http "remote" source cannot be fetched or cached
            ImageSource::Remote(_) => self.fallback(),
        };
        &self.state
    }

    async fn resolve_remote(&self, store: &CacheStore) -> ViewState {
        let path = store.entry_path(&self.cache_key);

        if !self.cache_disabled
            && let Some((width, height)) = read_dimensions(&path)
        {
            store.touch(&self.cache_key);
            return ViewState::Ready { path, width, height };
        }

        let request = FetchRequest {
            url: self.request_url.clone(),
            auth_token: self.auth_token.clone(),
            progress: None,
        };
        if store.fetch_and_cache(&self.cache_key, request).await
            && let Some((width, height)) = read_dimensions(&path)
        {
            return ViewState::Ready { path, width, height };
        }

        tracing::debug!("Falling back to default source for {}", self.cache_key);
        self.fallback()
    }

    fn fallback(&self) -> ViewState {
        ViewState::Fallback {
            path: self.default_source.clone(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> &ViewState {
        &self.state
    }

    /// The cache key this view resolved for remote sources.
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    /// On-screen dimensions once ready, honoring the caller's constraints
    /// while preserving aspect ratio.
    pub fn display_size(&self) -> Option<(u32, u32)> {
        match &self.state {
            ViewState::Ready { width, height, .. } => {
                Some(fit_within((*width, *height), self.width, self.height))
            }
            _ => None,
        }
    }
}

/// Read the intrinsic dimensions of an image file. A missing or corrupt
/// file is a cache miss, not an error.
fn read_dimensions(path: &Path) -> Option<(u32, u32)> {
    image::image_dimensions(path).ok()
}

/// Fit intrinsic dimensions into the caller's constraints.
///
/// When only one of width/height is constrained the other follows the
/// intrinsic aspect ratio; when both are given the caller wins; when
/// neither is, the intrinsic size is used.
fn fit_within(intrinsic: (u32, u32), width: Option<u32>, height: Option<u32>) -> (u32, u32) {
    let (iw, ih) = intrinsic;
    match (width, height) {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) if iw > 0 => {
            (w, scale(u64::from(w) * u64::from(ih) / u64::from(iw)))
        }
        (None, Some(h)) if ih > 0 => {
            (scale(u64::from(h) * u64::from(iw) / u64::from(ih)), h)
        }
        _ => (iw, ih),
    }
}

/// Saturate a scaled dimension back into pixel range; extreme aspect
/// ratios clamp instead of truncating.
fn scale(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
