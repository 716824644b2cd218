//! Deterministic cache-key derivation from remote URIs.
//!
//! The same logical remote resource with the same parameter set must always
//! derive the same key, so cache hits survive across consumers and across
//! app sessions. Keys double as filenames in the flat images directory.

use std::collections::BTreeMap;

/// Check whether a source URI refers to a remote resource.
pub fn is_remote(uri: &str) -> bool {
    uri.starts_with("http://") || uri.starts_with("https://")
}

/// Derive a cache key from a remote URI plus request parameters.
///
/// The key is the URI path after `version_marker` (the full path when the
/// marker is absent), segments joined with `-`, followed by `-{key}-{value}`
/// for each parameter in sorted key order, with `.{format}` appended.
/// Characters unsafe in filenames are replaced with `-`.
pub fn derive_key(
    uri: &str,
    params: &BTreeMap<String, String>,
    format: &str,
    version_marker: &str,
) -> String {
    let path = path_after_marker(uri, version_marker);

    let mut parts: Vec<&str> = path
        .split('?')
        .next()
        .unwrap_or_default()
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        parts.push("root");
    }

    let mut key = parts.join("-");
    for (name, value) in params {
        key.push('-');
        key.push_str(name);
        key.push('-');
        key.push_str(value);
    }

    let mut key = sanitize(&key);
    key.push('.');
    key.push_str(format);
    key
}

/// Build the effective request URI: the remote URI with parameters appended
/// as a query string in sorted key order. Non-remote URIs and empty
/// parameter sets pass through unchanged.
pub fn request_uri(uri: &str, params: &BTreeMap<String, String>) -> String {
    if !is_remote(uri) || params.is_empty() {
        return uri.to_string();
    }

    let query: Vec<String> = params
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    let separator = if uri.contains('?') { '&' } else { '?' };
    format!("{uri}{separator}{}", query.join("&"))
}

/// The URI path after the version marker, or the full path when the marker
/// is missing (degrades to longer keys, never to collisions).
fn path_after_marker<'a>(uri: &'a str, marker: &str) -> &'a str {
    if !marker.is_empty()
        && let Some(pos) = uri.find(marker)
    {
        return &uri[pos + marker.len()..];
    }

    // No marker: strip scheme and authority, keep the path
    uri.find("://")
        .and_then(|scheme_end| {
            let rest = &uri[scheme_end + 3..];
            rest.find('/').map(|slash| &rest[slash + 1..])
        })
        .unwrap_or(uri)
}

/// Replace filename-unsafe characters so the key is a valid flat filename.
fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_same_resource_same_key() {
        let p = params(&[("width", "256")]);
        let a = derive_key("https://api.example.com/v2/badges/42/image", &p, "jpg", "/v2/");
        let b = derive_key("https://api.example.com/v2/badges/42/image", &p, "jpg", "/v2/");
        assert_eq!(a, b);
        assert_eq!(a, "badges-42-image-width-256.jpg");
    }

    #[test]
    fn test_param_order_does_not_matter() {
        let a = derive_key(
            "https://api.example.com/v2/projects/7/thumbnail",
            &params(&[("width", "512"), ("suffix", "cover")]),
            "jpg",
            "/v2/",
        );
        let b = derive_key(
            "https://api.example.com/v2/projects/7/thumbnail",
            &params(&[("suffix", "cover"), ("width", "512")]),
            "jpg",
            "/v2/",
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_differing_params_differ() {
        let uri = "https://api.example.com/v2/users/9/avatar";
        let a = derive_key(uri, &params(&[("width", "128")]), "jpg", "/v2/");
        let b = derive_key(uri, &params(&[("width", "256")]), "jpg", "/v2/");
        assert_ne!(a, b);
    }

    #[test]
    fn test_host_is_stripped_before_marker() {
        let p = params(&[]);
        let a = derive_key("https://api.example.com/v2/events/3/image", &p, "jpg", "/v2/");
        let b = derive_key("https://cdn.example.org/v2/events/3/image", &p, "jpg", "/v2/");
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_marker_uses_full_path() {
        let key = derive_key(
            "https://static.example.com/assets/logo.png",
            &params(&[]),
            "png",
            "/v2/",
        );
        assert_eq!(key, "assets-logo.png.png");
    }

    #[test]
    fn test_format_extension_applied() {
        let key = derive_key("https://api.example.com/v2/a/b", &params(&[]), "webp", "/v2/");
        assert!(key.ends_with(".webp"));
    }

    #[test]
    fn test_unsafe_characters_sanitized() {
        let key = derive_key(
            "https://api.example.com/v2/files/a b/img",
            &params(&[("suffix", "x/y")]),
            "jpg",
            "/v2/",
        );
        assert!(!key.contains('/'));
        assert!(!key.contains(' '));
    }

    #[test]
    fn test_request_uri_appends_sorted_query() {
        let uri = request_uri(
            "https://api.example.com/v2/badges/42/image",
            &params(&[("width", "256"), ("suffix", "cover")]),
        );
        assert_eq!(
            uri,
            "https://api.example.com/v2/badges/42/image?suffix=cover&width=256"
        );
    }

    #[test]
    fn test_request_uri_extends_existing_query() {
        let uri = request_uri(
            "https://api.example.com/v2/image?size=raw",
            &params(&[("width", "64")]),
        );
        assert_eq!(uri, "https://api.example.com/v2/image?size=raw&width=64");
    }

    #[test]
    fn test_request_uri_passes_local_through() {
        let uri = request_uri("file:///tmp/pic.jpg", &params(&[("width", "64")]));
        assert_eq!(uri, "file:///tmp/pic.jpg");
    }
}
