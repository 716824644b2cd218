//! Streamed download of remote images into the cache.
//!
//! Downloads are staged at a `.part` sibling and renamed into place only
//! after the body is fully written, so the entry path never holds a
//! partially-written file.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Header carrying the session bearer token on image requests.
pub const AUTH_TOKEN_HEADER: &str = "auth-token";

/// Incremental progress callback: `(bytes_received, total_bytes)`.
/// `total_bytes` is `None` when the server sends no Content-Length.
pub type ProgressFn = Box<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// One fetch of a remote resource into the cache.
pub struct FetchRequest {
    /// Fully-qualified remote URI (query string included)
    pub url: String,
    /// Session token, sent in the `auth-token` header when present
    pub auth_token: Option<String>,
    /// Optional incremental progress callback
    pub progress: Option<ProgressFn>,
}

impl FetchRequest {
    /// Fetch request for a URL with no token and no progress reporting.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: None,
            progress: None,
        }
    }
}

/// Download failure taxonomy. All variants are recovered by the store:
/// the partial file is removed and the caller sees a boolean `false`.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Server answered with a non-success status
    #[error("HTTP {status}")]
    Http {
        /// The response status code
        status: u16,
    },
    /// Request failed before or during the body transfer
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    /// Writing the staged file failed
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Build the shared HTTP client.
pub(crate) fn build_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_default()
}

/// The `.part` staging sibling for an entry path.
pub(crate) fn part_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    target.with_file_name(name)
}

/// Stream `request.url` into `target`, reporting progress along the way.
///
/// The body is written to the `.part` sibling and renamed over `target` on
/// success. On any error the caller is expected to run [`remove_partial`].
pub(crate) async fn download_to(
    client: &reqwest::Client,
    request: &FetchRequest,
    target: &Path,
) -> Result<(), FetchError> {
    tracing::debug!("Downloading image: {}", request.url);

    let mut builder = client.get(&request.url);
    if let Some(token) = &request.auth_token {
        builder = builder.header(AUTH_TOKEN_HEADER, token);
    }

    let mut response = builder.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Http {
            status: status.as_u16(),
        });
    }

    let total = response.content_length();
    let staged = part_path(target);
    let mut file = tokio::fs::File::create(&staged).await?;

    let mut received: u64 = 0;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        received += chunk.len() as u64;
        if let Some(progress) = &request.progress {
            progress(received, total);
        }
    }

    file.flush().await?;
    drop(file);
    tokio::fs::rename(&staged, target).await?;

    Ok(())
}

/// Remove the staged `.part` file for an entry, idempotently.
///
/// Failure cleanup never touches the entry path itself: a failed download
/// only ever wrote the staged sibling, and the entry may hold a valid file
/// landed by another writer in the meantime.
pub(crate) async fn remove_partial(target: &Path) {
    remove_if_present(&part_path(target)).await;
}

/// Idempotent delete: a missing file is not an error.
pub(crate) async fn remove_if_present(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {}: {e}", path.display()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt as _};
    use tokio::net::TcpListener;

    /// Request heads received by a test server, in arrival order.
    pub(crate) type RequestHeads = Arc<std::sync::Mutex<Vec<String>>>;

    /// Serve canned HTTP responses on loopback, counting requests handled.
    pub(crate) async fn spawn_server(
        status_line: &'static str,
        body: &'static [u8],
    ) -> (SocketAddr, Arc<AtomicUsize>) {
        let (addr, hits, _) = spawn_server_with_capture(status_line, body).await;
        (addr, hits)
    }

    /// Like [`spawn_server`], also capturing each request head for
    /// assertions on what the client sent.
    pub(crate) async fn spawn_server_with_capture(
        status_line: &'static str,
        body: &'static [u8],
    ) -> (SocketAddr, Arc<AtomicUsize>, RequestHeads) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let heads: RequestHeads = Arc::new(std::sync::Mutex::new(Vec::new()));
        let hits_inner = Arc::clone(&hits);
        let heads_inner = Arc::clone(&heads);

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                hits_inner.fetch_add(1, Ordering::SeqCst);

                // Drain the request head before answering
                let mut head_buf = Vec::new();
                let mut buf = [0u8; 1024];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) => break,
                        Ok(n) => {
                            head_buf.extend_from_slice(&buf[..n]);
                            if head_buf.windows(4).any(|w| w == b"\r\n\r\n") {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
                heads_inner
                    .lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&head_buf).into_owned());

                let head = format!(
                    "{status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(body).await;
                let _ = socket.shutdown().await;
            }
        });

        (addr, hits, heads)
    }

    #[tokio::test]
    async fn test_download_success_writes_target() {
        let (addr, _) = spawn_server("HTTP/1.1 200 OK", b"hello image").await;
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("entry.jpg");

        let client = build_client(5);
        let request = FetchRequest::new(format!("http://{addr}/v2/img"));
        download_to(&client, &request, &target).await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"hello image");
        assert!(!part_path(&target).exists());
    }

    #[tokio::test]
    async fn test_download_reports_progress() {
        let (addr, _) = spawn_server("HTTP/1.1 200 OK", b"0123456789").await;
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("entry.jpg");

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_cb = Arc::clone(&seen);
        let request = FetchRequest {
            url: format!("http://{addr}/v2/img"),
            auth_token: None,
            progress: Some(Box::new(move |received, total| {
                assert_eq!(total, Some(10));
                seen_cb.store(received as usize, Ordering::SeqCst);
            })),
        };

        let client = build_client(5);
        download_to(&client, &request, &target).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_error() {
        let (addr, _) = spawn_server("HTTP/1.1 404 Not Found", b"gone").await;
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("entry.jpg");

        let client = build_client(5);
        let request = FetchRequest::new(format!("http://{addr}/v2/img"));
        let err = download_to(&client, &request, &target).await.unwrap_err();

        assert!(matches!(err, FetchError::Http { status: 404 }));
        assert!(!target.exists());
        assert!(!part_path(&target).exists());
    }

    #[tokio::test]
    async fn test_auth_token_header_sent_when_supplied() {
        let (addr, _, heads) = spawn_server_with_capture("HTTP/1.1 200 OK", b"ok").await;
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("entry.jpg");

        let mut request = FetchRequest::new(format!("http://{addr}/v2/img"));
        request.auth_token = Some("session-token-123".to_string());

        let client = build_client(5);
        download_to(&client, &request, &target).await.unwrap();

        let heads = heads.lock().unwrap();
        assert!(
            heads[0]
                .to_ascii_lowercase()
                .contains("auth-token: session-token-123")
        );
    }

    #[tokio::test]
    async fn test_auth_token_header_absent_without_token() {
        let (addr, _, heads) = spawn_server_with_capture("HTTP/1.1 200 OK", b"ok").await;
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("entry.jpg");

        let client = build_client(5);
        let request = FetchRequest::new(format!("http://{addr}/v2/img"));
        download_to(&client, &request, &target).await.unwrap();

        let heads = heads.lock().unwrap();
        assert!(!heads[0].to_ascii_lowercase().contains("auth-token"));
    }

    #[tokio::test]
    async fn test_remove_partial_is_idempotent_and_spares_the_entry() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("entry.jpg");
        std::fs::write(&target, b"landed entry").unwrap();
        std::fs::write(part_path(&target), b"half written").unwrap();

        remove_partial(&target).await;
        remove_partial(&target).await;

        assert!(!part_path(&target).exists());
        // Failure cleanup must never take out a valid entry another writer landed
        assert_eq!(std::fs::read(&target).unwrap(), b"landed entry");
    }
}
