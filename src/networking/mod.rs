use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use log::{debug, warn};
use reqwest::Client;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use crate::error::ProvisionError;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("m3u-matrix-installer/", env!("CARGO_PKG_VERSION"));

/// Retrieves the canonical content of a URL into a local file.
///
/// On `Ok` the file at `dest` holds the complete body and the returned value
/// is its length. On `Err` the implementation must not leave `dest` behind.
#[allow(async_fn_in_trait)]
pub trait Fetcher {
    async fn fetch(&self, url: &str, dest: &Path, timeout: Duration)
    -> Result<u64, ProvisionError>;
}

#[derive(Clone)]
pub struct NetworkClient {
    client: Client,
}

impl NetworkClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(DEFAULT_FETCH_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|err| {
                warn!("network client: falling back to default HTTP client configuration ({err})");
                Client::new()
            });
        Self { client }
    }

    async fn download(&self, url: &str, dest: &Path, timeout: Duration) -> Result<u64, String> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?
            .error_for_status()
            .map_err(|e| format!("status error: {e}"))?;

        let total = response.content_length();
        let mut file = File::create(dest)
            .await
            .map_err(|e| format!("failed to create file: {e}"))?;
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| format!("stream error: {e}"))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| format!("write error: {e}"))?;
            downloaded += chunk.len() as u64;
        }

        file.flush()
            .await
            .map_err(|e| format!("flush error: {e}"))?;

        if let Some(total) = total
            && downloaded < total
        {
            return Err(format!(
                "download incomplete: received {downloaded} of {total} bytes"
            ));
        }

        Ok(downloaded)
    }
}

impl Default for NetworkClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher for NetworkClient {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        timeout: Duration,
    ) -> Result<u64, ProvisionError> {
        debug!("network: GET {url} -> {}", dest.display());
        match self.download(url, dest, timeout).await {
            Ok(bytes) => Ok(bytes),
            Err(reason) => {
                let _ = fs::remove_file(dest).await;
                Err(ProvisionError::network(url, reason))
            }
        }
    }
}

/// Join a base URL and a slash-separated relative path.
#[must_use]
pub fn join_url(base: &str, relative: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        relative.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    use super::*;

    /// Serve one canned HTTP response on a loopback port and return its URL.
    async fn serve_once(response: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            let _ = socket.write_all(response).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}/main.py")
    }

    #[test]
    fn joins_urls_without_double_slashes() {
        assert_eq!(
            join_url("https://example.org/app/", "/player/player-logic.js"),
            "https://example.org/app/player/player-logic.js"
        );
        assert_eq!(
            join_url("https://example.org/app", "main.py"),
            "https://example.org/app/main.py"
        );
    }

    #[tokio::test]
    async fn streams_a_complete_body_to_disk() {
        let url = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Length: 11\r\nConnection: close\r\n\r\nprint('ok')",
        )
        .await;
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("main.py.part");

        let bytes = NetworkClient::new()
            .fetch(&url, &dest, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(bytes, 11);
        assert_eq!(std::fs::read(&dest).unwrap(), b"print('ok')");
    }

    #[tokio::test]
    async fn error_status_fails_without_leaving_a_file() {
        let url = serve_once(
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 9\r\nConnection: close\r\n\r\nnot found",
        )
        .await;
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("main.py.part");

        let err = NetworkClient::new()
            .fetch(&url, &dest, Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::Network { .. }));
        assert!(err.to_string().contains("404"));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn short_body_fails_without_leaving_a_file() {
        let url = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\nConnection: close\r\n\r\nprint(",
        )
        .await;
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("main.py.part");

        let err = NetworkClient::new()
            .fetch(&url, &dest, Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::Network { .. }));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn unreachable_host_fails_without_leaving_a_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("main.py.part");

        let err = NetworkClient::new()
            .fetch(
                "http://127.0.0.1:9/main.py",
                &dest,
                Duration::from_secs(2),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::Network { .. }));
        assert!(!dest.exists());
    }
}
