//! Firmware image download

use async_trait::async_trait;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use wf_core::error::DownloadError;

/// Called with `(bytes_so_far, total_if_known)` as data arrives
pub type ProgressFn<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

/// Fetches a firmware image into a local file
#[async_trait]
pub trait FirmwareFetcher: Send + Sync {
    /// Download `url` to `destination`, returning the number of bytes written
    async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        on_progress: ProgressFn<'_>,
    ) -> Result<u64, DownloadError>;
}

/// Streams images over HTTP(S) with reqwest.
///
/// There is no overall deadline; a download is bounded only by the
/// transport's own connect and read behaviour.
#[derive(Debug, Clone, Default)]
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FirmwareFetcher for HttpDownloader {
    async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        on_progress: ProgressFn<'_>,
    ) -> Result<u64, DownloadError> {
        let io_error = |source| DownloadError::Io {
            path: destination.to_path_buf(),
            source,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status(status.as_u16()));
        }

        let total = response.content_length();
        tracing::info!("Downloading {} ({:?} bytes)", url, total);

        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(io_error)?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| DownloadError::Http(e.to_string()))?;
            file.write_all(&chunk).await.map_err(io_error)?;
            written += chunk.len() as u64;
            on_progress(written, total);
        }

        file.flush().await.map_err(io_error)?;
        tracing::debug!("Wrote {} bytes to {}", written, destination.display());
        Ok(written)
    }
}

/// Hex-encoded SHA-256 of a file
pub async fn sha256_file(path: &Path) -> Result<String, DownloadError> {
    let io_error = |source| DownloadError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = tokio::fs::File::open(path).await.map_err(io_error)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let read = file.read(&mut buffer).await.map_err(io_error)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compare a file against an expected hex digest, ignoring case
pub async fn verify_sha256(path: &Path, expected: &str) -> Result<(), DownloadError> {
    let actual = sha256_file(path).await?;
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(DownloadError::Checksum {
            expected: expected.trim().to_ascii_lowercase(),
            actual,
        })
    }
}

/// Local file name for a download URL
pub fn file_name_for(url: &str, version: &str) -> String {
    let from_url = reqwest::Url::parse(url).ok().and_then(|parsed| {
        parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string))
            .filter(|name| !name.is_empty())
    });

    let name = from_url.unwrap_or_else(|| format!("firmware-{}.bin", version));
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicU64, Ordering};

    const IMAGE: &[u8] = b"not really a squashfs image";

    async fn serve() -> String {
        let app = Router::new()
            .route("/images/fw.bin", get(|| async { IMAGE.to_vec() }))
            .route("/missing.bin", get(|| async { StatusCode::NOT_FOUND }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", address)
    }

    #[tokio::test]
    async fn test_download_writes_file_and_reports_progress() {
        let base = serve().await;
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("fw.bin");
        let seen = AtomicU64::new(0);

        let written = HttpDownloader::new()
            .fetch(&format!("{}/images/fw.bin", base), &destination, &|done, _| {
                seen.store(done, Ordering::SeqCst);
            })
            .await
            .unwrap();

        assert_eq!(written, IMAGE.len() as u64);
        assert_eq!(seen.load(Ordering::SeqCst), IMAGE.len() as u64);
        assert_eq!(tokio::fs::read(&destination).await.unwrap(), IMAGE);
    }

    #[tokio::test]
    async fn test_download_http_error_status() {
        let base = serve().await;
        let dir = tempfile::tempdir().unwrap();

        let err = HttpDownloader::new()
            .fetch(&format!("{}/missing.bin", base), &dir.path().join("x"), &|_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Status(404)));
    }

    #[tokio::test]
    async fn test_download_unreachable_host() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let dir = tempfile::tempdir().unwrap();

        let err = HttpDownloader::new()
            .fetch(&format!("http://127.0.0.1:{}/fw.bin", port), &dir.path().join("x"), &|_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Http(_)));
    }

    #[tokio::test]
    async fn test_verify_sha256() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fw.bin");
        tokio::fs::write(&path, b"abc").await.unwrap();

        let digest = "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD";
        verify_sha256(&path, digest).await.unwrap();

        let err = verify_sha256(&path, "00").await.unwrap_err();
        assert!(matches!(err, DownloadError::Checksum { .. }));
    }

    #[test]
    fn test_file_name_for() {
        assert_eq!(
            file_name_for("https://downloads.openwrt.org/x/openwrt-sysupgrade.bin?x=1", "1"),
            "openwrt-sysupgrade.bin"
        );
        assert_eq!(file_name_for("https://example.invalid/", "23.05"), "firmware-23.05.bin");
        assert_eq!(file_name_for("not a url", "a/b"), "firmware-a_b.bin");
    }
}
