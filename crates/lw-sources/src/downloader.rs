//! HTTP download capability.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::header::{CACHE_CONTROL, PRAGMA};

/// Default HTTP request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Retries after the first attempt on connection-level errors.
const MAX_RETRIES: u32 = 2;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("Request to {url} failed: {source}")]
    Request { url: String, source: reqwest::Error },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("{url} returned an empty body")]
    EmptyBody { url: String },
    #[error("Failed to store download: {0}")]
    Io(#[from] io::Error),
}

/// Fetches a URL into a local temporary file.
///
/// The caller owns the returned file and deletes it after reading.
pub trait Downloader: Send + Sync + 'static {
    fn download(&self, url: &str) -> impl Future<Output = Result<PathBuf, DownloadError>> + Send;
}

/// `reqwest` downloader: plain GET that bypasses caches and sends no
/// cookies.
pub struct HttpDownloader {
    client: reqwest::Client,
    temp_dir: PathBuf,
    counter: AtomicU64,
}

impl HttpDownloader {
    pub fn new(temp_dir: impl Into<PathBuf>) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(DownloadError::Client)?;
        Ok(Self {
            client,
            temp_dir: temp_dir.into(),
            counter: AtomicU64::new(0),
        })
    }

    async fn fetch_body(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        let mut attempt = 0;
        let response = loop {
            let result = self
                .client
                .get(url)
                .header(CACHE_CONTROL, "no-cache")
                .header(PRAGMA, "no-cache")
                .send()
                .await;
            match result {
                Ok(response) => break response,
                Err(err) if attempt < MAX_RETRIES && (err.is_connect() || err.is_request()) => {
                    attempt += 1;
                    log::debug!("Retrying {url} ({attempt}/{MAX_RETRIES}): {err}");
                }
                Err(source) => {
                    return Err(DownloadError::Request {
                        url: url.to_string(),
                        source,
                    })
                }
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|source| DownloadError::Request {
            url: url.to_string(),
            source,
        })?;
        if body.is_empty() {
            return Err(DownloadError::EmptyBody {
                url: url.to_string(),
            });
        }
        Ok(body.to_vec())
    }
}

impl Downloader for HttpDownloader {
    async fn download(&self, url: &str) -> Result<PathBuf, DownloadError> {
        let body = self.fetch_body(url).await?;

        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let path = self
            .temp_dir
            .join(format!("lw-download-{}-{}.tmp", std::process::id(), n));
        tokio::fs::create_dir_all(&self.temp_dir).await?;
        tokio::fs::write(&path, &body).await?;

        log::debug!("Downloaded {} ({} bytes) to {}", url, body.len(), path.display());
        Ok(path)
    }
}
