//! Remote forbidden-list refresh.
//!
//! Reads a single URL from the remote-url file, downloads it with cache
//! bypass headers and atomically replaces the forbidden list with the
//! response body. Any failure leaves the existing list untouched.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CACHE_CONTROL, PRAGMA};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::RefreshConfig;

/// Errors that abort a refresh.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    /// The remote-url file exists but could not be read.
    #[error("failed to read {path}: {source}")]
    ReadUrl {
        /// Remote-url file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The request could not be completed.
    #[error("failed to fetch {url}: {source}")]
    Fetch {
        /// Requested URL.
        url: String,
        /// Underlying HTTP client error.
        source: reqwest::Error,
    },
    /// The server answered with a non-success status.
    #[error("{url} returned status {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },
    /// The body exceeded the configured size limit.
    #[error("{url} returned {size} bytes, limit is {limit}")]
    TooLarge {
        /// Requested URL.
        url: String,
        /// Body size observed.
        size: usize,
        /// Configured maximum.
        limit: usize,
    },
    /// Writing or renaming the new list failed.
    #[error("failed to replace {path}: {source}")]
    Write {
        /// Forbidden list file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
}

/// What a refresh did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// No remote-url file; nothing configured.
    NotConfigured,
    /// The remote-url file is blank.
    EmptyUrl,
    /// The remote-url file does not hold an absolute http(s) URL.
    InvalidUrl(String),
    /// The forbidden list was replaced.
    Updated {
        /// Source URL.
        url: String,
        /// Bytes written.
        bytes: usize,
    },
}

/// Periodic remote refresher for the forbidden list.
pub struct ConfigRefresher {
    url_path: PathBuf,
    target: PathBuf,
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl ConfigRefresher {
    /// Refresher reading its URL from `url_path` and replacing `target`.
    ///
    /// # Errors
    ///
    /// Returns [`RefreshError::Client`] if the HTTP client cannot be built.
    pub fn new(
        url_path: PathBuf,
        target: PathBuf,
        config: &RefreshConfig,
    ) -> Result<Self, RefreshError> {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(RefreshError::Client)?;

        Ok(Self {
            url_path,
            target,
            client,
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Run one refresh.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL file is unreadable, the download fails, or
    /// the new list cannot be written. The old list is intact in every case.
    pub async fn refresh(&self) -> Result<RefreshOutcome, RefreshError> {
        let raw = match tokio::fs::read(&self.url_path).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(RefreshOutcome::NotConfigured),
            Err(source) => {
                return Err(RefreshError::ReadUrl {
                    path: self.url_path.clone(),
                    source,
                })
            }
        };

        let raw = raw.trim().trim_start_matches('\u{feff}');
        if raw.is_empty() {
            return Ok(RefreshOutcome::EmptyUrl);
        }
        let Some(url) = parse_remote_url(raw) else {
            return Ok(RefreshOutcome::InvalidUrl(raw.to_owned()));
        };

        let body = self.fetch(&url).await?;
        write_atomic(&self.target, &body)
            .await
            .map_err(|source| RefreshError::Write {
                path: self.target.clone(),
                source,
            })?;

        Ok(RefreshOutcome::Updated {
            url: url.to_string(),
            bytes: body.len(),
        })
    }

    /// Run one refresh and log the result at the matching level.
    pub async fn refresh_and_log(&self) {
        match self.refresh().await {
            Ok(RefreshOutcome::NotConfigured) => {}
            Ok(RefreshOutcome::EmptyUrl) => {
                debug!(path = %self.url_path.display(), "remote config url is empty");
            }
            Ok(RefreshOutcome::InvalidUrl(url)) => {
                warn!(url = %url, path = %self.url_path.display(), "invalid remote config url");
            }
            Ok(RefreshOutcome::Updated { url, bytes }) => {
                info!(url = %url, bytes, "downloaded forbidden process list");
            }
            Err(e) => {
                warn!(error = %e, "failed to refresh forbidden process list");
            }
        }
    }

    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, RefreshError> {
        let fetch_error = |source| RefreshError::Fetch {
            url: url.to_string(),
            source,
        };

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(fetch_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RefreshError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let too_large = |size| RefreshError::TooLarge {
            url: url.to_string(),
            size,
            limit: self.max_body_bytes,
        };
        if let Some(declared) = response.content_length() {
            let declared = usize::try_from(declared).unwrap_or(usize::MAX);
            if declared > self.max_body_bytes {
                return Err(too_large(declared));
            }
        }

        let body = response.bytes().await.map_err(fetch_error)?;
        if body.len() > self.max_body_bytes {
            return Err(too_large(body.len()));
        }
        Ok(body.to_vec())
    }
}

/// Accept only absolute `http`/`https` URLs with a host.
pub fn parse_remote_url(raw: &str) -> Option<Url> {
    let url = Url::parse(raw).ok()?;
    let fetchable = matches!(url.scheme(), "http" | "https") && url.host().is_some();
    fetchable.then_some(url)
}

/// Replace `path` with `contents` via a synced sibling temp file and a rename.
///
/// # Errors
///
/// Returns the I/O error from any step; the temp file is removed on failure.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let result = async {
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp_path, path).await
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp_path).await;
    }
    result
}
