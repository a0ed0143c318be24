//! Document download and validation.
//!
//! The coordinator fetches the bytes of each pending document through a
//! [`DocumentSource`], checks the PDF magic bytes (`%PDF`) so a bad upload
//! fails with a clear error instead of a pdfium crash, and keeps a local copy
//! under the run's work directory.

use crate::error::LectureError;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Where document bytes come from.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, LectureError>;
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Downloads documents over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpDocumentSource {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpDocumentSource {
    pub fn new(timeout_secs: u64) -> Result<Self, LectureError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LectureError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            timeout_secs,
        })
    }
}

#[async_trait]
impl DocumentSource for HttpDocumentSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, LectureError> {
        if !is_url(url) {
            return Err(LectureError::DownloadFailed {
                url: url.to_string(),
                reason: "not an HTTP/HTTPS URL".to_string(),
            });
        }

        info!("Downloading document from: {}", url);

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                LectureError::DownloadTimeout {
                    url: url.to_string(),
                    secs: self.timeout_secs,
                }
            } else {
                LectureError::DownloadFailed {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        if !response.status().is_success() {
            return Err(LectureError::DownloadFailed {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| LectureError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        debug!("Downloaded {} bytes from {}", bytes.len(), url);
        Ok(bytes.to_vec())
    }
}

/// Verify the payload is non-empty and starts with `%PDF`.
pub fn validate_pdf_bytes(url: &str, bytes: &[u8]) -> Result<(), LectureError> {
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        return Err(LectureError::NotAPdf {
            url: url.to_string(),
            magic: bytes.iter().take(4).copied().collect(),
        });
    }
    Ok(())
}

/// Remove any leftover copy at `path`, then write `bytes` there.
pub async fn replace_document_file(path: &Path, bytes: &[u8]) -> Result<(), LectureError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed leftover document {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(LectureError::OutputWriteFailed {
                path: path.to_path_buf(),
                source: e,
            })
        }
    }

    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| LectureError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
}
