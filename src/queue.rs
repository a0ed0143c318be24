//! Work-queue service client.
//!
//! The work queue tracks which documents are pending and holds one record
//! per page whose fields (`image_url`, `audio_url`, `transcription`) are
//! filled in as the pipeline produces assets. The pipeline only consumes it:
//!
//! | Operation | HTTP |
//! |-----------|------|
//! | fetch pending document | `GET  {base}/pdf-urls` → `{"pdf_urls": [..]}` |
//! | create page record     | `POST {base}/pdf-item/create` |
//! | update one field       | `PUT  {base}/pdf-urls/update` |
//! | mark completed         | `PUT  {base}/pdf-urls/status` |

use crate::error::LectureError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// A document waiting to be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDocument {
    pub url: String,
}

/// Placeholder record created once per page by the image extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCreate {
    pub page: usize,
    #[serde(rename = "pdf_url")]
    pub document_url: String,
    pub image_url: String,
}

/// Page-record fields filled in by later stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemField {
    AudioUrl,
    Transcription,
}

impl ItemField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemField::AudioUrl => "audio_url",
            ItemField::Transcription => "transcription",
        }
    }
}

/// Update of one field of an existing page record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemUpdate {
    #[serde(rename = "url")]
    pub document_url: String,
    pub page: usize,
    pub field: ItemField,
    pub value: String,
}

/// The operations the pipeline needs from the work-queue service.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Return at most one pending document whose URL is not in `exclude`.
    async fn fetch_pending(&self, exclude: &[String])
        -> Result<Option<PendingDocument>, LectureError>;

    /// Create the placeholder record for one page.
    async fn create_item(&self, item: &ItemCreate) -> Result<(), LectureError>;

    /// Update one field of an existing page record.
    async fn update_item(&self, update: &ItemUpdate) -> Result<(), LectureError>;

    /// Mark a document as completed.
    async fn mark_completed(&self, document_url: &str) -> Result<(), LectureError>;
}

#[derive(Debug, Deserialize)]
struct PendingResponse {
    #[serde(default)]
    pdf_urls: Vec<String>,
}

/// reqwest-backed [`WorkQueue`].
#[derive(Debug, Clone)]
pub struct HttpWorkQueue {
    client: reqwest::Client,
    base_url: String,
}

impl HttpWorkQueue {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self, LectureError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LectureError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

fn queue_error(operation: &str, detail: impl ToString) -> LectureError {
    LectureError::QueueRequestFailed {
        operation: operation.to_string(),
        detail: detail.to_string(),
    }
}

async fn check_status(
    operation: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, LectureError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(queue_error(operation, format!("HTTP {status}: {body}")))
    }
}

/// Pick the first URL that is not excluded.
fn first_pending(urls: Vec<String>, exclude: &[String]) -> Option<PendingDocument> {
    urls.into_iter()
        .find(|u| !u.is_empty() && !exclude.contains(u))
        .map(|url| PendingDocument { url })
}

#[async_trait]
impl WorkQueue for HttpWorkQueue {
    async fn fetch_pending(
        &self,
        exclude: &[String],
    ) -> Result<Option<PendingDocument>, LectureError> {
        let response = self
            .client
            .get(self.endpoint("pdf-urls"))
            .send()
            .await
            .map_err(|e| queue_error("fetch-pending", e))?;
        let response = check_status("fetch-pending", response).await?;
        let body: PendingResponse = response
            .json()
            .await
            .map_err(|e| queue_error("fetch-pending", e))?;
        debug!(pending = body.pdf_urls.len(), "Polled work queue");
        Ok(first_pending(body.pdf_urls, exclude))
    }

    async fn create_item(&self, item: &ItemCreate) -> Result<(), LectureError> {
        let response = self
            .client
            .post(self.endpoint("pdf-item/create"))
            .json(item)
            .send()
            .await
            .map_err(|e| queue_error("item-create", e))?;
        check_status("item-create", response).await?;
        Ok(())
    }

    async fn update_item(&self, update: &ItemUpdate) -> Result<(), LectureError> {
        let response = self
            .client
            .put(self.endpoint("pdf-urls/update"))
            .json(update)
            .send()
            .await
            .map_err(|e| queue_error("item-update", e))?;
        check_status("item-update", response).await?;
        Ok(())
    }

    async fn mark_completed(&self, document_url: &str) -> Result<(), LectureError> {
        let response = self
            .client
            .put(self.endpoint("pdf-urls/status"))
            .json(&serde_json::json!({ "url": document_url, "status": "completed" }))
            .send()
            .await
            .map_err(|e| queue_error("status-update", e))?;
        check_status("status-update", response).await?;
        Ok(())
    }
}
