//! Error types for the slide2lecture library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`LectureError`] — **Fatal**: the current poll tick or pipeline run
//!   cannot proceed (download failed, the bytes are not a PDF, narration
//!   gave up, the run timed out). Returned as `Err(LectureError)` from
//!   [`crate::run::process_document`] and [`crate::coordinator::Coordinator::tick`].
//!
//! * [`PageError`] — **Non-fatal**: a single item of a batch stage failed
//!   (one page would not render, one audio file would not transcribe) while
//!   the other items went through. Stored inside
//!   [`crate::output::StageReport`] so the run can report partial success.

use std::path::PathBuf;
use thiserror::Error;

use crate::output::Stage;

/// All fatal errors returned by the slide2lecture library.
#[derive(Debug, Error)]
pub enum LectureError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Document download failed (connection error or non-2xx status).
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The downloaded payload does not start with the PDF magic bytes.
    #[error("Document '{url}' is not a PDF\nFirst bytes: {magic:?}")]
    NotAPdf { url: String, magic: Vec<u8> },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// pdfium could not open the document.
    #[error("PDF '{url}' is corrupt: {detail}")]
    CorruptPdf { url: String, detail: String },

    /// Text could not be read from a page; the whole extraction is dropped.
    #[error("Text extraction failed for page {page}: {detail}")]
    TextExtractionFailed { page: usize, detail: String },

    /// The text and image extractors disagree on the number of pages.
    #[error("Extractors disagree on page count: {text_pages} text pages, {image_pages} image pages")]
    PageCountMismatch {
        text_pages: usize,
        image_pages: usize,
    },

    // ── Provider errors ───────────────────────────────────────────────────
    /// A provider is not initialised (missing API key etc.).
    #[error("Provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Narration generation gave up on a slide; later slides are not attempted.
    #[error("Narration failed for slide {page} after {retries} retries: {detail}")]
    NarrationFailed {
        page: usize,
        retries: u32,
        detail: String,
    },

    // ── Work-queue errors ─────────────────────────────────────────────────
    /// A call against the work-queue service failed.
    #[error("Work-queue {operation} failed: {detail}")]
    QueueRequestFailed { operation: String, detail: String },

    // ── Run lifecycle ─────────────────────────────────────────────────────
    /// Another run for the same document is still in flight.
    #[error("A run for '{url}' is already active")]
    RunAlreadyActive { url: String },

    /// The run exceeded `run_timeout_secs` and was cancelled.
    #[error("Run for '{url}' timed out after {secs}s")]
    RunTimeout { url: String, secs: u64 },

    /// The run was cancelled (shutdown or supersession).
    #[error("Run for '{url}' was cancelled")]
    Cancelled { url: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create a directory or write a generated asset.
    #[error("Failed to write '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install libpdfium for your platform, or set PDFIUM_LIB_PATH to the\n\
directory that contains it.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LectureError {
    /// Whether the next poll tick can be expected to succeed where this one failed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LectureError::DownloadFailed { .. }
                | LectureError::DownloadTimeout { .. }
                | LectureError::QueueRequestFailed { .. }
                | LectureError::RunTimeout { .. }
                | LectureError::NarrationFailed { .. }
        )
    }
}

/// A non-fatal error for a single item of a batch stage.
///
/// The stage keeps going with the remaining items; the error is recorded in
/// the stage's [`crate::output::StageReport`].
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Page rasterisation or PNG encoding failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// The placeholder record for a page could not be created.
    #[error("Page {page}: registration with the work queue failed: {detail}")]
    RegistrationFailed { page: usize, detail: String },

    /// The speech provider failed after retries.
    #[error("Page {page}: speech synthesis failed after {retries} retries: {detail}")]
    SynthesisFailed {
        page: usize,
        retries: u32,
        detail: String,
    },

    /// The transcription provider failed after retries.
    #[error("Page {page}: transcription failed after {retries} retries: {detail}")]
    TranscriptionFailed {
        page: usize,
        retries: u32,
        detail: String,
    },

    /// The asset was written but the work-queue field update failed.
    #[error("Page {page}: updating '{field}' failed: {detail}")]
    UpdateFailed {
        page: usize,
        field: String,
        detail: String,
    },

    /// Writing the asset to local storage failed.
    #[error("Page {page}: writing '{path}' failed: {detail}")]
    WriteFailed {
        page: usize,
        path: String,
        detail: String,
    },

    /// The run was cancelled before this item finished.
    #[error("Page {page}: cancelled during {stage:?}")]
    Cancelled { page: usize, stage: Stage },
}

impl PageError {
    /// 1-based page the error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::RenderFailed { page, .. }
            | PageError::RegistrationFailed { page, .. }
            | PageError::SynthesisFailed { page, .. }
            | PageError::TranscriptionFailed { page, .. }
            | PageError::UpdateFailed { page, .. }
            | PageError::WriteFailed { page, .. }
            | PageError::Cancelled { page, .. } => *page,
        }
    }
}
