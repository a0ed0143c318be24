//! Progress-callback trait for per-item pipeline events.
//!
//! Inject an [`Arc<dyn RunProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as a run moves each page through the stages. Callers can forward
//! them to a status dashboard, a channel, or a test counter without the
//! library knowing how the host application communicates.
//!
//! # Example
//!
//! ```rust
//! use slide2lecture::{PipelineConfig, RunProgressCallback, Stage};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct AudioCounter(AtomicUsize);
//!
//! impl RunProgressCallback for AudioCounter {
//!     fn on_item_complete(&self, _url: &str, stage: Stage, _page: usize) {
//!         if stage == Stage::Synthesis {
//!             self.0.fetch_add(1, Ordering::SeqCst);
//!         }
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(AudioCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::Stage;
use std::sync::Arc;

/// Called by a pipeline run as it processes each item.
///
/// Implementations must be `Send + Sync`: runs for different documents may
/// execute concurrently on different Tokio workers. All methods have no-op
/// defaults so callers only override what they care about.
pub trait RunProgressCallback: Send + Sync {
    /// Called once both extractors have finished and the page count is known.
    fn on_run_start(&self, document_url: &str, total_pages: usize) {
        let _ = (document_url, total_pages);
    }

    /// Called when a stage begins.
    fn on_stage_start(&self, document_url: &str, stage: Stage, items: usize) {
        let _ = (document_url, stage, items);
    }

    /// Called when one item of a stage succeeds.
    fn on_item_complete(&self, document_url: &str, stage: Stage, page_number: usize) {
        let _ = (document_url, stage, page_number);
    }

    /// Called when one item of a stage fails after retries.
    fn on_item_error(&self, document_url: &str, stage: Stage, page_number: usize, error: &str) {
        let _ = (document_url, stage, page_number, error);
    }

    /// Called once after the terminal stage.
    ///
    /// * `failed_items` — per-item failures across all stages
    fn on_run_complete(&self, document_url: &str, total_pages: usize, failed_items: usize) {
        let _ = (document_url, total_pages, failed_items);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl RunProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn RunProgressCallback>;
