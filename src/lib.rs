//! # slide2lecture
//!
//! Turn uploaded slide decks into narrated, subtitled video-lecture assets.
//!
//! ## Why this crate?
//!
//! A lecture video needs more than the slides: a spoken narration that flows
//! from one slide to the next, the audio for it, and subtitles aligned with
//! the audio. This crate polls a work-queue service for uploaded PDF decks
//! and produces all of them, reporting each asset back to the queue as soon
//! as it exists so a front end can show progress page by page.
//!
//! ## Pipeline Overview
//!
//! ```text
//! work queue ──▶ coordinator (poll, download, admit)
//!                  │
//!                  ├─ 1. Text       per-page text via pdfium        ┐ joined
//!                  ├─ 2. Images     per-page PNG, registered pages  ┘
//!                  ├─ 3. Narrate    LLM, sequential, growing history
//!                  ├─ 4. Speech     TTS → audio/<key>/lecture_<i>.mp3
//!                  ├─ 5. Transcribe STT → subtitles/<key>/lecture_<i>.mp3.srt
//!                  └─ 6. Complete   status update, only if nothing failed
//! ```
//!
//! A document left unfinished is picked up again by a later poll and resumed
//! from its [`RunCheckpoint`], so delivered items are not redone.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use slide2lecture::{Coordinator, PipelineConfig, Services};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .queue_base_url("http://localhost:9000")
//!         .output_root("./public")
//!         .build()?;
//!     let services = Services::from_config(&config)?;
//!     let coordinator = Coordinator::new(config, services);
//!
//!     let shutdown = CancellationToken::new();
//!     coordinator.run(shutdown).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `slide2lecture` daemon binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when embedding the pipeline in another service:
//! ```toml
//! slide2lecture = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod layout;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod providers;
pub mod queue;
pub mod run;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use checkpoint::RunCheckpoint;
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use coordinator::{Coordinator, Rejection, RunGuard, RunRegistry, TickOutcome};
pub use error::{LectureError, PageError};
pub use layout::{document_key, RunLayout};
pub use output::{
    AudioAsset, NarrationUnit, RunReport, RunStats, Slide, SlideImage, Stage, StageReport,
    SubtitleAsset,
};
pub use progress::{NoopProgressCallback, ProgressCallback, RunProgressCallback};
pub use queue::{HttpWorkQueue, ItemCreate, ItemField, ItemUpdate, PendingDocument, WorkQueue};
pub use run::{process_document, RunContext, Services};
