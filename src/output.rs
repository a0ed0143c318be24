//! Records produced by each pipeline stage, and the per-run report.
//!
//! Every record from narration onward carries its `page_number` explicitly.
//! The positional `index` on audio and subtitle assets only names files on
//! disk; work-queue updates are always keyed by `page_number`.

use crate::error::PageError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One page's extracted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slide {
    /// 1-based page number.
    pub page_number: usize,
    pub text: String,
}

/// One page's rasterised image, persisted and registered with the work queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlideImage {
    pub page_number: usize,
    pub asset_path: PathBuf,
    /// Public URL reported to the work queue.
    pub asset_url: String,
}

/// Generated lecture narration for one slide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrationUnit {
    pub page_number: usize,
    pub narration_text: String,
}

/// Synthesised speech for one narration unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioAsset {
    /// Position in the narration sequence; used for the file name.
    pub index: usize,
    pub page_number: usize,
    pub file_path: PathBuf,
    pub asset_url: String,
}

/// Subtitle transcript for one audio asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleAsset {
    pub index: usize,
    pub page_number: usize,
    pub file_path: PathBuf,
    pub asset_url: String,
    pub srt_content: String,
}

/// Pipeline stages, in data-flow order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    TextExtraction,
    Rasterization,
    Narration,
    Synthesis,
    Transcription,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::TextExtraction => "text",
            Stage::Rasterization => "images",
            Stage::Narration => "narration",
            Stage::Synthesis => "speech",
            Stage::Transcription => "transcription",
        }
    }
}

/// Outcome of a batch stage: successful items in input order plus per-item failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport<T> {
    pub stage: Stage,
    pub items: Vec<T>,
    pub errors: Vec<PageError>,
    pub duration_ms: u64,
}

impl<T> StageReport<T> {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            items: Vec::new(),
            errors: Vec::new(),
            duration_ms: 0,
        }
    }

    /// `true` when no item failed.
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of items attempted (successes + failures).
    pub fn attempted(&self) -> usize {
        self.items.len() + self.errors.len()
    }
}

/// Aggregate statistics for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub total_pages: usize,
    pub failed_items: usize,
    pub narration_input_tokens: u64,
    pub narration_output_tokens: u64,
    pub extract_duration_ms: u64,
    pub narration_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything one run produced for one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub document_url: String,
    pub document_key: String,
    pub slides: Vec<Slide>,
    pub images: StageReport<SlideImage>,
    pub narration: Vec<NarrationUnit>,
    pub audio: StageReport<AudioAsset>,
    pub subtitles: StageReport<SubtitleAsset>,
    pub stats: RunStats,
    /// `true` once the work queue accepted the "completed" status update.
    pub marked_completed: bool,
}

impl RunReport {
    /// `true` when every batch stage finished without item failures.
    pub fn is_complete(&self) -> bool {
        self.images.is_complete() && self.audio.is_complete() && self.subtitles.is_complete()
    }

    /// All per-item failures across stages, in stage order.
    pub fn failures(&self) -> impl Iterator<Item = &PageError> {
        self.images
            .errors
            .iter()
            .chain(self.audio.errors.iter())
            .chain(self.subtitles.errors.iter())
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "{} pages: {} images, {} narrations, {} audio, {} subtitles, {} failed items",
            self.stats.total_pages,
            self.images.items.len(),
            self.narration.len(),
            self.audio.items.len(),
            self.subtitles.items.len(),
            self.stats.failed_items,
        )
    }
}
