//! Per-document record of what the work queue already holds.
//!
//! A run that ends with item failures leaves its document in "processing",
//! so a later tick runs it again. The checkpoint at
//! `work/<key>/checkpoint.json` lets that run pick up where the last one
//! stopped: registered pages are not registered twice, a finished narration
//! is reused, and audio or subtitles already reported are not regenerated.
//!
//! The checkpoint is tied to the document bytes by their blake3 digest. When
//! the bytes change, the old checkpoint is discarded.

use crate::error::LectureError;
use crate::output::{AudioAsset, NarrationUnit, Slide, SlideImage, StageReport, SubtitleAsset};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, warn};

/// Work already delivered for one document, keyed by page number.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCheckpoint {
    /// blake3 hex digest of the document bytes.
    pub content_hash: String,
    /// Pages whose placeholder record exists in the work queue.
    pub registered_pages: BTreeSet<usize>,
    /// Narration from a run that finished the narration stage.
    pub narration: Option<Vec<NarrationUnit>>,
    /// Audio reported as `audio_url`.
    pub audio: BTreeMap<usize, AudioAsset>,
    /// Subtitles reported as `transcription`.
    pub subtitles: BTreeMap<usize, SubtitleAsset>,
}

impl RunCheckpoint {
    /// Empty checkpoint for a document with these bytes.
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            content_hash: content_hash(bytes),
            ..Default::default()
        }
    }

    /// Load the checkpoint at `path` if it belongs to `bytes`.
    ///
    /// A missing, unreadable or stale file yields an empty checkpoint. Audio
    /// and subtitle entries whose files have disappeared are dropped, so the
    /// run regenerates them.
    pub async fn load(path: &Path, bytes: &[u8]) -> Self {
        let fresh = Self::new(bytes);

        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return fresh,
            Err(e) => {
                warn!("Ignoring unreadable checkpoint {}: {}", path.display(), e);
                return fresh;
            }
        };

        let mut checkpoint: Self = match serde_json::from_slice(&raw) {
            Ok(c) => c,
            Err(e) => {
                warn!("Ignoring corrupt checkpoint {}: {}", path.display(), e);
                return fresh;
            }
        };

        if checkpoint.content_hash != fresh.content_hash {
            debug!("Document bytes changed; discarding {}", path.display());
            return fresh;
        }

        checkpoint.prune_missing().await;
        checkpoint
    }

    async fn prune_missing(&mut self) {
        let mut missing = Vec::new();
        for (page, asset) in &self.audio {
            if !file_exists(&asset.file_path).await {
                missing.push(*page);
            }
        }
        for page in missing {
            self.audio.remove(&page);
            self.subtitles.remove(&page);
        }

        let mut missing = Vec::new();
        for (page, asset) in &self.subtitles {
            if !file_exists(&asset.file_path).await {
                missing.push(*page);
            }
        }
        for page in missing {
            self.subtitles.remove(&page);
        }
    }

    /// Write the checkpoint through a temp file and rename.
    pub async fn save(&self, path: &Path) -> Result<(), LectureError> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| LectureError::Internal(format!("checkpoint serialisation: {e}")))?;

        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json)
            .await
            .map_err(|e| LectureError::OutputWriteFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
        tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(|e| LectureError::OutputWriteFailed {
                path: path.to_path_buf(),
                source: e,
            })
    }

    /// Delete the checkpoint at `path`; a missing file is not an error.
    pub async fn remove(path: &Path) -> Result<(), LectureError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LectureError::OutputWriteFailed {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    /// `true` when nothing has been delivered yet.
    pub fn is_empty(&self) -> bool {
        self.registered_pages.is_empty()
            && self.narration.is_none()
            && self.audio.is_empty()
            && self.subtitles.is_empty()
    }

    pub fn record_images(&mut self, report: &StageReport<SlideImage>) {
        self.registered_pages
            .extend(report.items.iter().map(|image| image.page_number));
    }

    /// Earlier narration, if it covers exactly these slides.
    pub fn narration_for(&self, slides: &[Slide]) -> Option<&[NarrationUnit]> {
        let units = self.narration.as_deref()?;
        let same_pages = units.len() == slides.len()
            && units
                .iter()
                .zip(slides)
                .all(|(unit, slide)| unit.page_number == slide.page_number);
        same_pages.then_some(units)
    }

    /// Store new narration. Audio and subtitles made from older narration
    /// no longer match it and are forgotten.
    pub fn record_narration(&mut self, units: &[NarrationUnit]) {
        self.narration = Some(units.to_vec());
        self.audio.clear();
        self.subtitles.clear();
    }

    /// Store reported audio. A page whose audio changed loses its subtitles.
    pub fn record_audio(&mut self, report: &StageReport<AudioAsset>) {
        for asset in &report.items {
            if self.audio.get(&asset.page_number) != Some(asset) {
                self.subtitles.remove(&asset.page_number);
                self.audio.insert(asset.page_number, asset.clone());
            }
        }
    }

    pub fn record_subtitles(&mut self, report: &StageReport<SubtitleAsset>) {
        for subtitle in &report.items {
            self.subtitles.insert(subtitle.page_number, subtitle.clone());
        }
    }
}

/// blake3 hex digest of a document's bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

async fn file_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
