//! Document keys and per-run storage layout.
//!
//! Every run writes under a namespace derived from its document URL:
//!
//! ```text
//! {output_root}/images/<key>/page_<n>.png
//! {output_root}/audio/<key>/lecture_<index>.mp3
//! {output_root}/subtitles/<key>/lecture_<index>.mp3.srt
//! {output_root}/work/<key>/document.pdf
//! {output_root}/work/<key>/checkpoint.json
//! ```
//!
//! The key is a pure function of the URL, so re-processing a document
//! overwrites its previous assets instead of accumulating new ones.

use crate::error::LectureError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Hex digits of the blake3 digest appended to rewritten keys.
const HASH_SUFFIX_LEN: usize = 16;

/// Derive a filesystem-safe namespace key from a document URL.
///
/// Characters outside `[A-Za-z0-9._-]` become `_` and leading dots are
/// dropped. A URL that survives sanitising unchanged and fits in `max_len`
/// is its own key. Any other key is suffixed with `_` plus a hash of the
/// *full* URL, truncating the readable prefix so the whole key fits in
/// `max_len`. Sanitising is lossy (`a b`, `a_b` and `a?b` read the same), so
/// the suffix is what keeps distinct URLs apart.
pub fn document_key(url: &str, max_len: usize) -> String {
    let sanitised: String = url
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    // Leading dots would produce hidden or relative path components.
    let sanitised = sanitised.trim_start_matches('.').to_string();
    let sanitised = if sanitised.is_empty() {
        "document".to_string()
    } else {
        sanitised
    };

    if sanitised == url && sanitised.len() <= max_len {
        return sanitised;
    }

    let digest = blake3::hash(url.as_bytes()).to_hex();
    let keep = max_len
        .saturating_sub(HASH_SUFFIX_LEN + 1)
        .min(sanitised.len());
    format!("{}_{}", &sanitised[..keep], &digest.as_str()[..HASH_SUFFIX_LEN])
}

/// Storage locations for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    root: PathBuf,
    key: String,
}

impl RunLayout {
    pub fn new(root: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images").join(&self.key)
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.root.join("audio").join(&self.key)
    }

    pub fn subtitles_dir(&self) -> PathBuf {
        self.root.join("subtitles").join(&self.key)
    }

    pub fn work_dir(&self) -> PathBuf {
        self.root.join("work").join(&self.key)
    }

    /// Local copy of the downloaded document.
    pub fn document_path(&self) -> PathBuf {
        self.work_dir().join("document.pdf")
    }

    /// Record of what earlier runs delivered for this document.
    pub fn checkpoint_path(&self) -> PathBuf {
        self.work_dir().join("checkpoint.json")
    }

    /// `images/<key>/page_<n>.png` (1-based page).
    pub fn image_path(&self, page_number: usize) -> PathBuf {
        self.images_dir().join(format!("page_{}.png", page_number))
    }

    /// `audio/<key>/lecture_<index>.mp3` (0-based position).
    pub fn audio_path(&self, index: usize) -> PathBuf {
        self.audio_dir().join(format!("lecture_{}.mp3", index))
    }

    /// `subtitles/<key>/lecture_<index>.mp3.srt`.
    pub fn subtitle_path(&self, index: usize) -> PathBuf {
        self.subtitles_dir()
            .join(format!("lecture_{}.mp3.srt", index))
    }

    /// Create every output directory for this run.
    pub async fn prepare(&self) -> Result<(), LectureError> {
        for dir in [
            self.images_dir(),
            self.audio_dir(),
            self.subtitles_dir(),
            self.work_dir(),
        ] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| LectureError::OutputWriteFailed {
                    path: dir.clone(),
                    source: e,
                })?;
        }
        debug!(key = %self.key, root = %self.root.display(), "Prepared run directories");
        Ok(())
    }

    /// Public URL for an asset, `{base}/{path relative to the output root}`.
    pub fn public_url(&self, base_url: &str, asset: &Path) -> String {
        let relative = asset.strip_prefix(&self.root).unwrap_or(asset);
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{}", base_url.trim_end_matches('/'), relative)
    }
}
