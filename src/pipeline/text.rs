//! Text extractor: document bytes → ordered [`Slide`]s.
//!
//! One slide per page, in document order, with `page_number` = 1-based page
//! index. Extraction is all-or-nothing: if the document cannot be parsed or
//! any page's text layer cannot be read, no slides are returned.

use super::pdf::{bind_pdfium, load_document};
use crate::error::LectureError;
use crate::output::Slide;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, url: &str, bytes: Arc<Vec<u8>>) -> Result<Vec<Slide>, LectureError>;
}

/// [`TextExtractor`] over pdfium's text layer.
#[derive(Debug, Clone, Default)]
pub struct PdfiumTextExtractor {
    lib_dir: Option<PathBuf>,
}

impl PdfiumTextExtractor {
    pub fn new(lib_dir: Option<PathBuf>) -> Self {
        Self { lib_dir }
    }
}

#[async_trait]
impl TextExtractor for PdfiumTextExtractor {
    async fn extract(&self, url: &str, bytes: Arc<Vec<u8>>) -> Result<Vec<Slide>, LectureError> {
        let lib_dir = self.lib_dir.clone();
        let url = url.to_string();

        tokio::task::spawn_blocking(move || {
            extract_blocking(lib_dir.as_deref(), &url, bytes.as_ref().clone())
        })
        .await
        .map_err(|e| LectureError::Internal(format!("Text extraction task panicked: {}", e)))?
    }
}

fn extract_blocking(
    lib_dir: Option<&std::path::Path>,
    url: &str,
    bytes: Vec<u8>,
) -> Result<Vec<Slide>, LectureError> {
    let pdfium = bind_pdfium(lib_dir)?;
    let document = load_document(&pdfium, url, bytes)?;

    let pages = document.pages();
    let mut slides = Vec::with_capacity(pages.len() as usize);

    for (idx, page) in pages.iter().enumerate() {
        let page_number = idx + 1;
        let text = page
            .text()
            .map_err(|e| LectureError::TextExtractionFailed {
                page: page_number,
                detail: format!("{:?}", e),
            })?
            .all();
        debug!("Extracted {} chars from slide {}", text.len(), page_number);
        slides.push(Slide { page_number, text });
    }

    info!("Extracted text from {} slides", slides.len());
    Ok(slides)
}

/// Check that slides are numbered `1..=N` in order.
pub fn is_contiguous(slides: &[Slide]) -> bool {
    slides
        .iter()
        .enumerate()
        .all(|(i, s)| s.page_number == i + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slide(n: usize) -> Slide {
        Slide {
            page_number: n,
            text: format!("page {n}"),
        }
    }

    #[test]
    fn contiguous_numbering() {
        assert!(is_contiguous(&[]));
        assert!(is_contiguous(&[slide(1), slide(2), slide(3)]));
        assert!(!is_contiguous(&[slide(1), slide(3)]));
        assert!(!is_contiguous(&[slide(2), slide(1)]));
    }
}
