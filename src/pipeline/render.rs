//! Image extractor: rasterise every page, persist it, register it.
//!
//! ## Why spawn_blocking?
//!
//! pdfium uses thread-local state and is CPU-bound while rendering.
//! `tokio::task::spawn_blocking` moves the work onto the blocking pool so the
//! Tokio workers keep serving the other extractor and other runs.
//!
//! ## Why register here?
//!
//! The work queue's per-page record is created by this stage
//! (`{page, pdf_url, image_url}` with empty audio/transcript fields). The
//! speech and transcription stages only *update* records, so a page that
//! failed to register here will also fail its later updates; those failures
//! surface in the run report rather than silently.

use super::encode::encode_png;
use super::pdf::{bind_pdfium, load_document};
use crate::config::PipelineConfig;
use crate::error::{LectureError, PageError};
use crate::output::{SlideImage, Stage, StageReport};
use crate::queue::{ItemCreate, WorkQueue};
use crate::run::RunContext;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// One rasterised page, or why it could not be rasterised.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub page_number: usize,
    /// PNG-encoded image.
    pub png: Result<Vec<u8>, PageError>,
}

#[async_trait]
pub trait PageRasterizer: Send + Sync {
    /// Rasterise every page in order. Only a document-level failure is an `Err`.
    async fn rasterize(
        &self,
        url: &str,
        bytes: Arc<Vec<u8>>,
    ) -> Result<Vec<RenderedPage>, LectureError>;
}

/// [`PageRasterizer`] over pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    lib_dir: Option<PathBuf>,
    dpi: u32,
    max_pixels: u32,
}

impl PdfiumRasterizer {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            lib_dir: config.pdfium_lib_path.clone(),
            dpi: config.dpi,
            max_pixels: config.max_rendered_pixels,
        }
    }
}

#[async_trait]
impl PageRasterizer for PdfiumRasterizer {
    async fn rasterize(
        &self,
        url: &str,
        bytes: Arc<Vec<u8>>,
    ) -> Result<Vec<RenderedPage>, LectureError> {
        let this = self.clone();
        let url = url.to_string();

        tokio::task::spawn_blocking(move || this.rasterize_blocking(&url, bytes.as_ref().clone()))
            .await
            .map_err(|e| LectureError::Internal(format!("Render task panicked: {}", e)))?
    }
}

impl PdfiumRasterizer {
    fn rasterize_blocking(&self, url: &str, bytes: Vec<u8>) -> Result<Vec<RenderedPage>, LectureError> {
        let pdfium = bind_pdfium(self.lib_dir.as_deref())?;
        let document = load_document(&pdfium, url, bytes)?;

        let pages = document.pages();
        info!("PDF loaded: {} pages", pages.len());

        // PDF user space is 72 units per inch.
        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(self.dpi as f32 / 72.0)
            .set_maximum_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        let mut results = Vec::with_capacity(pages.len() as usize);

        for (idx, page) in pages.iter().enumerate() {
            let page_number = idx + 1;
            let png = page
                .render_with_config(&render_config)
                .map_err(|e| PageError::RenderFailed {
                    page: page_number,
                    detail: format!("{:?}", e),
                })
                .and_then(|bitmap| {
                    let image = bitmap.as_image();
                    debug!(
                        "Rendered page {} → {}x{} px",
                        page_number,
                        image.width(),
                        image.height()
                    );
                    encode_png(&image).map_err(|e| PageError::RenderFailed {
                        page: page_number,
                        detail: format!("PNG encoding failed: {}", e),
                    })
                });

            if let Err(ref e) = png {
                warn!("{}", e);
            }
            results.push(RenderedPage { page_number, png });
        }

        Ok(results)
    }
}

/// Run the image extractor for one document.
///
/// Pages are persisted and registered strictly in page order. A page that
/// fails to render, write or register is recorded in the report and the
/// remaining pages still go through. Pages in `registered` already have a
/// work-queue record; their image is rewritten but not registered again.
pub async fn extract_images(
    ctx: &RunContext,
    rasterizer: &dyn PageRasterizer,
    queue: &dyn WorkQueue,
    config: &PipelineConfig,
    registered: &BTreeSet<usize>,
) -> Result<StageReport<SlideImage>, LectureError> {
    let start = Instant::now();
    let mut report = StageReport::new(Stage::Rasterization);

    let rendered = rasterizer
        .rasterize(&ctx.document_url, Arc::clone(&ctx.bytes))
        .await?;

    if let Some(ref cb) = config.progress_callback {
        cb.on_stage_start(&ctx.document_url, Stage::Rasterization, rendered.len());
    }

    for page in rendered {
        let page_number = page.page_number;
        let outcome = if ctx.cancel.is_cancelled() {
            Err(PageError::Cancelled {
                page: page_number,
                stage: Stage::Rasterization,
            })
        } else {
            match page.png {
                Ok(png) => {
                    let register = !registered.contains(&page_number);
                    persist_and_register(ctx, queue, config, page_number, &png, register).await
                }
                Err(e) => Err(e),
            }
        };

        match outcome {
            Ok(image) => {
                if let Some(ref cb) = config.progress_callback {
                    cb.on_item_complete(&ctx.document_url, Stage::Rasterization, page_number);
                }
                report.items.push(image);
            }
            Err(e) => {
                warn!(document = %ctx.document_url, "{}", e);
                if let Some(ref cb) = config.progress_callback {
                    cb.on_item_error(
                        &ctx.document_url,
                        Stage::Rasterization,
                        page_number,
                        &e.to_string(),
                    );
                }
                report.errors.push(e);
            }
        }
    }

    report.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        document = %ctx.document_url,
        "Images: {}/{} pages registered in {}ms",
        report.items.len(),
        report.attempted(),
        report.duration_ms
    );
    Ok(report)
}

async fn persist_and_register(
    ctx: &RunContext,
    queue: &dyn WorkQueue,
    config: &PipelineConfig,
    page_number: usize,
    png: &[u8],
    register: bool,
) -> Result<SlideImage, PageError> {
    let path = ctx.layout.image_path(page_number);
    write_asset(page_number, &path, png).await?;

    let asset_url = ctx.layout.public_url(&config.asset_base_url, &path);
    if !register {
        debug!("Page {} already registered", page_number);
        return Ok(SlideImage {
            page_number,
            asset_path: path,
            asset_url,
        });
    }

    let item = ItemCreate {
        page: page_number,
        document_url: ctx.document_url.clone(),
        image_url: asset_url.clone(),
    };
    queue
        .create_item(&item)
        .await
        .map_err(|e| PageError::RegistrationFailed {
            page: page_number,
            detail: e.to_string(),
        })?;

    debug!("Registered page {} → {}", page_number, asset_url);
    Ok(SlideImage {
        page_number,
        asset_path: path,
        asset_url,
    })
}

/// Write one generated asset, mapping I/O failure to a per-item error.
pub(crate) async fn write_asset(page: usize, path: &Path, bytes: &[u8]) -> Result<(), PageError> {
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| PageError::WriteFailed {
            page,
            path: path.display().to_string(),
            detail: e.to_string(),
        })
}
