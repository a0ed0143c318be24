//! Narration generator: slides → lecture narration, one slide at a time.
//!
//! ## Why sequential?
//!
//! Each request carries the full lecture history (every narration produced
//! so far for this document) so the model continues the lecture instead of
//! restarting it on every slide. Slide *n* therefore depends on slides
//! *1..n-1* and cannot be issued concurrently.
//!
//! ## Failure semantics
//!
//! A slide whose narration still fails after retries aborts the stage: the
//! later slides are not attempted and no partial narration list is returned.
//! A gap in the lecture would make every following slide's history wrong.

use super::postprocess::clean_narration;
use super::retry::{call_with_retry, CallFailure, RetryPolicy};
use crate::config::PipelineConfig;
use crate::error::LectureError;
use crate::output::{NarrationUnit, Slide, SlideImage, Stage};
use crate::prompts::{history_entry, narration_request, DEFAULT_SYSTEM_PROMPT};
use crate::providers::{NarrationProvider, NarrationRequest};
use crate::run::RunContext;
use edgequake_llm::ImageData;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::encode::png_to_image_data;

/// Result of a successful narration stage.
#[derive(Debug, Clone, Default)]
pub struct NarrationOutput {
    /// One unit per slide, in slide order.
    pub units: Vec<NarrationUnit>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
}

/// Generate narration for every slide, in order, with a growing history.
///
/// `images` is only consulted when `config.attach_slide_images` is set; a
/// slide whose image is missing or unreadable is narrated from text alone.
pub async fn generate_narration(
    ctx: &RunContext,
    slides: &[Slide],
    images: &[SlideImage],
    provider: &dyn NarrationProvider,
    config: &PipelineConfig,
) -> Result<NarrationOutput, LectureError> {
    let start = Instant::now();
    let policy = RetryPolicy::from_config(config);
    let system_prompt = config
        .system_prompt
        .clone()
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

    if let Some(ref cb) = config.progress_callback {
        cb.on_stage_start(&ctx.document_url, Stage::Narration, slides.len());
    }

    let mut output = NarrationOutput::default();
    let mut history = String::new();

    for slide in slides {
        let page = slide.page_number;
        if ctx.cancel.is_cancelled() {
            return Err(LectureError::Cancelled {
                url: ctx.document_url.clone(),
            });
        }

        let image = if config.attach_slide_images {
            load_slide_image(images, page).await
        } else {
            None
        };

        let request = NarrationRequest {
            page_number: page,
            system_prompt: system_prompt.clone(),
            prompt: narration_request(&history, page, &slide.text),
            image,
        };

        let label = format!("narration slide {}", page);
        let response = call_with_retry(&label, &policy, &ctx.cancel, || provider.narrate(&request))
            .await
            .map_err(|failure| {
                let err = match failure {
                    CallFailure::Cancelled => LectureError::Cancelled {
                        url: ctx.document_url.clone(),
                    },
                    CallFailure::Exhausted { retries, detail } => LectureError::NarrationFailed {
                        page,
                        retries,
                        detail,
                    },
                };
                if let Some(ref cb) = config.progress_callback {
                    cb.on_item_error(&ctx.document_url, Stage::Narration, page, &err.to_string());
                }
                err
            })?;

        let text = if config.clean_narration {
            clean_narration(&response.text)
        } else {
            response.text.trim().to_string()
        };
        if text.is_empty() {
            warn!("Slide {}: narration is empty after cleanup", page);
        }

        output.input_tokens += response.input_tokens as u64;
        output.output_tokens += response.output_tokens as u64;
        history.push_str(&history_entry(page, &text));
        debug!("Slide {}: {} chars of narration", page, text.len());

        if let Some(ref cb) = config.progress_callback {
            cb.on_item_complete(&ctx.document_url, Stage::Narration, page);
        }
        output.units.push(NarrationUnit {
            page_number: page,
            narration_text: text,
        });
    }

    output.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        document = %ctx.document_url,
        "Narrated {} slides in {}ms ({} in / {} out tokens)",
        output.units.len(),
        output.duration_ms,
        output.input_tokens,
        output.output_tokens
    );
    Ok(output)
}

async fn load_slide_image(images: &[SlideImage], page: usize) -> Option<ImageData> {
    let image = images.iter().find(|i| i.page_number == page)?;
    match tokio::fs::read(&image.asset_path).await {
        Ok(png) => Some(png_to_image_data(&png)),
        Err(e) => {
            warn!(
                "Slide {}: could not read {} ({}); narrating from text only",
                page,
                image.asset_path.display(),
                e
            );
            None
        }
    }
}
