//! One pipeline run: a single document through every stage.
//!
//! ## Why a per-run context?
//!
//! Every stage needs the document URL (to key work-queue calls), the storage
//! namespace (to place assets) and the cancellation signal. Passing them in
//! one [`RunContext`] value keeps them immutable for the lifetime of the run,
//! so two runs in flight can never observe each other's document.
//!
//! ## Stage order
//!
//! ```text
//! text ─┐
//!       ├─ join ─▶ page-count check ─▶ narrate ─▶ speech ─▶ transcribe ─▶ mark completed
//! image ┘
//! ```
//!
//! The document is marked completed only after the terminal stage, and only
//! when no item of any stage failed. A partially processed document keeps its
//! "processing" status and is picked up again by a later tick.
//!
//! ## Resuming
//!
//! After each stage the run saves a [`RunCheckpoint`] in its work directory.
//! The next run over the same bytes reads it back and skips what the work
//! queue already has: page registrations, the narration, and every audio or
//! subtitle update that went through. Only failed items cost provider calls
//! again. The checkpoint is deleted once the document is marked completed.

use crate::checkpoint::RunCheckpoint;
use crate::config::PipelineConfig;
use crate::error::LectureError;
use crate::layout::RunLayout;
use crate::output::{RunReport, RunStats};
use crate::pipeline::input::{DocumentSource, HttpDocumentSource};
use crate::pipeline::narrate::{generate_narration, NarrationOutput};
use crate::pipeline::render::{extract_images, PageRasterizer, PdfiumRasterizer};
use crate::pipeline::speech::synthesize;
use crate::pipeline::text::{is_contiguous, PdfiumTextExtractor, TextExtractor};
use crate::pipeline::transcribe::transcribe;
use crate::providers::{
    resolve_narration_provider, LlmNarrator, NarrationProvider, OpenAiSpeech, OpenAiTranscriber,
    SpeechProvider, TranscriptionProvider,
};
use crate::queue::{HttpWorkQueue, WorkQueue};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Immutable per-run state shared by every stage.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub document_url: String,
    pub layout: RunLayout,
    /// Downloaded document, shared by both extractors without copying.
    pub bytes: Arc<Vec<u8>>,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(
        document_url: impl Into<String>,
        layout: RunLayout,
        bytes: Vec<u8>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            document_url: document_url.into(),
            layout,
            bytes: Arc::new(bytes),
            cancel,
        }
    }

    pub fn key(&self) -> &str {
        self.layout.key()
    }
}

/// The external collaborators a run talks to.
///
/// Production code builds these with [`Services::from_config`]; tests swap in
/// in-memory fakes field by field.
#[derive(Clone)]
pub struct Services {
    pub queue: Arc<dyn WorkQueue>,
    pub source: Arc<dyn DocumentSource>,
    pub text: Arc<dyn TextExtractor>,
    pub rasterizer: Arc<dyn PageRasterizer>,
    pub narrator: Arc<dyn NarrationProvider>,
    pub speech: Arc<dyn SpeechProvider>,
    pub transcriber: Arc<dyn TranscriptionProvider>,
}

impl Services {
    /// HTTP work queue, HTTP downloads, pdfium extractors, `edgequake_llm`
    /// narration and OpenAI-compatible audio endpoints.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, LectureError> {
        let llm = resolve_narration_provider(config)?;

        Ok(Self {
            queue: Arc::new(HttpWorkQueue::new(
                config.queue_base_url.clone(),
                config.api_timeout_secs,
            )?),
            source: Arc::new(HttpDocumentSource::new(config.download_timeout_secs)?),
            text: Arc::new(PdfiumTextExtractor::new(config.pdfium_lib_path.clone())),
            rasterizer: Arc::new(PdfiumRasterizer::from_config(config)),
            narrator: Arc::new(LlmNarrator::new(llm, config)),
            speech: Arc::new(OpenAiSpeech::from_config(config)?),
            transcriber: Arc::new(OpenAiTranscriber::from_config(config)?),
        })
    }
}

/// Run every stage for one downloaded document.
///
/// # Returns
/// `Ok(RunReport)` once the terminal stage has run, even if some items
/// failed (check [`RunReport::is_complete`]).
///
/// # Errors
/// Returns `Err(LectureError)` for run-fatal failures:
/// - the document cannot be parsed by either extractor
/// - the extractors disagree on the page count
/// - narration for any slide fails after retries
/// - the run is cancelled
pub async fn process_document(
    ctx: &RunContext,
    services: &Services,
    config: &PipelineConfig,
) -> Result<RunReport, LectureError> {
    let total_start = Instant::now();
    info!(document = %ctx.document_url, key = %ctx.key(), "Starting run");

    ctx.layout.prepare().await?;

    let mut checkpoint = RunCheckpoint::load(&ctx.layout.checkpoint_path(), &ctx.bytes).await;
    if !checkpoint.is_empty() {
        info!(
            document = %ctx.document_url,
            registered = checkpoint.registered_pages.len(),
            narrated = checkpoint.narration.is_some(),
            audio = checkpoint.audio.len(),
            subtitles = checkpoint.subtitles.len(),
            "Resuming from an earlier run"
        );
    }

    // ── Step 1: Extract text and images concurrently ─────────────────────
    let extract_start = Instant::now();
    let (slides, images) = tokio::join!(
        services.text.extract(&ctx.document_url, Arc::clone(&ctx.bytes)),
        extract_images(
            ctx,
            services.rasterizer.as_ref(),
            services.queue.as_ref(),
            config,
            &checkpoint.registered_pages,
        ),
    );
    let images = images?;
    checkpoint.record_images(&images);
    save_checkpoint(ctx, &checkpoint).await;
    let slides = slides?;
    let extract_duration_ms = extract_start.elapsed().as_millis() as u64;

    if slides.len() != images.attempted() {
        return Err(LectureError::PageCountMismatch {
            text_pages: slides.len(),
            image_pages: images.attempted(),
        });
    }
    if !is_contiguous(&slides) {
        return Err(LectureError::Internal(format!(
            "text extractor returned non-contiguous page numbers for '{}'",
            ctx.document_url
        )));
    }

    let total_pages = slides.len();
    info!(document = %ctx.document_url, "Extracted {} pages", total_pages);
    if let Some(ref cb) = config.progress_callback {
        cb.on_run_start(&ctx.document_url, total_pages);
    }

    // ── Step 2: Narration (all-or-nothing) ───────────────────────────────
    let narration = match checkpoint.narration_for(&slides) {
        Some(units) => {
            info!(document = %ctx.document_url, "Reusing narration from an earlier run");
            NarrationOutput {
                units: units.to_vec(),
                ..Default::default()
            }
        }
        None => {
            let output = generate_narration(
                ctx,
                &slides,
                &images.items,
                services.narrator.as_ref(),
                config,
            )
            .await?;
            checkpoint.record_narration(&output.units);
            save_checkpoint(ctx, &checkpoint).await;
            output
        }
    };

    // ── Step 3: Speech ───────────────────────────────────────────────────
    let audio = synthesize(
        ctx,
        &narration.units,
        services.speech.as_ref(),
        services.queue.as_ref(),
        config,
        &checkpoint.audio,
    )
    .await;
    checkpoint.record_audio(&audio);
    save_checkpoint(ctx, &checkpoint).await;

    // ── Step 4: Transcription (terminal) ─────────────────────────────────
    let subtitles = transcribe(
        ctx,
        &audio.items,
        services.transcriber.as_ref(),
        services.queue.as_ref(),
        config,
        &checkpoint.subtitles,
    )
    .await;
    checkpoint.record_subtitles(&subtitles);
    save_checkpoint(ctx, &checkpoint).await;

    if ctx.cancel.is_cancelled() {
        return Err(LectureError::Cancelled {
            url: ctx.document_url.clone(),
        });
    }

    let mut report = RunReport {
        document_url: ctx.document_url.clone(),
        document_key: ctx.key().to_string(),
        slides,
        images,
        narration: narration.units,
        audio,
        subtitles,
        stats: RunStats {
            total_pages,
            narration_input_tokens: narration.input_tokens,
            narration_output_tokens: narration.output_tokens,
            extract_duration_ms,
            narration_duration_ms: narration.duration_ms,
            ..Default::default()
        },
        marked_completed: false,
    };
    report.stats.failed_items = report.failures().count();

    // ── Step 5: Status transition ────────────────────────────────────────
    if report.is_complete() {
        match services.queue.mark_completed(&ctx.document_url).await {
            Ok(()) => {
                report.marked_completed = true;
                if let Err(e) = RunCheckpoint::remove(&ctx.layout.checkpoint_path()).await {
                    warn!(document = %ctx.document_url, "Could not remove checkpoint: {}", e);
                }
            }
            Err(e) => warn!(
                document = %ctx.document_url,
                "All stages finished but marking completed failed: {}", e
            ),
        }
    } else {
        warn!(
            document = %ctx.document_url,
            "{} item(s) failed; leaving document in processing state",
            report.stats.failed_items
        );
    }

    report.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
    if let Some(ref cb) = config.progress_callback {
        cb.on_run_complete(&ctx.document_url, total_pages, report.stats.failed_items);
    }

    info!(
        document = %ctx.document_url,
        "Run finished in {}ms: {}",
        report.stats.total_duration_ms,
        report.summary()
    );
    Ok(report)
}

/// Persist the checkpoint; a failed write is logged, not returned.
async fn save_checkpoint(ctx: &RunContext, checkpoint: &RunCheckpoint) {
    if let Err(e) = checkpoint.save(&ctx.layout.checkpoint_path()).await {
        warn!(document = %ctx.document_url, "Could not save checkpoint: {}", e);
    }
}
