//! Speech synthesiser: narration units → MP3 files → `audio_url` updates.
//!
//! Units are synthesised in order. The file name uses the unit's position in
//! the narration list (`lecture_<index>.mp3`); the work-queue update uses the
//! unit's own `page_number`. A unit that fails is recorded and skipped.
//! A unit whose audio an earlier run already reported is not synthesised again.

use super::render::write_asset;
use super::retry::{call_with_retry, CallFailure, RetryPolicy};
use crate::config::PipelineConfig;
use crate::error::PageError;
use crate::output::{AudioAsset, NarrationUnit, Stage, StageReport};
use crate::providers::SpeechProvider;
use crate::queue::{ItemField, ItemUpdate, WorkQueue};
use crate::run::RunContext;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Synthesise every narration unit and report each audio URL to the queue.
///
/// `delivered` maps page numbers to audio already reported by an earlier
/// run; those assets are passed through unchanged.
pub async fn synthesize(
    ctx: &RunContext,
    narration: &[NarrationUnit],
    provider: &dyn SpeechProvider,
    queue: &dyn WorkQueue,
    config: &PipelineConfig,
    delivered: &BTreeMap<usize, AudioAsset>,
) -> StageReport<AudioAsset> {
    let start = Instant::now();
    let policy = RetryPolicy::from_config(config);
    let mut report = StageReport::new(Stage::Synthesis);

    if let Some(ref cb) = config.progress_callback {
        cb.on_stage_start(&ctx.document_url, Stage::Synthesis, narration.len());
    }

    for (index, unit) in narration.iter().enumerate() {
        let earlier = delivered
            .get(&unit.page_number)
            .filter(|asset| asset.index == index);
        let outcome = match earlier {
            Some(asset) => {
                debug!("Slide {}: audio already reported", unit.page_number);
                Ok(asset.clone())
            }
            None => synthesize_one(ctx, index, unit, provider, queue, config, &policy).await,
        };
        match outcome {
            Ok(asset) => {
                if let Some(ref cb) = config.progress_callback {
                    cb.on_item_complete(&ctx.document_url, Stage::Synthesis, unit.page_number);
                }
                report.items.push(asset);
            }
            Err(e) => {
                warn!(document = %ctx.document_url, "{}", e);
                if let Some(ref cb) = config.progress_callback {
                    cb.on_item_error(
                        &ctx.document_url,
                        Stage::Synthesis,
                        unit.page_number,
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
        "Speech: {}/{} units synthesised in {}ms",
        report.items.len(),
        report.attempted(),
        report.duration_ms
    );
    report
}

async fn synthesize_one(
    ctx: &RunContext,
    index: usize,
    unit: &NarrationUnit,
    provider: &dyn SpeechProvider,
    queue: &dyn WorkQueue,
    config: &PipelineConfig,
    policy: &RetryPolicy,
) -> Result<AudioAsset, PageError> {
    let page = unit.page_number;
    let label = format!("speech slide {}", page);

    let audio = call_with_retry(&label, policy, &ctx.cancel, || {
        provider.synthesize(&unit.narration_text, &config.voice)
    })
    .await
    .map_err(|failure| match failure {
        CallFailure::Cancelled => PageError::Cancelled {
            page,
            stage: Stage::Synthesis,
        },
        CallFailure::Exhausted { retries, detail } => PageError::SynthesisFailed {
            page,
            retries,
            detail,
        },
    })?;

    let path = ctx.layout.audio_path(index);
    write_asset(page, &path, &audio).await?;
    debug!("Slide {}: wrote {} bytes to {}", page, audio.len(), path.display());

    let asset_url = ctx.layout.public_url(&config.asset_base_url, &path);
    queue
        .update_item(&ItemUpdate {
            document_url: ctx.document_url.clone(),
            page,
            field: ItemField::AudioUrl,
            value: asset_url.clone(),
        })
        .await
        .map_err(|e| PageError::UpdateFailed {
            page,
            field: ItemField::AudioUrl.as_str().to_string(),
            detail: e.to_string(),
        })?;

    Ok(AudioAsset {
        index,
        page_number: page,
        file_path: path,
        asset_url,
    })
}
