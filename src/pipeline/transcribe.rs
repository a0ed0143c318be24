//! Transcriber: audio assets → SRT subtitle files → `transcription` updates.
//!
//! This is the terminal stage. Each subtitle inherits `index` and
//! `page_number` from the audio asset it was transcribed from, so
//! `subtitles/<key>/lecture_<i>.mp3.srt` always pairs with
//! `audio/<key>/lecture_<i>.mp3`. Subtitles an earlier run already reported
//! are passed through without calling the provider.

use super::postprocess::{count_cues, normalise_srt};
use super::render::write_asset;
use super::retry::{call_with_retry, CallFailure, RetryPolicy};
use crate::config::PipelineConfig;
use crate::error::PageError;
use crate::output::{AudioAsset, Stage, StageReport, SubtitleAsset};
use crate::providers::TranscriptionProvider;
use crate::queue::{ItemField, ItemUpdate, WorkQueue};
use crate::run::RunContext;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Transcribe every audio asset and report each subtitle URL to the queue.
pub async fn transcribe(
    ctx: &RunContext,
    audio: &[AudioAsset],
    provider: &dyn TranscriptionProvider,
    queue: &dyn WorkQueue,
    config: &PipelineConfig,
    delivered: &BTreeMap<usize, SubtitleAsset>,
) -> StageReport<SubtitleAsset> {
    let start = Instant::now();
    let policy = RetryPolicy::from_config(config);
    let mut report = StageReport::new(Stage::Transcription);

    if let Some(ref cb) = config.progress_callback {
        cb.on_stage_start(&ctx.document_url, Stage::Transcription, audio.len());
    }

    for asset in audio {
        let earlier = delivered
            .get(&asset.page_number)
            .filter(|subtitle| subtitle.index == asset.index);
        let outcome = match earlier {
            Some(subtitle) => {
                debug!("Slide {}: subtitles already reported", asset.page_number);
                Ok(subtitle.clone())
            }
            None => transcribe_one(ctx, asset, provider, queue, config, &policy).await,
        };
        match outcome {
            Ok(subtitle) => {
                if let Some(ref cb) = config.progress_callback {
                    cb.on_item_complete(&ctx.document_url, Stage::Transcription, asset.page_number);
                }
                report.items.push(subtitle);
            }
            Err(e) => {
                warn!(document = %ctx.document_url, "{}", e);
                if let Some(ref cb) = config.progress_callback {
                    cb.on_item_error(
                        &ctx.document_url,
                        Stage::Transcription,
                        asset.page_number,
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
        "Transcription: {}/{} subtitles written in {}ms",
        report.items.len(),
        report.attempted(),
        report.duration_ms
    );
    report
}

async fn transcribe_one(
    ctx: &RunContext,
    asset: &AudioAsset,
    provider: &dyn TranscriptionProvider,
    queue: &dyn WorkQueue,
    config: &PipelineConfig,
    policy: &RetryPolicy,
) -> Result<SubtitleAsset, PageError> {
    let page = asset.page_number;
    let audio = tokio::fs::read(&asset.file_path)
        .await
        .map_err(|e| PageError::TranscriptionFailed {
            page,
            retries: 0,
            detail: format!("reading {}: {}", asset.file_path.display(), e),
        })?;

    let file_name = asset
        .file_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("lecture_{}.mp3", asset.index));

    let label = format!("transcription slide {}", page);
    let raw = call_with_retry(&label, policy, &ctx.cancel, || {
        provider.transcribe(audio.clone(), &file_name, &config.language)
    })
    .await
    .map_err(|failure| match failure {
        CallFailure::Cancelled => PageError::Cancelled {
            page,
            stage: Stage::Transcription,
        },
        CallFailure::Exhausted { retries, detail } => PageError::TranscriptionFailed {
            page,
            retries,
            detail,
        },
    })?;

    let srt_content = normalise_srt(&raw);
    if count_cues(&srt_content) == 0 {
        warn!("Slide {}: transcript has no timed cues", page);
    }

    let path = ctx.layout.subtitle_path(asset.index);
    write_asset(page, &path, srt_content.as_bytes()).await?;
    debug!("Slide {}: wrote subtitles to {}", page, path.display());

    let asset_url = ctx.layout.public_url(&config.asset_base_url, &path);
    queue
        .update_item(&ItemUpdate {
            document_url: ctx.document_url.clone(),
            page,
            field: ItemField::Transcription,
            value: asset_url.clone(),
        })
        .await
        .map_err(|e| PageError::UpdateFailed {
            page,
            field: ItemField::Transcription.as_str().to_string(),
            detail: e.to_string(),
        })?;

    Ok(SubtitleAsset {
        index: asset.index,
        page_number: page,
        file_path: path,
        asset_url,
        srt_content,
    })
}
