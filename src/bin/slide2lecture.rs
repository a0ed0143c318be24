//! Daemon binary for slide2lecture.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, installs logging, and runs the polling coordinator
//! until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use slide2lecture::{Coordinator, PipelineConfig, Services, TickOutcome};
use std::io;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Poll the local work queue every two minutes, writing assets under ./public
  slide2lecture --output-root ./public

  # Process at most one pending document and print its run report as JSON
  slide2lecture --once --output-root ./public > report.json

  # Use Anthropic for narration, OpenAI for speech and transcription
  slide2lecture --provider anthropic --model claude-sonnet-4-20250514

OUTPUT LAYOUT:
  {output-root}/images/<key>/page_<n>.png
  {output-root}/audio/<key>/lecture_<i>.mp3
  {output-root}/subtitles/<key>/lecture_<i>.mp3.srt
  {output-root}/work/<key>/document.pdf
  {output-root}/work/<key>/checkpoint.json   (kept until the document completes)

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key (speech, transcription, default narration)
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override narration provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override narration model ID
  PDFIUM_LIB_PATH         Directory containing libpdfium
  RUST_LOG                Log filter, e.g. slide2lecture=debug
"#;

/// Turn uploaded slide decks into narrated, subtitled lecture assets.
#[derive(Parser, Debug)]
#[command(
    name = "slide2lecture",
    version,
    about = "Turn uploaded slide decks into narrated, subtitled lecture assets",
    long_about = "Polls a work-queue service for pending PDF slide decks. For each one it \
extracts per-slide text and images, generates a continuous spoken lecture with an LLM, \
synthesises the audio, transcribes it to SRT subtitles, and reports every asset back to \
the work queue page by page.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Work-queue service base URL.
    #[arg(long, env = "S2L_QUEUE_URL", default_value = "http://localhost:9000")]
    queue_url: String,

    /// Public base URL that asset paths are reported under.
    #[arg(long, env = "S2L_ASSET_BASE_URL", default_value = "http://localhost:9000")]
    asset_base_url: String,

    /// Root directory for generated assets.
    #[arg(long, env = "S2L_OUTPUT_ROOT", default_value = ".")]
    output_root: PathBuf,

    /// Seconds between work-queue polls.
    #[arg(long, env = "S2L_POLL_INTERVAL", default_value_t = 120)]
    poll_interval: u64,

    /// Maximum number of documents processed at once.
    #[arg(long, env = "S2L_MAX_RUNS", default_value_t = 1)]
    max_runs: usize,

    /// Wall-clock limit for one document, in seconds.
    #[arg(long, env = "S2L_RUN_TIMEOUT", default_value_t = 3600)]
    run_timeout: u64,

    /// Unfinished runs of one document before it is skipped until restart.
    #[arg(long, env = "S2L_MAX_RUN_ATTEMPTS", default_value_t = 3)]
    max_run_attempts: u32,

    /// Maximum length of the per-document storage key.
    #[arg(long, env = "S2L_MAX_KEY_LEN", default_value_t = 96)]
    max_key_len: usize,

    /// Narration LLM model ID.
    #[arg(long, env = "S2L_MODEL", default_value = "gpt-4o-mini")]
    model: String,

    /// Narration LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "S2L_PROVIDER")]
    provider: Option<String>,

    /// Narration temperature (0.0–2.0).
    #[arg(long, env = "S2L_TEMPERATURE", default_value_t = 0.7)]
    temperature: f32,

    /// Max LLM output tokens per slide.
    #[arg(long, env = "S2L_MAX_TOKENS", default_value_t = 1024)]
    max_tokens: usize,

    /// Path to a text file containing a custom narration system prompt.
    #[arg(long, env = "S2L_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Attach the rendered slide image to each narration request.
    #[arg(long, env = "S2L_ATTACH_IMAGES")]
    attach_images: bool,

    /// Send narration to speech synthesis exactly as the model wrote it.
    #[arg(long, env = "S2L_RAW_NARRATION")]
    raw_narration: bool,

    /// Text-to-speech model.
    #[arg(long, env = "S2L_SPEECH_MODEL", default_value = "tts-1")]
    speech_model: String,

    /// Text-to-speech voice.
    #[arg(long, env = "S2L_VOICE", default_value = "nova")]
    voice: String,

    /// Speech-to-text model.
    #[arg(long, env = "S2L_TRANSCRIPTION_MODEL", default_value = "whisper-1")]
    transcription_model: String,

    /// Transcription language hint (ISO-639-1).
    #[arg(long, env = "S2L_LANGUAGE", default_value = "en")]
    language: String,

    /// OpenAI-compatible base URL for the audio endpoints.
    #[arg(long, env = "S2L_OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    openai_base_url: String,

    /// API key for the speech and transcription endpoints.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// Rendering DPI (72–600).
    #[arg(long, env = "S2L_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Retries per provider call on transient failure.
    #[arg(long, env = "S2L_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "S2L_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-call provider and work-queue timeout in seconds.
    #[arg(long, env = "S2L_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Run a single poll tick, wait for its run, print the report as JSON, exit.
    #[arg(long)]
    once: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "S2L_VERBOSE", conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors.
    #[arg(short, long, env = "S2L_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config and services ────────────────────────────────────────
    let config = build_config(&cli).await?;
    let services = Services::from_config(&config).context("Failed to initialise providers")?;
    let coordinator = Coordinator::new(config, services);

    if cli.once {
        return run_once(&coordinator).await;
    }

    // ── Run until Ctrl-C ─────────────────────────────────────────────────
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, shutting down"),
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
        signal_token.cancel();
    });

    coordinator.run(shutdown).await;
    Ok(())
}

async fn run_once(coordinator: &Coordinator) -> Result<()> {
    match coordinator.tick().await.context("Poll tick failed")? {
        TickOutcome::Idle => {
            eprintln!("No pending documents");
            Ok(())
        }
        TickOutcome::AtCapacity => {
            eprintln!("All run slots are busy");
            Ok(())
        }
        TickOutcome::Dispatched { url, handle } => {
            let report = handle
                .await
                .context("Run task panicked")?
                .with_context(|| format!("Run for '{url}' failed"))?;
            let json =
                serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
            println!("{json}");
            if !report.is_complete() {
                anyhow::bail!("{} item(s) failed for '{}'", report.stats.failed_items, url);
            }
            Ok(())
        }
    }
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .queue_base_url(cli.queue_url.clone())
        .asset_base_url(cli.asset_base_url.clone())
        .output_root(cli.output_root.clone())
        .poll_interval_secs(cli.poll_interval)
        .max_concurrent_runs(cli.max_runs)
        .run_timeout_secs(cli.run_timeout)
        .max_run_attempts(cli.max_run_attempts)
        .max_key_len(cli.max_key_len)
        .narration_model(cli.model.clone())
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .attach_slide_images(cli.attach_images)
        .clean_narration(!cli.raw_narration)
        .speech_model(cli.speech_model.clone())
        .voice(cli.voice.clone())
        .transcription_model(cli.transcription_model.clone())
        .language(cli.language.clone())
        .openai_base_url(cli.openai_base_url.clone())
        .dpi(cli.dpi)
        .max_retries(cli.max_retries)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref key) = cli.openai_api_key {
        builder = builder.openai_api_key(key.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }

    builder.build().context("Invalid configuration")
}
