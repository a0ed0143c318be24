//! Configuration for the lecture pipeline and its polling coordinator.
//!
//! All behaviour is controlled through [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. One struct holds every knob so a run can log
//! exactly what it was configured with, and so the binary can map flags onto
//! it in one place.

use crate::error::LectureError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for the slide-to-lecture pipeline.
///
/// # Example
/// ```rust
/// use slide2lecture::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .queue_base_url("http://localhost:9000")
///     .poll_interval_secs(30)
///     .voice("alloy")
///     .build()
///     .unwrap();
/// assert_eq!(config.voice, "alloy");
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    // ── Work queue & storage ─────────────────────────────────────────────
    /// Base URL of the work-queue service. Default: `http://localhost:9000`.
    pub queue_base_url: String,

    /// Base URL under which generated assets are publicly served.
    /// Asset URLs reported to the work queue are `{asset_base_url}/{relative path}`.
    /// Default: `http://localhost:9000`.
    pub asset_base_url: String,

    /// Directory under which `images/`, `audio/`, `subtitles/` and `work/` live. Default: `.`.
    pub output_root: PathBuf,

    /// Longest document key before it is truncated and hash-suffixed. Default: 96.
    pub max_key_len: usize,

    // ── Coordinator ──────────────────────────────────────────────────────
    /// Seconds between two polls of the work queue. Default: 120.
    pub poll_interval_secs: u64,

    /// How many documents may be processed at once. Default: 1.
    pub max_concurrent_runs: usize,

    /// Wall-clock budget for a whole run, in seconds. Default: 3600.
    pub run_timeout_secs: u64,

    /// Consecutive unfinished runs after which a document is no longer
    /// polled until the process restarts. Default: 3.
    pub max_run_attempts: u32,

    /// Download timeout for the document bytes, in seconds. Default: 120.
    pub download_timeout_secs: u64,

    // ── Provider calls ───────────────────────────────────────────────────
    /// Per-call timeout for narration, speech and transcription requests. Default: 120.
    pub api_timeout_secs: u64,

    /// Retries on a failed provider call. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled after each attempt. Default: 500.
    pub retry_backoff_ms: u64,

    // ── Rendering ────────────────────────────────────────────────────────
    /// Rasterisation DPI. Range: 72–600. Default: 200.
    pub dpi: u32,

    /// Cap on either rendered dimension, in pixels. Default: 4000.
    pub max_rendered_pixels: u32,

    /// Directory containing the pdfium shared library. `None` binds the system library.
    pub pdfium_lib_path: Option<PathBuf>,

    // ── Narration ────────────────────────────────────────────────────────
    /// Narration model identifier. Default: `gpt-4o-mini`.
    pub narration_model: String,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If `None` along with `narration_provider`, the provider is auto-detected.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub narration_provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for narration. Default: 0.7.
    pub temperature: f32,

    /// Maximum tokens generated per slide. Default: 1024.
    pub max_tokens: usize,

    /// Custom system prompt. If `None`, uses the built-in lecturer prompt.
    pub system_prompt: Option<String>,

    /// Attach the rendered slide image to each narration request. Default: false.
    pub attach_slide_images: bool,

    /// Strip markdown and other non-spoken artefacts from narration. Default: true.
    pub clean_narration: bool,

    // ── Speech & transcription ───────────────────────────────────────────
    /// Speech-synthesis model. Default: `tts-1`.
    pub speech_model: String,

    /// Voice selector passed to the speech provider. Default: `nova`.
    pub voice: String,

    /// Transcription model. Default: `whisper-1`.
    pub transcription_model: String,

    /// Language hint for transcription. Default: `en`.
    pub language: String,

    /// Base URL of the OpenAI-compatible audio API. Default: `https://api.openai.com/v1`.
    pub openai_base_url: String,

    /// API key for the audio endpoints. Default: `OPENAI_API_KEY` from the environment.
    pub openai_api_key: Option<String>,

    /// Optional per-item progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_base_url: "http://localhost:9000".to_string(),
            asset_base_url: "http://localhost:9000".to_string(),
            output_root: PathBuf::from("."),
            max_key_len: 96,
            poll_interval_secs: 120,
            max_concurrent_runs: 1,
            run_timeout_secs: 3600,
            max_run_attempts: 3,
            download_timeout_secs: 120,
            api_timeout_secs: 120,
            max_retries: 2,
            retry_backoff_ms: 500,
            dpi: 200,
            max_rendered_pixels: 4000,
            pdfium_lib_path: std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from),
            narration_model: "gpt-4o-mini".to_string(),
            provider_name: None,
            narration_provider: None,
            temperature: 0.7,
            max_tokens: 1024,
            system_prompt: None,
            attach_slide_images: false,
            clean_narration: true,
            speech_model: "tts-1".to_string(),
            voice: "nova".to_string(),
            transcription_model: "whisper-1".to_string(),
            language: "en".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("queue_base_url", &self.queue_base_url)
            .field("asset_base_url", &self.asset_base_url)
            .field("output_root", &self.output_root)
            .field("max_key_len", &self.max_key_len)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("max_concurrent_runs", &self.max_concurrent_runs)
            .field("run_timeout_secs", &self.run_timeout_secs)
            .field("max_run_attempts", &self.max_run_attempts)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("dpi", &self.dpi)
            .field("narration_model", &self.narration_model)
            .field("provider_name", &self.provider_name)
            .field(
                "narration_provider",
                &self.narration_provider.as_ref().map(|_| "<dyn LLMProvider>"),
            )
            .field("attach_slide_images", &self.attach_slide_images)
            .field("speech_model", &self.speech_model)
            .field("voice", &self.voice)
            .field("transcription_model", &self.transcription_model)
            .field("language", &self.language)
            .field("openai_base_url", &self.openai_base_url)
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl fmt::Debug for PipelineConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl PipelineConfigBuilder {
    pub fn queue_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.queue_base_url = url.into();
        self
    }

    pub fn asset_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.asset_base_url = url.into();
        self
    }

    pub fn output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.output_root = root.into();
        self
    }

    pub fn max_key_len(mut self, n: usize) -> Self {
        self.config.max_key_len = n;
        self
    }

    pub fn poll_interval_secs(mut self, secs: u64) -> Self {
        self.config.poll_interval_secs = secs;
        self
    }

    pub fn max_concurrent_runs(mut self, n: usize) -> Self {
        self.config.max_concurrent_runs = n.max(1);
        self
    }

    pub fn run_timeout_secs(mut self, secs: u64) -> Self {
        self.config.run_timeout_secs = secs;
        self
    }

    pub fn max_run_attempts(mut self, n: u32) -> Self {
        self.config.max_run_attempts = n.max(1);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn narration_model(mut self, model: impl Into<String>) -> Self {
        self.config.narration_model = model.into();
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn narration_provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.narration_provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn attach_slide_images(mut self, v: bool) -> Self {
        self.config.attach_slide_images = v;
        self
    }

    pub fn clean_narration(mut self, v: bool) -> Self {
        self.config.clean_narration = v;
        self
    }

    pub fn speech_model(mut self, model: impl Into<String>) -> Self {
        self.config.speech_model = model.into();
        self
    }

    pub fn voice(mut self, voice: impl Into<String>) -> Self {
        self.config.voice = voice.into();
        self
    }

    pub fn transcription_model(mut self, model: impl Into<String>) -> Self {
        self.config.transcription_model = model.into();
        self
    }

    pub fn language(mut self, lang: impl Into<String>) -> Self {
        self.config.language = lang.into();
        self
    }

    pub fn openai_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.openai_base_url = url.into();
        self
    }

    pub fn openai_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.openai_api_key = Some(key.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, LectureError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 600 {
            return Err(LectureError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.poll_interval_secs == 0 {
            return Err(LectureError::InvalidConfig(
                "Poll interval must be ≥ 1s".into(),
            ));
        }
        if c.max_key_len < 32 {
            return Err(LectureError::InvalidConfig(format!(
                "Document key length must be ≥ 32, got {}",
                c.max_key_len
            )));
        }
        if c.queue_base_url.trim().is_empty() || c.asset_base_url.trim().is_empty() {
            return Err(LectureError::InvalidConfig(
                "Work-queue and asset base URLs must not be empty".into(),
            ));
        }
        if c.run_timeout_secs == 0 || c.api_timeout_secs == 0 {
            return Err(LectureError::InvalidConfig(
                "Timeouts must be ≥ 1s".into(),
            ));
        }
        Ok(self.config)
    }
}
