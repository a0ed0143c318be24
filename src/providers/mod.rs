//! Generation providers: narration, speech synthesis, transcription.
//!
//! Each provider is a black-box request/response service behind a small
//! async trait, so the pipeline stages can be driven by the real HTTP
//! backends in production and by in-memory fakes in tests.
//!
//! | Trait | Production backend |
//! |-------|--------------------|
//! | [`NarrationProvider`] | [`llm::LlmNarrator`] over any `edgequake_llm` provider |
//! | [`SpeechProvider`] | [`openai_audio::OpenAiSpeech`] (`/audio/speech`) |
//! | [`TranscriptionProvider`] | [`openai_audio::OpenAiTranscriber`] (`/audio/transcriptions`) |

pub mod llm;
pub mod openai_audio;

use async_trait::async_trait;
use edgequake_llm::ImageData;
use thiserror::Error;

pub use llm::{resolve_narration_provider, LlmNarrator};
pub use openai_audio::{OpenAiSpeech, OpenAiTranscriber};

/// A failed provider call. Retry policy is decided by [`ProviderError::is_retryable`].
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Connection-level failure (DNS, reset, TLS).
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The provider answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The LLM client library reported an error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// The provider answered 2xx but the payload was unusable.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// 429 and 5xx are worth retrying; other statuses will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http(_) | ProviderError::Llm(_) => true,
            ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
            ProviderError::InvalidResponse(_) => false,
        }
    }
}

/// One narration request.
#[derive(Debug, Clone)]
pub struct NarrationRequest {
    pub page_number: usize,
    pub system_prompt: String,
    /// History plus the current slide's text.
    pub prompt: String,
    /// Rendered slide, when `attach_slide_images` is on.
    pub image: Option<ImageData>,
}

/// Generated narration plus token accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NarrationResponse {
    pub text: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

#[async_trait]
pub trait NarrationProvider: Send + Sync {
    async fn narrate(&self, request: &NarrationRequest) -> Result<NarrationResponse, ProviderError>;
}

#[async_trait]
pub trait SpeechProvider: Send + Sync {
    /// Synthesize `text` with the given voice; returns the encoded audio bytes.
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, ProviderError>;
}

#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    /// Transcribe `audio` into SRT with segment-level timestamps.
    async fn transcribe(
        &self,
        audio: Vec<u8>,
        file_name: &str,
        language: &str,
    ) -> Result<String, ProviderError>;
}
