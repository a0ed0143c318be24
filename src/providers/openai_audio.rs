//! OpenAI-compatible audio endpoints: text-to-speech and speech-to-text.
//!
//! Both are plain reqwest calls against `{base}/audio/speech` and
//! `{base}/audio/transcriptions`; any server exposing the same routes
//! (a local proxy, a self-hosted Whisper) works by changing the base URL.

use super::{ProviderError, SpeechProvider, TranscriptionProvider};
use crate::config::PipelineConfig;
use crate::error::LectureError;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

fn build_client(timeout_secs: u64) -> Result<reqwest::Client, LectureError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| LectureError::Internal(format!("HTTP client: {e}")))
}

fn require_key(config: &PipelineConfig) -> Result<String, LectureError> {
    config
        .openai_api_key
        .clone()
        .ok_or_else(|| LectureError::ProviderNotConfigured {
            provider: "openai-audio".to_string(),
            hint: "Set OPENAI_API_KEY (or --openai-api-key) for speech and transcription."
                .to_string(),
        })
}

async fn read_error(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    ProviderError::Status { status, body }
}

#[derive(Serialize)]
struct SpeechBody<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

/// `POST {base}/audio/speech`, mp3 output.
pub struct OpenAiSpeech {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiSpeech {
    pub fn from_config(config: &PipelineConfig) -> Result<Self, LectureError> {
        Ok(Self {
            client: build_client(config.api_timeout_secs)?,
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            api_key: require_key(config)?,
            model: config.speech_model.clone(),
        })
    }
}

#[async_trait]
impl SpeechProvider for OpenAiSpeech {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, ProviderError> {
        let body = SpeechBody {
            model: &self.model,
            input: text,
            voice,
            response_format: "mp3",
        };
        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(read_error(response).await);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        if bytes.is_empty() {
            return Err(ProviderError::InvalidResponse("empty audio stream".into()));
        }
        debug!("Synthesised {} bytes of audio", bytes.len());
        Ok(bytes.to_vec())
    }
}

/// `POST {base}/audio/transcriptions`, SRT output with segment timestamps.
pub struct OpenAiTranscriber {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiTranscriber {
    pub fn from_config(config: &PipelineConfig) -> Result<Self, LectureError> {
        Ok(Self {
            client: build_client(config.api_timeout_secs)?,
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            api_key: require_key(config)?,
            model: config.transcription_model.clone(),
        })
    }
}

#[async_trait]
impl TranscriptionProvider for OpenAiTranscriber {
    async fn transcribe(
        &self,
        audio: Vec<u8>,
        file_name: &str,
        language: &str,
    ) -> Result<String, ProviderError> {
        let file = Part::bytes(audio)
            .file_name(file_name.to_string())
            .mime_str("audio/mpeg")
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        let form = Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("language", language.to_string())
            .text("response_format", "srt")
            .text("timestamp_granularities[]", "segment");

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(read_error(response).await);
        }

        response
            .text()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))
    }
}
