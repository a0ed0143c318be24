//! Narration over `edgequake_llm`.
//!
//! The narrator is intentionally thin: prompt wording lives in
//! [`crate::prompts`], retry and history handling in
//! [`crate::pipeline::narrate`]. This module only turns a
//! [`NarrationRequest`] into chat messages and back.

use super::{NarrationProvider, NarrationRequest, NarrationResponse, ProviderError};
use crate::config::PipelineConfig;
use crate::error::LectureError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use tracing::debug;

/// [`NarrationProvider`] backed by any `edgequake_llm` chat provider.
pub struct LlmNarrator {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl LlmNarrator {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
        }
    }
}

/// Build `CompletionOptions` from the pipeline config.
fn build_options(config: &PipelineConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

#[async_trait]
impl NarrationProvider for LlmNarrator {
    async fn narrate(&self, request: &NarrationRequest) -> Result<NarrationResponse, ProviderError> {
        let images = request.image.iter().cloned().collect::<Vec<_>>();
        let user = ChatMessage::user_with_images(request.prompt.as_str(), images);
        let messages = vec![ChatMessage::system(request.system_prompt.as_str()), user];

        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| ProviderError::Llm(e.to_string()))?;

        debug!(
            "Slide {}: {} input tokens, {} output tokens",
            request.page_number, response.prompt_tokens, response.completion_tokens
        );

        if response.content.trim().is_empty() {
            return Err(ProviderError::InvalidResponse(format!(
                "empty narration for slide {}",
                request.page_number
            )));
        }

        Ok(NarrationResponse {
            text: response.content,
            input_tokens: response.prompt_tokens,
            output_tokens: response.completion_tokens,
        })
    }
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, LectureError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        LectureError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the narration LLM, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.narration_provider`), used as-is.
/// 2. **Named provider** (`config.provider_name`) with `config.narration_model`.
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 4. **OpenAI** when `OPENAI_API_KEY` is set, the same account the audio
///    endpoints use.
/// 5. **Full auto-detection** via `ProviderFactory::from_env`.
pub fn resolve_narration_provider(
    config: &PipelineConfig,
) -> Result<Arc<dyn LLMProvider>, LectureError> {
    if let Some(ref provider) = config.narration_provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        return create_provider(name, &config.narration_model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_provider("openai", &config.narration_model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| LectureError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
