//! Text recognition: send one image plus the fixed instruction to the VLM.
//!
//! This module is intentionally thin. The instruction lives in
//! [`crate::prompts`], and retry policy belongs to the orchestrator: a
//! [`Recognizer`] makes exactly one attempt per call and reports failure as
//! [`EntryError::Recognition`].

use crate::config::DrainConfig;
use crate::error::{DrainError, EntryError};
use crate::prompts::{DEFAULT_INSTRUCTION, IMAGE_MIME};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Model used when the caller names none.
pub const DEFAULT_MODEL: &str = "gpt-5-mini";

/// Extracts text from a base64-encoded image.
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize(&self, base64_image: &str) -> Result<String, EntryError>;
}

/// Recognizer backed by an edgequake-llm vision provider.
pub struct VisionRecognizer {
    provider: Arc<dyn LLMProvider>,
    instruction: String,
    max_tokens: usize,
    timeout: Duration,
}

impl VisionRecognizer {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &DrainConfig) -> Self {
        Self {
            provider,
            instruction: config
                .instruction
                .clone()
                .unwrap_or_else(|| DEFAULT_INSTRUCTION.to_string()),
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    /// Resolve the provider from `config` and wrap it.
    pub fn from_config(config: &DrainConfig) -> Result<Self, DrainError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }

    /// Build the single user turn: instruction text plus the inline image.
    fn build_messages(&self, base64_image: &str) -> Vec<ChatMessage> {
        let image = ImageData::new(base64_image.to_string(), IMAGE_MIME).with_detail("auto");
        vec![ChatMessage::user_with_images(
            self.instruction.as_str(),
            vec![image],
        )]
    }
}

#[async_trait]
impl Recognizer for VisionRecognizer {
    async fn recognize(&self, base64_image: &str) -> Result<String, EntryError> {
        let start = Instant::now();
        let messages = self.build_messages(base64_image);
        let options = build_options(self.max_tokens);

        let response = tokio::time::timeout(self.timeout, self.provider.chat(&messages, Some(&options)))
            .await
            .map_err(|_| EntryError::Recognition {
                detail: format!("timed out after {}s", self.timeout.as_secs()),
            })?
            .map_err(|e| EntryError::Recognition {
                detail: e.to_string(),
            })?;

        debug!(
            "Recognition: {} input tokens, {} output tokens, {:?}",
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        if response.content.trim().is_empty() {
            return Err(EntryError::Recognition {
                detail: "response carried no text".into(),
            });
        }
        Ok(response.content)
    }
}

/// Build `CompletionOptions` for a recognition call.
///
/// Temperature is left to the provider default; reasoning models reject
/// anything else.
fn build_options(max_tokens: usize) -> CompletionOptions {
    CompletionOptions {
        max_tokens: Some(max_tokens),
        ..Default::default()
    }
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, DrainError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        DrainError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`) — used as-is.
/// 2. **Named provider + model** (`config.provider_name`) — the factory reads
///    the matching API key from the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **`OPENAI_API_KEY`** — OpenAI with the configured or default model.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_provider(config: &DrainConfig) -> Result<Arc<dyn LLMProvider>, DrainError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);

    if let Some(ref name) = config.provider_name {
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_vision_provider(&prov, &env_model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| DrainError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_options_sets_only_max_tokens() {
        let opts = build_options(4096);
        assert_eq!(opts.max_tokens, Some(4096));
        assert_eq!(opts.temperature, None);
    }

    #[test]
    fn default_model_is_vision_capable_mini() {
        assert_eq!(DEFAULT_MODEL, "gpt-5-mini");
    }
}
