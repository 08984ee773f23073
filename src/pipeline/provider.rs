//! Analysis through any `edgequake-llm` provider.
//!
//! Used for the alternate credential and for callers who already hold a
//! configured `LLMProvider`. The document is attached inline as base64,
//! the same way multimodal providers receive page images.
//!
//! The provider is always built with the key from [`PipelineConfig`]; the
//! process environment is never consulted here.

use crate::config::{PipelineConfig, DEFAULT_ALTERNATE_MODEL};
use crate::error::ConcallError;
use crate::pipeline::analyze::{classify_failure, AnalysisService};
use crate::prompts::SYSTEM_PROMPT;
use crate::types::Artifact;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{
    AnthropicProvider, ChatMessage, CompletionOptions, ImageData, LLMProvider, OpenAIProvider,
    OpenRouterProvider,
};
use std::sync::Arc;
use tracing::debug;

/// Providers that can be built from an explicit key.
pub const SUPPORTED_PROVIDERS: &[&str] = &["anthropic", "openai", "openrouter"];

/// Model used for `provider_name` when none is configured.
pub fn default_model(provider_name: &str) -> Option<&'static str> {
    match provider_name.trim().to_ascii_lowercase().as_str() {
        "anthropic" => Some(DEFAULT_ALTERNATE_MODEL),
        "openai" => Some("gpt-4.1-mini"),
        "openrouter" => Some("anthropic/claude-sonnet-4"),
        _ => None,
    }
}

/// Wraps an `edgequake-llm` provider as an [`AnalysisService`].
pub struct LlmProviderService {
    name: String,
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
}

impl LlmProviderService {
    pub fn new(name: impl Into<String>, provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            name: name.into(),
            provider,
            temperature: config.temperature,
            max_tokens: config.max_output_tokens,
        }
    }

    /// Build the named provider with an explicit `api_key`.
    ///
    /// Fails with [`ConcallError::Configuration`] for a provider outside
    /// [`SUPPORTED_PROVIDERS`].
    pub fn with_api_key(
        provider_name: &str,
        api_key: &str,
        model: &str,
        config: &PipelineConfig,
    ) -> Result<Self, ConcallError> {
        let name = provider_name.trim().to_ascii_lowercase();
        let provider: Arc<dyn LLMProvider> = match name.as_str() {
            "anthropic" => Arc::new(AnthropicProvider::new(api_key).with_model(model)),
            "openai" => Arc::new(OpenAIProvider::new(api_key).with_model(model)),
            "openrouter" => Arc::new(OpenRouterProvider::new(api_key).with_model(model)),
            _ => {
                return Err(ConcallError::Configuration {
                    reason: format!(
                        "unsupported alternate provider '{provider_name}' (expected one of: {})",
                        SUPPORTED_PROVIDERS.join(", ")
                    ),
                })
            }
        };
        debug!("Alternate provider {} with model {}", provider.name(), provider.model());
        Ok(Self::new(name, provider, config))
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl AnalysisService for LlmProviderService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze_document(&self, artifact: &Artifact, prompt: &str) -> Result<String, ConcallError> {
        let bytes = artifact.read_bytes().await?;
        let document = ImageData::new(STANDARD.encode(&bytes), artifact.content_type.as_str());
        debug!(
            "Sending {} bytes ({}) inline to {}",
            bytes.len(),
            artifact.content_type,
            self.name
        );

        let messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user_with_images(prompt, vec![document]),
        ];
        let options = self.options();

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| classify_failure(&self.name, e.to_string()))?;

        debug!(
            "{}: {} input tokens, {} output tokens",
            self.name, response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}
