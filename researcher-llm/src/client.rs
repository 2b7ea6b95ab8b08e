use crate::config::ProviderConfig;
use crate::error::Result;
use crate::providers::ProviderId;
use crate::stream::TextStream;
use crate::types::{GenerationOptions, Message};
use async_trait::async_trait;
use std::fmt;

/// The capability contract every vendor adapter implements.
///
/// A client is bound to one provider for its whole life and keeps no conversation state: callers
/// pass the full history to [`LlmClient::invoke`] each time.
#[async_trait]
pub trait LlmClient: Send + Sync + fmt::Debug {
    /// The resolved configuration this client was built from.
    fn config(&self) -> &ProviderConfig;

    fn provider(&self) -> ProviderId {
        self.config().provider()
    }

    fn model(&self) -> &str {
        self.config().model()
    }

    /// Sends `messages` in order and returns the single assistant reply.
    async fn invoke(&self, messages: &[Message], options: &GenerationOptions) -> Result<Message>;

    /// `invoke([user(prompt)])`, returning only the reply text.
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        let reply = self.invoke(&[Message::user(prompt)], options).await?;
        Ok(reply.content)
    }

    /// Streams the reply to a single user prompt as text chunks.
    ///
    /// Request-level failures (bad status before any chunk) are returned here; failures after the
    /// first byte of the body surface as the final item of the stream.
    async fn stream_generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<TextStream>;
}

/// Model, temperature and max tokens for one call: per-call options over the client's config.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CallParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: crate::types::MaxTokens,
}

impl CallParams {
    pub fn merge(config: &ProviderConfig, options: &GenerationOptions) -> Result<Self> {
        let temperature = match options.temperature {
            Some(t) => crate::types::validate_temperature(t)?,
            None => config.temperature(),
        };
        let max_tokens = match options.max_tokens {
            Some(m) => m.validate()?,
            None => config.max_tokens(),
        };
        let model = options
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(config.model())
            .to_string();
        Ok(Self {
            model,
            temperature,
            max_tokens,
        })
    }
}
