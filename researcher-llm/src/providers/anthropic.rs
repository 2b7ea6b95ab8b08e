use super::{ProviderId, ProviderSpec, extra_without, http_client, post_json, secret_header};
use crate::client::{CallParams, LlmClient};
use crate::config::{ProviderConfig, expose_key};
use crate::error::{ConfigError, LlmError, Result};
use crate::stream::{EventDecoder, SseEvent, Step, TextStream, decode_sse, text_stream};
use crate::types::{GenerationOptions, Message, Role};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub(crate) static SPEC: ProviderSpec = ProviderSpec {
    id: ProviderId::Anthropic,
    name: "anthropic",
    env_prefix: "ANTHROPIC",
    default_model: "claude-3-sonnet-20240229",
    default_base_url: "https://api.anthropic.com/v1",
    build,
};

fn build(config: ProviderConfig) -> Result<Box<dyn LlmClient>> {
    Ok(Box::new(AnthropicClient::new(config)?))
}

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// The Messages API requires `max_tokens`; this is sent when the caller asked for no limit.
const UNBOUNDED_MAX_TOKENS: u32 = 4096;

const RESERVED_KEYS: &[&str] = &[
    "model",
    "messages",
    "system",
    "temperature",
    "max_tokens",
    "stream",
];

pub(crate) struct AnthropicClient {
    config: ProviderConfig,
    http: reqwest::Client,
    url: String,
}

impl AnthropicClient {
    pub(crate) fn new(config: ProviderConfig) -> std::result::Result<Self, ConfigError> {
        let provider = config.provider();
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("x-api-key", secret_header(provider, expose_key(&config))?);
        headers.insert(
            "anthropic-version",
            reqwest::header::HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        let http = http_client(provider, headers)?;
        let url = config.endpoint("messages");
        Ok(Self { config, http, url })
    }

    fn request<'a>(
        &self,
        messages: &'a [Message],
        params: &'a CallParams,
        stream: bool,
    ) -> MessagesRequest<'a> {
        let mut system = String::new();
        let mut turns = Vec::with_capacity(messages.len());

        for m in messages {
            match m.role {
                Role::System => {
                    if !system.is_empty() {
                        system.push('\n');
                    }
                    system.push_str(&m.content);
                }
                Role::User | Role::Assistant => turns.push(Turn {
                    role: m.role.as_str(),
                    content: &m.content,
                }),
            }
        }

        MessagesRequest {
            model: &params.model,
            max_tokens: params.max_tokens.limit().unwrap_or(UNBOUNDED_MAX_TOKENS),
            system: Some(system).filter(|s| !s.is_empty()),
            messages: turns,
            temperature: params.temperature,
            stream: stream.then_some(true),
            extra: extra_without(self.config.extra(), RESERVED_KEYS),
        }
    }
}

impl fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("model", &self.config.model())
            .field("url", &self.url)
            .finish()
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    #[tracing::instrument(level = "info", skip_all, fields(provider = "anthropic"))]
    async fn invoke(&self, messages: &[Message], options: &GenerationOptions) -> Result<Message> {
        let provider = self.config.provider();
        let params = CallParams::merge(&self.config, options)?;
        tracing::debug!(model = %params.model, messages = messages.len(), "messages request");

        let req = self.request(messages, &params, false);
        let response = post_json(provider, &self.http, &self.url, &req).await?;
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::transport(provider, e))?;

        let parsed: MessagesResponse = serde_json::from_str(&body).map_err(|e| {
            LlmError::response_format(provider, format!("messages json error={e}"))
        })?;
        tracing::debug!(stop_reason = %parsed.stop_reason, "messages request finished");

        let mut content = String::new();
        for block in parsed.content {
            if let ContentBlock::Text { text } = block {
                content.push_str(&text);
            }
        }
        Ok(Message::assistant(content))
    }

    #[tracing::instrument(level = "info", skip_all, fields(provider = "anthropic"))]
    async fn stream_generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<TextStream> {
        let provider = self.config.provider();
        let params = CallParams::merge(&self.config, options)?;
        let messages = [Message::user(prompt)];
        tracing::debug!(model = %params.model, "streaming messages request");

        let req = self.request(&messages, &params, true);
        let response = post_json(provider, &self.http, &self.url, &req).await?;
        let sse = decode_sse(provider, response.bytes_stream());
        Ok(text_stream(provider, sse, EventsDecoder { provider }))
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Turn<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct Turn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ContentBlockDelta {
    delta: Delta,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ErrorEvent {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    r#type: String,
    #[serde(default)]
    message: String,
}

/// Named events: text arrives in `content_block_delta`, `message_stop` ends the stream and an
/// `error` event fails it.
struct EventsDecoder {
    provider: ProviderId,
}

impl EventDecoder for EventsDecoder {
    fn on_event(&mut self, event: SseEvent) -> Step {
        match event.event.as_str() {
            "content_block_delta" => {
                let v: ContentBlockDelta = match serde_json::from_str(&event.data) {
                    Ok(v) => v,
                    Err(e) => {
                        return Step::Fail(LlmError::stream(
                            self.provider,
                            format!("delta json error={e} data={}", event.data),
                        ));
                    }
                };
                match v.delta {
                    Delta::TextDelta { text } if !text.is_empty() => Step::Emit(text),
                    _ => Step::Skip,
                }
            }
            "message_stop" => Step::Done,
            "error" => {
                let message = match serde_json::from_str::<ErrorEvent>(&event.data) {
                    Ok(v) => format!("{}: {}", v.error.r#type, v.error.message),
                    Err(_) => event.data,
                };
                Step::Fail(LlmError::stream(self.provider, message))
            }
            _ => Step::Skip,
        }
    }

    fn on_close(&mut self) -> Step {
        Step::Fail(LlmError::stream(
            self.provider,
            "connection closed before message_stop",
        ))
    }
}
