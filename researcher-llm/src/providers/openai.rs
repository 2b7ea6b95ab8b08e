use super::{ProviderId, ProviderSpec, extra_without, http_client, post_json, secret_header};
use crate::client::{CallParams, LlmClient};
use crate::config::{ProviderConfig, expose_key};
use crate::error::{ConfigError, LlmError, Result};
use crate::stream::{EventDecoder, SseEvent, Step, TextStream, decode_sse, text_stream};
use crate::types::{GenerationOptions, Message};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub(crate) static SPEC: ProviderSpec = ProviderSpec {
    id: ProviderId::OpenAi,
    name: "openai",
    env_prefix: "OPENAI",
    default_model: "gpt-4",
    default_base_url: "https://api.openai.com/v1",
    build,
};

fn build(config: ProviderConfig) -> Result<Box<dyn LlmClient>> {
    Ok(Box::new(OpenAiCompatibleClient::new(config)?))
}

const RESERVED_KEYS: &[&str] = &[
    "model",
    "messages",
    "temperature",
    "max_tokens",
    "stream",
];

/// Client for the `chat/completions` wire format. OpenAI itself, DeepSeek and SiliconFlow all
/// speak it; only their registry entries differ.
pub(crate) struct OpenAiCompatibleClient {
    config: ProviderConfig,
    http: reqwest::Client,
    url: String,
}

impl OpenAiCompatibleClient {
    pub(crate) fn new(config: ProviderConfig) -> std::result::Result<Self, ConfigError> {
        let provider = config.provider();
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            secret_header(provider, &format!("Bearer {}", expose_key(&config)))?,
        );
        let http = http_client(provider, headers)?;
        let url = config.endpoint("chat/completions");
        Ok(Self { config, http, url })
    }

    fn request<'a>(
        &'a self,
        messages: &'a [Message],
        params: &'a CallParams,
        stream: bool,
    ) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &params.model,
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens.limit(),
            stream: stream.then_some(true),
            extra: extra_without(self.config.extra(), RESERVED_KEYS),
        }
    }
}

impl fmt::Debug for OpenAiCompatibleClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiCompatibleClient")
            .field("provider", &self.config.provider())
            .field("model", &self.config.model())
            .field("url", &self.url)
            .finish()
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    #[tracing::instrument(level = "info", skip_all, fields(provider = %self.config.provider()))]
    async fn invoke(&self, messages: &[Message], options: &GenerationOptions) -> Result<Message> {
        let provider = self.config.provider();
        let params = CallParams::merge(&self.config, options)?;
        tracing::debug!(model = %params.model, messages = messages.len(), "chat completion");

        let req = self.request(messages, &params, false);
        let response = post_json(provider, &self.http, &self.url, &req).await?;
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::transport(provider, e))?;

        let parsed: ChatCompletionResponse = serde_json::from_str(&body).map_err(|e| {
            LlmError::response_format(provider, format!("chat completion json error={e}"))
        })?;
        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            LlmError::response_format(provider, "chat completion has no choices")
        })?;
        tracing::debug!(
            finish_reason = choice.finish_reason.as_deref().unwrap_or("unknown"),
            "chat completion finished"
        );
        Ok(Message::assistant(choice.message.content.unwrap_or_default()))
    }

    #[tracing::instrument(level = "info", skip_all, fields(provider = %self.config.provider()))]
    async fn stream_generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<TextStream> {
        let provider = self.config.provider();
        let params = CallParams::merge(&self.config, options)?;
        let messages = [Message::user(prompt)];
        tracing::debug!(model = %params.model, "streaming chat completion");

        let req = self.request(&messages, &params, true);
        let response = post_json(provider, &self.http, &self.url, &req).await?;
        let sse = decode_sse(provider, response.bytes_stream());
        Ok(text_stream(
            provider,
            sse,
            ChunkDecoder {
                provider,
                finished: false,
            },
        ))
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<StreamErrorBody>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamErrorBody {
    #[serde(default)]
    message: String,
}

/// `data: {...}` chunks until `data: [DONE]`. A body that closes after a chunk carrying a
/// `finish_reason` is also accepted as complete.
struct ChunkDecoder {
    provider: ProviderId,
    finished: bool,
}

impl EventDecoder for ChunkDecoder {
    fn on_event(&mut self, event: SseEvent) -> Step {
        let data = event.data.trim();
        if data == "[DONE]" {
            return Step::Done;
        }
        if data.is_empty() {
            return Step::Skip;
        }

        let chunk: StreamChunk = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                return Step::Fail(LlmError::stream(
                    self.provider,
                    format!("chunk json error={e} data={data}"),
                ));
            }
        };
        if let Some(err) = chunk.error {
            return Step::Fail(LlmError::stream(self.provider, err.message));
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return Step::Skip;
        };
        if choice.finish_reason.is_some() {
            self.finished = true;
        }
        match choice.delta.content {
            Some(content) if !content.is_empty() => Step::Emit(content),
            _ => Step::Skip,
        }
    }

    fn on_close(&mut self) -> Step {
        if self.finished {
            Step::Done
        } else {
            Step::Fail(LlmError::stream(
                self.provider,
                "connection closed before the completion signal",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Overrides, Resolver};
    use crate::source::MapSource;
    use crate::types::MaxTokens;
    use futures_util::StreamExt;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, overrides: Overrides) -> OpenAiCompatibleClient {
        let config = Resolver::new(&MapSource::new())
            .resolve(
                ProviderId::OpenAi,
                overrides.api_key("sk-test").base_url(server.uri()),
            )
            .expect("resolve");
        OpenAiCompatibleClient::new(config).expect("client")
    }

    fn sse_body(events: &[&str]) -> String {
        events.iter().map(|e| format!("data: {e}\n\n")).collect()
    }

    #[tokio::test]
    async fn invoke_sends_messages_in_order_and_returns_assistant_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4",
                "temperature": 0.5,
                "max_tokens": 128,
                "top_p": 0.9,
                "messages": [
                    {"role": "system", "content": "You are helpful."},
                    {"role": "user", "content": "Hello"},
                ],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {"role": "assistant", "content": "Hi there!"},
                    "finish_reason": "stop",
                }],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let c = client(
            &server,
            Overrides::new()
                .model("gpt-4")
                .temperature(0.5)
                .max_tokens(128u32)
                .extra("top_p", 0.9)
                .extra("model", "ignored"),
        );
        let reply = c
            .invoke(
                &[Message::system("You are helpful."), Message::user("Hello")],
                &GenerationOptions::new(),
            )
            .await
            .expect("invoke");
        assert_eq!(reply, Message::assistant("Hi there!"));
    }

    #[tokio::test]
    async fn per_call_options_win_for_that_call_only() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"model": "gpt-4o", "temperature": 0.0})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "override"}}],
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"model": "gpt-4"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "baked"}}],
            })))
            .mount(&server)
            .await;

        let c = client(&server, Overrides::new().model("gpt-4"));
        let opts = GenerationOptions::new().model("gpt-4o").temperature(0.0);
        assert_eq!(c.generate("q", &opts).await.expect("generate"), "override");
        assert_eq!(
            c.generate("q", &GenerationOptions::new()).await.expect("generate"),
            "baked"
        );
        assert_eq!(c.model(), "gpt-4");
    }

    #[tokio::test]
    async fn unbounded_max_tokens_is_omitted() {
        let c = {
            let server = MockServer::start().await;
            client(&server, Overrides::new().max_tokens(MaxTokens::Unbounded))
        };
        let params = CallParams::merge(c.config(), &GenerationOptions::new()).expect("params");
        let messages = [Message::user("x")];
        let body = serde_json::to_value(c.request(&messages, &params, true)).expect("json");
        assert!(body.get("max_tokens").is_none());
        assert_eq!(body["stream"], json!(true));
    }

    #[tokio::test]
    async fn invalid_per_call_temperature_is_a_config_error() {
        let server = MockServer::start().await;
        let c = client(&server, Overrides::new());
        let err = c
            .generate("q", &GenerationOptions::new().temperature(2.5))
            .await
            .expect_err("bad temperature");
        assert!(matches!(err, LlmError::Config(ConfigError::InvalidField { .. })));
    }

    #[tokio::test]
    async fn error_status_is_classified_with_vendor_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"message": "Incorrect API key provided", "type": "invalid_request_error"},
            })))
            .mount(&server)
            .await;

        let c = client(&server, Overrides::new());
        let err = c
            .invoke(&[Message::user("hi")], &GenerationOptions::new())
            .await
            .expect_err("401");
        match err {
            LlmError::Provider {
                provider,
                kind,
                status,
                message,
                source,
            } => {
                assert!(source.is_none());
                assert_eq!(provider, ProviderId::OpenAi);
                assert_eq!(kind, crate::error::ProviderErrorKind::Authentication);
                assert_eq!(status, Some(401));
                assert_eq!(message, "Incorrect API key provided");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn refused_connection_keeps_its_cause() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("addr").port()
        };
        let config = Resolver::new(&MapSource::new())
            .resolve(
                ProviderId::OpenAi,
                Overrides::new()
                    .api_key("sk-test")
                    .base_url(format!("http://127.0.0.1:{port}")),
            )
            .expect("resolve");
        let c = OpenAiCompatibleClient::new(config).expect("client");

        let err = c
            .generate("hi", &GenerationOptions::new())
            .await
            .expect_err("closed port");
        assert_eq!(err.provider_kind(), Some(crate::error::ProviderErrorKind::Transport));
        assert!(err.is_retryable());
        let source = std::error::Error::source(&err).expect("transport cause");
        assert!(source.downcast_ref::<reqwest::Error>().is_some());
    }

    #[tokio::test]
    async fn stream_concatenation_matches_generate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_body(&[
                        r#"{"choices":[{"delta":{"role":"assistant"}}]}"#,
                        r#"{"choices":[{"delta":{"content":"Hello"}}]}"#,
                        r#"{"choices":[{"delta":{"content":", world"}}]}"#,
                        r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
                        "[DONE]",
                    ])),
            )
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "Hello, world"}}],
            })))
            .mount(&server)
            .await;

        let c = client(&server, Overrides::new().temperature(0.0));
        let opts = GenerationOptions::new();
        let chunks: Vec<String> = c
            .stream_generate("greet", &opts)
            .await
            .expect("stream")
            .map(|c| c.expect("chunk"))
            .collect()
            .await;
        assert_eq!(chunks, vec!["Hello".to_string(), ", world".to_string()]);
        assert_eq!(chunks.concat(), c.generate("greet", &opts).await.expect("generate"));
    }

    #[tokio::test]
    async fn malformed_chunk_ends_stream_after_earlier_chunks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&[
                r#"{"choices":[{"delta":{"content":"partial"}}]}"#,
                "{not json",
                r#"{"choices":[{"delta":{"content":"unreachable"}}]}"#,
                "[DONE]",
            ])))
            .mount(&server)
            .await;

        let c = client(&server, Overrides::new());
        let mut s = c
            .stream_generate("q", &GenerationOptions::new())
            .await
            .expect("stream");
        assert_eq!(s.next().await.expect("item").expect("chunk"), "partial");
        assert!(matches!(s.next().await, Some(Err(LlmError::Stream { .. }))));
        assert!(s.next().await.is_none());
    }

    #[tokio::test]
    async fn stream_without_completion_signal_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&[
                r#"{"choices":[{"delta":{"content":"cut"}}]}"#,
            ])))
            .mount(&server)
            .await;

        let c = client(&server, Overrides::new());
        let s = c
            .stream_generate("q", &GenerationOptions::new())
            .await
            .expect("stream");
        let items: Vec<Result<String>> = s.collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().expect("chunk"), "cut");
        assert!(matches!(items[1], Err(LlmError::Stream { .. })));
    }

    #[tokio::test]
    async fn stream_request_failure_is_returned_before_any_chunk() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let c = client(&server, Overrides::new());
        let err = c
            .stream_generate("q", &GenerationOptions::new())
            .await
            .expect_err("429");
        assert!(err.is_retryable());
        assert_eq!(
            err.provider_kind(),
            Some(crate::error::ProviderErrorKind::RateLimited)
        );
    }

    #[test]
    fn control_characters_in_key_fail_at_construction() {
        let config = Resolver::new(&MapSource::new())
            .resolve(ProviderId::OpenAi, Overrides::new().api_key("sk-\nbad"))
            .expect("resolve");
        let err = OpenAiCompatibleClient::new(config).expect_err("bad header");
        assert!(matches!(err, ConfigError::InvalidField { field: "api_key", .. }));
        assert!(!err.to_string().contains("sk-"));
    }
}
