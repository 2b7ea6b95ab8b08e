use crate::providers::ProviderId;
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{provider} request failed ({kind}): {message}")]
    Provider {
        provider: ProviderId,
        kind: ProviderErrorKind,
        status: Option<u16>,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("{provider} stream failed: {message}")]
    Stream {
        provider: ProviderId,
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

/// Underlying cause of a provider or stream failure, e.g. the connection error behind a transport
/// failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Raised while resolving configuration or constructing a client; never after a network call.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown provider {name:?}; supported providers: {supported}")]
    UnknownProvider { name: String, supported: String },

    #[error("no provider requested and DEFAULT_PROVIDER is not set")]
    NoDefaultProvider,

    #[error("missing {field} for provider {provider}")]
    MissingField {
        provider: ProviderId,
        field: &'static str,
    },

    #[error("invalid {field} {value:?}: {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid value for {key}: {source}")]
    InvalidSetting {
        key: String,
        #[source]
        source: Box<ConfigError>,
    },

    #[error("settings file {path}: {message}")]
    Source { path: String, message: String },

    #[error("cannot construct {provider} client: {message}")]
    Client {
        provider: ProviderId,
        message: String,
    },
}

/// Provider-agnostic classification of a vendor failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Authentication,
    RateLimited,
    InvalidRequest,
    Server,
    Transport,
    ResponseFormat,
}

impl ProviderErrorKind {
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            401 | 403 => Self::Authentication,
            429 => Self::RateLimited,
            s if (400..500).contains(&s) => Self::InvalidRequest,
            s if s >= 500 => Self::Server,
            _ => Self::ResponseFormat,
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Authentication => "authentication",
            Self::RateLimited => "rate limited",
            Self::InvalidRequest => "invalid request",
            Self::Server => "server error",
            Self::Transport => "transport",
            Self::ResponseFormat => "unexpected response format",
        };
        f.write_str(s)
    }
}

impl LlmError {
    /// Builds a provider error from a non-success HTTP response, keeping the vendor's own message.
    pub(crate) fn from_response(
        provider: ProviderId,
        status: reqwest::StatusCode,
        body: &str,
    ) -> Self {
        Self::Provider {
            provider,
            kind: ProviderErrorKind::from_status(status),
            status: Some(status.as_u16()),
            message: vendor_error_message(body),
            source: None,
        }
    }

    pub(crate) fn transport(provider: ProviderId, e: reqwest::Error) -> Self {
        Self::Provider {
            provider,
            kind: ProviderErrorKind::Transport,
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
            source: Some(Box::new(e)),
        }
    }

    pub(crate) fn response_format(provider: ProviderId, message: impl Into<String>) -> Self {
        Self::Provider {
            provider,
            kind: ProviderErrorKind::ResponseFormat,
            status: None,
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn stream(provider: ProviderId, message: impl Into<String>) -> Self {
        Self::Stream {
            provider,
            message: message.into(),
            source: None,
        }
    }

    /// The body broke off mid-stream; the transport error is kept as the source.
    pub(crate) fn stream_transport(provider: ProviderId, e: reqwest::Error) -> Self {
        Self::Stream {
            provider,
            message: format!("transport error: {e}"),
            source: Some(Box::new(e)),
        }
    }

    pub fn provider_kind(&self) -> Option<ProviderErrorKind> {
        match self {
            Self::Provider { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Whether a caller-side retry could plausibly succeed. Nothing in this crate retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.provider_kind(),
            Some(
                ProviderErrorKind::RateLimited
                    | ProviderErrorKind::Server
                    | ProviderErrorKind::Transport
            )
        )
    }
}

/// `error.message` (OpenAI-compatible and Anthropic shapes), then `message`, else the raw body.
fn vendor_error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let from_json = parsed.as_ref().and_then(|v| {
        v.pointer("/error/message")
            .or_else(|| v.get("message"))
            .or_else(|| v.get("error"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
    });
    match from_json {
        Some(m) if !m.trim().is_empty() => m,
        _ if body.trim().is_empty() => "empty response body".to_string(),
        _ => body.trim().to_string(),
    }
}
