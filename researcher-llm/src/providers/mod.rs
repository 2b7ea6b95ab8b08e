//! Provider registry.
//!
//! Every supported vendor is one [`ProviderId`] variant plus one [`ProviderSpec`] living in the
//! vendor's own module. [`ProviderId::spec`] is the only place that maps one to the other, so
//! adding a vendor is a new variant, a new module, and one match arm.

mod anthropic;
mod deepseek;
mod openai;
mod siliconflow;

use crate::client::LlmClient;
use crate::config::ProviderConfig;
use crate::error::{ConfigError, LlmError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub(crate) use openai::OpenAiCompatibleClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    OpenAi,
    Anthropic,
    DeepSeek,
    SiliconFlow,
}

/// Static facts about one vendor plus the constructor for its adapter.
pub struct ProviderSpec {
    pub id: ProviderId,
    /// Identifier accepted by [`ProviderId::from_str`] and used in `DEFAULT_PROVIDER`.
    pub name: &'static str,
    /// Prefix of the per-provider settings keys, e.g. `OPENAI` for `OPENAI_API_KEY`.
    pub env_prefix: &'static str,
    pub default_model: &'static str,
    pub default_base_url: &'static str,
    pub(crate) build: fn(ProviderConfig) -> Result<Box<dyn LlmClient>>,
}

impl fmt::Debug for ProviderSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSpec")
            .field("id", &self.id)
            .field("env_prefix", &self.env_prefix)
            .field("default_model", &self.default_model)
            .field("default_base_url", &self.default_base_url)
            .finish()
    }
}

impl ProviderSpec {
    pub fn api_key_var(&self) -> String {
        format!("{}_API_KEY", self.env_prefix)
    }

    pub fn model_var(&self) -> String {
        format!("{}_MODEL", self.env_prefix)
    }

    pub fn base_url_var(&self) -> String {
        format!("{}_BASE_URL", self.env_prefix)
    }

    pub fn temperature_var(&self) -> String {
        format!("{}_TEMPERATURE", self.env_prefix)
    }

    pub fn max_tokens_var(&self) -> String {
        format!("{}_MAX_TOKENS", self.env_prefix)
    }
}

impl ProviderId {
    pub const ALL: [ProviderId; 4] = [
        ProviderId::OpenAi,
        ProviderId::Anthropic,
        ProviderId::DeepSeek,
        ProviderId::SiliconFlow,
    ];

    pub fn spec(self) -> &'static ProviderSpec {
        match self {
            ProviderId::OpenAi => &openai::SPEC,
            ProviderId::Anthropic => &anthropic::SPEC,
            ProviderId::DeepSeek => &deepseek::SPEC,
            ProviderId::SiliconFlow => &siliconflow::SPEC,
        }
    }

    pub fn as_str(self) -> &'static str {
        self.spec().name
    }

    pub(crate) fn supported_list() -> String {
        Self::ALL
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ConfigError::UnknownProvider {
                name: wanted.to_string(),
                supported: Self::supported_list(),
            })
    }
}

/// Builds the adapter registered for `config.provider()`.
pub(crate) fn build_client(config: ProviderConfig) -> Result<Box<dyn LlmClient>> {
    let spec = config.provider().spec();
    (spec.build)(config)
}

/// Shared HTTP client construction; a failure is a construction-time configuration error.
pub(crate) fn http_client(
    provider: ProviderId,
    headers: reqwest::header::HeaderMap,
) -> std::result::Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(std::time::Duration::from_secs(120))
        .build()
        .map_err(|e| ConfigError::Client {
            provider,
            message: e.to_string(),
        })
}

/// Turns a secret into a sensitive header value, rejecting bytes the HTTP stack cannot carry.
pub(crate) fn secret_header(
    provider: ProviderId,
    value: &str,
) -> std::result::Result<reqwest::header::HeaderValue, ConfigError> {
    let mut v = reqwest::header::HeaderValue::from_str(value).map_err(|_| {
        ConfigError::InvalidField {
            field: "api_key",
            value: "<redacted>".to_string(),
            reason: format!("{provider} key contains characters that cannot be sent in an HTTP header"),
        }
    })?;
    v.set_sensitive(true);
    Ok(v)
}

/// POSTs `body` as JSON and returns the response if its status is a success; otherwise the
/// body is read and turned into a classified provider error.
pub(crate) async fn post_json<T: serde::Serialize + ?Sized>(
    provider: ProviderId,
    http: &reqwest::Client,
    url: &str,
    body: &T,
) -> Result<reqwest::Response> {
    let response = http
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| LlmError::transport(provider, e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(%provider, %status, "vendor returned an error status");
        return Err(LlmError::from_response(provider, status, &body));
    }
    Ok(response)
}

/// Drops keys the adapter computes itself so extras can never shadow them.
pub(crate) fn extra_without(
    extra: &serde_json::Map<String, serde_json::Value>,
    reserved: &[&str],
) -> serde_json::Map<String, serde_json::Value> {
    extra
        .iter()
        .filter(|(k, _)| !reserved.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
