//! Configuration resolution.
//!
//! Each field is taken from, in order: the explicit [`Overrides`] passed by the caller, the
//! injected [`ConfigSource`] (per-provider key before global key), then the provider's built-in
//! default. The result is a fully validated [`ProviderConfig`]; nothing partially resolved ever
//! reaches an adapter.

use crate::error::ConfigError;
use crate::providers::ProviderId;
use crate::source::ConfigSource;
use crate::types::{MaxTokens, validate_temperature};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;

pub const DEFAULT_PROVIDER_VAR: &str = "DEFAULT_PROVIDER";
pub const TEMPERATURE_VAR: &str = "TEMPERATURE";
pub const MAX_TOKENS_VAR: &str = "MAX_TOKENS";

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: MaxTokens = MaxTokens::Limit(4096);

type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Fully resolved, validated parameters for one client.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    provider: ProviderId,
    api_key: SecretString,
    model: String,
    temperature: f32,
    max_tokens: MaxTokens,
    base_url: String,
    extra: serde_json::Map<String, serde_json::Value>,
}

impl ProviderConfig {
    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    pub fn api_key(&self) -> &SecretString {
        &self.api_key
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn max_tokens(&self) -> MaxTokens {
        self.max_tokens
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Vendor-specific request options, merged into the request body by the adapter.
    pub fn extra(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.extra
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// Explicit call-site values. Anything set here wins over every other source.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<MaxTokens>,
    pub base_url: Option<String>,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: impl Into<MaxTokens>) -> Self {
        self.max_tokens = Some(max_tokens.into());
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Override,
    Setting(String),
    Default,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Override => f.write_str("override"),
            Origin::Setting(key) => write!(f, "setting {key}"),
            Origin::Default => f.write_str("default"),
        }
    }
}

pub struct Resolver<'a> {
    source: &'a dyn ConfigSource,
}

impl<'a> Resolver<'a> {
    pub fn new(source: &'a dyn ConfigSource) -> Self {
        Self { source }
    }

    /// The requested provider, else `DEFAULT_PROVIDER`. There is no fallback beyond that.
    pub fn provider(&self, requested: Option<ProviderId>) -> ConfigResult<ProviderId> {
        if let Some(p) = requested {
            return Ok(p);
        }
        let name = self
            .source
            .get(DEFAULT_PROVIDER_VAR)
            .ok_or(ConfigError::NoDefaultProvider)?;
        let provider: ProviderId = name.parse()?;
        tracing::debug!(%provider, "using default provider");
        Ok(provider)
    }

    /// Whether an API key is available for `provider` from settings alone.
    pub fn has_api_key(&self, provider: ProviderId) -> bool {
        self.source.get(&provider.spec().api_key_var()).is_some()
    }

    #[tracing::instrument(level = "debug", skip_all, fields(%provider))]
    pub fn resolve(
        &self,
        provider: ProviderId,
        overrides: Overrides,
    ) -> ConfigResult<ProviderConfig> {
        let spec = provider.spec();

        let (api_key, origin) = match overrides.api_key {
            Some(k) => (k.trim().to_string(), Origin::Override),
            None => {
                let key = spec.api_key_var();
                let v = self.source.get(&key).ok_or(ConfigError::MissingField {
                    provider,
                    field: "api_key",
                })?;
                (v, Origin::Setting(key))
            }
        };
        tracing::debug!(field = "api_key", source = %origin, "resolved");
        if api_key.is_empty() {
            return Err(ConfigError::InvalidField {
                field: "api_key",
                value: String::new(),
                reason: "must not be empty".to_string(),
            });
        }

        let (model, origin) = self.string_field(
            overrides.model,
            &spec.model_var(),
            spec.default_model,
        );
        tracing::debug!(field = "model", %model, source = %origin, "resolved");
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidField {
                field: "model",
                value: model,
                reason: "must not be empty".to_string(),
            });
        }

        let (temperature, origin) = match overrides.temperature {
            Some(t) => (validate_temperature(t)?, Origin::Override),
            None => self
                .setting(&[spec.temperature_var(), TEMPERATURE_VAR.to_string()], |raw| {
                    let t: f32 = raw.parse().map_err(|_| ConfigError::InvalidField {
                        field: "temperature",
                        value: raw.to_string(),
                        reason: "expected a number".to_string(),
                    })?;
                    validate_temperature(t)
                })?
                .unwrap_or((DEFAULT_TEMPERATURE, Origin::Default)),
        };
        tracing::debug!(field = "temperature", temperature, source = %origin, "resolved");

        let (max_tokens, origin) = match overrides.max_tokens {
            Some(m) => (m.validate()?, Origin::Override),
            None => self
                .setting(&[spec.max_tokens_var(), MAX_TOKENS_VAR.to_string()], |raw| {
                    raw.parse::<MaxTokens>()
                })?
                .unwrap_or((DEFAULT_MAX_TOKENS, Origin::Default)),
        };
        tracing::debug!(field = "max_tokens", %max_tokens, source = %origin, "resolved");

        let (base_url, origin) = self.string_field(
            overrides.base_url,
            &spec.base_url_var(),
            spec.default_base_url,
        );
        let base_url = normalize_base_url(&base_url)?;
        tracing::debug!(field = "base_url", %base_url, source = %origin, "resolved");

        Ok(ProviderConfig {
            provider,
            api_key: SecretString::from(api_key),
            model,
            temperature,
            max_tokens,
            base_url,
            extra: overrides.extra,
        })
    }

    fn string_field(
        &self,
        explicit: Option<String>,
        key: &str,
        default: &str,
    ) -> (String, Origin) {
        if let Some(v) = explicit {
            return (v.trim().to_string(), Origin::Override);
        }
        if let Some(v) = self.source.get(key) {
            return (v, Origin::Setting(key.to_string()));
        }
        (default.to_string(), Origin::Default)
    }

    /// First key that has a value, parsed. A value that fails to parse is an error naming the key.
    fn setting<T>(
        &self,
        keys: &[String],
        parse: impl Fn(&str) -> ConfigResult<T>,
    ) -> ConfigResult<Option<(T, Origin)>> {
        for key in keys {
            if let Some(raw) = self.source.get(key) {
                let v = parse(&raw).map_err(|e| ConfigError::InvalidSetting {
                    key: key.clone(),
                    source: Box::new(e),
                })?;
                return Ok(Some((v, Origin::Setting(key.clone()))));
            }
        }
        Ok(None)
    }
}

fn normalize_base_url(raw: &str) -> ConfigResult<String> {
    let invalid = |reason: &str| ConfigError::InvalidField {
        field: "base_url",
        value: raw.to_string(),
        reason: reason.to_string(),
    };
    let url = reqwest::Url::parse(raw.trim()).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}

/// Adapters call this when building auth headers; nothing else should see the raw key.
pub(crate) fn expose_key(config: &ProviderConfig) -> &str {
    config.api_key.expose_secret()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MapSource;

    fn resolve(src: &MapSource, provider: ProviderId, o: Overrides) -> ConfigResult<ProviderConfig> {
        Resolver::new(src).resolve(provider, o)
    }

    #[test]
    fn override_beats_setting_beats_default() {
        let src = MapSource::new()
            .with("OPENAI_API_KEY", "env-key")
            .with("OPENAI_MODEL", "gpt-4o-mini")
            .with("TEMPERATURE", "0.3")
            .with("MAX_TOKENS", "256");

        let all_overridden = resolve(
            &src,
            ProviderId::OpenAi,
            Overrides::new()
                .api_key("call-key")
                .model("gpt-4")
                .temperature(1.5)
                .max_tokens(64u32),
        )
        .expect("resolve");
        assert_eq!(expose_key(&all_overridden), "call-key");
        assert_eq!(all_overridden.model(), "gpt-4");
        assert_eq!(all_overridden.temperature(), 1.5);
        assert_eq!(all_overridden.max_tokens(), MaxTokens::Limit(64));

        let from_settings = resolve(&src, ProviderId::OpenAi, Overrides::new()).expect("resolve");
        assert_eq!(expose_key(&from_settings), "env-key");
        assert_eq!(from_settings.model(), "gpt-4o-mini");
        assert_eq!(from_settings.temperature(), 0.3);
        assert_eq!(from_settings.max_tokens(), MaxTokens::Limit(256));

        let defaults = resolve(
            &MapSource::new(),
            ProviderId::OpenAi,
            Overrides::new().api_key("k"),
        )
        .expect("resolve");
        assert_eq!(defaults.model(), "gpt-4");
        assert_eq!(defaults.temperature(), DEFAULT_TEMPERATURE);
        assert_eq!(defaults.max_tokens(), DEFAULT_MAX_TOKENS);
        assert_eq!(defaults.base_url(), "https://api.openai.com/v1");
    }

    #[test]
    fn per_provider_setting_beats_global_setting() {
        let src = MapSource::new()
            .with("ANTHROPIC_API_KEY", "k")
            .with("ANTHROPIC_TEMPERATURE", "0.1")
            .with("TEMPERATURE", "0.9")
            .with("ANTHROPIC_MAX_TOKENS", "unbounded")
            .with("MAX_TOKENS", "100");
        let cfg = resolve(&src, ProviderId::Anthropic, Overrides::new()).expect("resolve");
        assert_eq!(cfg.temperature(), 0.1);
        assert_eq!(cfg.max_tokens(), MaxTokens::Unbounded);
        assert_eq!(cfg.model(), "claude-3-sonnet-20240229");
    }

    #[test]
    fn each_provider_reads_its_own_key() {
        let src = MapSource::new()
            .with("OPENAI_API_KEY", "o")
            .with("ANTHROPIC_API_KEY", "a")
            .with("DEEPSEEK_API_KEY", "d")
            .with("SILICONFLOW_API_KEY", "s");
        for (p, want) in [
            (ProviderId::OpenAi, "o"),
            (ProviderId::Anthropic, "a"),
            (ProviderId::DeepSeek, "d"),
            (ProviderId::SiliconFlow, "s"),
        ] {
            let cfg = resolve(&src, p, Overrides::new()).expect("resolve");
            assert_eq!(expose_key(&cfg), want);
            assert_eq!(cfg.model(), p.spec().default_model);
        }
    }

    #[test]
    fn missing_key_names_field_and_provider() {
        let err = resolve(&MapSource::new(), ProviderId::DeepSeek, Overrides::new())
            .expect_err("missing key");
        assert!(matches!(
            err,
            ConfigError::MissingField {
                provider: ProviderId::DeepSeek,
                field: "api_key"
            }
        ));
        let msg = err.to_string();
        assert!(msg.contains("api_key") && msg.contains("deepseek"));
    }

    #[test]
    fn explicit_empty_key_is_rejected() {
        let src = MapSource::new().with("OPENAI_API_KEY", "env-key");
        let err = resolve(&src, ProviderId::OpenAi, Overrides::new().api_key("  "))
            .expect_err("empty key");
        assert!(matches!(err, ConfigError::InvalidField { field: "api_key", .. }));
    }

    #[test]
    fn explicit_key_is_trimmed_like_settings() {
        let cfg = resolve(
            &MapSource::new(),
            ProviderId::OpenAi,
            Overrides::new().api_key(" sk-x \n"),
        )
        .expect("resolve");
        assert_eq!(expose_key(&cfg), "sk-x");
    }

    #[test]
    fn temperature_boundaries() {
        let src = MapSource::new().with("OPENAI_API_KEY", "k");
        for ok in [0.0, 2.0] {
            assert!(resolve(&src, ProviderId::OpenAi, Overrides::new().temperature(ok)).is_ok());
        }
        for bad in [-0.1, 2.1] {
            let err = resolve(&src, ProviderId::OpenAi, Overrides::new().temperature(bad))
                .expect_err("out of range");
            assert!(matches!(err, ConfigError::InvalidField { field: "temperature", .. }));
        }
    }

    #[test]
    fn zero_max_tokens_is_rejected() {
        let src = MapSource::new().with("OPENAI_API_KEY", "k");
        let err = resolve(&src, ProviderId::OpenAi, Overrides::new().max_tokens(0u32))
            .expect_err("zero");
        assert!(matches!(err, ConfigError::InvalidField { field: "max_tokens", .. }));
    }

    #[test]
    fn unparseable_settings_name_their_key() {
        let src = MapSource::new()
            .with("OPENAI_API_KEY", "k")
            .with("TEMPERATURE", "warm");
        let err = resolve(&src, ProviderId::OpenAi, Overrides::new()).expect_err("bad setting");
        match err {
            ConfigError::InvalidSetting { key, .. } => assert_eq!(key, "TEMPERATURE"),
            other => panic!("unexpected error: {other:?}"),
        }

        let src = MapSource::new()
            .with("OPENAI_API_KEY", "k")
            .with("OPENAI_TEMPERATURE", "3.5");
        let err = resolve(&src, ProviderId::OpenAi, Overrides::new()).expect_err("bad setting");
        assert!(err.to_string().contains("OPENAI_TEMPERATURE"));
    }

    #[test]
    fn base_url_is_validated_and_normalised() {
        let src = MapSource::new()
            .with("SILICONFLOW_API_KEY", "k")
            .with("SILICONFLOW_BASE_URL", "http://localhost:8080/v1/");
        let cfg = resolve(&src, ProviderId::SiliconFlow, Overrides::new()).expect("resolve");
        assert_eq!(cfg.base_url(), "http://localhost:8080/v1");
        assert_eq!(cfg.endpoint("chat/completions"), "http://localhost:8080/v1/chat/completions");

        let err = resolve(
            &src,
            ProviderId::SiliconFlow,
            Overrides::new().base_url("ftp://example.com"),
        )
        .expect_err("bad scheme");
        assert!(matches!(err, ConfigError::InvalidField { field: "base_url", .. }));
    }

    #[test]
    fn default_provider_comes_from_settings_only() {
        let none = MapSource::new();
        assert!(matches!(
            Resolver::new(&none).provider(None),
            Err(ConfigError::NoDefaultProvider)
        ));

        let src = MapSource::new().with("DEFAULT_PROVIDER", "SiliconFlow");
        assert_eq!(
            Resolver::new(&src).provider(None).expect("default"),
            ProviderId::SiliconFlow
        );
        assert_eq!(
            Resolver::new(&src)
                .provider(Some(ProviderId::Anthropic))
                .expect("explicit"),
            ProviderId::Anthropic
        );

        let bad = MapSource::new().with("DEFAULT_PROVIDER", "acme");
        assert!(matches!(
            Resolver::new(&bad).provider(None),
            Err(ConfigError::UnknownProvider { .. })
        ));
    }

    #[test]
    fn debug_output_redacts_the_key() {
        let src = MapSource::new().with("OPENAI_API_KEY", "sk-very-secret");
        let cfg = resolve(&src, ProviderId::OpenAi, Overrides::new()).expect("resolve");
        assert!(!format!("{cfg:?}").contains("sk-very-secret"));
    }
}
