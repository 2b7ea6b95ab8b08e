use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One turn of a conversation. A conversation is an ordered `[Message]`; adapters forward it in
/// the order given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Upper bound on generated tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxTokens {
    Limit(u32),
    Unbounded,
}

impl MaxTokens {
    /// The numeric limit, or `None` for [`MaxTokens::Unbounded`].
    pub fn limit(self) -> Option<u32> {
        match self {
            MaxTokens::Limit(n) => Some(n),
            MaxTokens::Unbounded => None,
        }
    }

    pub(crate) fn validate(self) -> std::result::Result<Self, ConfigError> {
        match self {
            MaxTokens::Limit(0) => Err(ConfigError::InvalidField {
                field: "max_tokens",
                value: "0".to_string(),
                reason: "must be a positive integer or unbounded".to_string(),
            }),
            other => Ok(other),
        }
    }
}

impl From<u32> for MaxTokens {
    fn from(n: u32) -> Self {
        MaxTokens::Limit(n)
    }
}

impl fmt::Display for MaxTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaxTokens::Limit(n) => write!(f, "{n}"),
            MaxTokens::Unbounded => f.write_str("unbounded"),
        }
    }
}

impl FromStr for MaxTokens {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unbounded") || s.eq_ignore_ascii_case("none") {
            return Ok(MaxTokens::Unbounded);
        }
        let n: u32 = s.parse().map_err(|_| ConfigError::InvalidField {
            field: "max_tokens",
            value: s.to_string(),
            reason: "expected a positive integer or \"unbounded\"".to_string(),
        })?;
        MaxTokens::Limit(n).validate()
    }
}

pub(crate) const MIN_TEMPERATURE: f32 = 0.0;
pub(crate) const MAX_TEMPERATURE: f32 = 2.0;

/// Rejects NaN and anything outside `[0.0, 2.0]`.
pub(crate) fn validate_temperature(t: f32) -> std::result::Result<f32, ConfigError> {
    if (MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&t) {
        return Ok(t);
    }
    Err(ConfigError::InvalidField {
        field: "temperature",
        value: t.to_string(),
        reason: format!("must lie in [{MIN_TEMPERATURE:.1}, {MAX_TEMPERATURE:.1}]"),
    })
}

/// Per-call overrides. Unset fields fall back to the client's resolved configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<MaxTokens>,
}

impl GenerationOptions {
    pub fn new() -> Self {
        Self::default()
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
}
