//! Provider-agnostic chat LLM clients.
//!
//! [`LlmFactory`] resolves which vendor to talk to and with which credentials, then hands back a
//! [`LlmClient`] exposing `invoke`, `generate` and `stream_generate`. Pure HTTP, no vendor SDKs.

mod client;
mod config;
mod error;
mod factory;
mod providers;
mod source;
mod stream;
mod types;

pub use client::LlmClient;
pub use config::{
    DEFAULT_MAX_TOKENS, DEFAULT_PROVIDER_VAR, DEFAULT_TEMPERATURE, MAX_TOKENS_VAR, Origin,
    Overrides, ProviderConfig, Resolver, TEMPERATURE_VAR,
};
pub use error::{BoxError, ConfigError, LlmError, ProviderErrorKind, Result};
pub use factory::LlmFactory;
pub use providers::{ProviderId, ProviderSpec};
pub use source::{ConfigSource, EnvSource, Layered, MapSource, TomlSource};
pub use stream::TextStream;
pub use types::{GenerationOptions, MaxTokens, Message, Role};
