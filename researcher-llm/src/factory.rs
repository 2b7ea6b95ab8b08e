use crate::client::LlmClient;
use crate::config::{Overrides, ProviderConfig, Resolver};
use crate::error::Result;
use crate::providers::{self, ProviderId};
use crate::source::{ConfigSource, EnvSource};
use std::sync::{Arc, OnceLock};

/// Single entry point for obtaining a client.
///
/// Creation is a pure function of the arguments and the (read-only) settings source, so a
/// factory can be shared across threads and used concurrently without locking.
#[derive(Clone)]
pub struct LlmFactory {
    source: Arc<dyn ConfigSource>,
}

impl LlmFactory {
    pub fn new(source: impl ConfigSource + 'static) -> Self {
        Self {
            source: Arc::new(source),
        }
    }

    /// Factory over a snapshot of the current process environment.
    pub fn from_env() -> Self {
        Self::new(EnvSource::capture())
    }

    /// Process-wide factory; the environment is captured on first use and never re-read.
    pub fn global() -> &'static LlmFactory {
        static GLOBAL: OnceLock<LlmFactory> = OnceLock::new();
        GLOBAL.get_or_init(LlmFactory::from_env)
    }

    pub fn list_providers() -> &'static [ProviderId] {
        &ProviderId::ALL
    }

    pub fn source(&self) -> &dyn ConfigSource {
        self.source.as_ref()
    }

    pub fn has_api_key(&self, provider: ProviderId) -> bool {
        Resolver::new(self.source()).has_api_key(provider)
    }

    /// Resolves and validates configuration without building a client.
    pub fn resolve(
        &self,
        provider: Option<ProviderId>,
        overrides: Overrides,
    ) -> Result<ProviderConfig> {
        let resolver = Resolver::new(self.source());
        let provider = resolver.provider(provider)?;
        Ok(resolver.resolve(provider, overrides)?)
    }

    #[tracing::instrument(level = "info", skip_all, fields(requested = ?provider))]
    pub fn create(
        &self,
        provider: Option<ProviderId>,
        overrides: Overrides,
    ) -> Result<Box<dyn LlmClient>> {
        let config = self.resolve(provider, overrides)?;
        let (provider, model) = (config.provider(), config.model().to_string());
        let client = providers::build_client(config)?;
        tracing::info!(%provider, %model, "llm client created");
        Ok(client)
    }

    /// Like [`LlmFactory::create`] but takes the provider's textual identifier.
    pub fn create_named(&self, name: &str, overrides: Overrides) -> Result<Box<dyn LlmClient>> {
        let provider: ProviderId = name.parse()?;
        self.create(Some(provider), overrides)
    }
}

impl std::fmt::Debug for LlmFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmFactory").finish_non_exhaustive()
    }
}
