//! Settings assembly for the `researcher` binary.
//!
//! The process environment (after `.env` is loaded) always wins over an optional TOML file.

use anyhow::Context;
use researcher_llm::{EnvSource, Layered, LlmFactory, TomlSource};
use std::path::Path;

pub fn load_factory(config_path: Option<&Path>) -> anyhow::Result<LlmFactory> {
    let mut source = Layered::new().then(EnvSource::capture());
    if let Some(path) = config_path {
        let file = TomlSource::load(path)
            .with_context(|| format!("load settings file {}", path.display()))?;
        tracing::debug!(config_path = %path.display(), "settings file loaded");
        source = source.then(file);
    }
    Ok(LlmFactory::new(source))
}
