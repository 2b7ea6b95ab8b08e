use super::{OpenAiCompatibleClient, ProviderId, ProviderSpec};
use crate::client::LlmClient;
use crate::config::ProviderConfig;
use crate::error::Result;

/// DeepSeek serves the OpenAI `chat/completions` format from its own host.
pub(crate) static SPEC: ProviderSpec = ProviderSpec {
    id: ProviderId::DeepSeek,
    name: "deepseek",
    env_prefix: "DEEPSEEK",
    default_model: "deepseek-chat",
    default_base_url: "https://api.deepseek.com/v1",
    build,
};

fn build(config: ProviderConfig) -> Result<Box<dyn LlmClient>> {
    Ok(Box::new(OpenAiCompatibleClient::new(config)?))
}
