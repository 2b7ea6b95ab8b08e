use super::{OpenAiCompatibleClient, ProviderId, ProviderSpec};
use crate::client::LlmClient;
use crate::config::ProviderConfig;
use crate::error::Result;

/// SiliconFlow hosts open-weight models (`org/model` names) behind the OpenAI wire format.
pub(crate) static SPEC: ProviderSpec = ProviderSpec {
    id: ProviderId::SiliconFlow,
    name: "siliconflow",
    env_prefix: "SILICONFLOW",
    default_model: "deepseek-ai/DeepSeek-V3.2-Exp",
    default_base_url: "https://api.siliconflow.cn/v1",
    build,
};

fn build(config: ProviderConfig) -> Result<Box<dyn LlmClient>> {
    Ok(Box::new(OpenAiCompatibleClient::new(config)?))
}
