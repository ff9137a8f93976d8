use serde::{Deserialize, Serialize};

use crate::Proto;

use super::{DispatchTable, ModelTable};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "channel_settings", rename_all = "lowercase")]
pub enum ProviderConfig {
    OpenAI(OpenAIConfig),
    Qwen(QwenConfig),
    IFlow(IFlowConfig),
    LmStudio(LmStudioConfig),
    Gemini(GeminiConfig),
    Antigravity(AntigravityConfig),
    Custom(CustomProviderConfig),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenAIConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QwenConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_code_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IFlowConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_code_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LmStudioConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeminiConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AntigravityConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomProviderConfig {
    pub id: String,
    pub enabled: bool,
    pub proto: Proto,
    pub base_url: String,
    pub dispatch: DispatchTable,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_table: Option<ModelTable>,
    #[serde(default)]
    pub count_tokens: CountTokensMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub json_param_mask: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[derive(Default)]
pub enum CountTokensMode {
    #[default]
    Upstream,
    Tokenizers,
    Tiktoken,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_config_tags_on_kind() {
        let value = serde_json::json!({
            "kind": "qwen",
            "channel_settings": { "base_url": "https://portal.qwen.ai/v1" }
        });
        let cfg: ProviderConfig = serde_json::from_value(value).expect("config should parse");
        match cfg {
            ProviderConfig::Qwen(cfg) => {
                assert_eq!(cfg.base_url.as_deref(), Some("https://portal.qwen.ai/v1"));
            }
            other => panic!("unexpected provider config variant: {other:?}"),
        }
    }
}
