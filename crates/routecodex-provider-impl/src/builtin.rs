use routecodex_provider_core::{
    AntigravityConfig, GeminiConfig, IFlowConfig, LmStudioConfig, OpenAIConfig, ProviderConfig,
    QwenConfig,
};

/// Default config for a built-in provider, used to seed a fresh installation
/// before the user has configured anything themselves.
pub struct BuiltinProviderSeed {
    pub name: &'static str,
    pub config: ProviderConfig,
    pub enabled: bool,
}

impl BuiltinProviderSeed {
    pub fn config_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null)
    }
}

/// The providers shipped out of the box. None are enabled by default since
/// each needs either an API key or a completed OAuth flow before it can
/// serve traffic.
pub fn builtin_provider_seeds() -> Vec<BuiltinProviderSeed> {
    vec![
        BuiltinProviderSeed {
            name: "openai",
            config: ProviderConfig::OpenAI(OpenAIConfig::default()),
            enabled: false,
        },
        BuiltinProviderSeed {
            name: "qwen",
            config: ProviderConfig::Qwen(QwenConfig::default()),
            enabled: false,
        },
        BuiltinProviderSeed {
            name: "iflow",
            config: ProviderConfig::IFlow(IFlowConfig::default()),
            enabled: false,
        },
        BuiltinProviderSeed {
            name: "lmstudio",
            config: ProviderConfig::LmStudio(LmStudioConfig::default()),
            enabled: false,
        },
        BuiltinProviderSeed {
            name: "gemini",
            config: ProviderConfig::Gemini(GeminiConfig::default()),
            enabled: false,
        },
        BuiltinProviderSeed {
            name: "antigravity",
            config: ProviderConfig::Antigravity(AntigravityConfig::default()),
            enabled: false,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_cover_every_builtin_provider_except_custom() {
        let seeds = builtin_provider_seeds();
        assert_eq!(seeds.len(), 6);
        assert!(seeds.iter().all(|seed| !seed.enabled));
    }

    #[test]
    fn seed_config_json_round_trips_kind_tag() {
        let seeds = builtin_provider_seeds();
        let qwen = seeds.iter().find(|s| s.name == "qwen").expect("qwen seed");
        assert_eq!(qwen.config_json()["kind"], "qwen");
    }
}
