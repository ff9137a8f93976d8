use std::sync::Arc;

use routecodex_provider_core::ProviderRegistry;

use crate::providers::{
    AntigravityProvider, CustomProvider, GeminiProvider, IFlowProvider, LmStudioProvider,
    OpenAIProvider, QwenProvider,
};

/// Registers every built-in upstream provider implementation into `registry`.
pub fn register_builtin_providers(registry: &mut ProviderRegistry) {
    registry.register(Arc::new(OpenAIProvider::new()));
    registry.register(Arc::new(QwenProvider::new()));
    registry.register(Arc::new(IFlowProvider::new()));
    registry.register(Arc::new(LmStudioProvider::new()));
    registry.register(Arc::new(GeminiProvider::new()));
    registry.register(Arc::new(AntigravityProvider::new()));
    registry.register(Arc::new(CustomProvider::new()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_all_builtin_providers() {
        let mut registry = ProviderRegistry::new();
        register_builtin_providers(&mut registry);
        for name in [
            "openai", "qwen", "iflow", "lmstudio", "gemini", "antigravity", "custom",
        ] {
            assert!(registry.get(name).is_some(), "missing provider: {name}");
        }
    }
}
