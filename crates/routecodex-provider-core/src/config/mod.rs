mod dispatch;
mod model_table;
mod provider_config;

pub use dispatch::{DispatchRule, DispatchTable, OperationKind};
pub use model_table::{ModelRecord, ModelTable};
pub use provider_config::{
    AntigravityConfig, CountTokensMode, CustomProviderConfig, GeminiConfig, IFlowConfig,
    LmStudioConfig, OpenAIConfig, ProviderConfig, QwenConfig,
};
