pub(crate) mod antigravity;
pub(crate) mod custom;
pub(crate) mod gemini;
pub(crate) mod http_client;
pub(crate) mod iflow;
pub(crate) mod lmstudio;
pub(crate) mod oauth_common;
pub(crate) mod openai;
pub(crate) mod qwen;

pub use antigravity::AntigravityProvider;
pub use custom::CustomProvider;
pub use gemini::GeminiProvider;
pub use iflow::IFlowProvider;
pub use lmstudio::LmStudioProvider;
pub use openai::OpenAIProvider;
pub use qwen::QwenProvider;
