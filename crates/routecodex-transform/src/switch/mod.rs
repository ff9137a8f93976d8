//! LLMSwitch: the bidirectional protocol transformer between a client wire
//! format and a provider wire format, plus the `requestId → context` map
//! that lets the response direction undo the forward conversion.
//!
//! Three switches, each bidirectional — OpenAI-chat↔OpenAI-chat (a
//! normalizer, not a format change), OpenAI-responses↔OpenAI-chat,
//! Anthropic-messages↔OpenAI-chat — plus an identity passthrough, dispatched
//! by `UnifiedSwitch` based on the (entry, target) protocol pair the Virtual
//! Router selected. Distinct from the `generate_content` module, which
//! transforms already-typed per-protocol DTOs for the remaining protocol
//! pairs (anything touching Gemini); this module operates on the wire JSON
//! directly because the transformation rules it implements (flattening
//! `input[]` items, binding `tool_call_id`s, the GLM clamp) are about the
//! JSON shape, not about any one typed representation of it.

mod anthropic_chat;
mod chat_normalizer;
mod context;
mod glm;
mod responses_chat;
mod tools;
mod unified;

pub use context::{AnthropicRequestContext, ContextStore, DEFAULT_CONTEXT_TTL, ResponsesRequestContext};
pub use glm::{clamp_max_tokens, is_glm_model};
pub use unified::{SwitchKind, SwitchMetadata, SwitchOutput, UnifiedSwitch, kind_for};
