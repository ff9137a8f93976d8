//! `UnifiedSwitch`: dispatches to one of the three bidirectional switches (or
//! the identity passthrough) based on the classifier's chosen entry/target
//! protocol pair, and stamps outbound metadata on every request-direction
//! conversion.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

use crate::middleware::Proto;

use super::anthropic_chat::{anthropic_to_chat, chat_to_anthropic};
use super::chat_normalizer::{normalize_chat_request, passthrough_chat_response};
use super::context::{AnthropicRequestContext, ContextStore, DEFAULT_CONTEXT_TTL, ResponsesRequestContext};
use super::responses_chat::{chat_to_responses, responses_to_chat};

/// `{switchType, timestamp, entryProtocol, targetProtocol}` stamped on every
/// request-direction conversion.
#[derive(Debug, Clone)]
pub struct SwitchMetadata {
    pub switch_type: &'static str,
    pub timestamp: i64,
    pub entry_protocol: Proto,
    pub target_protocol: Proto,
}

fn stamp(switch_type: &'static str, entry: Proto, target: Proto) -> SwitchMetadata {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    SwitchMetadata {
        switch_type,
        timestamp,
        entry_protocol: entry,
        target_protocol: target,
    }
}

#[derive(Debug, Clone)]
pub struct SwitchOutput {
    pub payload: Value,
    pub metadata: SwitchMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchKind {
    ChatNormalizer,
    ResponsesChat,
    AnthropicChat,
    Passthrough,
}

/// Picks the switch for an (entry, target) protocol pair. Gemini is not one
/// of the three LLMSwitch pairs per the protocol-transformation contract; it
/// continues to flow through the existing generate-content dispatch table,
/// so same-protocol pairs (including Gemini↔Gemini) fall back to identity.
pub fn kind_for(entry: Proto, target: Proto) -> SwitchKind {
    match (entry, target) {
        (Proto::OpenAIChat, Proto::OpenAIChat) => SwitchKind::ChatNormalizer,
        (Proto::OpenAIResponse, Proto::OpenAIChat) | (Proto::OpenAIChat, Proto::OpenAIResponse) => {
            SwitchKind::ResponsesChat
        }
        (Proto::Claude, Proto::OpenAIChat) | (Proto::OpenAIChat, Proto::Claude) => {
            SwitchKind::AnthropicChat
        }
        _ => SwitchKind::Passthrough,
    }
}

/// Owns the `requestId → context` maps for both reversible switches. One
/// instance is shared (via `Arc`) across all requests handled by a process,
/// matching the teacher's injected-service idiom rather than a `static`.
pub struct UnifiedSwitch {
    responses_contexts: Arc<ContextStore<ResponsesRequestContext>>,
    anthropic_contexts: Arc<ContextStore<AnthropicRequestContext>>,
}

impl Default for UnifiedSwitch {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_TTL)
    }
}

impl UnifiedSwitch {
    pub fn new(context_ttl: std::time::Duration) -> Self {
        Self {
            responses_contexts: Arc::new(ContextStore::new(context_ttl)),
            anthropic_contexts: Arc::new(ContextStore::new(context_ttl)),
        }
    }

    /// Request direction: converts `body` from `entry` to `target`, capturing
    /// whatever context is needed to undo the conversion later.
    pub async fn convert_request(
        &self,
        entry: Proto,
        target: Proto,
        body: &Value,
        request_id: &str,
    ) -> SwitchOutput {
        let kind = kind_for(entry, target);
        let payload = match kind {
            SwitchKind::ChatNormalizer => normalize_chat_request(body.clone()),
            SwitchKind::ResponsesChat => {
                let (chat, ctx) = responses_to_chat(body, request_id);
                self.responses_contexts.insert(request_id, ctx).await;
                chat
            }
            SwitchKind::AnthropicChat => {
                let (chat, ctx) = anthropic_to_chat(body, request_id);
                self.anthropic_contexts.insert(request_id, ctx).await;
                chat
            }
            SwitchKind::Passthrough => body.clone(),
        };
        SwitchOutput {
            payload,
            metadata: stamp(switch_type_name(kind), entry, target),
        }
    }

    /// Response direction: converts a provider response shaped for `target`
    /// back into `entry`'s wire format, consuming any captured context.
    pub async fn convert_response(
        &self,
        entry: Proto,
        target: Proto,
        body: &Value,
        request_id: &str,
    ) -> Value {
        match kind_for(entry, target) {
            SwitchKind::ChatNormalizer => passthrough_chat_response(body.clone()),
            SwitchKind::ResponsesChat => {
                let ctx = self.responses_contexts.take(request_id).await;
                chat_to_responses(body, ctx.as_ref())
            }
            SwitchKind::AnthropicChat => {
                let ctx = self.anthropic_contexts.take(request_id).await;
                chat_to_anthropic(body, ctx.as_ref())
            }
            SwitchKind::Passthrough => body.clone(),
        }
    }

    /// Drops expired context entries from both stores. Run periodically from
    /// a background task, the same idiom as the credential pool's
    /// unavailable-recovery sweep.
    pub async fn sweep_expired_contexts(&self) {
        self.responses_contexts.sweep_expired().await;
        self.anthropic_contexts.sweep_expired().await;
    }
}

fn switch_type_name(kind: SwitchKind) -> &'static str {
    match kind {
        SwitchKind::ChatNormalizer => "openai_chat_normalizer",
        SwitchKind::ResponsesChat => "responses_chat",
        SwitchKind::AnthropicChat => "anthropic_chat",
        SwitchKind::Passthrough => "passthrough",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn dispatches_responses_to_chat_and_back() {
        let switch = UnifiedSwitch::default();
        let request = json!({"model": "gpt-4o", "instructions": "be terse", "input": "hi"});
        let out = switch
            .convert_request(Proto::OpenAIResponse, Proto::OpenAIChat, &request, "req-1")
            .await;
        assert_eq!(out.metadata.switch_type, "responses_chat");
        assert_eq!(out.payload["messages"][0]["role"], json!("system"));

        let chat_response = json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o",
            "choices": [{"message": {"role": "assistant", "content": "done"}}],
        });
        let responses = switch
            .convert_response(Proto::OpenAIResponse, Proto::OpenAIChat, &chat_response, "req-1")
            .await;
        assert_eq!(responses["output"][0]["type"], json!("message"));
    }

    #[tokio::test]
    async fn missing_context_on_response_falls_back_to_passthrough() {
        let switch = UnifiedSwitch::default();
        let chat_response = json!({"id": "chatcmpl-1"});
        let result = switch
            .convert_response(Proto::OpenAIResponse, Proto::OpenAIChat, &chat_response, "never-seen")
            .await;
        assert_eq!(result, chat_response);
    }

    #[tokio::test]
    async fn same_protocol_pair_uses_chat_normalizer() {
        let switch = UnifiedSwitch::default();
        let request = json!({"model": "glm-4.6", "messages": [], "max_tokens": 32000});
        let out = switch
            .convert_request(Proto::OpenAIChat, Proto::OpenAIChat, &request, "req-2")
            .await;
        assert_eq!(out.payload["max_tokens"], json!(8192));
    }

    #[tokio::test]
    async fn gemini_pair_is_passthrough() {
        let switch = UnifiedSwitch::default();
        let request = json!({"contents": []});
        let out = switch
            .convert_request(Proto::Gemini, Proto::Gemini, &request, "req-3")
            .await;
        assert_eq!(out.payload, request);
        assert_eq!(out.metadata.switch_type, "passthrough");
    }
}
