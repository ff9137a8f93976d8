//! OpenAI-chat ↔ OpenAI-chat switch: a normalizer, not a format conversion.
//! Applies tool normalization and the GLM `max_tokens` clamp to an
//! already-chat-shaped request. Response direction is identity — nothing in
//! the chat-completions response shape changes when the entry and target
//! protocol are the same.

use serde_json::Value;

use super::glm::clamp_max_tokens;
use super::tools::normalize_chat_tools_array;

/// Pure function of its input: running it twice on the same payload produces
/// the same result as running it once (required by the idempotence law).
pub fn normalize_chat_request(mut body: Value) -> Value {
    let model = body
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    if let Some(tools) = body.get("tools").cloned() {
        body["tools"] = normalize_chat_tools_array(tools);
    }

    for key in ["max_tokens", "max_completion_tokens"] {
        if let Some(value) = body.get(key).and_then(Value::as_u64) {
            body[key] = Value::from(clamp_max_tokens(&model, value));
        }
    }

    body
}

pub fn passthrough_chat_response(body: Value) -> Value {
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clamps_glm_max_tokens_and_normalizes_tools() {
        let body = json!({
            "model": "glm-4.6",
            "max_tokens": 32000,
            "tools": [{"type": "function", "function": {"name": "search"}}],
        });
        let normalized = normalize_chat_request(body);
        assert_eq!(normalized["max_tokens"], json!(8192));
        assert_eq!(normalized["tools"][0]["function"]["strict"], json!(true));
    }

    #[test]
    fn running_twice_equals_running_once() {
        let body = json!({
            "model": "glm-4.6",
            "max_tokens": 32000,
            "tools": [{"type": "function", "function": {"name": "search", "parameters": {"type": "object", "properties": {}}}}],
        });
        let once = normalize_chat_request(body);
        let twice = normalize_chat_request(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn leaves_non_glm_models_untouched() {
        let body = json!({"model": "gpt-4o", "max_tokens": 32000});
        assert_eq!(normalize_chat_request(body)["max_tokens"], json!(32000));
    }
}
