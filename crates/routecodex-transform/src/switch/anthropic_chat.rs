//! Anthropic-messages ↔ OpenAI-chat switch. Reuses the same `system`→leading
//! system-message rule as the Responses switch's `instructions` handling
//! (`prepend_system`) so the three switches stay structurally uniform
//! instead of each re-deriving the rule.

use serde_json::{Value, json};

use super::context::AnthropicRequestContext;
use super::glm::clamp_max_tokens;
use super::tools::normalize_chat_tool;

pub fn prepend_system(system: Option<&str>, mut messages: Vec<Value>) -> Vec<Value> {
    if let Some(system) = system {
        let trimmed = system.trim();
        if !trimmed.is_empty() {
            messages.insert(0, json!({"role": "system", "content": trimmed}));
        }
    }
    messages
}

pub fn anthropic_to_chat(body: &Value, request_id: &str) -> (Value, AnthropicRequestContext) {
    let model = body
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let system = flatten_system(body.get("system"));

    let mut messages = Vec::new();
    let mut last_call_id: Option<String> = None;
    if let Some(items) = body.get("messages").and_then(Value::as_array) {
        for message in items {
            append_message(message, &mut messages, &mut last_call_id);
        }
    }
    messages = prepend_system(system.as_deref(), messages);

    let tools = body.get("tools").and_then(Value::as_array).map(|tools| {
        tools
            .iter()
            .filter_map(|tool| {
                let name = tool.get("name").and_then(Value::as_str)?.to_string();
                let description = tool
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let parameters = tool.get("input_schema").cloned();
                normalize_chat_tool(name, description, parameters)
            })
            .collect::<Vec<_>>()
    });

    let stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
    let max_tokens = body
        .get("max_tokens")
        .and_then(Value::as_u64)
        .map(|tokens| clamp_max_tokens(&model, tokens));

    let mut chat = json!({"model": model, "messages": messages, "stream": stream});
    if let Some(tools) = &tools
        && !tools.is_empty()
    {
        chat["tools"] = Value::Array(tools.clone());
    }
    if let Some(choice) = map_tool_choice(body.get("tool_choice")) {
        chat["tool_choice"] = choice;
    }
    if let Some(tokens) = max_tokens {
        chat["max_tokens"] = Value::from(tokens);
    }

    let context = AnthropicRequestContext {
        request_id: request_id.to_string(),
        model,
        system,
        stream,
        max_tokens,
    };

    (chat, context)
}

pub fn chat_to_anthropic(body: &Value, ctx: Option<&AnthropicRequestContext>) -> Value {
    let Some(ctx) = ctx else {
        return body.clone();
    };

    let choice = body.get("choices").and_then(|c| c.get(0));
    let message = choice.and_then(|c| c.get("message"));
    let finish_reason = choice.and_then(|c| c.get("finish_reason")).and_then(Value::as_str);

    let mut content = Vec::new();
    if let Some(text) = message
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
    {
        content.push(json!({"type": "text", "text": text}));
    }
    if let Some(tool_calls) = message.and_then(|m| m.get("tool_calls")).and_then(Value::as_array) {
        for call in tool_calls {
            let id = call.get("id").and_then(Value::as_str).unwrap_or_default();
            let name = call
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            let input = call
                .get("function")
                .and_then(|f| f.get("arguments"))
                .and_then(Value::as_str)
                .and_then(|args| serde_json::from_str::<Value>(args).ok())
                .unwrap_or_else(|| json!({}));
            content.push(json!({"type": "tool_use", "id": id, "name": name, "input": input}));
        }
    }

    json!({
        "id": body.get("id").cloned().unwrap_or(Value::Null),
        "type": "message",
        "role": "assistant",
        "model": ctx.model,
        "content": content,
        "stop_reason": map_stop_reason(finish_reason),
        "usage": map_usage(body.get("usage")),
    })
}

fn flatten_system(system: Option<&Value>) -> Option<String> {
    match system {
        Some(Value::String(text)) => Some(text.clone()),
        Some(Value::Array(blocks)) => {
            let joined: Vec<&str> = blocks
                .iter()
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .filter(|s| !s.is_empty())
                .collect();
            if joined.is_empty() {
                None
            } else {
                Some(joined.join("\n"))
            }
        }
        _ => None,
    }
}

fn append_message(message: &Value, messages: &mut Vec<Value>, last_call_id: &mut Option<String>) {
    let role = message.get("role").and_then(Value::as_str).unwrap_or("user");
    match message.get("content") {
        Some(Value::String(text)) => {
            if !text.is_empty() {
                messages.push(json!({"role": role, "content": text}));
            }
        }
        Some(Value::Array(blocks)) => {
            let mut texts = Vec::new();
            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        if let Some(text) = block.get("text").and_then(Value::as_str) {
                            if !text.is_empty() {
                                texts.push(text.to_string());
                            }
                        }
                    }
                    Some("tool_use") => {
                        flush_text(role, &mut texts, messages);
                        let id = block.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
                        let name = block.get("name").and_then(Value::as_str).unwrap_or_default();
                        let arguments = block
                            .get("input")
                            .map(|input| serde_json::to_string(input).unwrap_or_default())
                            .unwrap_or_else(|| "{}".to_string());
                        *last_call_id = Some(id.clone());
                        messages.push(json!({
                            "role": "assistant",
                            "content": Value::Null,
                            "tool_calls": [{
                                "id": id,
                                "type": "function",
                                "function": {"name": name, "arguments": arguments},
                            }],
                        }));
                    }
                    Some("tool_result") => {
                        flush_text(role, &mut texts, messages);
                        let tool_use_id = block
                            .get("tool_use_id")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .or_else(|| last_call_id.clone())
                            .unwrap_or_default();
                        let content = match block.get("content") {
                            Some(Value::String(text)) => text.clone(),
                            Some(Value::Array(parts)) => parts
                                .iter()
                                .filter_map(|part| part.get("text").and_then(Value::as_str))
                                .collect::<Vec<_>>()
                                .join("\n"),
                            _ => String::new(),
                        };
                        messages.push(json!({
                            "role": "tool",
                            "tool_call_id": tool_use_id,
                            "content": content,
                        }));
                    }
                    _ => {}
                }
            }
            flush_text(role, &mut texts, messages);
        }
        _ => {}
    }
}

fn flush_text(role: &str, texts: &mut Vec<String>, messages: &mut Vec<Value>) {
    if texts.is_empty() {
        return;
    }
    messages.push(json!({"role": role, "content": texts.join("\n")}));
    texts.clear();
}

fn map_tool_choice(choice: Option<&Value>) -> Option<Value> {
    let choice = choice?;
    match choice.get("type").and_then(Value::as_str)? {
        "auto" => Some(json!("auto")),
        "any" => Some(json!("required")),
        "none" => Some(json!("none")),
        "tool" => {
            let name = choice.get("name").and_then(Value::as_str)?;
            Some(json!({"type": "function", "function": {"name": name}}))
        }
        _ => None,
    }
}

fn map_stop_reason(finish_reason: Option<&str>) -> &'static str {
    match finish_reason {
        Some("tool_calls") => "tool_use",
        Some("length") => "max_tokens",
        Some("stop") | None => "end_turn",
        Some(_) => "end_turn",
    }
}

fn map_usage(usage: Option<&Value>) -> Value {
    let Some(usage) = usage else {
        return json!({"input_tokens": 0, "output_tokens": 0});
    };
    json!({
        "input_tokens": usage.get("prompt_tokens").cloned().unwrap_or(Value::from(0)),
        "output_tokens": usage.get("completion_tokens").cloned().unwrap_or(Value::from(0)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_string_prepends_a_system_message() {
        let body = json!({
            "model": "claude-3-opus",
            "system": "be terse",
            "messages": [{"role": "user", "content": "hi"}],
        });
        let (chat, ctx) = anthropic_to_chat(&body, "req-1");
        assert_eq!(chat["messages"][0]["role"], json!("system"));
        assert_eq!(ctx.system.as_deref(), Some("be terse"));
    }

    #[test]
    fn tool_use_and_tool_result_round_trip() {
        let body = json!({
            "model": "claude-3-opus",
            "messages": [
                {"role": "assistant", "content": [{"type": "tool_use", "id": "t1", "name": "lookup", "input": {"q": "rust"}}]},
                {"role": "user", "content": [{"type": "tool_result", "tool_use_id": "t1", "content": "42"}]},
            ],
        });
        let (chat, _ctx) = anthropic_to_chat(&body, "req-1");
        let messages = chat["messages"].as_array().unwrap();
        assert_eq!(messages[0]["tool_calls"][0]["function"]["name"], json!("lookup"));
        assert_eq!(messages[1]["role"], json!("tool"));
        assert_eq!(messages[1]["tool_call_id"], json!("t1"));
    }

    #[test]
    fn glm_model_clamps_max_tokens() {
        let body = json!({"model": "glm-4.6", "messages": [], "max_tokens": 32000});
        let (chat, _ctx) = anthropic_to_chat(&body, "req-1");
        assert_eq!(chat["max_tokens"], json!(8192));
    }

    #[test]
    fn response_direction_maps_tool_calls_to_tool_use_blocks() {
        let ctx = AnthropicRequestContext {
            request_id: "req-1".to_string(),
            model: "claude-3-opus".to_string(),
            system: None,
            stream: false,
            max_tokens: Some(1024),
        };
        let chat_response = json!({
            "id": "chatcmpl-1",
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {"tool_calls": [{"id": "t1", "type": "function", "function": {"name": "lookup", "arguments": "{\"q\":\"rust\"}"}}]},
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5},
        });
        let anthropic = chat_to_anthropic(&chat_response, Some(&ctx));
        assert_eq!(anthropic["stop_reason"], json!("tool_use"));
        assert_eq!(anthropic["content"][0]["type"], json!("tool_use"));
        assert_eq!(anthropic["content"][0]["name"], json!("lookup"));
    }
}
