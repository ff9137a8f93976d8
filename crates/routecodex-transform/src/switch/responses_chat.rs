//! OpenAI-responses ↔ OpenAI-chat switch.
//!
//! Request direction flattens a `responses`-shaped payload (`instructions` +
//! `input[]`) into chat `messages[]` and captures a `ResponsesRequestContext`
//! keyed by `requestId`. Response direction looks the context up and
//! rebuilds an `output[]`-shaped payload from the chat completion choice; if
//! the context is missing (expired or never a responses request) the payload
//! is returned as received.

use serde_json::{Value, json};

use super::context::ResponsesRequestContext;
use super::glm::clamp_max_tokens;
use super::tools::normalize_chat_tool;

pub fn responses_to_chat(body: &Value, request_id: &str) -> (Value, ResponsesRequestContext) {
    let model = body
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let instructions = body
        .get("instructions")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let input_items = normalize_input(body.get("input"));

    let mut messages = Vec::new();
    if let Some(instructions) = &instructions {
        messages.push(json!({"role": "system", "content": instructions}));
    }

    let mut last_call_id: Option<String> = None;
    for item in &input_items {
        append_input_item(item, &mut messages, &mut last_call_id);
    }

    let tools = body.get("tools").and_then(Value::as_array).map(|tools| {
        tools
            .iter()
            .filter_map(|tool| {
                let name = tool.get("name").and_then(Value::as_str)?.to_string();
                let description = tool
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let parameters = tool.get("parameters").cloned();
                normalize_chat_tool(name, description, parameters)
            })
            .collect::<Vec<_>>()
    });

    let tool_choice = body.get("tool_choice").cloned();
    let parallel_tool_calls = body.get("parallel_tool_calls").and_then(Value::as_bool);
    let metadata = body.get("metadata").cloned();
    let response_format = body.get("text").and_then(|t| t.get("format")).cloned();
    let stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);

    let max_tokens = body
        .get("max_output_tokens")
        .or_else(|| body.get("max_tokens"))
        .and_then(Value::as_u64)
        .map(|tokens| clamp_max_tokens(&model, tokens));

    let mut chat = json!({
        "model": model,
        "messages": messages,
        "stream": stream,
    });
    if let Some(tools) = &tools
        && !tools.is_empty()
    {
        chat["tools"] = Value::Array(tools.clone());
    }
    if let Some(choice) = map_tool_choice(tool_choice.as_ref()) {
        chat["tool_choice"] = choice;
    }
    if let Some(parallel) = parallel_tool_calls {
        chat["parallel_tool_calls"] = Value::Bool(parallel);
    }
    if let Some(tokens) = max_tokens {
        chat["max_tokens"] = Value::from(tokens);
    }
    if let Some(metadata) = &metadata {
        chat["metadata"] = metadata.clone();
    }
    if let Some(format) = map_response_format(response_format.as_ref()) {
        chat["response_format"] = format;
    }

    let context = ResponsesRequestContext {
        request_id: request_id.to_string(),
        instructions,
        input: input_items,
        tool_choice,
        parallel_tool_calls,
        metadata,
        response_format,
        stream,
        is_responses_payload: true,
        tools_normalized: tools.is_some(),
    };

    (chat, context)
}

pub fn chat_to_responses(body: &Value, ctx: Option<&ResponsesRequestContext>) -> Value {
    let Some(ctx) = ctx else {
        return body.clone();
    };
    if !ctx.is_responses_payload {
        return body.clone();
    }

    let choice = body.get("choices").and_then(|c| c.get(0));
    let message = choice.and_then(|c| c.get("message"));

    let mut output = Vec::new();

    if let Some(reasoning) = message
        .and_then(|m| m.get("reasoning_content"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
    {
        output.push(json!({
            "type": "reasoning",
            "content": [{"type": "reasoning_text", "text": reasoning}],
        }));
    }

    if let Some(text) = message
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
    {
        output.push(json!({
            "type": "message",
            "role": "assistant",
            "content": [{"type": "output_text", "text": text}],
        }));
    }

    if let Some(tool_calls) = message.and_then(|m| m.get("tool_calls")).and_then(Value::as_array) {
        for call in tool_calls {
            let call_id = call.get("id").and_then(Value::as_str).unwrap_or_default();
            let name = call
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            let arguments = call
                .get("function")
                .and_then(|f| f.get("arguments"))
                .cloned()
                .unwrap_or(Value::String(String::new()));
            output.push(json!({
                "type": "function_call",
                "call_id": call_id,
                "name": name,
                "arguments": arguments,
            }));
        }
    }

    json!({
        "id": body.get("id").cloned().unwrap_or(Value::Null),
        "object": "response",
        "model": body.get("model").cloned().unwrap_or(Value::Null),
        "output": output,
        "usage": map_usage(body.get("usage")),
        "status": "completed",
    })
}

fn normalize_input(input: Option<&Value>) -> Vec<Value> {
    match input {
        Some(Value::String(text)) => vec![json!({
            "type": "message",
            "role": "user",
            "content": [{"type": "input_text", "text": text}],
        })],
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

fn append_input_item(item: &Value, messages: &mut Vec<Value>, last_call_id: &mut Option<String>) {
    let item_type = item.get("type").and_then(Value::as_str).unwrap_or("message");
    match item_type {
        "message" => {
            let role = item.get("role").and_then(Value::as_str).unwrap_or("user");
            let text = flatten_text(item.get("content"));
            if !text.is_empty() {
                messages.push(json!({"role": role, "content": text}));
            }
        }
        "function_call" | "tool_use" => {
            let call_id = item
                .get("call_id")
                .or_else(|| item.get("id"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let name = item.get("name").and_then(Value::as_str).unwrap_or_default();
            let arguments = stringify_arguments(item.get("arguments").or_else(|| item.get("input")));
            *last_call_id = Some(call_id.clone());
            messages.push(json!({
                "role": "assistant",
                "content": Value::Null,
                "tool_calls": [{
                    "id": call_id,
                    "type": "function",
                    "function": {"name": name, "arguments": arguments},
                }],
            }));
        }
        "function_call_output" | "tool_result" => {
            let call_id = item
                .get("call_id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| last_call_id.clone())
                .unwrap_or_default();
            let output = item
                .get("output")
                .or_else(|| item.get("content"))
                .map(flatten_text)
                .unwrap_or_default();
            messages.push(json!({
                "role": "tool",
                "tool_call_id": call_id,
                "content": output,
            }));
        }
        "reasoning" => {
            let text = flatten_text(item.get("content"));
            messages.push(json!({
                "role": "assistant",
                "content": text,
                "reasoning_metadata": true,
            }));
        }
        _ => {}
    }
}

/// Joins `text`/`input_text`/`output_text` blocks with newlines, dropping
/// empty fragments. Falls back to treating a bare string as its own block.
fn flatten_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|block| {
                let text = match block {
                    Value::String(text) => Some(text.as_str()),
                    Value::Object(_) => {
                        let block_type = block.get("type").and_then(Value::as_str).unwrap_or("");
                        if matches!(block_type, "text" | "input_text" | "output_text" | "" ) {
                            block.get("text").and_then(Value::as_str)
                        } else {
                            None
                        }
                    }
                    _ => None,
                };
                text.filter(|s| !s.is_empty())
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn stringify_arguments(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(text)) => text.clone(),
        Some(other) => serde_json::to_string(other)
            .unwrap_or_else(|_| json!({"_raw": other.to_string()}).to_string()),
        None => "{}".to_string(),
    }
}

fn map_tool_choice(choice: Option<&Value>) -> Option<Value> {
    match choice? {
        Value::String(mode) => Some(Value::String(mode.clone())),
        Value::Object(obj) => {
            let name = obj.get("name").and_then(Value::as_str)?;
            Some(json!({"type": "function", "function": {"name": name}}))
        }
        _ => None,
    }
}

fn map_response_format(format: Option<&Value>) -> Option<Value> {
    let format = format?;
    match format.get("type").and_then(Value::as_str)? {
        "json_schema" => Some(json!({
            "type": "json_schema",
            "json_schema": {
                "name": format.get("name").cloned().unwrap_or(Value::Null),
                "description": format.get("description").cloned().unwrap_or(Value::Null),
                "schema": format.get("schema").cloned().unwrap_or(Value::Null),
                "strict": format.get("strict").cloned().unwrap_or(Value::Null),
            }
        })),
        "json_object" => Some(json!({"type": "json_object"})),
        "text" => Some(json!({"type": "text"})),
        _ => None,
    }
}

fn map_usage(usage: Option<&Value>) -> Value {
    let Some(usage) = usage else {
        return Value::Null;
    };
    json!({
        "input_tokens": usage.get("prompt_tokens").cloned().unwrap_or(Value::Null),
        "output_tokens": usage.get("completion_tokens").cloned().unwrap_or(Value::Null),
        "total_tokens": usage.get("total_tokens").cloned().unwrap_or(Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instructions_become_leading_system_message() {
        let body = json!({"model": "gpt-4o", "instructions": "be terse", "input": "hi"});
        let (chat, ctx) = responses_to_chat(&body, "req-1");
        assert_eq!(chat["messages"][0]["role"], json!("system"));
        assert_eq!(chat["messages"][0]["content"], json!("be terse"));
        assert_eq!(ctx.is_responses_payload, true);
    }

    #[test]
    fn empty_messages_with_instructions_produce_a_single_system_message() {
        let body = json!({"model": "gpt-4o", "instructions": "be terse"});
        let (chat, _ctx) = responses_to_chat(&body, "req-1");
        assert_eq!(chat["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn function_call_and_output_round_trip_through_tool_messages() {
        let body = json!({
            "model": "gpt-4o",
            "input": [
                {"type": "function_call", "call_id": "call_1", "name": "lookup", "arguments": {"q": "rust"}},
                {"type": "function_call_output", "call_id": "call_1", "output": "42"},
            ],
        });
        let (chat, _ctx) = responses_to_chat(&body, "req-1");
        let messages = chat["messages"].as_array().unwrap();
        assert_eq!(messages[0]["tool_calls"][0]["function"]["name"], json!("lookup"));
        assert_eq!(messages[1]["role"], json!("tool"));
        assert_eq!(messages[1]["tool_call_id"], json!("call_1"));
    }

    #[test]
    fn glm_model_clamps_max_output_tokens() {
        let body = json!({"model": "glm-4.6", "input": "hi", "max_output_tokens": 32000});
        let (chat, _ctx) = responses_to_chat(&body, "req-1");
        assert_eq!(chat["max_tokens"], json!(8192));
    }

    #[test]
    fn response_direction_rebuilds_output_from_tool_calls() {
        let ctx = ResponsesRequestContext {
            request_id: "req-1".to_string(),
            instructions: None,
            input: Vec::new(),
            tool_choice: None,
            parallel_tool_calls: None,
            metadata: None,
            response_format: None,
            stream: false,
            is_responses_payload: true,
            tools_normalized: false,
        };
        let chat_response = json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o",
            "choices": [{"message": {"role": "assistant", "tool_calls": [
                {"id": "call_1", "type": "function", "function": {"name": "lookup", "arguments": "{\"q\":\"rust\"}"}}
            ]}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15},
        });
        let responses = chat_to_responses(&chat_response, Some(&ctx));
        assert_eq!(responses["output"][0]["type"], json!("function_call"));
        assert_eq!(responses["output"][0]["call_id"], json!("call_1"));
        assert_eq!(responses["usage"]["input_tokens"], json!(10));
    }

    #[test]
    fn missing_context_returns_payload_unchanged() {
        let body = json!({"id": "chatcmpl-1"});
        assert_eq!(chat_to_responses(&body, None), body);
    }
}
