//! Tool-definition normalization shared by every switch that produces a
//! chat-completions payload: each tool must carry a non-empty `name`;
//! `parameters` default to an permissive empty-object schema when absent or
//! malformed; `function.strict` is forced to `true`.

use serde_json::{Value, json};

/// One normalized chat-completions tool definition:
/// `{"type":"function","function":{"name","description","parameters","strict":true}}`.
pub fn normalize_chat_tool(name: String, description: Option<String>, parameters: Option<Value>) -> Option<Value> {
    if name.trim().is_empty() {
        return None;
    }
    let parameters = match parameters {
        Some(Value::Object(map)) if !map.is_empty() => Value::Object(map),
        _ => default_parameters_schema(),
    };
    Some(json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": parameters,
            "strict": true,
        }
    }))
}

pub fn default_parameters_schema() -> Value {
    json!({
        "type": "object",
        "properties": {},
        "additionalProperties": true,
    })
}

/// Normalizes an already chat-shaped `tools[]` array in place: drops entries
/// with an empty name, defaults malformed `parameters`, forces `strict`.
/// Idempotent: re-running on already-normalized tools is a no-op.
pub fn normalize_chat_tools_array(tools: Value) -> Value {
    let Value::Array(items) = tools else {
        return Value::Array(Vec::new());
    };
    let normalized: Vec<Value> = items
        .into_iter()
        .filter_map(|tool| {
            let function = tool.get("function").cloned().unwrap_or(Value::Null);
            let name = function
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let description = function
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string);
            let parameters = function.get("parameters").cloned();
            normalize_chat_tool(name, description, parameters)
        })
        .collect();
    Value::Array(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_tools_with_empty_name() {
        assert!(normalize_chat_tool(String::new(), None, None).is_none());
        assert!(normalize_chat_tool("   ".to_string(), None, None).is_none());
    }

    #[test]
    fn defaults_missing_parameters_and_forces_strict() {
        let tool = normalize_chat_tool("lookup".to_string(), Some("desc".into()), None).unwrap();
        assert_eq!(tool["function"]["strict"], json!(true));
        assert_eq!(tool["function"]["parameters"]["type"], json!("object"));
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize_chat_tools_array(json!([
            {"type": "function", "function": {"name": "a", "parameters": {"type": "object", "properties": {"x": {}}}}}
        ]));
        let twice = normalize_chat_tools_array(once.clone());
        assert_eq!(once, twice);
    }
}
