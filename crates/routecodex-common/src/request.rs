//! `PipelineRequest`: the per-inbound-request value the request executor
//! threads through every attempt of its retry loop. Created at ingress,
//! mutated only by decorating per-attempt metadata, dropped once the
//! response is sent.

use serde_json::Value;

/// A client request on its way through the pipeline.
///
/// `request_id` is stable across every retry attempt; it is the key used to
/// look up captured LLMSwitch contexts and to correlate emitted events.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRequest {
    pub request_id: String,
    pub client_request_id: Option<String>,
    pub entry_endpoint: String,
    pub method: String,
    pub body: Value,
    pub client_headers: Vec<(String, String)>,
    pub inbound_stream: bool,
}

impl PipelineRequest {
    pub fn new(
        request_id: impl Into<String>,
        entry_endpoint: impl Into<String>,
        method: impl Into<String>,
        body: Value,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            client_request_id: None,
            entry_endpoint: entry_endpoint.into(),
            method: method.into(),
            body,
            client_headers: Vec::new(),
            inbound_stream: false,
        }
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.client_headers = headers;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.client_headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Builds the re-entry request a `ServerTool` pass constructs: same
    /// `request_id`, `Accept` stripped so a forced-SSE downstream response
    /// can't leak into the second pass, and `rt` merged into the body under
    /// `__rt` by union (existing keys win) rather than overwritten.
    pub fn for_reentry(&self, rt: Value) -> Self {
        let mut body = self.body.clone();
        if let Value::Object(map) = &mut body {
            let merged = match map.remove("__rt") {
                Some(Value::Object(mut existing)) => {
                    if let Value::Object(incoming) = rt {
                        for (k, v) in incoming {
                            existing.entry(k).or_insert(v);
                        }
                    }
                    Value::Object(existing)
                }
                _ => rt,
            };
            map.insert("__rt".to_string(), merged);
        }
        Self {
            request_id: self.request_id.clone(),
            client_request_id: self.client_request_id.clone(),
            entry_endpoint: self.entry_endpoint.clone(),
            method: self.method.clone(),
            body,
            client_headers: self
                .client_headers
                .iter()
                .filter(|(k, _)| !k.eq_ignore_ascii_case("accept"))
                .cloned()
                .collect(),
            inbound_stream: self.inbound_stream,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reentry_strips_accept_header_and_keeps_request_id() {
        let req = PipelineRequest::new("req-1", "/v1/chat/completions", "POST", json!({"model": "gpt-4o"}))
            .with_headers(vec![
                ("accept".to_string(), "text/event-stream".to_string()),
                ("authorization".to_string(), "Bearer x".to_string()),
            ]);
        let reentered = req.for_reentry(json!({"tool_pass": 1}));
        assert_eq!(reentered.request_id, "req-1");
        assert!(reentered.header("accept").is_none());
        assert!(reentered.header("authorization").is_some());
        assert_eq!(reentered.body["__rt"]["tool_pass"], json!(1));
    }

    #[test]
    fn reentry_merges_rt_by_union_not_overwrite() {
        let req = PipelineRequest::new(
            "req-1",
            "/v1/chat/completions",
            "POST",
            json!({"__rt": {"depth": 1}}),
        );
        let reentered = req.for_reentry(json!({"depth": 2, "tool_pass": 1}));
        assert_eq!(reentered.body["__rt"]["depth"], json!(1));
        assert_eq!(reentered.body["__rt"]["tool_pass"], json!(1));
    }
}
