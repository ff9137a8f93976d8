//! The `requestId → context` map the reverse half of each switch consumes to
//! undo its forward transformation. Entries are inserted by the request-
//! direction switch, taken (removed) by the response-direction switch, and
//! swept on a TTL so a request whose response never arrives doesn't leak.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::RwLock;

/// Captured from an OpenAI-responses request so the response direction can
/// rebuild a `output[]`-shaped payload from a chat-completion choice.
#[derive(Debug, Clone)]
pub struct ResponsesRequestContext {
    pub request_id: String,
    pub instructions: Option<String>,
    pub input: Vec<Value>,
    pub tool_choice: Option<Value>,
    pub parallel_tool_calls: Option<bool>,
    pub metadata: Option<Value>,
    pub response_format: Option<Value>,
    pub stream: bool,
    pub is_responses_payload: bool,
    pub tools_normalized: bool,
}

/// Captured from an Anthropic-messages request so the response direction can
/// rebuild an Anthropic `content[]`/`stop_reason` payload from a
/// chat-completion choice.
#[derive(Debug, Clone)]
pub struct AnthropicRequestContext {
    pub request_id: String,
    pub model: String,
    pub system: Option<String>,
    pub stream: bool,
    pub max_tokens: Option<u64>,
}

/// A `requestId → T` map with TTL eviction. Generic over the context payload
/// so `ResponsesRequestContext` and `AnthropicRequestContext` share one
/// implementation instead of two hand-copied maps.
pub struct ContextStore<T> {
    entries: RwLock<HashMap<String, (T, Instant)>>,
    ttl: Duration,
}

impl<T> ContextStore<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn insert(&self, request_id: impl Into<String>, value: T) {
        let mut guard = self.entries.write().await;
        guard.insert(request_id.into(), (value, Instant::now()));
    }

    /// Removes and returns the context for `request_id` if present and not
    /// expired. A request re-entering after TTL eviction finds nothing and
    /// the caller falls back to passthrough, per the LLMSwitch error
    /// semantics ("if context is missing, the payload is returned as
    /// received").
    pub async fn take(&self, request_id: &str) -> Option<T> {
        let mut guard = self.entries.write().await;
        match guard.remove(request_id) {
            Some((value, inserted_at)) if inserted_at.elapsed() <= self.ttl => Some(value),
            _ => None,
        }
    }

    /// Drops expired entries. Callers run this periodically (e.g. from the
    /// same background-sweep idiom used for unavailable-credential
    /// recovery) rather than on every insert.
    pub async fn sweep_expired(&self) {
        let mut guard = self.entries.write().await;
        let ttl = self.ttl;
        guard.retain(|_, (_, inserted_at)| inserted_at.elapsed() <= ttl);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

pub const DEFAULT_CONTEXT_TTL: Duration = Duration::from_secs(15 * 60);

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_then_take_returns_value_once() {
        let store: ContextStore<&'static str> = ContextStore::new(Duration::from_secs(60));
        store.insert("req-1", "payload").await;
        assert_eq!(store.take("req-1").await, Some("payload"));
        assert_eq!(store.take("req-1").await, None);
    }

    #[tokio::test]
    async fn expired_entry_is_not_returned() {
        let store: ContextStore<&'static str> = ContextStore::new(Duration::from_millis(1));
        store.insert("req-1", "payload").await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.take("req-1").await, None);
    }

    #[tokio::test]
    async fn sweep_expired_drops_stale_entries_without_a_take() {
        let store: ContextStore<&'static str> = ContextStore::new(Duration::from_millis(1));
        store.insert("req-1", "payload").await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.sweep_expired().await;
        assert_eq!(store.len().await, 0);
    }
}
