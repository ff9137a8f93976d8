use routecodex_common::retry::RetrySignal;
use routecodex_provider_core::{Proto, UsageSummary};
use serde_json::Value;

/// Routing + conversion shape resolved for one attempt. `route_selector`
/// implementations translate their own routing-decision type into this one so
/// the executor doesn't have to depend on `routecodex-router` (which already
/// depends on `routecodex-core`, so the reverse dependency would cycle).
#[derive(Debug, Clone)]
pub struct AttemptTarget {
    pub route_name: String,
    pub pool: Vec<String>,
    pub provider_key: String,
    pub runtime_key: String,
    pub entry_protocol: Proto,
    pub provider_protocol: Proto,
    pub compatibility_profile: String,
}

/// Per-attempt metadata threaded into routing, LLMSwitch, and transport.
#[derive(Debug, Clone)]
pub struct AttemptMetadata {
    pub attempt: u32,
    pub excluded_provider_keys: Vec<String>,
    pub retry_signal: RetrySignal,
}

/// What the transport returned for one attempt, already decoded to JSON.
#[derive(Debug, Clone)]
pub struct UpstreamOutcome {
    pub body: Value,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub usage: Option<UsageSummary>,
}

/// A classified transport failure for one attempt. `retryable` and
/// `poison_family` are the executor's inputs to its retry decision;
/// `requires_auth_recovery` lets a transport-level single-flight refresh
/// report that it already retried once internally (so the executor should
/// not also count that as a fresh attempt against the family).
#[derive(Debug, Clone)]
pub struct UpstreamAttemptError {
    pub status: Option<u16>,
    pub code: Option<String>,
    pub upstream_code: Option<String>,
    pub message: String,
    pub retryable: bool,
    pub poison_family: bool,
}

impl UpstreamAttemptError {
    pub fn signature(&self) -> String {
        routecodex_common::retry::extract_retry_error_signature(
            self.status,
            self.code.as_deref(),
            self.upstream_code.as_deref(),
            &self.message,
        )
    }
}

#[derive(Debug, Clone)]
pub struct PipelineExecutionResult {
    pub body: Value,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub usage: Option<UsageSummary>,
    pub attempts_used: u32,
    pub route_name: String,
    pub provider_key: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutorError {
    #[error("routing failed: {0}")]
    Routing(String),
    #[error("upstream error after {attempts} attempt(s): {message}")]
    Upstream { attempts: u32, message: String },
    #[error("attempt budget ({max_attempts}) exhausted without a successful response")]
    AttemptsExhausted { max_attempts: u32 },
}
