//! Request Executor: ties routing, LLMSwitch, compatibility, and provider
//! transport into one retry loop per request, exactly as the orchestrator
//! the rest of the pipeline is built leaves-first toward.
//!
//! `routecodex-router`'s `VirtualRouter` already depends on
//! `routecodex-core` (for the provider/runtime types it resolves against),
//! so this module cannot depend back on it without a cycle. Routing and
//! provider transport are instead trait seams (`RouteSelector`,
//! `UpstreamSender`) that a higher layer (the binary's bootstrap, typically)
//! implements against the concrete `VirtualRouter` and `ProxyEngine`. LLMSwitch
//! conversion is not a seam — `UnifiedSwitch` lives in `routecodex-transform`,
//! a crate this one already depends on, so the executor owns one directly.

mod types;

pub use types::{
    AttemptMetadata, AttemptTarget, ExecutorError, PipelineExecutionResult, UpstreamAttemptError,
    UpstreamOutcome,
};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use routecodex_common::PipelineRequest;
use routecodex_common::retry::RetrySignal;
use routecodex_transform::switch::UnifiedSwitch;
use serde_json::Value;

/// Resolves a `PipelineRequest` (plus the set of provider keys excluded so
/// far this request) to a concrete attempt target, or fails with
/// `ERR_NO_PROVIDER_TARGET`/`ERR_POOL_EXHAUSTED` folded into a message.
#[async_trait]
pub trait RouteSelector: Send + Sync {
    async fn select(
        &self,
        request: &PipelineRequest,
        excluded_provider_keys: &[String],
    ) -> Result<AttemptTarget, String>;
}

/// Sends an already-converted, already-compatibility-adjusted payload
/// upstream for one attempt.
#[async_trait]
pub trait UpstreamSender: Send + Sync {
    async fn send(
        &self,
        target: &AttemptTarget,
        payload: Value,
        metadata: &AttemptMetadata,
    ) -> Result<UpstreamOutcome, UpstreamAttemptError>;
}

/// Declarative field adjustments applied to the already-protocol-converted
/// payload (model-id substitution, `max_tokens` clamp, tool-schema
/// translation, header finalization). Default is identity; a real
/// implementation is supplied by the caller once compatibility profiles are
/// wired up.
pub trait CompatibilityApplier: Send + Sync {
    fn apply(&self, payload: Value, _compatibility_profile: &str) -> Value {
        payload
    }
}

pub struct PassthroughCompatibility;
impl CompatibilityApplier for PassthroughCompatibility {}

const DEFAULT_MAX_ATTEMPTS: u32 = 6;
const POISON_THRESHOLD: u32 = 3;

pub struct RequestExecutor {
    router: Arc<dyn RouteSelector>,
    transport: Arc<dyn UpstreamSender>,
    compatibility: Arc<dyn CompatibilityApplier>,
    switch: Arc<UnifiedSwitch>,
    max_attempts: u32,
}

impl RequestExecutor {
    pub fn new(
        router: Arc<dyn RouteSelector>,
        transport: Arc<dyn UpstreamSender>,
        switch: Arc<UnifiedSwitch>,
    ) -> Self {
        Self {
            router,
            transport,
            compatibility: Arc::new(PassthroughCompatibility),
            switch,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_compatibility(mut self, compatibility: Arc<dyn CompatibilityApplier>) -> Self {
        self.compatibility = compatibility;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// `execute(PipelineRequest) -> PipelineExecutionResult`: the orchestrator
    /// loop. On each attempt: route, convert (request direction), apply
    /// compatibility, send; on success convert the response back and return;
    /// on a classified failure, decide whether to retry same-family, poison
    /// the family (exclude every pool member for this request), or give up.
    pub async fn execute(
        &self,
        request: &PipelineRequest,
    ) -> Result<PipelineExecutionResult, ExecutorError> {
        let mut excluded_provider_keys: Vec<String> = Vec::new();
        let mut retry_signal = RetrySignal::new();
        let mut last_error: Option<UpstreamAttemptError> = None;

        for attempt in 1..=self.max_attempts {
            let metadata = AttemptMetadata {
                attempt,
                excluded_provider_keys: excluded_provider_keys.clone(),
                retry_signal: retry_signal.clone(),
            };

            let target = self
                .router
                .select(request, &metadata.excluded_provider_keys)
                .await
                .map_err(ExecutorError::Routing)?;

            let switch_out = self
                .switch
                .convert_request(
                    target.entry_protocol,
                    target.provider_protocol,
                    &request.body,
                    &request.request_id,
                )
                .await;
            let payload = self
                .compatibility
                .apply(switch_out.payload, &target.compatibility_profile);

            match self.transport.send(&target, payload, &metadata).await {
                Ok(outcome) => {
                    let response_body = self
                        .switch
                        .convert_response(
                            target.entry_protocol,
                            target.provider_protocol,
                            &outcome.body,
                            &request.request_id,
                        )
                        .await;
                    return Ok(PipelineExecutionResult {
                        body: response_body,
                        status: outcome.status,
                        headers: outcome.headers,
                        usage: outcome.usage,
                        attempts_used: attempt,
                        route_name: target.route_name,
                        provider_key: target.provider_key,
                    });
                }
                Err(err) => {
                    retry_signal.observe(err.signature(), err.poison_family);
                    let should_retry = err.retryable && attempt < self.max_attempts;
                    if !should_retry {
                        last_error = Some(err);
                        break;
                    }

                    if target.pool.len() <= 1 {
                        backoff_sleep(attempt).await;
                    } else if retry_signal.should_poison_family(POISON_THRESHOLD) {
                        for key in &target.pool {
                            if !excluded_provider_keys.contains(key) {
                                excluded_provider_keys.push(key.clone());
                            }
                        }
                    } else {
                        excluded_provider_keys.push(target.provider_key.clone());
                    }
                    last_error = Some(err);
                    continue;
                }
            }
        }

        match last_error {
            Some(err) => Err(ExecutorError::Upstream {
                attempts: self.max_attempts,
                message: err.message,
            }),
            None => Err(ExecutorError::AttemptsExhausted {
                max_attempts: self.max_attempts,
            }),
        }
    }

    /// `reenterPipeline`: builds a second-pass `PipelineRequest` (same
    /// `requestId`, `Accept` stripped, `__rt` merged by union) and recurses
    /// into `execute`. Boxed because async fns can't recurse directly.
    pub fn reenter<'a>(
        &'a self,
        original: &'a PipelineRequest,
        runtime_metadata: Value,
    ) -> Pin<Box<dyn Future<Output = Result<PipelineExecutionResult, ExecutorError>> + Send + 'a>> {
        Box::pin(async move {
            let reentered = original.for_reentry(runtime_metadata);
            self.execute(&reentered).await
        })
    }
}

fn retry_backoff_delay(attempt_no: u32) -> Duration {
    let step = attempt_no.saturating_sub(1).min(6);
    let base_ms = 200u64;
    let backoff = base_ms.saturating_mul(1u64 << step);
    let jitter = rand::random::<u64>() % (base_ms + 1);
    Duration::from_millis((backoff + jitter).min(2_000))
}

async fn backoff_sleep(attempt_no: u32) {
    let delay = retry_backoff_delay(attempt_no);
    if delay.as_millis() > 0 {
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use routecodex_provider_core::Proto;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct StaticRouter {
        target: AttemptTarget,
    }

    #[async_trait]
    impl RouteSelector for StaticRouter {
        async fn select(
            &self,
            _request: &PipelineRequest,
            excluded: &[String],
        ) -> Result<AttemptTarget, String> {
            if excluded.contains(&self.target.provider_key) {
                return Err("ERR_POOL_EXHAUSTED".to_string());
            }
            Ok(self.target.clone())
        }
    }

    fn single_member_target() -> AttemptTarget {
        AttemptTarget {
            route_name: "chat".to_string(),
            pool: vec!["only".to_string()],
            provider_key: "only".to_string(),
            runtime_key: "only-rt".to_string(),
            entry_protocol: Proto::OpenAIChat,
            provider_protocol: Proto::OpenAIChat,
            compatibility_profile: "default".to_string(),
        }
    }

    struct AlwaysFails {
        retryable: bool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl UpstreamSender for AlwaysFails {
        async fn send(
            &self,
            _target: &AttemptTarget,
            _payload: Value,
            _metadata: &AttemptMetadata,
        ) -> Result<UpstreamOutcome, UpstreamAttemptError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(UpstreamAttemptError {
                status: Some(500),
                code: None,
                upstream_code: None,
                message: "boom".to_string(),
                retryable: self.retryable,
                poison_family: false,
            })
        }
    }

    struct SucceedsOnAttempt {
        succeed_at: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl UpstreamSender for SucceedsOnAttempt {
        async fn send(
            &self,
            _target: &AttemptTarget,
            payload: Value,
            metadata: &AttemptMetadata,
        ) -> Result<UpstreamOutcome, UpstreamAttemptError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if metadata.attempt < self.succeed_at {
                return Err(UpstreamAttemptError {
                    status: Some(503),
                    code: None,
                    upstream_code: None,
                    message: "unavailable".to_string(),
                    retryable: true,
                    poison_family: false,
                });
            }
            Ok(UpstreamOutcome {
                body: json!({"choices": [{"message": {"role": "assistant", "content": payload["model"].clone()}}]}),
                status: 200,
                headers: Vec::new(),
                usage: None,
            })
        }
    }

    fn request() -> PipelineRequest {
        PipelineRequest::new("req-1", "/v1/chat/completions", "POST", json!({"model": "gpt-4o", "messages": []}))
    }

    #[tokio::test]
    async fn non_retryable_failure_surfaces_after_one_attempt() {
        let transport = Arc::new(AlwaysFails {
            retryable: false,
            calls: AtomicU32::new(0),
        });
        let executor = RequestExecutor::new(
            Arc::new(StaticRouter {
                target: single_member_target(),
            }),
            transport.clone(),
            Arc::new(UnifiedSwitch::default()),
        );
        let err = executor.execute(&request()).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Upstream { attempts: 6, .. }));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retryable_single_member_pool_sleeps_and_retries_until_budget_exhausted() {
        let transport = Arc::new(AlwaysFails {
            retryable: true,
            calls: AtomicU32::new(0),
        });
        let executor = RequestExecutor::new(
            Arc::new(StaticRouter {
                target: single_member_target(),
            }),
            transport.clone(),
            Arc::new(UnifiedSwitch::default()),
        )
        .with_max_attempts(3);
        let err = executor.execute(&request()).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Upstream { attempts: 3, .. }));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn succeeds_once_transport_recovers() {
        let transport = Arc::new(SucceedsOnAttempt {
            succeed_at: 2,
            calls: AtomicU32::new(0),
        });
        let executor = RequestExecutor::new(
            Arc::new(StaticRouter {
                target: single_member_target(),
            }),
            transport,
            Arc::new(UnifiedSwitch::default()),
        );
        let result = executor.execute(&request()).await.unwrap();
        assert_eq!(result.attempts_used, 2);
        assert_eq!(result.status, 200);
    }

    struct PoolExcludingRouter {
        calls: Mutex<Vec<Vec<String>>>,
        members: Vec<String>,
    }

    #[async_trait]
    impl RouteSelector for PoolExcludingRouter {
        async fn select(
            &self,
            _request: &PipelineRequest,
            excluded: &[String],
        ) -> Result<AttemptTarget, String> {
            self.calls.lock().unwrap().push(excluded.to_vec());
            let candidate = self
                .members
                .iter()
                .find(|m| !excluded.contains(m))
                .ok_or_else(|| "ERR_POOL_EXHAUSTED".to_string())?;
            Ok(AttemptTarget {
                route_name: "chat".to_string(),
                pool: self.members.clone(),
                provider_key: candidate.clone(),
                runtime_key: format!("{candidate}-rt"),
                entry_protocol: Proto::OpenAIChat,
                provider_protocol: Proto::OpenAIChat,
                compatibility_profile: "default".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn multi_member_pool_excludes_failing_candidate_and_rotates() {
        let router = Arc::new(PoolExcludingRouter {
            calls: Mutex::new(Vec::new()),
            members: vec!["a".to_string(), "b".to_string()],
        });
        let transport = Arc::new(SucceedsOnAttempt {
            succeed_at: 2,
            calls: AtomicU32::new(0),
        });
        let executor = RequestExecutor::new(router.clone(), transport, Arc::new(UnifiedSwitch::default()));
        let result = executor.execute(&request()).await.unwrap();
        assert_eq!(result.attempts_used, 2);
        let calls = router.calls.lock().unwrap();
        assert_eq!(calls[0], Vec::<String>::new());
        assert_eq!(calls[1], vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn reenter_preserves_request_id_and_strips_accept() {
        let transport = Arc::new(SucceedsOnAttempt {
            succeed_at: 1,
            calls: AtomicU32::new(0),
        });
        let executor = RequestExecutor::new(
            Arc::new(StaticRouter {
                target: single_member_target(),
            }),
            transport,
            Arc::new(UnifiedSwitch::default()),
        );
        let original = request().with_headers(vec![("accept".to_string(), "text/event-stream".to_string())]);
        let result = executor.reenter(&original, json!({"tool_pass": 1})).await.unwrap();
        assert_eq!(result.attempts_used, 1);
    }
}
