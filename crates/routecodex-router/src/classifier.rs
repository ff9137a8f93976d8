//! Virtual Router: picks a route name for an inbound request, then a
//! concrete provider target within that route's pool.
//!
//! A classifier is a prioritized list of rules; the first rule whose
//! predicate matches the request wins. If nothing matches, `default_route`
//! is used. Each route name maps to an ordered pool of provider keys; pool
//! selection walks the pool in order, skipping any key in
//! `excluded_provider_keys` or currently unhealthy, and round-robins across
//! credentials within the winning provider key's group.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use routecodex_provider_core::Proto;

/// One entry in the classifier's prioritized rule list.
#[derive(Debug, Clone)]
pub enum ClassifierRule {
    /// Matches when the request came in on a specific entry endpoint, e.g.
    /// `/v1/responses` or `/v1/messages`.
    Endpoint { path: String, route: String },
    /// Matches on the decoded entry protocol (messages vs input vs chat).
    Content { proto: Proto, route: String },
    /// Matches when a header is present (optionally with an expected value),
    /// e.g. `anthropic-version` identifying an Anthropic-shaped request that
    /// arrived on a shared endpoint.
    Header {
        name: String,
        value: Option<String>,
        route: String,
    },
}

impl ClassifierRule {
    fn matches(&self, req: &ClassifyInput<'_>) -> Option<&str> {
        match self {
            ClassifierRule::Endpoint { path, route } => {
                (req.endpoint == path).then_some(route.as_str())
            }
            ClassifierRule::Content { proto, route } => {
                (req.proto == *proto).then_some(route.as_str())
            }
            ClassifierRule::Header { name, value, route } => {
                let found = req
                    .headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name));
                match (found, value) {
                    (Some(_), None) => Some(route.as_str()),
                    (Some((_, actual)), Some(expected)) if actual.eq_ignore_ascii_case(expected) => {
                        Some(route.as_str())
                    }
                    _ => None,
                }
            }
        }
    }
}

/// What the classifier needs to evaluate its rules against a request.
pub struct ClassifyInput<'a> {
    pub endpoint: &'a str,
    pub proto: Proto,
    pub headers: &'a [(String, String)],
}

/// An ordered pool of provider keys a route name resolves to.
#[derive(Debug, Clone)]
pub struct RoutePool {
    pub route_name: String,
    pub provider_keys: Vec<String>,
}

/// A concrete provider-side destination chosen for one request.
#[derive(Debug, Clone)]
pub struct RouteTarget {
    pub provider_key: String,
    pub client_model_id: String,
    pub runtime_key: String,
    pub outbound_profile: Proto,
    pub compatibility_profile: String,
}

#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub route_name: String,
    pub pool: Vec<String>,
    pub target: RouteTarget,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RoutingError {
    #[error("ERR_NO_PROVIDER_TARGET: no provider target for route {route}")]
    NoProviderTarget { route: String },
    #[error("ERR_POOL_EXHAUSTED: every provider key in route {route} is excluded or unhealthy")]
    PoolExhausted { route: String },
    #[error("ERR_RUNTIME_NOT_FOUND: no runtime registered for provider key {provider_key}")]
    RuntimeNotFound { provider_key: String },
}

/// Returns true if `provider_key` should currently be considered for
/// selection. The default implementation always returns true; callers that
/// track per-provider health should supply their own.
pub trait HealthCheck: Send + Sync {
    fn is_healthy(&self, provider_key: &str) -> bool;
}

pub struct AlwaysHealthy;
impl HealthCheck for AlwaysHealthy {
    fn is_healthy(&self, _provider_key: &str) -> bool {
        true
    }
}

/// Resolves a provider key to the runtime-specific routing fields
/// (`client_model_id`, `runtime_key`, `outbound_profile`,
/// `compatibility_profile`). Implemented by whatever layer owns the
/// provider/model configuration (kept out of this crate to avoid a
/// dependency on `routecodex-provider-impl`).
pub trait RuntimeResolver: Send + Sync {
    fn resolve(&self, provider_key: &str) -> Option<RuntimeBinding>;
}

#[derive(Debug, Clone)]
pub struct RuntimeBinding {
    pub client_model_id: String,
    pub runtime_key: String,
    pub outbound_profile: Proto,
    pub compatibility_profile: String,
}

pub struct VirtualRouter {
    rules: Vec<ClassifierRule>,
    default_route: String,
    pools: HashMap<String, Vec<String>>,
    health: Arc<dyn HealthCheck>,
    runtimes: Arc<dyn RuntimeResolver>,
    round_robin: HashMap<String, AtomicUsize>,
}

impl VirtualRouter {
    pub fn new(
        rules: Vec<ClassifierRule>,
        default_route: impl Into<String>,
        pools: Vec<RoutePool>,
        health: Arc<dyn HealthCheck>,
        runtimes: Arc<dyn RuntimeResolver>,
    ) -> Self {
        let mut pool_map = HashMap::new();
        let mut round_robin = HashMap::new();
        for pool in pools {
            round_robin.insert(pool.route_name.clone(), AtomicUsize::new(0));
            pool_map.insert(pool.route_name, pool.provider_keys);
        }
        Self {
            rules,
            default_route: default_route.into(),
            pools: pool_map,
            health,
            runtimes,
            round_robin,
        }
    }

    /// First-match classification: walks `rules` in order, falling back to
    /// `default_route` if none match.
    pub fn classify(&self, input: &ClassifyInput<'_>) -> String {
        self.rules
            .iter()
            .find_map(|rule| rule.matches(input))
            .unwrap_or(&self.default_route)
            .to_string()
    }

    /// Picks the first pool entry for `route_name` that is neither excluded
    /// nor unhealthy, round-robins across credentials for that provider key
    /// (credential round-robin happens one layer down in the credential pool;
    /// here we only pick *which* provider key wins), and resolves it into a
    /// full `RouteTarget` via the runtime resolver.
    pub fn select(
        &self,
        route_name: &str,
        excluded_provider_keys: &[String],
    ) -> Result<RoutingDecision, RoutingError> {
        let pool = self
            .pools
            .get(route_name)
            .cloned()
            .ok_or_else(|| RoutingError::NoProviderTarget {
                route: route_name.to_string(),
            })?;
        if pool.is_empty() {
            return Err(RoutingError::NoProviderTarget {
                route: route_name.to_string(),
            });
        }

        let counter = self.round_robin.get(route_name);
        let start = counter
            .map(|c| c.fetch_add(1, Ordering::Relaxed))
            .unwrap_or(0);

        for offset in 0..pool.len() {
            let idx = (start + offset) % pool.len();
            let candidate = &pool[idx];
            if excluded_provider_keys.iter().any(|k| k == candidate) {
                continue;
            }
            if !self.health.is_healthy(candidate) {
                continue;
            }
            let binding = self
                .runtimes
                .resolve(candidate)
                .ok_or_else(|| RoutingError::RuntimeNotFound {
                    provider_key: candidate.clone(),
                })?;
            return Ok(RoutingDecision {
                route_name: route_name.to_string(),
                pool: pool.clone(),
                target: RouteTarget {
                    provider_key: candidate.clone(),
                    client_model_id: binding.client_model_id,
                    runtime_key: binding.runtime_key,
                    outbound_profile: binding.outbound_profile,
                    compatibility_profile: binding.compatibility_profile,
                },
            });
        }

        Err(RoutingError::PoolExhausted {
            route: route_name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticRuntimes;
    impl RuntimeResolver for StaticRuntimes {
        fn resolve(&self, provider_key: &str) -> Option<RuntimeBinding> {
            Some(RuntimeBinding {
                client_model_id: "default".to_string(),
                runtime_key: provider_key.to_string(),
                outbound_profile: Proto::OpenAIChat,
                compatibility_profile: "default".to_string(),
            })
        }
    }

    fn router() -> VirtualRouter {
        VirtualRouter::new(
            vec![
                ClassifierRule::Endpoint {
                    path: "/v1/messages".to_string(),
                    route: "anthropic".to_string(),
                },
                ClassifierRule::Header {
                    name: "anthropic-version".to_string(),
                    value: None,
                    route: "anthropic".to_string(),
                },
            ],
            "chat",
            vec![
                RoutePool {
                    route_name: "anthropic".to_string(),
                    provider_keys: vec!["a".to_string(), "b".to_string()],
                },
                RoutePool {
                    route_name: "chat".to_string(),
                    provider_keys: vec!["c".to_string()],
                },
            ],
            Arc::new(AlwaysHealthy),
            Arc::new(StaticRuntimes),
        )
    }

    #[test]
    fn first_match_wins_over_default() {
        let router = router();
        let input = ClassifyInput {
            endpoint: "/v1/messages",
            proto: Proto::OpenAIChat,
            headers: &[],
        };
        assert_eq!(router.classify(&input), "anthropic");
    }

    #[test]
    fn unmatched_request_falls_back_to_default_route() {
        let router = router();
        let input = ClassifyInput {
            endpoint: "/v1/chat/completions",
            proto: Proto::OpenAIChat,
            headers: &[],
        };
        assert_eq!(router.classify(&input), "chat");
    }

    #[test]
    fn selection_skips_excluded_provider_keys() {
        let router = router();
        let decision = router
            .select("anthropic", &["a".to_string()])
            .expect("should find target b");
        assert_eq!(decision.target.provider_key, "b");
    }

    #[test]
    fn selection_round_robins_across_calls() {
        let router = router();
        let first = router.select("anthropic", &[]).unwrap().target.provider_key;
        let second = router.select("anthropic", &[]).unwrap().target.provider_key;
        assert_ne!(first, second);
    }

    #[test]
    fn pool_exhaustion_is_a_distinguished_error() {
        let router = router();
        let err = router
            .select("anthropic", &["a".to_string(), "b".to_string()])
            .unwrap_err();
        assert!(matches!(err, RoutingError::PoolExhausted { .. }));
    }

    #[test]
    fn unknown_route_is_no_provider_target() {
        let router = router();
        let err = router.select("does-not-exist", &[]).unwrap_err();
        assert!(matches!(err, RoutingError::NoProviderTarget { .. }));
    }
}
