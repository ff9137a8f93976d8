pub mod admin;
pub mod classifier;
pub mod proxy;

pub use admin::{AdminState, admin_router};
pub use classifier::{
    ClassifierRule, ClassifyInput, HealthCheck, RoutePool, RouteTarget, RoutingDecision,
    RoutingError, RuntimeBinding, RuntimeResolver, VirtualRouter,
};
pub use proxy::{ProxyState, proxy_router};
