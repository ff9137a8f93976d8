pub mod bootstrap;
pub mod executor;
pub mod proxy_engine;
pub mod state;
pub mod upstream_client;
