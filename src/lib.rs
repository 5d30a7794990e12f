//! Script-driven reverse proxy library.
//!
//! Endpoints are declared at runtime by a sandboxed rules script, which also
//! probes them and publishes their health. Requests are matched against the
//! live table and forwarded along a failover chain.

pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod routing;

pub use config::schema::ProxyConfig;
pub use lifecycle::Shutdown;
pub use load_balancer::pool::{Endpoints, SharedEndpoints};
