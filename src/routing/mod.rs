//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (protocol, host, path)
//!     → route.rs (explicit Route for the request)
//!     → matcher.rs (match against every endpoint's routable inbound Route)
//!     → Return: most specific matching endpoints (possibly several)
//!
//! Forwarding:
//!     route.rs::transform (strip matched prefix, prepend outbound base path)
//! ```
//!
//! # Design Decisions
//! - The routing table is live: endpoints are added by the probe script at runtime
//! - Most specific match wins: hostname length first, then path length
//! - Deterministic: ties are returned in table order for the load balancer to order

pub mod matcher;
pub mod route;

pub use route::{transform, Protocol, Route, RouteError, Wild};
