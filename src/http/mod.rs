//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Listener (plaintext or TLS)
//!     → server.rs (effective host, incoming Route)
//!     → chain.rs (match, filter, sort, truncate, WAF insertion)
//!     → server.rs (walk the chain: rewrite, forward, fail over)
//!     → Stream response to client
//! ```

pub mod chain;
pub mod server;

pub use chain::ChainSettings;
pub use server::{build_router, AppState};
