//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Configured listeners + default port (startup)
//! PortRequest from Endpoints::define (runtime)
//!     → listener.rs (bind once per port)
//!     → tls.rs (optional, when cert and key are configured)
//!     → Hand off to HTTP layer (one router per listener protocol)
//! ```
//!
//! # Design Decisions
//! - Listeners are never closed individually; they all stop on shutdown
//! - TLS is optional and handled transparently

pub mod listener;
pub mod tls;

pub use listener::{ListenerError, Listeners};
