//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Build table + counters → Bind listeners → Load rules → Start probe engine
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Broadcast → Listeners drain, probe engine exits
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then listeners, then the probe engine
//! - Ordered shutdown: stop accept, drain, close
//! - TLS listeners have a drain timeout: forced close after the deadline

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{run, start, Running, StartupError};
