//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!
//! Probe script:
//!     log(level, message) → logging.rs::script_log
//! ```
//!
//! # Design Decisions
//! - Per-request routing decisions are logged at debug with a correlation id
//! - Operator level names are kept stable for existing deployments

pub mod logging;
