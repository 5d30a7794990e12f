//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Probe engine (scheduler.rs):
//!     Timer fires (or rules file reloaded)
//!     → run the rules script (script.rs) on the blocking pool
//!
//! Rules script (script.rs):
//!     define()  → Endpoints::define
//!     ping()    → probe.rs: one request per distinct probe target, stage `actual`
//!     commit()  → Endpoints::commit: staged `actual` becomes routable `status`
//!     next(ms)  → scheduler.rs: reschedule
//! ```
//!
//! # Design Decisions
//! - Probing is script-driven; the script owns the cadence
//! - Two-phase status: probes stage, commit publishes
//! - Requests never wait on probes; they only read committed status

pub mod probe;
pub mod scheduler;
pub mod script;

pub use probe::{ProbeOptions, Prober};
pub use scheduler::{ProbeCommand, ProbeEngine, ProbeSettings};
pub use script::{EndpointHandle, ProbeScript, ScriptContext, ScriptError};
