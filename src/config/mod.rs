//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize, apply env/CLI overrides)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!
//! Rules script:
//!     watcher.rs detects change
//!     → ProbeCommand::Reload to the probe engine
//!     → engine recompiles; a broken script keeps the previous one
//! ```
//!
//! # Design Decisions
//! - Operational config is immutable once loaded; endpoints live in the rules script
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, resolve, ConfigError, Overrides};
pub use schema::{ListenerConfig, ProbeConfig, ProxyConfig};
pub use validation::{validate_config, ValidationError};
pub use watcher::ScriptWatcher;
