//! Structured logging.
//!
//! # Responsibilities
//! - Map the operator-facing level names onto tracing levels
//! - Initialize the tracing subscriber
//! - Forward probe-script log calls to tracing
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - Level names: error, warn, info, verbose, debug, silly; unknown names fall back to error
//! - `RUST_LOG` takes precedence over the configured level when set

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Target used for events emitted by the probe script.
pub const SCRIPT_TARGET: &str = "script_proxy::script";

/// Minimum log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Error,
    Warn,
    Info,
    Verbose,
    Debug,
    Silly,
}

impl LogLevel {
    /// Parse a level name; unknown names become `Error`.
    pub fn parse_lenient(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Verbose => "verbose",
            LogLevel::Debug => "debug",
            LogLevel::Silly => "silly",
        }
    }

    /// Directive understood by `EnvFilter`.
    pub fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Verbose | LogLevel::Debug => "debug",
            LogLevel::Silly => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "verbose" => Ok(LogLevel::Verbose),
            "debug" => Ok(LogLevel::Debug),
            "silly" => Ok(LogLevel::Silly),
            other => Err(format!("unknown log level \"{}\"", other)),
        }
    }
}

/// Install the global subscriber.
pub fn init(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.directive()));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Emit a message from the probe script at the named level.
pub fn script_log(level: &str, message: &str) {
    match LogLevel::parse_lenient(level) {
        LogLevel::Error => tracing::error!(target: SCRIPT_TARGET, "{}", message),
        LogLevel::Warn => tracing::warn!(target: SCRIPT_TARGET, "{}", message),
        LogLevel::Info => tracing::info!(target: SCRIPT_TARGET, "{}", message),
        LogLevel::Verbose | LogLevel::Debug => tracing::debug!(target: SCRIPT_TARGET, "{}", message),
        LogLevel::Silly => tracing::trace!(target: SCRIPT_TARGET, "{}", message),
    }
}
