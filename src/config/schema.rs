//! Configuration schema definitions.
//!
//! Operational settings only. Endpoints are not configured here: the rules
//! script declares them at runtime.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::health::scheduler::ProbeSettings;
use crate::load_balancer::endpoint::Status;
use crate::load_balancer::BalanceMethod;
use crate::observability::logging::LogLevel;

/// Upper bound for `attempts`.
pub const MAX_ATTEMPTS: usize = 9;

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// error, warn, info, verbose, debug or silly.
    pub log_level: String,

    /// Default plaintext listener port.
    pub port: u16,

    /// Endpoints tried per request before giving up (1..=9).
    pub attempts: usize,

    /// Statuses eligible for routing. Empty means all of up, unknown and down.
    pub consider: Vec<String>,

    /// rr, load or weight.
    pub balance_method: String,

    /// Path of the rules script.
    pub rules: PathBuf,

    /// Request bodies are buffered up to this size so they can be replayed on failover.
    pub max_body_bytes: usize,

    /// Additional listeners opened at startup.
    pub listeners: Vec<ListenerConfig>,

    pub probe: ProbeConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            log_level: "error".to_string(),
            port: 8080,
            attempts: 1,
            consider: Vec::new(),
            balance_method: "rr".to_string(),
            rules: PathBuf::from("./config/rules.rhai"),
            max_body_bytes: 2 * 1024 * 1024,
            listeners: Vec::new(),
            probe: ProbeConfig::default(),
        }
    }
}

impl ProxyConfig {
    pub fn log_level(&self) -> LogLevel {
        LogLevel::parse_lenient(&self.log_level)
    }

    /// Unknown methods fall back to round robin.
    pub fn balance(&self) -> BalanceMethod {
        self.balance_method.parse().unwrap_or_default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.clamp(1, MAX_ATTEMPTS)
    }

    /// Statuses eligible for routing. Unrecognized names are skipped (validation reports them).
    pub fn consider(&self) -> Vec<Status> {
        let parsed: Vec<Status> = self
            .consider
            .iter()
            .filter_map(|s| s.parse::<Status>().ok())
            .filter(|s| *s != Status::Off)
            .collect();
        if parsed.is_empty() {
            vec![Status::Up, Status::Unknown, Status::Down]
        } else {
            parsed
        }
    }

    pub fn probe_settings(&self) -> ProbeSettings {
        ProbeSettings {
            rules: self.rules.clone(),
            default_timeout_ms: self.probe.default_timeout_ms,
            busy_retry: Duration::from_millis(self.probe.busy_retry_ms),
            max_operations: self.probe.max_operations,
        }
    }
}

/// An extra listener. Plaintext unless both `cert` and `key` are set.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ListenerConfig {
    pub port: u16,

    /// Path to certificate file (PEM).
    #[serde(default)]
    pub cert: Option<PathBuf>,

    /// Path to private key file (PEM).
    #[serde(default)]
    pub key: Option<PathBuf>,
}

impl ListenerConfig {
    pub fn is_tls(&self) -> bool {
        self.cert.is_some() && self.key.is_some()
    }
}

/// Probe engine settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Probe timeout when `ping` is called without one.
    pub default_timeout_ms: u64,

    /// Delay before retrying a run that came due while the script was busy.
    pub busy_retry_ms: u64,

    /// Rhai operation limit per run; 0 is unlimited.
    pub max_operations: u64,

    /// Recompile the rules script when it changes on disk.
    pub watch: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            busy_retry_ms: 1_000,
            max_operations: 0,
            watch: true,
        }
    }
}
