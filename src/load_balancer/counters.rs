//! Active request counters.
//!
//! # Responsibilities
//! - Track in-flight proxied requests per outbound host (for least-load balancing)
//! - Release each opened slot exactly once
//!
//! # Design Decisions
//! - `open` hands out a RAII guard; the slot is released when the guard drops,
//!   so a close and a completion for the same request cannot both decrement
//! - A close without a matching open is a contract violation, not a user error

use std::sync::Arc;

use dashmap::DashMap;

/// Process-wide map of outbound host → active request count.
#[derive(Debug, Default)]
pub struct Counters {
    active: DashMap<String, usize>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current number of active requests to `host`.
    pub fn active(&self, host: &str) -> usize {
        self.active.get(host).map(|n| *n).unwrap_or(0)
    }

    /// Record a request opened against `host`. The count drops when the
    /// returned guard is dropped.
    pub fn open(self: &Arc<Self>, host: &str) -> CounterGuard {
        *self.active.entry(host.to_string()).or_insert(0) += 1;
        CounterGuard {
            counters: Arc::clone(self),
            host: host.to_string(),
        }
    }

    fn close(&self, host: &str) {
        match self.active.get_mut(host) {
            Some(mut n) if *n > 0 => *n -= 1,
            _ => {
                tracing::error!(host = %host, "counter closed without a matching open");
                debug_assert!(false, "counter for {} closed without a matching open", host);
            }
        }
    }
}

/// A RAII guard that holds one active-request slot for a host.
#[derive(Debug)]
pub struct CounterGuard {
    counters: Arc<Counters>,
    host: String,
}

impl CounterGuard {
    pub fn host(&self) -> &str {
        &self.host
    }
}

impl Drop for CounterGuard {
    fn drop(&mut self) {
        self.counters.close(&self.host);
    }
}
