//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming route matched against the table
//!     → pool.rs (live endpoint table: define, commit, reset, downgrade)
//!     → Apply the configured ordering:
//!         - round_robin.rs (least recently served first)
//!         - least_conn.rs (fewest active requests first)
//!         - weighted.rs (smallest counter * (1 - weight) first)
//!     → counters.rs (open a slot for the chosen endpoint)
//! ```
//!
//! # Design Decisions
//! - Every ordering first groups by status: up, then unknown, then down
//! - Orderings are stable; insertion order breaks remaining ties
//! - Orderings work on request-local copies, never on the live table

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod counters;
pub mod endpoint;
pub mod least_conn;
pub mod pool;
pub mod round_robin;
pub mod weighted;

use counters::Counters;
use endpoint::Endpoint;

/// Balancing strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BalanceMethod {
    #[default]
    #[serde(rename = "rr")]
    RoundRobin,
    #[serde(rename = "load")]
    Load,
    #[serde(rename = "weight")]
    Weight,
}

impl BalanceMethod {
    /// Sort `endpoints` into preference order.
    pub fn sort(self, endpoints: &mut [Endpoint], counters: &Counters) {
        match self {
            BalanceMethod::RoundRobin => round_robin::sort_by_last(endpoints),
            BalanceMethod::Load => least_conn::sort_by_load(endpoints, counters),
            BalanceMethod::Weight => weighted::sort_by_weight(endpoints),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BalanceMethod::RoundRobin => "rr",
            BalanceMethod::Load => "load",
            BalanceMethod::Weight => "weight",
        }
    }
}

impl fmt::Display for BalanceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BalanceMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rr" => Ok(BalanceMethod::RoundRobin),
            "load" => Ok(BalanceMethod::Load),
            "weight" => Ok(BalanceMethod::Weight),
            other => Err(format!("unknown balance method \"{}\"", other)),
        }
    }
}

/// Primary key shared by every ordering.
pub(crate) fn by_status(a: &Endpoint, b: &Endpoint) -> Ordering {
    a.status().priority().cmp(&b.status().priority())
}
