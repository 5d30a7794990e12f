//! Weighted ordering.
//!
//! Each endpoint accrues a debt of `counter * (1 - weight)`; the smallest debt
//! is preferred. A weight close to 1 accrues debt slowly, so the endpoint wins
//! repeatedly, which approximates proportional traffic share without randomness.

use crate::load_balancer::{by_status, endpoint::Endpoint};

pub fn debt(endpoint: &Endpoint) -> f64 {
    endpoint.counter as f64 * (1.0 - endpoint.weight)
}

/// Order by status, then by ascending debt.
pub fn sort_by_weight(endpoints: &mut [Endpoint]) {
    endpoints.sort_by(|a, b| by_status(a, b).then_with(|| debt(a).total_cmp(&debt(b))));
}
