//! Round-robin ordering.

use std::cmp::Ordering;

use crate::load_balancer::{by_status, endpoint::Endpoint};

/// Order by status, then by least recently served. Endpoints that have never
/// served a request come first.
pub fn sort_by_last(endpoints: &mut [Endpoint]) {
    endpoints.sort_by(|a, b| {
        by_status(a, b).then_with(|| match (a.last, b.last) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => x.cmp(&y),
        })
    });
}
