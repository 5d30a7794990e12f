//! Least-load ordering.

use crate::load_balancer::{counters::Counters, endpoint::Endpoint};

/// Order by status, then by the fewest active requests to the outbound host.
/// Ties keep their existing order.
///
/// Counts are read once per endpoint before sorting; requests opening or
/// closing concurrently cannot change a key mid-sort.
pub fn sort_by_load(endpoints: &mut [Endpoint], counters: &Counters) {
    endpoints.sort_by_cached_key(|ep| {
        (
            ep.status().priority(),
            counters.active(ep.outbound.host()),
        )
    });
}
