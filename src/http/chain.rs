//! Failover chain construction.
//!
//! # Responsibilities
//! - Turn the matching endpoints of a request into the ordered list of attempts
//! - Put a WAF step ahead of the first endpoint that asks for protection
//!
//! # Design Decisions
//! - The chain is built from copies taken under one read lock and never reordered
//! - The WAF step is inserted at most once per chain
//! - Without an eligible WAF, protected endpoints are dropped rather than served unscreened

use std::collections::VecDeque;

use crate::load_balancer::counters::Counters;
use crate::load_balancer::endpoint::{Endpoint, Status, WafPolicy};
use crate::load_balancer::pool::Endpoints;
use crate::load_balancer::BalanceMethod;
use crate::routing::route::Route;

/// Per-listener routing settings.
#[derive(Debug, Clone)]
pub struct ChainSettings {
    pub attempts: usize,
    pub consider: Vec<Status>,
    pub balance: BalanceMethod,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            attempts: 1,
            consider: vec![Status::Up, Status::Unknown, Status::Down],
            balance: BalanceMethod::RoundRobin,
        }
    }
}

/// Build the failover chain for `incoming`. `None` means no eligible route.
pub fn build(
    table: &Endpoints,
    incoming: &Route,
    settings: &ChainSettings,
    counters: &Counters,
) -> Option<VecDeque<Endpoint>> {
    let mut candidates: Vec<Endpoint> = table
        .find_routes(incoming)
        .into_iter()
        .filter(|ep| settings.consider.contains(&ep.status()))
        .collect();
    if candidates.is_empty() {
        return None;
    }

    settings.balance.sort(&mut candidates, counters);
    candidates.truncate(settings.attempts.max(1));

    let mut chain: VecDeque<Endpoint> = candidates.into();
    if let Some(first_protected) = chain.iter().position(|ep| ep.waf == WafPolicy::Protect) {
        match pick_waf(table, settings, counters) {
            Some(waf) => chain.insert(first_protected, waf),
            None => {
                tracing::warn!("no eligible WAF, dropping protected endpoints from the chain");
                chain.retain(|ep| ep.waf != WafPolicy::Protect);
            }
        }
    }
    Some(chain)
}

fn pick_waf(table: &Endpoints, settings: &ChainSettings, counters: &Counters) -> Option<Endpoint> {
    let mut wafs: Vec<Endpoint> = table
        .wafs()
        .into_iter()
        .filter(|ep| settings.consider.contains(&ep.status()))
        .collect();
    settings.balance.sort(&mut wafs, counters);
    wafs.into_iter().next()
}
