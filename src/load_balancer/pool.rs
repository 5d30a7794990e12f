//! The live endpoint table.
//!
//! # Responsibilities
//! - Own the ordered list of endpoints (insertion order breaks ties)
//! - Idempotent declaration keyed by configuration hash
//! - Report inbound ports no existing endpoint uses (new listeners)
//! - Apply status transitions, commits, downgrades and counter resets
//!
//! # Design Decisions
//! - The probe engine is the only caller that adds endpoints or commits
//! - The request path only touches `last`, `counter` and downgrades
//! - Shared as `Arc<RwLock<Endpoints>>`; no lock is held across I/O

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::health::probe::{ProbeOptions, ProbeRequest};
use crate::load_balancer::endpoint::{Endpoint, EndpointConfig, EndpointError, EndpointKind, Status};
use crate::routing::matcher;
use crate::routing::route::{Protocol, Route, Wild};

/// Counter value past which an endpoint resets itself and its peers.
pub const COUNTER_RESET_THRESHOLD: u64 = 100_000;

/// The table as shared between the request path and the probe engine.
pub type SharedEndpoints = Arc<RwLock<Endpoints>>;

/// A listener that should be opened because an endpoint introduced its port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRequest {
    pub protocol: Protocol,
    pub port: u16,
}

/// Outcome of `Endpoints::define`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    pub id: Uuid,
    /// False when an identical declaration already existed.
    pub created: bool,
    pub new_port: Option<PortRequest>,
}

/// Endpoints sharing one effective probe request.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeGroup {
    pub request: ProbeRequest,
    pub members: Vec<Uuid>,
}

/// Ordered, mutable list of endpoints.
#[derive(Debug, Default)]
pub struct Endpoints {
    entries: Vec<Endpoint>,
}

impl Endpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedEndpoints {
        Arc::new(RwLock::new(self))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.entries.iter()
    }

    pub fn get(&self, id: Uuid) -> Option<&Endpoint> {
        self.entries.iter().find(|ep| ep.id == id)
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Endpoint> {
        self.entries.iter_mut().find(|ep| ep.id == id)
    }

    /// Declare an endpoint. Re-declaring an identical configuration returns the
    /// existing endpoint unchanged.
    pub fn define(&mut self, config: &EndpointConfig) -> Result<Definition, EndpointError> {
        let hash = config.content_hash();
        if let Some(existing) = self.entries.iter().find(|ep| ep.hash == hash) {
            return Ok(Definition {
                id: existing.id,
                created: false,
                new_port: None,
            });
        }

        let endpoint = Endpoint::new(config)?;
        tracing::info!(
            endpoint = %endpoint.id,
            inbound = %endpoint.inbound.as_ref().map(Route::href).unwrap_or(""),
            outbound = %endpoint.outbound,
            "endpoint was defined"
        );

        let new_port = endpoint.inbound.as_ref().and_then(|inbound| {
            let port = *inbound.port().as_only()?;
            let seen = self.entries.iter().any(|existing| {
                existing
                    .inbound
                    .as_ref()
                    .map(|r| r.port() == &Wild::Only(port))
                    .unwrap_or(false)
            });
            if seen {
                return None;
            }
            let protocol = inbound.protocol().as_only().copied().unwrap_or(Protocol::Http);
            Some(PortRequest { protocol, port })
        });

        let id = endpoint.id;
        self.entries.push(endpoint);
        Ok(Definition {
            id,
            created: true,
            new_port,
        })
    }

    /// Map script handles back to endpoints, dropping unknown ids.
    pub fn resolve(&self, ids: &[Uuid]) -> Vec<&Endpoint> {
        ids.iter().filter_map(|id| self.get(*id)).collect()
    }

    /// Matching, eligible endpoints for an incoming route (request-local copies).
    pub fn find_routes(&self, incoming: &Route) -> Vec<Endpoint> {
        matcher::find_routes(&self.entries, incoming)
            .into_iter()
            .cloned()
            .collect()
    }

    /// WAF endpoints that are not switched off, in table order.
    pub fn wafs(&self) -> Vec<Endpoint> {
        self.entries
            .iter()
            .filter(|ep| ep.kind == EndpointKind::Waf && ep.status() != Status::Off)
            .cloned()
            .collect()
    }

    /// Set the committed status, resetting peer counters on a transition into `up`.
    pub fn set_status(&mut self, id: Uuid, status: Status) {
        let Some(endpoint) = self.get_mut(id) else {
            return;
        };
        let previous = endpoint.replace_status(status);
        let peer_host = endpoint.inbound_host().map(str::to_string);
        if status == Status::Up && previous != Status::Up {
            if let Some(host) = peer_host {
                self.reset_counters(&host);
            }
        }
    }

    /// Copy every staged `actual` into `status`. Endpoints switched `off` stay off.
    pub fn commit(&mut self) {
        let staged: Vec<(Uuid, Status)> = self
            .entries
            .iter()
            .filter(|ep| ep.status() != Status::Off)
            .map(|ep| (ep.id, ep.actual))
            .collect();
        for (id, actual) in staged {
            self.set_status(id, actual);
        }
    }

    /// Zero the fairness counter of every endpoint whose inbound host is `host`.
    pub fn reset_counters(&mut self, host: &str) {
        for endpoint in self.entries.iter_mut() {
            if endpoint.counter > 0 && endpoint.inbound_host() == Some(host) {
                endpoint.counter = 0;
                tracing::info!(endpoint = %endpoint.id, in_host = %host, "endpoint had its counters reset");
            }
        }
    }

    /// Force an `up` endpoint back to `unknown` after a failed proxied request.
    /// Returns true if the status changed.
    pub fn downgrade(&mut self, id: Uuid) -> bool {
        match self.get_mut(id) {
            Some(endpoint) if endpoint.status() == Status::Up => {
                endpoint.replace_status(Status::Unknown);
                true
            }
            _ => false,
        }
    }

    /// Record that an endpoint was chosen to serve a request.
    pub fn mark_served(&mut self, id: Uuid) {
        let Some(endpoint) = self.get_mut(id) else {
            return;
        };
        endpoint.last = Some(Instant::now());
        endpoint.counter += 1;
        if endpoint.counter > COUNTER_RESET_THRESHOLD {
            if let Some(host) = endpoint.inbound_host().map(str::to_string) {
                self.reset_counters(&host);
            }
        }
    }

    pub fn stage_ping_results(&mut self, id: Uuid, code: u16, status: Status, body: String) {
        if let Some(endpoint) = self.get_mut(id) {
            endpoint.stage_ping_results(code, status, body);
        }
    }
}

/// Partition endpoints into groups sharing an identical effective probe request,
/// in order of first appearance.
pub fn group_by_probe_options<'a, I>(endpoints: I, options: &ProbeOptions) -> Vec<ProbeGroup>
where
    I: IntoIterator<Item = &'a Endpoint>,
{
    let mut groups: Vec<ProbeGroup> = Vec::new();
    for endpoint in endpoints {
        let request = ProbeRequest::for_endpoint(endpoint, options);
        match groups.iter_mut().find(|g| g.request == request) {
            Some(group) => group.members.push(endpoint.id),
            None => groups.push(ProbeGroup {
                request,
                members: vec![endpoint.id],
            }),
        }
    }
    groups
}
