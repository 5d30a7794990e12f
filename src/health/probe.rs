//! Active health probing.
//!
//! # Responsibilities
//! - Build the effective probe request of an endpoint (method, URL, timeout)
//! - Issue one request per group of endpoints sharing a probe request
//! - Stage the observation on every group member
//!
//! # Design Decisions
//! - 2xx is `up`; any other status, a timeout or a connection error is `down`
//! - Non-HTTP failures stage code 0 and the error text as body
//! - Probes run concurrently; the table is only locked to resolve and to stage

use std::time::Duration;

use futures_util::future::join_all;
use uuid::Uuid;

use crate::load_balancer::endpoint::{Endpoint, Status};
use crate::load_balancer::pool::{group_by_probe_options, SharedEndpoints};

/// Default probe timeout.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 30_000;

/// Caller-supplied probe options (`ping(handles, #{ timeout: ms })`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeOptions {
    pub timeout_ms: Option<u64>,
}

/// The effective request a probe sends.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProbeRequest {
    pub method: String,
    pub url: String,
    pub timeout_ms: u64,
}

impl ProbeRequest {
    pub fn for_endpoint(endpoint: &Endpoint, options: &ProbeOptions) -> Self {
        Self {
            method: endpoint.method.clone(),
            url: endpoint.probe_target().href().to_string(),
            timeout_ms: options.timeout_ms.unwrap_or(DEFAULT_PROBE_TIMEOUT_MS),
        }
    }
}

/// Result of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub code: u16,
    pub status: Status,
    pub body: String,
}

/// Sends probe requests and stages their results in the table.
#[derive(Debug, Clone)]
pub struct Prober {
    client: reqwest::Client,
}

impl Prober {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent("script-proxy-probe")
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Probe the given endpoints, one request per distinct probe target, and
    /// stage the results. Completes once every probe has finished.
    pub async fn ping_all(&self, endpoints: &SharedEndpoints, ids: &[Uuid], options: &ProbeOptions) {
        let groups = {
            let table = endpoints.read();
            group_by_probe_options(table.resolve(ids), options)
        };

        let observations = join_all(groups.iter().map(|g| self.ping_one(&g.request))).await;

        let mut table = endpoints.write();
        for (group, observation) in groups.iter().zip(observations) {
            for id in &group.members {
                table.stage_ping_results(
                    *id,
                    observation.code,
                    observation.status,
                    observation.body.clone(),
                );
            }
        }
    }

    /// Send a single probe request.
    pub async fn ping_one(&self, request: &ProbeRequest) -> Observation {
        tracing::info!(url = %request.url, "probing");

        let method = match reqwest::Method::from_bytes(request.method.as_bytes()) {
            Ok(m) => m,
            Err(e) => {
                tracing::info!(url = %request.url, error = %e, "probe found endpoint to be down");
                return Observation {
                    code: 0,
                    status: Status::Down,
                    body: e.to_string(),
                };
            }
        };

        let result = self
            .client
            .request(method, &request.url)
            .timeout(Duration::from_millis(request.timeout_ms))
            .send()
            .await;

        match result {
            Ok(response) => {
                let code = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                if (200..=299).contains(&code) {
                    tracing::info!(url = %request.url, "probe found endpoint to be up");
                    Observation {
                        code,
                        status: Status::Up,
                        body,
                    }
                } else {
                    tracing::info!(url = %request.url, code, "probe found endpoint to be down");
                    Observation {
                        code,
                        status: Status::Down,
                        body,
                    }
                }
            }
            Err(e) => {
                tracing::info!(url = %request.url, error = %e, "probe found endpoint to be down");
                Observation {
                    code: 0,
                    status: Status::Down,
                    body: e.to_string(),
                }
            }
        }
    }
}

impl Default for Prober {
    fn default() -> Self {
        Self::new()
    }
}
