//! Endpoint abstraction.
//!
//! # Responsibilities
//! - Represent a single configured backend target (service or WAF)
//! - Hold the two-phase health state: staged `actual` vs committed `status`
//! - Track fairness accounting (`last` served, `counter`)
//!
//! # Design Decisions
//! - Identity is a UUID assigned at definition; `hash` identifies the configuration
//! - `status` is only writable through the table (`Endpoints`), which applies the
//!   peer counter reset on transitions into `up`
//! - The outbound route is mandatory and enforced by the type

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::routing::route::{Protocol, Route, RouteError, Wild};

/// Health status of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Unknown,
    Up,
    Down,
    /// Manual override: never matched for inbound traffic.
    Off,
}

impl Status {
    /// Preference order used by every balancing strategy (lower is better).
    pub fn priority(self) -> u8 {
        match self {
            Status::Up => 0,
            Status::Unknown => 1,
            Status::Down => 2,
            Status::Off => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Unknown => "unknown",
            Status::Up => "up",
            Status::Down => "down",
            Status::Off => "off",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unknown" => Ok(Status::Unknown),
            "up" => Ok(Status::Up),
            "down" => Ok(Status::Down),
            "off" => Ok(Status::Off),
            other => Err(format!("\"{}\" is not a valid status", other)),
        }
    }
}

/// Kind of endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    #[default]
    Service,
    Waf,
}

/// Whether requests to an endpoint must be cleared by a WAF first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WafPolicy {
    Protect,
    #[default]
    Bypass,
}

impl WafPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            WafPolicy::Protect => "protect",
            WafPolicy::Bypass => "bypass",
        }
    }
}

impl FromStr for WafPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "protect" => Ok(WafPolicy::Protect),
            "bypass" => Ok(WafPolicy::Bypass),
            other => Err(format!("\"{}\" is not a valid waf policy", other)),
        }
    }
}

/// Declaration of an endpoint, as passed to `define`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// `service` (default) or `waf`.
    #[serde(default, rename = "type", alias = "kind", skip_serializing_if = "Option::is_none")]
    pub kind: Option<EndpointKind>,

    /// HTTP method used for probing (default: GET).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Inbound pattern (routable form). Absent for WAF endpoints.
    #[serde(default, rename = "in", alias = "inbound", skip_serializing_if = "Option::is_none")]
    pub inbound: Option<String>,

    /// Outbound target (explicit form). Mandatory.
    #[serde(default, rename = "out", alias = "outbound", skip_serializing_if = "Option::is_none")]
    pub outbound: Option<String>,

    /// Probe target (explicit form); falls back to `out`.
    #[serde(default, alias = "health", skip_serializing_if = "Option::is_none")]
    pub probe: Option<String>,

    /// Weight for weighted balancing (default: 1.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,

    /// `protect` or `bypass` (default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waf: Option<WafPolicy>,
}

impl EndpointConfig {
    /// Content hash of the declaration, used for idempotent `define`.
    pub fn content_hash(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }
}

/// Endpoint declaration errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EndpointError {
    #[error("endpoint must specify an \"out\" route")]
    MissingOutbound,

    #[error("endpoint \"out\" route {0} uses https, which the proxy cannot forward to")]
    TlsOutbound(String),

    #[error(transparent)]
    Route(#[from] RouteError),
}

/// A configured backend target.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub id: Uuid,
    pub hash: String,
    pub kind: EndpointKind,
    pub method: String,
    pub inbound: Option<Route>,
    pub outbound: Route,
    pub probe: Option<Route>,
    pub weight: f64,
    pub waf: WafPolicy,
    status: Status,
    /// Most recent probe observation, not yet committed.
    pub actual: Status,
    pub code: Option<u16>,
    pub body: Option<String>,
    /// Last time this endpoint was chosen to serve a request.
    pub last: Option<Instant>,
    /// Requests served since the last counter reset.
    pub counter: u64,
}

impl Endpoint {
    /// Build an endpoint from its declaration.
    pub fn new(config: &EndpointConfig) -> Result<Self, EndpointError> {
        let outbound = match config.outbound.as_deref() {
            Some(out) if !out.trim().is_empty() => Route::explicit(out)?,
            _ => return Err(EndpointError::MissingOutbound),
        };
        // The forwarding client speaks plain HTTP only.
        if outbound.protocol() == &Wild::Only(Protocol::Https) {
            return Err(EndpointError::TlsOutbound(outbound.href().to_string()));
        }
        let inbound = config.inbound.as_deref().map(Route::routable).transpose()?;
        let probe = config.probe.as_deref().map(Route::explicit).transpose()?;

        Ok(Self {
            id: Uuid::new_v4(),
            hash: config.content_hash(),
            kind: config.kind.unwrap_or_default(),
            method: config
                .method
                .as_deref()
                .map(str::to_ascii_uppercase)
                .unwrap_or_else(|| "GET".to_string()),
            inbound,
            outbound,
            probe,
            weight: config.weight.unwrap_or(1.0),
            waf: config.waf.unwrap_or_default(),
            status: Status::Unknown,
            actual: Status::Unknown,
            code: None,
            body: None,
            last: None,
            counter: 0,
        })
    }

    /// Committed status; the value routing reads.
    pub fn status(&self) -> Status {
        self.status
    }

    /// Overwrite the committed status without any side effects. Callers that need
    /// the transition rules go through `Endpoints::set_status`.
    pub(crate) fn replace_status(&mut self, status: Status) -> Status {
        std::mem::replace(&mut self.status, status)
    }

    /// Route that probes are sent to.
    pub fn probe_target(&self) -> &Route {
        self.probe.as_ref().unwrap_or(&self.outbound)
    }

    /// Host of the inbound route, if any. Peers share this value.
    pub fn inbound_host(&self) -> Option<&str> {
        self.inbound.as_ref().map(Route::host)
    }

    pub fn stage_ping_results(&mut self, code: u16, status: Status, body: String) {
        self.code = Some(code);
        self.actual = status;
        self.body = Some(body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(out: &str) -> EndpointConfig {
        EndpointConfig {
            outbound: Some(out.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_applied() {
        let ep = Endpoint::new(&config("http://backend1:8100")).unwrap();
        assert_eq!(ep.method, "GET");
        assert_eq!(ep.weight, 1.0);
        assert_eq!(ep.waf, WafPolicy::Bypass);
        assert_eq!(ep.kind, EndpointKind::Service);
        assert_eq!(ep.status(), Status::Unknown);
        assert_eq!(ep.actual, Status::Unknown);
        assert!(ep.last.is_none());
        assert_eq!(ep.probe_target().href(), ep.outbound.href());
    }

    #[test]
    fn https_outbound_is_rejected() {
        let err = Endpoint::new(&config("https://secure-backend")).unwrap_err();
        assert!(matches!(err, EndpointError::TlsOutbound(ref out) if out.starts_with("https://secure-backend")));

        let probed = Endpoint::new(&EndpointConfig {
            outbound: Some("http://backend1".to_string()),
            probe: Some("https://backend1/health".to_string()),
            ..Default::default()
        });
        assert!(probed.is_ok());
    }

    #[test]
    fn outbound_is_mandatory() {
        let err = Endpoint::new(&EndpointConfig::default()).unwrap_err();
        assert_eq!(err, EndpointError::MissingOutbound);
    }

    #[test]
    fn malformed_inbound_fails_declaration() {
        let mut cfg = config("http://backend1");
        cfg.inbound = Some("http://:80/".into());
        assert!(matches!(Endpoint::new(&cfg), Err(EndpointError::Route(_))));
    }

    #[test]
    fn probe_route_preferred_over_outbound() {
        let mut cfg = config("http://backend1:8100");
        cfg.probe = Some("http://backend1:8100/health".into());
        let ep = Endpoint::new(&cfg).unwrap();
        assert_eq!(ep.probe_target().pathname(), "/health");
    }

    #[test]
    fn health_is_an_alias_for_probe() {
        let cfg: EndpointConfig =
            serde_json::from_str(r#"{"out":"http://b:1","health":"http://b:1/health"}"#).unwrap();
        assert_eq!(cfg.probe.as_deref(), Some("http://b:1/health"));
    }

    #[test]
    fn identical_configs_hash_equal() {
        let mut a = config("http://backend1");
        a.weight = Some(0.5);
        let b = a.clone();
        assert_eq!(a.content_hash(), b.content_hash());

        let mut c = a.clone();
        c.weight = Some(0.6);
        assert_ne!(a.content_hash(), c.content_hash());
    }

    #[test]
    fn status_parsing() {
        assert_eq!("UP".parse::<Status>().unwrap(), Status::Up);
        assert!("sideways".parse::<Status>().is_err());
        assert!(Status::Up.priority() < Status::Unknown.priority());
        assert!(Status::Unknown.priority() < Status::Down.priority());
    }
}
