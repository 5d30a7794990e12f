//! Normalized routes.
//!
//! # Responsibilities
//! - Parse route strings in explicit form (outbound/probe targets, incoming requests)
//! - Parse route strings in routable form (inbound patterns, `*` wildcards)
//! - Splice an incoming path onto an outbound base path
//!
//! # Design Decisions
//! - A wildcard is an explicit `Wild::Any`, never a null or a magic port number
//! - Hostname and pathname are lowercased for matching; the raw path is kept for forwarding
//! - Only `http` and `https` are accepted protocols

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Route parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("ROUTE {0}: must specify a protocol.")]
    MissingProtocol(String),

    #[error("ROUTE {0}: must specify a protocol of \"http\" or \"https\".")]
    UnsupportedProtocol(String),

    #[error("ROUTE {0}: must specify a valid host/hostname.")]
    MissingHost(String),

    #[error("ROUTE {0}: must specify a valid port.")]
    InvalidPort(String),

    #[error("ROUTE {0}: must specify a pathname starting with \"/\".")]
    InvalidPath(String),
}

/// Protocol of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    /// Port implied when a URL does not carry one.
    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Http => 80,
            Protocol::Https => 443,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            _ => Err(()),
        }
    }
}

/// A route component that is either concrete or `*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Wild<T> {
    Any,
    Only(T),
}

impl<T: PartialEq> Wild<T> {
    /// Returns true if this pattern accepts `value`.
    pub fn accepts(&self, value: &T) -> bool {
        match self {
            Wild::Any => true,
            Wild::Only(expected) => expected == value,
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Wild::Any)
    }

    pub fn as_only(&self) -> Option<&T> {
        match self {
            Wild::Any => None,
            Wild::Only(value) => Some(value),
        }
    }
}

impl<T: fmt::Display> fmt::Display for Wild<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Wild::Any => f.write_str("*"),
            Wild::Only(value) => value.fmt(f),
        }
    }
}

/// A normalized, parsed URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    protocol: Wild<Protocol>,
    port: Wild<u16>,
    host: String,
    hostname: Wild<String>,
    pathname: String,
    path: String,
    search: String,
    href: String,
}

impl Route {
    /// Parse a fully specified URL: protocol and host are mandatory, the port
    /// defaults to the one implied by the protocol.
    pub fn explicit(href: &str) -> Result<Self, RouteError> {
        let url = Url::parse(href).map_err(|e| match e {
            url::ParseError::RelativeUrlWithoutBase => RouteError::MissingProtocol(href.to_string()),
            url::ParseError::InvalidPort => RouteError::InvalidPort(href.to_string()),
            _ => RouteError::MissingHost(href.to_string()),
        })?;

        let protocol: Protocol = url
            .scheme()
            .parse()
            .map_err(|_| RouteError::UnsupportedProtocol(href.to_string()))?;

        let hostname = match url.host_str() {
            Some(h) if !h.is_empty() => h.to_ascii_lowercase(),
            _ => return Err(RouteError::MissingHost(href.to_string())),
        };

        let port = url.port().unwrap_or_else(|| protocol.default_port());
        let host = match url.port() {
            Some(p) => format!("{}:{}", hostname, p),
            None => hostname.clone(),
        };

        let path = url.path().to_string();
        let search = url.query().map(|q| format!("?{}", q)).unwrap_or_default();

        Ok(Self {
            protocol: Wild::Only(protocol),
            port: Wild::Only(port),
            host,
            hostname: Wild::Only(hostname),
            pathname: path.to_ascii_lowercase(),
            path,
            search,
            href: url.to_string(),
        })
    }

    /// Parse an inbound pattern. `*` may stand in for the protocol, the hostname
    /// or the port; a missing protocol is a wildcard protocol, and a missing port
    /// is either implied by a concrete protocol or a wildcard.
    pub fn routable(href: &str) -> Result<Self, RouteError> {
        let trimmed = href.trim();

        let (protocol, rest) = match trimmed.split_once("://") {
            Some(("*", rest)) => (Wild::Any, rest),
            Some((scheme, rest)) => {
                let protocol: Protocol = scheme
                    .parse()
                    .map_err(|_| RouteError::UnsupportedProtocol(href.to_string()))?;
                (Wild::Only(protocol), rest)
            }
            None => (Wild::Any, trimmed),
        };

        let (authority, path_and_query) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, "/"),
        };

        let (path, search) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, format!("?{}", query)),
            None => (path_and_query, String::new()),
        };
        if !path.starts_with('/') {
            return Err(RouteError::InvalidPath(href.to_string()));
        }

        let (raw_hostname, raw_port) = match authority.rsplit_once(':') {
            Some((h, p)) if !p.contains(']') => (h, Some(p)),
            _ => (authority, None),
        };
        if raw_hostname.is_empty() {
            return Err(RouteError::MissingHost(href.to_string()));
        }
        let hostname = if raw_hostname == "*" {
            Wild::Any
        } else {
            Wild::Only(raw_hostname.to_ascii_lowercase())
        };

        let port = match (raw_port, protocol.as_only()) {
            (Some("*"), _) => Wild::Any,
            (Some(p), _) => match p.parse::<u16>() {
                Ok(n) if n > 0 => Wild::Only(n),
                _ => return Err(RouteError::InvalidPort(href.to_string())),
            },
            (None, Some(proto)) => Wild::Only(proto.default_port()),
            (None, None) => Wild::Any,
        };

        let host = match raw_port {
            Some(p) => format!("{}:{}", hostname, p),
            None => hostname.to_string(),
        };
        let href = format!("{}://{}{}{}", protocol, host, path, search);

        Ok(Self {
            protocol,
            port,
            host: host.to_ascii_lowercase(),
            hostname,
            pathname: path.to_ascii_lowercase(),
            path: path.to_string(),
            search,
            href,
        })
    }

    pub fn protocol(&self) -> &Wild<Protocol> {
        &self.protocol
    }

    pub fn port(&self) -> &Wild<u16> {
        &self.port
    }

    /// `hostname[:port]` as written, lowercased.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn hostname(&self) -> &Wild<String> {
        &self.hostname
    }

    /// Lowercased path, used for matching.
    pub fn pathname(&self) -> &str {
        &self.pathname
    }

    /// Path with its original case, used for forwarding.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Query string including the leading `?`, or empty.
    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn href(&self) -> &str {
        &self.href
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.href)
    }
}

/// Rewrite `path` (which matched `from`) onto the base path of `to`.
///
/// The matched prefix is stripped, the outbound base path prepended, and runs
/// of slashes collapsed to one.
pub fn transform(from: &Route, to: &Route, path: &str) -> String {
    let prefix_len = if path.to_ascii_lowercase().starts_with(from.pathname()) {
        from.pathname().len()
    } else {
        0
    };
    let trimmed = path.get(prefix_len..).unwrap_or("");
    collapse_slashes(&format!("{}{}", to.path(), trimmed))
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut last_was_slash = false;
    for c in path.chars() {
        if c == '/' {
            if !last_was_slash {
                out.push(c);
            }
            last_was_slash = true;
        } else {
            out.push(c);
            last_was_slash = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_requires_protocol() {
        assert!(matches!(
            Route::explicit("backend1:8100/health"),
            Err(RouteError::UnsupportedProtocol(_)) | Err(RouteError::MissingProtocol(_))
        ));
        assert!(matches!(
            Route::explicit("/just/a/path"),
            Err(RouteError::MissingProtocol(_))
        ));
        assert!(matches!(
            Route::explicit("ftp://files.example.com/"),
            Err(RouteError::UnsupportedProtocol(_))
        ));
    }

    #[test]
    fn explicit_requires_host() {
        assert!(Route::explicit("http://").is_err());
        assert!(Route::explicit("http://:8080/").is_err());
    }

    #[test]
    fn explicit_defaults_port_from_protocol() {
        let http = Route::explicit("http://Example.COM/App").unwrap();
        assert_eq!(http.port(), &Wild::Only(80));
        assert_eq!(http.host(), "example.com");
        assert_eq!(http.hostname(), &Wild::Only("example.com".to_string()));
        assert_eq!(http.pathname(), "/app");
        assert_eq!(http.path(), "/App");

        let https = Route::explicit("https://example.com").unwrap();
        assert_eq!(https.port(), &Wild::Only(443));
        assert_eq!(https.pathname(), "/");
    }

    #[test]
    fn explicit_keeps_port_and_search() {
        let route = Route::explicit("http://backend1:8100/health?deep=1").unwrap();
        assert_eq!(route.port(), &Wild::Only(8100));
        assert_eq!(route.host(), "backend1:8100");
        assert_eq!(route.search(), "?deep=1");
    }

    #[test]
    fn routable_accepts_wildcard_port() {
        let route = Route::routable("http://api.example.com:*/v1").unwrap();
        assert_eq!(route.port(), &Wild::Any);
        assert_eq!(route.protocol(), &Wild::Only(Protocol::Http));
        assert_eq!(route.pathname(), "/v1");
    }

    #[test]
    fn routable_accepts_wildcard_protocol_and_host() {
        let route = Route::routable("*:8081").unwrap();
        assert_eq!(route.protocol(), &Wild::Any);
        assert_eq!(route.hostname(), &Wild::Any);
        assert_eq!(route.port(), &Wild::Only(8081));

        let route = Route::routable("*://*:*/").unwrap();
        assert!(route.protocol().is_any());
        assert!(route.port().is_any());
        assert!(route.hostname().is_any());
    }

    #[test]
    fn routable_without_protocol_or_port_is_wildcard_port() {
        let route = Route::routable("example.com/app").unwrap();
        assert_eq!(route.protocol(), &Wild::Any);
        assert_eq!(route.port(), &Wild::Any);
    }

    #[test]
    fn routable_rejects_missing_hostname() {
        assert!(matches!(
            Route::routable("http://:8080/"),
            Err(RouteError::MissingHost(_))
        ));
        assert!(matches!(
            Route::routable("http://host:eighty/"),
            Err(RouteError::InvalidPort(_))
        ));
    }

    #[test]
    fn transform_strips_prefix_and_prepends_base() {
        let incoming = Route::explicit("http://host/app/x").unwrap();
        let from = Route::routable("http://host/app").unwrap();
        let to = Route::explicit("http://backend1").unwrap();
        assert_eq!(transform(&from, &to, incoming.path()), "/x");

        let to = Route::explicit("http://backend1/base/").unwrap();
        assert_eq!(transform(&from, &to, incoming.path()), "/base/x");
    }

    #[test]
    fn transform_is_identity_for_same_route() {
        let route = Route::routable("http://host/app").unwrap();
        assert_eq!(transform(&route, &route, "/app/x/y"), "/app/x/y");
        assert_eq!(transform(&route, &route, "/app//x///y"), "/app/x/y");
    }

    #[test]
    fn transform_never_shortens_base() {
        let from = Route::routable("http://host/app").unwrap();
        let to = Route::explicit("http://backend/svc/v2").unwrap();
        assert!(transform(&from, &to, "/app").starts_with("/svc/v2"));
    }

    #[test]
    fn transform_preserves_case_of_remainder() {
        let from = Route::routable("http://host/App").unwrap();
        let to = Route::explicit("http://backend").unwrap();
        assert_eq!(transform(&from, &to, "/app/Reports/Q1"), "/Reports/Q1");
    }
}
