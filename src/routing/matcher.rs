//! Route matching logic.
//!
//! # Responsibilities
//! - Decide whether an endpoint's inbound route accepts an incoming route
//! - Keep only the most specific matches: longest hostname, then longest path
//!
//! # Design Decisions
//! - Protocol, port and hostname match exactly or by wildcard
//! - Path matching is a case-insensitive prefix test on the normalized pathname
//! - A wildcard hostname has specificity 0, so any concrete hostname beats it
//! - Hostname specificity is decided before path specificity

use crate::load_balancer::endpoint::{Endpoint, Status};
use crate::routing::route::{Route, Wild};

/// An incoming wildcard is only accepted by a wildcard pattern.
fn component_matches<T: PartialEq>(pattern: &Wild<T>, value: &Wild<T>) -> bool {
    match value {
        Wild::Only(actual) => pattern.accepts(actual),
        Wild::Any => pattern.is_any(),
    }
}

/// Returns true if `pattern` (an inbound route) accepts `incoming`.
pub fn route_matches(pattern: &Route, incoming: &Route) -> bool {
    component_matches(pattern.protocol(), incoming.protocol())
        && component_matches(pattern.port(), incoming.port())
        && component_matches(pattern.hostname(), incoming.hostname())
        && incoming.pathname().starts_with(pattern.pathname())
}

fn hostname_specificity(route: &Route) -> usize {
    route.hostname().as_only().map(String::len).unwrap_or(0)
}

/// Every eligible endpoint whose inbound route matches `incoming`, narrowed to
/// the longest matching hostname and then the longest matching pathname.
/// Remaining ties are returned in table order.
pub fn find_routes<'a, I>(endpoints: I, incoming: &Route) -> Vec<&'a Endpoint>
where
    I: IntoIterator<Item = &'a Endpoint>,
{
    let matched: Vec<(&'a Endpoint, &'a Route)> = endpoints
        .into_iter()
        .filter(|ep| ep.status() != Status::Off)
        .filter_map(|ep| ep.inbound.as_ref().map(|inbound| (ep, inbound)))
        .filter(|(_, inbound)| route_matches(inbound, incoming))
        .collect();

    let longest_host = matched
        .iter()
        .map(|(_, inbound)| hostname_specificity(inbound))
        .max()
        .unwrap_or(0);
    let by_host: Vec<_> = matched
        .into_iter()
        .filter(|(_, inbound)| hostname_specificity(inbound) == longest_host)
        .collect();

    let longest_path = by_host
        .iter()
        .map(|(_, inbound)| inbound.pathname().len())
        .max()
        .unwrap_or(0);
    by_host
        .into_iter()
        .filter(|(_, inbound)| inbound.pathname().len() == longest_path)
        .map(|(ep, _)| ep)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::endpoint::EndpointConfig;

    #[test]
    fn wildcard_component_needs_wildcard_pattern() {
        let concrete = Route::routable("http://host:8080/").unwrap();
        let any_port = Route::routable("http://host:*/").unwrap();

        assert!(route_matches(&concrete, &Route::explicit("http://host:8080/x").unwrap()));
        assert!(!route_matches(&concrete, &any_port));
        assert!(route_matches(&any_port, &any_port));
        assert!(route_matches(&any_port, &Route::explicit("http://host:9000/").unwrap()));
    }

    fn endpoint(inbound: &str, out: &str) -> Endpoint {
        Endpoint::new(&EndpointConfig {
            inbound: Some(inbound.to_string()),
            outbound: Some(out.to_string()),
            ..Default::default()
        })
        .unwrap()
    }

    fn outs(found: &[&Endpoint]) -> Vec<String> {
        found.iter().map(|e| e.outbound.host().to_string()).collect()
    }

    #[test]
    fn longest_path_wins() {
        let table = vec![
            endpoint("http://host/a", "http://short"),
            endpoint("http://host/a/b", "http://long"),
        ];
        let incoming = Route::explicit("http://host/a/b/c").unwrap();
        assert_eq!(outs(&find_routes(&table, &incoming)), vec!["long"]);

        let incoming = Route::explicit("http://host/a/x").unwrap();
        assert_eq!(outs(&find_routes(&table, &incoming)), vec!["short"]);
    }

    #[test]
    fn hostname_dominates_path() {
        let table = vec![
            endpoint("http://foo.com/", "http://x"),
            endpoint("http://*/long/path", "http://y"),
        ];
        let incoming = Route::explicit("http://foo.com/long/path").unwrap();
        assert_eq!(outs(&find_routes(&table, &incoming)), vec!["x"]);

        let incoming = Route::explicit("http://bar.com/long/path").unwrap();
        assert_eq!(outs(&find_routes(&table, &incoming)), vec!["y"]);
    }

    #[test]
    fn ties_returned_in_table_order() {
        let table = vec![
            endpoint("http://host/app", "http://b1"),
            endpoint("http://host/app", "http://b2"),
        ];
        let incoming = Route::explicit("http://host/app/x").unwrap();
        assert_eq!(outs(&find_routes(&table, &incoming)), vec!["b1", "b2"]);
    }

    #[test]
    fn port_and_protocol_must_match_unless_wildcard() {
        let table = vec![
            endpoint("http://host:8080/", "http://p8080"),
            endpoint("https://host/", "http://tls"),
            endpoint("*://host:*/", "http://any"),
        ];
        let incoming = Route::explicit("http://host:8080/").unwrap();
        assert_eq!(outs(&find_routes(&table, &incoming)), vec!["p8080", "any"]);

        let incoming = Route::explicit("https://host/").unwrap();
        assert_eq!(outs(&find_routes(&table, &incoming)), vec!["tls", "any"]);

        let incoming = Route::explicit("http://host:9000/").unwrap();
        assert_eq!(outs(&find_routes(&table, &incoming)), vec!["any"]);
    }

    #[test]
    fn off_and_inbound_less_endpoints_never_match() {
        let mut off = endpoint("http://host/", "http://off");
        off.replace_status(Status::Off);
        let waf = Endpoint::new(&EndpointConfig {
            outbound: Some("http://waf".into()),
            ..Default::default()
        })
        .unwrap();
        let table = vec![off, waf];
        let incoming = Route::explicit("http://host/").unwrap();
        assert!(find_routes(&table, &incoming).is_empty());
    }

    #[test]
    fn no_match_for_other_host() {
        let table = vec![endpoint("http://host/", "http://b1")];
        let incoming = Route::explicit("http://elsewhere/").unwrap();
        assert!(find_routes(&table, &incoming).is_empty());
    }
}
