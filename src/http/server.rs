//! HTTP server setup and the proxy handler.
//!
//! # Responsibilities
//! - Create the Axum Router shared by every listener
//! - Resolve the incoming route and build the failover chain
//! - Forward the request along the chain until an endpoint answers
//! - Keep the connection counters and endpoint fairness accounting current
//!
//! # Design Decisions
//! - The request body is buffered once so it can be replayed on failover
//! - A response below 500 is streamed back as-is; 5xx and transport errors fail over
//! - The counter of a served request is released when the response body is dropped

use std::collections::VecDeque;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, request::Parts, HeaderMap, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use futures_util::StreamExt;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::http::chain::{self, ChainSettings};
use crate::load_balancer::counters::{CounterGuard, Counters};
use crate::load_balancer::endpoint::{Endpoint, EndpointKind};
use crate::load_balancer::pool::SharedEndpoints;
use crate::load_balancer::BalanceMethod;
use crate::routing::route::{transform, Protocol, Route};

pub const X_FORWARDED_HOST: &str = "x-forwarded-host";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub endpoints: SharedEndpoints,
    pub counters: Arc<Counters>,
    pub client: Client<HttpConnector, Body>,
    pub settings: Arc<ChainSettings>,
    pub max_body_bytes: usize,
    /// Protocol of the listener this state serves.
    pub protocol: Protocol,
}

impl AppState {
    pub fn new(
        endpoints: SharedEndpoints,
        counters: Arc<Counters>,
        settings: ChainSettings,
        max_body_bytes: usize,
    ) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            endpoints,
            counters,
            client,
            settings: Arc::new(settings),
            max_body_bytes,
            protocol: Protocol::Http,
        }
    }

    /// Same state, for a listener speaking `protocol`.
    pub fn for_protocol(&self, protocol: Protocol) -> Self {
        Self {
            protocol,
            ..self.clone()
        }
    }
}

/// Build the Axum router with all middleware layers.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/{*path}", any(proxy_handler))
        .route("/", any(proxy_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').next().unwrap_or("").trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `X-Forwarded-Host` (first value) wins over `Host`, which wins over the URI authority.
fn effective_host(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    header_value(headers, X_FORWARDED_HOST)
        .or_else(|| header_value(headers, header::HOST.as_str()))
        .or_else(|| uri.authority().map(|a| a.to_string()))
}

fn status_only(status: StatusCode) -> Response {
    status.into_response()
}

/// Main proxy handler.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let cid = Uuid::new_v4();

    let Some(host) = effective_host(request.headers(), request.uri()) else {
        tracing::debug!(%cid, "no host was provided => 404");
        return status_only(StatusCode::NOT_FOUND);
    };

    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let incoming = match Route::explicit(&format!("{}://{}{}", state.protocol, host, path_and_query)) {
        Ok(route) => route,
        Err(e) => {
            tracing::debug!(%cid, error = %e, "incoming request could not be routed => 404");
            return status_only(StatusCode::NOT_FOUND);
        }
    };
    tracing::debug!(%cid, incoming = %incoming, "incoming request");

    let chain = {
        let table = state.endpoints.read();
        chain::build(&table, &incoming, &state.settings, &state.counters)
    };
    let Some(chain) = chain else {
        tracing::debug!(%cid, "no matching routes were found => 404");
        return status_only(StatusCode::NOT_FOUND);
    };
    tracing::debug!(%cid, candidates = chain.len(), "failover chain built");

    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(%cid, error = %e, "request body could not be buffered => 413");
            return status_only(StatusCode::PAYLOAD_TOO_LARGE);
        }
    };

    walk_chain(&state, cid, &incoming, chain, &parts, body).await
}

enum Attempt {
    /// Stop and answer the client.
    Respond(Response),
    /// The WAF cleared the request; continue with the next endpoint.
    Cleared,
    /// The endpoint failed; try the next one.
    Failed,
}

/// Try each endpoint of the chain in order. Endpoints are popped before they
/// are tried, so a failed endpoint is never retried within the same request.
async fn walk_chain(
    state: &AppState,
    cid: Uuid,
    incoming: &Route,
    mut chain: VecDeque<Endpoint>,
    parts: &Parts,
    body: Bytes,
) -> Response {
    while let Some(endpoint) = chain.pop_front() {
        let path = match &endpoint.inbound {
            Some(inbound) => transform(inbound, &endpoint.outbound, incoming.path()) + incoming.search(),
            None if endpoint.kind == EndpointKind::Waf => {
                format!("/{}{}{}", incoming.hostname(), incoming.path(), incoming.search())
            }
            None => {
                tracing::debug!(%cid, "the next endpoint was not suitable because it lacked an in route");
                continue;
            }
        };

        match attempt(state, cid, &endpoint, &path, parts, body.clone()).await {
            Attempt::Respond(response) => return response,
            Attempt::Cleared | Attempt::Failed => continue,
        }
    }

    tracing::error!(%cid, "all routes were exhausted, none were successful");
    status_only(StatusCode::SERVICE_UNAVAILABLE)
}

async fn attempt(
    state: &AppState,
    cid: Uuid,
    endpoint: &Endpoint,
    path: &str,
    parts: &Parts,
    body: Bytes,
) -> Attempt {
    log_choice(state, cid, endpoint);

    let target = format!("{}://{}{}", endpoint.outbound.protocol(), endpoint.outbound.host(), path);
    let uri: Uri = match target.parse() {
        Ok(uri) => uri,
        Err(e) => {
            tracing::debug!(%cid, url = %target, error = %e, "rewritten URL is invalid");
            return Attempt::Failed;
        }
    };
    tracing::debug!(%cid, url = %uri, "the URL was rewritten");

    state.endpoints.write().mark_served(endpoint.id);
    let guard = state.counters.open(endpoint.outbound.host());

    let mut outbound = Request::builder()
        .method(parts.method.clone())
        .uri(uri);
    if let Some(headers) = outbound.headers_mut() {
        for (k, v) in parts.headers.iter() {
            headers.append(k.clone(), v.clone());
        }
    }
    let outbound = match outbound.body(Body::from(body)) {
        Ok(req) => req,
        Err(e) => {
            tracing::debug!(%cid, error = %e, "outbound request could not be built");
            return Attempt::Failed;
        }
    };

    let is_waf = endpoint.kind == EndpointKind::Waf;
    match state.client.request(outbound).await {
        Ok(response) if is_waf => {
            let status = response.status();
            drop(guard);
            if status == StatusCode::OK {
                tracing::debug!(%cid, "the WAF found no vulnerabilities; the request will be proxied");
                Attempt::Cleared
            } else {
                tracing::debug!(%cid, code = status.as_u16(), "the WAF did not clear the request => 403");
                Attempt::Respond(status_only(StatusCode::FORBIDDEN))
            }
        }
        Ok(response) if response.status().is_server_error() => {
            drop(guard);
            downgrade(state, cid, endpoint, &format!("HTTP status code {}", response.status().as_u16()));
            Attempt::Failed
        }
        Ok(response) => Attempt::Respond(stream_back(response, guard)),
        Err(e) => {
            drop(guard);
            downgrade(state, cid, endpoint, &e.to_string());
            if is_waf {
                tracing::debug!(%cid, "the WAF could not be reached => 403");
                return Attempt::Respond(status_only(StatusCode::FORBIDDEN));
            }
            Attempt::Failed
        }
    }
}

fn log_choice(state: &AppState, cid: Uuid, endpoint: &Endpoint) {
    let out = endpoint.outbound.href();
    if endpoint.kind == EndpointKind::Waf {
        tracing::debug!(%cid, out, "WAF protection was chosen");
        return;
    }
    match state.settings.balance {
        BalanceMethod::Load => {
            let active = state.counters.active(endpoint.outbound.host());
            tracing::debug!(%cid, out, status = %endpoint.status(), active, "route was chosen");
        }
        BalanceMethod::Weight => {
            tracing::debug!(
                %cid,
                out,
                status = %endpoint.status(),
                counter = endpoint.counter,
                weight = endpoint.weight,
                "route was chosen"
            );
        }
        BalanceMethod::RoundRobin => {
            tracing::debug!(%cid, out, status = %endpoint.status(), "route was chosen");
        }
    }
}

fn downgrade(state: &AppState, cid: Uuid, endpoint: &Endpoint, reason: &str) {
    if state.endpoints.write().downgrade(endpoint.id) {
        tracing::debug!(%cid, reason, "the response failed, endpoint status downgraded to \"unknown\"");
    } else {
        tracing::debug!(%cid, reason, "the response failed");
    }
}

/// Stream the backend response to the client, holding the connection counter
/// until the body is finished or dropped.
fn stream_back(response: Response<hyper::body::Incoming>, guard: CounterGuard) -> Response {
    let (parts, body) = response.into_parts();
    let stream = Body::new(body).into_data_stream().map(move |chunk| {
        let _held = &guard;
        chunk
    });
    Response::from_parts(parts, Body::from_stream(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn forwarded_host_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("proxy.local"));
        headers.insert(X_FORWARDED_HOST, HeaderValue::from_static("app.example, edge.example"));
        let uri: Uri = "/path".parse().unwrap();
        assert_eq!(effective_host(&headers, &uri).as_deref(), Some("app.example"));
    }

    #[test]
    fn host_header_then_authority() {
        let mut headers = HeaderMap::new();
        let uri: Uri = "http://from-uri:8080/path".parse().unwrap();
        assert_eq!(effective_host(&headers, &uri).as_deref(), Some("from-uri:8080"));

        headers.insert(header::HOST, HeaderValue::from_static("proxy.local"));
        assert_eq!(effective_host(&headers, &uri).as_deref(), Some("proxy.local"));
    }

    #[test]
    fn no_host_at_all() {
        let uri: Uri = "/path".parse().unwrap();
        assert!(effective_host(&HeaderMap::new(), &uri).is_none());
    }
}
