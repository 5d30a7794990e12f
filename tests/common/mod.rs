//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::{StatusCode, Uri},
    routing::any,
    Router,
};
use parking_lot::Mutex;

use script_proxy::http::chain::ChainSettings;
use script_proxy::http::server::AppState;
use script_proxy::lifecycle::Shutdown;
use script_proxy::load_balancer::counters::Counters;
use script_proxy::load_balancer::endpoint::{EndpointConfig, EndpointKind, Status, WafPolicy};
use script_proxy::load_balancer::pool::{Endpoints, SharedEndpoints};
use script_proxy::net::listener::Listeners;
use script_proxy::config::ListenerConfig;
use uuid::Uuid;

/// A request as seen by a mock backend.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub path_and_query: String,
    pub body: Bytes,
}

#[derive(Clone)]
struct Backend {
    log: Arc<Mutex<Vec<Recorded>>>,
    respond: Arc<dyn Fn(&Recorded) -> (u16, String) + Send + Sync>,
}

async fn record(State(backend): State<Backend>, uri: Uri, body: Bytes) -> (StatusCode, String) {
    let recorded = Recorded {
        path_and_query: uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string()),
        body,
    };
    let (status, body) = (backend.respond)(&recorded);
    backend.log.lock().push(recorded);
    (StatusCode::from_u16(status).unwrap(), body)
}

/// Start a programmable mock backend on an ephemeral port. Returns its address
/// and the log of every request it received.
pub async fn start_programmable_backend<F>(f: F) -> (SocketAddr, Arc<Mutex<Vec<Recorded>>>)
where
    F: Fn(&Recorded) -> (u16, String) + Send + Sync + 'static,
{
    let log = Arc::new(Mutex::new(Vec::new()));
    let backend = Backend {
        log: log.clone(),
        respond: Arc::new(f),
    };
    let app = Router::new()
        .route("/", any(record))
        .route("/{*path}", any(record))
        .with_state(backend);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, log)
}

/// Start a mock backend that always answers with the given status and body.
pub async fn start_mock_backend(
    status: u16,
    body: &'static str,
) -> (SocketAddr, Arc<Mutex<Vec<Recorded>>>) {
    start_programmable_backend(move |_| (status, body.to_string())).await
}

/// Start a backend that accepts requests and never answers them.
pub async fn start_hanging_backend() -> SocketAddr {
    let app = Router::new()
        .route("/", any(|| std::future::pending::<StatusCode>()))
        .route("/{*path}", any(|| std::future::pending::<StatusCode>()));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// Poll `check` every 20ms for up to a second.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..50 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// An address nothing listens on.
pub fn closed_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// A proxy listener on an ephemeral loopback port with its own empty table.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub endpoints: SharedEndpoints,
    pub counters: Arc<Counters>,
    pub shutdown: Shutdown,
}

impl TestProxy {
    pub async fn start(settings: ChainSettings) -> Self {
        let endpoints = Endpoints::new().shared();
        let counters = Arc::new(Counters::new());
        let state = AppState::new(endpoints.clone(), counters.clone(), settings, 1024 * 1024);
        let shutdown = Shutdown::new();
        let listeners = Listeners::local(state, shutdown.clone());
        let addr = listeners
            .open(&ListenerConfig {
                port: 0,
                cert: None,
                key: None,
            })
            .await
            .unwrap()
            .unwrap();
        Self {
            addr,
            endpoints,
            counters,
            shutdown,
        }
    }

    /// Define a service endpoint and set its committed status.
    pub fn service(&self, inbound: &str, out: SocketAddr, status: Status, waf: WafPolicy) -> Uuid {
        let id = self
            .endpoints
            .write()
            .define(&EndpointConfig {
                inbound: Some(inbound.to_string()),
                outbound: Some(format!("http://{}", out)),
                waf: Some(waf),
                ..Default::default()
            })
            .unwrap()
            .id;
        self.endpoints.write().set_status(id, status);
        id
    }

    /// Define a WAF endpoint and set its committed status.
    pub fn waf(&self, out: SocketAddr, status: Status) -> Uuid {
        let id = self
            .endpoints
            .write()
            .define(&EndpointConfig {
                kind: Some(EndpointKind::Waf),
                outbound: Some(format!("http://{}", out)),
                ..Default::default()
            })
            .unwrap()
            .id;
        self.endpoints.write().set_status(id, status);
        id
    }

    pub fn status(&self, id: Uuid) -> Status {
        self.endpoints.read().get(id).unwrap().status()
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}
