//! Listener management.
//!
//! # Responsibilities
//! - Bind plaintext and TLS listeners that all serve the proxy router
//! - Open listeners for ports introduced by newly defined endpoints
//! - Stop every listener gracefully on shutdown
//!
//! # Design Decisions
//! - One listener per port; opening a port twice is a no-op
//! - Binding happens before the serve task is spawned so errors surface to the caller
//! - Dynamically requested ports are plaintext; TLS needs a configured cert and key

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::ListenerConfig;
use crate::http::server::{build_router, AppState};
use crate::lifecycle::Shutdown;
use crate::load_balancer::pool::PortRequest;
use crate::net::tls::load_tls_config;
use crate::routing::route::Protocol;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Failed to bind port {port}: {source}")]
    Bind { port: u16, source: std::io::Error },

    #[error("Failed to load TLS material for port {port}: {source}")]
    Tls { port: u16, source: std::io::Error },
}

/// The set of open listeners.
pub struct Listeners {
    state: AppState,
    shutdown: Shutdown,
    open: Mutex<HashSet<u16>>,
    bind_ip: Ipv4Addr,
    drain: Duration,
}

impl Listeners {
    pub fn new(state: AppState, shutdown: Shutdown) -> Arc<Self> {
        Arc::new(Self {
            state,
            shutdown,
            open: Mutex::new(HashSet::new()),
            bind_ip: Ipv4Addr::UNSPECIFIED,
            drain: Duration::from_secs(10),
        })
    }

    /// Bind to loopback instead of every interface.
    pub fn local(state: AppState, shutdown: Shutdown) -> Arc<Self> {
        Arc::new(Self {
            state,
            shutdown,
            open: Mutex::new(HashSet::new()),
            bind_ip: Ipv4Addr::LOCALHOST,
            drain: Duration::from_secs(1),
        })
    }

    pub fn is_open(&self, port: u16) -> bool {
        self.open.lock().contains(&port)
    }

    /// Open a listener. Returns the bound address, or `None` if the port was already open.
    /// Port 0 binds an ephemeral port and is never deduplicated.
    pub async fn open(&self, config: &ListenerConfig) -> Result<Option<SocketAddr>, ListenerError> {
        let port = config.port;
        if port != 0 && !self.open.lock().insert(port) {
            tracing::debug!(port, "listener already open");
            return Ok(None);
        }

        let result = match (&config.cert, &config.key) {
            (Some(cert), Some(key)) => self.serve_tls(port, cert, key).await,
            _ => self.serve_plain(port).await,
        };
        if result.is_err() && port != 0 {
            self.open.lock().remove(&port);
        }
        result.map(Some)
    }

    async fn serve_plain(&self, port: u16) -> Result<SocketAddr, ListenerError> {
        let listener = TcpListener::bind((self.bind_ip, port))
            .await
            .map_err(|source| ListenerError::Bind { port, source })?;
        let addr = listener
            .local_addr()
            .map_err(|source| ListenerError::Bind { port, source })?;

        let app = build_router(self.state.for_protocol(Protocol::Http));
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown.recv().await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!(address = %addr, error = %e, "listener failed");
            }
            tracing::info!(address = %addr, "listener stopped");
        });

        tracing::info!(address = %addr, protocol = "http", "listening");
        Ok(addr)
    }

    async fn serve_tls(
        &self,
        port: u16,
        cert: &std::path::Path,
        key: &std::path::Path,
    ) -> Result<SocketAddr, ListenerError> {
        let tls = load_tls_config(cert, key)
            .await
            .map_err(|source| ListenerError::Tls { port, source })?;

        let listener = std::net::TcpListener::bind((self.bind_ip, port))
            .map_err(|source| ListenerError::Bind { port, source })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| ListenerError::Bind { port, source })?;
        let addr = listener
            .local_addr()
            .map_err(|source| ListenerError::Bind { port, source })?;

        let app = build_router(self.state.for_protocol(Protocol::Https));
        let handle = axum_server::Handle::new();
        let mut shutdown = self.shutdown.subscribe();
        let drain = self.drain;
        let stopper = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            stopper.graceful_shutdown(Some(drain));
        });
        tokio::spawn(async move {
            let result = axum_server::from_tcp_rustls(listener, tls)
                .handle(handle)
                .serve(app.into_make_service())
                .await;
            if let Err(e) = result {
                tracing::error!(address = %addr, error = %e, "TLS listener failed");
            }
            tracing::info!(address = %addr, "TLS listener stopped");
        });

        tracing::info!(address = %addr, protocol = "https", "listening");
        Ok(addr)
    }

    /// Open listeners for ports requested by endpoint definitions until the
    /// channel closes or shutdown is signalled.
    pub fn spawn_port_consumer(
        self: &Arc<Self>,
        mut requests: mpsc::UnboundedReceiver<PortRequest>,
    ) -> JoinHandle<()> {
        let listeners = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    request = requests.recv() => {
                        let Some(request) = request else { break };
                        listeners.open_requested(request).await;
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }

    async fn open_requested(&self, request: PortRequest) {
        if self.is_open(request.port) {
            return;
        }
        if request.protocol == Protocol::Https {
            tracing::warn!(
                port = request.port,
                "no certificate is configured for this port, serving plaintext"
            );
        }
        let config = ListenerConfig {
            port: request.port,
            cert: None,
            key: None,
        };
        if let Err(e) = self.open(&config).await {
            tracing::error!(error = %e, "listener for new port could not be opened");
        }
    }
}
