//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the shared endpoint table and connection counters
//! - Bind the configured listeners and the default port
//! - Start background tasks (new-port consumer, probe engine, rules watcher)
//!
//! # Design Decisions
//! - Fail fast: a listener that cannot be bound at startup is fatal
//! - A rules script that cannot be loaded is not fatal; the engine waits for a reload
//! - Listeners start before the probe engine so early `define` calls find them

use std::sync::Arc;

use notify::RecommendedWatcher;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{ListenerConfig, ProxyConfig, ScriptWatcher};
use crate::health::scheduler::{ProbeCommand, ProbeEngine};
use crate::http::chain::ChainSettings;
use crate::http::server::AppState;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::wait_for_shutdown;
use crate::load_balancer::counters::Counters;
use crate::load_balancer::pool::{Endpoints, SharedEndpoints};
use crate::net::listener::{ListenerError, Listeners};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// Handles to a started proxy.
pub struct Running {
    pub endpoints: SharedEndpoints,
    pub counters: Arc<Counters>,
    pub listeners: Arc<Listeners>,
    pub shutdown: Shutdown,
    pub commands: mpsc::UnboundedSender<ProbeCommand>,
    _watcher: Option<RecommendedWatcher>,
    tasks: Vec<JoinHandle<()>>,
}

impl Running {
    /// Signal shutdown and wait for the background tasks to finish.
    pub async fn stop(self) {
        self.shutdown.trigger();
        for task in self.tasks {
            let _ = task.await;
        }
        tracing::info!("Shutdown complete");
    }
}

fn chain_settings(config: &ProxyConfig) -> ChainSettings {
    ChainSettings {
        attempts: config.attempts(),
        consider: config.consider(),
        balance: config.balance(),
    }
}

/// Start every subsystem and return once listeners are bound.
pub async fn start(config: &ProxyConfig) -> Result<Running, StartupError> {
    let shutdown = Shutdown::new();
    let endpoints = Endpoints::new().shared();
    let counters = Arc::new(Counters::new());

    tracing::info!(
        port = config.port,
        attempts = config.attempts(),
        balance_method = %config.balance(),
        rules = %config.rules.display(),
        "Configuration loaded"
    );

    let state = AppState::new(
        endpoints.clone(),
        counters.clone(),
        chain_settings(config),
        config.max_body_bytes,
    );
    let listeners = Listeners::new(state, shutdown.clone());

    for listener in &config.listeners {
        listeners.open(listener).await?;
    }
    listeners
        .open(&ListenerConfig {
            port: config.port,
            cert: None,
            key: None,
        })
        .await?;

    let (ports_tx, ports_rx) = mpsc::unbounded_channel();
    let consumer = listeners.spawn_port_consumer(ports_rx);

    let engine = ProbeEngine::new(endpoints.clone(), ports_tx, config.probe_settings());
    engine.load();
    let commands = engine.commands();

    let watcher = if config.probe.watch {
        match ScriptWatcher::new(&config.rules, commands.clone()).run() {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!(error = %e, "rules script will not be reloaded on change");
                None
            }
        }
    } else {
        None
    };

    let probe = tokio::spawn(engine.run(shutdown.subscribe()));

    Ok(Running {
        endpoints,
        counters,
        listeners,
        shutdown,
        commands,
        _watcher: watcher,
        tasks: vec![consumer, probe],
    })
}

/// Run the proxy until a termination signal arrives.
pub async fn run(config: ProxyConfig) -> Result<(), StartupError> {
    let running = start(&config).await?;
    wait_for_shutdown(&running.shutdown).await;
    running.stop().await;
    Ok(())
}
