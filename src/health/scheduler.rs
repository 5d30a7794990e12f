//! Probe engine.
//!
//! # Responsibilities
//! - Run the rules script once at startup, then whenever the script asked to be run again
//! - Keep at most one script execution in flight
//! - Recompile the script when the rules file changes
//!
//! # Design Decisions
//! - A single timer: `next(ms)` replaces any previously scheduled run
//! - A run that comes due while another is executing is retried after `busy_retry`
//! - Runs happen on the blocking pool; the loop itself never blocks

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, Instant};

use crate::health::script::{ProbeScript, ScriptContext};
use crate::load_balancer::pool::{PortRequest, SharedEndpoints};

/// Messages driving the engine loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeCommand {
    /// Schedule the next run after the delay, canceling the pending one.
    Next(Duration),
    /// The rules file changed on disk.
    Reload,
}

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub rules: PathBuf,
    pub default_timeout_ms: u64,
    pub busy_retry: Duration,
    pub max_operations: u64,
}

/// Clears the processing flag when a run ends, including on panic.
struct ProcessingGuard(Arc<AtomicBool>);

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ProbeEngine {
    script: Arc<ProbeScript>,
    settings: ProbeSettings,
    processing: Arc<AtomicBool>,
    commands_tx: mpsc::UnboundedSender<ProbeCommand>,
    commands: mpsc::UnboundedReceiver<ProbeCommand>,
}

impl ProbeEngine {
    /// Must be called from within a Tokio runtime.
    pub fn new(
        endpoints: SharedEndpoints,
        ports: mpsc::UnboundedSender<PortRequest>,
        settings: ProbeSettings,
    ) -> Self {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let ctx = ScriptContext::new(
            endpoints,
            commands_tx.clone(),
            ports,
            Handle::current(),
            settings.default_timeout_ms,
        );
        let script = Arc::new(ProbeScript::new(&ctx, settings.max_operations));

        Self {
            script,
            settings,
            processing: Arc::new(AtomicBool::new(false)),
            commands_tx,
            commands,
        }
    }

    /// Sender used by the file watcher (and tests) to drive the engine.
    pub fn commands(&self) -> mpsc::UnboundedSender<ProbeCommand> {
        self.commands_tx.clone()
    }

    /// Load the rules script. Failure leaves the engine idle until a reload succeeds.
    pub fn load(&self) -> bool {
        match self.script.load(&self.settings.rules) {
            Ok(()) => {
                tracing::info!(rules = %self.settings.rules.display(), "rules script loaded");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "rules script not loaded");
                false
            }
        }
    }

    /// Drive the engine until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let ProbeEngine {
            script,
            settings,
            processing,
            commands_tx: _commands_tx,
            mut commands,
        } = self;

        let mut deadline = script.is_loaded().then(Instant::now);

        loop {
            let sleep = async move {
                match deadline {
                    Some(at) => time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = sleep => {
                    deadline = None;
                    if processing.swap(true, Ordering::AcqRel) {
                        tracing::debug!("probe script still running, deferring");
                        deadline = Some(Instant::now() + settings.busy_retry);
                        continue;
                    }
                    let guard = ProcessingGuard(processing.clone());
                    let script = script.clone();
                    tokio::task::spawn_blocking(move || {
                        let _guard = guard;
                        if let Err(e) = script.run() {
                            tracing::error!(error = %e, "probe script failed");
                        }
                    });
                }
                Some(command) = commands.recv() => match command {
                    ProbeCommand::Next(delay) => {
                        deadline = Some(Instant::now() + delay);
                    }
                    ProbeCommand::Reload => match script.load(&settings.rules) {
                        Ok(()) => {
                            tracing::info!(rules = %settings.rules.display(), "rules script reloaded");
                            if deadline.is_none() {
                                deadline = Some(Instant::now());
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "rules script reload failed, keeping previous");
                        }
                    },
                },
                _ = shutdown.recv() => {
                    tracing::info!("probe engine received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
