//! Script-driven reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────┐
//!                     │                    SCRIPT PROXY                       │
//!                     │                                                       │
//!   Client Request    │  ┌─────────┐    ┌─────────┐    ┌──────────────┐      │
//!   ──────────────────┼─▶│   net   │───▶│  http   │───▶│   routing    │      │
//!                     │  │listener │    │ server  │    │   matcher    │      │
//!                     │  └────▲────┘    └────┬────┘    └──────┬───────┘      │
//!                     │       │              │                ▼              │
//!                     │       │              │        ┌──────────────┐       │
//!                     │       │ new ports    │        │load_balancer │       │
//!                     │       │              │        │ table + sort │       │
//!                     │       │              │        └──────▲───────┘       │
//!   Client Response   │       │              ▼               │ define/commit │
//!   ◀─────────────────┼───────┼──── failover chain ──▶ Backend / WAF        │
//!                     │       │                              │               │
//!                     │  ┌────┴──────────────────────────────┴────────────┐ │
//!                     │  │ health: probe engine running the rules script │ │
//!                     │  └───────────────────────────────────────────────┘ │
//!                     └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use script_proxy::config::{self, Overrides};
use script_proxy::lifecycle;
use script_proxy::observability::logging;

#[derive(Parser)]
#[command(name = "script-proxy")]
#[command(about = "Reverse proxy whose routing table is driven by a rules script", long_about = None)]
struct Cli {
    /// Optional TOML configuration file.
    #[arg(short, long, env = "CONFIG")]
    config: Option<PathBuf>,

    /// error, warn, info, verbose, debug or silly.
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Default listening port.
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Endpoints tried per request (clamped to 1..=9).
    #[arg(long, env = "ATTEMPTS")]
    attempts: Option<usize>,

    /// Statuses eligible for routing, e.g. "up,unknown".
    #[arg(long, env = "CONSIDER", value_delimiter = ',')]
    consider: Option<Vec<String>>,

    /// rr, load or weight.
    #[arg(long, env = "BALANCE_METHOD")]
    balance_method: Option<String>,

    /// Path of the rules script.
    #[arg(long, env = "RULES")]
    rules: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            log_level: self.log_level.clone(),
            port: self.port,
            attempts: self.attempts,
            consider: self.consider.clone(),
            balance_method: self.balance_method.clone(),
            rules: self.rules.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = config::resolve(cli.config.as_deref(), cli.overrides())?;

    logging::init(config.log_level());
    tracing::info!("script-proxy v{} starting", env!("CARGO_PKG_VERSION"));

    lifecycle::run(config).await?;
    Ok(())
}
