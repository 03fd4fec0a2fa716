//! app-gateway
//!
//! An application gateway built with Tokio and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌───────────────────────────────────────────────────────────┐
//!                     │                        GATEWAY                            │
//!                     │                                                           │
//!   Client Request    │  ┌─────────┐    ┌─────────┐    ┌──────────┐               │
//!   ──────────────────┼─▶│   net   │───▶│  http   │───▶│ routing  │               │
//!                     │  │listener │    │ server  │    │          │               │
//!                     │  └─────────┘    └─────────┘    └────┬─────┘               │
//!                     │                                     ▼                     │
//!                     │                              ┌─────────────┐              │
//!                     │                              │  resource   │              │
//!                     │                              │   loaders   │              │
//!                     │                              └──┬───────┬──┘              │
//!                     │                     hit / store │       │ local file      │
//!                     │                                 ▼       ▼                 │
//!                     │                          ┌─────────┐ ┌────────────┐       │
//!                     │                          │  cache  │ │ FileIstream│       │
//!                     │                          └────┬────┘ └────────────┘       │
//!                     │                          miss ▼                           │
//!                     │  ┌──────────┐   ┌───────────────┐   ┌────────────┐        │
//!                     │  │  health  │──▶│ load_balancer │──▶│   stock    │────────┼──▶ Backend
//!                     │  │ failures │   │  round robin  │   │ TCP pools  │        │
//!                     │  │ monitors │   └───────────────┘   └────────────┘        │
//!                     │  └──────────┘                                             │
//!   Client Response   │       response body: istream pipeline (tee, dechunk, ...) │
//!   ◀─────────────────┼──────────────────────────────────────────────────────────│
//!                     │                                                           │
//!                     │  control API (flush cache, fade/enable nodes, stats)      │
//!                     └───────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use app_gateway::config::{load_config, GatewayConfig};
use app_gateway::lifecycle::{self, spawn_signal_handler, Shutdown};
use app_gateway::observability::{logging, metrics};

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "app-gateway", version, about = "Caching application gateway")]
struct Args {
    /// Configuration file (TOML).  Defaults apply when omitted.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "app-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        request_timeout_secs = config.timeouts.request_secs,
        routes = config.routes.len(),
        clusters = config.clusters.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Arc::new(Shutdown::new());
    let running = lifecycle::start(&config, &shutdown).await?;
    tracing::info!(
        address = %running.front_addr,
        control = ?running.control_addr,
        "Listening for connections"
    );

    let mut rx = shutdown.subscribe();
    spawn_signal_handler(shutdown.clone());

    let _ = rx.recv().await;
    running.wait(SHUTDOWN_DEADLINE).await;

    tracing::info!("Shutdown complete");
    Ok(())
}
