//! Bare tunnel server.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────────┐
//!                         │                   BARE SERVER                    │
//!                         │                                                  │
//!   Client request        │  ┌────────┐   ┌──────────┐   ┌────────────────┐  │
//!   ──────────────────────┼─▶│  http  │──▶│  bare    │──▶│ request decode │  │
//!                         │  │ server │   │ v1/v2/v3 │   │  (x-bare-*)    │  │
//!                         │  └────────┘   └────┬─────┘   └───────┬────────┘  │
//!                         │                    │                 ▼           │
//!                         │              ┌─────┴─────┐    ┌─────────────┐    │
//!                         │              │ metadata  │    │  SsrfGuard  │    │
//!                         │              │  store    │    └──────┬──────┘    │
//!                         │              └───────────┘           ▼           │
//!   Client response       │  ┌──────────┐            ┌──────────────────┐    │
//!   ◀─────────────────────┼──│ envelope │◀───────────│ tunnel http / ws │◀───┼──── Remote
//!                         │  └──────────┘            └──────────────────┘    │
//!                         └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use bare_server::config::{load_config, BareConfig};
use bare_server::lifecycle::{shutdown_signal, Shutdown};
use bare_server::net::tls::load_tls_config;
use bare_server::observability::{logging, metrics};
use bare_server::HttpServer;

#[derive(Parser)]
#[command(name = "bare-server")]
#[command(about = "Bare protocol tunnel server", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => BareConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability);
    tracing::info!("bare-server v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        prefix = %config.bare.prefix,
        block_local = config.security.block_local,
        tls = config.listener.tls.is_some(),
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

    let shutdown = Shutdown::new();
    let tls = config.listener.tls.clone();
    let bind_address = config.listener.bind_address.clone();
    let server = HttpServer::new(config)?;
    let server_shutdown = shutdown.subscribe();

    let serve = async move {
        match tls {
            Some(tls) => {
                let tls = load_tls_config(&tls).await?;
                server.run_tls(bind_address.parse()?, tls, server_shutdown).await?;
            }
            None => {
                let listener = TcpListener::bind(&bind_address).await?;
                server.run(listener, server_shutdown).await?;
            }
        }
        Ok::<_, Box<dyn std::error::Error>>(())
    };
    tokio::pin!(serve);

    tokio::select! {
        result = &mut serve => result?,
        _ = shutdown_signal() => {
            shutdown.trigger();
            serve.await?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
