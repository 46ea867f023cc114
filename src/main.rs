//! Router service binary.
//!
//! Loads a TOML config, builds the root router with its static routes and
//! serves it until SIGINT/SIGTERM.

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use web_router::config::{load_config, RouterConfig};
use web_router::lifecycle::{build_router, signals, Shutdown};
use web_router::observability::{init_logging, init_metrics};
use web_router::HttpServer;

#[derive(Debug, Parser)]
#[command(name = "web-router", version, about = "HTTP routing and dispatch service")]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => RouterConfig::default(),
    };

    init_logging(&config.observability.log_level);
    tracing::info!("web-router v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        config = ?args.config,
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        static_routes = config.routes.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let router = build_router(&config)?;
    let listener = TcpListener::bind(&config.listener.bind_address).await?;

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        signals::shutdown_signal().await;
        trigger.trigger();
    });

    HttpServer::new(router, config).run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
