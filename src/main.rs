//! Service gateway binary.
//!
//! Loads configuration (TOML file, then environment overrides), initialises
//! logging and metrics, and serves until SIGINT/SIGTERM.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;

use service_gateway::config::load_config;
use service_gateway::observability::{logging, metrics};
use service_gateway::{GatewayServer, Shutdown};

#[derive(Parser)]
#[command(name = "service-gateway", version, about = "Authenticating, rate-limiting gateway in front of the data and rules services")]
struct Args {
    /// Path to a TOML config file. Defaults plus environment are used when omitted.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `observability.log_level`.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(level) = args.log_level {
        config.observability.log_level = level;
    }

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "service-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        data_service = %config.services.data.base_url,
        rules_service = %config.services.rules.base_url,
        auth_enabled = config.auth.enabled,
        rate_limit_enabled = config.rate_limit.enabled,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.listener.bind_address))?;

    let shutdown = Shutdown::new();
    let signal = shutdown.clone();
    tokio::spawn(async move { signal.trigger_on_signal().await });

    let server = GatewayServer::new(config).context("failed to build gateway")?;
    server.run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
