//! Tollgate REST API entry point.
//!
//! Binary name: `tollgate`
//!
//! Parses CLI arguments, initializes the database and gateway, then
//! serves the REST API.

mod http;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use crate::http::router::build_router;
use crate::state::AppState;

/// LLM provider orchestration gateway.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "tollgate.toml")]
    config: PathBuf,

    /// Address to bind the API server to.
    #[arg(long, default_value = "127.0.0.1", env = "TOLLGATE_HOST")]
    host: String,

    /// Port to bind the API server to.
    #[arg(long, default_value_t = 8080, env = "TOLLGATE_PORT")]
    port: u16,

    /// Enable OpenTelemetry trace export (stdout exporter).
    #[arg(long)]
    otel: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tollgate_observe::tracing_setup::init_tracing(cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let state = AppState::init(&cli.config).await?;

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Tollgate API listening");

    let router = build_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tollgate_observe::tracing_setup::shutdown_tracing();
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
