//! agentvisor server
//!
//! Loads the playground configuration, syncs the model catalog with the
//! local Ollama and serves the HTTP API until Ctrl+C.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use agentvisor::config::PlaygroundConfig;
use agentvisor::dashboard::{create_router, DashboardState};
use agentvisor::service::Playground;
use agentvisor::tracing::{init_tracing, shutdown_tracing};

#[derive(Parser, Debug)]
#[command(name = "agentvisor", version, about = "LLM pentest agents with budgeted models and mediated tools")]
struct Args {
    /// TOML configuration file; built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override server.host
    #[arg(long)]
    host: Option<String>,

    /// Override server.port
    #[arg(short, long)]
    port: Option<u16>,

    /// OTLP collector endpoint, e.g. http://localhost:4317
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    init_tracing("agentvisor", args.otlp_endpoint.as_deref(), args.json_logs)?;

    let mut config = match &args.config {
        Some(path) => PlaygroundConfig::from_file(path)?,
        None => PlaygroundConfig::default(),
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    std::fs::create_dir_all(&config.workspace_dir)?;
    info!(
        workspace = %config.workspace_dir.display(),
        ollama = %config.ollama.base_url,
        allow_raw_command = config.allow_raw_command,
        "configuration loaded"
    );
    if config.allow_raw_command {
        warn!("raw command execution is enabled; every command is audit-logged");
    }

    let playground = Arc::new(Playground::from_config(&config)?);

    let health = playground.health().await;
    if health.ollama != "healthy" {
        warn!(url = %config.ollama.base_url, "Ollama is not reachable; agents will fail until it is");
    }
    let marked = playground.sync_catalog().await;
    info!(marked, "model catalog ready");

    let app = create_router(DashboardState {
        playground: Arc::clone(&playground),
    });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "agentvisor listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl+C");
            }
            info!("shutdown signal received");
        })
        .await;

    playground.shutdown().await;
    shutdown_tracing();
    served?;
    Ok(())
}
