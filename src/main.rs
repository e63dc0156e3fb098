// Shellward - Main Entry Point
//
// MCP server exposing policy-gated command execution:
// - CLI interface
// - Configuration loading
// - stdio request loop
// - Remote session teardown on exit

use anyhow::{Context, Result};
use clap::Parser;
use shellward::config::Config;
use shellward::mcp::{McpServer, StopReason};
use shellward::{logging, metrics, metrics_server, ToolContext};
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Shellward: policy-gated shell and SSH execution over MCP
#[derive(Parser, Debug)]
#[command(name = "shellward")]
#[command(author = "Shellward Contributors")]
#[command(version)]
#[command(about = "Policy-gated shell and SSH command execution exposed as MCP tools", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Path to the configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Write the default configuration to PATH and exit
    #[arg(long, value_name = "PATH", conflicts_with = "config")]
    init_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(path) = args.init_config {
        Config::write_default(&path)?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            Config::load_from_path(path)?
        }
        None => Config::load()?,
    };

    logging::init(&config.logging, args.verbose)?;
    info!("Shellward v{} starting", env!("CARGO_PKG_VERSION"));
    info!(
        shells = ?config.shells.enabled_kinds(),
        ssh = config.ssh.enabled,
        history = config.security.log_commands,
        "Configuration loaded"
    );

    if config.metrics.enabled {
        metrics::init().context("Failed to initialize metrics")?;
        let port = config.metrics.port;
        tokio::spawn(async move {
            if let Err(e) = metrics_server::start_metrics_server(port).await {
                error!("Metrics server stopped: {:#}", e);
            }
        });
    }

    let ctx = ToolContext::new(config);
    let server = McpServer::new(ctx.clone());
    let reason = server
        .serve(tokio::io::stdin(), tokio::io::stdout(), shutdown_signal())
        .await?;

    ctx.shutdown().await;
    info!(?reason, "Shellward stopped");

    if reason == StopReason::Shutdown {
        // A pending stdin read would keep the runtime from shutting down.
        std::process::exit(0);
    }
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received interrupt"),
        _ = terminate => info!("Received terminate"),
    }
}
