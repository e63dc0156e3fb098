//! Logging Setup
//!
//! Installs the global `tracing` subscriber. Output always goes to stderr
//! (or an append-only file) because stdout carries the MCP stdio transport.

use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

/// Build the level filter: `--verbose` forces debug, `RUST_LOG` is honored
pub fn build_filter(config: &LoggingConfig, verbose: bool) -> EnvFilter {
    let level = if verbose {
        Level::DEBUG
    } else {
        config
            .level
            .to_lowercase()
            .parse::<Level>()
            .unwrap_or(Level::INFO)
    };
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

fn make_writer(config: &LoggingConfig) -> Result<BoxMakeWriter> {
    match (&config.log_file, config.log_to_file) {
        (Some(path), true) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path))?;
            Ok(BoxMakeWriter::new(Mutex::new(file)))
        }
        _ => Ok(BoxMakeWriter::new(std::io::stderr)),
    }
}

/// Install the global subscriber
///
/// # Errors
///
/// Fails if the log file cannot be opened or a subscriber is already set.
pub fn init(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let filter = build_filter(config, verbose);
    let writer = make_writer(config)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false);

    let installed = match config.format.to_lowercase().as_str() {
        "json" => builder.json().try_init(),
        "pretty" => builder.pretty().try_init(),
        _ => builder.compact().try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}
