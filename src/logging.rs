use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Stdio,
    Stream,
}

/// Install the global subscriber.
///
/// In stdio mode stdout carries the protocol and clients treat stderr noise
/// during the handshake as a dead connection, so logs only go to a file and
/// only when one was requested. Stream mode always logs to stderr.
pub fn init_logging(mode: TransportMode, log_file: Option<String>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = match log_file {
        Some(name) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&name)
                .with_context(|| format!("Failed to open log file {}", name))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    let stderr_layer = match mode {
        TransportMode::Stream => Some(fmt::layer().with_writer(std::io::stderr)),
        TransportMode::Stdio => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(())
}
