use anyhow::Context;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Name of the verbose stdio-mode log file.
pub const LOG_FILE_NAME: &str = "switchyard.log";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// JSON logs on stdout for the HTTP server.
pub fn init_http() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().json())
        .init();
}

/// Stdio mode: stdout carries JSON-RPC only, so logs go to stderr and, with
/// `verbose`, are appended to [`LOG_FILE_NAME`] in `log_dir`.
pub fn init_stdio(verbose: bool, log_dir: &Path) -> anyhow::Result<()> {
    let file_layer = if verbose {
        let path = log_dir.join(LOG_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file '{}'", path.display()))?;
        Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_ansi(false).with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}
