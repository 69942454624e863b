//! Structured logging initialization.
//!
//! Builds a `tracing-subscriber` pipeline from [`LoggingConfig`]: console or
//! file output, optional JSON formatting, `RUST_LOG`-style filtering layered
//! over the configured default level.

use crate::config::LoggingConfig;
use crate::error::{RemotingError, Result};
use std::sync::Arc;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber described by `config`.
///
/// Returns an error if a subscriber is already installed or the log file
/// cannot be opened.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.log_level).into())
        .from_env_lossy();

    if config.log_to_file {
        let path = config
            .log_file_path
            .as_deref()
            .ok_or_else(|| RemotingError::Config("log_file_path not set".to_string()))?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| RemotingError::Config(format!("Failed to open log file: {e}")))?;

        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(Arc::new(file))
            .with_ansi(false);
        if config.json_format {
            builder
                .json()
                .try_init()
                .map_err(|e| RemotingError::Config(e.to_string()))?;
        } else {
            builder
                .try_init()
                .map_err(|e| RemotingError::Config(e.to_string()))?;
        }
        return Ok(());
    }

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.json_format {
        builder
            .json()
            .try_init()
            .map_err(|e| RemotingError::Config(e.to_string()))?;
    } else {
        builder
            .try_init()
            .map_err(|e| RemotingError::Config(e.to_string()))?;
    }

    Ok(())
}
