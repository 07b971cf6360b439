//! Tracing subscriber setup.
//!
//! `RUST_LOG` takes precedence over the configured level so operators can
//! raise verbosity for a single run without editing the config file.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::config::{LogConfig, LogFormat};

/// Install the global subscriber described by `config`.
///
/// If the log file cannot be opened, logs go to stderr and a warning is
/// emitted once the subscriber is up.
pub fn init(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let mut file_error = None;
    let file = if config.file.is_empty() {
        None
    } else {
        match OpenOptions::new().create(true).append(true).open(&config.file) {
            Ok(file) => Some(file),
            Err(e) => {
                file_error = Some(e);
                None
            }
        }
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = match (config.format, file) {
        (LogFormat::Json, Some(file)) => builder
            .json()
            .with_writer(Mutex::new(file))
            .try_init(),
        (LogFormat::Json, None) => builder.json().with_writer(std::io::stderr).try_init(),
        (LogFormat::Text, Some(file)) => builder
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .try_init(),
        (LogFormat::Text, None) => builder.with_writer(std::io::stderr).try_init(),
    };

    if installed.is_err() {
        // A subscriber is already set (tests, embedding); keep it.
        return;
    }

    if let Some(e) = file_error {
        tracing::warn!(
            file = %config.file,
            error = %e,
            "Failed to open log file, logging to stderr"
        );
    }
}
