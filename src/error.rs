//! Error types for hubbridge.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for the bridge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write default configuration to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Socket transport errors.
///
/// None of these are fatal on their own; the orchestrator decides whether
/// an exhausted retry budget ends startup.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("{name} connection failed: {reason}")]
    ConnectFailed { name: String, reason: String },

    #[error("{name} handshake timed out after {timeout:?}")]
    HandshakeTimeout { name: String, timeout: Duration },

    #[error("{name} is not connected")]
    NotConnected { name: String },

    #[error("Failed to send on {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Failed to read from {name}: {reason}")]
    ReadFailed { name: String, reason: String },

    #[error("Failed to close {name}: {reason}")]
    CloseFailed { name: String, reason: String },

    #[error("{name} unreachable after {attempts} attempts")]
    RetriesExhausted { name: String, attempts: u32 },

    #[error("{name} connect abandoned on shutdown")]
    Cancelled { name: String },

    #[error("Failed to encode outbound frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Inbound payload errors. Logged and dropped, never propagated past the
/// frame that caused them.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown message payload shape: {0}")]
    UnknownShape(&'static str),

    #[error("Invalid routing target: {0}")]
    InvalidRoutingTarget(String),
}

/// Result type alias for the bridge.
pub type Result<T> = std::result::Result<T, Error>;
