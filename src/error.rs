//! Unified error types for Keelhaul

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Keelhaul operations
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Config errors
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    #[error("Failed to read inventory '{path}': {source}")]
    InventoryRead { path: PathBuf, source: io::Error },

    #[error("Inventory from {0} resolved to zero hosts")]
    EmptyInventory(String),

    // Probe errors
    #[error("Host '{host}' unreachable: {message}")]
    Unreachable { host: String, message: String },

    #[error("Remote command on '{host}' timed out after {secs} seconds")]
    RemoteTimeout { host: String, secs: u64 },

    #[error("Malformed {query} response from '{host}': {output:?}")]
    MalformedResponse {
        host: String,
        query: String,
        output: String,
    },

    // Restart errors
    #[error("Privilege rejected on '{host}' for '{command}': {message}")]
    PermissionDenied {
        host: String,
        command: String,
        message: String,
    },

    #[error("Remote command '{command}' failed on '{host}': {message}")]
    RemoteCommand {
        host: String,
        command: String,
        message: String,
    },

    #[error("Restart on '{host}' not confirmed after {waited_secs} seconds: {message}")]
    RestartUnverified {
        host: String,
        waited_secs: u64,
        message: String,
    },

    #[error("Illegal remediation transition: {0}")]
    StateTransition(String),

    // Audit trail errors
    #[error("Failed to write '{path}': {source}")]
    LogWrite { path: PathBuf, source: io::Error },

    #[error("Failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to encode trigger marker: {0}")]
    MarkerEncode(#[from] toml::ser::Error),
}

/// Coarse error classes used to decide whether a run survives an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Fatal before any probing
    Config,
    /// Absorbed into an unreachable probe result
    Probe,
    /// Remote side refused the scoped restart command
    Permission,
    /// Restart issued (or attempted) but recovery not confirmed
    RestartVerification,
    /// Local filesystem or encoding failure
    Io,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConfigRead { .. }
            | Error::ConfigParse(_)
            | Error::ConfigValidation(_)
            | Error::InventoryRead { .. }
            | Error::EmptyInventory(_) => ErrorKind::Config,
            Error::Unreachable { .. }
            | Error::RemoteTimeout { .. }
            | Error::MalformedResponse { .. } => ErrorKind::Probe,
            Error::PermissionDenied { .. } => ErrorKind::Permission,
            Error::RemoteCommand { .. }
            | Error::RestartUnverified { .. }
            | Error::StateTransition(_) => ErrorKind::RestartVerification,
            Error::Io(_)
            | Error::LogWrite { .. }
            | Error::Serialize(_)
            | Error::MarkerEncode(_) => ErrorKind::Io,
        }
    }
}

/// Result type alias for Keelhaul operations
pub type Result<T> = std::result::Result<T, Error>;
