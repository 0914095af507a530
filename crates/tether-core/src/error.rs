//! Core error types for tether

use std::net::SocketAddr;
use std::path::PathBuf;

use tether_protocol::{ProtocolError, Violation};
use thiserror::Error;

/// Top-level error for one forwarding request
///
/// Only listener-level failures end up here. Failures of individual
/// sessions are logged and never abort the listener.
#[derive(Error, Debug)]
pub enum TunnelError {
    /// Local address could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Accept loop died
    #[error("Accept failed on {addr}: {source}")]
    Accept {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from a remote session transport
#[derive(Error, Debug)]
pub enum SessionError {
    /// Remote session could not be established
    #[error("Failed to establish remote session: {0}")]
    Connect(String),

    /// Session was cancelled locally
    #[error("Remote session cancelled")]
    Cancelled,

    /// Remote side went away
    #[error("Remote session closed")]
    Closed,

    /// Peer broke the session ordering rules
    #[error("Protocol violation: {0}")]
    Violation(Violation),

    /// Handshake refused by the controller
    #[error("Session rejected: {0}")]
    Rejected(String),

    /// Framing error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl SessionError {
    /// Whether this error is the result of our own cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SessionError::Cancelled)
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}
