//! Core error types for portwrap

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the portwrap crates
#[derive(Error, Debug)]
pub enum PwError {
    /// Forwarding string or port could not be parsed
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Session/tunnel error
    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),
}

/// Which port field a value was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSide {
    /// Local listening port of a forwarding entry
    Local,
    /// Remote destination port of a forwarding entry
    Remote,
    /// Port of the SSH server itself
    Target,
}

impl fmt::Display for PortSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSide::Local => write!(f, "local"),
            PortSide::Remote => write!(f, "remote"),
            PortSide::Target => write!(f, "target"),
        }
    }
}

/// Errors raised while parsing forwarding descriptors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Entry does not have exactly three non-empty fields
    #[error("Invalid forwarding '{entry}'. Use localPort:remoteHost:remotePort pattern")]
    InvalidFormat { entry: String },

    /// Port is not a number or lies outside 1..=65535
    #[error("Invalid {side} port '{value}'. Enter a value between 1 and 65535")]
    InvalidPort { side: PortSide, value: String },
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Settings contain a malformed port or forwarding string
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Config file could not be read
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Errors surfaced while establishing or using a tunnel session
#[derive(Error, Debug)]
pub enum TunnelError {
    /// Credentials or key rejected, or key unreadable
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Host unreachable, connection refused or timed out
    #[error("Cannot reach {address}: {source}")]
    Network {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Protocol negotiation or forward registration failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Operation not allowed in the session's current state
    #[error("Session is {0}")]
    InvalidState(String),
}

impl TunnelError {
    /// Short label used in log lines
    pub fn kind(&self) -> &'static str {
        match self {
            TunnelError::Authentication(_) => "AuthenticationError",
            TunnelError::Network { .. } => "NetworkError",
            TunnelError::Transport(_) => "TransportError",
            TunnelError::InvalidState(_) => "InvalidState",
        }
    }
}
