//! pw-core: Forwarding descriptors and session configuration for portwrap
//!
//! This crate provides the validated data model (forwarding descriptors and
//! session configuration), the forwarding-string parser and the error types
//! shared by the tunnel manager and the CLI.

pub mod config;
pub mod error;
pub mod forward;

pub use config::{HostKeyPolicy, SessionConfig, SessionSettings};
pub use error::{ConfigError, ParseError, PortSide, PwError, TunnelError};
pub use forward::{format_forwardings, parse_forwardings, ForwardSpec};
