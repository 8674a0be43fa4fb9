//! Local port forwarding descriptors
//!
//! A forwarding string is a `;`-separated list of
//! `localPort:remoteHost:remotePort` entries, for example
//! `8080:internal.example.com:80;2222:jumphost:22`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ParseError, PortSide};

/// Separator between forwarding entries
pub const ENTRY_SEPARATOR: char = ';';

/// Separator between the fields of one entry
pub const FIELD_SEPARATOR: char = ':';

/// A single `local port -> remote host:remote port` mapping.
///
/// Values can only be obtained through [`ForwardSpec::new`] or parsing, so
/// both ports are always in `1..=65535` and the host is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ForwardSpec {
    local_port: u16,
    remote_host: String,
    remote_port: u16,
}

impl ForwardSpec {
    /// Create a forwarding descriptor from already-typed values
    pub fn new(
        local_port: u16,
        remote_host: impl Into<String>,
        remote_port: u16,
    ) -> Result<Self, ParseError> {
        let remote_host = remote_host.into().trim().to_string();
        if local_port == 0 {
            return Err(ParseError::InvalidPort {
                side: PortSide::Local,
                value: local_port.to_string(),
            });
        }
        if remote_port == 0 {
            return Err(ParseError::InvalidPort {
                side: PortSide::Remote,
                value: remote_port.to_string(),
            });
        }
        if remote_host.is_empty()
            || remote_host.contains(FIELD_SEPARATOR)
            || remote_host.contains(ENTRY_SEPARATOR)
        {
            return Err(ParseError::InvalidFormat {
                entry: format!("{}:{}:{}", local_port, remote_host, remote_port),
            });
        }
        Ok(Self {
            local_port,
            remote_host,
            remote_port,
        })
    }

    /// Local port the listener binds to
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Host the tunnelled connections are opened to, as seen from the SSH server
    pub fn remote_host(&self) -> &str {
        &self.remote_host
    }

    /// Destination port on the remote host
    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    /// Render the entry in forwarding-string grammar
    pub fn to_config_string(&self) -> String {
        format!(
            "{}{}{}{}{}",
            self.local_port, FIELD_SEPARATOR, self.remote_host, FIELD_SEPARATOR, self.remote_port
        )
    }

    /// Operator-facing log text for this forward
    pub fn display_line(&self) -> String {
        format!("Forwarding local port {}", self)
    }
}

impl fmt::Display for ForwardSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}:{}",
            self.local_port, self.remote_host, self.remote_port
        )
    }
}

impl FromStr for ForwardSpec {
    type Err = ParseError;

    fn from_str(entry: &str) -> Result<Self, Self::Err> {
        let trimmed = entry.trim();
        let fields: Vec<&str> = trimmed.split(FIELD_SEPARATOR).map(str::trim).collect();

        let &[local, host, remote] = fields.as_slice() else {
            return Err(ParseError::InvalidFormat {
                entry: trimmed.to_string(),
            });
        };
        if local.is_empty() || host.is_empty() || remote.is_empty() {
            return Err(ParseError::InvalidFormat {
                entry: trimmed.to_string(),
            });
        }

        let local_port = parse_port(local, PortSide::Local)?;
        let remote_port = parse_port(remote, PortSide::Remote)?;

        Ok(Self {
            local_port,
            remote_host: host.to_string(),
            remote_port,
        })
    }
}

impl TryFrom<String> for ForwardSpec {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ForwardSpec> for String {
    fn from(spec: ForwardSpec) -> Self {
        spec.to_config_string()
    }
}

/// Parse a port number, rejecting non-numeric values and anything outside 1..=65535
pub fn parse_port(value: &str, side: PortSide) -> Result<u16, ParseError> {
    let invalid = || ParseError::InvalidPort {
        side,
        value: value.to_string(),
    };

    // Parse wide so that 70000 is reported as out of range rather than overflow
    let port: u32 = value.trim().parse().map_err(|_| invalid())?;
    if !(1..=u32::from(u16::MAX)).contains(&port) {
        return Err(invalid());
    }
    u16::try_from(port).map_err(|_| invalid())
}

/// Parse a forwarding string into an ordered list of descriptors.
///
/// `None` and blank input yield an empty list. Parsing is all-or-nothing:
/// the first malformed entry fails the whole string, and an empty entry
/// between separators counts as malformed.
pub fn parse_forwardings(input: Option<&str>) -> Result<Vec<ForwardSpec>, ParseError> {
    let Some(input) = input.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(Vec::new());
    };

    input
        .split(ENTRY_SEPARATOR)
        .map(ForwardSpec::from_str)
        .collect()
}

/// Render descriptors back into a forwarding string
pub fn format_forwardings(specs: &[ForwardSpec]) -> String {
    specs
        .iter()
        .map(ForwardSpec::to_config_string)
        .collect::<Vec<_>>()
        .join(ENTRY_SEPARATOR.to_string().as_str())
}
