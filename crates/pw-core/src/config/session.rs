//! SSH session configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::serde_utils::string_or_number;
use crate::error::{ConfigError, ParseError, PortSide};
use crate::forward::{format_forwardings, parse_forwardings, parse_port, ForwardSpec};

/// Port used when none is configured
pub const DEFAULT_SSH_PORT: u16 = 22;

/// How the server's host key is trusted.
///
/// # Security
///
/// The default is [`HostKeyPolicy::AcceptAny`]: any host key is accepted
/// without verification, which leaves the session open to
/// man-in-the-middle attacks. Existing forwarding configurations rely on
/// this behaviour, so it stays the default; use
/// [`HostKeyPolicy::KnownHosts`] to opt in to verification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyPolicy {
    /// Trust every server key (`StrictHostKeyChecking no`)
    #[default]
    AcceptAny,
    /// Require the key to be listed in the user's `known_hosts`
    KnownHosts,
}

/// Raw, string-typed session settings as a configuration form or file
/// delivers them. Turned into a validated [`SessionConfig`] with
/// [`SessionConfig::from_settings`].
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionSettings {
    /// SSH server host name or address
    pub host: String,

    /// SSH server port
    #[serde(with = "string_or_number")]
    pub port: String,

    /// Login user name
    pub username: String,

    /// Password, also used as the private key passphrase
    pub password: String,

    /// Private key file; empty means password authentication
    pub keyfile: String,

    /// Server keepalive interval in seconds; anything non-numeric disables it
    #[serde(with = "string_or_number")]
    pub keepalive: String,

    /// Forwarding string (`localPort:remoteHost:remotePort;...`)
    pub forwardings: String,

    /// Verify the host key against `known_hosts` instead of accepting any key
    pub strict_host_key_checking: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_SSH_PORT.to_string(),
            username: whoami::username(),
            password: String::new(),
            keyfile: String::new(),
            keepalive: "0".to_string(),
            forwardings: String::new(),
            strict_host_key_checking: false,
        }
    }
}

impl fmt::Debug for SessionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("keyfile", &self.keyfile)
            .field("keepalive", &self.keepalive)
            .field("forwardings", &self.forwardings)
            .field("strict_host_key_checking", &self.strict_host_key_checking)
            .finish()
    }
}

/// Validated, immutable configuration for one tunnel session
#[derive(Clone, PartialEq, Eq)]
pub struct SessionConfig {
    host: String,
    port: u16,
    username: String,
    password: String,
    private_key_path: Option<PathBuf>,
    keepalive_secs: u32,
    forwards: Vec<ForwardSpec>,
    host_key_policy: HostKeyPolicy,
}

impl SessionConfig {
    /// Create a configuration for `username@host:port` with password
    /// authentication, no keepalive and no forwards
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let host = host.into().trim().to_string();
        if host.is_empty() {
            return Err(ConfigError::MissingField("host".to_string()));
        }
        if port == 0 {
            return Err(ParseError::InvalidPort {
                side: PortSide::Target,
                value: port.to_string(),
            }
            .into());
        }

        Ok(Self {
            host,
            port,
            username: username.into(),
            password: String::new(),
            private_key_path: None,
            keepalive_secs: 0,
            forwards: Vec::new(),
            host_key_policy: HostKeyPolicy::default(),
        })
    }

    /// Build a configuration from raw settings.
    ///
    /// The port and forwarding string are validated strictly; a keepalive
    /// that is not a non-negative integer falls back to 0 (disabled).
    pub fn from_settings(settings: SessionSettings) -> Result<Self, ConfigError> {
        let port = parse_port(&settings.port, PortSide::Target)?;
        let forwards = parse_forwardings(Some(&settings.forwardings))?;

        let keepalive_secs = settings.keepalive.trim().parse().unwrap_or_else(|_| {
            tracing::debug!(
                "Ignoring keepalive value {:?}, keepalive disabled",
                settings.keepalive
            );
            0
        });

        let keyfile = settings.keyfile.trim();
        let private_key_path = (!keyfile.is_empty()).then(|| PathBuf::from(keyfile));

        let policy = if settings.strict_host_key_checking {
            HostKeyPolicy::KnownHosts
        } else {
            HostKeyPolicy::AcceptAny
        };

        let mut config = Self::new(settings.host, port, settings.username)?
            .with_password(settings.password)
            .with_keepalive_secs(keepalive_secs)
            .with_forwards(forwards)
            .with_host_key_policy(policy);
        config.private_key_path = private_key_path;
        Ok(config)
    }

    /// Set the password (also the key passphrase)
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Authenticate with a private key, taking precedence over the password
    pub fn with_private_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.private_key_path = Some(path.into());
        self
    }

    /// Set the keepalive interval in seconds (0 disables it)
    pub fn with_keepalive_secs(mut self, secs: u32) -> Self {
        self.keepalive_secs = secs;
        self
    }

    /// Set the ordered forwarding list
    pub fn with_forwards(mut self, forwards: Vec<ForwardSpec>) -> Self {
        self.forwards = forwards;
        self
    }

    /// Set the host key trust policy
    pub fn with_host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    /// SSH server host
    pub fn host(&self) -> &str {
        &self.host
    }

    /// SSH server port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` string used for connecting and in log lines
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Login user name
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Password, or key passphrase when a private key is configured
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Private key path, if key authentication is configured
    pub fn private_key_path(&self) -> Option<&Path> {
        self.private_key_path.as_deref()
    }

    /// Keepalive interval in seconds
    pub fn keepalive_secs(&self) -> u32 {
        self.keepalive_secs
    }

    /// Keepalive interval, `None` when probing is disabled
    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_secs > 0).then(|| Duration::from_secs(u64::from(self.keepalive_secs)))
    }

    /// Forwards in the order they are applied
    pub fn forwards(&self) -> &[ForwardSpec] {
        &self.forwards
    }

    /// Forwards rendered back to a forwarding string
    pub fn forwardings_string(&self) -> String {
        format_forwardings(&self.forwards)
    }

    /// Host key trust policy
    pub fn host_key_policy(&self) -> HostKeyPolicy {
        self.host_key_policy
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("private_key_path", &self.private_key_path)
            .field("keepalive_secs", &self.keepalive_secs)
            .field("forwards", &self.forwardings_string())
            .field("host_key_policy", &self.host_key_policy)
            .finish()
    }
}
