//! Credentials and host trust for SSH negotiation

use std::fmt;
use std::path::{Path, PathBuf};

use russh_keys::key::{KeyPair, PublicKey};

use pw_core::{HostKeyPolicy, SessionConfig, TunnelError};

/// Credentials offered to the server, in order of preference
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Credentials<'a> {
    /// Password authentication
    Password(&'a str),
    /// Private key authentication; the password doubles as passphrase
    PrivateKey {
        path: &'a Path,
        passphrase: Option<&'a str>,
    },
}

impl fmt::Debug for Credentials<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Password(_) => f.write_str("Password(<redacted>)"),
            Credentials::PrivateKey { path, passphrase } => f
                .debug_struct("PrivateKey")
                .field("path", path)
                .field("passphrase", &passphrase.map(|_| "<redacted>"))
                .finish(),
        }
    }
}

/// Answers the authentication touchpoints of an SSH negotiation:
/// password, private key (with passphrase) and host key trust
#[derive(Clone)]
pub struct Authenticator {
    username: String,
    password: String,
    private_key_path: Option<PathBuf>,
    host_key_policy: HostKeyPolicy,
}

impl Authenticator {
    /// Build the authenticator for a session configuration
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            username: config.username().to_string(),
            password: config.password().to_string(),
            private_key_path: config.private_key_path().map(Path::to_path_buf),
            host_key_policy: config.host_key_policy(),
        }
    }

    /// Login user name
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Password as configured (may be empty)
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Key passphrase: the password, or `None` when the password is empty
    pub fn passphrase(&self) -> Option<&str> {
        (!self.password.is_empty()).then_some(self.password.as_str())
    }

    /// Host key trust policy
    pub fn host_key_policy(&self) -> HostKeyPolicy {
        self.host_key_policy
    }

    /// Primary credentials: the private key when configured, otherwise the password
    pub fn credentials(&self) -> Credentials<'_> {
        match &self.private_key_path {
            Some(path) => Credentials::PrivateKey {
                path: path.as_path(),
                passphrase: self.passphrase(),
            },
            None => Credentials::Password(&self.password),
        }
    }

    /// Password to try after the primary credentials were rejected
    pub fn fallback_password(&self) -> Option<&str> {
        match self.credentials() {
            Credentials::PrivateKey { .. } => self.passphrase(),
            Credentials::Password(_) => None,
        }
    }

    /// Load and decrypt the configured private key, if any
    pub fn load_private_key(&self) -> Result<Option<KeyPair>, TunnelError> {
        let Credentials::PrivateKey { path, passphrase } = self.credentials() else {
            return Ok(None);
        };

        if !path.exists() {
            return Err(TunnelError::Authentication(format!(
                "Private key not found at {}",
                path.display()
            )));
        }

        russh_keys::load_secret_key(path, passphrase)
            .map(Some)
            .map_err(|e| {
                TunnelError::Authentication(format!(
                    "Failed to load private key {}: {}",
                    path.display(),
                    e
                ))
            })
    }

    /// Decide whether to trust the server's host key.
    ///
    /// Under [`HostKeyPolicy::AcceptAny`] every key is trusted. This is the
    /// default and performs no verification at all.
    pub fn check_host_key(&self, host: &str, port: u16, key: &PublicKey) -> bool {
        match self.host_key_policy {
            HostKeyPolicy::AcceptAny => true,
            HostKeyPolicy::KnownHosts => match russh_keys::check_known_hosts(host, port, key) {
                Ok(known) => known,
                Err(e) => {
                    tracing::warn!("Host key check for {}:{} failed: {}", host, port, e);
                    false
                }
            },
        }
    }
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("username", &self.username)
            .field("credentials", &self.credentials())
            .field("host_key_policy", &self.host_key_policy)
            .finish()
    }
}
