//! Transport seam between the session state machine and the SSH implementation

mod ssh;

pub use ssh::{SshConnector, SshTransport, LOCAL_BIND_ADDRESS};

use std::net::SocketAddr;

use async_trait::async_trait;

use pw_core::{ForwardSpec, SessionConfig, TunnelError};

use crate::auth::Authenticator;
use crate::logger::LogSink;

/// Opens authenticated transport connections
#[async_trait]
pub trait Connector: Send + Sync {
    /// The connection type produced by this connector
    type Transport: Transport;

    /// Connect and authenticate to the configured host.
    ///
    /// Transport-side diagnostics are written to `log` for as long as the
    /// connection lives. On error nothing may be left open.
    async fn open(
        &self,
        config: &SessionConfig,
        auth: &Authenticator,
        log: LogSink,
    ) -> Result<Self::Transport, TunnelError>;
}

/// A live, authenticated connection owned by one session
#[async_trait]
pub trait Transport: Send {
    /// Start a local listener tunnelling accepted connections to the
    /// spec's remote host and port. A spec reusing a local port replaces
    /// the earlier binding. Returns the bound local address.
    async fn register_forward(&mut self, spec: &ForwardSpec) -> Result<SocketAddr, TunnelError>;

    /// Stop all forwards and close the connection
    async fn disconnect(&mut self) -> Result<(), TunnelError>;
}
