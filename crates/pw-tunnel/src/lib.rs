//! SSH tunnel sessions for portwrap
//!
//! Opens one SSH connection per [`TunnelSession`], binds a local listener for
//! every [`ForwardSpec`](pw_core::ForwardSpec) and tunnels accepted
//! connections through `direct-tcpip` channels. [`ForwardingWrapper`] exposes
//! the session as a setup/tear-down hook pair around a task.

pub mod auth;
pub mod logger;
pub mod session;
pub mod transport;
pub mod wrapper;

pub use auth::{Authenticator, Credentials};
pub use logger::{LogSink, MemoryLogger, SessionLogger, TracingLogger, WriterLogger, LOG_PREFIX};
pub use session::{SessionState, TunnelSession};
pub use transport::{Connector, SshConnector, SshTransport, Transport, LOCAL_BIND_ADDRESS};
pub use wrapper::{ForwardingEnvironment, ForwardingWrapper};
