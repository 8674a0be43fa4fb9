//! SSH transport built on russh
//!
//! Opens one client connection per session and serves each local forward
//! from a background listener task. Every accepted connection is tunnelled
//! through a `direct-tcpip` channel.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Config, Handle};
use russh::Disconnect;
use russh_keys::key::{KeyPair, PublicKey};
use tokio::io::copy_bidirectional;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use pw_core::{ForwardSpec, HostKeyPolicy, SessionConfig, TunnelError};

use super::{Connector, Transport};
use crate::auth::Authenticator;
use crate::logger::LogSink;

/// Address local forward listeners bind to
pub const LOCAL_BIND_ADDRESS: &str = "127.0.0.1";

/// Default limit for the TCP connect and the SSH handshake, each
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Unanswered keepalives tolerated before the server is considered gone
const KEEPALIVE_MAX: usize = 3;

/// Pause after a failed `accept` so a persistent error cannot spin
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Opens SSH connections with russh
#[derive(Debug, Clone)]
pub struct SshConnector {
    connect_timeout: Option<Duration>,
}

impl Default for SshConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
        }
    }
}

impl SshConnector {
    /// Create a connector with the default connect timeout
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit the TCP connect and the handshake; `None` waits indefinitely
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn ssh_config(config: &SessionConfig) -> Config {
        let mut ssh_config = Config::default();
        // None disables keepalive entirely
        ssh_config.keepalive_interval = config.keepalive_interval();
        ssh_config.keepalive_max = KEEPALIVE_MAX;
        ssh_config
    }

    async fn connect_tcp(&self, config: &SessionConfig) -> Result<TcpStream, TunnelError> {
        let network = |source: std::io::Error| TunnelError::Network {
            address: config.address(),
            source,
        };

        let connect = TcpStream::connect((config.host(), config.port()));
        let stream = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connect).await.map_err(|_| {
                network(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "connection timed out",
                ))
            })?,
            None => connect.await,
        }
        .map_err(network)?;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY: {}", e);
        }
        Ok(stream)
    }
}

#[async_trait]
impl Connector for SshConnector {
    type Transport = SshTransport;

    async fn open(
        &self,
        config: &SessionConfig,
        auth: &Authenticator,
        log: LogSink,
    ) -> Result<SshTransport, TunnelError> {
        let address = config.address();

        // Key problems are reported before touching the network
        let key = auth.load_private_key()?;

        log.log(format!("Connecting to {}", address));
        let stream = self.connect_tcp(config).await?;
        log.log(format!("Connection established to {}", address));

        let handler = ClientHandler {
            host: config.host().to_string(),
            port: config.port(),
            auth: auth.clone(),
            log: log.clone(),
        };
        let handshake = client::connect_stream(Arc::new(Self::ssh_config(config)), stream, handler);
        let result = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, handshake).await.map_err(|_| {
                TunnelError::Transport(format!("SSH handshake with {} timed out", address))
            })?,
            None => handshake.await,
        };
        let mut handle = result.map_err(|e| handshake_error(&address, e))?;

        match authenticate(&mut handle, auth, key, &log).await {
            Ok(true) => {}
            Ok(false) => {
                close_quietly(&handle).await;
                return Err(TunnelError::Authentication(format!(
                    "{} rejected the credentials for user '{}'",
                    address,
                    auth.username()
                )));
            }
            Err(e) => {
                close_quietly(&handle).await;
                return Err(e);
            }
        }
        log.log(format!("Authentication succeeded for {}@{}", auth.username(), address));

        Ok(SshTransport {
            handle: Arc::new(handle),
            address,
            listeners: HashMap::new(),
            cancel: CancellationToken::new(),
            log,
        })
    }
}

/// Public key first when configured (falling back to the password), otherwise password
async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    auth: &Authenticator,
    key: Option<KeyPair>,
    log: &LogSink,
) -> Result<bool, TunnelError> {
    let exchange_failed =
        |e: russh::Error| TunnelError::Transport(format!("Authentication exchange failed: {}", e));

    if let Some(key) = key {
        log.log(format!("Authenticating as '{}' with private key", auth.username()));
        if handle
            .authenticate_publickey(auth.username(), Arc::new(key))
            .await
            .map_err(exchange_failed)?
        {
            return Ok(true);
        }

        let Some(password) = auth.fallback_password() else {
            return Ok(false);
        };
        log.log("Private key rejected, trying password");
        return handle
            .authenticate_password(auth.username(), password)
            .await
            .map_err(exchange_failed);
    }

    log.log(format!("Authenticating as '{}' with password", auth.username()));
    handle
        .authenticate_password(auth.username(), auth.password())
        .await
        .map_err(exchange_failed)
}

fn handshake_error(address: &str, error: russh::Error) -> TunnelError {
    match error {
        russh::Error::UnknownKey => {
            TunnelError::Transport(format!("Host key of {} was not accepted", address))
        }
        russh::Error::IO(source) => TunnelError::Network {
            address: address.to_string(),
            source,
        },
        other => TunnelError::Transport(format!("SSH negotiation with {} failed: {}", address, other)),
    }
}

async fn close_quietly(handle: &Handle<ClientHandler>) {
    if let Err(e) = handle
        .disconnect(Disconnect::ByApplication, "", "en")
        .await
    {
        tracing::debug!("Disconnect after failed setup: {}", e);
    }
}

/// A live SSH connection with its forward listeners
pub struct SshTransport {
    handle: Arc<Handle<ClientHandler>>,
    address: String,
    listeners: HashMap<u16, ForwardListener>,
    cancel: CancellationToken,
    log: LogSink,
}

/// Background accept loop for one local port
struct ForwardListener {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ForwardListener {
    /// Stop accepting and wait until the port is released
    async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::debug!("Forward listener ended abnormally: {}", e);
        }
    }
}

impl SshTransport {
    /// `host:port` of the SSH server
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Local ports with an active listener
    pub fn local_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.listeners.keys().copied().collect();
        ports.sort_unstable();
        ports
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn register_forward(&mut self, spec: &ForwardSpec) -> Result<SocketAddr, TunnelError> {
        let local_port = spec.local_port();

        if let Some(previous) = self.listeners.remove(&local_port) {
            self.log
                .log(format!("Replacing earlier forward on local port {}", local_port));
            previous.stop().await;
        }

        let bind_error = |e: std::io::Error| {
            TunnelError::Transport(format!(
                "Cannot bind {}:{}: {}",
                LOCAL_BIND_ADDRESS, local_port, e
            ))
        };
        let listener = TcpListener::bind((LOCAL_BIND_ADDRESS, local_port))
            .await
            .map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        let cancel = self.cancel.child_token();
        let task = tokio::spawn(accept_loop(
            listener,
            spec.clone(),
            Arc::clone(&self.handle),
            cancel.clone(),
            self.log.clone(),
        ));
        self.listeners
            .insert(local_port, ForwardListener { cancel, task });

        tracing::debug!("Listening on {} for {}", local_addr, spec);
        Ok(local_addr)
    }

    async fn disconnect(&mut self) -> Result<(), TunnelError> {
        self.cancel.cancel();
        let tasks: Vec<_> = self.listeners.drain().map(|(_, l)| l.task).collect();
        futures::future::join_all(tasks).await;

        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(|e| {
                TunnelError::Transport(format!("Failed to disconnect from {}: {}", self.address, e))
            })
    }
}

impl Drop for SshTransport {
    fn drop(&mut self) {
        // Listener and connection tasks stop; the connection closes with the last handle
        self.cancel.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    spec: ForwardSpec,
    handle: Arc<Handle<ClientHandler>>,
    cancel: CancellationToken,
    log: LogSink,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    tokio::spawn(forward_connection(
                        socket,
                        peer,
                        spec.clone(),
                        Arc::clone(&handle),
                        cancel.clone(),
                        log.clone(),
                    ));
                }
                Err(e) => {
                    log.log(format!(
                        "Failed to accept on local port {}: {}",
                        spec.local_port(),
                        e
                    ));
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }
    tracing::debug!("Stopped listening on local port {}", spec.local_port());
}

async fn forward_connection(
    mut socket: TcpStream,
    peer: SocketAddr,
    spec: ForwardSpec,
    handle: Arc<Handle<ClientHandler>>,
    cancel: CancellationToken,
    log: LogSink,
) {
    log.log(format!(
        "Connection from {} on local port {}",
        peer,
        spec.local_port()
    ));

    let channel = match handle
        .channel_open_direct_tcpip(
            spec.remote_host(),
            u32::from(spec.remote_port()),
            peer.ip().to_string(),
            u32::from(peer.port()),
        )
        .await
    {
        Ok(channel) => channel,
        Err(e) => {
            log.log(format!(
                "Cannot open channel to {}:{}: {}",
                spec.remote_host(),
                spec.remote_port(),
                e
            ));
            return;
        }
    };

    let mut stream = channel.into_stream();
    tokio::select! {
        _ = cancel.cancelled() => {}
        result = copy_bidirectional(&mut socket, &mut stream) => match result {
            Ok((sent, received)) => tracing::debug!(
                "Forwarded connection from {} closed ({} bytes out, {} bytes in)",
                peer,
                sent,
                received
            ),
            Err(e) => tracing::debug!("Forwarded connection from {} failed: {}", peer, e),
        }
    }
}

/// russh client callbacks for one session
struct ClientHandler {
    host: String,
    port: u16,
    auth: Authenticator,
    log: LogSink,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    /// Trust decision is delegated to the authenticator's host key policy
    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();
        let trusted = self
            .auth
            .check_host_key(&self.host, self.port, server_public_key);

        match (trusted, self.auth.host_key_policy()) {
            (true, HostKeyPolicy::AcceptAny) => self.log.log(format!(
                "Accepting host key {} without verification (host key checking disabled)",
                fingerprint
            )),
            (true, HostKeyPolicy::KnownHosts) => self
                .log
                .log(format!("Host key {} found in known_hosts", fingerprint)),
            (false, _) => self.log.log(format!(
                "Host key {} for {}:{} is not trusted",
                fingerprint, self.host, self.port
            )),
        }

        Ok(trusted)
    }
}
