//! Tunnel session lifecycle
//!
//! A [`TunnelSession`] moves through `Unconnected -> Connected -> Closed`.
//! `connect` either leaves a fully forwarded session or nothing at all, and
//! `close` is safe to call any number of times.

use std::fmt;
use std::sync::Arc;

use pw_core::{ForwardSpec, SessionConfig, TunnelError};

use crate::auth::Authenticator;
use crate::logger::{LogSink, SessionLogger};
use crate::transport::{Connector, SshConnector, Transport};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport; `connect` may be called
    Unconnected,
    /// Transport open and all forwards registered
    Connected,
    /// Torn down; the session cannot be reused
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Unconnected => write!(f, "unconnected"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Owns one transport connection and the forwards registered on it
pub struct TunnelSession<C: Connector = SshConnector> {
    connector: C,
    state: SessionState,
    transport: Option<C::Transport>,
    forwards: Vec<ForwardSpec>,
    host: String,
    log: LogSink,
}

impl TunnelSession<SshConnector> {
    /// Create an unconnected session using the russh transport
    pub fn new() -> Self {
        Self::with_connector(SshConnector::new())
    }
}

impl Default for TunnelSession<SshConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connector> TunnelSession<C> {
    /// Create an unconnected session using a custom connector
    pub fn with_connector(connector: C) -> Self {
        Self {
            connector,
            state: SessionState::Unconnected,
            transport: None,
            forwards: Vec::new(),
            host: String::new(),
            log: LogSink::new(),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the transport is open
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Forwards in effect, in application order. A later spec with the
    /// same local port replaces the earlier one.
    pub fn forwards(&self) -> &[ForwardSpec] {
        &self.forwards
    }

    /// The session's log slot
    pub fn log_sink(&self) -> &LogSink {
        &self.log
    }

    /// Open the transport and register every forward of `config` in order.
    ///
    /// `logger` receives diagnostics until [`close`](Self::close). On error
    /// the session stays `Unconnected`, any transport opened by this call
    /// has been disconnected, and the logger is detached again.
    pub async fn connect(
        &mut self,
        config: &SessionConfig,
        logger: Arc<dyn SessionLogger>,
    ) -> Result<(), TunnelError> {
        if self.state != SessionState::Unconnected {
            return Err(TunnelError::InvalidState(self.state.to_string()));
        }

        self.log.attach(logger);
        self.log.log(format!(
            "Creating session to {}@{}",
            config.username(),
            config.address()
        ));

        match Self::establish(&self.connector, &self.log, config).await {
            Ok((transport, forwards)) => {
                self.transport = Some(transport);
                self.forwards = forwards;
                self.host = config.host().to_string();
                self.state = SessionState::Connected;
                tracing::info!(
                    "Tunnel to {} up with {} forward(s)",
                    config.address(),
                    self.forwards.len()
                );
                Ok(())
            }
            Err(e) => {
                self.log.log(format!("Exception: {}: {}", e.kind(), e));
                self.log.detach();
                Err(e)
            }
        }
    }

    async fn establish(
        connector: &C,
        log: &LogSink,
        config: &SessionConfig,
    ) -> Result<(C::Transport, Vec<ForwardSpec>), TunnelError> {
        let auth = Authenticator::from_config(config);
        let mut transport = connector.open(config, &auth, log.clone()).await?;

        let mut applied: Vec<ForwardSpec> = Vec::with_capacity(config.forwards().len());
        for spec in config.forwards() {
            if let Err(e) = Self::register_forward(&mut transport, spec, log).await {
                log.log(format!(
                    "Forward setup failed, closing session to {}",
                    config.address()
                ));
                if let Err(close_err) = transport.disconnect().await {
                    log.log(format!("Failed to close partial session: {}", close_err));
                }
                return Err(e);
            }
            applied.retain(|s| s.local_port() != spec.local_port());
            applied.push(spec.clone());
        }

        Ok((transport, applied))
    }

    async fn register_forward(
        transport: &mut C::Transport,
        spec: &ForwardSpec,
        log: &LogSink,
    ) -> Result<(), TunnelError> {
        let local_addr = transport.register_forward(spec).await?;
        log.log(spec.display_line());
        tracing::debug!("Forward {} bound to {}", spec, local_addr);
        Ok(())
    }

    /// Tear the session down. Never fails: a failed disconnect is logged.
    /// Calling it again, or on a session that never connected, does nothing
    /// beyond moving to `Closed`.
    pub async fn close(&mut self) {
        self.state = SessionState::Closed;

        if let Some(mut transport) = self.transport.take() {
            self.log.log(format!("Closing SSH session to {}", self.host));
            if let Err(e) = transport.disconnect().await {
                self.log.log(format!("Exception: {}: {}", e.kind(), e));
            }
            tracing::info!("Tunnel to {} closed", self.host);
        }

        self.forwards.clear();
        self.log.detach();
    }
}

impl<C: Connector> Drop for TunnelSession<C> {
    fn drop(&mut self) {
        if self.transport.is_some() {
            tracing::warn!(
                "Tunnel session to {} dropped without close, releasing transport",
                self.host
            );
            self.log.detach();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::MemoryLogger;
    use async_trait::async_trait;
    use std::net::SocketAddr;
    use std::sync::Mutex;

    #[derive(Clone, Copy)]
    enum OpenFailure {
        Network,
        Authentication,
    }

    /// Records transport calls so tests can check ordering
    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl Recorder {
        fn push(&self, event: impl Into<String>) {
            self.0.lock().unwrap().push(event.into());
        }

        fn events(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    #[derive(Clone, Default)]
    struct MockConnector {
        recorder: Recorder,
        open_failure: Option<OpenFailure>,
        fail_forward_at: Option<usize>,
        fail_disconnect: bool,
        sinks: Arc<Mutex<Vec<LogSink>>>,
    }

    struct MockTransport {
        recorder: Recorder,
        registered: usize,
        fail_forward_at: Option<usize>,
        fail_disconnect: bool,
    }

    #[async_trait]
    impl Connector for MockConnector {
        type Transport = MockTransport;

        async fn open(
            &self,
            config: &SessionConfig,
            _auth: &Authenticator,
            log: LogSink,
        ) -> Result<MockTransport, TunnelError> {
            match self.open_failure {
                Some(OpenFailure::Network) => {
                    return Err(TunnelError::Network {
                        address: config.address(),
                        source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
                    })
                }
                Some(OpenFailure::Authentication) => {
                    return Err(TunnelError::Authentication("rejected".to_string()))
                }
                None => {}
            }
            self.recorder.push("open");
            log.log("mock transport connected");
            self.sinks.lock().unwrap().push(log);
            Ok(MockTransport {
                recorder: self.recorder.clone(),
                registered: 0,
                fail_forward_at: self.fail_forward_at,
                fail_disconnect: self.fail_disconnect,
            })
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn register_forward(
            &mut self,
            spec: &ForwardSpec,
        ) -> Result<SocketAddr, TunnelError> {
            let index = self.registered;
            self.registered += 1;
            if self.fail_forward_at == Some(index) {
                self.recorder.push(format!("forward {} failed", spec.local_port()));
                return Err(TunnelError::Transport(format!(
                    "Cannot bind 127.0.0.1:{}",
                    spec.local_port()
                )));
            }
            self.recorder.push(format!("forward {}", spec.local_port()));
            Ok(SocketAddr::from(([127, 0, 0, 1], spec.local_port())))
        }

        async fn disconnect(&mut self) -> Result<(), TunnelError> {
            self.recorder.push("disconnect");
            if self.fail_disconnect {
                return Err(TunnelError::Transport("socket already gone".to_string()));
            }
            Ok(())
        }
    }

    impl Drop for MockTransport {
        fn drop(&mut self) {
            self.recorder.push("dropped");
        }
    }

    fn config(forwardings: &str) -> SessionConfig {
        SessionConfig::new("jump.example.com", 22, "deploy")
            .unwrap()
            .with_password("s3cret")
            .with_forwards(pw_core::parse_forwardings(Some(forwardings)).unwrap())
    }

    #[tokio::test]
    async fn test_connect_and_close() {
        let connector = MockConnector::default();
        let recorder = connector.recorder.clone();
        let logger = Arc::new(MemoryLogger::new());
        let mut session = TunnelSession::with_connector(connector);

        session
            .connect(&config("9000:db.internal:5432"), logger.clone())
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.forwards().len(), 1);
        assert_eq!(logger.count_containing("9000 -> db.internal:5432"), 1);

        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.forwards().is_empty());
        assert_eq!(
            recorder.events(),
            vec!["open", "forward 9000", "disconnect", "dropped"]
        );
        assert!(logger
            .lines()
            .iter()
            .any(|l| l == "[PortForwarding] Closing SSH session to jump.example.com"));
    }

    #[tokio::test]
    async fn test_every_line_is_prefixed() {
        let logger = Arc::new(MemoryLogger::new());
        let mut session = TunnelSession::with_connector(MockConnector::default());
        session
            .connect(&config("9000:db.internal:5432;8080:web:80"), logger.clone())
            .await
            .unwrap();
        session.close().await;

        let lines = logger.lines();
        assert!(lines.len() >= 4);
        assert!(lines.iter().all(|l| l.starts_with("[PortForwarding] ")));
        assert!(lines[0].contains("Creating session to deploy@jump.example.com:22"));
        assert!(!lines.iter().any(|l| l.contains("s3cret")));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let connector = MockConnector::default();
        let recorder = connector.recorder.clone();
        let mut session = TunnelSession::with_connector(connector);
        session
            .connect(&config("9000:db:5432"), Arc::new(MemoryLogger::new()))
            .await
            .unwrap();

        session.close().await;
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        let disconnects = recorder
            .events()
            .iter()
            .filter(|e| *e == "disconnect")
            .count();
        assert_eq!(disconnects, 1);
    }

    #[tokio::test]
    async fn test_close_without_connect() {
        let connector = MockConnector::default();
        let recorder = connector.recorder.clone();
        let mut session = TunnelSession::with_connector(connector);
        session.close().await;
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert!(recorder.events().is_empty());
    }

    #[tokio::test]
    async fn test_failed_forward_closes_transport() {
        let connector = MockConnector {
            fail_forward_at: Some(1),
            ..Default::default()
        };
        let recorder = connector.recorder.clone();
        let logger = Arc::new(MemoryLogger::new());
        let mut session = TunnelSession::with_connector(connector);

        let err = session
            .connect(&config("9000:a:1;9001:b:2;9002:c:3"), logger.clone())
            .await
            .unwrap_err();

        assert!(matches!(err, TunnelError::Transport(_)));
        assert_eq!(session.state(), SessionState::Unconnected);
        assert!(session.forwards().is_empty());
        assert_eq!(
            recorder.events(),
            vec![
                "open",
                "forward 9000",
                "forward 9001 failed",
                "disconnect",
                "dropped"
            ]
        );
        assert_eq!(logger.count_containing("Exception: TransportError"), 1);
        assert!(!session.log_sink().is_attached());
    }

    #[tokio::test]
    async fn test_unreachable_host() {
        let connector = MockConnector {
            open_failure: Some(OpenFailure::Network),
            ..Default::default()
        };
        let recorder = connector.recorder.clone();
        let mut session = TunnelSession::with_connector(connector);

        let err = session
            .connect(&config("9000:db:5432"), Arc::new(MemoryLogger::new()))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "NetworkError");
        assert_eq!(session.state(), SessionState::Unconnected);
        assert!(session.forwards().is_empty());
        assert!(recorder.events().is_empty());
    }

    #[tokio::test]
    async fn test_retry_after_failed_connect() {
        let mut session = TunnelSession::with_connector(MockConnector {
            open_failure: Some(OpenFailure::Authentication),
            ..Default::default()
        });
        let err = session
            .connect(&config("9000:db:5432"), Arc::new(MemoryLogger::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::Authentication(_)));

        session.connector.open_failure = None;
        session
            .connect(&config("9000:db:5432"), Arc::new(MemoryLogger::new()))
            .await
            .unwrap();
        assert!(session.is_connected());
        session.close().await;
    }

    #[tokio::test]
    async fn test_connect_rejected_when_connected_or_closed() {
        let connector = MockConnector::default();
        let recorder = connector.recorder.clone();
        let mut session = TunnelSession::with_connector(connector);
        let logger = Arc::new(MemoryLogger::new());

        session.connect(&config(""), logger.clone()).await.unwrap();
        let err = session.connect(&config(""), logger.clone()).await.unwrap_err();
        assert!(matches!(err, TunnelError::InvalidState(ref s) if s == "connected"));

        session.close().await;
        let err = session.connect(&config(""), logger).await.unwrap_err();
        assert!(matches!(err, TunnelError::InvalidState(ref s) if s == "closed"));
        assert_eq!(session.state(), SessionState::Closed);

        let opens = recorder.events().iter().filter(|e| *e == "open").count();
        assert_eq!(opens, 1);
    }

    #[tokio::test]
    async fn test_duplicate_local_port_replaces_binding() {
        let mut session = TunnelSession::with_connector(MockConnector::default());
        session
            .connect(
                &config("9000:a:1;9001:b:2;9000:c:3"),
                Arc::new(MemoryLogger::new()),
            )
            .await
            .unwrap();

        let forwards: Vec<String> = session.forwards().iter().map(|f| f.to_string()).collect();
        assert_eq!(forwards, vec!["9001 -> b:2", "9000 -> c:3"]);
        session.close().await;
    }

    #[tokio::test]
    async fn test_logger_detached_after_close() {
        let connector = MockConnector::default();
        let sinks = connector.sinks.clone();
        let logger = Arc::new(MemoryLogger::new());
        let mut session = TunnelSession::with_connector(connector);

        session.connect(&config("9000:db:5432"), logger.clone()).await.unwrap();
        session.close().await;

        let transport_sink = sinks.lock().unwrap()[0].clone();
        let before = logger.lines().len();
        transport_sink.log("late line from a forwarding task");
        assert_eq!(logger.lines().len(), before);
        assert!(!session.log_sink().is_attached());
    }

    #[tokio::test]
    async fn test_failed_disconnect_is_logged_not_raised() {
        let logger = Arc::new(MemoryLogger::new());
        let mut session = TunnelSession::with_connector(MockConnector {
            fail_disconnect: true,
            ..Default::default()
        });
        session.connect(&config("9000:db:5432"), logger.clone()).await.unwrap();
        session.close().await;

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(logger.count_containing("socket already gone"), 1);
    }

    #[tokio::test]
    async fn test_drop_releases_transport() {
        let connector = MockConnector::default();
        let recorder = connector.recorder.clone();
        let mut session = TunnelSession::with_connector(connector);
        session
            .connect(&config("9000:db:5432"), Arc::new(MemoryLogger::new()))
            .await
            .unwrap();
        let sink = session.log_sink().clone();

        drop(session);
        assert_eq!(recorder.events().last().map(String::as_str), Some("dropped"));
        assert!(!sink.is_attached());
    }
}
