//! Setup/tear-down hooks for hosts that run a task inside forwarded ports

use std::future::Future;
use std::sync::Arc;

use pw_core::{ConfigError, SessionConfig, SessionSettings};

use crate::logger::SessionLogger;
use crate::session::TunnelSession;
use crate::transport::{Connector, SshConnector};

/// Brackets a task with a tunnel session built from one configuration
#[derive(Debug, Clone)]
pub struct ForwardingWrapper<C: Connector + Clone = SshConnector> {
    config: SessionConfig,
    connector: C,
}

impl ForwardingWrapper<SshConnector> {
    /// Wrapper using the russh transport
    pub fn new(config: SessionConfig) -> Self {
        Self::with_connector(config, SshConnector::new())
    }

    /// Validate raw settings and build a wrapper from them
    pub fn from_settings(settings: SessionSettings) -> Result<Self, ConfigError> {
        Ok(Self::new(SessionConfig::from_settings(settings)?))
    }
}

impl<C: Connector + Clone> ForwardingWrapper<C> {
    /// Wrapper using a custom connector
    pub fn with_connector(config: SessionConfig, connector: C) -> Self {
        Self { config, connector }
    }

    /// Configuration every session of this wrapper is built from
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Establish the session before the task runs.
    ///
    /// Returns `None` when no session could be established; the failure has
    /// already been written to `logger` and the host must not run the task.
    pub async fn setup(&self, logger: Arc<dyn SessionLogger>) -> Option<ForwardingEnvironment<C>> {
        let mut session = TunnelSession::with_connector(self.connector.clone());
        match session.connect(&self.config, logger).await {
            Ok(()) => Some(ForwardingEnvironment { session }),
            Err(e) => {
                tracing::error!(
                    "Port forwarding through {} not established: {}",
                    self.config.address(),
                    e
                );
                session.close().await;
                None
            }
        }
    }

    /// Set up, run `task`, and always tear down afterwards.
    ///
    /// Returns `None` without running the task when setup fails.
    pub async fn run<F, Fut, T>(&self, logger: Arc<dyn SessionLogger>, task: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let environment = self.setup(logger).await?;
        let output = task().await;
        environment.tear_down().await;
        Some(output)
    }
}

/// A session established by [`ForwardingWrapper::setup`]
pub struct ForwardingEnvironment<C: Connector = SshConnector> {
    session: TunnelSession<C>,
}

impl<C: Connector> ForwardingEnvironment<C> {
    /// The connected session backing this environment
    pub fn session(&self) -> &TunnelSession<C> {
        &self.session
    }

    /// Close the session and detach the logger. Never fails.
    pub async fn tear_down(mut self) {
        self.session.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Authenticator;
    use crate::logger::{LogSink, MemoryLogger};
    use crate::session::SessionState;
    use crate::transport::Transport;
    use async_trait::async_trait;
    use pw_core::{ForwardSpec, TunnelError};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct CountingConnector {
        reachable: bool,
        disconnects: Arc<AtomicUsize>,
    }

    struct CountingTransport {
        disconnects: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connector for CountingConnector {
        type Transport = CountingTransport;

        async fn open(
            &self,
            config: &SessionConfig,
            _auth: &Authenticator,
            _log: LogSink,
        ) -> Result<CountingTransport, TunnelError> {
            if !self.reachable {
                return Err(TunnelError::Network {
                    address: config.address(),
                    source: std::io::Error::from(std::io::ErrorKind::TimedOut),
                });
            }
            Ok(CountingTransport {
                disconnects: self.disconnects.clone(),
            })
        }
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn register_forward(
            &mut self,
            spec: &ForwardSpec,
        ) -> Result<SocketAddr, TunnelError> {
            Ok(SocketAddr::from(([127, 0, 0, 1], spec.local_port())))
        }

        async fn disconnect(&mut self) -> Result<(), TunnelError> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn wrapper(reachable: bool) -> ForwardingWrapper<CountingConnector> {
        let config = SessionConfig::new("jump.example.com", 22, "deploy")
            .unwrap()
            .with_forwards(vec!["9000:db.internal:5432".parse().unwrap()]);
        ForwardingWrapper::with_connector(
            config,
            CountingConnector {
                reachable,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_from_settings_validates() {
        let settings = SessionSettings {
            host: "jump.example.com".to_string(),
            forwardings: "9000:db.internal:5432".to_string(),
            ..Default::default()
        };
        let wrapper = ForwardingWrapper::from_settings(settings).unwrap();
        assert_eq!(wrapper.config().address(), "jump.example.com:22");
        assert_eq!(wrapper.config().forwards().len(), 1);

        let settings = SessionSettings {
            host: "jump.example.com".to_string(),
            forwardings: "abc:host:80".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            ForwardingWrapper::from_settings(settings),
            Err(ConfigError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_setup_and_tear_down() {
        let wrapper = wrapper(true);
        let logger = Arc::new(MemoryLogger::new());

        let env = wrapper.setup(logger.clone()).await.unwrap();
        assert_eq!(env.session().state(), SessionState::Connected);
        assert_eq!(env.session().forwards().len(), 1);

        env.tear_down().await;
        assert_eq!(wrapper.connector.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(
            logger.count_containing("Closing SSH session to jump.example.com"),
            1
        );
    }

    #[tokio::test]
    async fn test_unreachable_host_yields_no_environment() {
        let wrapper = wrapper(false);
        let logger = Arc::new(MemoryLogger::new());

        assert!(wrapper.setup(logger.clone()).await.is_none());
        assert_eq!(logger.count_containing("Exception: NetworkError"), 1);
        assert_eq!(logger.count_containing("Forwarding local port"), 0);
    }

    #[tokio::test]
    async fn test_run_brackets_task() {
        let wrapper = wrapper(true);
        let disconnects = wrapper.connector.disconnects.clone();
        let during_task = disconnects.clone();

        let output = wrapper
            .run(Arc::new(MemoryLogger::new()), move || async move {
                assert_eq!(during_task.load(Ordering::SeqCst), 0);
                42
            })
            .await;

        assert_eq!(output, Some(42));
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_skips_task_when_setup_fails() {
        let wrapper = wrapper(false);
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();

        let output = wrapper
            .run(Arc::new(MemoryLogger::new()), || async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        assert!(output.is_none());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
