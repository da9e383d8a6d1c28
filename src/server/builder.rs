//! NotifierBuilder for wiring and serving the notifier

use super::host::NotifierHost;
use crate::config::NotifierConfig;
use crate::core::auth::IdentityChain;
use crate::core::error::NotifierError;
use crate::ingest::{EventSource, IngestExit};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Builder for the notifier server
///
/// # Example
///
/// ```ignore
/// let config = NotifierConfig::from_env()?;
/// let source = KafkaEventSource::connect(&config.kafka).await?;
///
/// NotifierBuilder::new(config).serve(source).await?;
/// ```
pub struct NotifierBuilder {
    config: NotifierConfig,
    identity: Option<IdentityChain>,
}

impl NotifierBuilder {
    pub fn new(config: NotifierConfig) -> Self {
        Self {
            config,
            identity: None,
        }
    }

    /// Replace the identity chain derived from configuration
    pub fn with_identity(mut self, identity: IdentityChain) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn build_host(self) -> Result<NotifierHost, NotifierError> {
        Ok(NotifierHost::new(self.config, self.identity)?)
    }

    /// Bind the configured address and serve until SIGTERM or Ctrl+C
    pub async fn serve<S>(self, source: S) -> Result<(), NotifierError>
    where
        S: EventSource + 'static,
    {
        let addr = self.config.server.bind_addr();
        let host = Arc::new(self.build_host()?);
        let listener = TcpListener::bind(&addr).await?;

        tracing::info!("Notifier listening on {}", addr);

        run(host, listener, source, shutdown_signal()).await?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

/// Run the gateway and ingestor until `shutdown` resolves
///
/// Shutdown order: stop accepting and close live connections within the
/// grace period, then stop the ingestor, which commits and closes its
/// source. The ingestor ending on its own is an error: the notifier would
/// otherwise keep sockets open that can never receive anything.
pub async fn run<S, F>(
    host: Arc<NotifierHost>,
    listener: TcpListener,
    source: S,
    shutdown: F,
) -> Result<(), NotifierError>
where
    S: EventSource + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    let grace = host.config.server.shutdown_grace();
    let (stop_tx, stop_rx) = watch::channel(false);

    let ingestor = host.ingestor();
    let mut ingest_task = tokio::spawn(async move { ingestor.run(source, stop_rx).await });

    let gateway = host.gateway.clone();
    let app = host.router();
    let server = async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                gateway.shutdown(grace).await;
            })
            .await
    };

    let served = tokio::select! {
        served = server => served,
        finished = &mut ingest_task => {
            let reason = match finished {
                Ok(IngestExit::Exhausted) => "event source exhausted".to_string(),
                Ok(IngestExit::Shutdown) => "ingestor stopped".to_string(),
                Err(e) => e.to_string(),
            };
            tracing::error!(reason = %reason, "Event ingestor stopped before shutdown");
            host.gateway.shutdown(grace).await;
            return Err(NotifierError::IngestorStopped(reason));
        }
    };

    let _ = stop_tx.send(true);
    match ingest_task.await {
        Ok(exit) => tracing::debug!(?exit, "Ingestor joined"),
        Err(e) => tracing::error!(error = %e, "Ingestor task failed during shutdown"),
    }

    served.map_err(NotifierError::Server)
}

/// Signal handler for graceful shutdown
///
/// Listens for SIGTERM and SIGINT (Ctrl+C).
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, initiating graceful shutdown...");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ChannelEventSource;
    use std::time::Duration;

    #[test]
    fn test_build_host_from_default_config() {
        let host = NotifierBuilder::new(NotifierConfig::default())
            .build_host()
            .unwrap();
        assert!(host.gateway.is_accepting());
        assert_eq!(host.registry.user_count(), 0);
    }

    #[test]
    fn test_with_identity_overrides_config() {
        let mut config = NotifierConfig::default();
        config.identity.header = "not a header".to_string();

        // Invalid config is never consulted when a chain is supplied
        let host = NotifierBuilder::new(config)
            .with_identity(IdentityChain::new())
            .build_host();
        assert!(host.is_ok());
    }

    #[tokio::test]
    async fn test_run_returns_on_shutdown() {
        let host = Arc::new(NotifierHost::new(NotifierConfig::default(), None).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (_tx, source) = ChannelEventSource::new(1);
        let (trigger, rx) = tokio::sync::oneshot::channel::<()>();

        let server = tokio::spawn(run(host.clone(), listener, source, async move {
            let _ = rx.await;
        }));
        trigger.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("server did not stop")
            .unwrap();
        assert!(result.is_ok());
        assert!(!host.gateway.is_accepting());
    }

    #[tokio::test]
    async fn test_run_fails_when_source_ends() {
        let host = Arc::new(NotifierHost::new(NotifierConfig::default(), None).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (tx, source) = ChannelEventSource::new(1);
        drop(tx);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run(host, listener, source, std::future::pending()),
        )
        .await
        .expect("run did not return");

        assert!(matches!(result, Err(NotifierError::IngestorStopped(_))));
    }
}
