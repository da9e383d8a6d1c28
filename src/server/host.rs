//! Server host holding the notifier's shared state
//!
//! One registry instance is created here and handed by `Arc` to both the
//! gateway and the dispatcher. Exposures take the host and produce routers.

use crate::config::NotifierConfig;
use crate::core::auth::IdentityChain;
use crate::core::error::ConfigError;
use crate::dispatch::NotificationDispatcher;
use crate::ingest::{EventIngestor, IngestStats};
use crate::registry::ConnectionRegistry;
use crate::server::exposure::websocket::ConnectionManager;
use crate::server::exposure::{RestExposure, WebSocketExposure};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// All state the notifier's components share
pub struct NotifierHost {
    pub config: Arc<NotifierConfig>,

    /// `UserIdentity → {ConnectionId}` index
    pub registry: Arc<ConnectionRegistry>,

    /// WebSocket gateway; owns the live connections
    pub gateway: Arc<ConnectionManager>,

    pub dispatcher: Arc<NotificationDispatcher>,

    /// Counters updated by the ingestor, read by `/health`
    pub ingest_stats: Arc<IngestStats>,
}

impl NotifierHost {
    /// Wire the components together
    ///
    /// The identity chain is derived from `config.identity` unless one is
    /// supplied.
    pub fn new(config: NotifierConfig, identity: Option<IdentityChain>) -> Result<Self, ConfigError> {
        let identity = match identity {
            Some(chain) => chain,
            None => IdentityChain::from_config(&config.identity)?,
        };

        let registry = Arc::new(ConnectionRegistry::new());
        let gateway = Arc::new(ConnectionManager::new(registry.clone(), identity));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            registry.clone(),
            gateway.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            registry,
            gateway,
            dispatcher,
            ingest_stats: Arc::new(IngestStats::default()),
        })
    }

    /// A fresh ingestor feeding this host's dispatcher
    pub fn ingestor(&self) -> EventIngestor {
        EventIngestor::new(self.dispatcher.clone(), self.ingest_stats.clone())
    }

    /// `/ws` and `/health`, with request tracing
    pub fn router(self: &Arc<Self>) -> Router {
        WebSocketExposure::build_router(self.gateway.clone())
            .merge(RestExposure::build_router(self.clone()))
            .layer(TraceLayer::new_for_http())
    }
}
