//! # Order Notifier
//!
//! Real-time order notifications: events are consumed from a stream and
//! pushed over WebSocket to every session the affected user has open.
//!
//! ## Features
//!
//! - **Per-user fan-out**: one event reaches every tab of its user, tagged
//!   with the connection it was sent on
//! - **Pluggable identity**: trusted gateway header, HS256 JWT, and an opt-in
//!   development fallback
//! - **Fault isolation**: malformed events, offline users and dead sockets
//!   are logged and skipped, never fatal
//! - **Graceful shutdown**: clients get a `1001` close, the stream consumer
//!   commits before exit
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use order_notifier::prelude::*;
//!
//! let config = NotifierConfig::from_env()?;
//! let source = KafkaEventSource::connect(&config.kafka).await?;
//! NotifierBuilder::new(config).serve(source).await?;
//! ```
//!
//! Embedding without Kafka:
//!
//! ```rust,ignore
//! let (events, source) = ChannelEventSource::new(1024);
//! tokio::spawn(NotifierBuilder::new(config).serve(source));
//!
//! events
//!     .send(Ok(br#"{"userId":"U101","orderId":"O-123","event":"ORDER_PLACED"}"#.to_vec()))
//!     .await?;
//! ```

pub mod config;
pub mod core;
pub mod dispatch;
pub mod ingest;
pub mod registry;
pub mod server;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Core ===
    pub use crate::core::{
        auth::{
            ConnectRequest, DevQueryParamExtractor, IdentityChain, IdentityExtractor,
            JwtExtractor, TrustedHeaderExtractor,
        },
        error::{ConfigError, IdentityError, IngestError, NotifierError, SourceError},
        events::{EventKind, InboundEvent, OutboundNotification},
        identity::{ConnectionId, UserIdentity},
    };

    // === Config ===
    pub use crate::config::{IdentityConfig, KafkaConfig, NotifierConfig, ServerConfig};

    // === Routing ===
    pub use crate::dispatch::{ConnectionSink, DeliveryResult, NotificationDispatcher, SendOutcome};
    pub use crate::registry::ConnectionRegistry;

    // === Ingestion ===
    #[cfg(feature = "kafka")]
    pub use crate::ingest::KafkaEventSource;
    pub use crate::ingest::{
        ChannelEventSender, ChannelEventSource, EventIngestor, EventSource, IngestSnapshot,
        StreamRecord,
    };

    // === Server ===
    pub use crate::server::{ConnectionManager, NotifierBuilder, NotifierHost};
}
