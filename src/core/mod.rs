//! Core types shared by the gateway, dispatcher and ingestor

pub mod auth;
pub mod error;
pub mod events;
pub mod identity;

pub use auth::{ConnectRequest, IdentityChain, IdentityExtractor};
pub use error::{ConfigError, IdentityError, IngestError, NotifierError, SourceError};
pub use events::{EventKind, InboundEvent, OutboundNotification};
pub use identity::{ConnectionId, ConnectionIdGenerator, UserIdentity};
