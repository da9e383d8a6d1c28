//! Server module: WebSocket gateway, health endpoint and lifecycle
//!
//! `NotifierBuilder` wires a `NotifierHost` from configuration; exposures
//! turn the host into routers; `builder::run` drives the gateway and the
//! ingestor through startup and ordered shutdown.

pub mod builder;
pub mod exposure;
pub mod host;

pub use builder::{NotifierBuilder, run};
pub use exposure::websocket::ConnectionManager;
pub use host::NotifierHost;
