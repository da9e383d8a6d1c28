//! WebSocket gateway
//!
//! Browsers connect to `/ws`, are identified, and then only listen: the
//! notifier pushes order notifications for the authenticated user to every
//! tab that user has open.
//!
//! # Architecture
//!
//! ```text
//! Client ──ws──▶ /ws ──▶ ws_handler() ──authenticate──▶ ConnectionManager
//!                                                          │
//!                                             registry.register(user, id)
//!                                                          │
//!                       NotificationDispatcher ──deliver──▶ Client
//! ```
//!
//! # Close codes
//!
//! | code | meaning                              |
//! |------|--------------------------------------|
//! | 1008 | no identity could be established     |
//! | 4001 | token expired                        |
//! | 4002 | token invalid                        |
//! | 1001 | server shutting down                 |

mod handler;
pub mod manager;
pub mod protocol;

pub use manager::{ConnectionHandle, ConnectionManager};

use axum::{Router, routing::get};
use std::sync::Arc;

/// WebSocket API exposure
pub struct WebSocketExposure;

impl WebSocketExposure {
    /// Router with the `/ws` endpoint bound to `manager`
    pub fn build_router(manager: Arc<ConnectionManager>) -> Router {
        Router::new()
            .route("/ws", get(handler::ws_handler))
            .with_state(manager)
    }
}
