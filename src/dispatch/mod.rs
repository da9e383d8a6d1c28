//! Fan-out of one order event to every live connection of its user
//!
//! ```text
//! InboundEvent ──▶ NotificationDispatcher::dispatch()
//!                        │
//!               registry.lookup(user)   (snapshot)
//!                        │
//!               for each connection id
//!                        │
//!               sink.deliver(id, notification)
//!                        │
//!           Delivered / Closed / Missing ──▶ DeliveryResult
//! ```
//!
//! A closed or vanished connection is skipped and never affects delivery to
//! the user's other connections.

use crate::core::events::{InboundEvent, OutboundNotification};
use crate::core::identity::{ConnectionId, UserIdentity};
use crate::registry::ConnectionRegistry;
use serde::Serialize;
use std::sync::Arc;

/// Result of a single send attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Queued on an open transport
    Delivered,
    /// Transport reports itself closed; nothing was written
    Closed,
    /// No such connection (already cleaned up)
    Missing,
}

/// Where the dispatcher pushes notifications
///
/// Implemented by the WebSocket gateway; each delivery is tagged with the
/// connection id it is sent on.
pub trait ConnectionSink: Send + Sync {
    fn deliver(&self, connection: &ConnectionId, notification: &OutboundNotification)
    -> SendOutcome;
}

/// Per-dispatch accounting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryResult {
    pub attempted: usize,
    pub delivered: usize,
    pub skipped: usize,
}

impl DeliveryResult {
    /// The user had no registered connection
    pub fn is_offline(&self) -> bool {
        self.attempted == 0
    }
}

/// Routes notifications to a user's connections
pub struct NotificationDispatcher {
    registry: Arc<ConnectionRegistry>,
    sink: Arc<dyn ConnectionSink>,
}

impl NotificationDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>, sink: Arc<dyn ConnectionSink>) -> Self {
        Self { registry, sink }
    }

    /// Push `event` to every live connection `user` has right now
    pub fn dispatch(&self, user: &UserIdentity, event: &InboundEvent) -> DeliveryResult {
        let connections = self.registry.lookup(user);
        let mut result = DeliveryResult {
            attempted: connections.len(),
            ..DeliveryResult::default()
        };

        if connections.is_empty() {
            tracing::debug!(
                user_id = %user,
                order_id = %event.order_id,
                event = %event.kind,
                "No active session for user, notification dropped"
            );
            return result;
        }

        let notification = OutboundNotification::from_event(event);

        for connection in &connections {
            match self.sink.deliver(connection, &notification) {
                SendOutcome::Delivered => result.delivered += 1,
                outcome => {
                    result.skipped += 1;
                    tracing::debug!(
                        user_id = %user,
                        connection_id = %connection,
                        ?outcome,
                        "Skipped connection that is no longer open"
                    );
                }
            }
        }

        tracing::info!(
            user_id = %user,
            order_id = %event.order_id,
            event = %event.kind,
            delivered = result.delivered,
            skipped = result.skipped,
            "Notification dispatched"
        );

        result
    }
}
