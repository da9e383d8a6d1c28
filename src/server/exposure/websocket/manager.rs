//! Connection manager for WebSocket clients
//!
//! The `ConnectionManager` owns every live connection. The user index lives in
//! [`ConnectionRegistry`] and only holds ids; the dispatcher resolves those
//! ids back through this table at send time.
//!
//! # Lifecycle
//!
//! ```text
//! authenticate ──▶ connect ──▶ CONNECTED queued ──▶ registered
//!                                                      │
//!                                  on_message (PING ──▶ PONG)
//!                                                      │
//!                                  disconnect ──▶ unregistered, removed
//! ```
//!
//! `CONNECTED` is queued before the connection becomes visible to the
//! dispatcher, so it is always the first frame a client receives.

use super::protocol::{
    ClientMessage, ControlMessage, FrameError, NotificationFrame, OutboundFrame, ServerMessage,
};
use crate::core::auth::{ConnectRequest, IdentityChain};
use crate::core::error::{CLOSE_GOING_AWAY, IdentityError};
use crate::core::events::OutboundNotification;
use crate::core::identity::{ConnectionId, ConnectionIdGenerator, UserIdentity};
use crate::dispatch::{ConnectionSink, SendOutcome};
use crate::registry::ConnectionRegistry;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

const SHUTDOWN_REASON: &str = "Server shutting down";

/// A handle to a single WebSocket connection
///
/// Frames pushed through `tx` are written by the connection's write loop.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user: UserIdentity,
    tx: mpsc::UnboundedSender<OutboundFrame>,
    closed: AtomicBool,
}

impl ConnectionHandle {
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn user(&self) -> &UserIdentity {
        &self.user
    }

    /// Open until disconnected or the write loop has gone away
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    fn send(&self, frame: OutboundFrame) -> SendOutcome {
        if !self.is_open() {
            return SendOutcome::Closed;
        }
        match self.tx.send(frame) {
            Ok(()) => SendOutcome::Delivered,
            Err(_) => {
                self.closed.store(true, Ordering::Release);
                SendOutcome::Closed
            }
        }
    }

    /// Returns `true` for the call that actually closed it
    fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }
}

/// Manages all active WebSocket connections
pub struct ConnectionManager {
    registry: Arc<ConnectionRegistry>,
    identity: IdentityChain,
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    ids: ConnectionIdGenerator,
    accepting: AtomicBool,
    /// Signalled whenever a disconnect leaves the table empty
    drained: Notify,
}

impl ConnectionManager {
    pub fn new(registry: Arc<ConnectionRegistry>, identity: IdentityChain) -> Self {
        Self {
            registry,
            identity,
            connections: DashMap::new(),
            ids: ConnectionIdGenerator::new(),
            accepting: AtomicBool::new(true),
            drained: Notify::new(),
        }
    }

    /// Establish who is connecting, or why they may not
    pub async fn authenticate(&self, request: &ConnectRequest) -> Result<UserIdentity, IdentityError> {
        if !self.is_accepting() {
            return Err(IdentityError::ShuttingDown);
        }
        self.identity.resolve(request).await
    }

    /// Register a new WebSocket connection for an authenticated user
    ///
    /// Returns the handle and the receiver the write loop drains. The
    /// `CONNECTED` frame is already queued on it.
    pub fn connect(
        &self,
        user: UserIdentity,
    ) -> (Arc<ConnectionHandle>, mpsc::UnboundedReceiver<OutboundFrame>) {
        let id = self.ids.next_for(&user);
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Arc::new(ConnectionHandle {
            id: id.clone(),
            user: user.clone(),
            tx,
            closed: AtomicBool::new(false),
        });

        handle.send(OutboundFrame::Message(ServerMessage::Control(
            ControlMessage::Connected {
                user_id: user.clone(),
                connection_id: id.clone(),
            },
        )));

        self.connections.insert(id.clone(), handle.clone());
        self.registry.register(&user, id.clone());

        tracing::info!(user_id = %user, connection_id = %id, "Client connected");

        // Raced with shutdown after authenticate
        if !self.is_accepting() {
            handle.send(OutboundFrame::Close {
                code: CLOSE_GOING_AWAY,
                reason: SHUTDOWN_REASON,
            });
        }

        (handle, rx)
    }

    /// Handle one inbound text frame
    ///
    /// Only `PING` is acted on. Nothing a client sends can close the session.
    pub fn on_message(&self, connection: &ConnectionHandle, text: &str) {
        match ClientMessage::parse(text) {
            Ok(ClientMessage::Ping) => {
                let pong = ServerMessage::Control(ControlMessage::Pong {
                    connection_id: connection.id().clone(),
                    timestamp: chrono::Utc::now().timestamp_millis(),
                });
                connection.send(OutboundFrame::Message(pong));
            }
            Err(FrameError::Unrecognized(kind)) => {
                tracing::debug!(
                    connection_id = %connection.id(),
                    frame_type = %kind,
                    "Ignoring unrecognized client frame"
                );
            }
            Err(e) => {
                tracing::warn!(
                    connection_id = %connection.id(),
                    error = %e,
                    "Discarding malformed client frame"
                );
            }
        }
    }

    /// Remove a connection when the client goes away
    ///
    /// Safe to call more than once; returns `true` only for the first call.
    pub fn disconnect(&self, connection: &ConnectionHandle) -> bool {
        let first = connection.mark_closed();
        self.registry.unregister(connection.user(), connection.id());
        self.connections.remove(connection.id());
        if self.connections.is_empty() {
            self.drained.notify_waiters();
        }

        if first {
            tracing::info!(
                user_id = %connection.user(),
                connection_id = %connection.id(),
                "Client disconnected"
            );
        }
        first
    }

    /// Send a message to a specific connection
    pub fn send_to(&self, connection_id: &ConnectionId, message: ServerMessage) -> SendOutcome {
        // Clone out of the map so no shard lock is held while sending
        let Some(handle) = self.connections.get(connection_id).map(|entry| entry.value().clone())
        else {
            return SendOutcome::Missing;
        };
        handle.send(OutboundFrame::Message(message))
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Stop accepting, close every connection, and wait up to `grace`
    ///
    /// Connections whose sockets have not wound down by the deadline are
    /// disconnected forcibly.
    pub async fn shutdown(&self, grace: Duration) {
        self.accepting.store(false, Ordering::Release);

        let open: Vec<Arc<ConnectionHandle>> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        tracing::info!(connections = open.len(), "Closing client connections");

        for handle in &open {
            handle.send(OutboundFrame::Close {
                code: CLOSE_GOING_AWAY,
                reason: SHUTDOWN_REASON,
            });
        }

        let drained = async {
            loop {
                // Registered before the check so a concurrent last disconnect is not missed
                let notified = self.drained.notified();
                if self.connections.is_empty() {
                    return;
                }
                notified.await;
            }
        };
        let _ = tokio::time::timeout(grace, drained).await;

        let stragglers: Vec<Arc<ConnectionHandle>> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        if !stragglers.is_empty() {
            tracing::warn!(
                connections = stragglers.len(),
                "Grace period elapsed, dropping remaining connections"
            );
        }
        for handle in &stragglers {
            self.disconnect(handle);
        }
    }
}

impl ConnectionSink for ConnectionManager {
    fn deliver(
        &self,
        connection: &ConnectionId,
        notification: &OutboundNotification,
    ) -> SendOutcome {
        self.send_to(
            connection,
            ServerMessage::Notification(NotificationFrame {
                notification: notification.clone(),
                connection_id: connection.clone(),
            }),
        )
    }
}
