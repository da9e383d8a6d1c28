//! WebSocket message protocol definitions
//!
//! ## Client → Server Messages
//!
//! ```json
//! // Liveness check
//! {"type": "PING"}
//! ```
//!
//! Anything else is ignored. Malformed JSON is logged and discarded without
//! closing the session.
//!
//! ## Server → Client Messages
//!
//! ```json
//! // First frame on every connection
//! {"type": "CONNECTED", "userId": "U101", "connectionId": "U101-1"}
//!
//! // Heartbeat reply (epoch milliseconds)
//! {"type": "PONG", "connectionId": "U101-1", "timestamp": 1760000000000}
//!
//! // Order notification, `type` is the event kind
//! {"type": "ORDER_PLACED", "userId": "U101", "orderId": "O-123",
//!  "message": "Your order O-123 has been placed successfully.", "connectionId": "U101-1"}
//! ```

use crate::core::events::OutboundNotification;
use crate::core::identity::{ConnectionId, UserIdentity};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Keepalive ping
    Ping,
}

/// Why a client frame was not acted on
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("frame is not a JSON object with a string 'type'")]
    Untyped,

    #[error("unrecognized frame type '{0}'")]
    Unrecognized(String),
}

impl ClientMessage {
    /// Parse a text frame
    ///
    /// Distinguishes garbage ([`FrameError::Malformed`], [`FrameError::Untyped`])
    /// from well-formed frames this notifier does not handle
    /// ([`FrameError::Unrecognized`]).
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(FrameError::Untyped)?
            .to_string();

        serde_json::from_value(value).map_err(|_| FrameError::Unrecognized(kind))
    }
}

/// Fixed-shape control frames
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Acknowledges a new connection with its assigned id
    #[serde(rename_all = "camelCase")]
    Connected {
        user_id: UserIdentity,
        connection_id: ConnectionId,
    },
    /// Heartbeat reply
    #[serde(rename_all = "camelCase")]
    Pong {
        connection_id: ConnectionId,
        timestamp: i64,
    },
}

/// A notification tagged with the connection it is pushed to
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationFrame {
    #[serde(flatten)]
    pub notification: OutboundNotification,
    pub connection_id: ConnectionId,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Control(ControlMessage),
    Notification(NotificationFrame),
}

/// Items queued to a connection's write loop
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Message(ServerMessage),
    /// Send a close frame and stop writing
    Close { code: u16, reason: &'static str },
}
