//! Order lifecycle events and the notifications shaped from them
//!
//! Two shapes live here:
//!
//! - [`InboundEvent`]: what the ingestor parses out of a stream message
//! - [`OutboundNotification`]: the stable contract pushed to browsers
//!
//! # Stream message
//!
//! ```json
//! {"userId": "U101", "orderId": "O-123", "event": "ORDER_PLACED", "payload": {...}, "status": "PLACED"}
//! ```
//!
//! `userId`, `orderId` and a discriminator (`event`, or `type` when `event`
//! is absent) are required. Numeric ids are accepted and rendered as strings.
//!
//! # Push notification
//!
//! ```json
//! {"type": "ORDER_PLACED", "userId": "U101", "orderId": "O-123",
//!  "message": "Your order O-123 has been placed successfully."}
//! ```
//!
//! Payload fields are merged in, but never replace the reserved keys.

use crate::core::error::IngestError;
use crate::core::identity::UserIdentity;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Keys owned by the notification envelope
const RESERVED_KEYS: &[&str] = &[
    "type",
    "userId",
    "orderId",
    "connectionId",
    "message",
    "status",
];

/// Discriminator of an order lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    OrderPlaced,
    OrderConfirmed,
    OrderFailed,
    /// Any other discriminator, forwarded verbatim
    Other(String),
}

impl EventKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "ORDER_PLACED" => EventKind::OrderPlaced,
            "ORDER_CONFIRMED" => EventKind::OrderConfirmed,
            "ORDER_FAILED" => EventKind::OrderFailed,
            other => EventKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::OrderPlaced => "ORDER_PLACED",
            EventKind::OrderConfirmed => "ORDER_CONFIRMED",
            EventKind::OrderFailed => "ORDER_FAILED",
            EventKind::Other(other) => other,
        }
    }

    /// Human-readable text for the well-known kinds
    fn default_message(&self, order_id: &str) -> Option<String> {
        match self {
            EventKind::OrderPlaced => Some(format!(
                "Your order {} has been placed successfully.",
                order_id
            )),
            EventKind::OrderConfirmed => Some(format!("Your order {} has been confirmed.", order_id)),
            EventKind::OrderFailed => Some(format!(
                "Your order {} could not be processed.",
                order_id
            )),
            EventKind::Other(_) => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A validated event taken off the stream
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    /// Routing key
    pub user_id: UserIdentity,
    pub order_id: String,
    pub kind: EventKind,
    pub status: Option<String>,
    /// Opaque event payload; non-object payloads are discarded
    pub payload: Map<String, Value>,
}

impl InboundEvent {
    /// Parse and validate a raw stream message body
    pub fn from_slice(bytes: &[u8]) -> Result<Self, IngestError> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    /// Validate an already-parsed JSON value
    pub fn from_value(value: Value) -> Result<Self, IngestError> {
        let Value::Object(mut object) = value else {
            return Err(IngestError::NotAnObject);
        };

        let user_id = id_field(&object, "userId")
            .and_then(UserIdentity::new)
            .ok_or(IngestError::MissingField("userId"))?;
        let order_id = id_field(&object, "orderId")
            .filter(|id| !id.trim().is_empty())
            .ok_or(IngestError::MissingField("orderId"))?;
        let kind = text_field(&object, "event")
            .or_else(|| text_field(&object, "type"))
            .map(|raw| EventKind::parse(&raw))
            .ok_or(IngestError::MissingField("event"))?;
        let status = text_field(&object, "status");
        let payload = match object.remove("payload") {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };

        Ok(Self {
            user_id,
            order_id,
            kind,
            status,
            payload,
        })
    }
}

/// Non-empty string field
fn text_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    match object.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Identifier field; producers on the order service side emit numeric ids
fn id_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    match object.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn payload_text(payload: &Map<String, Value>, key: &str) -> Option<String> {
    payload.get(key).and_then(Value::as_str).map(str::to_string)
}

/// The payload pushed to a user's connections
///
/// The per-connection `connectionId` tag is added by the gateway at send
/// time; this struct is shaped once per dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundNotification {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub user_id: UserIdentity,
    pub order_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Payload fields minus reserved keys
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OutboundNotification {
    /// Shape the external contract from a stream event
    pub fn from_event(event: &InboundEvent) -> Self {
        let message = event
            .kind
            .default_message(&event.order_id)
            .or_else(|| payload_text(&event.payload, "message"));

        let extra = event
            .payload
            .iter()
            .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Self {
            kind: event.kind.clone(),
            user_id: event.user_id.clone(),
            order_id: event.order_id.clone(),
            message,
            status: event.status.clone().or_else(|| payload_text(&event.payload, "status")),
            extra,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_order_placed() {
        let event = InboundEvent::from_slice(
            br#"{"userId":"U101","orderId":"O-123","event":"ORDER_PLACED"}"#,
        )
        .unwrap();

        assert_eq!(event.user_id.as_str(), "U101");
        assert_eq!(event.order_id, "O-123");
        assert_eq!(event.kind, EventKind::OrderPlaced);
        assert!(event.payload.is_empty());
    }

    #[test]
    fn test_type_is_fallback_discriminator() {
        let event = InboundEvent::from_value(json!({
            "userId": "U1", "orderId": "O-1", "type": "ORDER_SHIPPED"
        }))
        .unwrap();
        assert_eq!(event.kind, EventKind::Other("ORDER_SHIPPED".into()));

        // `event` wins when both are present
        let event = InboundEvent::from_value(json!({
            "userId": "U1", "orderId": "O-1", "event": "ORDER_FAILED", "type": "IGNORED"
        }))
        .unwrap();
        assert_eq!(event.kind, EventKind::OrderFailed);
    }

    #[test]
    fn test_numeric_ids_are_accepted() {
        let event = InboundEvent::from_value(json!({
            "userId": 42, "orderId": 1001, "event": "ORDER_CONFIRMED"
        }))
        .unwrap();
        assert_eq!(event.user_id.as_str(), "42");
        assert_eq!(event.order_id, "1001");
    }

    #[test]
    fn test_missing_fields_are_rejected() {
        let cases = [
            (json!({"orderId": "O-1", "event": "ORDER_PLACED"}), "userId"),
            (json!({"userId": "", "orderId": "O-1", "event": "ORDER_PLACED"}), "userId"),
            (json!({"userId": "U1", "event": "ORDER_PLACED"}), "orderId"),
            (json!({"userId": "U1", "orderId": "O-1"}), "event"),
            (json!({"userId": "U1", "orderId": "O-1", "event": 7}), "event"),
        ];

        for (value, field) in cases {
            match InboundEvent::from_value(value) {
                Err(IngestError::MissingField(missing)) => assert_eq!(missing, field),
                other => panic!("expected MissingField({}), got {:?}", field, other),
            }
        }
    }

    #[test]
    fn test_non_json_and_non_object_are_rejected() {
        assert!(matches!(
            InboundEvent::from_slice(b"\xff\xfe not json"),
            Err(IngestError::Malformed(_))
        ));
        assert!(matches!(
            InboundEvent::from_slice(b"[1,2,3]"),
            Err(IngestError::NotAnObject)
        ));
    }

    #[test]
    fn test_order_placed_notification_shape() {
        let event = InboundEvent::from_value(json!({
            "userId": "U101", "orderId": "O-123", "event": "ORDER_PLACED"
        }))
        .unwrap();

        let notification = OutboundNotification::from_event(&event);
        let value = serde_json::to_value(&notification).unwrap();

        assert_eq!(
            value,
            json!({
                "type": "ORDER_PLACED",
                "userId": "U101",
                "orderId": "O-123",
                "message": "Your order O-123 has been placed successfully."
            })
        );
    }

    #[test]
    fn test_payload_cannot_override_reserved_keys() {
        let event = InboundEvent::from_value(json!({
            "userId": "U1",
            "orderId": "O-9",
            "event": "ORDER_SHIPPED",
            "status": "SHIPPED",
            "payload": {
                "userId": "someone-else",
                "type": "SPOOFED",
                "connectionId": "X-1",
                "message": "On its way",
                "carrier": "DHL"
            }
        }))
        .unwrap();

        let value = serde_json::to_value(OutboundNotification::from_event(&event)).unwrap();

        assert_eq!(value["type"], "ORDER_SHIPPED");
        assert_eq!(value["userId"], "U1");
        assert_eq!(value["status"], "SHIPPED");
        assert_eq!(value["message"], "On its way");
        assert_eq!(value["carrier"], "DHL");
        assert!(value.get("connectionId").is_none());
        assert!(value.get("raw").is_none());
    }

    #[test]
    fn test_payload_status_used_when_envelope_has_none() {
        let event = InboundEvent::from_value(json!({
            "userId": "U1",
            "orderId": "O-2",
            "event": "ORDER_CONFIRMED",
            "payload": {"status": "CONFIRMED", "eta": "2d"}
        }))
        .unwrap();

        let value = serde_json::to_value(OutboundNotification::from_event(&event)).unwrap();

        assert_eq!(value["status"], "CONFIRMED");
        assert_eq!(value["eta"], "2d");
        assert_eq!(value["message"], "Your order O-2 has been confirmed.");
    }

    #[test]
    fn test_known_kinds_have_messages() {
        assert_eq!(
            EventKind::OrderConfirmed.default_message("O-1").as_deref(),
            Some("Your order O-1 has been confirmed.")
        );
        assert_eq!(
            EventKind::OrderFailed.default_message("O-1").as_deref(),
            Some("Your order O-1 could not be processed.")
        );
        assert_eq!(EventKind::Other("X".into()).default_message("O-1"), None);
    }

    #[test]
    fn test_non_object_payload_is_dropped() {
        let event = InboundEvent::from_value(json!({
            "userId": "U1", "orderId": "O-1", "event": "ORDER_PLACED", "payload": "opaque"
        }))
        .unwrap();
        assert!(event.payload.is_empty());
    }
}
