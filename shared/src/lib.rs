//! ChatHub Shared Protocol Types
//!
//! This crate provides the wire types, JSON codec and connection state machine
//! shared by the realtime chat client and the development server.

pub mod codec;
pub mod payload;
pub mod state_machine;

use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use payload::*;

/// Current UTC time as an ISO-8601 string with millisecond precision
/// (`2024-05-01T12:00:00.000Z`).
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Realtime connection parameters
pub mod realtime {
    /// Default realtime endpoint; the credential is appended as a query parameter
    pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8080/ws/chat";

    /// Query parameter carrying the bearer credential
    pub const TOKEN_QUERY_PARAM: &str = "token";

    /// Heartbeat interval in milliseconds
    pub const HEARTBEAT_INTERVAL_MS: u64 = 30_000;

    /// Base delay for reconnection; attempt N waits N times this
    pub const RECONNECT_BASE_DELAY_MS: u64 = 3_000;

    /// Maximum automatic reconnection attempts before giving up
    pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

    /// Maximum chat message content length accepted by the server
    pub const MAX_CONTENT_LENGTH: usize = 2000;

    /// Linear backoff delay for the given (1-based) attempt
    pub fn reconnect_delay_ms(attempt: u32) -> u64 {
        RECONNECT_BASE_DELAY_MS * u64::from(attempt)
    }
}

/// Discriminant of an [`Envelope`], serialized as SCREAMING_SNAKE_CASE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    // client -> server
    Ping,
    SendMessage,
    TypingStart,
    TypingStop,
    MessageRead,

    // server -> client
    Pong,
    ConnectionEstablished,
    NewMessage,
    MessageDelivered,
    DeliveryReceipt,
    ReadReceipt,
    MessageReadReceipt,
    UserTyping,
    Typing,
    FriendRequest,
    FriendOnline,
    FriendOffline,
    Error,

    /// Any kind this build does not know about
    #[serde(other)]
    Unknown,
}

impl EventKind {
    /// Whether a client is expected to send this kind
    pub fn is_client_bound(&self) -> bool {
        matches!(
            self,
            EventKind::Ping
                | EventKind::SendMessage
                | EventKind::TypingStart
                | EventKind::TypingStop
                | EventKind::MessageRead
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Serializing a unit variant to a JSON string cannot fail
        match serde_json::to_value(self) {
            Ok(Value::String(name)) => f.write_str(&name),
            _ => write!(f, "{:?}", self),
        }
    }
}

/// The unit exchanged over the realtime transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default = "empty_object")]
    pub payload: Value,
    pub timestamp: String,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl Envelope {
    /// Create an envelope stamped with the current time
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self {
            kind,
            payload,
            timestamp: now_iso8601(),
        }
    }

    /// Create an envelope from a typed payload
    pub fn with_payload<P: Serialize>(kind: EventKind, payload: &P) -> Self {
        let payload = serde_json::to_value(payload).unwrap_or_else(|_| empty_object());
        Self::new(kind, payload)
    }

    /// Interpret the payload as a typed structure
    pub fn payload_as<P: DeserializeOwned>(&self) -> Result<P, serde_json::Error> {
        P::deserialize(&self.payload)
    }

    /// Heartbeat envelope with an empty payload
    pub fn ping() -> Self {
        Self::new(EventKind::Ping, empty_object())
    }

    pub fn pong() -> Self {
        Self::with_payload(
            EventKind::Pong,
            &StatusMessage {
                message: "pong".into(),
            },
        )
    }

    /// Chat message from the local user
    pub fn send_message(
        recipient_id: impl Into<String>,
        content: impl Into<String>,
        client_message_id: impl Into<String>,
    ) -> Self {
        Self::with_payload(
            EventKind::SendMessage,
            &SendMessagePayload {
                recipient_id: recipient_id.into(),
                content: content.into(),
                client_message_id: client_message_id.into(),
            },
        )
    }

    pub fn typing_start(recipient_id: impl Into<String>) -> Self {
        Self::with_payload(
            EventKind::TypingStart,
            &TypingPayload {
                recipient_id: recipient_id.into(),
            },
        )
    }

    pub fn typing_stop(recipient_id: impl Into<String>) -> Self {
        Self::with_payload(
            EventKind::TypingStop,
            &TypingPayload {
                recipient_id: recipient_id.into(),
            },
        )
    }

    /// Mark a conversation as read
    pub fn message_read(conversation_id: impl Into<String>) -> Self {
        Self::with_payload(
            EventKind::MessageRead,
            &MessageReadPayload {
                conversation_id: conversation_id.into(),
                message_id: None,
            },
        )
    }

    pub fn connection_established(user_id: impl Into<String>) -> Self {
        Self::with_payload(
            EventKind::ConnectionEstablished,
            &ConnectionEstablishedPayload {
                user_id: user_id.into(),
                message: "connected".into(),
            },
        )
    }

    pub fn new_message(message: &ChatMessage) -> Self {
        Self::with_payload(EventKind::NewMessage, message)
    }

    pub fn message_delivered(
        message_id: impl Into<String>,
        client_message_id: impl Into<String>,
    ) -> Self {
        Self::with_payload(
            EventKind::MessageDelivered,
            &MessageDeliveredPayload {
                message_id: message_id.into(),
                client_message_id: client_message_id.into(),
            },
        )
    }

    pub fn user_typing(
        user_id: impl Into<String>,
        username: impl Into<String>,
        is_typing: bool,
    ) -> Self {
        Self::with_payload(
            EventKind::UserTyping,
            &UserTypingPayload {
                user_id: user_id.into(),
                username: username.into(),
                is_typing,
            },
        )
    }

    pub fn message_read_receipt(
        conversation_id: impl Into<String>,
        message_id: Option<String>,
        read_by: impl Into<String>,
    ) -> Self {
        Self::with_payload(
            EventKind::MessageReadReceipt,
            &ReadReceiptPayload {
                conversation_id: conversation_id.into(),
                message_id,
                read_by: read_by.into(),
                read_at: now_iso8601(),
            },
        )
    }

    /// Error notification with a machine-readable code
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_payload(
            EventKind::Error,
            &ErrorPayload {
                code: code.into(),
                message: message.into(),
            },
        )
    }
}

/// Conversation id for a direct chat: both user ids sorted and joined by `_`
pub fn conversation_id(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}_{}", a, b)
    } else {
        format!("{}_{}", b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ping_has_empty_payload() {
        let ping = Envelope::ping();
        assert_eq!(ping.kind, EventKind::Ping);
        assert_eq!(ping.payload, json!({}));
        assert!(ping.timestamp.ends_with('Z'));
    }

    #[test]
    fn test_send_message_payload_fields() {
        let env = Envelope::send_message("bob", "hi", "c-1");
        assert_eq!(
            env.payload,
            json!({"recipientId": "bob", "content": "hi", "clientMessageId": "c-1"})
        );
    }

    #[test]
    fn test_event_kind_wire_names() {
        assert_eq!(EventKind::SendMessage.to_string(), "SEND_MESSAGE");
        assert_eq!(EventKind::FriendOffline.to_string(), "FRIEND_OFFLINE");
        let kind: EventKind = serde_json::from_str("\"SOMETHING_NEW\"").unwrap();
        assert_eq!(kind, EventKind::Unknown);
    }

    #[test]
    fn test_timestamp_format() {
        let ts = now_iso8601();
        // 2024-01-01T00:00:00.000Z
        assert_eq!(ts.len(), 24);
        assert_eq!(&ts[10..11], "T");
    }

    #[test]
    fn test_reconnect_delay_is_linear() {
        let delays: Vec<u64> = (1..=5).map(realtime::reconnect_delay_ms).collect();
        assert_eq!(delays, vec![3000, 6000, 9000, 12000, 15000]);
    }

    #[test]
    fn test_conversation_id_is_order_independent() {
        assert_eq!(conversation_id("bob", "alice"), "alice_bob");
        assert_eq!(conversation_id("alice", "bob"), "alice_bob");
    }

    #[test]
    fn test_payload_as_typed() {
        let env = Envelope::typing_start("carol");
        let typed: TypingPayload = env.payload_as().unwrap();
        assert_eq!(typed.recipient_id, "carol");
    }
}
