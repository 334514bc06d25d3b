//! Typed payloads for each [`EventKind`](crate::EventKind)

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub recipient_id: String,
    pub content: String,
    /// Client-generated idempotency id, echoed back in `MESSAGE_DELIVERED`
    pub client_message_id: String,
}

/// Payload of `TYPING_START` and `TYPING_STOP`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub recipient_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReadPayload {
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// A stored chat message as pushed in `NEW_MESSAGE`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(alias = "id")]
    pub message_id: String,
    pub conversation_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub sender_username: String,
    pub content: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeliveredPayload {
    pub message_id: String,
    pub client_message_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTypingPayload {
    pub user_id: String,
    pub username: String,
    pub is_typing: bool,
}

/// Payload of `READ_RECEIPT` / `MESSAGE_READ_RECEIPT`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceiptPayload {
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default)]
    pub read_by: String,
    #[serde(default)]
    pub read_at: String,
}

/// Payload of `FRIEND_ONLINE` / `FRIEND_OFFLINE`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendPresencePayload {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionEstablishedPayload {
    pub user_id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_message_accepts_short_id() {
        let msg: ChatMessage = serde_json::from_value(json!({
            "id": "m-1",
            "conversationId": "alice_bob",
            "senderId": "alice",
            "content": "hello",
            "timestamp": "2024-01-01T00:00:00.000Z"
        }))
        .unwrap();
        assert_eq!(msg.message_id, "m-1");
        assert!(msg.sender_username.is_empty());
    }

    #[test]
    fn test_message_read_omits_missing_message_id() {
        let payload = MessageReadPayload {
            conversation_id: "alice_bob".into(),
            message_id: None,
        };
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({"conversationId": "alice_bob"})
        );
    }
}
