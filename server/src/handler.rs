//! Inbound envelope routing

use crate::session::{SessionHandle, SessionManager};
use chathub_protocol::{
    codec, conversation_id, now_iso8601, realtime, ChatMessage, Envelope, EventKind,
    MessageReadPayload, TypingPayload,
};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Machine-readable error codes sent in `ERROR` envelopes
pub mod error_code {
    pub const PARSE_ERROR: &str = "PARSE_ERROR";
    pub const INVALID_PARAMS: &str = "INVALID_PARAMS";
    pub const CONTENT_TOO_LONG: &str = "CONTENT_TOO_LONG";
    pub const UNKNOWN_TYPE: &str = "UNKNOWN_TYPE";
}

/// Handle one text frame from `from`
pub async fn handle_frame(sessions: &SessionManager, from: &SessionHandle, text: &str) {
    let envelope = match codec::decode(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Malformed frame from {}: {}", from.user_id, e);
            reply(
                from,
                &Envelope::error(error_code::PARSE_ERROR, "Malformed message"),
            );
            return;
        }
    };

    debug!("{} -> {}", from.user_id, envelope.kind);

    if !envelope.kind.is_client_bound() {
        warn!("Unsupported envelope {} from {}", envelope.kind, from.user_id);
        reply(
            from,
            &Envelope::error(
                error_code::UNKNOWN_TYPE,
                format!("Unsupported message type {}", envelope.kind),
            ),
        );
        return;
    }

    match envelope.kind {
        EventKind::Ping => reply(from, &Envelope::pong()),
        EventKind::SendMessage => handle_send_message(sessions, from, &envelope).await,
        EventKind::TypingStart => handle_typing(sessions, from, &envelope, true).await,
        EventKind::TypingStop => handle_typing(sessions, from, &envelope, false).await,
        EventKind::MessageRead => handle_message_read(sessions, from, &envelope).await,
        // server-bound kinds were rejected above
        _ => {}
    }
}

fn reply(to: &SessionHandle, envelope: &Envelope) {
    if let Err(e) = to.send(envelope) {
        error!("Failed to reply to {}: {}", to.user_id, e);
    }
}

fn non_blank<'a>(payload: &'a Value, field: &str) -> Option<&'a str> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

async fn handle_send_message(sessions: &SessionManager, from: &SessionHandle, envelope: &Envelope) {
    let payload = &envelope.payload;
    let (recipient_id, content) = match (
        non_blank(payload, "recipientId"),
        non_blank(payload, "content"),
    ) {
        (Some(recipient_id), Some(content)) => (recipient_id, content.trim()),
        _ => {
            reply(
                from,
                &Envelope::error(error_code::INVALID_PARAMS, "Missing required parameters"),
            );
            return;
        }
    };

    if content.chars().count() > realtime::MAX_CONTENT_LENGTH {
        reply(
            from,
            &Envelope::error(
                error_code::CONTENT_TOO_LONG,
                format!(
                    "Message content cannot exceed {} characters",
                    realtime::MAX_CONTENT_LENGTH
                ),
            ),
        );
        return;
    }

    let client_message_id = payload
        .get("clientMessageId")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let message = ChatMessage {
        message_id: Uuid::new_v4().to_string(),
        conversation_id: conversation_id(&from.user_id, recipient_id),
        sender_id: from.user_id.clone(),
        sender_username: from.user_id.clone(),
        content: content.to_string(),
        timestamp: now_iso8601(),
    };

    reply(
        from,
        &Envelope::message_delivered(message.message_id.as_str(), client_message_id),
    );

    match sessions
        .send_to(recipient_id, &Envelope::new_message(&message))
        .await
    {
        Ok(()) => info!("Message {} pushed to {}", message.message_id, recipient_id),
        Err(e) => debug!("Message {} not pushed: {}", message.message_id, e),
    }
}

async fn handle_typing(
    sessions: &SessionManager,
    from: &SessionHandle,
    envelope: &Envelope,
    is_typing: bool,
) {
    let payload: TypingPayload = match envelope.payload_as() {
        Ok(payload) => payload,
        Err(_) => return,
    };

    let typing = Envelope::user_typing(from.user_id.as_str(), from.user_id.as_str(), is_typing);
    if sessions.send_to(&payload.recipient_id, &typing).await.is_ok() {
        debug!(
            "{} typing={} notified {}",
            from.user_id, is_typing, payload.recipient_id
        );
    }
}

async fn handle_message_read(sessions: &SessionManager, from: &SessionHandle, envelope: &Envelope) {
    let payload: MessageReadPayload = match envelope.payload_as() {
        Ok(payload) => payload,
        Err(_) => return,
    };

    let Some(other) = other_participant(&payload.conversation_id, &from.user_id) else {
        warn!(
            "{} is not a participant of {}",
            from.user_id, payload.conversation_id
        );
        return;
    };

    let receipt = Envelope::message_read_receipt(
        payload.conversation_id.as_str(),
        payload.message_id,
        from.user_id.as_str(),
    );
    if sessions.send_to(other, &receipt).await.is_ok() {
        info!("Read receipt for {} sent to {}", payload.conversation_id, other);
    }
}

/// The participant of a direct conversation who is not `user_id`
fn other_participant<'a>(conversation_id: &'a str, user_id: &str) -> Option<&'a str> {
    let (a, b) = conversation_id.split_once('_')?;
    if a == user_id {
        Some(b)
    } else if b == user_id {
        Some(a)
    } else {
        None
    }
}
