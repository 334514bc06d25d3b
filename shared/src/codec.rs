//! JSON codec for realtime text frames
//!
//! Every frame is a single JSON document:
//! ```text
//! { "type": <EventKind>, "payload": { ... }, "timestamp": <ISO-8601> }
//! ```

use thiserror::Error;

use crate::Envelope;

/// Maximum frame size (1 MB) to prevent memory exhaustion
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    MessageTooLarge(usize),

    #[error("Payload must be a JSON object, got {0}")]
    InvalidPayload(&'static str),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode an Envelope into a text frame
pub fn encode(envelope: &Envelope) -> Result<String, CodecError> {
    let text = serde_json::to_string(envelope)?;

    if text.len() > MAX_FRAME_SIZE {
        return Err(CodecError::MessageTooLarge(text.len()));
    }

    Ok(text)
}

/// Decode a text frame into an Envelope
pub fn decode(text: &str) -> Result<Envelope, CodecError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(CodecError::MessageTooLarge(text.len()));
    }

    let envelope: Envelope = serde_json::from_str(text)?;

    if !envelope.payload.is_object() {
        return Err(CodecError::InvalidPayload(json_type_name(&envelope.payload)));
    }

    Ok(envelope)
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
