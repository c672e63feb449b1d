//! Codec for encoding and decoding Chorus messages.
//!
//! Messages are JSON objects. Decoding is done in two steps so a bad frame
//! can be classified: first the envelope and its `type`, then the fields.

use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

use crate::messages::{kind, ClientMessage, ServerMessage};

/// Maximum inbound message size (1 MiB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// An encoded outbound message, shared by every recipient of a broadcast.
pub type EncodedMessage = Arc<str>;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message exceeds maximum size.
    #[error("Message size {0} exceeds maximum {MAX_MESSAGE_SIZE}")]
    MessageTooLarge(usize),

    /// Invalid encoding, missing `type`, or bad fields for a known type.
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// A `type` that is not part of the protocol.
    #[error("Unknown message type: {0}")]
    UnknownType(String),

    /// A server-to-client `type` sent by a client.
    #[error("Unexpected message type from client: {0}")]
    UnexpectedType(String),

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            ProtocolError::MessageTooLarge(_) => "too_large",
            ProtocolError::Malformed(_) => "malformed",
            ProtocolError::UnknownType(_) => "unknown_type",
            ProtocolError::UnexpectedType(_) => "unexpected_type",
            ProtocolError::Encode(_) => "encode",
        }
    }
}

/// Encode a server message.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(message: &ServerMessage) -> Result<EncodedMessage, ProtocolError> {
    let text = serde_json::to_string(message)?;
    Ok(Arc::from(text))
}

/// Decode a client message from raw bytes.
///
/// Text and binary transport frames are both accepted as long as they hold
/// UTF-8 JSON.
///
/// # Errors
///
/// Returns an error if the message is too large, malformed, or of a type a
/// client may not send.
pub fn decode(data: &[u8]) -> Result<ClientMessage, ProtocolError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(data.len()));
    }

    let value: Value =
        serde_json::from_slice(data).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let Value::Object(envelope) = value else {
        return Err(ProtocolError::Malformed("expected a JSON object".into()));
    };

    classify(&envelope)?;

    serde_json::from_value(Value::Object(envelope))
        .map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Decode a client message from a text frame.
///
/// # Errors
///
/// See [`decode`].
pub fn decode_text(text: &str) -> Result<ClientMessage, ProtocolError> {
    decode(text.as_bytes())
}

fn classify(envelope: &Map<String, Value>) -> Result<(), ProtocolError> {
    let message_type = match envelope.get("type") {
        Some(Value::String(t)) => t.as_str(),
        Some(_) => return Err(ProtocolError::Malformed("`type` is not a string".into())),
        None => return Err(ProtocolError::Malformed("missing `type`".into())),
    };

    if kind::CLIENT.contains(&message_type) {
        Ok(())
    } else if kind::SERVER_ONLY.contains(&message_type) {
        Err(ProtocolError::UnexpectedType(message_type.to_string()))
    } else {
        Err(ProtocolError::UnknownType(message_type.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_join() {
        let msg = decode_text(r#"{"type":"join","roomId":"r1","clientId":"a"}"#).unwrap();
        assert_eq!(msg, ClientMessage::join("r1", "a"));
    }

    #[test]
    fn test_decode_binary_json() {
        let msg = decode(br#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ping);
    }

    #[test]
    fn test_decode_invalid_json() {
        match decode_text("{not json") {
            Err(ProtocolError::Malformed(_)) => {}
            other => panic!("Expected Malformed error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_missing_type() {
        assert!(matches!(
            decode_text(r#"{"roomId":"r1"}"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            decode_text(r#"{"type":7}"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            decode_text(r#"["join"]"#),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_missing_required_field() {
        // Known type, but `clientId` is required.
        let err = decode_text(r#"{"type":"join","roomId":"r1"}"#).unwrap_err();
        assert_eq!(err.label(), "malformed");

        let err = decode_text(r#"{"type":"audio","volume":3}"#).unwrap_err();
        assert_eq!(err.label(), "malformed");
    }

    #[test]
    fn test_decode_unknown_type() {
        match decode_text(r#"{"type":"video","data":"x"}"#) {
            Err(ProtocolError::UnknownType(t)) => assert_eq!(t, "video"),
            other => panic!("Expected UnknownType error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_server_only_type() {
        let err = decode_text(r#"{"type":"room-info","memberCount":1,"members":[]}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedType(_)));
    }

    #[test]
    fn test_decode_too_large() {
        let big = vec![b' '; MAX_MESSAGE_SIZE + 1];
        assert!(matches!(
            decode(&big),
            Err(ProtocolError::MessageTooLarge(_))
        ));
    }

    #[test]
    fn test_audio_payload_relayed_verbatim() {
        let msg = decode_text(r#"{"type":"audio","data":{"pcm":[1,2,3]},"volume":5}"#).unwrap();
        let ClientMessage::Audio { data, volume } = msg else {
            panic!("expected audio");
        };

        let relayed = ServerMessage::Audio {
            client_id: "a".into(),
            display_name: "a".into(),
            data,
            volume: volume.unwrap(),
        };
        let encoded = encode(&relayed).unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();

        assert_eq!(value["data"], json!({"pcm": [1, 2, 3]}));
        assert_eq!(value["volume"], json!(5));
    }
}
