//! Envelope Codec
//!
//! JSON encoding and decoding of the `{type, data}` envelope.
//!
//! Decoding validates shape only: the payload must be a JSON object with a
//! non-empty string `type`. Classification of the type happens in the router.

use crate::application::ports::InboundFrame;
use crate::domain::streaming::{InboundMessage, OutboundMessage};

/// Codec errors. These are data-layer faults and never close the channel.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary frame was not valid UTF-8.
    #[error("binary frame is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Payload parsed but is not an envelope.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),
}

/// JSON codec for feed envelopes.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a frame into an envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not UTF-8 JSON or lacks a string `type`.
    pub fn decode_frame(&self, frame: &InboundFrame) -> Result<InboundMessage, CodecError> {
        match frame {
            InboundFrame::Text(text) => self.decode(text),
            InboundFrame::Binary(bytes) => {
                let text = String::from_utf8(bytes.clone())?;
                self.decode(&text)
            }
        }
    }

    /// Decode a JSON text payload into an envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON parsing fails or the envelope shape is invalid.
    pub fn decode(&self, text: &str) -> Result<InboundMessage, CodecError> {
        let value: serde_json::Value = serde_json::from_str(text.trim())?;

        let mut map = match value {
            serde_json::Value::Object(map) => map,
            other => {
                return Err(CodecError::InvalidEnvelope(format!(
                    "expected JSON object, got {}",
                    json_kind(&other)
                )));
            }
        };

        let kind = match map.remove("type") {
            Some(serde_json::Value::String(kind)) if !kind.is_empty() => kind,
            Some(serde_json::Value::String(_)) => {
                return Err(CodecError::InvalidEnvelope("empty `type`".to_string()));
            }
            Some(other) => {
                return Err(CodecError::InvalidEnvelope(format!(
                    "`type` must be a string, got {}",
                    json_kind(&other)
                )));
            }
            None => {
                return Err(CodecError::InvalidEnvelope("missing `type`".to_string()));
            }
        };

        let data = map.remove("data").unwrap_or(serde_json::Value::Null);
        Ok(InboundMessage { kind, data })
    }

    /// Encode an outbound message.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self, message: &OutboundMessage) -> Result<String, CodecError> {
        Ok(serde_json::to_string(message)?)
    }
}

const fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_price_update() {
        let codec = JsonCodec::new();
        let msg = codec
            .decode(r#"{"type":"price_update","data":[{"symbol":"BTC","price":"1.5"}]}"#)
            .unwrap();
        assert_eq!(msg.kind, "price_update");
        assert!(msg.data.is_array());
    }

    #[test]
    fn decode_missing_data_is_null() {
        let msg = JsonCodec::new().decode(r#"{"type":"heartbeat"}"#).unwrap();
        assert_eq!(msg.kind, "heartbeat");
        assert!(msg.data.is_null());
    }

    #[test]
    fn decode_binary_frame() {
        let frame = InboundFrame::Binary(br#"{"type":"connected","data":{}}"#.to_vec());
        let msg = JsonCodec::new().decode_frame(&frame).unwrap();
        assert_eq!(msg.kind, "connected");
    }

    #[test]
    fn decode_rejects_non_json() {
        let err = JsonCodec::new().decode("not json").unwrap_err();
        assert!(matches!(err, CodecError::Json(_)));
    }

    #[test]
    fn decode_rejects_non_object() {
        let err = JsonCodec::new().decode("[1,2,3]").unwrap_err();
        assert!(matches!(err, CodecError::InvalidEnvelope(ref m) if m.contains("array")));
    }

    #[test]
    fn decode_rejects_bad_type_field() {
        let codec = JsonCodec::new();
        assert!(matches!(
            codec.decode(r#"{"data":1}"#),
            Err(CodecError::InvalidEnvelope(_))
        ));
        assert!(matches!(
            codec.decode(r#"{"type":42}"#),
            Err(CodecError::InvalidEnvelope(_))
        ));
        assert!(matches!(
            codec.decode(r#"{"type":""}"#),
            Err(CodecError::InvalidEnvelope(_))
        ));
    }

    #[test]
    fn decode_rejects_invalid_utf8() {
        let frame = InboundFrame::Binary(vec![0xff, 0xfe]);
        assert!(matches!(
            JsonCodec::new().decode_frame(&frame),
            Err(CodecError::Utf8(_))
        ));
    }

    #[test]
    fn encode_outbound() {
        let codec = JsonCodec::new();
        assert_eq!(
            codec.encode(&OutboundMessage::RefreshRequest).unwrap(),
            r#"{"type":"refresh_request"}"#
        );
    }
}
