//! Websocket envelope and payload types
//!
//! Every message on the wire, in both directions, is a JSON envelope of the
//! shape `{ "type": <string>, "payload": <any> }`. Payloads are decoded into
//! typed structures once, at the dispatch boundary, instead of probing fields
//! deep inside handlers.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Message type strings recognized on the wire.
pub mod msg_type {
    // Inbound (device / clients -> hub)
    pub const ESP32_DATA: &str = "esp32:data";
    pub const ESP32_IMAGE: &str = "esp32:image";
    pub const ESP32_PING: &str = "esp32:ping";
    pub const AI_RESULT: &str = "ai:classify:result";
    pub const CLIENT_SUBSCRIBE: &str = "client:subscribe";
    pub const CLIENT_UNSUBSCRIBE: &str = "client:unsubscribe";

    // Outbound (hub -> clients)
    pub const SERVER_DATA: &str = "server:data";
    pub const SERVER_IMAGE: &str = "server:image";
    pub const SERVER_IMAGE_ACK: &str = "server:image:ack";
    pub const SERVER_SUBSCRIBED: &str = "server:subscribed";
    pub const SERVER_UNSUBSCRIBED: &str = "server:unsubscribed";
    pub const SERVER_PONG: &str = "server:pong";
    pub const SERVER_ERROR: &str = "server:error";
}

/// Named topics used for selective fan-out.
pub mod topic {
    /// Images forwarded for downstream classification.
    pub const IMAGE: &str = "image";
    /// Classification results forwarded back toward the device.
    pub const COMMAND: &str = "command";
    /// Classification results mirrored for dashboard display.
    pub const DASHBOARD: &str = "dashboard/updates";
}

#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing 'type' field")]
    MissingType,
}

/// The wire envelope carried over the websocket in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload: Some(payload),
        }
    }

    /// Build a `server:error` reply with a human-readable reason.
    pub fn error(reason: impl Into<String>) -> Self {
        Self::new(msg_type::SERVER_ERROR, Value::String(reason.into()))
    }

    /// Parse an inbound text frame. A syntactically valid message without a
    /// non-empty `type` field is rejected with [`EnvelopeError::MissingType`].
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let root: Value = serde_json::from_str(text)?;
        let kind = match root.get("type").and_then(Value::as_str) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => return Err(EnvelopeError::MissingType),
        };
        Ok(Self {
            kind,
            payload: root.get("payload").cloned(),
        })
    }

    pub fn to_json(&self) -> String {
        // Serializing a String + Value cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Payload of an `esp32:image` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePayload {
    pub filename: String,
    pub content_type: String,
    /// Base64-encoded image bytes.
    pub data: String,
}

impl ImagePayload {
    /// Decoded byte size of the base64 payload. `None` if the data is not
    /// valid base64.
    pub fn decoded_size(&self) -> Option<usize> {
        BASE64.decode(self.data.as_bytes()).ok().map(|b| b.len())
    }
}

/// Payload of `client:subscribe` / `client:unsubscribe`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicRequest {
    pub topic: String,
}

/// Payload of `ai:classify:result`. All fields are optional on the wire;
/// absent fields fall back to neutral values for logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyResult {
    pub class: Option<String>,
    pub confidence: Option<f64>,
    pub motor_action: Option<String>,
}

impl ClassifyResult {
    pub fn class(&self) -> &str {
        self.class.as_deref().unwrap_or("unknown")
    }

    pub fn confidence(&self) -> f64 {
        self.confidence.unwrap_or(0.0)
    }

    pub fn motor_action(&self) -> &str {
        self.motor_action.as_deref().unwrap_or("none")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_envelope() {
        let env = Envelope::parse(r#"{"type":"esp32:ping","payload":null}"#).unwrap();
        assert_eq!(env.kind, msg_type::ESP32_PING);
    }

    #[test]
    fn parse_rejects_missing_type() {
        let err = Envelope::parse(r#"{"payload":{"a":1}}"#).unwrap_err();
        assert!(matches!(err, EnvelopeError::MissingType));
    }

    #[test]
    fn parse_rejects_empty_type() {
        let err = Envelope::parse(r#"{"type":"","payload":{}}"#).unwrap_err();
        assert!(matches!(err, EnvelopeError::MissingType));
    }

    #[test]
    fn parse_rejects_malformed_json() {
        let err = Envelope::parse("{not json").unwrap_err();
        assert!(matches!(err, EnvelopeError::Json(_)));
    }

    #[test]
    fn image_payload_decoded_size() {
        let payload = ImagePayload {
            filename: "capture.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            data: BASE64.encode(b"hello"),
        };
        assert_eq!(payload.decoded_size(), Some(5));
    }

    #[test]
    fn image_payload_rejects_invalid_base64() {
        let payload = ImagePayload {
            filename: "capture.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            data: "not base64!!!".to_string(),
        };
        assert_eq!(payload.decoded_size(), None);
    }

    #[test]
    fn image_payload_requires_all_fields() {
        let value = serde_json::json!({ "filename": "a.jpg", "data": "aGk=" });
        assert!(serde_json::from_value::<ImagePayload>(value).is_err());
    }

    #[test]
    fn error_envelope_round_trip() {
        let env = Envelope::error("bad input");
        let parsed = Envelope::parse(&env.to_json()).unwrap();
        assert_eq!(parsed.kind, msg_type::SERVER_ERROR);
        assert_eq!(parsed.payload, Some(Value::String("bad input".into())));
    }
}
