//! Latest-value snapshot types
//!
//! The hub keeps exactly one current telemetry payload and one current image
//! capture in memory. Both are overwritten wholesale on every update; history
//! lives in the persistence layer, not here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The most recently received raw telemetry payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySnapshot {
    /// Opaque sensor object as sent by the device.
    pub data: Value,
    /// Receipt time, milliseconds since epoch.
    pub received_at: i64,
}

impl TelemetrySnapshot {
    pub fn new(data: Value, received_at: i64) -> Self {
        Self { data, received_at }
    }
}

/// The most recently received image capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageCapture {
    pub filename: String,
    pub content_type: String,
    /// Base64-encoded image bytes.
    pub data: String,
    /// Decoded byte size.
    pub size: usize,
    /// Receipt time, milliseconds since epoch.
    pub received_at: i64,
}

impl ImageCapture {
    /// Summary view without the base64 body, for REST responses and logs.
    pub fn summary(&self) -> Value {
        serde_json::json!({
            "filename": self.filename,
            "contentType": self.content_type,
            "size": self.size,
            "receivedAt": self.received_at,
        })
    }
}
