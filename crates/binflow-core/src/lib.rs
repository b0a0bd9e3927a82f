//! Binflow Core - Wire types and correlation logic
//!
//! This crate provides the foundational types for the Binflow system:
//! - Websocket envelope parsing and the message-type vocabulary
//! - Latest-value snapshot types (telemetry and image captures)
//! - Category mapping for device rotation signals
//! - The bounded rotation-event table and its time-window matcher

pub mod correlate;
pub mod message;
pub mod snapshot;

pub use correlate::{Category, RotationTable, MAX_ROTATION_EVENTS};
pub use message::{ClassifyResult, Envelope, EnvelopeError, ImagePayload, TopicRequest};
pub use snapshot::{ImageCapture, TelemetrySnapshot};

/// Current time as milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
