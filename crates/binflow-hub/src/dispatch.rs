//! Inbound message dispatcher
//!
//! Decodes each inbound text frame as a `{ type, payload }` envelope and
//! routes it to exactly one handler. Malformed input earns the sender one
//! `server:error` reply and nothing else; unknown but well-formed types are
//! logged and dropped. No handler failure ever closes the connection.

use binflow_core::message::{msg_type, topic};
use binflow_core::{
    now_millis, ClassifyResult, Envelope, ImageCapture, ImagePayload, TelemetrySnapshot,
    TopicRequest,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::registry::SessionHandle;
use crate::state::AppState;

/// Handle one inbound text frame from a session.
pub async fn handle_message(state: &Arc<AppState>, sender: &SessionHandle, text: &str) {
    let envelope = match Envelope::parse(text) {
        Ok(env) => env,
        Err(e) => {
            warn!(session = %sender.id, error = %e, "Rejected inbound message");
            sender.send_text(Envelope::error(e.to_string()).to_json());
            return;
        }
    };

    debug!(session = %sender.id, kind = %envelope.kind, "Processing message");

    match envelope.kind.as_str() {
        msg_type::ESP32_DATA => handle_data(state, sender, envelope.payload).await,
        msg_type::ESP32_IMAGE => handle_image(state, sender, envelope.payload, text).await,
        msg_type::AI_RESULT => handle_ai_result(state, sender, envelope.payload, text).await,
        msg_type::CLIENT_SUBSCRIBE => handle_subscribe(state, sender, envelope.payload).await,
        msg_type::CLIENT_UNSUBSCRIBE => handle_unsubscribe(state, sender, envelope.payload).await,
        msg_type::ESP32_PING => handle_ping(sender),
        other => {
            debug!(session = %sender.id, kind = %other, "Unknown message type, ignoring");
        }
    }
}

/// Device telemetry: cache the latest value and mirror it to every other
/// session as `server:data`.
async fn handle_data(state: &Arc<AppState>, sender: &SessionHandle, payload: Option<Value>) {
    let snapshot = TelemetrySnapshot::new(payload.unwrap_or(Value::Null), now_millis());
    state.update_telemetry(snapshot.clone()).await;

    let value = match serde_json::to_value(&snapshot) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Failed to serialize telemetry broadcast");
            return;
        }
    };
    let env = Envelope::new(msg_type::SERVER_DATA, value);
    let report = state
        .registry
        .broadcast_all(&env.to_json(), Some(&sender.id))
        .await;
    info!(sent = report.sent, failed = report.failed, "Telemetry broadcast");
}

/// Device image capture: validate, cache, ack the sender, and forward the
/// original frame to the image topic for downstream classification.
async fn handle_image(
    state: &Arc<AppState>,
    sender: &SessionHandle,
    payload: Option<Value>,
    raw: &str,
) {
    let payload = match payload.map(serde_json::from_value::<ImagePayload>) {
        Some(Ok(p)) => p,
        _ => {
            warn!(session = %sender.id, "Incomplete esp32:image payload");
            sender.send_text(
                Envelope::error("Missing filename/contentType/data for esp32:image").to_json(),
            );
            return;
        }
    };

    let Some(size) = payload.decoded_size() else {
        warn!(session = %sender.id, filename = %payload.filename, "Image data is not valid base64");
        sender.send_text(Envelope::error("Invalid base64 image data").to_json());
        return;
    };

    let capture = ImageCapture {
        filename: payload.filename.clone(),
        content_type: payload.content_type,
        data: payload.data,
        size,
        received_at: now_millis(),
    };
    let received_at = capture.received_at;
    state.update_image(capture).await;

    info!(filename = %payload.filename, size = size, "Image capture received");

    let ack = Envelope::new(
        msg_type::SERVER_IMAGE_ACK,
        json!({
            "filename": payload.filename,
            "receivedAt": received_at,
            "size": size,
        }),
    );
    sender.send_text(ack.to_json());

    let report = state
        .registry
        .publish_to_topic(topic::IMAGE, raw, Some(&sender.id))
        .await;
    debug!(sent = report.sent, failed = report.failed, "Image forwarded to image topic");
}

/// Classification result: forward toward the device on the command topic and
/// mirror to the dashboard topic.
async fn handle_ai_result(
    state: &Arc<AppState>,
    sender: &SessionHandle,
    payload: Option<Value>,
    raw: &str,
) {
    let result: ClassifyResult = payload
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or(ClassifyResult {
            class: None,
            confidence: None,
            motor_action: None,
        });

    info!(
        class = %result.class(),
        confidence = result.confidence(),
        motor_action = %result.motor_action(),
        "Classification result received"
    );

    state
        .registry
        .publish_to_topic(topic::COMMAND, raw, Some(&sender.id))
        .await;
    state
        .registry
        .publish_to_topic(topic::DASHBOARD, raw, Some(&sender.id))
        .await;
}

async fn handle_subscribe(state: &Arc<AppState>, sender: &SessionHandle, payload: Option<Value>) {
    let topic = payload
        .and_then(|v| serde_json::from_value::<TopicRequest>(v).ok())
        .map(|r| r.topic)
        .filter(|t| !t.is_empty());

    let Some(topic) = topic else {
        sender.send_text(Envelope::error("Missing topic for subscription").to_json());
        return;
    };

    state.registry.subscribe(&sender.id, &topic).await;
    info!(session = %sender.id, topic = %topic, "Session subscribed");

    let ack = Envelope::new(
        msg_type::SERVER_SUBSCRIBED,
        json!({
            "topic": topic,
            "message": format!("Successfully subscribed to {}", topic),
        }),
    );
    sender.send_text(ack.to_json());
}

async fn handle_unsubscribe(state: &Arc<AppState>, sender: &SessionHandle, payload: Option<Value>) {
    // A missing topic is a silent no-op here, unlike subscribe
    let Some(topic) = payload
        .and_then(|v| serde_json::from_value::<TopicRequest>(v).ok())
        .map(|r| r.topic)
        .filter(|t| !t.is_empty())
    else {
        return;
    };

    state.registry.unsubscribe(&sender.id, &topic).await;
    info!(session = %sender.id, topic = %topic, "Session unsubscribed");

    let ack = Envelope::new(
        msg_type::SERVER_UNSUBSCRIBED,
        json!({
            "topic": topic,
            "message": format!("Successfully unsubscribed from {}", topic),
        }),
    );
    sender.send_text(ack.to_json());
}

fn handle_ping(sender: &SessionHandle) {
    debug!(session = %sender.id, "Ping received");
    let pong = Envelope::new(msg_type::SERVER_PONG, json!(now_millis()));
    sender.send_text(pong.to_json());
}
