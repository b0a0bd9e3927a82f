//! REST read surface for dashboards

use axum::{extract::State, response::IntoResponse, Json};
use binflow_core::now_millis;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::state::AppState;

/// Health summary: connection count plus cache occupancy.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = json!({
        "status": "ok",
        "activeConnections": state.registry.session_count().await,
        "hasLatestData": state.latest_telemetry().await.is_some(),
        "hasLatestImage": state.latest_image().await.is_some(),
    });
    Json(body)
}

/// Latest cached values. The image body is elided; clients that need pixels
/// subscribe to the image topic instead.
pub async fn live(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let telemetry = state
        .latest_telemetry()
        .await
        .and_then(|s| serde_json::to_value(&s).ok())
        .unwrap_or(Value::Null);
    let image = state
        .latest_image()
        .await
        .map(|c| c.summary())
        .unwrap_or(Value::Null);

    let body = json!({
        "latestEsp32Data": telemetry,
        "latestEsp32Image": image,
        "activeConnections": state.registry.session_count().await,
        "timestamp": now_millis(),
    });
    Json(body)
}
