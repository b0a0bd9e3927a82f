//! Application state management

use binflow_core::message::msg_type;
use binflow_core::{Envelope, ImageCapture, TelemetrySnapshot};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::HubConfig;
use crate::registry::{SessionHandle, SessionRegistry};

/// Shared hub state: the session registry plus the latest-value cache.
pub struct AppState {
    /// Open sessions and topic subscriptions
    pub registry: SessionRegistry,
    /// Most recent telemetry payload, overwritten on every update
    telemetry: RwLock<Option<TelemetrySnapshot>>,
    /// Most recent image capture, overwritten on every update
    image: RwLock<Option<ImageCapture>>,
    /// Configuration
    pub config: HubConfig,
}

impl AppState {
    pub fn new(config: HubConfig) -> Arc<Self> {
        Arc::new(Self {
            registry: SessionRegistry::new(),
            telemetry: RwLock::new(None),
            image: RwLock::new(None),
            config,
        })
    }

    pub async fn update_telemetry(&self, snapshot: TelemetrySnapshot) {
        *self.telemetry.write().await = Some(snapshot);
    }

    pub async fn latest_telemetry(&self) -> Option<TelemetrySnapshot> {
        self.telemetry.read().await.clone()
    }

    pub async fn update_image(&self, capture: ImageCapture) {
        *self.image.write().await = Some(capture);
    }

    pub async fn latest_image(&self) -> Option<ImageCapture> {
        self.image.read().await.clone()
    }

    /// Deliver the cached telemetry snapshot to a newly registered session,
    /// so it does not have to wait for the next live update.
    pub async fn fast_sync(&self, handle: &SessionHandle) {
        if let Some(snapshot) = self.latest_telemetry().await {
            if let Ok(value) = serde_json::to_value(&snapshot) {
                let env = Envelope::new(msg_type::SERVER_DATA, value);
                handle.send_text(env.to_json());
                debug!(session = %handle.id, "Sent latest telemetry to new session");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn fast_sync_sends_exactly_one_data_message() {
        let state = AppState::new(HubConfig::default());
        state
            .update_telemetry(TelemetrySnapshot::new(
                serde_json::json!({"data": "ROTATE_CW"}),
                1234,
            ))
            .await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = SessionHandle::new("test", tx);
        state.registry.register(handle.clone()).await;
        state.fast_sync(&handle).await;

        let msg = rx.try_recv().expect("expected one fast-sync message");
        if let axum::extract::ws::Message::Text(text) = msg {
            let env = Envelope::parse(text.as_str()).unwrap();
            assert_eq!(env.kind, msg_type::SERVER_DATA);
        } else {
            panic!("expected a text frame");
        }
        assert!(rx.try_recv().is_err(), "no other traffic before live updates");
    }

    #[tokio::test]
    async fn fast_sync_without_cache_sends_nothing() {
        let state = AppState::new(HubConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = SessionHandle::new("test", tx);
        state.fast_sync(&handle).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn latest_value_is_overwritten() {
        let state = AppState::new(HubConfig::default());
        state
            .update_telemetry(TelemetrySnapshot::new(serde_json::json!("a"), 1))
            .await;
        state
            .update_telemetry(TelemetrySnapshot::new(serde_json::json!("b"), 2))
            .await;
        let latest = state.latest_telemetry().await.unwrap();
        assert_eq!(latest.received_at, 2);
    }
}
