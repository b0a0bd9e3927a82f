//! Upstream connection manager
//!
//! Owns the single outbound websocket connection to the hub. The lifecycle
//! is a small state machine: Disconnected -> Connecting -> Connected, back
//! to Disconnected on close or error, then Connecting again after a fixed
//! delay. At most one connection attempt is ever in flight, and shutdown
//! cancels the pending reconnect sleep.

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::engine::CorrelationEngine;
use crate::store::EventStore;

/// Fixed delay between reconnection attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub struct UpstreamManager {
    engine: Arc<CorrelationEngine>,
    store: Arc<dyn EventStore>,
    /// Fallback URL when no runtime override is stored.
    default_url: String,
    /// Guard: at most one connection attempt in flight.
    connecting: AtomicBool,
}

impl UpstreamManager {
    pub fn new(
        engine: Arc<CorrelationEngine>,
        store: Arc<dyn EventStore>,
        default_url: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            store,
            default_url: default_url.into(),
            connecting: AtomicBool::new(false),
        }
    }

    /// Claim the connecting slot. Returns false if an attempt is already in
    /// flight, in which case the caller must not start another.
    pub fn begin_connect(&self) -> bool {
        !self.connecting.swap(true, Ordering::SeqCst)
    }

    pub fn finish_connect(&self) {
        self.connecting.store(false, Ordering::SeqCst);
    }

    /// The target URL is resolved on every attempt: a stored non-empty
    /// runtime override wins, else the configured default.
    pub async fn resolve_url(&self) -> String {
        match self.store.websocket_url().await {
            Ok(Some(url)) if !url.is_empty() => url,
            Ok(_) => self.default_url.clone(),
            Err(e) => {
                warn!(error = %e, "Failed to read stored websocket URL, using default");
                self.default_url.clone()
            }
        }
    }

    /// Drive the connection until shutdown. Never returns an error: every
    /// connectivity failure is absorbed by the reconnect machine.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        loop {
            if !self.begin_connect() {
                // Another attempt is in flight; this run loop is the only
                // driver, so this only happens on misuse
                debug!("Connect requested while already connecting, ignoring");
                return;
            }

            let url = self.resolve_url().await;
            info!(url = %url, "Connecting to hub");

            match connect_async(url.as_str()).await {
                Ok((ws_stream, _)) => {
                    self.finish_connect();
                    info!("Connected to hub");

                    let (mut write, mut read) = ws_stream.split();
                    loop {
                        tokio::select! {
                            _ = shutdown.recv() => {
                                info!("Upstream shutting down");
                                if let Err(e) = write.close().await {
                                    warn!(error = %e, "Failed to close upstream session");
                                }
                                return;
                            }
                            msg = read.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    self.engine.handle_frame(&text).await;
                                }
                                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                                Some(Ok(Message::Close(frame))) => {
                                    info!(frame = ?frame, "Hub closed the connection");
                                    break;
                                }
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    warn!(error = %e, "Upstream connection error");
                                    break;
                                }
                                None => {
                                    info!("Upstream stream ended");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    self.finish_connect();
                    warn!(
                        error = %e,
                        delay_secs = RECONNECT_DELAY.as_secs(),
                        "Failed to connect to hub, retrying"
                    );
                }
            }

            // Exactly one reconnect attempt per disconnect, after a fixed
            // delay; shutdown cancels the pending timer
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutdown during reconnect delay, stopping");
                    return;
                }
                _ = sleep(RECONNECT_DELAY) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn manager(store: Arc<MemoryStore>) -> UpstreamManager {
        let engine = Arc::new(CorrelationEngine::new(store.clone()));
        UpstreamManager::new(engine, store, "ws://localhost:4000/ws")
    }

    #[tokio::test]
    async fn second_connect_request_is_a_noop_while_connecting() {
        let manager = manager(Arc::new(MemoryStore::new()));
        assert!(manager.begin_connect());
        assert!(!manager.begin_connect());
        manager.finish_connect();
        assert!(manager.begin_connect());
    }

    #[tokio::test]
    async fn url_resolution_prefers_stored_override() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager(store.clone());
        assert_eq!(manager.resolve_url().await, "ws://localhost:4000/ws");

        store.set_websocket_url("ws://hub.local:4000/ws").await;
        assert_eq!(manager.resolve_url().await, "ws://hub.local:4000/ws");
    }

    #[tokio::test]
    async fn empty_stored_url_falls_back_to_default() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager(store.clone());
        store.set_websocket_url("").await;
        assert_eq!(manager.resolve_url().await, "ws://localhost:4000/ws");
    }
}
