//! Session registry and topic broker
//!
//! Tracks open downstream websocket sessions and, per topic, the subset
//! subscribed to it. Delivery is fire-and-forget per session: each session
//! owns an unbounded outbound channel drained by its writer task, so one
//! slow client never stalls fan-out to the rest.

use axum::extract::ws::Message;
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// Unique identifier for one open session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to one open session's outbound channel.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    /// Remote endpoint, diagnostic only.
    pub remote: String,
    tx: mpsc::UnboundedSender<Message>,
}

impl SessionHandle {
    pub fn new(remote: impl Into<String>, tx: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            id: SessionId::new(),
            remote: remote.into(),
            tx,
        }
    }

    /// Queue a message for this session. Returns false if the session's
    /// writer has gone away (the connection is closed or closing).
    pub fn send(&self, msg: Message) -> bool {
        self.tx.send(msg).is_ok()
    }

    /// Queue a JSON text frame.
    pub fn send_text(&self, json: String) -> bool {
        self.send(Message::Text(json.into()))
    }
}

/// Delivery counts from one fan-out call, for observability only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub sent: usize,
    pub failed: usize,
}

/// Registry of open sessions and their topic subscriptions.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
    topics: RwLock<HashMap<String, HashSet<SessionId>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session to the global set.
    pub async fn register(&self, handle: SessionHandle) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(handle.id.clone(), handle);
        debug!(total = sessions.len(), "Session registered");
    }

    /// Remove a session from the global set and from every topic it was
    /// subscribed to. No-op if already removed.
    pub async fn unregister(&self, id: &SessionId) {
        self.sessions.write().await.remove(id);
        let mut topics = self.topics.write().await;
        topics.retain(|_, subscribers| {
            subscribers.remove(id);
            !subscribers.is_empty()
        });
    }

    /// Idempotent topic subscription.
    pub async fn subscribe(&self, id: &SessionId, topic: &str) {
        let mut topics = self.topics.write().await;
        topics
            .entry(topic.to_string())
            .or_default()
            .insert(id.clone());
    }

    /// Idempotent topic unsubscription; prunes empty subscriber sets.
    pub async fn unsubscribe(&self, id: &SessionId, topic: &str) {
        let mut topics = self.topics.write().await;
        if let Some(subscribers) = topics.get_mut(topic) {
            subscribers.remove(id);
            if subscribers.is_empty() {
                topics.remove(topic);
            }
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_subscribed(&self, id: &SessionId, topic: &str) -> bool {
        self.topics
            .read()
            .await
            .get(topic)
            .is_some_and(|s| s.contains(id))
    }

    /// Deliver a text frame to every session subscribed to `topic`, other
    /// than `exclude`. Per-session failures are counted and logged, never
    /// propagated.
    pub async fn publish_to_topic(
        &self,
        topic: &str,
        text: &str,
        exclude: Option<&SessionId>,
    ) -> DeliveryReport {
        let targets: Vec<SessionHandle> = {
            let topics = self.topics.read().await;
            let Some(subscribers) = topics.get(topic) else {
                debug!(topic = %topic, "No subscribers for topic");
                return DeliveryReport::default();
            };
            let sessions = self.sessions.read().await;
            subscribers
                .iter()
                .filter(|id| Some(*id) != exclude)
                .filter_map(|id| sessions.get(id).cloned())
                .collect()
        };

        let report = deliver(&targets, text);
        debug!(topic = %topic, sent = report.sent, failed = report.failed, "Topic fan-out");
        report
    }

    /// Deliver a text frame to every open session other than `exclude`.
    pub async fn broadcast_all(&self, text: &str, exclude: Option<&SessionId>) -> DeliveryReport {
        let targets: Vec<SessionHandle> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter(|h| Some(&h.id) != exclude)
                .cloned()
                .collect()
        };

        let report = deliver(&targets, text);
        debug!(sent = report.sent, failed = report.failed, "Broadcast completed");
        report
    }
}

fn deliver(targets: &[SessionHandle], text: &str) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    for handle in targets {
        if handle.send_text(text.to_string()) {
            report.sent += 1;
        } else {
            report.failed += 1;
            warn!(session = %handle.id, "Failed to deliver to session");
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_session() -> (SessionHandle, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SessionHandle::new("test", tx), rx)
    }

    /// A session whose writer has already gone away.
    fn closed_session() -> SessionHandle {
        let (handle, rx) = open_session();
        drop(rx);
        handle
    }

    #[tokio::test]
    async fn unregister_removes_from_all_topics() {
        let registry = SessionRegistry::new();
        let (handle, _rx) = open_session();
        let id = handle.id.clone();
        registry.register(handle).await;
        registry.subscribe(&id, "image").await;
        registry.subscribe(&id, "command").await;

        registry.unregister(&id).await;

        assert!(!registry.is_subscribed(&id, "image").await);
        assert!(!registry.is_subscribed(&id, "command").await);
        assert_eq!(registry.session_count().await, 0);
        // Idempotent
        registry.unregister(&id).await;
    }

    #[tokio::test]
    async fn subscribe_is_idempotent() {
        let registry = SessionRegistry::new();
        let (handle, mut rx) = open_session();
        let id = handle.id.clone();
        registry.register(handle).await;
        registry.subscribe(&id, "image").await;
        registry.subscribe(&id, "image").await;

        let report = registry.publish_to_topic("image", "hello", None).await;
        assert_eq!(report, DeliveryReport { sent: 1, failed: 0 });
        assert!(rx.recv().await.is_some());
        // No duplicate delivery from the double subscribe
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_excludes_sender() {
        let registry = SessionRegistry::new();
        let (sender, mut sender_rx) = open_session();
        let (other, mut other_rx) = open_session();
        let sender_id = sender.id.clone();
        let other_id = other.id.clone();
        registry.register(sender).await;
        registry.register(other).await;
        registry.subscribe(&sender_id, "image").await;
        registry.subscribe(&other_id, "image").await;

        let report = registry
            .publish_to_topic("image", "frame", Some(&sender_id))
            .await;
        assert_eq!(report, DeliveryReport { sent: 1, failed: 0 });
        assert!(other_rx.recv().await.is_some());
        assert!(sender_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_tolerates_failed_sessions() {
        let registry = SessionRegistry::new();
        let mut receivers = Vec::new();
        for _ in 0..4 {
            let (handle, rx) = open_session();
            receivers.push(rx);
            registry.register(handle).await;
        }
        registry.register(closed_session()).await;

        let report = registry.broadcast_all("update", None).await;
        assert_eq!(report, DeliveryReport { sent: 4, failed: 1 });
        for rx in &mut receivers {
            assert!(rx.recv().await.is_some());
        }
    }

    #[tokio::test]
    async fn topic_publish_counts_failures_per_session() {
        let registry = SessionRegistry::new();
        let (ok, mut ok_rx) = open_session();
        let bad = closed_session();
        let ok_id = ok.id.clone();
        let bad_id = bad.id.clone();
        registry.register(ok).await;
        registry.register(bad).await;
        registry.subscribe(&ok_id, "image").await;
        registry.subscribe(&bad_id, "image").await;

        let report = registry.publish_to_topic("image", "frame", None).await;
        assert_eq!(report, DeliveryReport { sent: 1, failed: 1 });
        assert!(ok_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn publish_to_empty_topic_is_a_noop() {
        let registry = SessionRegistry::new();
        let report = registry.publish_to_topic("nobody", "msg", None).await;
        assert_eq!(report, DeliveryReport::default());
    }
}
