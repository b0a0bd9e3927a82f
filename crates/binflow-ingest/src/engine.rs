//! Correlation engine
//!
//! Device telemetry arrives as two logically related but independently
//! delivered signals: a rotation direction (which implies the category of
//! the item being sorted) and, separately, an image capture of that item.
//! There is no shared correlation id, so the engine attaches categories to
//! images by timestamp proximity: it keeps a bounded table of recent
//! rotation events and matches each accepted image against it within a
//! sliding window, falling back to the latest known category.

use binflow_core::message::msg_type;
use binflow_core::{now_millis, Category, ImageCapture, RotationTable};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::store::{
    ClassificationRecord, DeviceInfoFields, EnrichedEvent, EventKind, EventStore,
};

/// Status tag marking classification records derived from rotation signals
/// rather than a model inference.
const ROTATION_STATUS: &str = "ws";

#[derive(Default)]
struct LastImage {
    filename: Option<String>,
    received_at: i64,
}

/// Engine state: the rotation table, the latest known category, and the
/// last-seen image identity used for repeat-delivery detection. Constructed
/// once at process start; resets empty on restart.
pub struct CorrelationEngine {
    store: Arc<dyn EventStore>,
    rotations: Mutex<RotationTable>,
    current: Mutex<Category>,
    last_image: Mutex<LastImage>,
}

impl CorrelationEngine {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            rotations: Mutex::new(RotationTable::new()),
            current: Mutex::new(Category::Unknown),
            last_image: Mutex::new(LastImage::default()),
        }
    }

    /// Latest known category, seeded `unknown`.
    pub async fn current_category(&self) -> Category {
        *self.current.lock().await
    }

    /// Handle one inbound text frame from the hub. Frames are either typed
    /// `{ type, payload }` envelopes or bare snapshot objects carrying
    /// `latestEsp32Data` / `latestEsp32Image`.
    pub async fn handle_frame(&self, text: &str) {
        let root: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "Ignoring unparsable upstream frame");
                return;
            }
        };

        match root.get("type").and_then(Value::as_str) {
            Some(msg_type::SERVER_DATA) => {
                let payload = root.get("payload").cloned().unwrap_or(Value::Null);
                self.handle_server_data(&payload).await;
            }
            Some(msg_type::SERVER_IMAGE) => {
                let payload = root.get("payload").cloned().unwrap_or(Value::Null);
                self.handle_server_image(&payload).await;
            }
            Some(other) => {
                debug!(kind = %other, "Unhandled upstream message type");
            }
            None => {
                if root.get("latestEsp32Data").is_some() || root.get("latestEsp32Image").is_some() {
                    self.handle_snapshot(&root).await;
                } else {
                    debug!("Unhandled upstream message without type");
                }
            }
        }
    }

    /// A `server:data` envelope: resolve any rotation signal, then run the
    /// plain-telemetry upsert paths and log a `DATA` event.
    async fn handle_server_data(&self, payload: &Value) {
        let data_node = payload.get("data").unwrap_or(payload);
        let received_at = payload
            .get("receivedAt")
            .and_then(Value::as_i64)
            .unwrap_or_else(now_millis);

        let category = rotation_value(data_node).and_then(Category::from_rotation);
        if let Some(category) = category {
            self.record_rotation(category, received_at).await;
        }

        self.process_plain_telemetry(data_node, received_at).await;

        let logged = match category {
            Some(c) => c,
            None => self.current_category().await,
        };
        self.log_event(EventKind::Data, logged, received_at, None).await;
    }

    /// A `server:image` envelope: dedup, persist, correlate, log.
    async fn handle_server_image(&self, payload: &Value) {
        self.process_image(payload, None).await;
    }

    /// A bare snapshot carrying the hub's latest data and/or image. When the
    /// same snapshot resolves a rotation category, that category takes
    /// absolute priority for the co-arrived image over the table lookup.
    async fn handle_snapshot(&self, root: &Value) {
        let mut co_arrived: Option<Category> = None;

        if let Some(data_node) = root.get("latestEsp32Data") {
            let value = data_node.get("data").and_then(Value::as_str);
            if let Some(category) = value.and_then(Category::from_rotation) {
                let received_at = data_node
                    .get("receivedAt")
                    .and_then(Value::as_i64)
                    .unwrap_or_else(now_millis);
                co_arrived = Some(category);
                self.record_rotation(category, received_at).await;
                self.process_plain_telemetry(data_node, received_at).await;
                self.log_event(EventKind::Data, category, received_at, None).await;
            }
        }

        if let Some(image_node) = root.get("latestEsp32Image") {
            self.process_image(image_node, co_arrived).await;
        }

        debug!("Live snapshot processed");
    }

    /// Update the latest known category, insert into the rotation table, and
    /// persist a socket-derived classification record.
    async fn record_rotation(&self, category: Category, received_at: i64) {
        *self.current.lock().await = category;
        self.rotations.lock().await.insert(received_at, category);

        let record = ClassificationRecord {
            timestamp: received_at,
            label: category.as_str().to_string(),
            confidence: 0.0,
            status: ROTATION_STATUS.to_string(),
        };
        if let Err(e) = self.store.save_classification(record).await {
            warn!(error = %e, "Failed to persist rotation classification");
        }
    }

    /// Dedup, persist, and correlate one image node.
    async fn process_image(&self, image_node: &Value, co_arrived: Option<Category>) {
        let filename = image_node.get("filename").and_then(Value::as_str);
        let received_at = image_node.get("receivedAt").and_then(Value::as_i64);

        if !self.accept_image(filename, received_at).await {
            debug!(filename = ?filename, "Discarding repeat image delivery");
            return;
        }

        self.persist_image(image_node).await;

        {
            let mut last = self.last_image.lock().await;
            if let Some(at) = received_at {
                last.received_at = at;
            }
            if let Some(f) = filename {
                last.filename = Some(f.to_string());
            }
        }

        let received_at = received_at.unwrap_or_else(now_millis);
        let category = match co_arrived {
            Some(c) => c,
            None => self.category_for_image(received_at).await,
        };
        self.log_event(
            EventKind::Image,
            category,
            received_at,
            filename.map(str::to_string),
        )
        .await;
    }

    /// An image is new if its filename differs from the last one seen, or
    /// its timestamp is strictly greater. Anything else is a repeat
    /// delivery of the same capture.
    async fn accept_image(&self, filename: Option<&str>, received_at: Option<i64>) -> bool {
        let last = self.last_image.lock().await;
        match (filename, received_at) {
            (Some(f), Some(at)) => last.filename.as_deref() != Some(f) || at > last.received_at,
            (None, Some(at)) => at > last.received_at,
            _ => false,
        }
    }

    /// Category resolution for an image at `received_at`: the rotation table
    /// within the window, else the latest known category.
    async fn category_for_image(&self, received_at: i64) -> Category {
        match self.rotations.lock().await.find_near(received_at) {
            Some(category) => category,
            None => self.current_category().await,
        }
    }

    async fn persist_image(&self, image_node: &Value) {
        let capture = ImageCapture {
            filename: text(image_node, "filename").unwrap_or_default(),
            content_type: text(image_node, "contentType").unwrap_or_default(),
            data: text(image_node, "data").unwrap_or_default(),
            size: image_node
                .get("size")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize,
            received_at: image_node
                .get("receivedAt")
                .and_then(Value::as_i64)
                .unwrap_or_else(now_millis),
        };
        if let Err(e) = self.store.save_image(capture).await {
            warn!(error = %e, "Failed to persist image capture");
        }
    }

    /// Bin levels, embedded classification payloads, and device-info fields
    /// are plain upserts with no part in the correlation algorithm.
    async fn process_plain_telemetry(&self, data_node: &Value, received_at: i64) {
        let organic = data_node.get("organicLevel").and_then(Value::as_f64);
        let inorganic = data_node.get("inorganicLevel").and_then(Value::as_f64);
        if organic.is_some() || inorganic.is_some() {
            if let Err(e) = self
                .store
                .save_bin_levels(organic, inorganic, received_at)
                .await
            {
                warn!(error = %e, "Failed to persist bin levels");
            }
        }

        if let Some(classification) = data_node.get("classification") {
            if let Some(label) = text(classification, "type").filter(|t| !t.is_empty()) {
                let record = ClassificationRecord {
                    timestamp: received_at,
                    label: normalize_label(&label),
                    confidence: classification
                        .get("confidence")
                        .and_then(Value::as_f64)
                        .unwrap_or(0.0),
                    status: text(classification, "status")
                        .filter(|s| !s.is_empty())
                        .unwrap_or_else(|| "success".to_string()),
                };
                if let Err(e) = self.store.save_classification(record).await {
                    warn!(error = %e, "Failed to persist classification payload");
                }
            }
        }

        if let Some(device) = data_node.get("device") {
            let fields = DeviceInfoFields {
                model: text(device, "model"),
                firmware: text(device, "firmware"),
                ip_address: text(device, "ipAddress"),
                uptime: text(device, "uptime"),
            };
            if !fields.is_empty() {
                if let Err(e) = self.store.save_device_info(fields).await {
                    warn!(error = %e, "Failed to persist device info");
                }
            }
        }
    }

    /// Append an enriched event. `IMAGE` events with a known filename and
    /// timestamp are checked against already-persisted events first so a
    /// repeat delivery never produces a second record.
    async fn log_event(
        &self,
        kind: EventKind,
        category: Category,
        received_at: i64,
        filename: Option<String>,
    ) {
        if kind == EventKind::Image {
            if let Some(f) = filename.as_deref() {
                match self.store.has_image_event(f, received_at).await {
                    Ok(true) => {
                        debug!(filename = %f, received_at, "Skipping duplicate IMAGE event");
                        return;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(error = %e, "Duplicate check failed, logging event anyway");
                    }
                }
            }
        }

        let event = EnrichedEvent {
            kind,
            category,
            received_at,
            filename,
        };
        if let Err(e) = self.store.save_event(event).await {
            warn!(error = %e, "Failed to persist enriched event");
        }
    }
}

fn text(node: &Value, field: &str) -> Option<String> {
    node.get(field).and_then(Value::as_str).map(str::to_string)
}

/// The telemetry `data` field is either a bare string or an object with a
/// nested `data` string.
fn rotation_value(data_node: &Value) -> Option<&str> {
    match data_node {
        Value::String(s) => Some(s.as_str()),
        _ => data_node.get("data").and_then(Value::as_str),
    }
}

/// Collapse classifier label aliases onto the two bin categories.
fn normalize_label(raw: &str) -> String {
    if raw.eq_ignore_ascii_case("organic") {
        "organic".to_string()
    } else if raw.eq_ignore_ascii_case("inorganic") || raw.eq_ignore_ascii_case("recyclable") {
        "inorganic".to_string()
    } else {
        raw.to_string()
    }
}
