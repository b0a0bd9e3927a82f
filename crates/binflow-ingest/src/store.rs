//! Event persistence gateway
//!
//! The correlation engine only needs a narrow save/lookup surface; the store
//! behind it is an external collaborator. All operations are safe to call
//! concurrently, and callers treat a failed save as "this side-effect did
//! not happen" rather than an abort.

use anyhow::Result;
use async_trait::async_trait;
use binflow_core::{Category, ImageCapture};
use tokio::sync::Mutex;
use tracing::warn;

/// Kind of an enriched event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Image,
    Data,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "IMAGE",
            Self::Data => "DATA",
        }
    }
}

/// A persisted record pairing an event with its resolved category.
/// Immutable once created.
#[derive(Debug, Clone)]
pub struct EnrichedEvent {
    pub kind: EventKind,
    pub category: Category,
    pub received_at: i64,
    pub filename: Option<String>,
}

/// Append-only classification record.
#[derive(Debug, Clone)]
pub struct ClassificationRecord {
    pub timestamp: i64,
    pub label: String,
    pub confidence: f64,
    pub status: String,
}

/// Device self-description fields, merged into a single current record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceInfoFields {
    pub model: Option<String>,
    pub firmware: Option<String>,
    pub ip_address: Option<String>,
    pub uptime: Option<String>,
}

impl DeviceInfoFields {
    pub fn is_empty(&self) -> bool {
        self.model.is_none()
            && self.firmware.is_none()
            && self.ip_address.is_none()
            && self.uptime.is_none()
    }
}

/// Current fill levels of the two bins, merged field-wise.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BinLevels {
    pub organic: Option<f64>,
    pub inorganic: Option<f64>,
    pub updated_at: i64,
}

/// Persistence gateway consumed by the correlation engine.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Merge non-null bin levels into the single current record.
    async fn save_bin_levels(
        &self,
        organic: Option<f64>,
        inorganic: Option<f64>,
        updated_at: i64,
    ) -> Result<()>;

    /// Append a classification record.
    async fn save_classification(&self, record: ClassificationRecord) -> Result<()>;

    /// Merge non-null fields into the single current device-info record.
    async fn save_device_info(&self, fields: DeviceInfoFields) -> Result<()>;

    /// Append an image capture. Implementations reject (no-op with a logged
    /// warning) captures with an empty filename, content type, or data.
    async fn save_image(&self, capture: ImageCapture) -> Result<()>;

    /// Append an enriched event record.
    async fn save_event(&self, event: EnrichedEvent) -> Result<()>;

    /// Whether an `IMAGE` event with this exact (filename, received_at)
    /// pair already exists. Used for idempotent event logging.
    async fn has_image_event(&self, filename: &str, received_at: i64) -> Result<bool>;

    /// Runtime override for the upstream websocket URL, if one is stored.
    async fn websocket_url(&self) -> Result<Option<String>>;

    /// Most recent enriched events, newest first. Read accessor for the
    /// dashboard layer.
    async fn recent_events(&self, limit: usize) -> Result<Vec<EnrichedEvent>>;
}

#[derive(Default)]
struct MemoryInner {
    bin: BinLevels,
    classifications: Vec<ClassificationRecord>,
    device: DeviceInfoFields,
    images: Vec<ImageCapture>,
    events: Vec<EnrichedEvent>,
    websocket_url: Option<String>,
}

/// In-memory reference implementation of the gateway.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a runtime websocket URL override.
    pub async fn set_websocket_url(&self, url: impl Into<String>) {
        self.inner.lock().await.websocket_url = Some(url.into());
    }

    pub async fn bin_levels(&self) -> BinLevels {
        self.inner.lock().await.bin
    }

    pub async fn classifications(&self) -> Vec<ClassificationRecord> {
        self.inner.lock().await.classifications.clone()
    }

    pub async fn device_info(&self) -> DeviceInfoFields {
        self.inner.lock().await.device.clone()
    }

    pub async fn images(&self) -> Vec<ImageCapture> {
        self.inner.lock().await.images.clone()
    }

    pub async fn events(&self) -> Vec<EnrichedEvent> {
        self.inner.lock().await.events.clone()
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn save_bin_levels(
        &self,
        organic: Option<f64>,
        inorganic: Option<f64>,
        updated_at: i64,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(level) = organic {
            inner.bin.organic = Some(level);
        }
        if let Some(level) = inorganic {
            inner.bin.inorganic = Some(level);
        }
        inner.bin.updated_at = updated_at;
        Ok(())
    }

    async fn save_classification(&self, record: ClassificationRecord) -> Result<()> {
        self.inner.lock().await.classifications.push(record);
        Ok(())
    }

    async fn save_device_info(&self, fields: DeviceInfoFields) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if fields.model.is_some() {
            inner.device.model = fields.model;
        }
        if fields.firmware.is_some() {
            inner.device.firmware = fields.firmware;
        }
        if fields.ip_address.is_some() {
            inner.device.ip_address = fields.ip_address;
        }
        if fields.uptime.is_some() {
            inner.device.uptime = fields.uptime;
        }
        Ok(())
    }

    async fn save_image(&self, capture: ImageCapture) -> Result<()> {
        if capture.filename.is_empty() || capture.content_type.is_empty() || capture.data.is_empty()
        {
            warn!("Skipping image persistence due to missing filename/contentType/data");
            return Ok(());
        }
        self.inner.lock().await.images.push(capture);
        Ok(())
    }

    async fn save_event(&self, event: EnrichedEvent) -> Result<()> {
        self.inner.lock().await.events.push(event);
        Ok(())
    }

    async fn has_image_event(&self, filename: &str, received_at: i64) -> Result<bool> {
        let inner = self.inner.lock().await;
        Ok(inner.events.iter().any(|e| {
            e.kind == EventKind::Image
                && e.received_at == received_at
                && e.filename.as_deref() == Some(filename)
        }))
    }

    async fn websocket_url(&self) -> Result<Option<String>> {
        Ok(self.inner.lock().await.websocket_url.clone())
    }

    async fn recent_events(&self, limit: usize) -> Result<Vec<EnrichedEvent>> {
        let inner = self.inner.lock().await;
        Ok(inner.events.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_image_rejects_empty_fields() {
        let store = MemoryStore::new();
        store
            .save_image(ImageCapture {
                filename: String::new(),
                content_type: "image/jpeg".into(),
                data: "aGk=".into(),
                size: 2,
                received_at: 1,
            })
            .await
            .unwrap();
        assert!(store.images().await.is_empty());
    }

    #[tokio::test]
    async fn bin_levels_merge_field_wise() {
        let store = MemoryStore::new();
        store.save_bin_levels(Some(40.0), None, 1).await.unwrap();
        store.save_bin_levels(None, Some(55.0), 2).await.unwrap();
        let bin = store.bin_levels().await;
        assert_eq!(bin.organic, Some(40.0));
        assert_eq!(bin.inorganic, Some(55.0));
        assert_eq!(bin.updated_at, 2);
    }

    #[tokio::test]
    async fn device_info_merges_without_clearing() {
        let store = MemoryStore::new();
        store
            .save_device_info(DeviceInfoFields {
                model: Some("ESP32-CAM".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .save_device_info(DeviceInfoFields {
                firmware: Some("1.2.0".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let device = store.device_info().await;
        assert_eq!(device.model.as_deref(), Some("ESP32-CAM"));
        assert_eq!(device.firmware.as_deref(), Some("1.2.0"));
    }

    #[tokio::test]
    async fn has_image_event_matches_exact_pair() {
        let store = MemoryStore::new();
        store
            .save_event(EnrichedEvent {
                kind: EventKind::Image,
                category: Category::Organic,
                received_at: 9000,
                filename: Some("cap.jpg".into()),
            })
            .await
            .unwrap();
        assert!(store.has_image_event("cap.jpg", 9000).await.unwrap());
        assert!(!store.has_image_event("cap.jpg", 9001).await.unwrap());
        assert!(!store.has_image_event("other.jpg", 9000).await.unwrap());
    }

    #[tokio::test]
    async fn recent_events_returns_newest_first() {
        let store = MemoryStore::new();
        for t in 0..5 {
            store
                .save_event(EnrichedEvent {
                    kind: EventKind::Data,
                    category: Category::Unknown,
                    received_at: t,
                    filename: None,
                })
                .await
                .unwrap();
        }
        let recent = store.recent_events(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].received_at, 4);
        assert_eq!(recent[1].received_at, 3);
    }
}
