//! Binflow Ingest - Hub subscriber and correlation engine
//!
//! Maintains the upstream websocket connection to the hub, reconciles the
//! asynchronously-arriving rotation and image-capture streams into enriched
//! event records, and hands them to the persistence gateway.

pub mod config;
pub mod engine;
pub mod store;
pub mod upstream;

pub use engine::CorrelationEngine;
pub use store::{EnrichedEvent, EventKind, EventStore, MemoryStore};
pub use upstream::UpstreamManager;
