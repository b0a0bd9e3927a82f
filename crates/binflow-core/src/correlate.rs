//! Rotation events and time-window correlation
//!
//! The sorting device reports a physical rotation direction when it drops an
//! item into a bin. The direction implies the item's category, but the image
//! capture of that item arrives on a separate stream with no shared id. This
//! module keeps a bounded, time-ordered table of recent rotation events and
//! matches image timestamps against it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum number of rotation events retained in memory. When exceeded, the
/// entry with the oldest timestamp is evicted.
pub const MAX_ROTATION_EVENTS: usize = 100;

/// How far before the image receipt time a rotation event may lie and still
/// be considered related.
pub const WINDOW_BEFORE_MS: i64 = 10_000;

/// How far after the image receipt time a rotation event may lie. Covers the
/// case where the rotation signal arrives slightly later than the capture.
pub const WINDOW_AFTER_MS: i64 = 2_000;

/// Item category derived from the device's rotation direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Organic,
    Inorganic,
    Unknown,
}

impl Category {
    /// Map a raw telemetry data value to a category. Total and pure:
    /// `ROTATE_CW` means the drum turned toward the inorganic bin,
    /// `ROTATE_CCW` toward the organic bin, anything else carries no
    /// category information.
    pub fn from_rotation(data: &str) -> Option<Self> {
        match data {
            "ROTATE_CW" => Some(Self::Inorganic),
            "ROTATE_CCW" => Some(Self::Organic),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Organic => "organic",
            Self::Inorganic => "inorganic",
            Self::Unknown => "unknown",
        }
    }
}

impl Default for Category {
    fn default() -> Self {
        Self::Unknown
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounded, time-ordered table of recent rotation events.
///
/// Keys are receipt timestamps in epoch milliseconds. A colliding timestamp
/// overwrites the prior entry.
#[derive(Debug, Default)]
pub struct RotationTable {
    entries: BTreeMap<i64, Category>,
}

impl RotationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a rotation event, evicting the oldest entry when the table
    /// exceeds [`MAX_ROTATION_EVENTS`].
    pub fn insert(&mut self, timestamp: i64, category: Category) {
        self.entries.insert(timestamp, category);
        while self.entries.len() > MAX_ROTATION_EVENTS {
            if let Some((&oldest, _)) = self.entries.iter().next() {
                self.entries.remove(&oldest);
            }
        }
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        self.entries.contains_key(&timestamp)
    }

    /// Find the rotation event best matching an image received at
    /// `image_at`, searching the window `[image_at - 10s, image_at + 2s]`.
    ///
    /// Among in-window entries the one with the smallest distance to
    /// `image_at` wins; on a distance tie an entry at or before `image_at`
    /// beats one after it; on a further tie the most recent wins.
    pub fn find_near(&self, image_at: i64) -> Option<Category> {
        let min = image_at - WINDOW_BEFORE_MS;
        let max = image_at + WINDOW_AFTER_MS;

        let mut best: Option<(i64, Category)> = None;
        for (&t, &category) in self.entries.range(min..=max) {
            match best {
                None => best = Some((t, category)),
                Some((bt, _)) => {
                    if closer(t, bt, image_at) {
                        best = Some((t, category));
                    }
                }
            }
        }
        best.map(|(_, c)| c)
    }
}

/// True if candidate `a` is a better match than incumbent `b` for an image
/// received at `at`.
fn closer(a: i64, b: i64, at: i64) -> bool {
    let da = (a - at).abs();
    let db = (b - at).abs();
    if da != db {
        return da < db;
    }
    let a_before = a <= at;
    let b_before = b <= at;
    if a_before != b_before {
        return a_before;
    }
    a > b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_mapping_is_total() {
        assert_eq!(Category::from_rotation("ROTATE_CW"), Some(Category::Inorganic));
        assert_eq!(Category::from_rotation("ROTATE_CCW"), Some(Category::Organic));
        assert_eq!(Category::from_rotation("LID_OPEN"), None);
        assert_eq!(Category::from_rotation(""), None);
        // Re-applying yields the same result
        assert_eq!(Category::from_rotation("ROTATE_CW"), Some(Category::Inorganic));
    }

    #[test]
    fn table_evicts_oldest_beyond_cap() {
        let mut table = RotationTable::new();
        for t in 0..150 {
            table.insert(t, Category::Organic);
        }
        assert_eq!(table.len(), 100);
        for t in 0..50 {
            assert!(!table.contains(t), "timestamp {} should be evicted", t);
        }
        for t in 50..150 {
            assert!(table.contains(t));
        }
    }

    #[test]
    fn colliding_timestamp_overwrites() {
        let mut table = RotationTable::new();
        table.insert(1000, Category::Organic);
        table.insert(1000, Category::Inorganic);
        assert_eq!(table.len(), 1);
        assert_eq!(table.find_near(1000), Some(Category::Inorganic));
    }

    #[test]
    fn matches_within_ten_seconds_before() {
        let mut table = RotationTable::new();
        table.insert(1000, Category::Organic);
        assert_eq!(table.find_near(9000), Some(Category::Organic));
    }

    #[test]
    fn misses_outside_window() {
        let mut table = RotationTable::new();
        table.insert(1000, Category::Organic);
        // 11 seconds after the rotation: outside the 10s-before window
        assert_eq!(table.find_near(12_000), None);
    }

    #[test]
    fn matches_shortly_after_image() {
        let mut table = RotationTable::new();
        table.insert(5000, Category::Inorganic);
        // Rotation arrived 1.5s after the capture: inside the 2s-after window
        assert_eq!(table.find_near(3500), Some(Category::Inorganic));
        // 3s after is out
        assert_eq!(table.find_near(2000), None);
    }

    #[test]
    fn equidistant_tie_prefers_at_or_before() {
        let mut table = RotationTable::new();
        table.insert(995, Category::Inorganic);
        table.insert(1005, Category::Organic);
        assert_eq!(table.find_near(1000), Some(Category::Inorganic));
    }

    #[test]
    fn nearest_wins_over_earlier() {
        let mut table = RotationTable::new();
        table.insert(100, Category::Organic);
        table.insert(900, Category::Inorganic);
        assert_eq!(table.find_near(1000), Some(Category::Inorganic));
    }
}
