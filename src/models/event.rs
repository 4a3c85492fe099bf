//! Persisted event and window lock data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::block::{BlockKind, Category, Source};

/// Metadata stored alongside every persisted event, serialized to a JSON
/// text column. Unknown fields are tolerated at deserialization so older
/// rows keep loading after schema additions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    pub source: Source,
    #[serde(flatten)]
    pub kind: BlockKind,
    pub category: Category,
    pub confidence: f64,
    /// Stable key matching persisted events against freshly derived ones.
    pub source_id: Option<String>,
    /// App/activity key used for trailing-edge extension matching.
    pub app_key: Option<String>,
}

impl EventMeta {
    /// Evidence conflicts live on the planned-actual kind variant; every
    /// other kind has none.
    pub fn conflicts(&self) -> &[String] {
        match &self.kind {
            BlockKind::PlannedActual { conflicts } => conflicts,
            _ => &[],
        }
    }
}

impl Default for EventMeta {
    fn default() -> Self {
        Self {
            source: Source::System,
            kind: BlockKind::UnknownGap,
            category: Category::Unknown,
            confidence: 0.0,
            source_id: None,
            app_key: None,
        }
    }
}

/// An event row as persisted by a prior pipeline run or the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationEvent {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub meta: EventMeta,
    pub locked_at: Option<DateTime<Utc>>,
}

impl ReconciliationEvent {
    pub fn is_locked(&self) -> bool {
        self.locked_at.is_some()
    }

    /// Locked or user-owned rows cannot be updated, deleted, or overlapped
    /// by new inserts.
    pub fn is_protected(&self) -> bool {
        self.is_locked() || self.meta.source.is_user_owned()
    }
}

/// A freshly derived candidate event. Never persisted directly; only its
/// effect (insert/update/extend) is.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedEvent {
    /// Stable key, also used as the row id on insert so re-derivation
    /// upserts instead of duplicating.
    pub source_id: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub meta: EventMeta,
}

/// Per-window reconciliation counts, stored on the window lock row.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WindowStats {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
    pub extended: u64,
    pub skipped_locked: u64,
}

impl WindowStats {
    pub fn absorb(&mut self, other: WindowStats) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.extended += other.extended;
        self.skipped_locked += other.skipped_locked;
    }
}

/// Marker recording that a 30-minute wall-clock window has been fully
/// reconciled for a user. Consulted before reprocessing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowLock {
    pub id: String,
    pub user_id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
    pub stats: WindowStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planned_actual_meta_round_trips_through_json() {
        let meta = EventMeta {
            source: Source::Derived,
            kind: BlockKind::PlannedActual {
                conflicts: vec!["location shows Equinox Gym".to_string()],
            },
            category: Category::Work,
            confidence: 0.8,
            source_id: Some("planned_actual-540-600-derived".to_string()),
            app_key: None,
        };

        let json = serde_json::to_string(&meta).unwrap();
        let back: EventMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
        assert_eq!(back.conflicts(), meta.conflicts());
    }

    #[test]
    fn non_planned_kinds_have_no_conflicts() {
        let meta = EventMeta::default();
        assert!(meta.conflicts().is_empty());
    }
}
