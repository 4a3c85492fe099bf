//! Time block data model.
//!
//! A `TimeBlock` is one entry in a day's timeline, expressed in minutes
//! since local midnight. The final timeline for a day covers [0, 1440)
//! with no gaps and no overlaps.

use serde::{Deserialize, Serialize};

pub const DAY_MINUTES: i64 = 1440;

/// Closed set of activity categories.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Routine,
    Work,
    Meal,
    Meeting,
    Health,
    Family,
    Social,
    Travel,
    Finance,
    Comm,
    Digital,
    Sleep,
    Unknown,
    Free,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Routine => "routine",
            Category::Work => "work",
            Category::Meal => "meal",
            Category::Meeting => "meeting",
            Category::Health => "health",
            Category::Family => "family",
            Category::Social => "social",
            Category::Travel => "travel",
            Category::Finance => "finance",
            Category::Comm => "comm",
            Category::Digital => "digital",
            Category::Sleep => "sleep",
            Category::Unknown => "unknown",
            Category::Free => "free",
        }
    }
}

/// Who produced a block or event. `User` and `ActualAdjust` mark
/// user-owned rows that the pipeline must never mutate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    User,
    System,
    Evidence,
    Derived,
    UserInput,
    ActualAdjust,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::User => "user",
            Source::System => "system",
            Source::Evidence => "evidence",
            Source::Derived => "derived",
            Source::UserInput => "user_input",
            Source::ActualAdjust => "actual_adjust",
        }
    }

    /// User-owned rows are immutable for the rest of the pipeline.
    pub fn is_user_owned(&self) -> bool {
        matches!(self, Source::User | Source::ActualAdjust)
    }

    /// Rows the pipeline created and may update or delete again.
    pub fn is_derived_origin(&self) -> bool {
        matches!(self, Source::System | Source::Evidence | Source::Derived)
    }
}

/// Derivation reason, tagged with the fields that derivation actually
/// produces. Each builder constructs exactly one variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockKind {
    SleepSchedule,
    SleepInterrupted {
        interruptions: i64,
        interrupted_minutes: i64,
        top_app: Option<String>,
    },
    ScreenTime {
        minutes: i64,
        top_app: Option<String>,
    },
    UnknownGap,
    PlannedActual {
        conflicts: Vec<String>,
    },
    EvidenceBlock,
    TransitionCommute {
        from: String,
        to: String,
    },
    TransitionPrep,
    TransitionWindDown,
    LocationInferred {
        label: String,
    },
    PatternFill,
}

impl BlockKind {
    /// Stable tag used in deterministic block ids.
    pub fn tag(&self) -> &'static str {
        match self {
            BlockKind::SleepSchedule => "sleep_schedule",
            BlockKind::SleepInterrupted { .. } => "sleep_interrupted",
            BlockKind::ScreenTime { .. } => "screen_time",
            BlockKind::UnknownGap => "unknown_gap",
            BlockKind::PlannedActual { .. } => "planned_actual",
            BlockKind::EvidenceBlock => "evidence_block",
            BlockKind::TransitionCommute { .. } => "transition_commute",
            BlockKind::TransitionPrep => "transition_prep",
            BlockKind::TransitionWindDown => "transition_wind_down",
            BlockKind::LocationInferred { .. } => "location_inferred",
            BlockKind::PatternFill => "pattern_fill",
        }
    }
}

impl Default for BlockKind {
    fn default() -> Self {
        BlockKind::UnknownGap
    }
}

/// Sleep sub-metrics carried on sleep-category blocks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SleepMetrics {
    pub asleep_minutes: i64,
    pub deep_minutes: i64,
    pub rem_minutes: i64,
    pub awake_minutes: i64,
    pub avg_heart_rate: Option<f64>,
    pub hrv: Option<f64>,
    /// 0-100 composite quality score.
    pub quality_score: f64,
}

/// Evidence attached to a block for display purposes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceSummary {
    pub location: Option<String>,
    pub screen_minutes: Option<i64>,
    pub top_app: Option<String>,
    pub sleep: Option<SleepMetrics>,
    #[serde(default)]
    pub conflicts: Vec<String>,
}

/// How trustworthy a block is, derived from how many evidence sources
/// contributed to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataQuality {
    pub completeness: f64,
    pub reliability: f64,
    pub freshness: f64,
}

impl DataQuality {
    pub fn from_source_counts(present: usize, total: usize) -> Self {
        let completeness = if total == 0 {
            0.0
        } else {
            present as f64 / total as f64
        };
        Self {
            // Reliability scales from 0.6 (nothing) to 1.0 (everything).
            reliability: 0.6 + 0.4 * completeness,
            completeness,
            freshness: 1.0,
        }
    }
}

impl Default for DataQuality {
    fn default() -> Self {
        Self::from_source_counts(0, 1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlockMeta {
    pub source: Source,
    #[serde(flatten)]
    pub kind: BlockKind,
    pub confidence: f64,
    #[serde(default)]
    pub evidence: EvidenceSummary,
    #[serde(default)]
    pub data_quality: DataQuality,
}

impl BlockMeta {
    pub fn new(source: Source, kind: BlockKind, confidence: f64) -> Self {
        Self {
            source,
            kind,
            confidence,
            evidence: EvidenceSummary::default(),
            data_quality: DataQuality::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimeBlock {
    pub id: String,
    pub title: String,
    pub description: String,
    /// Minutes since local midnight, 0..=1440.
    pub start_minutes: i64,
    /// Minutes, > 0. `start_minutes + duration` may exceed 1440 only for
    /// deriver intermediates; the timeline post-processor clamps.
    pub duration: i64,
    pub category: Category,
    pub location: Option<String>,
    #[serde(default)]
    pub is_big3: bool,
    pub meta: BlockMeta,
}

impl TimeBlock {
    pub fn end_minutes(&self) -> i64 {
        self.start_minutes + self.duration
    }

    pub fn is_unknown(&self) -> bool {
        self.category == Category::Unknown
            && matches!(self.meta.kind, BlockKind::UnknownGap)
    }
}

/// Deterministic block id. Regenerating the same evidence for the same
/// time range must yield the same id, so repeated pipeline runs upsert
/// instead of duplicating rows.
pub fn block_id(tag: &str, start_minutes: i64, end_minutes: i64, source: Source) -> String {
    format!("{tag}-{start_minutes}-{end_minutes}-{}", source.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_ids_are_stable() {
        let a = block_id("screen_time", 540, 600, Source::Evidence);
        let b = block_id("screen_time", 540, 600, Source::Evidence);
        assert_eq!(a, b);
        assert_eq!(a, "screen_time-540-600-evidence");
    }

    #[test]
    fn user_owned_sources() {
        assert!(Source::User.is_user_owned());
        assert!(Source::ActualAdjust.is_user_owned());
        assert!(!Source::Derived.is_user_owned());
        assert!(Source::Derived.is_derived_origin());
        assert!(!Source::User.is_derived_origin());
    }

    #[test]
    fn data_quality_scales_with_sources() {
        let none = DataQuality::from_source_counts(0, 4);
        let all = DataQuality::from_source_counts(4, 4);
        assert!(none.reliability < all.reliability);
        assert_eq!(all.completeness, 1.0);
        assert_eq!(all.reliability, 1.0);
    }
}
