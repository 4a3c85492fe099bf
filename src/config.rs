//! Configuration for the reconciliation pipeline with tunable thresholds.
//!
//! Every threshold the builders, deriver, and gap-filler consult lives
//! here as a named field so callers can override any of them.

use serde::{Deserialize, Serialize};

/// How eagerly the gap-filler replaces unknown time with inferences.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FillMode {
    Conservative,
    Aggressive,
}

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Evidence blocks shorter than this are discarded.
    pub min_evidence_block_minutes: i64,

    /// Adjacent screen-time sessions with a gap at most this long merge
    /// into one block.
    pub session_merge_gap_minutes: i64,

    /// A screen-time block overlapping a planned/protected interval by at
    /// least this much is discarded.
    pub planned_overlap_discard_minutes: i64,

    /// Sleep shift: minimum minutes of activity near the planned sleep
    /// start to count as "stayed up".
    pub sleep_activity_threshold_minutes: i64,
    /// Sleep shift: how far past the planned start to scan for activity.
    pub sleep_scan_window_minutes: i64,
    /// Sleep shift: gap tolerance when merging the activity burst.
    pub sleep_burst_merge_gap_minutes: i64,
    /// Sleep shift is rejected if remaining sleep would fall below this.
    pub min_sleep_minutes: i64,

    /// Commute synthesis: gap between two different places must be within
    /// this range.
    pub commute_min_gap_minutes: i64,
    pub commute_max_gap_minutes: i64,

    /// A derived planned-actual is skipped if it overlaps committed blocks
    /// by at least this much.
    pub committed_overlap_skip_minutes: i64,

    /// Non-contextual distracting screen time at or above this overrides
    /// other evidence.
    pub distraction_override_minutes: i64,

    /// Pattern history only overrides at or above this confidence.
    pub pattern_override_confidence: f64,
    /// Base confidence blended with the caller minimum for pattern
    /// gap-filling.
    pub pattern_fill_base_confidence: f64,

    /// Trailing-edge extension: an unlocked event may be extended if it
    /// ends within this many seconds of the derived event's start.
    pub extension_tolerance_secs: i64,

    /// Dedup pass drops a block overlapping an already-kept block by more
    /// than this.
    pub dedup_overlap_minutes: i64,

    /// Transition prep/wind-down gaps must be within this range.
    pub transition_min_gap_minutes: i64,
    pub transition_max_gap_minutes: i64,

    /// A location sample within this distance of a saved place resolves
    /// to it.
    pub place_match_radius_meters: f64,

    /// Confidence of unknown placeholder blocks.
    pub unknown_gap_confidence: f64,

    /// Evidence fusion base weights, in priority order.
    pub weight_location: f64,
    pub weight_screen_time: f64,
    pub weight_pattern: f64,
    pub weight_health: f64,

    /// Multiplier applied when pattern history deviates from the plan.
    pub pattern_deviation_penalty: f64,
    /// Per-conflict penalty never drops confidence below this floor factor.
    pub conflict_penalty_floor: f64,
    /// Multiplier applied when location evidence confirms the plan.
    pub location_confirm_boost: f64,

    pub fill_mode: FillMode,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            min_evidence_block_minutes: 10,
            session_merge_gap_minutes: 15,
            planned_overlap_discard_minutes: 5,
            sleep_activity_threshold_minutes: 10,
            sleep_scan_window_minutes: 120,
            sleep_burst_merge_gap_minutes: 5,
            min_sleep_minutes: 30,
            commute_min_gap_minutes: 15,
            commute_max_gap_minutes: 90,
            committed_overlap_skip_minutes: 10,
            distraction_override_minutes: 20,
            pattern_override_confidence: 0.8,
            pattern_fill_base_confidence: 0.6,
            extension_tolerance_secs: 60,
            dedup_overlap_minutes: 10,
            transition_min_gap_minutes: 10,
            transition_max_gap_minutes: 45,
            place_match_radius_meters: 150.0,
            unknown_gap_confidence: 0.2,
            weight_location: 0.2,
            weight_screen_time: 0.15,
            weight_pattern: 0.1,
            weight_health: 0.1,
            pattern_deviation_penalty: 0.85,
            conflict_penalty_floor: 0.6,
            location_confirm_boost: 1.1,
            fill_mode: FillMode::Conservative,
        }
    }
}
