//! Raw evidence rows as delivered by the external collectors.
//!
//! These are plain data: the builders in `crate::evidence` turn them into
//! normalized `TimeBlock`s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One screen-time app session (most precise tier).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSession {
    pub app_id: String,
    pub display_name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: i64,
}

/// Per-app usage aggregated into one local-day hour (middle tier).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyAppUsage {
    pub hour: u32,
    pub app_id: String,
    pub display_name: String,
    pub minutes: i64,
}

/// Aggregate usage per hour with no app attribution (coarsest tier).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyUsage {
    pub hour: u32,
    pub minutes: i64,
}

/// A coarse location fix.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    pub recorded_at: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
}

/// A place the user has saved (home, office, gym, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPlace {
    pub id: String,
    pub label: String,
    pub category: Option<String>,
    pub lat: f64,
    pub lon: f64,
}

/// One hour of the day resolved to a place label.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyLocation {
    pub hour: u32,
    pub label: String,
    pub category: Option<String>,
}

/// Contiguous run of same-place hours collapsed into one interval.
/// Ephemeral; used as matching and gap-filling evidence only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationBlock {
    pub start_minutes: i64,
    pub end_minutes: i64,
    pub label: String,
    pub category: Option<String>,
}

impl LocationBlock {
    pub fn duration(&self) -> i64 {
        self.end_minutes - self.start_minutes
    }
}

/// Daily health summary row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthDaily {
    pub asleep_minutes: i64,
    pub deep_minutes: i64,
    pub rem_minutes: i64,
    pub awake_minutes: i64,
    pub avg_heart_rate: Option<f64>,
    pub hrv: Option<f64>,
}

/// Historical pattern for a time-of-day slot, used as low-priority
/// gap-filling evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternSlot {
    pub start_minutes: i64,
    pub duration: i64,
    pub category: crate::models::block::Category,
    pub title: String,
    pub confidence: f64,
}
