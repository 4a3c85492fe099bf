//! Evidence block builders: turn raw per-source rows for a day into
//! normalized candidate `TimeBlock`s.

pub mod health;
pub mod location;
pub mod screen_time;

pub use health::{attach_sleep_metrics, sleep_metrics};
pub use location::{
    build_location_blocks, commute_blocks, haversine_meters, is_commute_gap,
    location_inferred_block, resolve_hourly_locations,
};
pub use screen_time::{build_screen_time_blocks, find_activity_burst, ScreenTimeInputs};

use chrono::{DateTime, Utc};

/// Minutes since the day anchor, possibly negative or past 1440 for
/// timestamps outside the day.
pub fn minutes_since(day_start: DateTime<Utc>, ts: DateTime<Utc>) -> i64 {
    (ts - day_start).num_minutes()
}
