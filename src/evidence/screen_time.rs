//! Screen-time evidence builder.
//!
//! Three resolution tiers, most precise first: per-app sessions, per-app
//! hourly totals, aggregate hourly totals. The tiers are an explicit
//! ordered strategy list so the fallback chain is testable in isolation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::classify::{self, AppOverride};
use crate::config::ReconcileConfig;
use crate::evidence::minutes_since;
use crate::interval::{merge_intervals, overlap_minutes};
use crate::models::{
    block_id, AppSession, BlockKind, BlockMeta, Category, HourlyAppUsage, HourlyUsage, Source,
    TimeBlock,
};

#[derive(Debug, Default)]
pub struct ScreenTimeInputs<'a> {
    pub sessions: &'a [AppSession],
    pub hourly_by_app: &'a [HourlyAppUsage],
    pub hourly_totals: &'a [HourlyUsage],
}

struct ResolutionStrategy {
    name: &'static str,
    applies: fn(&ScreenTimeInputs) -> bool,
    build: fn(
        &ScreenTimeInputs,
        DateTime<Utc>,
        &HashMap<String, AppOverride>,
        &ReconcileConfig,
    ) -> Vec<TimeBlock>,
}

/// Tried in order; the first strategy whose precondition holds wins.
static STRATEGIES: &[ResolutionStrategy] = &[
    ResolutionStrategy {
        name: "sessions",
        applies: |inputs| !inputs.sessions.is_empty(),
        build: build_from_sessions,
    },
    ResolutionStrategy {
        name: "hourly_by_app",
        applies: |inputs| !inputs.hourly_by_app.is_empty(),
        build: build_from_hourly_by_app,
    },
    ResolutionStrategy {
        name: "hourly_totals",
        applies: |inputs| !inputs.hourly_totals.is_empty(),
        build: build_from_hourly_totals,
    },
];

/// Build disjoint screen-time blocks for a day. Blocks shorter than the
/// configured minimum, or overlapping a protected interval by at least
/// `planned_overlap_discard_minutes`, are discarded. Missing evidence of
/// every tier yields no blocks rather than an error.
pub fn build_screen_time_blocks(
    inputs: &ScreenTimeInputs,
    day_start: DateTime<Utc>,
    protected: &[(i64, i64)],
    overrides: &HashMap<String, AppOverride>,
    config: &ReconcileConfig,
) -> Vec<TimeBlock> {
    let Some(strategy) = STRATEGIES.iter().find(|s| (s.applies)(inputs)) else {
        return Vec::new();
    };
    log::debug!("screen-time resolution tier: {}", strategy.name);

    let blocks = (strategy.build)(inputs, day_start, overrides, config);
    blocks
        .into_iter()
        .filter(|block| block.duration >= config.min_evidence_block_minutes)
        .filter(|block| {
            protected.iter().all(|&(start, end)| {
                overlap_minutes(block.start_minutes, block.end_minutes(), start, end)
                    < config.planned_overlap_discard_minutes
            })
        })
        .collect()
}

fn build_from_sessions(
    inputs: &ScreenTimeInputs,
    day_start: DateTime<Utc>,
    overrides: &HashMap<String, AppOverride>,
    config: &ReconcileConfig,
) -> Vec<TimeBlock> {
    let mut sessions: Vec<&AppSession> = inputs.sessions.iter().collect();
    sessions.sort_by_key(|s| s.started_at);

    // Group chronologically, merging sessions whose gap is within
    // tolerance into one continuous block.
    let mut groups: Vec<Vec<&AppSession>> = Vec::new();
    for session in sessions {
        match groups.last_mut() {
            Some(group) => {
                let last_end = minutes_since(day_start, group.last().unwrap().ended_at);
                let start = minutes_since(day_start, session.started_at);
                if start - last_end <= config.session_merge_gap_minutes {
                    group.push(session);
                } else {
                    groups.push(vec![session]);
                }
            }
            None => groups.push(vec![session]),
        }
    }

    groups
        .into_iter()
        .filter_map(|group| {
            let start = minutes_since(day_start, group[0].started_at);
            let end = minutes_since(day_start, group.last().unwrap().ended_at);
            if end <= start {
                return None;
            }

            let mut per_app: HashMap<&str, i64> = HashMap::new();
            let mut total_secs = 0;
            for session in &group {
                *per_app.entry(session.app_id.as_str()).or_insert(0) += session.duration_seconds;
                total_secs += session.duration_seconds;
            }
            let dominant = per_app
                .into_iter()
                .max_by_key(|(_, secs)| *secs)
                .map(|(app, _)| app.to_string())?;

            let classification = classify::classify_app(&dominant, overrides);
            let mut meta = BlockMeta::new(
                Source::Evidence,
                BlockKind::ScreenTime {
                    minutes: total_secs / 60,
                    top_app: Some(dominant.clone()),
                },
                classification.confidence,
            );
            meta.evidence.screen_minutes = Some(total_secs / 60);
            meta.evidence.top_app = Some(dominant);

            Some(TimeBlock {
                id: block_id("screen_time", start, end, Source::Evidence),
                title: classification.title,
                description: classification.description,
                start_minutes: start,
                duration: end - start,
                category: classification.category,
                location: None,
                is_big3: false,
                meta,
            })
        })
        .collect()
}

fn build_from_hourly_by_app(
    inputs: &ScreenTimeInputs,
    _day_start: DateTime<Utc>,
    overrides: &HashMap<String, AppOverride>,
    _config: &ReconcileConfig,
) -> Vec<TimeBlock> {
    // Dominant app per hour, then consecutive hours with the same dominant
    // app collapse into one block.
    let mut by_hour: HashMap<u32, (&str, i64, i64)> = HashMap::new();
    for row in inputs.hourly_by_app {
        let entry = by_hour.entry(row.hour).or_insert((row.app_id.as_str(), 0, 0));
        entry.2 += row.minutes;
        if row.minutes > entry.1 {
            entry.0 = row.app_id.as_str();
            entry.1 = row.minutes;
        }
    }

    let mut hours: Vec<(u32, &str, i64)> = by_hour
        .into_iter()
        .map(|(hour, (app, _, total))| (hour, app, total))
        .collect();
    hours.sort_by_key(|(hour, _, _)| *hour);

    let mut runs: Vec<(u32, u32, &str, i64)> = Vec::new();
    for (hour, app, total) in hours {
        match runs.last_mut() {
            Some((_, last_hour, run_app, run_total))
                if *run_app == app && hour == *last_hour + 1 =>
            {
                *last_hour = hour;
                *run_total += total;
            }
            _ => runs.push((hour, hour, app, total)),
        }
    }

    runs.into_iter()
        .map(|(first, last, app, total)| {
            let start = first as i64 * 60;
            let end = (last as i64 + 1) * 60;
            let classification = classify::classify_app(app, overrides);
            let mut meta = BlockMeta::new(
                Source::Evidence,
                BlockKind::ScreenTime {
                    minutes: total,
                    top_app: Some(app.to_string()),
                },
                // Hour-bucketed data cannot pin exact bounds.
                classification.confidence * 0.8,
            );
            meta.evidence.screen_minutes = Some(total);
            meta.evidence.top_app = Some(app.to_string());

            TimeBlock {
                id: block_id("screen_time", start, end, Source::Evidence),
                title: classification.title,
                description: classification.description,
                start_minutes: start,
                duration: end - start,
                category: classification.category,
                location: None,
                is_big3: false,
                meta,
            }
        })
        .collect()
}

fn build_from_hourly_totals(
    inputs: &ScreenTimeInputs,
    _day_start: DateTime<Utc>,
    _overrides: &HashMap<String, AppOverride>,
    config: &ReconcileConfig,
) -> Vec<TimeBlock> {
    let mut hours: Vec<&HourlyUsage> = inputs
        .hourly_totals
        .iter()
        .filter(|row| row.minutes >= config.min_evidence_block_minutes)
        .collect();
    hours.sort_by_key(|row| row.hour);

    let mut runs: Vec<(u32, u32, i64)> = Vec::new();
    for row in hours {
        match runs.last_mut() {
            Some((_, last_hour, total)) if row.hour == *last_hour + 1 => {
                *last_hour = row.hour;
                *total += row.minutes;
            }
            _ => runs.push((row.hour, row.hour, row.minutes)),
        }
    }

    runs.into_iter()
        .map(|(first, last, total)| {
            let start = first as i64 * 60;
            let end = (last as i64 + 1) * 60;
            let mut meta = BlockMeta::new(
                Source::Evidence,
                BlockKind::ScreenTime {
                    minutes: total,
                    top_app: None,
                },
                0.35,
            );
            meta.evidence.screen_minutes = Some(total);

            TimeBlock {
                id: block_id("screen_time", start, end, Source::Evidence),
                title: "Screen time".to_string(),
                description: format!("{total} min of device usage"),
                start_minutes: start,
                duration: end - start,
                category: Category::Digital,
                location: None,
                is_big3: false,
                meta,
            }
        })
        .collect()
}

/// A contiguous run of device activity.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityBurst {
    pub start_minutes: i64,
    pub end_minutes: i64,
    pub top_app: Option<String>,
    pub minutes: i64,
}

/// Find the first activity burst of at least `threshold` minutes that
/// touches `[from, from + scan)`. Sessions separated by small gaps merge
/// into one burst. Used by the sleep-start shift.
pub fn find_activity_burst(
    sessions: &[AppSession],
    day_start: DateTime<Utc>,
    from_minutes: i64,
    scan_minutes: i64,
    merge_gap: i64,
    threshold: i64,
) -> Option<ActivityBurst> {
    let scan_end = from_minutes + scan_minutes;
    let intervals: Vec<(i64, i64)> = sessions
        .iter()
        .map(|s| {
            (
                minutes_since(day_start, s.started_at),
                minutes_since(day_start, s.ended_at),
            )
        })
        .filter(|&(start, end)| end > from_minutes && start < scan_end)
        .collect();

    let merged = merge_intervals(intervals, merge_gap);
    let (burst_start, burst_end) = merged
        .into_iter()
        .map(|(start, end)| (start.max(from_minutes), end.min(scan_end)))
        .find(|&(start, end)| end - start >= threshold)?;

    let top_app = sessions
        .iter()
        .map(|s| {
            let start = minutes_since(day_start, s.started_at);
            let end = minutes_since(day_start, s.ended_at);
            (s, overlap_minutes(start, end, burst_start, burst_end))
        })
        .filter(|(_, overlap)| *overlap > 0)
        .max_by_key(|(_, overlap)| *overlap)
        .map(|(s, _)| s.app_id.clone());

    Some(ActivityBurst {
        start_minutes: burst_start,
        end_minutes: burst_end,
        minutes: burst_end - burst_start,
        top_app,
    })
}

/// Total screen minutes inside `[start, end)`.
pub fn screen_minutes_in_range(
    sessions: &[AppSession],
    day_start: DateTime<Utc>,
    start: i64,
    end: i64,
) -> i64 {
    sessions
        .iter()
        .map(|s| {
            overlap_minutes(
                minutes_since(day_start, s.started_at),
                minutes_since(day_start, s.ended_at),
                start,
                end,
            )
        })
        .sum()
}

/// Screen minutes inside `[start, end)` restricted to apps matching the
/// predicate.
pub fn screen_minutes_matching(
    sessions: &[AppSession],
    day_start: DateTime<Utc>,
    start: i64,
    end: i64,
    matches: impl Fn(&str) -> bool,
) -> i64 {
    sessions
        .iter()
        .filter(|s| matches(&s.app_id))
        .map(|s| {
            overlap_minutes(
                minutes_since(day_start, s.started_at),
                minutes_since(day_start, s.ended_at),
                start,
                end,
            )
        })
        .sum()
}

/// App with the most screen time inside `[start, end)`.
pub fn top_app_in_range(
    sessions: &[AppSession],
    day_start: DateTime<Utc>,
    start: i64,
    end: i64,
) -> Option<String> {
    let mut per_app: HashMap<&str, i64> = HashMap::new();
    for s in sessions {
        let minutes = overlap_minutes(
            minutes_since(day_start, s.started_at),
            minutes_since(day_start, s.ended_at),
            start,
            end,
        );
        if minutes > 0 {
            *per_app.entry(s.app_id.as_str()).or_insert(0) += minutes;
        }
    }
    per_app
        .into_iter()
        .max_by_key(|(_, minutes)| *minutes)
        .map(|(app, _)| app.to_string())
}

/// Number of distinct activity bursts inside `[start, end)` after gap
/// merging. Used to annotate interrupted sleep.
pub fn burst_count_in_range(
    sessions: &[AppSession],
    day_start: DateTime<Utc>,
    start: i64,
    end: i64,
    merge_gap: i64,
) -> i64 {
    let intervals: Vec<(i64, i64)> = sessions
        .iter()
        .map(|s| {
            (
                minutes_since(day_start, s.started_at).max(start),
                minutes_since(day_start, s.ended_at).min(end),
            )
        })
        .filter(|&(s, e)| e > s)
        .collect();
    merge_intervals(intervals, merge_gap).len() as i64
}
