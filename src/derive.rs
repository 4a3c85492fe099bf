//! Planned-to-actual deriver.
//!
//! For each planned event, computes its actual realization: shifts a
//! sleep start past late-night screen activity, extends the end along
//! confirming location evidence, fuses per-source confidence, and emits
//! one `planned_actual` block with its conflict list.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::classify::{self, AppOverride};
use crate::config::ReconcileConfig;
use crate::evidence::health::sleep_metrics;
use crate::evidence::screen_time::{
    find_activity_burst, screen_minutes_in_range, screen_minutes_matching, top_app_in_range,
};
use crate::interval::{overlap_minutes, overlaps};
use crate::models::{
    block_id, AppSession, BlockKind, BlockMeta, Category, DataQuality, DerivedEvent, EventMeta,
    HealthDaily, LocationBlock, PatternSlot, Source, TimeBlock, DAY_MINUTES,
};

pub struct DeriveInputs<'a> {
    pub planned: &'a [TimeBlock],
    pub sessions: &'a [AppSession],
    pub location_blocks: &'a [LocationBlock],
    pub health: Option<&'a HealthDaily>,
    pub patterns: &'a [PatternSlot],
    pub overrides: &'a HashMap<String, AppOverride>,
}

struct Fusion {
    confidence: f64,
    conflicts: Vec<String>,
    location_note: Option<String>,
    screen_note: Option<String>,
    data_quality: DataQuality,
}

/// Derive actual blocks from the day's plan. `committed` holds intervals
/// already owned by locked or earlier-inserted blocks; derived blocks
/// never overlap them by more than the configured skip threshold.
///
/// Sleep blocks may run past the end of the day; the timeline
/// post-processor clamps for display, while the absolute-time conversion
/// in [`to_derived_events`] keeps the true bounds.
pub fn derive_actuals(
    inputs: &DeriveInputs,
    day_start: DateTime<Utc>,
    committed: &[(i64, i64)],
    config: &ReconcileConfig,
) -> Vec<TimeBlock> {
    let mut planned: Vec<&TimeBlock> = inputs.planned.iter().collect();
    planned.sort_by_key(|p| p.start_minutes);

    let mut taken: Vec<(i64, i64)> = committed.to_vec();
    let mut out: Vec<TimeBlock> = Vec::new();

    for (idx, plan) in planned.iter().enumerate() {
        let mut start = plan.start_minutes.max(0);
        let mut end = plan.end_minutes();
        if plan.category != Category::Sleep {
            end = end.min(DAY_MINUTES);
        }
        if end <= start || start >= DAY_MINUTES {
            continue;
        }

        // Sleep-start shift: the user stayed up on the device, so actual
        // sleep began when the burst ended.
        if plan.category == Category::Sleep {
            if let Some(burst) = find_activity_burst(
                inputs.sessions,
                day_start,
                start,
                config.sleep_scan_window_minutes,
                config.sleep_burst_merge_gap_minutes,
                config.sleep_activity_threshold_minutes,
            ) {
                if end - burst.end_minutes >= config.min_sleep_minutes {
                    out.push(burst_block(&burst, inputs.overrides));
                    taken.push((burst.start_minutes, burst.end_minutes));
                    start = burst.end_minutes;
                }
            }
        }

        let next_start = planned.get(idx + 1).map(|p| p.start_minutes);

        // Location-confirmed end extension, never past the next plan.
        let mut extended_by = 0;
        if let Some(block) = confirming_location_block(plan, inputs.location_blocks, start, end) {
            if block.end_minutes > end {
                let cap = next_start.unwrap_or(i64::MAX).min(block.end_minutes);
                if cap - end >= config.min_evidence_block_minutes {
                    extended_by = cap - end;
                    end = cap;
                }
            }
        }

        let overlap_with_taken: i64 = taken
            .iter()
            .map(|&(s, e)| overlap_minutes(start, end, s, e))
            .max()
            .unwrap_or(0);
        if overlap_with_taken >= config.committed_overlap_skip_minutes {
            continue;
        }

        let fusion = fuse_evidence(plan, inputs, day_start, start, end, config);
        let mut meta = BlockMeta::new(
            Source::Derived,
            BlockKind::PlannedActual {
                conflicts: fusion.conflicts.clone(),
            },
            fusion.confidence,
        );
        meta.evidence.conflicts = fusion.conflicts.clone();
        meta.evidence.location = fusion.location_note.clone();
        let screen = screen_minutes_in_range(inputs.sessions, day_start, start, end);
        if screen > 0 {
            meta.evidence.screen_minutes = Some(screen);
            meta.evidence.top_app = top_app_in_range(inputs.sessions, day_start, start, end);
        }
        if plan.category == Category::Sleep {
            if let Some(daily) = inputs.health {
                meta.evidence.sleep = Some(sleep_metrics(daily));
            }
        }
        let description = assemble_description(plan, extended_by, &fusion, config);
        meta.data_quality = fusion.data_quality;
        out.push(TimeBlock {
            id: block_id("planned_actual", start, end, Source::Derived),
            title: plan.title.clone(),
            description,
            start_minutes: start,
            duration: end - start,
            category: plan.category,
            location: plan.location.clone(),
            is_big3: plan.is_big3,
            meta,
        });
        taken.push((start, end));
    }

    out
}

fn burst_block(
    burst: &crate::evidence::screen_time::ActivityBurst,
    overrides: &HashMap<String, AppOverride>,
) -> TimeBlock {
    let (title, description, category) = match &burst.top_app {
        Some(app) => {
            let c = classify::classify_app(app, overrides);
            (c.title, c.description, c.category)
        }
        None => (
            "Screen time".to_string(),
            "Late-night device usage".to_string(),
            Category::Digital,
        ),
    };
    let mut meta = BlockMeta::new(
        Source::Evidence,
        BlockKind::ScreenTime {
            minutes: burst.minutes,
            top_app: burst.top_app.clone(),
        },
        0.7,
    );
    meta.evidence.screen_minutes = Some(burst.minutes);
    meta.evidence.top_app = burst.top_app.clone();

    TimeBlock {
        id: block_id(
            "screen_time",
            burst.start_minutes,
            burst.end_minutes,
            Source::Evidence,
        ),
        title,
        description,
        start_minutes: burst.start_minutes,
        duration: burst.minutes,
        category,
        location: None,
        is_big3: false,
        meta,
    }
}

/// A location block confirms the plan when its label matches the planned
/// place or its classified category matches the planned category.
fn confirming_location_block<'a>(
    plan: &TimeBlock,
    blocks: &'a [LocationBlock],
    start: i64,
    end: i64,
) -> Option<&'a LocationBlock> {
    blocks
        .iter()
        .filter(|b| overlaps(b.start_minutes, b.end_minutes, start, end))
        .find(|b| location_confirms(plan, b))
}

fn location_confirms(plan: &TimeBlock, block: &LocationBlock) -> bool {
    if let Some(place) = &plan.location {
        if place.eq_ignore_ascii_case(&block.label) {
            return true;
        }
    }
    classify::classify_place(&block.label, block.category.as_deref()).0 == plan.category
}

/// Evidence fusion. Priority order for conflicts: User-Planned > Location
/// > Screen-time > Pattern > Health — contradicting location evidence wins
/// over the plan and is flagged, heavy non-contextual distraction
/// independently overrides, pattern history only overrides at high
/// confidence.
fn fuse_evidence(
    plan: &TimeBlock,
    inputs: &DeriveInputs,
    day_start: DateTime<Utc>,
    start: i64,
    end: i64,
    config: &ReconcileConfig,
) -> Fusion {
    let mut conflicts: Vec<String> = Vec::new();
    let mut base = 0.5;
    let mut location_confirmed = false;
    let mut location_note = None;
    let mut screen_note = None;
    let mut pattern_deviates = false;

    let overlapping_location = inputs
        .location_blocks
        .iter()
        .filter(|b| overlaps(b.start_minutes, b.end_minutes, start, end))
        .max_by_key(|b| overlap_minutes(b.start_minutes, b.end_minutes, start, end));
    if let Some(block) = overlapping_location {
        location_note = Some(block.label.clone());
        if location_confirms(plan, block) {
            location_confirmed = true;
            base += config.weight_location;
        } else {
            conflicts.push(format!("location shows {}", block.label));
        }
    }

    let screen = screen_minutes_in_range(inputs.sessions, day_start, start, end);
    if screen > 0 {
        base += config.weight_screen_time;
        let distracting = screen_minutes_matching(
            inputs.sessions,
            day_start,
            start,
            end,
            |app| classify::is_distracting_app(app) && !classify::app_expected_for(app, plan.category),
        );
        if distracting >= config.distraction_override_minutes {
            let app = top_app_in_range(inputs.sessions, day_start, start, end)
                .unwrap_or_else(|| "device".to_string());
            let note = format!("{distracting} min distracted ({app})");
            conflicts.push(note.clone());
            screen_note = Some(note);
        } else {
            screen_note = Some(format!("{screen} min on device"));
        }
    }

    let overlapping_pattern = inputs
        .patterns
        .iter()
        .filter(|p| overlaps(p.start_minutes, p.start_minutes + p.duration, start, end))
        .max_by_key(|p| overlap_minutes(p.start_minutes, p.start_minutes + p.duration, start, end));
    if let Some(pattern) = overlapping_pattern {
        if pattern.category == plan.category {
            base += config.weight_pattern;
        } else if pattern.confidence >= config.pattern_override_confidence {
            pattern_deviates = true;
            conflicts.push(format!("usually {} at this time", pattern.category.as_str()));
        }
    }

    if plan.category == Category::Sleep && inputs.health.is_some() {
        base += config.weight_health;
    }

    let sources_present = [
        overlapping_location.is_some(),
        screen > 0,
        inputs.health.is_some(),
        overlapping_pattern.is_some(),
    ]
    .iter()
    .filter(|present| **present)
    .count();
    let data_quality = DataQuality::from_source_counts(sources_present, 4);

    let mut confidence = base.min(1.0) * data_quality.reliability;
    if pattern_deviates {
        confidence *= config.pattern_deviation_penalty;
    }
    let conflict_penalty =
        (1.0 - 0.1 * conflicts.len() as f64).max(config.conflict_penalty_floor);
    confidence *= conflict_penalty;
    if location_confirmed {
        confidence *= config.location_confirm_boost;
    }

    Fusion {
        confidence: confidence.clamp(0.0, 1.0),
        conflicts,
        location_note,
        screen_note,
        data_quality,
    }
}

fn assemble_description(
    plan: &TimeBlock,
    extended_by: i64,
    fusion: &Fusion,
    config: &ReconcileConfig,
) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !plan.description.is_empty() {
        parts.push(plan.description.clone());
    }
    if extended_by >= config.min_evidence_block_minutes {
        parts.push(format!("ran {extended_by} min over"));
    }
    if let Some(location) = &fusion.location_note {
        parts.push(format!("at {location}"));
    }
    if let Some(screen) = &fusion.screen_note {
        parts.push(screen.clone());
    }
    for conflict in &fusion.conflicts {
        if !parts.contains(conflict) {
            parts.push(conflict.clone());
        }
    }
    parts.join(" · ")
}

/// Convert derived day-local blocks into absolute-time candidate events
/// for reconciliation. The block id doubles as the stable source id.
pub fn to_derived_events(blocks: &[TimeBlock], day_start: DateTime<Utc>) -> Vec<DerivedEvent> {
    blocks
        .iter()
        .map(|block| DerivedEvent {
            source_id: block.id.clone(),
            title: block.title.clone(),
            start: day_start + chrono::Duration::minutes(block.start_minutes),
            end: day_start + chrono::Duration::minutes(block.end_minutes()),
            meta: EventMeta {
                source: block.meta.source,
                kind: block.meta.kind.clone(),
                category: block.category,
                confidence: block.meta.confidence,
                source_id: Some(block.id.clone()),
                app_key: block.meta.evidence.top_app.clone(),
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day_start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap()
    }

    fn planned(title: &str, category: Category, start: i64, duration: i64) -> TimeBlock {
        TimeBlock {
            id: format!("plan-{start}"),
            title: title.to_string(),
            description: String::new(),
            start_minutes: start,
            duration,
            category,
            location: None,
            is_big3: false,
            meta: BlockMeta::new(Source::User, BlockKind::EvidenceBlock, 1.0),
        }
    }

    fn session(app: &str, start_min: i64, end_min: i64) -> AppSession {
        let base = day_start();
        AppSession {
            app_id: app.to_string(),
            display_name: app.to_string(),
            started_at: base + chrono::Duration::minutes(start_min),
            ended_at: base + chrono::Duration::minutes(end_min),
            duration_seconds: (end_min - start_min) * 60,
        }
    }

    fn inputs<'a>(
        planned: &'a [TimeBlock],
        sessions: &'a [AppSession],
        locations: &'a [LocationBlock],
        overrides: &'a HashMap<String, AppOverride>,
    ) -> DeriveInputs<'a> {
        DeriveInputs {
            planned,
            sessions,
            location_blocks: locations,
            health: None,
            patterns: &[],
            overrides,
        }
    }

    #[test]
    fn sleep_start_shifts_past_late_night_burst() {
        // Planned sleep 23:00-07:00, scrolling 23:10-23:55.
        let plan = vec![planned("Sleep", Category::Sleep, 1380, 480)];
        let sessions = vec![session("com.burbn.instagram", 1390, 1435)];
        let overrides = HashMap::new();
        let derived = derive_actuals(
            &inputs(&plan, &sessions, &[], &overrides),
            day_start(),
            &[],
            &ReconcileConfig::default(),
        );

        assert_eq!(derived.len(), 2);
        let burst = &derived[0];
        assert_eq!(burst.start_minutes, 1390);
        assert_eq!(burst.end_minutes(), 1435);
        assert!(matches!(burst.meta.kind, BlockKind::ScreenTime { .. }));

        let sleep = &derived[1];
        assert_eq!(sleep.start_minutes, 1435); // 23:55
        assert_eq!(sleep.duration, 425); // 7h05m
        assert!(matches!(sleep.meta.kind, BlockKind::PlannedActual { .. }));
    }

    #[test]
    fn sleep_shift_rejected_below_minimum_sleep() {
        // Burst eats all but 20 minutes of a one-hour nap.
        let plan = vec![planned("Nap", Category::Sleep, 840, 60)];
        let sessions = vec![session("com.burbn.instagram", 845, 880)];
        let overrides = HashMap::new();
        let derived = derive_actuals(
            &inputs(&plan, &sessions, &[], &overrides),
            day_start(),
            &[],
            &ReconcileConfig::default(),
        );
        // No shift and no synthetic burst block.
        assert_eq!(derived.len(), 1);
        assert_eq!(derived[0].start_minutes, 840);
    }

    #[test]
    fn location_extends_end_but_not_past_next_plan() {
        let mut work = planned("Deep work", Category::Work, 540, 60);
        work.location = Some("Office".to_string());
        let plan = vec![work, planned("Lunch", Category::Meal, 680, 45)];
        let locations = vec![LocationBlock {
            start_minutes: 540,
            end_minutes: 720,
            label: "Office".into(),
            category: None,
        }];
        let overrides = HashMap::new();
        let derived = derive_actuals(
            &inputs(&plan, &[], &locations, &overrides),
            day_start(),
            &[],
            &ReconcileConfig::default(),
        );
        let work_actual = &derived[0];
        // Extended from 600 to 680 (next plan), not to 720.
        assert_eq!(work_actual.end_minutes(), 680);
        assert!(work_actual.description.contains("ran 80 min over"));
    }

    #[test]
    fn skipped_when_overlapping_committed_blocks() {
        let plan = vec![planned("Workout", Category::Health, 420, 60)];
        let overrides = HashMap::new();
        let derived = derive_actuals(
            &inputs(&plan, &[], &[], &overrides),
            day_start(),
            &[(430, 470)],
            &ReconcileConfig::default(),
        );
        assert!(derived.is_empty());
    }

    #[test]
    fn contradicting_location_is_flagged_and_penalized() {
        let mut work = planned("Deep work", Category::Work, 540, 120);
        work.location = Some("Office".to_string());
        let plan = vec![work];
        let locations = vec![LocationBlock {
            start_minutes: 540,
            end_minutes: 660,
            label: "Equinox Gym".into(),
            category: None,
        }];
        let overrides = HashMap::new();
        let derived = derive_actuals(
            &inputs(&plan, &[], &locations, &overrides),
            day_start(),
            &[],
            &ReconcileConfig::default(),
        );
        let block = &derived[0];
        let BlockKind::PlannedActual { conflicts } = &block.meta.kind else {
            panic!("expected planned_actual");
        };
        assert_eq!(conflicts.len(), 1);
        assert!(conflicts[0].contains("Equinox Gym"));

        let confirming = vec![LocationBlock {
            start_minutes: 540,
            end_minutes: 660,
            label: "Office".into(),
            category: None,
        }];
        let confirmed = derive_actuals(
            &inputs(&plan, &[], &confirming, &overrides),
            day_start(),
            &[],
            &ReconcileConfig::default(),
        );
        assert!(confirmed[0].meta.confidence > block.meta.confidence);
    }

    #[test]
    fn heavy_distraction_during_plan_is_a_conflict() {
        let plan = vec![planned("Deep work", Category::Work, 540, 120)];
        let sessions = vec![session("com.burbn.instagram", 560, 590)];
        let overrides = HashMap::new();
        let derived = derive_actuals(
            &inputs(&plan, &sessions, &[], &overrides),
            day_start(),
            &[],
            &ReconcileConfig::default(),
        );
        let BlockKind::PlannedActual { conflicts } = &derived[0].meta.kind else {
            panic!("expected planned_actual");
        };
        assert!(conflicts.iter().any(|c| c.contains("distracted")));
    }

    #[test]
    fn derived_event_conversion_is_deterministic() {
        let plan = vec![planned("Deep work", Category::Work, 540, 60)];
        let overrides = HashMap::new();
        let config = ReconcileConfig::default();
        let a = derive_actuals(&inputs(&plan, &[], &[], &overrides), day_start(), &[], &config);
        let b = derive_actuals(&inputs(&plan, &[], &[], &overrides), day_start(), &[], &config);
        assert_eq!(a[0].id, b[0].id);

        let events = to_derived_events(&a, day_start());
        assert_eq!(events[0].source_id, a[0].id);
        assert_eq!(
            events[0].start,
            day_start() + chrono::Duration::minutes(540)
        );
    }
}
