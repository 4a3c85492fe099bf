//! Timeline gap-filler and post-processor.
//!
//! Takes the day's committed blocks, fills every uncovered minute with an
//! unknown placeholder, progressively replaces unknown time with
//! sleep-schedule, location, transition, productive-usage, and pattern
//! inferences in a fixed priority order, then deduplicates by source
//! priority and merges adjacent same-category blocks.
//!
//! Post-condition: the returned blocks are sorted, pairwise
//! non-overlapping, and cover [0, 1440) exactly.

use chrono::{DateTime, Utc};

use crate::config::{FillMode, ReconcileConfig};
use crate::evidence::health::attach_sleep_metrics;
use crate::evidence::minutes_since;
use crate::evidence::screen_time::{
    burst_count_in_range, screen_minutes_in_range, screen_minutes_matching, top_app_in_range,
};
use crate::evidence::location::location_inferred_block;
use crate::classify;
use crate::interval::{clamp_to_day, overlap_minutes};
use crate::models::{
    block_id, AppSession, BlockKind, BlockMeta, Category, HealthDaily, LocationBlock, PatternSlot,
    ReconciliationEvent, Source, TimeBlock, DAY_MINUTES,
};

pub struct TimelineInputs<'a> {
    /// Blocks already derived or persisted for the day, clamped or not.
    pub committed: Vec<TimeBlock>,
    pub planned: &'a [TimeBlock],
    pub sessions: &'a [AppSession],
    pub location_blocks: &'a [LocationBlock],
    pub health: Option<&'a HealthDaily>,
    pub patterns: &'a [PatternSlot],
    /// Caller-supplied minimum confidence for pattern gap-filling.
    pub min_pattern_confidence: f64,
    pub day_start: DateTime<Utc>,
}

/// Build the full gap-filled display timeline for one day.
pub fn build_actual_display_events(inputs: TimelineInputs, config: &ReconcileConfig) -> Vec<TimeBlock> {
    let committed: Vec<TimeBlock> = inputs
        .committed
        .iter()
        .filter_map(|b| clamp_block(b))
        .collect();

    let mut blocks = fill_unknown_gaps(committed, config);
    blocks = substitute_sleep_schedule(blocks, &inputs, config);
    blocks = substitute_location(blocks, &inputs, config);
    if config.fill_mode == FillMode::Aggressive {
        blocks = substitute_productive(blocks, &inputs, config);
        blocks = substitute_transitions(blocks, config);
    }
    blocks = substitute_patterns(blocks, &inputs, config);
    blocks = dedup_by_priority(blocks, config);
    blocks = merge_adjacent(blocks);
    // Dedup may have dropped contested blocks; restore total coverage.
    let mut blocks = fill_unknown_gaps(blocks, config);
    attach_sleep_metrics(&mut blocks, inputs.health);
    blocks
}

/// Clamp a block to day bounds, dropping it if nothing remains.
fn clamp_block(block: &TimeBlock) -> Option<TimeBlock> {
    let start = clamp_to_day(block.start_minutes);
    let end = clamp_to_day(block.end_minutes());
    if end <= start {
        return None;
    }
    let mut clamped = block.clone();
    clamped.start_minutes = start;
    clamped.duration = end - start;
    Some(clamped)
}

fn unknown_block(start: i64, end: i64, config: &ReconcileConfig) -> TimeBlock {
    TimeBlock {
        id: block_id("unknown_gap", start, end, Source::System),
        title: "Unknown".to_string(),
        description: "Tap to assign".to_string(),
        start_minutes: start,
        duration: end - start,
        category: Category::Unknown,
        location: None,
        is_big3: false,
        meta: BlockMeta::new(
            Source::System,
            BlockKind::UnknownGap,
            config.unknown_gap_confidence,
        ),
    }
}

/// Fill every uncovered minute of the day with an unknown placeholder.
/// Post-condition: zero gaps remain in [0, 1440).
pub fn fill_unknown_gaps(mut blocks: Vec<TimeBlock>, config: &ReconcileConfig) -> Vec<TimeBlock> {
    blocks.sort_by_key(|b| b.start_minutes);

    let mut out: Vec<TimeBlock> = Vec::with_capacity(blocks.len() + 2);
    let mut cursor = 0;
    for block in blocks {
        if block.start_minutes > cursor {
            out.push(unknown_block(cursor, block.start_minutes, config));
        }
        cursor = cursor.max(block.end_minutes());
        out.push(block);
    }
    if cursor < DAY_MINUTES {
        out.push(unknown_block(cursor, DAY_MINUTES, config));
    }
    out
}

/// Replace segments of each unknown block using `replace`, re-filling the
/// leftover space inside the original bounds with fresh unknown
/// placeholders. `replace` must return blocks fully inside the unknown
/// block, sorted and non-overlapping.
fn substitute_unknowns(
    blocks: Vec<TimeBlock>,
    config: &ReconcileConfig,
    mut replace: impl FnMut(&TimeBlock) -> Vec<TimeBlock>,
) -> Vec<TimeBlock> {
    let mut out = Vec::with_capacity(blocks.len());
    for block in blocks {
        if !block.is_unknown() {
            out.push(block);
            continue;
        }
        let replacements = replace(&block);
        if replacements.is_empty() {
            out.push(block);
            continue;
        }
        let mut cursor = block.start_minutes;
        for replacement in replacements {
            if replacement.start_minutes > cursor {
                out.push(unknown_block(cursor, replacement.start_minutes, config));
            }
            cursor = replacement.end_minutes();
            out.push(replacement);
        }
        if cursor < block.end_minutes() {
            out.push(unknown_block(cursor, block.end_minutes(), config));
        }
    }
    out
}

/// Unknown time overlapping a planned sleep interval becomes sleep,
/// annotated with interruption evidence when the user was on the device
/// inside the window.
fn substitute_sleep_schedule(
    blocks: Vec<TimeBlock>,
    inputs: &TimelineInputs,
    config: &ReconcileConfig,
) -> Vec<TimeBlock> {
    let sleep_plans: Vec<(i64, i64)> = inputs
        .planned
        .iter()
        .filter(|p| p.category == Category::Sleep)
        .map(|p| (clamp_to_day(p.start_minutes), clamp_to_day(p.end_minutes())))
        .filter(|&(s, e)| e > s)
        .collect();
    if sleep_plans.is_empty() {
        return blocks;
    }

    substitute_unknowns(blocks, config, |gap| {
        let mut segments: Vec<TimeBlock> = sleep_plans
            .iter()
            .filter_map(|&(ps, pe)| {
                let start = ps.max(gap.start_minutes);
                let end = pe.min(gap.end_minutes());
                if end <= start {
                    return None;
                }
                Some(sleep_segment(start, end, inputs, config))
            })
            .collect();
        segments.sort_by_key(|b| b.start_minutes);
        segments
    })
}

fn sleep_segment(
    start: i64,
    end: i64,
    inputs: &TimelineInputs,
    config: &ReconcileConfig,
) -> TimeBlock {
    let interrupted_minutes =
        screen_minutes_in_range(inputs.sessions, inputs.day_start, start, end);
    let kind = if interrupted_minutes > 0 {
        BlockKind::SleepInterrupted {
            interruptions: burst_count_in_range(
                inputs.sessions,
                inputs.day_start,
                start,
                end,
                config.sleep_burst_merge_gap_minutes,
            ),
            interrupted_minutes,
            top_app: top_app_in_range(inputs.sessions, inputs.day_start, start, end),
        }
    } else {
        BlockKind::SleepSchedule
    };

    let mut meta = BlockMeta::new(Source::Derived, kind, 0.6);
    if interrupted_minutes > 0 {
        meta.evidence.screen_minutes = Some(interrupted_minutes);
        meta.evidence.top_app = top_app_in_range(inputs.sessions, inputs.day_start, start, end);
    }

    TimeBlock {
        id: block_id("sleep_schedule", start, end, Source::Derived),
        title: "Sleep".to_string(),
        description: "Scheduled sleep".to_string(),
        start_minutes: start,
        duration: end - start,
        category: Category::Sleep,
        location: None,
        is_big3: false,
        meta,
    }
}

/// Unknown time overlapping a sufficiently long place block becomes a
/// location-inferred block; a gap connecting two different places within
/// the commute range becomes a commute instead.
fn substitute_location(
    blocks: Vec<TimeBlock>,
    inputs: &TimelineInputs,
    config: &ReconcileConfig,
) -> Vec<TimeBlock> {
    if inputs.location_blocks.is_empty() {
        return blocks;
    }

    substitute_unknowns(blocks, config, |gap| {
        if let Some(commute) = commute_for_gap(gap, inputs.location_blocks, config) {
            return vec![commute];
        }

        let mut segments: Vec<TimeBlock> = inputs
            .location_blocks
            .iter()
            .filter(|place| place.duration() >= config.min_evidence_block_minutes)
            .filter_map(|place| {
                let start = place.start_minutes.max(gap.start_minutes);
                let end = place.end_minutes.min(gap.end_minutes());
                if end <= start {
                    return None;
                }
                Some(location_inferred_block(place, start, end))
            })
            .collect();
        segments.sort_by_key(|b| b.start_minutes);
        segments.dedup_by_key(|b| b.start_minutes);
        segments
    })
}

/// The gap becomes a commute when it sits between two different place
/// labels whose separation is within the commute range.
fn commute_for_gap(
    gap: &TimeBlock,
    places: &[LocationBlock],
    config: &ReconcileConfig,
) -> Option<TimeBlock> {
    let before = places
        .iter()
        .filter(|p| p.end_minutes <= gap.start_minutes)
        .max_by_key(|p| p.end_minutes)?;
    let after = places
        .iter()
        .filter(|p| p.start_minutes >= gap.end_minutes())
        .min_by_key(|p| p.start_minutes)?;

    let separation = after.start_minutes - before.end_minutes;
    if before.label == after.label
        || separation < config.commute_min_gap_minutes
        || separation > config.commute_max_gap_minutes
    {
        return None;
    }

    let start = gap.start_minutes;
    let end = gap.end_minutes();
    let mut meta = BlockMeta::new(
        Source::Derived,
        BlockKind::TransitionCommute {
            from: before.label.clone(),
            to: after.label.clone(),
        },
        0.55,
    );
    meta.evidence.location = Some(after.label.clone());

    Some(TimeBlock {
        id: block_id("transition_commute", start, end, Source::Derived),
        title: "Commute".to_string(),
        description: format!("{} → {}", before.label, after.label),
        start_minutes: start,
        duration: end - start,
        category: Category::Travel,
        location: None,
        is_big3: false,
        meta,
    })
}

/// Aggressive mode: unknown time with enough classifier-confirmed
/// productive screen usage becomes a work block.
fn substitute_productive(
    blocks: Vec<TimeBlock>,
    inputs: &TimelineInputs,
    config: &ReconcileConfig,
) -> Vec<TimeBlock> {
    substitute_unknowns(blocks, config, |gap| {
        let productive = screen_minutes_matching(
            inputs.sessions,
            inputs.day_start,
            gap.start_minutes,
            gap.end_minutes(),
            classify::is_productive_app,
        );
        if productive < config.min_evidence_block_minutes {
            return Vec::new();
        }

        let top_app = top_app_in_range(
            inputs.sessions,
            inputs.day_start,
            gap.start_minutes,
            gap.end_minutes(),
        );
        let mut meta = BlockMeta::new(
            Source::Derived,
            BlockKind::ScreenTime {
                minutes: productive,
                top_app: top_app.clone(),
            },
            0.5,
        );
        meta.evidence.screen_minutes = Some(productive);
        meta.evidence.top_app = top_app;

        vec![TimeBlock {
            id: block_id(
                "productive_usage",
                gap.start_minutes,
                gap.end_minutes(),
                Source::Derived,
            ),
            title: "Productive".to_string(),
            description: format!("{productive} min of productive app usage"),
            start_minutes: gap.start_minutes,
            duration: gap.duration,
            category: Category::Work,
            location: None,
            is_big3: false,
            meta,
        }]
    })
}

fn transition_eligible(category: Category) -> bool {
    matches!(category, Category::Work | Category::Health | Category::Meeting)
}

/// Aggressive mode: short unknown gaps flanked by same-category,
/// transition-eligible blocks at the same location become prep time; a
/// gap from an eligible block into sleep becomes wind-down.
fn substitute_transitions(blocks: Vec<TimeBlock>, config: &ReconcileConfig) -> Vec<TimeBlock> {
    let mut out = blocks.clone();

    for i in 0..blocks.len() {
        let gap = &blocks[i];
        if !gap.is_unknown()
            || gap.duration < config.transition_min_gap_minutes
            || gap.duration > config.transition_max_gap_minutes
        {
            continue;
        }
        let prev = if i > 0 { blocks.get(i - 1) } else { None };
        let next = blocks.get(i + 1);
        let (Some(prev), Some(next)) = (prev, next) else {
            continue;
        };

        let flanked_same = prev.category == next.category
            && transition_eligible(next.category)
            && prev.location == next.location;
        let winds_down = transition_eligible(prev.category) && next.category == Category::Sleep;

        let replacement = if flanked_same {
            transition_block(gap, BlockKind::TransitionPrep, "Prep", next.category, next)
        } else if winds_down {
            transition_block(
                gap,
                BlockKind::TransitionWindDown,
                "Wind down",
                Category::Routine,
                prev,
            )
        } else {
            continue;
        };
        out[i] = replacement;
    }
    out
}

fn transition_block(
    gap: &TimeBlock,
    kind: BlockKind,
    title: &str,
    category: Category,
    neighbor: &TimeBlock,
) -> TimeBlock {
    TimeBlock {
        id: block_id(kind.tag(), gap.start_minutes, gap.end_minutes(), Source::Derived),
        title: title.to_string(),
        description: format!("{title} around {}", neighbor.title),
        start_minutes: gap.start_minutes,
        duration: gap.duration,
        category,
        location: neighbor.location.clone(),
        is_big3: false,
        meta: BlockMeta::new(Source::Derived, kind, 0.45),
    }
}

/// Remaining unknown gaps fill from historical patterns above a blended
/// confidence threshold: the base blends with the caller minimum and the
/// fill mode nudges it ±0.1.
fn substitute_patterns(
    blocks: Vec<TimeBlock>,
    inputs: &TimelineInputs,
    config: &ReconcileConfig,
) -> Vec<TimeBlock> {
    if inputs.patterns.is_empty() {
        return blocks;
    }
    let blended =
        (config.pattern_fill_base_confidence + inputs.min_pattern_confidence) / 2.0;
    let threshold = match config.fill_mode {
        FillMode::Aggressive => blended - 0.1,
        FillMode::Conservative => blended + 0.1,
    };

    substitute_unknowns(blocks, config, |gap| {
        let mut segments: Vec<TimeBlock> = inputs
            .patterns
            .iter()
            .filter(|p| p.confidence >= threshold)
            .filter_map(|p| {
                let start = p.start_minutes.max(gap.start_minutes);
                let end = (p.start_minutes + p.duration).min(gap.end_minutes());
                if end <= start {
                    return None;
                }
                Some(TimeBlock {
                    id: block_id("pattern_fill", start, end, Source::Derived),
                    title: p.title.clone(),
                    description: "Usually at this time".to_string(),
                    start_minutes: start,
                    duration: end - start,
                    category: p.category,
                    location: None,
                    is_big3: false,
                    meta: BlockMeta::new(Source::Derived, BlockKind::PatternFill, p.confidence),
                })
            })
            .collect();
        segments.sort_by_key(|b| b.start_minutes);
        segments.dedup_by_key(|b| b.start_minutes);
        segments
    })
}

/// Source priority class, lower wins contested time.
fn priority_class(block: &TimeBlock) -> u8 {
    if block.meta.source.is_user_owned() {
        0
    } else if matches!(block.meta.source, Source::Derived | Source::Evidence) {
        1
    } else if block.category != Category::Unknown {
        2
    } else {
        3
    }
}

/// Sort blocks by priority (user-actual > derived > non-unknown > higher
/// confidence > earlier start) and greedily keep each block unless it
/// contests more than the overlap threshold with already-kept blocks;
/// smaller contested edges are trimmed away so the highest-priority
/// version of any time range survives.
fn dedup_by_priority(blocks: Vec<TimeBlock>, config: &ReconcileConfig) -> Vec<TimeBlock> {
    let mut ordered = blocks;
    ordered.sort_by(|a, b| {
        priority_class(a)
            .cmp(&priority_class(b))
            .then(
                b.meta
                    .confidence
                    .partial_cmp(&a.meta.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(a.start_minutes.cmp(&b.start_minutes))
    });

    let mut kept: Vec<TimeBlock> = Vec::with_capacity(ordered.len());
    for block in ordered {
        let contested: i64 = kept
            .iter()
            .map(|k| {
                overlap_minutes(
                    block.start_minutes,
                    block.end_minutes(),
                    k.start_minutes,
                    k.end_minutes(),
                )
            })
            .sum();
        if contested > config.dedup_overlap_minutes {
            continue;
        }
        if contested == 0 {
            kept.push(block);
            continue;
        }
        // Trim the contested edges, keeping the free sub-intervals.
        let mut free = vec![(block.start_minutes, block.end_minutes())];
        for k in &kept {
            free = subtract_interval(free, k.start_minutes, k.end_minutes());
        }
        for (start, end) in free {
            if end <= start {
                continue;
            }
            let mut piece = block.clone();
            piece.id = block_id(piece.meta.kind.tag(), start, end, piece.meta.source);
            piece.start_minutes = start;
            piece.duration = end - start;
            kept.push(piece);
        }
    }

    kept.sort_by_key(|b| b.start_minutes);
    kept
}

fn subtract_interval(intervals: Vec<(i64, i64)>, cut_start: i64, cut_end: i64) -> Vec<(i64, i64)> {
    let mut out = Vec::with_capacity(intervals.len() + 1);
    for (start, end) in intervals {
        if cut_end <= start || cut_start >= end {
            out.push((start, end));
            continue;
        }
        if start < cut_start {
            out.push((start, cut_start));
        }
        if cut_end < end {
            out.push((cut_end, end));
        }
    }
    out
}

/// Merge immediately-adjacent blocks of identical category and identical
/// description into one.
fn merge_adjacent(mut blocks: Vec<TimeBlock>) -> Vec<TimeBlock> {
    blocks.sort_by_key(|b| b.start_minutes);

    let mut out: Vec<TimeBlock> = Vec::with_capacity(blocks.len());
    for block in blocks {
        match out.last_mut() {
            Some(prev)
                if prev.end_minutes() == block.start_minutes
                    && prev.category == block.category
                    && prev.description == block.description =>
            {
                prev.duration += block.duration;
                prev.meta.confidence = prev.meta.confidence.max(block.meta.confidence);
            }
            _ => out.push(block),
        }
    }
    out
}

/// Map a persisted event into a day-local display block. Events outside
/// the day vanish; events straddling midnight clamp to the day.
pub fn event_to_display_block(
    event: &ReconciliationEvent,
    day_start: DateTime<Utc>,
) -> Option<TimeBlock> {
    let start = clamp_to_day(minutes_since(day_start, event.start));
    let end = clamp_to_day(minutes_since(day_start, event.end));
    if end <= start {
        return None;
    }

    let mut meta = BlockMeta::new(event.meta.source, event.meta.kind.clone(), event.meta.confidence);
    meta.evidence.conflicts = event.meta.conflicts().to_vec();
    meta.evidence.top_app = event.meta.app_key.clone();

    Some(TimeBlock {
        id: event.id.clone(),
        title: event.title.clone(),
        description: String::new(),
        start_minutes: start,
        duration: end - start,
        category: event.meta.category,
        location: None,
        is_big3: false,
        meta,
    })
}
