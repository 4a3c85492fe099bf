//! Location evidence builder.
//!
//! Raw coarse samples resolve against the user's saved places, collapse
//! into contiguous place blocks, and gaps bounded by two different places
//! synthesize a commute.

use chrono::{DateTime, Timelike, Utc};

use crate::classify::classify_place;
use crate::config::ReconcileConfig;
use crate::models::{
    block_id, BlockKind, BlockMeta, Category, HourlyLocation, LocationBlock, LocationSample,
    Source, TimeBlock, UserPlace,
};

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle distance between two coordinates.
pub fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * a.sqrt().asin()
}

/// Resolve raw samples to hourly place rows. The majority place per local
/// hour wins; hours with no sample near a saved place are omitted.
pub fn resolve_hourly_locations(
    samples: &[LocationSample],
    places: &[UserPlace],
    day_start: DateTime<Utc>,
    config: &ReconcileConfig,
) -> Vec<HourlyLocation> {
    use std::collections::HashMap;

    // hour -> place label -> (count, category)
    let mut per_hour: HashMap<u32, HashMap<&str, (usize, Option<&str>)>> = HashMap::new();

    for sample in samples {
        if sample.recorded_at < day_start {
            continue;
        }
        let hour = sample.recorded_at.hour();
        let nearest = places
            .iter()
            .map(|p| (p, haversine_meters(p.lat, p.lon, sample.lat, sample.lon)))
            .filter(|(_, dist)| *dist <= config.place_match_radius_meters)
            .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        if let Some((place, _)) = nearest {
            let entry = per_hour
                .entry(hour)
                .or_default()
                .entry(place.label.as_str())
                .or_insert((0, place.category.as_deref()));
            entry.0 += 1;
        }
    }

    let mut rows: Vec<HourlyLocation> = per_hour
        .into_iter()
        .filter_map(|(hour, labels)| {
            labels
                .into_iter()
                .max_by_key(|(_, (count, _))| *count)
                .map(|(label, (_, category))| HourlyLocation {
                    hour,
                    label: label.to_string(),
                    category: category.map(|c| c.to_string()),
                })
        })
        .collect();
    rows.sort_by_key(|row| row.hour);
    rows
}

/// Collapse consecutive same-label hourly rows into contiguous place
/// blocks.
pub fn build_location_blocks(rows: &[HourlyLocation]) -> Vec<LocationBlock> {
    let mut sorted: Vec<&HourlyLocation> = rows.iter().collect();
    sorted.sort_by_key(|row| row.hour);

    let mut blocks: Vec<LocationBlock> = Vec::new();
    for row in sorted {
        match blocks.last_mut() {
            Some(block)
                if block.label == row.label && block.end_minutes == row.hour as i64 * 60 =>
            {
                block.end_minutes += 60;
            }
            _ => blocks.push(LocationBlock {
                start_minutes: row.hour as i64 * 60,
                end_minutes: (row.hour as i64 + 1) * 60,
                label: row.label.clone(),
                category: row.category.clone(),
            }),
        }
    }
    blocks
}

/// True when the gap between two place blocks looks like travel: bounded
/// by two different labels and within the commute gap range.
pub fn is_commute_gap(prev: &LocationBlock, next: &LocationBlock, config: &ReconcileConfig) -> bool {
    let gap = next.start_minutes - prev.end_minutes;
    prev.label != next.label
        && gap >= config.commute_min_gap_minutes
        && gap <= config.commute_max_gap_minutes
}

/// Synthesize travel blocks for gaps bounded by two different places.
pub fn commute_blocks(blocks: &[LocationBlock], config: &ReconcileConfig) -> Vec<TimeBlock> {
    blocks
        .windows(2)
        .filter(|pair| is_commute_gap(&pair[0], &pair[1], config))
        .map(|pair| {
            let start = pair[0].end_minutes;
            let end = pair[1].start_minutes;
            let mut meta = BlockMeta::new(
                Source::Evidence,
                BlockKind::TransitionCommute {
                    from: pair[0].label.clone(),
                    to: pair[1].label.clone(),
                },
                0.55,
            );
            meta.evidence.location = Some(pair[1].label.clone());

            TimeBlock {
                id: block_id("transition_commute", start, end, Source::Evidence),
                title: "Commute".to_string(),
                description: format!("{} → {}", pair[0].label, pair[1].label),
                start_minutes: start,
                duration: end - start,
                category: Category::Travel,
                location: None,
                is_big3: false,
                meta,
            }
        })
        .collect()
}

/// Build a `location_inferred` block covering `[start, end)` from a place
/// block, categorized via the place classifier.
pub fn location_inferred_block(place: &LocationBlock, start: i64, end: i64) -> TimeBlock {
    let (category, confidence) = classify_place(&place.label, place.category.as_deref());
    let mut meta = BlockMeta::new(
        Source::Evidence,
        BlockKind::LocationInferred {
            label: place.label.clone(),
        },
        confidence,
    );
    meta.evidence.location = Some(place.label.clone());

    TimeBlock {
        id: block_id("location_inferred", start, end, Source::Evidence),
        title: place.label.clone(),
        description: format!("At {}", place.label),
        start_minutes: start,
        duration: end - start,
        category,
        location: Some(place.label.clone()),
        is_big3: false,
        meta,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn samples_resolve_to_majority_place_per_hour() {
        let day = Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap();
        let places = vec![
            UserPlace {
                id: "p1".into(),
                label: "Home".into(),
                category: None,
                lat: 37.0,
                lon: -122.0,
            },
            UserPlace {
                id: "p2".into(),
                label: "Office".into(),
                category: Some("office".into()),
                lat: 37.05,
                lon: -122.0,
            },
        ];
        let at = |h: u32, m: u32, lat: f64| LocationSample {
            recorded_at: Utc.with_ymd_and_hms(2024, 3, 4, h, m, 0).unwrap(),
            lat,
            lon: -122.0,
        };
        let samples = vec![at(9, 5, 37.0500), at(9, 25, 37.0501), at(9, 45, 37.0)];
        let rows =
            resolve_hourly_locations(&samples, &places, day, &ReconcileConfig::default());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].hour, 9);
        assert_eq!(rows[0].label, "Office");
    }

    #[test]
    fn samples_far_from_every_place_are_omitted() {
        let day = Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap();
        let places = vec![UserPlace {
            id: "p1".into(),
            label: "Home".into(),
            category: None,
            lat: 37.0,
            lon: -122.0,
        }];
        let samples = vec![LocationSample {
            recorded_at: Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap(),
            lat: 38.0,
            lon: -122.0,
        }];
        let rows =
            resolve_hourly_locations(&samples, &places, day, &ReconcileConfig::default());
        assert!(rows.is_empty());
    }

    fn row(hour: u32, label: &str) -> HourlyLocation {
        HourlyLocation {
            hour,
            label: label.to_string(),
            category: None,
        }
    }

    #[test]
    fn consecutive_hours_collapse() {
        let rows = vec![row(9, "Office"), row(10, "Office"), row(11, "Office")];
        let blocks = build_location_blocks(&rows);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].start_minutes, 540);
        assert_eq!(blocks[0].end_minutes, 720);
    }

    #[test]
    fn label_change_starts_new_block() {
        let rows = vec![row(9, "Office"), row(10, "Gym")];
        let blocks = build_location_blocks(&rows);
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn gap_in_hours_starts_new_block() {
        let rows = vec![row(9, "Office"), row(12, "Office")];
        let blocks = build_location_blocks(&rows);
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn commute_synthesized_between_different_places() {
        let config = ReconcileConfig::default();
        let blocks = vec![
            LocationBlock {
                start_minutes: 480,
                end_minutes: 510,
                label: "Home".into(),
                category: None,
            },
            LocationBlock {
                start_minutes: 540,
                end_minutes: 720,
                label: "Office".into(),
                category: None,
            },
        ];
        let commutes = commute_blocks(&blocks, &config);
        assert_eq!(commutes.len(), 1);
        assert_eq!(commutes[0].start_minutes, 510);
        assert_eq!(commutes[0].end_minutes(), 540);
        assert_eq!(commutes[0].category, Category::Travel);
    }

    #[test]
    fn no_commute_for_same_place_or_out_of_range_gap() {
        let config = ReconcileConfig::default();
        let same = vec![
            LocationBlock {
                start_minutes: 480,
                end_minutes: 510,
                label: "Home".into(),
                category: None,
            },
            LocationBlock {
                start_minutes: 540,
                end_minutes: 720,
                label: "Home".into(),
                category: None,
            },
        ];
        assert!(commute_blocks(&same, &config).is_empty());

        let too_long = vec![
            LocationBlock {
                start_minutes: 480,
                end_minutes: 510,
                label: "Home".into(),
                category: None,
            },
            LocationBlock {
                start_minutes: 660,
                end_minutes: 720,
                label: "Office".into(),
                category: None,
            },
        ];
        assert!(commute_blocks(&too_long, &config).is_empty());
    }

    #[test]
    fn haversine_sanity() {
        // Two points ~111m apart along a meridian.
        let d = haversine_meters(37.0, -122.0, 37.001, -122.0);
        assert!((d - 111.0).abs() < 5.0, "distance was {d}");
    }
}
