//! Health evidence: sleep-quality sub-metrics.
//!
//! Health rows never produce standalone timeline blocks; they attach to
//! sleep-category blocks as sub-metrics.

use crate::models::{Category, HealthDaily, SleepMetrics, TimeBlock};

/// Compute sleep sub-metrics with a 0-100 composite quality score.
///
/// Score composition: 40 duration (8h target), 25 deep-sleep share (20%
/// target), 25 REM share (25% target), 10 efficiency.
pub fn sleep_metrics(daily: &HealthDaily) -> SleepMetrics {
    let asleep = daily.asleep_minutes.max(0) as f64;

    let duration_score = (asleep / 480.0).min(1.0) * 40.0;
    let (deep_score, rem_score) = if asleep > 0.0 {
        let deep_ratio = daily.deep_minutes.max(0) as f64 / asleep;
        let rem_ratio = daily.rem_minutes.max(0) as f64 / asleep;
        (
            (deep_ratio / 0.20).min(1.0) * 25.0,
            (rem_ratio / 0.25).min(1.0) * 25.0,
        )
    } else {
        (0.0, 0.0)
    };
    let in_bed = asleep + daily.awake_minutes.max(0) as f64;
    let efficiency_score = if in_bed > 0.0 {
        (asleep / in_bed) * 10.0
    } else {
        0.0
    };

    SleepMetrics {
        asleep_minutes: daily.asleep_minutes,
        deep_minutes: daily.deep_minutes,
        rem_minutes: daily.rem_minutes,
        awake_minutes: daily.awake_minutes,
        avg_heart_rate: daily.avg_heart_rate,
        hrv: daily.hrv,
        quality_score: (duration_score + deep_score + rem_score + efficiency_score)
            .clamp(0.0, 100.0),
    }
}

/// Attach sleep metrics to every sleep-category block in place.
pub fn attach_sleep_metrics(blocks: &mut [TimeBlock], daily: Option<&HealthDaily>) {
    let Some(daily) = daily else { return };
    let metrics = sleep_metrics(daily);
    for block in blocks.iter_mut() {
        if block.category == Category::Sleep {
            block.meta.evidence.sleep = Some(metrics.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solid_night_scores_high() {
        let metrics = sleep_metrics(&HealthDaily {
            asleep_minutes: 480,
            deep_minutes: 100,
            rem_minutes: 120,
            awake_minutes: 10,
            avg_heart_rate: Some(52.0),
            hrv: Some(65.0),
        });
        assert!(metrics.quality_score > 95.0);
    }

    #[test]
    fn short_fragmented_night_scores_low() {
        let metrics = sleep_metrics(&HealthDaily {
            asleep_minutes: 180,
            deep_minutes: 10,
            rem_minutes: 15,
            awake_minutes: 90,
            avg_heart_rate: None,
            hrv: None,
        });
        assert!(metrics.quality_score < 50.0);
    }

    #[test]
    fn zero_sleep_scores_zero() {
        let metrics = sleep_metrics(&HealthDaily {
            asleep_minutes: 0,
            deep_minutes: 0,
            rem_minutes: 0,
            awake_minutes: 0,
            avg_heart_rate: None,
            hrv: None,
        });
        assert_eq!(metrics.quality_score, 0.0);
    }

    #[test]
    fn metrics_attach_only_to_sleep_blocks() {
        use crate::models::{block_id, BlockKind, BlockMeta, Source};
        let mut blocks = vec![
            TimeBlock {
                id: block_id("sleep_schedule", 0, 420, Source::Derived),
                title: "Sleep".into(),
                description: String::new(),
                start_minutes: 0,
                duration: 420,
                category: Category::Sleep,
                location: None,
                is_big3: false,
                meta: BlockMeta::new(Source::Derived, BlockKind::SleepSchedule, 0.7),
            },
            TimeBlock {
                id: block_id("unknown_gap", 420, 480, Source::System),
                title: "Unknown".into(),
                description: String::new(),
                start_minutes: 420,
                duration: 60,
                category: Category::Unknown,
                location: None,
                is_big3: false,
                meta: BlockMeta::new(Source::System, BlockKind::UnknownGap, 0.2),
            },
        ];
        let daily = HealthDaily {
            asleep_minutes: 400,
            deep_minutes: 80,
            rem_minutes: 90,
            awake_minutes: 20,
            avg_heart_rate: None,
            hrv: None,
        };
        attach_sleep_metrics(&mut blocks, Some(&daily));
        assert!(blocks[0].meta.evidence.sleep.is_some());
        assert!(blocks[1].meta.evidence.sleep.is_none());
    }
}
