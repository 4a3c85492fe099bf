//! Ingestion pipeline.
//!
//! Evidence arrives in 30-minute wall-clock windows. Each window run
//! fetches the day's evidence, derives candidate events, diffs them
//! against what is already persisted, applies the resulting operations,
//! and finally locks the window so concurrent or repeated runs become
//! no-ops.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use log::{debug, info, warn};
use uuid::Uuid;

use crate::classify::AppOverride;
use crate::config::ReconcileConfig;
use crate::db::Database;
use crate::derive::{derive_actuals, to_derived_events, DeriveInputs};
use crate::evidence::location::{build_location_blocks, resolve_hourly_locations};
use crate::evidence::minutes_since;
use crate::evidence::screen_time::{build_screen_time_blocks, ScreenTimeInputs};
use crate::interval::clamp_to_day;
use crate::models::{
    AppSession, HealthDaily, HourlyAppUsage, HourlyUsage, LocationSample, PatternSlot,
    ReconciliationEvent, TimeBlock, UserPlace, WindowLock, WindowStats,
};
use crate::reconcile::{compute_reconciliation_ops, ReconcileOps};
use crate::timeline::{build_actual_display_events, event_to_display_block, TimelineInputs};

pub const WINDOW_MINUTES: i64 = 30;

/// Looking back slightly past the window start lets a candidate extend
/// an event that ended at the boundary of the previous window.
const EXTENSION_LOOKBACK_SECS: i64 = 60;

/// Read access to the raw evidence feeds for one user.
#[async_trait]
pub trait EvidenceProvider: Send + Sync {
    async fn screen_time_sessions(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AppSession>>;

    async fn hourly_app_usage(
        &self,
        user_id: &str,
        day_start: DateTime<Utc>,
    ) -> Result<Vec<HourlyAppUsage>>;

    async fn hourly_usage_totals(
        &self,
        user_id: &str,
        day_start: DateTime<Utc>,
    ) -> Result<Vec<HourlyUsage>>;

    async fn location_samples(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LocationSample>>;

    async fn user_places(&self, user_id: &str) -> Result<Vec<UserPlace>>;

    async fn health_daily(
        &self,
        user_id: &str,
        day_start: DateTime<Utc>,
    ) -> Result<Option<HealthDaily>>;

    /// The user's plan for the day, as day-local blocks.
    async fn planned_events(
        &self,
        user_id: &str,
        day_start: DateTime<Utc>,
    ) -> Result<Vec<TimeBlock>>;

    async fn pattern_slots(
        &self,
        user_id: &str,
        day_start: DateTime<Utc>,
    ) -> Result<Vec<PatternSlot>>;

    async fn app_overrides(&self, user_id: &str) -> Result<HashMap<String, AppOverride>>;
}

#[derive(Debug, PartialEq, Eq)]
pub enum WindowOutcome {
    /// The window was already locked, nothing ran.
    Skipped,
    Processed(WindowStats),
}

/// Round down to the enclosing 30-minute window.
pub fn window_bounds(ts: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let rem = ts.timestamp().rem_euclid(WINDOW_MINUTES * 60);
    let start = ts - Duration::seconds(rem);
    (start, start + Duration::minutes(WINDOW_MINUTES))
}

fn day_start_of(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive().and_time(NaiveTime::MIN).and_utc()
}

pub struct ReconcilePipeline<P: EvidenceProvider> {
    db: Database,
    provider: P,
    config: ReconcileConfig,
}

struct DayEvidence {
    sessions: Vec<AppSession>,
    hourly_by_app: Vec<HourlyAppUsage>,
    hourly_totals: Vec<HourlyUsage>,
    location_blocks: Vec<crate::models::LocationBlock>,
    health: Option<HealthDaily>,
    planned: Vec<TimeBlock>,
    patterns: Vec<PatternSlot>,
    overrides: HashMap<String, AppOverride>,
}

impl<P: EvidenceProvider> ReconcilePipeline<P> {
    pub fn new(db: Database, provider: P, config: ReconcileConfig) -> Self {
        Self {
            db,
            provider,
            config,
        }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Reconcile one 30-minute window. Locked windows skip without
    /// touching evidence or storage.
    pub async fn process_window(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<WindowOutcome> {
        let (window_start, window_end) = window_bounds(at);

        if self.db.is_window_locked(user_id, window_start).await? {
            debug!("window {window_start} already locked for {user_id}, skipping");
            return Ok(WindowOutcome::Skipped);
        }

        let day_start = day_start_of(window_start);
        let evidence = self.fetch_day_evidence(user_id, day_start).await?;

        let existing_day = self
            .db
            .fetch_events_overlapping(user_id, day_start, day_start + Duration::days(1))
            .await?;
        let protected = protected_intervals(&existing_day, day_start);

        let candidates = self.derive_candidates(&evidence, day_start, &protected);
        let window_candidates: Vec<_> = candidates
            .into_iter()
            .filter(|d| d.start < window_end && d.end > window_start)
            .collect();

        let fetched = self
            .db
            .fetch_events_overlapping(
                user_id,
                window_start - Duration::seconds(EXTENSION_LOOKBACK_SECS),
                window_end,
            )
            .await?;
        // Rows ending at or before the window start belong to a previous
        // window; they are extension targets only, never delete candidates.
        let (existing, trailing): (Vec<_>, Vec<_>) =
            fetched.into_iter().partition(|e| e.end > window_start);

        let ops = compute_reconciliation_ops(&existing, &trailing, &window_candidates, &self.config);
        let stats = self.apply_ops(user_id, ops).await;

        // Events fully elapsed by the end of this window become immutable.
        if window_end <= Utc::now() {
            self.db
                .lock_events_in_window(user_id, window_start, window_end, Utc::now())
                .await?;
        }

        let lock = WindowLock {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            window_start,
            window_end,
            processed_at: Utc::now(),
            stats,
        };
        if !self.db.try_lock_window(&lock).await? {
            // Another run locked the window while we worked; its result
            // stands and ours already applied idempotently.
            warn!("window {window_start} locked concurrently for {user_id}");
            return Ok(WindowOutcome::Skipped);
        }

        info!(
            "processed window {window_start} for {user_id}: +{} ~{} -{} >{} ({} locked)",
            stats.inserted, stats.updated, stats.deleted, stats.extended, stats.skipped_locked
        );
        Ok(WindowOutcome::Processed(stats))
    }

    /// Rebuild a whole day from scratch: drop every unlocked derived
    /// event and every window lock, then replay every window that has
    /// already opened. Windows still in the future stay unlocked so their
    /// real-time runs happen normally.
    pub async fn reprocess_day(&self, user_id: &str, day: DateTime<Utc>) -> Result<WindowStats> {
        let day_start = day_start_of(day);
        let day_end = day_start + Duration::days(1);
        let replay_end = day_end.min(Utc::now());

        let removed = self
            .db
            .delete_derived_events_in_range(user_id, day_start, day_end)
            .await?;
        let unlocked = self
            .db
            .delete_window_locks_in_range(user_id, day_start, day_end)
            .await?;
        info!("reprocessing {day_start} for {user_id}: cleared {removed} events, {unlocked} locks");

        let mut total = WindowStats::default();
        let mut cursor = day_start;
        while cursor < replay_end {
            if let WindowOutcome::Processed(stats) = self.process_window(user_id, cursor).await? {
                total.absorb(stats);
            }
            cursor += Duration::minutes(WINDOW_MINUTES);
        }
        Ok(total)
    }

    /// Aggregate the per-window reconciliation counts recorded on the
    /// day's window locks. Windows not yet processed contribute nothing.
    pub async fn day_summary(&self, user_id: &str, day: DateTime<Utc>) -> Result<WindowStats> {
        let day_start = day_start_of(day);
        let locks = self
            .db
            .fetch_window_locks(user_id, day_start, day_start + Duration::days(1))
            .await?;

        let mut total = WindowStats::default();
        for lock in &locks {
            total.absorb(lock.stats);
        }
        Ok(total)
    }

    /// The gap-free display timeline for a day, built from persisted
    /// events plus whatever evidence can fill the remaining unknowns.
    pub async fn day_timeline(
        &self,
        user_id: &str,
        day: DateTime<Utc>,
        min_pattern_confidence: f64,
    ) -> Result<Vec<TimeBlock>> {
        let day_start = day_start_of(day);
        let evidence = self.fetch_day_evidence(user_id, day_start).await?;

        let events = self
            .db
            .fetch_events_overlapping(user_id, day_start, day_start + Duration::days(1))
            .await?;
        let committed = events
            .iter()
            .filter_map(|e| event_to_display_block(e, day_start))
            .collect();

        Ok(build_actual_display_events(
            TimelineInputs {
                committed,
                planned: &evidence.planned,
                sessions: &evidence.sessions,
                location_blocks: &evidence.location_blocks,
                health: evidence.health.as_ref(),
                patterns: &evidence.patterns,
                min_pattern_confidence,
                day_start,
            },
            &self.config,
        ))
    }

    async fn fetch_day_evidence(
        &self,
        user_id: &str,
        day_start: DateTime<Utc>,
    ) -> Result<DayEvidence> {
        let day_end = day_start + Duration::days(1);

        let sessions = self
            .provider
            .screen_time_sessions(user_id, day_start, day_end)
            .await
            .context("failed to fetch screen-time sessions")?;
        let hourly_by_app = self
            .provider
            .hourly_app_usage(user_id, day_start)
            .await
            .context("failed to fetch hourly app usage")?;
        let hourly_totals = self
            .provider
            .hourly_usage_totals(user_id, day_start)
            .await
            .context("failed to fetch hourly usage totals")?;
        let samples = self
            .provider
            .location_samples(user_id, day_start, day_end)
            .await
            .context("failed to fetch location samples")?;
        let places = self
            .provider
            .user_places(user_id)
            .await
            .context("failed to fetch user places")?;
        let health = self
            .provider
            .health_daily(user_id, day_start)
            .await
            .context("failed to fetch health summary")?;
        let planned = self
            .provider
            .planned_events(user_id, day_start)
            .await
            .context("failed to fetch planned events")?;
        let patterns = self
            .provider
            .pattern_slots(user_id, day_start)
            .await
            .context("failed to fetch pattern slots")?;
        let overrides = self
            .provider
            .app_overrides(user_id)
            .await
            .context("failed to fetch app overrides")?;

        let hourly = resolve_hourly_locations(&samples, &places, day_start, &self.config);
        let location_blocks = build_location_blocks(&hourly);

        Ok(DayEvidence {
            sessions,
            hourly_by_app,
            hourly_totals,
            location_blocks,
            health,
            planned,
            patterns,
            overrides,
        })
    }

    /// Derive the day's candidate events: planned-actual blocks first,
    /// then screen-time evidence around them.
    fn derive_candidates(
        &self,
        evidence: &DayEvidence,
        day_start: DateTime<Utc>,
        protected: &[(i64, i64)],
    ) -> Vec<crate::models::DerivedEvent> {
        let derive_inputs = DeriveInputs {
            planned: &evidence.planned,
            sessions: &evidence.sessions,
            location_blocks: &evidence.location_blocks,
            health: evidence.health.as_ref(),
            patterns: &evidence.patterns,
            overrides: &evidence.overrides,
        };
        let actuals = derive_actuals(&derive_inputs, day_start, protected, &self.config);

        let mut occupied: Vec<(i64, i64)> = protected.to_vec();
        occupied.extend(
            actuals
                .iter()
                .map(|b| (b.start_minutes, b.end_minutes())),
        );

        let screen_inputs = ScreenTimeInputs {
            sessions: &evidence.sessions,
            hourly_by_app: &evidence.hourly_by_app,
            hourly_totals: &evidence.hourly_totals,
        };
        let screen_blocks = build_screen_time_blocks(
            &screen_inputs,
            day_start,
            &occupied,
            &evidence.overrides,
            &self.config,
        );

        let mut blocks = actuals;
        blocks.extend(screen_blocks);
        to_derived_events(&blocks, day_start)
    }

    /// Apply an operations bundle, re-checking locks at write time. A row
    /// that refuses a mutation was locked or taken over by the user since
    /// the diff, which counts as skipped rather than an error. Storage
    /// failures log and continue so one bad row cannot wedge a window.
    async fn apply_ops(&self, user_id: &str, ops: ReconcileOps) -> WindowStats {
        let mut stats = WindowStats::default();

        for id in &ops.deletes {
            match self.db.delete_event(id).await {
                Ok(true) => stats.deleted += 1,
                Ok(false) => stats.skipped_locked += 1,
                Err(err) => warn!("delete of event {id} failed: {err:#}"),
            }
        }

        for update in &ops.updates {
            match self
                .db
                .update_event_bounds(&update.id, update.start, update.end)
                .await
            {
                Ok(true) => stats.updated += 1,
                Ok(false) => stats.skipped_locked += 1,
                Err(err) => warn!("update of event {} failed: {err:#}", update.id),
            }
        }

        for extension in &ops.extensions {
            match self
                .db
                .extend_event_end(&extension.id, extension.new_end)
                .await
            {
                Ok(true) => stats.extended += 1,
                Ok(false) => stats.skipped_locked += 1,
                Err(err) => warn!("extension of event {} failed: {err:#}", extension.id),
            }
        }

        for derived in &ops.inserts {
            let event = ReconciliationEvent {
                id: derived.source_id.clone(),
                user_id: user_id.to_string(),
                title: derived.title.clone(),
                start: derived.start,
                end: derived.end,
                meta: derived.meta.clone(),
                locked_at: None,
            };
            match self.db.insert_derived_event(&event).await {
                Ok(true) => stats.inserted += 1,
                // Row already present from an earlier run; idempotent.
                Ok(false) => {}
                Err(err) => warn!("insert of event {} failed: {err:#}", event.id),
            }
        }

        stats
    }
}

/// Day-local intervals owned by locked or user-owned events. Derivation
/// routes around these.
fn protected_intervals(events: &[ReconciliationEvent], day_start: DateTime<Utc>) -> Vec<(i64, i64)> {
    events
        .iter()
        .filter(|e| e.is_protected())
        .map(|e| {
            (
                clamp_to_day(minutes_since(day_start, e.start)),
                clamp_to_day(minutes_since(day_start, e.end)),
            )
        })
        .filter(|&(s, e)| e > s)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn window_bounds_floor_to_half_hours() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 4, 9, 17, 42).unwrap();
        let (start, end) = window_bounds(ts);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 3, 4, 9, 30, 0).unwrap());

        let boundary = Utc.with_ymd_and_hms(2024, 3, 4, 9, 30, 0).unwrap();
        let (start, _) = window_bounds(boundary);
        assert_eq!(start, boundary);
    }

    #[test]
    fn day_start_truncates_to_midnight() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 4, 23, 59, 59).unwrap();
        assert_eq!(
            day_start_of(ts),
            Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap()
        );
    }
}
