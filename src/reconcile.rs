//! Reconciliation engine.
//!
//! Diffs existing persisted events against freshly derived candidates and
//! produces an operations bundle. Pure data in, pure data out: the
//! executor in `pipeline` applies the bundle against storage. Locked and
//! user-edited events are never mutated, and the sub-lists are
//! independent and order-insensitive.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::config::ReconcileConfig;
use crate::models::{DerivedEvent, ReconciliationEvent};

#[derive(Debug, Clone, PartialEq)]
pub struct EventUpdate {
    pub id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Update only the end timestamp of an event from a previous ingestion
/// window, avoiding fragmentation of one continuous activity.
#[derive(Debug, Clone, PartialEq)]
pub struct EventExtension {
    pub id: String,
    pub new_end: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ReconcileOps {
    pub inserts: Vec<DerivedEvent>,
    pub updates: Vec<EventUpdate>,
    pub deletes: Vec<String>,
    pub extensions: Vec<EventExtension>,
    pub protected_ids: Vec<String>,
}

impl ReconcileOps {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty()
            && self.updates.is_empty()
            && self.deletes.is_empty()
            && self.extensions.is_empty()
    }
}

fn overlaps_abs(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && b_start < a_end
}

/// Compute the operations that reconcile `existing` with `derived`,
/// matching by the stable source id in each event's meta.
///
/// `existing` holds the rows inside the window being reconciled; only
/// those are eligible for update or deletion. `trailing` holds rows from
/// the lookback just before the window: they suppress duplicate inserts
/// and serve as trailing-edge extension targets, but an event that ended
/// before the window opened is never this window's to delete.
pub fn compute_reconciliation_ops(
    existing: &[ReconciliationEvent],
    trailing: &[ReconciliationEvent],
    derived: &[DerivedEvent],
    config: &ReconcileConfig,
) -> ReconcileOps {
    let mut ops = ReconcileOps::default();

    let existing_by_source: HashMap<&str, &ReconciliationEvent> = existing
        .iter()
        .chain(trailing)
        .filter_map(|e| e.meta.source_id.as_deref().map(|sid| (sid, e)))
        .collect();
    let derived_ids: HashSet<&str> = derived.iter().map(|d| d.source_id.as_str()).collect();

    // Existing side: matched events update in place, stale derived rows
    // whose evidence disappeared are deleted, protected rows are left
    // alone and reported.
    for event in existing {
        let matched = event
            .meta
            .source_id
            .as_deref()
            .map(|sid| derived_ids.contains(sid))
            .unwrap_or(false);

        if matched {
            if event.is_protected() {
                ops.protected_ids.push(event.id.clone());
                continue;
            }
            let candidate = event
                .meta
                .source_id
                .as_deref()
                .and_then(|sid| derived.iter().find(|d| d.source_id == sid));
            if let Some(candidate) = candidate {
                if candidate.start != event.start || candidate.end != event.end {
                    ops.updates.push(EventUpdate {
                        id: event.id.clone(),
                        start: candidate.start,
                        end: candidate.end,
                    });
                }
            }
        } else {
            if event.meta.source.is_user_owned() {
                continue;
            }
            if event.is_locked() {
                ops.protected_ids.push(event.id.clone());
                continue;
            }
            ops.deletes.push(event.id.clone());
        }
    }

    // Derived side: unmatched candidates either extend a trailing event
    // from the previous window or insert fresh, unless they contend with
    // a protected event.
    let mut already_extended: HashSet<String> = HashSet::new();
    for candidate in derived {
        if existing_by_source.contains_key(candidate.source_id.as_str()) {
            continue;
        }

        if let Some(target) = extension_target(existing, trailing, candidate, &already_extended, config) {
            already_extended.insert(target.id.clone());
            ops.extensions.push(EventExtension {
                id: target.id.clone(),
                new_end: candidate.end,
            });
            continue;
        }

        let contested = existing.iter().chain(trailing).any(|event| {
            event.is_protected() && overlaps_abs(candidate.start, candidate.end, event.start, event.end)
        });
        if contested {
            // Protected events win non-overlap contention outright.
            continue;
        }

        ops.inserts.push(candidate.clone());
    }

    ops
}

/// An unlocked, non-user event with the same app/activity key whose end
/// lands within the trailing-edge tolerance of the candidate's start.
fn extension_target<'a>(
    existing: &'a [ReconciliationEvent],
    trailing: &'a [ReconciliationEvent],
    candidate: &DerivedEvent,
    already_extended: &HashSet<String>,
    config: &ReconcileConfig,
) -> Option<&'a ReconciliationEvent> {
    let app_key = candidate.meta.app_key.as_deref()?;
    existing.iter().chain(trailing).find(|event| {
        !event.is_locked()
            && !event.meta.source.is_user_owned()
            && !already_extended.contains(&event.id)
            && event.meta.app_key.as_deref() == Some(app_key)
            && event.end <= candidate.end
            && (candidate.start - event.end)
                .num_seconds()
                .abs()
                <= config.extension_tolerance_secs
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BlockKind, EventMeta, Source};
    use chrono::TimeZone;

    fn ts(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap() + chrono::Duration::minutes(minutes)
    }

    fn meta(source: Source, source_id: Option<&str>) -> EventMeta {
        EventMeta {
            source,
            kind: BlockKind::PlannedActual { conflicts: vec![] },
            category: crate::models::Category::Work,
            confidence: 0.8,
            source_id: source_id.map(|s| s.to_string()),
            app_key: None,
        }
    }

    fn existing(
        id: &str,
        source: Source,
        source_id: Option<&str>,
        start: i64,
        end: i64,
        locked: bool,
    ) -> ReconciliationEvent {
        ReconciliationEvent {
            id: id.to_string(),
            user_id: "u1".to_string(),
            title: id.to_string(),
            start: ts(start),
            end: ts(end),
            meta: meta(source, source_id),
            locked_at: locked.then(|| ts(0)),
        }
    }

    fn candidate(source_id: &str, start: i64, end: i64) -> DerivedEvent {
        DerivedEvent {
            source_id: source_id.to_string(),
            title: source_id.to_string(),
            start: ts(start),
            end: ts(end),
            meta: meta(Source::Derived, Some(source_id)),
        }
    }

    #[test]
    fn locked_event_is_inviolable() {
        let config = ReconcileConfig::default();
        let rows = vec![existing("e1", Source::Derived, Some("X"), 600, 630, true)];
        let cands = vec![candidate("X", 600, 660)];
        let ops = compute_reconciliation_ops(&rows, &[], &cands, &config);
        assert!(ops.updates.is_empty());
        assert!(ops.deletes.is_empty());
        assert_eq!(ops.protected_ids, vec!["e1".to_string()]);
    }

    #[test]
    fn matched_event_with_changed_bounds_updates() {
        let config = ReconcileConfig::default();
        let rows = vec![existing("e1", Source::Derived, Some("X"), 600, 630, false)];
        let cands = vec![candidate("X", 600, 660)];
        let ops = compute_reconciliation_ops(&rows, &[], &cands, &config);
        assert_eq!(ops.updates.len(), 1);
        assert_eq!(ops.updates[0].id, "e1");
        assert_eq!(ops.updates[0].end, ts(660));
        assert!(ops.inserts.is_empty());
    }

    #[test]
    fn matched_event_with_identical_bounds_is_a_noop() {
        let config = ReconcileConfig::default();
        let rows = vec![existing("e1", Source::Derived, Some("X"), 600, 630, false)];
        let cands = vec![candidate("X", 600, 630)];
        let ops = compute_reconciliation_ops(&rows, &[], &cands, &config);
        assert!(ops.is_empty());
    }

    #[test]
    fn stale_derived_event_is_deleted() {
        let config = ReconcileConfig::default();
        let rows = vec![existing("e1", Source::Derived, Some("X"), 600, 630, false)];
        let ops = compute_reconciliation_ops(&rows, &[], &[], &config);
        assert_eq!(ops.deletes, vec!["e1".to_string()]);
    }

    #[test]
    fn user_edited_events_are_never_deleted_or_overlapped() {
        let config = ReconcileConfig::default();
        let rows = vec![existing("e1", Source::User, None, 600, 660, false)];
        let cands = vec![candidate("Y", 630, 700)];
        let ops = compute_reconciliation_ops(&rows, &[], &cands, &config);
        assert!(ops.deletes.is_empty());
        // Overlapping candidate silently dropped.
        assert!(ops.inserts.is_empty());
    }

    #[test]
    fn unmatched_candidate_inserts() {
        let config = ReconcileConfig::default();
        let cands = vec![candidate("Y", 630, 700)];
        let ops = compute_reconciliation_ops(&[], &[], &cands, &config);
        assert_eq!(ops.inserts.len(), 1);
        assert_eq!(ops.inserts[0].source_id, "Y");
    }

    #[test]
    fn trailing_edge_extension_instead_of_insert() {
        let config = ReconcileConfig::default();
        let mut row = existing("e1", Source::Derived, Some("X"), 570, 600, false);
        row.meta.app_key = Some("com.apple.mail".to_string());
        let mut cand = candidate("Y", 600, 630);
        cand.meta.app_key = Some("com.apple.mail".to_string());

        let ops = compute_reconciliation_ops(&[row], &[], &[cand], &config);
        assert!(ops.inserts.is_empty());
        assert_eq!(ops.extensions.len(), 1);
        assert_eq!(ops.extensions[0].id, "e1");
        assert_eq!(ops.extensions[0].new_end, ts(630));
    }

    #[test]
    fn no_extension_past_tolerance_or_for_locked_targets() {
        let config = ReconcileConfig::default();
        let mut far = existing("e1", Source::Derived, Some("X"), 500, 550, false);
        far.meta.app_key = Some("com.apple.mail".to_string());
        let mut cand = candidate("Y", 600, 630);
        cand.meta.app_key = Some("com.apple.mail".to_string());
        let ops = compute_reconciliation_ops(&[far], &[], &[cand.clone()], &config);
        assert_eq!(ops.inserts.len(), 1);
        assert!(ops.extensions.is_empty());

        let mut locked = existing("e2", Source::Derived, Some("X"), 570, 600, true);
        locked.meta.app_key = Some("com.apple.mail".to_string());
        let ops = compute_reconciliation_ops(&[locked], &[], &[cand], &config);
        // Locked target cannot extend; candidate overlaps nothing, so it
        // inserts.
        assert!(ops.extensions.is_empty());
        assert_eq!(ops.inserts.len(), 1);
    }

    #[test]
    fn lookback_row_ending_at_window_boundary_is_not_deleted() {
        // A derived event from the previous window that ends exactly where
        // this window begins shows up in the lookback fetch with no
        // matching candidate. It belongs to the prior window and must be
        // left alone.
        let config = ReconcileConfig::default();
        let prior = vec![existing("e1", Source::Derived, Some("X"), 480, 540, false)];
        let ops = compute_reconciliation_ops(&[], &prior, &[], &config);
        assert!(ops.deletes.is_empty());
        assert!(ops.is_empty());
    }

    #[test]
    fn candidate_matching_a_lookback_row_does_not_reinsert() {
        let config = ReconcileConfig::default();
        let prior = vec![existing("e1", Source::Derived, Some("X"), 480, 540, false)];
        let cands = vec![candidate("X", 480, 540)];
        let ops = compute_reconciliation_ops(&[], &prior, &cands, &config);
        assert!(ops.inserts.is_empty());
        assert!(ops.deletes.is_empty());
    }

    #[test]
    fn user_adjusted_event_with_matching_source_is_not_updated() {
        // An actual-adjust row keeps the derived source id but is
        // user-owned, so a re-derivation with different bounds must not
        // touch it even while unlocked.
        let config = ReconcileConfig::default();
        let rows = vec![existing("e1", Source::ActualAdjust, Some("X"), 600, 640, false)];
        let cands = vec![candidate("X", 600, 660)];
        let ops = compute_reconciliation_ops(&rows, &[], &cands, &config);
        assert!(ops.updates.is_empty());
        assert_eq!(ops.protected_ids, vec!["e1".to_string()]);
    }
}
