use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{is_missing_schema, parse_datetime, parse_optional_datetime},
};
use crate::models::{EventMeta, ReconciliationEvent};

fn row_to_event(row: &Row) -> Result<ReconciliationEvent> {
    let start_str: String = row.get("start_time")?;
    let end_str: String = row.get("end_time")?;
    let meta_json: String = row.get("meta")?;
    let meta: EventMeta =
        serde_json::from_str(&meta_json).context("failed to parse event meta")?;

    Ok(ReconciliationEvent {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        title: row.get("title")?,
        start: parse_datetime(&start_str, "start_time")?,
        end: parse_datetime(&end_str, "end_time")?,
        meta,
        locked_at: parse_optional_datetime(row.get("locked_at")?, "locked_at")?,
    })
}

impl Database {
    /// All events for a user overlapping `[start, end)`, oldest first.
    /// A database without the events table yet reads as empty.
    pub async fn fetch_events_overlapping(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ReconciliationEvent>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = match conn.prepare(
                "SELECT id, user_id, title, start_time, end_time, meta, locked_at
                 FROM events
                 WHERE user_id = ?1 AND start_time < ?2 AND end_time > ?3
                 ORDER BY start_time ASC",
            ) {
                Ok(stmt) => stmt,
                Err(err) if is_missing_schema(&err) => return Ok(Vec::new()),
                Err(err) => return Err(err.into()),
            };

            let mut rows = stmt.query(params![
                user_id,
                end.to_rfc3339(),
                start.to_rfc3339()
            ])?;
            let mut events = Vec::new();
            while let Some(row) = rows.next()? {
                events.push(row_to_event(row)?);
            }
            Ok(events)
        })
        .await
    }

    /// Insert a derived event if no row with its id exists. Returns true
    /// when the row was actually inserted.
    pub async fn insert_derived_event(&self, event: &ReconciliationEvent) -> Result<bool> {
        let record = event.clone();
        self.execute(move |conn| {
            let meta_json =
                serde_json::to_string(&record.meta).context("failed to serialize event meta")?;
            let now = Utc::now().to_rfc3339();
            let changed = conn
                .execute(
                    "INSERT OR IGNORE INTO events
                         (id, user_id, title, start_time, end_time, source, meta, locked_at, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, ?8)",
                    params![
                        record.id,
                        record.user_id,
                        record.title,
                        record.start.to_rfc3339(),
                        record.end.to_rfc3339(),
                        record.meta.source.as_str(),
                        meta_json,
                        now,
                    ],
                )
                .with_context(|| "failed to insert derived event")?;
            Ok(changed > 0)
        })
        .await
    }

    /// Move an unlocked, pipeline-owned event to new bounds. Returns true
    /// when a row was updated; false means the row was locked, user-owned,
    /// or gone.
    pub async fn update_event_bounds(
        &self,
        event_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<bool> {
        let event_id = event_id.to_string();
        self.execute(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE events
                     SET start_time = ?1, end_time = ?2, updated_at = ?3
                     WHERE id = ?4
                       AND locked_at IS NULL
                       AND source IN ('system', 'evidence', 'derived')",
                    params![
                        start.to_rfc3339(),
                        end.to_rfc3339(),
                        Utc::now().to_rfc3339(),
                        event_id,
                    ],
                )
                .with_context(|| "failed to update event bounds")?;
            Ok(changed > 0)
        })
        .await
    }

    /// Extend an unlocked, pipeline-owned event's end forward. Returns
    /// true when a row was extended.
    pub async fn extend_event_end(&self, event_id: &str, new_end: DateTime<Utc>) -> Result<bool> {
        let event_id = event_id.to_string();
        self.execute(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE events
                     SET end_time = ?1, updated_at = ?2
                     WHERE id = ?3
                       AND locked_at IS NULL
                       AND source IN ('system', 'evidence', 'derived')
                       AND end_time < ?1",
                    params![new_end.to_rfc3339(), Utc::now().to_rfc3339(), event_id],
                )
                .with_context(|| "failed to extend event")?;
            Ok(changed > 0)
        })
        .await
    }

    /// Delete an unlocked, pipeline-owned event. Returns true when a row
    /// was deleted.
    pub async fn delete_event(&self, event_id: &str) -> Result<bool> {
        let event_id = event_id.to_string();
        self.execute(move |conn| {
            let changed = conn
                .execute(
                    "DELETE FROM events
                     WHERE id = ?1
                       AND locked_at IS NULL
                       AND source IN ('system', 'evidence', 'derived')",
                    params![event_id],
                )
                .with_context(|| "failed to delete event")?;
            Ok(changed > 0)
        })
        .await
    }

    /// Remove every unlocked pipeline-owned event overlapping `[start,
    /// end)`, used when reprocessing a day from scratch. User rows and
    /// locked rows survive.
    pub async fn delete_derived_events_in_range(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let changed = conn
                .execute(
                    "DELETE FROM events
                     WHERE user_id = ?1
                       AND start_time < ?2 AND end_time > ?3
                       AND locked_at IS NULL
                       AND source IN ('system', 'evidence', 'derived')",
                    params![user_id, end.to_rfc3339(), start.to_rfc3339()],
                )
                .with_context(|| "failed to delete derived events")?;
            Ok(changed as u64)
        })
        .await
    }

    /// Stamp `locked_at` on every unlocked event that ended inside the
    /// window. Returns the number of rows locked.
    pub async fn lock_events_in_window(
        &self,
        user_id: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        locked_at: DateTime<Utc>,
    ) -> Result<u64> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE events
                     SET locked_at = ?1, updated_at = ?1
                     WHERE user_id = ?2
                       AND locked_at IS NULL
                       AND end_time > ?3 AND end_time <= ?4",
                    params![
                        locked_at.to_rfc3339(),
                        user_id,
                        window_start.to_rfc3339(),
                        window_end.to_rfc3339(),
                    ],
                )
                .with_context(|| "failed to lock events in window")?;
            Ok(changed as u64)
        })
        .await
    }
}
