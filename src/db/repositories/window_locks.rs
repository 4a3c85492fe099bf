use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::db::{
    connection::Database,
    helpers::{is_missing_schema, parse_datetime, to_i64, to_u64},
};
use crate::models::{WindowLock, WindowStats};

impl Database {
    /// True when the window was already processed for this user. A missing
    /// table reads as unlocked.
    pub async fn is_window_locked(
        &self,
        user_id: &str,
        window_start: DateTime<Utc>,
    ) -> Result<bool> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = match conn.prepare(
                "SELECT 1 FROM window_locks WHERE user_id = ?1 AND window_start = ?2",
            ) {
                Ok(stmt) => stmt,
                Err(err) if is_missing_schema(&err) => return Ok(false),
                Err(err) => return Err(err.into()),
            };
            let locked = stmt
                .exists(params![user_id, window_start.to_rfc3339()])
                .with_context(|| "failed to check window lock")?;
            Ok(locked)
        })
        .await
    }

    /// Record a window as processed. Returns true when this call created
    /// the lock; false means another run already owns the window.
    pub async fn try_lock_window(&self, lock: &WindowLock) -> Result<bool> {
        let record = lock.clone();
        self.execute(move |conn| {
            let changed = conn
                .execute(
                    "INSERT INTO window_locks
                         (id, user_id, window_start, window_end, processed_at,
                          inserted, updated, deleted, extended, skipped_locked)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                     ON CONFLICT(user_id, window_start) DO NOTHING",
                    params![
                        record.id,
                        record.user_id,
                        record.window_start.to_rfc3339(),
                        record.window_end.to_rfc3339(),
                        record.processed_at.to_rfc3339(),
                        to_i64(record.stats.inserted)?,
                        to_i64(record.stats.updated)?,
                        to_i64(record.stats.deleted)?,
                        to_i64(record.stats.extended)?,
                        to_i64(record.stats.skipped_locked)?,
                    ],
                )
                .with_context(|| "failed to insert window lock")?;
            Ok(changed > 0)
        })
        .await
    }

    /// All locks for a user whose window starts inside `[start, end)`.
    pub async fn fetch_window_locks(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<WindowLock>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = match conn.prepare(
                "SELECT id, user_id, window_start, window_end, processed_at,
                        inserted, updated, deleted, extended, skipped_locked
                 FROM window_locks
                 WHERE user_id = ?1 AND window_start >= ?2 AND window_start < ?3
                 ORDER BY window_start ASC",
            ) {
                Ok(stmt) => stmt,
                Err(err) if is_missing_schema(&err) => return Ok(Vec::new()),
                Err(err) => return Err(err.into()),
            };

            let mut rows = stmt.query(params![user_id, start.to_rfc3339(), end.to_rfc3339()])?;
            let mut locks = Vec::new();
            while let Some(row) = rows.next()? {
                let window_start_str: String = row.get("window_start")?;
                let window_end_str: String = row.get("window_end")?;
                let processed_at_str: String = row.get("processed_at")?;
                locks.push(WindowLock {
                    id: row.get("id")?,
                    user_id: row.get("user_id")?,
                    window_start: parse_datetime(&window_start_str, "window_start")?,
                    window_end: parse_datetime(&window_end_str, "window_end")?,
                    processed_at: parse_datetime(&processed_at_str, "processed_at")?,
                    stats: WindowStats {
                        inserted: to_u64(row.get("inserted")?, "inserted")?,
                        updated: to_u64(row.get("updated")?, "updated")?,
                        deleted: to_u64(row.get("deleted")?, "deleted")?,
                        extended: to_u64(row.get("extended")?, "extended")?,
                        skipped_locked: to_u64(row.get("skipped_locked")?, "skipped_locked")?,
                    },
                });
            }
            Ok(locks)
        })
        .await
    }

    /// Drop every lock whose window starts inside `[start, end)`, used
    /// when reprocessing a day. Returns the number of locks removed.
    pub async fn delete_window_locks_in_range(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let changed = conn
                .execute(
                    "DELETE FROM window_locks
                     WHERE user_id = ?1 AND window_start >= ?2 AND window_start < ?3",
                    params![user_id, start.to_rfc3339(), end.to_rfc3339()],
                )
                .with_context(|| "failed to delete window locks")?;
            Ok(changed as u64)
        })
        .await
    }
}
