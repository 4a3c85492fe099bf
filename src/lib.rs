//! Actual-timeline reconciliation engine.
//!
//! Fuses screen-time, location, calendar, and health evidence for a
//! single user-day into one gap-free, non-overlapping timeline of
//! categorized, confidence-scored blocks, persisting the reconciled
//! events in SQLite as evidence arrives in 30-minute windows.

pub mod classify;
pub mod config;
pub mod db;
pub mod derive;
pub mod evidence;
pub mod interval;
pub mod models;
pub mod pipeline;
pub mod reconcile;
pub mod timeline;

pub use config::{FillMode, ReconcileConfig};
pub use db::Database;
pub use models::{Category, ReconciliationEvent, Source, TimeBlock, WindowStats};
pub use pipeline::{EvidenceProvider, ReconcilePipeline, WindowOutcome, WINDOW_MINUTES};
pub use timeline::build_actual_display_events;
