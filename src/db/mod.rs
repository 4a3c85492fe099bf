//! SQLite persistence.
//!
//! All access goes through a single worker thread owning the connection;
//! callers submit closures over an async bridge. Repositories add their
//! queries as `impl Database` blocks.

pub mod connection;
pub(crate) mod helpers;
mod migrations;
mod repositories;

pub use connection::Database;
