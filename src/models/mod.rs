//! Core data models for the migration engine.
//!
//! `MigrationRecord` is the unit of work; `MigrationStatus` is its closed
//! lifecycle. Both stay free of storage concerns: the string column and the
//! millisecond timestamps only exist inside the SQLite adapter.

pub mod record;
pub mod stats;
pub mod status;

pub use record::{MigrationRecord, NewRecord};
pub use stats::MigrationStats;
pub use status::MigrationStatus;
