//! Migration engine services, leaf-first: record store, object store and
//! local files at the bottom; the state machine and batch orchestrator on top.

pub mod batch;
pub mod hashing;
pub mod local_files;
pub mod migration_service;
pub mod object_store;
pub mod record_store;
pub mod remote_key;
pub mod retry;
pub mod scheduler;
pub mod stats;
