//! Background migration of material files from local disk to object storage.
//!
//! Records are selected by the [`services::batch::BatchOrchestrator`], moved
//! one at a time by the [`services::migration_service::MigrationService`]
//! state machine, and rescheduled with exponential backoff on failure by the
//! [`services::retry::RetryPolicy`].

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
