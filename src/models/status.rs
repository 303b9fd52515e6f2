//! Migration lifecycle states.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Lifecycle of a single record.
///
/// `Pending -> InProgress -> BackupCreated -> Verified -> LocalDeleted -> Completed`,
/// with `Retry` and `Failed` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationStatus {
    Pending,
    InProgress,
    BackupCreated,
    Verified,
    LocalDeleted,
    Completed,
    Retry,
    Failed,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown migration status `{0}`")]
pub struct UnknownStatus(pub String);

impl MigrationStatus {
    pub const ALL: [MigrationStatus; 8] = [
        MigrationStatus::Pending,
        MigrationStatus::InProgress,
        MigrationStatus::BackupCreated,
        MigrationStatus::Verified,
        MigrationStatus::LocalDeleted,
        MigrationStatus::Completed,
        MigrationStatus::Retry,
        MigrationStatus::Failed,
    ];

    /// Column representation.
    pub fn as_str(self) -> &'static str {
        match self {
            MigrationStatus::Pending => "PENDING",
            MigrationStatus::InProgress => "IN_PROGRESS",
            MigrationStatus::BackupCreated => "BACKUP_CREATED",
            MigrationStatus::Verified => "VERIFIED",
            MigrationStatus::LocalDeleted => "LOCAL_DELETED",
            MigrationStatus::Completed => "COMPLETED",
            MigrationStatus::Retry => "RETRY",
            MigrationStatus::Failed => "FAILED",
        }
    }

    /// Human-readable label used in logs.
    pub fn description(self) -> &'static str {
        match self {
            MigrationStatus::Pending => "pending",
            MigrationStatus::InProgress => "in progress",
            MigrationStatus::BackupCreated => "backup created",
            MigrationStatus::Verified => "verified",
            MigrationStatus::LocalDeleted => "local file deleted",
            MigrationStatus::Completed => "completed",
            MigrationStatus::Retry => "scheduled for retry",
            MigrationStatus::Failed => "failed",
        }
    }

    /// `Completed` and `Failed` are never selected for another attempt.
    pub fn is_terminal(self) -> bool {
        matches!(self, MigrationStatus::Completed | MigrationStatus::Failed)
    }

    /// States a crashed attempt can be left in.
    pub fn is_intermediate(self) -> bool {
        matches!(
            self,
            MigrationStatus::InProgress
                | MigrationStatus::BackupCreated
                | MigrationStatus::Verified
                | MigrationStatus::LocalDeleted
        )
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MigrationStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MigrationStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}
