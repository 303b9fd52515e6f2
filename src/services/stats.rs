//! Statistics surface. Counts are read from the record store on demand.

use crate::{
    models::{MigrationStats, MigrationStatus},
    services::record_store::{RecordStore, RecordStoreResult},
};

pub async fn collect(records: &dyn RecordStore) -> RecordStoreResult<MigrationStats> {
    let total = records.count().await?;
    let pending = records.count_by_status(MigrationStatus::Pending).await?;
    let in_progress = records.count_by_status(MigrationStatus::InProgress).await?;
    let completed = records.count_by_status(MigrationStatus::Completed).await?;
    let failed = records.count_by_status(MigrationStatus::Failed).await?;
    let retry = records.count_by_status(MigrationStatus::Retry).await?;

    Ok(MigrationStats::new(
        total,
        pending,
        in_progress,
        completed,
        failed,
        retry,
    ))
}
