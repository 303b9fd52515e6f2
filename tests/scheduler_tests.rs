mod common;

use common::Harness;
use material_migrator::{
    models::MigrationStatus,
    services::scheduler::{self, SchedulerSettings},
};
use std::time::Duration;

#[tokio::test]
async fn scheduler_runs_batches_until_shutdown() {
    let h = Harness::new().await;
    let record = h.add_file("queued.txt", b"queued").await;
    let orchestrator = h.orchestrator();

    let settings = SchedulerSettings {
        enabled: true,
        interval: Duration::from_millis(20),
        batch_size: 5,
    };
    let runs = scheduler::run(&orchestrator, settings, async {
        tokio::time::sleep(Duration::from_millis(110)).await;
    })
    .await;

    // The first tick fires immediately.
    assert!(runs >= 2, "only {runs} runs");
    assert_eq!(h.reload(record.id).await.status, MigrationStatus::Completed);
}

#[tokio::test]
async fn disabled_scheduler_never_runs() {
    let h = Harness::new().await;
    let record = h.add_file("idle.txt", b"idle").await;
    let orchestrator = h.orchestrator();

    let settings = SchedulerSettings {
        enabled: false,
        ..SchedulerSettings::default()
    };
    let runs = scheduler::run(&orchestrator, settings, async {
        tokio::time::sleep(Duration::from_millis(30)).await;
    })
    .await;

    assert_eq!(runs, 0);
    assert_eq!(h.reload(record.id).await.status, MigrationStatus::Pending);
}
