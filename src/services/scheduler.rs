//! Periodic trigger for the batch orchestrator.
//!
//! Each tick awaits the previous batch, so runs never overlap; ticks missed
//! while a batch was running are skipped, not queued.

use crate::services::batch::BatchOrchestrator;
use std::{future::Future, time::Duration};
use tokio::time::{MissedTickBehavior, interval};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub enabled: bool,
    pub interval: Duration,
    pub batch_size: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(5 * 60),
            batch_size: 10,
        }
    }
}

/// Run batches until `shutdown` resolves. Returns the number of batches run.
pub async fn run<F>(
    orchestrator: &BatchOrchestrator,
    settings: SchedulerSettings,
    shutdown: F,
) -> u64
where
    F: Future<Output = ()>,
{
    if !settings.enabled {
        info!("migration scheduler disabled");
        shutdown.await;
        return 0;
    }

    info!(
        interval_secs = settings.interval.as_secs(),
        batch_size = settings.batch_size,
        "migration scheduler started"
    );

    let mut ticker = interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    let mut runs = 0;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                info!("starting migration batch");
                orchestrator.run_batch(settings.batch_size).await;
                runs += 1;
            }
        }
    }

    info!(runs, "migration scheduler stopped");
    runs
}
