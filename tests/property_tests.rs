mod common;

use common::{Harness, assert_record_invariants};
use material_migrator::{models::MigrationStatus, services::retry::DEFAULT_MAX_ATTEMPTS};
use proptest::prelude::*;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct Step {
    fail_puts: bool,
    lose_objects: bool,
    advance_minutes: u64,
}

fn step() -> impl Strategy<Value = Step> {
    (any::<bool>(), prop::bool::weighted(0.2), 0u64..30).prop_map(
        |(fail_puts, lose_objects, advance_minutes)| Step {
            fail_puts,
            lose_objects,
            advance_minutes,
        },
    )
}

async fn run_steps(steps: Vec<Step>, files: usize) {
    let h = Harness::new().await;
    let mut contents = Vec::new();
    for i in 0..files {
        let body = format!("material {i}").into_bytes();
        let record = h.add_file(&format!("m{i}.pdf"), &body).await;
        contents.push((record.id, body));
    }
    let orchestrator = h.orchestrator();

    for step in steps {
        h.objects.set_fail_puts(step.fail_puts);
        h.objects.set_lose_objects(step.lose_objects);
        h.advance(Duration::from_secs(step.advance_minutes * 60));
        let summary = orchestrator.run_batch(files as u32).await;
        assert!(summary.succeeded <= summary.attempted);

        for record in h.all().await {
            assert_record_invariants(&record, DEFAULT_MAX_ATTEMPTS);
            assert!(!record.status.is_intermediate(), "left mid-flight: {record:?}");
        }
    }

    for (id, body) in contents {
        let record = h.reload(id).await;
        let local = h.root.join(&record.local_path);
        match record.status {
            MigrationStatus::Completed => {
                let key = record.remote_key.as_deref().unwrap();
                let remote = h.objects.object(key).expect("completed object is stored");
                assert_eq!(remote.as_ref(), body.as_slice());
                assert_eq!(
                    record.content_hash.as_deref(),
                    Some(format!("{:x}", md5::compute(&body)).as_str())
                );
                assert!(!local.exists());
            }
            // Anything not completed still has its local copy.
            _ => assert!(local.exists(), "lost local copy: {record:?}"),
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn records_stay_consistent_under_failure_interleavings(
        steps in prop::collection::vec(step(), 1..8),
        files in 1usize..4,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(run_steps(steps, files));
    }
}
