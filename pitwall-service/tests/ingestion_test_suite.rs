//! End-to-end ingestion tests over the in-memory backends.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use pitwall_service::{
    deadline::Deadline,
    services::{
        ingestion::{IngestionOutcome, IngestionStats},
        queue::{EventQueue as _, LinearVisibilityTimeout},
        store::RecordStore as _,
        worker::Worker,
    },
};
use pitwall_types::{ConnectionId, DriverId, SubsessionId, events::IngestionJob};

use crate::setup::{TestHarness, drain_frames};

mod setup;

const DRIVER: i64 = 4711;

fn job(notify: Option<&str>) -> IngestionJob {
    IngestionJob {
        driver_id: DriverId::new(DRIVER),
        iracing_access_token: "upstream-access".to_owned(),
        notify_connection_id: notify.map(ConnectionId::new),
    }
}

fn far_deadline() -> Deadline {
    Deadline::after(Duration::from_secs(60))
}

#[tokio::test]
async fn pushes_progress_and_completion() -> eyre::Result<()> {
    let harness = TestHarness::new();
    harness.insert_driver(DRIVER, "Test Driver").await;
    let now = Utc::now();
    // 3 fresh candidates plus 2 that are already in the store
    for i in 0..5 {
        harness.upstream.add_race(
            DriverId::new(DRIVER),
            100 + i,
            now - chrono::Duration::hours(i + 1),
        );
    }
    let first_run = harness
        .engine
        .ingest_races(
            &IngestionJob {
                driver_id: DriverId::new(DRIVER),
                iracing_access_token: "upstream-access".to_owned(),
                notify_connection_id: None,
            },
            far_deadline(),
        )
        .await?;
    assert_eq!(
        first_run,
        IngestionOutcome::Completed(IngestionStats {
            added: 5,
            skipped: 0,
            errors: vec![],
        })
    );
    // now add three more races; the original five dedupe against the store
    for i in 5..8 {
        harness.upstream.add_race(
            DriverId::new(DRIVER),
            100 + i,
            now - chrono::Duration::minutes(i * 7 + 1),
        );
    }

    let mut frames = harness.register_connection("conn-1");
    let outcome = harness
        .engine
        .ingest_races(&job(Some("conn-1")), far_deadline())
        .await?;
    assert_eq!(
        outcome,
        IngestionOutcome::Completed(IngestionStats {
            added: 3,
            skipped: 5,
            errors: vec![],
        })
    );

    let frames = drain_frames(&mut frames);
    let progress: Vec<&serde_json::Value> = frames
        .iter()
        .filter(|(action, _)| action == "ingestion_progress")
        .map(|(_, payload)| payload)
        .collect();
    assert_eq!(progress.len(), 3);
    let mut processed: Vec<u64> = progress
        .iter()
        .map(|payload| payload["processed"].as_u64().unwrap())
        .collect();
    processed.sort_unstable();
    assert_eq!(processed, vec![1, 2, 3]);
    for payload in &progress {
        assert_eq!(payload["total"].as_u64(), Some(3));
        assert!(payload["currentSubsessionID"].as_i64().is_some());
    }

    let complete: Vec<&serde_json::Value> = frames
        .iter()
        .filter(|(action, _)| action == "ingestion_complete")
        .map(|(_, payload)| payload)
        .collect();
    assert_eq!(complete.len(), 1);
    assert_eq!(complete[0]["added"].as_u64(), Some(3));
    assert_eq!(complete[0]["skipped"].as_u64(), Some(5));
    assert_eq!(complete[0]["errorsCount"].as_u64(), Some(0));

    // the lock is released again
    let driver = harness
        .store
        .get_driver(DriverId::new(DRIVER))
        .await?
        .unwrap();
    assert_eq!(driver.ingestion_blocked_until, None);
    Ok(())
}

#[tokio::test]
async fn second_run_over_identical_snapshot_inserts_nothing() -> eyre::Result<()> {
    let harness = TestHarness::new();
    harness.insert_driver(DRIVER, "Test Driver").await;
    let now = Utc::now();
    for i in 0..3 {
        harness.upstream.add_race(
            DriverId::new(DRIVER),
            200 + i,
            now - chrono::Duration::hours(i + 1),
        );
    }

    let first = harness
        .engine
        .ingest_races(&job(None), far_deadline())
        .await?;
    let second = harness
        .engine
        .ingest_races(&job(None), far_deadline())
        .await?;
    assert_eq!(
        first,
        IngestionOutcome::Completed(IngestionStats {
            added: 3,
            skipped: 0,
            errors: vec![],
        })
    );
    assert_eq!(
        second,
        IngestionOutcome::Completed(IngestionStats {
            added: 0,
            skipped: 3,
            errors: vec![],
        })
    );

    let sessions = harness
        .store
        .get_driver_sessions_by_time_range(
            DriverId::new(DRIVER),
            now - chrono::Duration::days(1),
            now,
        )
        .await?;
    assert_eq!(sessions.len(), 3);
    // lap details survived persistence in the upstream unit
    assert_eq!(
        sessions[0].lap_details.map(|lap| lap.best_lap_time),
        Some(Some(801_234))
    );
    Ok(())
}

#[tokio::test]
async fn concurrent_jobs_are_single_flight() -> eyre::Result<()> {
    let harness = TestHarness::new();
    harness.insert_driver(DRIVER, "Test Driver").await;
    let now = Utc::now();
    harness
        .upstream
        .add_race(DriverId::new(DRIVER), 300, now - chrono::Duration::hours(1));

    // park the first job inside discovery so it holds the lock
    let barrier = Arc::new(tokio::sync::Semaphore::new(0));
    *harness.upstream.search_barrier.lock() = Some(Arc::clone(&barrier));

    let engine = Arc::clone(&harness.engine);
    let first = tokio::spawn(async move { engine.ingest_races(&job(None), far_deadline()).await });
    // wait until the first job is inside search (and thus owns the lock)
    while harness
        .upstream
        .search_calls
        .load(std::sync::atomic::Ordering::SeqCst)
        == 0
    {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let mut frames = harness.register_connection("conn-2");
    let second = harness
        .engine
        .ingest_races(&job(Some("conn-2")), far_deadline())
        .await?;
    assert_eq!(second, IngestionOutcome::Busy);
    // the loser made no upstream calls beyond the winner's one search
    assert_eq!(
        harness
            .upstream
            .search_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
    let frames = drain_frames(&mut frames);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].0, "ingestion_busy");

    barrier.add_permits(1);
    let first = first.await??;
    assert!(matches!(first, IngestionOutcome::Completed(_)));
    Ok(())
}

#[tokio::test]
async fn per_subsession_failures_do_not_abort_the_job() -> eyre::Result<()> {
    let harness = TestHarness::new();
    harness.insert_driver(DRIVER, "Test Driver").await;
    let now = Utc::now();
    for i in 0..3 {
        harness.upstream.add_race(
            DriverId::new(DRIVER),
            400 + i,
            now - chrono::Duration::hours(i + 1),
        );
    }
    harness
        .upstream
        .failing_results
        .lock()
        .push(SubsessionId::new(401));

    let mut frames = harness.register_connection("conn-3");
    let outcome = harness
        .engine
        .ingest_races(&job(Some("conn-3")), far_deadline())
        .await?;
    let IngestionOutcome::Completed(stats) = outcome else {
        panic!("expected a completed job");
    };
    assert_eq!(stats.added, 2);
    assert_eq!(stats.errors.len(), 1);

    let frames = drain_frames(&mut frames);
    let complete = frames
        .iter()
        .find(|(action, _)| action == "ingestion_complete")
        .map(|(_, payload)| payload)
        .unwrap();
    assert_eq!(complete["errorsCount"].as_u64(), Some(1));
    Ok(())
}

#[tokio::test]
async fn unauthorized_aborts_and_pushes_error() -> eyre::Result<()> {
    let harness = TestHarness::new();
    harness.insert_driver(DRIVER, "Test Driver").await;
    harness
        .upstream
        .reject_tokens
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let mut frames = harness.register_connection("conn-4");
    let err = harness
        .engine
        .ingest_races(&job(Some("conn-4")), far_deadline())
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());

    let frames = drain_frames(&mut frames);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].0, "ingestion_error");

    // terminal failure still released the lock
    let driver = harness
        .store
        .get_driver(DriverId::new(DRIVER))
        .await?
        .unwrap();
    assert_eq!(driver.ingestion_blocked_until, None);
    Ok(())
}

#[tokio::test]
async fn missing_lap_data_is_optional() -> eyre::Result<()> {
    let harness = TestHarness::new();
    harness.insert_driver(DRIVER, "Test Driver").await;
    let now = Utc::now();
    harness
        .upstream
        .add_race(DriverId::new(DRIVER), 500, now - chrono::Duration::hours(1));
    harness
        .upstream
        .lap_data
        .lock()
        .remove(&SubsessionId::new(500));

    let outcome = harness
        .engine
        .ingest_races(&job(None), far_deadline())
        .await?;
    let IngestionOutcome::Completed(stats) = outcome else {
        panic!("expected a completed job");
    };
    assert_eq!(stats.added, 1);
    let sessions = harness
        .store
        .get_driver_sessions_by_time_range(
            DriverId::new(DRIVER),
            now - chrono::Duration::days(1),
            now,
        )
        .await?;
    assert_eq!(sessions[0].lap_details, None);
    Ok(())
}

#[tokio::test]
async fn gone_broadcast_reaps_connection_records() -> eyre::Result<()> {
    let harness = TestHarness::new();
    let driver_id = DriverId::new(DRIVER);
    let connection_id = ConnectionId::new("stale");
    harness
        .store
        .save_connection(&pitwall_types::ws::WsConnection {
            driver_id,
            connection_id: connection_id.clone(),
            created_at: Utc::now(),
        })
        .await?;
    // no registry entry for "stale": the transport reports it gone
    harness
        .push
        .broadcast(driver_id, "ingestion_complete", serde_json::json!({}))
        .await?;
    let connections = harness.store.get_connections_by_driver(driver_id).await?;
    assert!(connections.is_empty());
    Ok(())
}

#[tokio::test]
async fn worker_acknowledges_finished_jobs() -> eyre::Result<()> {
    let harness = TestHarness::new();
    harness.insert_driver(DRIVER, "Test Driver").await;
    let now = Utc::now();
    harness
        .upstream
        .add_race(DriverId::new(DRIVER), 600, now - chrono::Duration::hours(1));

    let worker = Worker::new(
        harness.queue.clone(),
        Arc::clone(&harness.engine),
        Arc::new(LinearVisibilityTimeout::new(Duration::from_secs(30))),
        Duration::from_secs(60),
        Duration::from_secs(5),
    );
    harness.queue.publish(&job(None)).await?;
    let batch = harness.queue.receive().await?;
    assert_eq!(batch.len(), 1);
    worker.process_message(batch[0].clone()).await;
    assert!(harness.queue.is_empty());
    Ok(())
}

#[tokio::test]
async fn worker_leaves_unauthorized_jobs_for_dead_letter() -> eyre::Result<()> {
    let harness = TestHarness::new();
    harness.insert_driver(DRIVER, "Test Driver").await;
    harness
        .upstream
        .reject_tokens
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let worker = Worker::new(
        harness.queue.clone(),
        Arc::clone(&harness.engine),
        Arc::new(LinearVisibilityTimeout::new(Duration::from_secs(30))),
        Duration::from_secs(60),
        Duration::from_secs(5),
    );
    harness.queue.publish(&job(None)).await?;
    let batch = harness.queue.receive().await?;
    worker.process_message(batch[0].clone()).await;
    // neither deleted nor made visible again
    assert_eq!(harness.queue.len(), 1);
    assert!(harness.queue.receive().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn worker_drops_unparseable_bodies() -> eyre::Result<()> {
    let harness = TestHarness::new();
    let worker = Worker::new(
        harness.queue.clone(),
        Arc::clone(&harness.engine),
        Arc::new(LinearVisibilityTimeout::new(Duration::from_secs(30))),
        Duration::from_secs(60),
        Duration::from_secs(5),
    );
    harness.queue.publish(&job(None)).await?;
    let batch = harness.queue.receive().await?;
    let mut message = batch[0].clone();
    message.body = "not json".to_owned();
    worker.process_message(message).await;
    assert!(harness.queue.is_empty());
    Ok(())
}

#[tokio::test]
async fn worker_requeues_retryable_failures_with_backoff() -> eyre::Result<()> {
    let harness = TestHarness::new();
    harness.insert_driver(DRIVER, "Test Driver").await;

    // a buffer larger than the whole budget fails fast before the handler
    // and takes the retryable path
    let worker = Worker::new(
        harness.queue.clone(),
        Arc::clone(&harness.engine),
        Arc::new(LinearVisibilityTimeout::new(Duration::ZERO)),
        Duration::from_secs(1),
        Duration::from_secs(5),
    );
    harness.queue.publish(&job(None)).await?;
    let batch = harness.queue.receive().await?;
    worker.process_message(batch[0].clone()).await;
    // visibility reset with a zero step makes it receivable again
    let redelivered = harness.queue.receive().await?;
    assert_eq!(redelivered.len(), 1);
    assert_eq!(redelivered[0].approximate_receive_count, "2");
    Ok(())
}
