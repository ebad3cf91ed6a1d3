// Backlog drain tests
// Load shedding and delivery order across the drain worker, backlog and bus seam

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use exhibit_bus::RecordingPublisher;
use exhibit_core::{BacklogEntry, BacklogId, BacklogStatus, RobotProfile};
use exhibit_server::{plan_shedding, DrainSettings, DrainWorker, MemoryBacklog, StaticProfile};
use proptest::prelude::*;
use serde_json::{json, Map};
use std::sync::Arc;
use std::time::Duration;

fn entry(n: usize) -> BacklogEntry {
    let mut params = Map::new();
    params.insert("direction".to_string(), json!("forward"));
    params.insert("speed".to_string(), json!(n % 100));
    BacklogEntry {
        id: BacklogId(format!("cmd-{}", n)),
        target: "ev3_robot".to_string(),
        command: "move".to_string(),
        params,
        status: BacklogStatus::Pending,
        created_at: Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap() + ChronoDuration::seconds(n as i64),
    }
}

fn settings() -> DrainSettings {
    DrainSettings {
        target: "ev3_robot".to_string(),
        poll_interval: Duration::from_millis(10),
        resync_interval: Duration::from_secs(10),
        high_water: 5,
        retain: 3,
        error_backoff: Duration::from_millis(10),
    }
}

fn worker(backlog: Arc<MemoryBacklog>, publisher: Arc<RecordingPublisher>) -> DrainWorker {
    DrainWorker::new(
        backlog,
        Arc::new(StaticProfile::new(Some(RobotProfile::default()))),
        publisher,
        settings(),
    )
}

proptest! {
    #[test]
    fn test_shedding_keeps_newest(pending in 0usize..40, high_water in 1usize..10, retain_seed in 1usize..10) {
        let retain = retain_seed.min(high_water);
        let entries: Vec<BacklogEntry> = (0..pending).map(entry).collect();
        let plan = plan_shedding(entries, high_water, retain);

        if pending > high_water {
            prop_assert_eq!(plan.skip.len(), pending - retain);
            prop_assert_eq!(plan.keep.len(), retain);
            let expected: Vec<BacklogId> = (pending - retain..pending)
                .map(|n| BacklogId(format!("cmd-{}", n)))
                .collect();
            let kept: Vec<BacklogId> = plan.keep.iter().map(|e| e.id.clone()).collect();
            prop_assert_eq!(kept, expected);
        } else {
            prop_assert!(plan.skip.is_empty());
            prop_assert_eq!(plan.keep.len(), pending);
        }
    }

    #[test]
    fn test_shedding_partitions_input_in_order(pending in 0usize..40, high_water in 1usize..10) {
        let entries: Vec<BacklogEntry> = (0..pending).map(entry).collect();
        let plan = plan_shedding(entries.clone(), high_water, 1);
        let rejoined: Vec<BacklogEntry> = plan.skip.into_iter().chain(plan.keep).collect();
        prop_assert_eq!(rejoined, entries);
    }
}

#[tokio::test]
async fn test_burst_of_commands_is_shed_to_the_newest() {
    let backlog = Arc::new(MemoryBacklog::new());
    for n in 0..8 {
        backlog.insert(entry(n));
    }
    let publisher = Arc::new(RecordingPublisher::new());
    let mut worker = worker(backlog.clone(), publisher.clone());

    let report = worker.run_cycle().await.unwrap();
    assert_eq!(report.skipped, 5);
    assert_eq!(report.completed, 3);
    assert_eq!(
        publisher.commands_for("ev3_robot"),
        vec!["move:forward:5", "move:forward:6", "move:forward:7"]
    );

    for n in 0..5 {
        assert_eq!(
            backlog.status_of(&BacklogId(format!("cmd-{}", n))),
            Some(BacklogStatus::Skipped)
        );
    }
}

#[tokio::test]
async fn test_small_backlog_is_delivered_in_full() {
    let backlog = Arc::new(MemoryBacklog::new());
    for n in 0..4 {
        backlog.insert(entry(n));
    }
    let publisher = Arc::new(RecordingPublisher::new());
    let report = worker(backlog.clone(), publisher.clone()).run_cycle().await.unwrap();

    assert_eq!(report.skipped, 0);
    assert_eq!(report.completed, 4);
    assert!(backlog
        .entries()
        .iter()
        .all(|e| e.status == BacklogStatus::Completed));
}

#[tokio::test]
async fn test_lost_link_leaves_backlog_pending() {
    let backlog = Arc::new(MemoryBacklog::new());
    for n in 0..3 {
        backlog.insert(entry(n));
    }
    let publisher = Arc::new(RecordingPublisher::new());
    publisher.set_connected(false);
    let mut worker = worker(backlog.clone(), publisher.clone());

    let report = worker.run_cycle().await.unwrap();
    assert!(report.publish_failed);
    assert_eq!(report.completed, 0);
    assert!(backlog
        .entries()
        .iter()
        .all(|e| e.status == BacklogStatus::Pending));

    publisher.set_connected(true);
    let report = worker.run_cycle().await.unwrap();
    assert_eq!(report.completed, 3);
}

#[tokio::test]
async fn test_worker_loop_drains_until_shutdown() {
    let backlog = Arc::new(MemoryBacklog::new());
    backlog.enqueue("ev3_robot", "stop", Map::new());
    let publisher = Arc::new(RecordingPublisher::new());
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let task = tokio::spawn(worker(backlog.clone(), publisher.clone()).run(shutdown_rx));
    tokio::time::timeout(Duration::from_secs(5), async {
        while publisher.commands_for("ev3_robot").is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();

    assert_eq!(publisher.commands_for("ev3_robot"), vec!["stop"]);
    assert!(publisher.messages().iter().any(|m| m.topic == "robot/config" && m.retained));
}
