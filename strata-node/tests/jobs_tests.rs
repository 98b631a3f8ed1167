//! Background jobs: sampling, usage monitor, inbox and shutdown.

mod support;

use std::sync::Arc;
use std::time::Duration;

use strata_core::{Measurement, StrataConfig, Tier};
use strata_node::jobs::{monitor_task, sampling_task};
use strata_node::InboundMessage;
use strata_test_utils::assertions::assert_timestamps;
use strata_test_utils::fixtures::stamps;
use strata_test_utils::{RuntimeClock, ScriptedSensor};
use support::{edge_response, harness, harness_with, point_query};
use tokio::sync::watch;

#[tokio::test(start_paused = true)]
async fn test_sampling_task_skips_failed_reads() {
    let h = harness_with(
        StrataConfig::default(),
        ScriptedSensor::new([Ok(20.0), Err("i2c nack".to_string()), Ok(21.0)]),
        Arc::new(RuntimeClock::new(1_000)),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(sampling_task(
        Arc::clone(&h.node),
        Duration::from_secs(20),
        shutdown_rx,
    ));

    // Ticks at 0s, 20s and 40s.
    tokio::time::sleep(Duration::from_secs(45)).await;
    shutdown_tx.send(true).expect("task still listening");
    let metrics = handle.await.expect("task panicked").snapshot();

    assert_eq!(metrics.samples, 2);
    assert_eq!(metrics.sensor_failures, 1);
    assert_eq!(metrics.ingest_errors, 0);

    let cached = h.node.cache().snapshot();
    assert_timestamps(&cached, &[1_000, 1_040]);
    assert_eq!(cached[1].value, 21.0);
    assert!(cached.iter().all(|m| m.tier == Tier::BufferOnly));
}

#[tokio::test(start_paused = true)]
async fn test_sampling_task_stops_when_sender_dropped() {
    let h = harness(StrataConfig::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(sampling_task(
        Arc::clone(&h.node),
        Duration::from_secs(20),
        shutdown_rx,
    ));

    drop(shutdown_tx);
    let metrics = tokio::time::timeout(Duration::from_secs(60), handle)
        .await
        .expect("task should exit")
        .expect("task panicked");
    assert_eq!(metrics.snapshot().samples, 0);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_task_flushes_and_offloads() {
    let config = StrataConfig {
        partition_max_entries: 4,
        ..StrataConfig::default()
    };
    let h = harness(config);
    // Added directly, so only the monitor sees the threshold.
    for ts in stamps(100, 240, 20) {
        h.node.cache().add(Measurement::new(ts, 20.0)).expect("add");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(monitor_task(
        Arc::clone(&h.node),
        Duration::from_secs(30),
        shutdown_rx,
    ));

    tokio::time::sleep(Duration::from_secs(1)).await;
    shutdown_tx.send(true).expect("task still listening");
    let metrics = handle.await.expect("task panicked").snapshot();

    assert_eq!(metrics.cycles, 1);
    assert_eq!(metrics.records_flushed, 5);
    assert_eq!(metrics.offload_passes, 1);
    assert_eq!(metrics.records_offloaded, 5);
    assert_eq!(metrics.errors, 0);
    assert_eq!(h.transport.published_on("esp32/temperature").len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_task_idle_when_under_thresholds() {
    let h = harness(StrataConfig::default());
    h.node.cache().add(Measurement::new(100, 20.0)).expect("add");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(monitor_task(
        Arc::clone(&h.node),
        Duration::from_secs(30),
        shutdown_rx,
    ));

    // Ticks at 0s, 30s and 60s.
    tokio::time::sleep(Duration::from_secs(61)).await;
    shutdown_tx.send(true).expect("task still listening");
    let metrics = handle.await.expect("task panicked").snapshot();

    assert_eq!(metrics.cycles, 3);
    assert_eq!(metrics.records_flushed, 0);
    assert_eq!(metrics.offload_passes, 0);
    assert!(h.transport.published().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_spawned_jobs_move_samples_through_tiers() {
    let h = harness_with(
        StrataConfig::default(),
        ScriptedSensor::of_values((0..10).map(|i| 20.0 + i as f32)),
        Arc::new(RuntimeClock::new(5_000)),
    );
    let jobs = h.node.spawn_jobs();

    // Ten sampling ticks: 0s through 180s.
    tokio::time::sleep(Duration::from_secs(190)).await;
    jobs.shutdown();

    let sampling = jobs.sampling.await.expect("sampling panicked").snapshot();
    let monitor = jobs.monitor.await.expect("monitor panicked").snapshot();
    jobs.inbox.await.expect("inbox panicked");

    assert_eq!(sampling.samples, 10);
    assert!(monitor.cycles >= 7);

    let cached = h.node.cache().snapshot();
    assert_timestamps(&cached, &stamps(5_000, 5_180, 20));
    assert!(cached.iter().all(|m| m.tier == Tier::Persisted));
    assert_eq!(h.node.store().index().expect("index").len(), 10);
}

#[tokio::test]
async fn test_inbox_answers_query_while_edge_response_arrives() {
    let h = harness(StrataConfig::default());
    let mut published = h.transport.subscribe();
    let jobs = h.node.spawn_jobs();

    jobs.inbox_tx
        .send(InboundMessage::new("esp32/query", point_query(8_000, Some("r/inbox"))))
        .await
        .expect("inbox open");

    let reply = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(p) = published.recv().await {
            if p.topic == "edge/measurement/request" {
                let request_id = p.json()["request_id"].as_u64().expect("request_id") as u32;
                jobs.inbox_tx
                    .send(InboundMessage::new(
                        "esp32/measurement/response",
                        edge_response(request_id, 8_000, 17.5),
                    ))
                    .await
                    .expect("inbox open");
            } else if p.topic == "r/inbox" {
                return p.json();
            }
        }
        panic!("transport closed before the reply");
    })
    .await
    .expect("query should be answered before the edge timeout");

    assert_eq!(reply["timestamp"], 8_000);
    assert_eq!(reply["temperature"], 17.5);
    assert_eq!(reply["tier"], 2);

    jobs.shutdown();
    let inbox = jobs.inbox.await.expect("inbox panicked").snapshot();
    jobs.sampling.await.expect("sampling panicked");
    jobs.monitor.await.expect("monitor panicked");

    assert_eq!(inbox.messages, 2);
    assert_eq!(inbox.edge_responses, 1);
    assert_eq!(inbox.queries_dispatched, 1);
    assert_eq!(h.node.cache().find(8_000).map(|m| m.tier), Some(Tier::Offloaded));
}

#[tokio::test]
async fn test_close_fails_in_flight_lookup() {
    let h = harness(StrataConfig::default());
    let mut published = h.transport.subscribe();

    let node = Arc::clone(&h.node);
    let lookup = tokio::spawn(async move { node.engine().locate(123).await });

    let request = published.recv().await.expect("edge request published");
    assert_eq!(request.topic, "edge/measurement/request");
    h.node.close();

    let found = tokio::time::timeout(Duration::from_secs(5), lookup)
        .await
        .expect("close should end the wait")
        .expect("lookup panicked");
    assert!(found.is_none());
    assert_eq!(h.node.edge().pending_count(), 0);
}

#[test]
fn test_node_rejects_invalid_config() {
    use strata_node::{NodePorts, StrataNode};
    use strata_test_utils::{ManualClock, MemoryPartition, RecordingTransport};

    let config = StrataConfig {
        cache_capacity: 0,
        ..StrataConfig::default()
    };
    let result = StrataNode::new(
        config,
        Arc::new(MemoryPartition::default()),
        NodePorts {
            transport: Arc::new(RecordingTransport::new()),
            sensor: Arc::new(ScriptedSensor::default()),
            clock: Arc::new(ManualClock::new(0)),
        },
    );
    assert!(matches!(result, Err(strata_core::StrataError::Config(_))));
}
