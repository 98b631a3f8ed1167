//! End-to-end behavior of a wired node: ingestion, tier movement and
//! lookups across cache, persistent tier and edge peer.

mod support;

use std::collections::HashMap;

use strata_core::{Measurement, StrataConfig, Tier};
use strata_node::{QuerySource, RouteOutcome};
use strata_test_utils::assertions::{assert_persisted_and_indexed, assert_timestamps};
use strata_test_utils::fixtures::stamps;
use support::{edge_response, harness, spawn_edge_peer};

fn reading(ts: u32) -> Measurement {
    Measurement::new(ts, ts as f32 / 10.0)
}

// ============================================================================
// INGESTION
// ============================================================================

#[tokio::test]
async fn test_flush_triggers_once_cache_reaches_threshold() {
    let h = harness(StrataConfig::default());
    let cache = h.node.cache();

    for ts in stamps(20, 140, 20) {
        let outcome = h.node.ingest(reading(ts)).await.expect("ingest");
        assert!(outcome.flush.is_none(), "no flush expected at {}", ts);
    }
    assert_eq!(cache.len(), 7);
    assert!(!cache.is_threshold_full(80));

    let outcome = h.node.ingest(reading(160)).await.expect("ingest");
    let flush = outcome.flush.expect("eighth reading crosses the threshold");
    assert_eq!(flush.persisted, 5);
    assert_eq!(flush.failed, 0);
    assert!(outcome.offload.is_none());

    for ts in stamps(20, 100, 20) {
        assert_persisted_and_indexed(h.node.store(), ts);
        assert_eq!(cache.find(ts).map(|m| m.tier), Some(Tier::Persisted));
    }
    assert_eq!(cache.find(120).map(|m| m.tier), Some(Tier::BufferOnly));
    assert_eq!(cache.len(), 8);

    // The ninth reading flushes what the first pass left behind.
    let outcome = h.node.ingest(reading(180)).await.expect("ingest");
    let flush = outcome.flush.expect("still over threshold");
    assert_eq!(flush.skipped, 5);
    assert_eq!(flush.persisted, 4);
}

#[tokio::test]
async fn test_eviction_keeps_occupancy_and_spills_oldest() {
    let config = StrataConfig {
        flush_threshold_pct: 100,
        ..StrataConfig::default()
    };
    let h = harness(config);
    let cache = h.node.cache();

    // Full at 10 with a 100% threshold: the tenth ingest flushes five.
    for ts in stamps(1, 10, 1) {
        h.node.ingest(reading(ts)).await.expect("ingest");
    }
    assert_eq!(cache.len(), 10);

    let outcome = h.node.ingest(reading(11)).await.expect("ingest");
    let evicted = outcome.evicted.expect("cache was full");
    assert_eq!(evicted.timestamp, 1);
    assert_eq!(evicted.tier, Tier::Persisted);
    assert_eq!(cache.len(), 10);
    assert!(cache.find(1).is_none());
    assert_persisted_and_indexed(h.node.store(), 1);
}

#[tokio::test]
async fn test_eviction_spills_unflushed_record() {
    // Threshold never reached before eviction, so the oldest is still
    // buffer-only when it leaves.
    let config = StrataConfig {
        cache_capacity: 4,
        flush_threshold_pct: 100,
        ..StrataConfig::default()
    };
    let h = harness(config);
    let cache = h.node.cache();

    for ts in [10, 20, 30] {
        h.node.ingest(reading(ts)).await.expect("ingest");
    }
    // Fill the last slot directly so no flush runs.
    cache.add(reading(40)).expect("add");
    assert!(h.node.store().index().expect("index").is_empty());

    let outcome = h.node.ingest(reading(50)).await.expect("ingest");
    let evicted = outcome.evicted.expect("cache was full");
    assert_eq!(evicted.timestamp, 10);
    assert_eq!(evicted.tier, Tier::Persisted);
    assert_eq!(
        h.node.store().get(10).expect("read"),
        Some(reading(10).with_tier(Tier::Persisted))
    );
}

#[tokio::test]
async fn test_flush_that_fills_store_offloads_reactively() {
    let config = StrataConfig {
        partition_max_entries: 4,
        ..StrataConfig::default()
    };
    let h = harness(config);

    let mut last = None;
    for ts in stamps(100, 240, 20) {
        last = Some(h.node.ingest(reading(ts)).await.expect("ingest"));
    }
    let outcome = last.expect("eight readings ingested");
    assert_eq!(outcome.flush.map(|f| f.persisted), Some(5));

    let offload = outcome.offload.expect("five records plus the index is over 80%");
    assert_eq!(offload.offloaded, 5);
    assert_eq!(offload.skipped, 0);
    assert_eq!(offload.retired, stamps(100, 180, 20));

    let published = h.transport.published_on("esp32/temperature");
    assert_eq!(published.len(), 5);
    assert_eq!(published[0].json()["timestamp"], 100);
    assert_eq!(published[0].json()["temperature"], 10.0);

    let store = h.node.store();
    assert!(store.index().expect("index").is_empty());
    for ts in stamps(100, 180, 20) {
        assert!(!store.contains(ts).expect("read"));
        assert_eq!(h.node.cache().find(ts).map(|m| m.tier), Some(Tier::Offloaded));
    }
    assert!(store.usage_percent().expect("usage") < 80);
}

#[tokio::test]
async fn test_offload_publish_failure_keeps_records() {
    let config = StrataConfig {
        partition_max_entries: 4,
        ..StrataConfig::default()
    };
    let h = harness(config);
    h.transport.fail_when(|topic, _| topic == "esp32/temperature");

    let mut last = None;
    for ts in stamps(100, 240, 20) {
        last = Some(h.node.ingest(reading(ts)).await.expect("ingest"));
    }
    let offload = last
        .and_then(|o| o.offload)
        .expect("offload still attempted");
    assert_eq!(offload.offloaded, 0);
    assert_eq!(offload.skipped, 5);

    for ts in stamps(100, 180, 20) {
        assert_persisted_and_indexed(h.node.store(), ts);
    }

    // The monitor's next pass flushes the remaining three and delivers
    // everything.
    h.transport.stop_failing();
    let report = h.node.run_maintenance().await;
    assert_eq!(report.flush.map(|f| f.persisted), Some(3));
    assert_eq!(report.offload.map(|o| o.offloaded), Some(8));
    assert!(h.node.store().index().expect("index").is_empty());
}

#[tokio::test]
async fn test_failed_spill_rejects_ingest() {
    let config = StrataConfig {
        cache_capacity: 2,
        flush_threshold_pct: 100,
        ..StrataConfig::default()
    };
    let h = harness(config);
    h.node.cache().add(reading(1)).expect("add");
    h.node.cache().add(reading(2)).expect("add");

    h.partition.set_fail_commits(true);
    let result = h.node.ingest(reading(3)).await;
    assert!(matches!(result, Err(strata_core::StrataError::Storage(_))));
    assert_timestamps(&h.node.cache().snapshot(), &[1, 2]);
}

// ============================================================================
// POINT LOOKUPS
// ============================================================================

#[tokio::test]
async fn test_point_lookup_from_persistent_tier_promotes() {
    let h = harness(StrataConfig::default());
    h.node
        .store()
        .put_indexed(&reading(500))
        .expect("seed store");

    let (found, source) = h.node.engine().locate(500).await.expect("persisted");
    assert_eq!(source, QuerySource::Persistent);
    assert_eq!(found.value, 50.0);
    assert_eq!(found.tier, Tier::Persisted);

    assert_eq!(h.node.cache().find(500), Some(found));
    let (_, source) = h.node.engine().locate(500).await.expect("cached now");
    assert_eq!(source, QuerySource::Cache);
}

#[tokio::test(start_paused = true)]
async fn test_edge_timeout_returns_not_found_and_ignores_late_response() {
    let h = harness(StrataConfig::default());

    let started = tokio::time::Instant::now();
    assert!(h.node.engine().locate(9_000).await.is_none());
    assert!(started.elapsed() >= std::time::Duration::from_millis(10_000));

    let requests = h.transport.published_on("edge/measurement/request");
    assert_eq!(requests.len(), 1);
    let request = requests[0].json();
    assert_eq!(request["action"], "get_measurement");
    assert_eq!(request["timestamp"], 9_000);
    let request_id = request["request_id"].as_u64().expect("request_id") as u32;

    assert_eq!(h.node.edge().pending_count(), 0);
    assert_eq!(h.node.edge().stats().timeouts, 1);

    let outcome = h
        .node
        .handle_message(
            "esp32/measurement/response",
            &edge_response(request_id, 9_000, 21.0),
        )
        .await;
    assert!(matches!(
        outcome,
        RouteOutcome::EdgeResponse(strata_edge::ResponseDisposition::Unmatched { .. })
    ));
    assert!(h.node.cache().is_empty());
    assert!(!h.node.store().contains(9_000).expect("read"));
}

#[tokio::test]
async fn test_edge_recovery_writes_back_and_caches() {
    let h = harness(StrataConfig::default());
    let peer = spawn_edge_peer(&h, HashMap::from([(7_000, 19.5)]));

    let (found, source) = h.node.engine().locate(7_000).await.expect("edge has it");
    assert_eq!(source, QuerySource::Edge);
    assert_eq!(found.value, 19.5);
    assert_eq!(found.tier, Tier::Offloaded);

    assert_persisted_and_indexed(h.node.store(), 7_000);
    let stored = h.node.store().get(7_000).expect("read").expect("written back");
    assert_eq!(stored.tier, Tier::Persisted);
    assert_eq!(h.node.cache().find(7_000).map(|m| m.tier), Some(Tier::Offloaded));

    // Served locally from now on.
    let (_, source) = h.node.engine().locate(7_000).await.expect("cached");
    assert_eq!(source, QuerySource::Cache);
    assert_eq!(h.transport.published_on("edge/measurement/request").len(), 1);
    assert_eq!(h.node.edge().stats().matched, 1);

    peer.abort();
}

// ============================================================================
// RANGE LOOKUPS
// ============================================================================

#[tokio::test]
async fn test_covered_range_served_from_cache_without_store_reads() {
    let h = harness(StrataConfig::default());
    for ts in stamps(80, 220, 20) {
        h.node.cache().add(reading(ts)).expect("add");
    }
    h.partition.reset_counters();

    let answer = h.node.engine().get_range(100, 200, 30);
    assert!(answer.cache_authoritative);
    assert_eq!(answer.from_cache, 6);
    assert_eq!(answer.from_persistent, 0);
    assert_timestamps(&answer.measurements, &stamps(100, 200, 20));
    assert_eq!(h.partition.counters().reads, 0);
}

#[tokio::test]
async fn test_range_gap_filled_from_store_and_promoted() {
    let h = harness(StrataConfig::default());
    for ts in [80, 100, 120, 140, 180, 200, 220] {
        h.node.cache().add(reading(ts)).expect("add");
    }
    // 100 sits in both tiers and must not be reported twice.
    h.node.store().put_indexed(&reading(100)).expect("seed");
    h.node.store().put_indexed(&reading(160)).expect("seed");

    let answer = h.node.engine().get_range(100, 200, 30);
    assert!(!answer.cache_authoritative);
    assert_eq!(answer.from_cache, 5);
    assert_eq!(answer.from_persistent, 1);
    assert_eq!(answer.promoted, 1);
    assert_timestamps(&answer.measurements, &[100, 120, 140, 180, 200, 160]);

    assert_eq!(h.node.cache().find(160).map(|m| m.tier), Some(Tier::Persisted));
    assert!(h.node.engine().get_range(100, 200, 30).cache_authoritative);
}

#[tokio::test]
async fn test_large_range_is_not_promoted() {
    let h = harness(StrataConfig::default());
    for ts in stamps(1_000, 1_180, 20) {
        h.node.store().put_indexed(&reading(ts)).expect("seed");
    }

    let answer = h.node.engine().get_range(1_000, 1_180, 30);
    assert_eq!(answer.from_persistent, 10);
    assert_eq!(answer.promoted, 0);
    assert!(h.node.cache().is_empty());

    let answer = h.node.engine().get_range(1_000, 1_040, 30);
    assert_eq!(answer.promoted, 3);
    assert_eq!(h.node.cache().len(), 3);
}

#[tokio::test]
async fn test_range_respects_cap_and_inverted_bounds() {
    let h = harness(StrataConfig::default());
    for ts in stamps(1_000, 1_180, 20) {
        h.node.store().put_indexed(&reading(ts)).expect("seed");
    }

    let answer = h.node.engine().get_range(1_000, 1_180, 4);
    assert_timestamps(&answer.measurements, &[1_000, 1_020, 1_040, 1_060]);

    assert!(h.node.engine().get_range(1_180, 1_000, 30).is_empty());
    assert!(h.node.engine().get_range(5_000, 6_000, 30).is_empty());
}
