//! Strata Test Utilities
//!
//! Shared test infrastructure for the Strata workspace:
//! - Recording transport with fault injection and publish subscriptions
//! - Manual clock and scripted sensor
//! - Proptest generators for measurements
//! - Fixtures wiring a cache over an in-memory partition
//! - Custom assertions

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

// Re-export core types for convenience
pub use strata_core::{
    ChannelError, Clock, Measurement, SensorSource, StorageError, StrataConfig, StrataError,
    StrataResult, Tier, Timestamp, Transport,
};
pub use strata_storage::{MeasurementCache, MemoryPartition, PersistentStore};

use async_trait::async_trait;
use tokio::sync::mpsc;

// ============================================================================
// TRANSPORT
// ============================================================================

/// One captured publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Published {
    /// Payload parsed as JSON. Panics on invalid JSON; test use only.
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap_or_else(|e| {
            panic!(
                "payload on {} is not JSON ({}): {:?}",
                self.topic,
                e,
                String::from_utf8_lossy(&self.payload)
            )
        })
    }
}

type FailFilter = Box<dyn Fn(&str, &[u8]) -> bool + Send + Sync>;

/// Transport that records every publish instead of sending it.
///
/// Publishes can be made to fail with [`RecordingTransport::fail_when`], and
/// tests that need to react to a publish (to answer an edge request, say)
/// can [`RecordingTransport::subscribe`].
#[derive(Default)]
pub struct RecordingTransport {
    published: Mutex<Vec<Published>>,
    fail_filter: Mutex<Option<FailFilter>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Published>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every successful publish so far, in order.
    pub fn published(&self) -> Vec<Published> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Successful publishes on `topic`.
    pub fn published_on(&self, topic: &str) -> Vec<Published> {
        self.published()
            .into_iter()
            .filter(|p| p.topic == topic)
            .collect()
    }

    pub fn clear(&self) {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Fail every publish for which `filter` returns true.
    pub fn fail_when<F>(&self, filter: F)
    where
        F: Fn(&str, &[u8]) -> bool + Send + Sync + 'static,
    {
        *self.fail_filter.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(filter));
    }

    /// Fail every publish.
    pub fn fail_all(&self) {
        self.fail_when(|_, _| true);
    }

    pub fn stop_failing(&self) {
        *self.fail_filter.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Receive a copy of every later successful publish.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Published> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), ChannelError> {
        let refused = self
            .fail_filter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|filter| filter(topic, payload));
        if refused {
            return Err(ChannelError::PublishFailed {
                topic: topic.to_string(),
                reason: "injected publish failure".to_string(),
            });
        }

        let record = Published {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        };
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(record.clone()).is_ok());
        Ok(())
    }
}

// ============================================================================
// CLOCK AND SENSOR
// ============================================================================

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU32,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicU32::new(start),
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u32) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// Clock driven by the tokio timer, so paused-time tests see it move.
///
/// Reads `epoch + whole seconds elapsed since creation`.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeClock {
    epoch: Timestamp,
    started: tokio::time::Instant,
}

impl RuntimeClock {
    /// Must be called inside a tokio runtime.
    pub fn new(epoch: Timestamp) -> Self {
        Self {
            epoch,
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for RuntimeClock {
    fn now_secs(&self) -> Timestamp {
        let elapsed = self.started.elapsed().as_secs();
        self.epoch.saturating_add(u32::try_from(elapsed).unwrap_or(u32::MAX))
    }
}

/// Sensor that replays a fixed script of readings, then fails.
#[derive(Debug, Default)]
pub struct ScriptedSensor {
    script: Mutex<VecDeque<Result<f32, String>>>,
}

impl ScriptedSensor {
    pub fn new(readings: impl IntoIterator<Item = Result<f32, String>>) -> Self {
        Self {
            script: Mutex::new(readings.into_iter().collect()),
        }
    }

    /// Sensor that always succeeds with the given values, in order.
    pub fn of_values(values: impl IntoIterator<Item = f32>) -> Self {
        Self::new(values.into_iter().map(Ok))
    }

    pub fn remaining(&self) -> usize {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl SensorSource for ScriptedSensor {
    async fn read_sample(&self) -> Result<f32, String> {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| Err("sensor script exhausted".to_string()))
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for measurements.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_tier() -> impl Strategy<Value = Tier> {
        prop_oneof![
            Just(Tier::BufferOnly),
            Just(Tier::Persisted),
            Just(Tier::Offloaded),
        ]
    }

    /// Plausible sensor value (finite, so equality checks are meaningful).
    pub fn arb_value() -> impl Strategy<Value = f32> {
        -40.0f32..125.0f32
    }

    pub fn arb_measurement() -> impl Strategy<Value = Measurement> {
        (any::<u32>(), arb_value(), arb_tier()).prop_map(|(timestamp, value, tier)| Measurement {
            timestamp,
            value,
            tier,
        })
    }

    /// A run of fresh readings at a fixed cadence, as the sampling job
    /// produces them.
    pub fn arb_sampled_run(max_len: usize) -> impl Strategy<Value = Vec<Measurement>> {
        (
            1_000u32..1_000_000,
            1u32..60,
            proptest::collection::vec(arb_value(), 0..max_len),
        )
            .prop_map(|(start, interval, values)| {
                values
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| Measurement::new(start + interval * i as u32, v))
                    .collect()
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-wired tiers for common scenarios.

    use super::*;

    /// A cache over a store over an in-memory partition, with handles to
    /// each layer.
    pub struct TestTiers {
        pub partition: Arc<MemoryPartition>,
        pub store: Arc<PersistentStore>,
        pub cache: Arc<MeasurementCache>,
    }

    impl TestTiers {
        /// Tiers sized from `config`.
        pub fn from_config(config: &StrataConfig) -> Self {
            let partition = Arc::new(MemoryPartition::default());
            let store = Arc::new(PersistentStore::new(
                partition.clone(),
                config.partition_max_entries,
            ));
            let cache = Arc::new(MeasurementCache::new(config.cache_capacity, store.clone()));
            Self {
                partition,
                store,
                cache,
            }
        }

        pub fn new(cache_capacity: usize) -> Self {
            Self::from_config(&StrataConfig {
                cache_capacity,
                ..StrataConfig::default()
            })
        }

        /// Add fresh readings `value = timestamp` for each timestamp.
        pub fn fill_cache(&self, stamps: impl IntoIterator<Item = Timestamp>) {
            for ts in stamps {
                if let Err(e) = self.cache.add(Measurement::new(ts, ts as f32)) {
                    panic!("cache add of {} failed: {}", ts, e);
                }
            }
        }

        /// Write persisted, indexed readings straight to the store.
        pub fn fill_store(&self, stamps: impl IntoIterator<Item = Timestamp>) {
            for ts in stamps {
                if let Err(e) = self.store.put_indexed(&Measurement::new(ts, ts as f32)) {
                    panic!("store put of {} failed: {}", ts, e);
                }
            }
        }
    }

    /// Defaults with a short edge timeout, for tests that expect a timeout.
    pub fn fast_config() -> StrataConfig {
        StrataConfig {
            edge_request_timeout_ms: 50,
            ..StrataConfig::default()
        }
    }

    /// Timestamps `start, start + step, ..` up to and including `end`.
    pub fn stamps(start: Timestamp, end: Timestamp, step: u32) -> Vec<Timestamp> {
        (start..=end).step_by(step as usize).collect()
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for tier state.

    use super::*;

    /// Assert the timestamps of `measurements`, in order.
    #[track_caller]
    pub fn assert_timestamps(measurements: &[Measurement], expected: &[Timestamp]) {
        let got: Vec<Timestamp> = measurements.iter().map(|m| m.timestamp).collect();
        assert_eq!(got, expected, "timestamps differ");
    }

    /// Assert that `timestamp` is persisted and present in the FIFO index.
    #[track_caller]
    pub fn assert_persisted_and_indexed(store: &PersistentStore, timestamp: Timestamp) {
        match store.contains(timestamp) {
            Ok(true) => {}
            other => panic!("Expected {} persisted, got: {:?}", timestamp, other),
        }
        match store.index() {
            Ok(index) => assert!(index.contains(timestamp), "{} missing from index", timestamp),
            Err(e) => panic!("Index unreadable: {}", e),
        }
    }

    /// Assert that a StrataResult is a Channel error.
    #[track_caller]
    pub fn assert_channel_error<T: std::fmt::Debug>(result: &StrataResult<T>) {
        match result {
            Err(StrataError::Channel(_)) => {}
            other => panic!("Expected Channel error, got: {:?}", other),
        }
    }
}
