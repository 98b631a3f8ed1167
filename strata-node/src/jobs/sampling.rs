//! Sampling Background Task
//!
//! Reads one sensor sample per tick, stamps it with the node clock and
//! ingests it as a fresh `BufferOnly` record. Ingestion runs the reactive
//! flush and offload checks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::node::StrataNode;

// ============================================================================
// METRICS
// ============================================================================

/// Counters for the sampling task.
#[derive(Debug, Default)]
pub struct SamplingMetrics {
    /// Readings ingested.
    pub samples: AtomicU64,
    /// Cycles skipped because the sensor read failed.
    pub sensor_failures: AtomicU64,
    /// Readings that could not be cached.
    pub ingest_errors: AtomicU64,
}

impl SamplingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SamplingSnapshot {
        SamplingSnapshot {
            samples: self.samples.load(Ordering::Relaxed),
            sensor_failures: self.sensor_failures.load(Ordering::Relaxed),
            ingest_errors: self.ingest_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SamplingMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingSnapshot {
    pub samples: u64,
    pub sensor_failures: u64,
    pub ingest_errors: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Sample the sensor every `period` until the shutdown signal is received.
///
/// The first sample is taken immediately.
pub async fn sampling_task(
    node: Arc<StrataNode>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<SamplingMetrics> {
    let metrics = Arc::new(SamplingMetrics::new());

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(period_secs = period.as_secs(), "Sampling task started");

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                // A dropped sender counts as shutdown.
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Sampling task shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                match node.sample_once().await {
                    Ok(Some(_)) => {
                        metrics.samples.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(None) => {
                        metrics.sensor_failures.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to ingest sample");
                        metrics.ingest_errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        samples = snapshot.samples,
        sensor_failures = snapshot.sensor_failures,
        ingest_errors = snapshot.ingest_errors,
        "Sampling task completed"
    );

    metrics
}
