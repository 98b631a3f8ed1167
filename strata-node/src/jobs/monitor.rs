//! Usage Monitor Background Task
//!
//! Backstop for the reactive checks in `StrataNode::ingest`: flushes the
//! cache when it is over its threshold and offloads the persistent tier
//! when its usage is over threshold, even if no reading arrives.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::node::StrataNode;

// ============================================================================
// METRICS
// ============================================================================

/// Counters for the monitor task.
#[derive(Debug, Default)]
pub struct MonitorMetrics {
    /// Checks run.
    pub cycles: AtomicU64,
    /// Records flushed from the cache.
    pub records_flushed: AtomicU64,
    /// Offload passes run.
    pub offload_passes: AtomicU64,
    /// Records offloaded to the edge peer.
    pub records_offloaded: AtomicU64,
    /// Flush failures and offload entries skipped.
    pub errors: AtomicU64,
}

impl MonitorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            records_flushed: self.records_flushed.load(Ordering::Relaxed),
            offload_passes: self.offload_passes.load(Ordering::Relaxed),
            records_offloaded: self.records_offloaded.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`MonitorMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSnapshot {
    pub cycles: u64,
    pub records_flushed: u64,
    pub offload_passes: u64,
    pub records_offloaded: u64,
    pub errors: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Run a maintenance pass every `period` until shutdown.
pub async fn monitor_task(
    node: Arc<StrataNode>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<MonitorMetrics> {
    let metrics = Arc::new(MonitorMetrics::new());

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(period_secs = period.as_secs(), "Usage monitor task started");

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Usage monitor task shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                check_usage(&node, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        cycles = snapshot.cycles,
        records_flushed = snapshot.records_flushed,
        records_offloaded = snapshot.records_offloaded,
        errors = snapshot.errors,
        "Usage monitor task completed"
    );

    metrics
}

/// One monitor cycle.
async fn check_usage(node: &StrataNode, metrics: &MonitorMetrics) {
    metrics.cycles.fetch_add(1, Ordering::Relaxed);

    let report = node.run_maintenance().await;

    if let Some(flush) = &report.flush {
        metrics
            .records_flushed
            .fetch_add(flush.persisted as u64, Ordering::Relaxed);
        metrics
            .errors
            .fetch_add(flush.failed as u64, Ordering::Relaxed);
    }
    if let Some(offload) = &report.offload {
        metrics.offload_passes.fetch_add(1, Ordering::Relaxed);
        metrics
            .records_offloaded
            .fetch_add(offload.offloaded as u64, Ordering::Relaxed);
        metrics
            .errors
            .fetch_add(offload.skipped as u64, Ordering::Relaxed);
    }

    if report.flush.is_none() && report.offload.is_none() {
        tracing::trace!("Usage check found nothing to do");
    }
}
