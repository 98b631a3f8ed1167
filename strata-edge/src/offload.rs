//! Bulk offload of the persistent tier to the edge peer.
//!
//! A pass peeks the oldest indexed timestamps and publishes each record on the
//! offload topic. It then retires every delivered record in one batch
//! (record keys deleted and index entries dropped together) and tags the
//! cached copies as offloaded. Entries that could not be read or published
//! stay indexed for the next pass.
//!
//! Passes on one [`Offloader`] are serialized: a second caller waits for the
//! running pass and then peeks whatever is still indexed.

use std::sync::Arc;

use strata_core::wire::{self, OffloadPayload};
use strata_core::{ChannelError, StorageError, StrataConfig, Timestamp, Transport};
use strata_storage::{MeasurementCache, PersistentStore};
use tokio::sync::Mutex;

/// Outcome of one offload pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffloadReport {
    /// Index entries examined.
    pub attempted: usize,
    /// Records published and retired.
    pub offloaded: usize,
    /// Entries left in place after a read or publish failure.
    pub skipped: usize,
    /// Timestamps retired by this pass, oldest first.
    pub retired: Vec<Timestamp>,
}

/// Pushes the oldest persisted records to the edge peer.
pub struct Offloader {
    transport: Arc<dyn Transport>,
    topic: String,
    batch_size: usize,
    threshold_pct: u8,
    pass_lock: Mutex<()>,
}

impl Offloader {
    pub fn new(
        transport: Arc<dyn Transport>,
        topic: impl Into<String>,
        batch_size: usize,
        threshold_pct: u8,
    ) -> Self {
        Self {
            transport,
            topic: topic.into(),
            batch_size: batch_size.max(1),
            threshold_pct,
            pass_lock: Mutex::new(()),
        }
    }

    pub fn from_config(transport: Arc<dyn Transport>, config: &StrataConfig) -> Self {
        Self::new(
            transport,
            config.topics.offload.clone(),
            config.offload_batch_size,
            config.offload_threshold_pct,
        )
    }

    /// Run a pass only if persistent usage has reached the threshold.
    ///
    /// Usage is checked after any running pass has finished.
    pub async fn offload_if_needed(
        &self,
        store: &PersistentStore,
        cache: &MeasurementCache,
    ) -> Result<Option<OffloadReport>, StorageError> {
        let _pass = self.pass_lock.lock().await;
        let usage = store.usage_percent()?;
        if usage < self.threshold_pct {
            return Ok(None);
        }
        tracing::info!(usage, threshold = self.threshold_pct, "Persistent usage over threshold");
        self.run_pass(store, cache).await.map(Some)
    }

    /// Offload up to the batch size of the oldest indexed records.
    ///
    /// `store` must be the store behind `cache`. Per-entry failures are
    /// logged and skipped. An error is returned only when the index cannot be
    /// read or the final retire batch fails; in the latter case every entry
    /// stays indexed, cached copies keep their tier, and the entries are
    /// offered again next pass.
    pub async fn offload_batch(
        &self,
        store: &PersistentStore,
        cache: &MeasurementCache,
    ) -> Result<OffloadReport, StorageError> {
        let _pass = self.pass_lock.lock().await;
        self.run_pass(store, cache).await
    }

    async fn run_pass(
        &self,
        store: &PersistentStore,
        cache: &MeasurementCache,
    ) -> Result<OffloadReport, StorageError> {
        let candidates = store.fifo_peek(self.batch_size)?;
        let mut report = OffloadReport {
            attempted: candidates.len(),
            ..OffloadReport::default()
        };
        let mut delivered = Vec::with_capacity(candidates.len());

        for ts in candidates {
            let measurement = match store.get(ts) {
                Ok(Some(m)) => m,
                Ok(None) => {
                    // Indexed but gone: drop the stale index entry.
                    tracing::warn!(timestamp = ts, "Indexed record missing, dropping index entry");
                    report.retired.push(ts);
                    continue;
                }
                Err(e) => {
                    tracing::error!(timestamp = ts, error = %e, "Failed to read record for offload");
                    report.skipped += 1;
                    continue;
                }
            };

            if let Err(e) = self.publish(&OffloadPayload::from(&measurement)).await {
                tracing::error!(timestamp = ts, error = %e, "Failed to publish offload record");
                report.skipped += 1;
                continue;
            }

            delivered.push(ts);
            report.retired.push(ts);
            report.offloaded += 1;
        }

        cache.commit_offload(&report.retired, &delivered)?;

        tracing::info!(
            attempted = report.attempted,
            offloaded = report.offloaded,
            skipped = report.skipped,
            "Offload pass complete"
        );
        Ok(report)
    }

    async fn publish(&self, payload: &OffloadPayload) -> Result<(), ChannelError> {
        let bytes = wire::encode(payload).map_err(|e| ChannelError::PublishFailed {
            topic: self.topic.clone(),
            reason: e.to_string(),
        })?;
        self.transport.publish(&self.topic, &bytes).await
    }
}

impl std::fmt::Debug for Offloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Offloader")
            .field("topic", &self.topic)
            .field("batch_size", &self.batch_size)
            .field("threshold_pct", &self.threshold_pct)
            .finish()
    }
}
