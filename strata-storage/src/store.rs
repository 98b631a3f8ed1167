//! Persistent tier: measurement records plus the FIFO index.
//!
//! Every mutation that touches both a record and the index goes out as one
//! [`KvOp`] batch under the store's critical section, so the index and the
//! record keys cannot drift apart through this API.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use strata_core::{Measurement, StorageError, Tier, Timestamp};

use crate::fifo_index::{FifoIndex, INDEX_KEY};
use crate::partition::{KvOp, KvPartition};

/// Canonical on-disk key for a timestamp: 8 lowercase hex digits.
pub fn record_key(timestamp: Timestamp) -> String {
    format!("{:08x}", timestamp)
}

/// What a write actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The record was written.
    Written,
    /// The key already existed; nothing was rewritten.
    AlreadyPresent,
}

/// Key-value partition holding measurement records and their FIFO index.
pub struct PersistentStore {
    partition: Arc<dyn KvPartition>,
    max_entries: usize,
    write_lock: Mutex<()>,
}

impl PersistentStore {
    /// Wrap a partition. `max_entries` is the key-slot capacity used by
    /// [`PersistentStore::usage_percent`].
    pub fn new(partition: Arc<dyn KvPartition>, max_entries: usize) -> Self {
        Self {
            partition,
            max_entries: max_entries.max(1),
            write_lock: Mutex::new(()),
        }
    }

    pub fn partition(&self) -> &Arc<dyn KvPartition> {
        &self.partition
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load_index(&self) -> Result<FifoIndex, StorageError> {
        match self.partition.get(INDEX_KEY)? {
            Some(bytes) => FifoIndex::from_bytes(&bytes),
            None => Ok(FifoIndex::new()),
        }
    }

    /// Put op for `m`. Whatever tier the caller holds, the copy on disk is
    /// `Persisted`.
    fn record_op(m: &Measurement) -> KvOp {
        let stored = Measurement {
            tier: Tier::Persisted,
            ..*m
        };
        KvOp::Put {
            key: record_key(m.timestamp),
            value: stored.to_blob().to_vec(),
        }
    }

    /// Write a record without touching the index.
    ///
    /// Idempotent: an existing key is left alone, so a second call performs
    /// no physical write.
    pub fn put(&self, m: &Measurement) -> Result<PutOutcome, StorageError> {
        let _guard = self.lock();
        let key = record_key(m.timestamp);

        if self.partition.contains(&key)? {
            tracing::debug!(timestamp = m.timestamp, "Record already persisted");
            return Ok(PutOutcome::AlreadyPresent);
        }

        self.partition.commit(&[Self::record_op(m)])?;
        Ok(PutOutcome::Written)
    }

    /// Write a record and append it to the FIFO index in one batch.
    ///
    /// An existing record is not rewritten. If it exists but is missing from
    /// the index, the index entry is repaired.
    pub fn put_indexed(&self, m: &Measurement) -> Result<PutOutcome, StorageError> {
        let _guard = self.lock();
        let key = record_key(m.timestamp);

        let exists = self.partition.contains(&key)?;
        let mut index = self.load_index()?;
        let indexed = index.contains(m.timestamp);

        if exists && indexed {
            return Ok(PutOutcome::AlreadyPresent);
        }

        let mut batch = Vec::with_capacity(2);
        if !exists {
            batch.push(Self::record_op(m));
        }
        if !indexed {
            index.append(m.timestamp);
            batch.push(index.to_op());
        }
        self.partition.commit(&batch)?;

        if exists {
            tracing::info!(timestamp = m.timestamp, "Repaired missing index entry");
            Ok(PutOutcome::AlreadyPresent)
        } else {
            tracing::debug!(timestamp = m.timestamp, indexed = index.len(), "Record persisted");
            Ok(PutOutcome::Written)
        }
    }

    /// Fetch one record. `Ok(None)` means the key is absent.
    pub fn get(&self, timestamp: Timestamp) -> Result<Option<Measurement>, StorageError> {
        let key = record_key(timestamp);
        match self.partition.get(&key)? {
            Some(bytes) => Measurement::from_blob(&key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    pub fn contains(&self, timestamp: Timestamp) -> Result<bool, StorageError> {
        self.partition.contains(&record_key(timestamp))
    }

    /// Used key slots as a percentage of capacity, clamped to 100.
    pub fn usage_percent(&self) -> Result<u8, StorageError> {
        let used = self.partition.len()?;
        let pct = used.saturating_mul(100) / self.max_entries as u64;
        Ok(pct.min(100) as u8)
    }

    /// Remove every record and the index. Idempotent.
    pub fn erase_all(&self) -> Result<(), StorageError> {
        let _guard = self.lock();
        self.partition.clear()?;
        tracing::info!(partition = self.partition.name(), "Persistent tier erased");
        Ok(())
    }

    /// Indexed records with `start <= timestamp <= end`, in insertion order,
    /// at most `cap` of them.
    ///
    /// A key that fails to load is logged and skipped. Only a failure to
    /// read the index itself fails the call.
    pub fn range(
        &self,
        start: Timestamp,
        end: Timestamp,
        cap: usize,
    ) -> Result<Vec<Measurement>, StorageError> {
        let index = self.load_index()?;
        let mut found = Vec::new();

        for &ts in index.as_slice() {
            if found.len() >= cap {
                break;
            }
            if ts < start || ts > end {
                continue;
            }
            match self.get(ts) {
                Ok(Some(m)) => found.push(m),
                Ok(None) => {
                    tracing::warn!(timestamp = ts, "Indexed key missing from partition");
                }
                Err(e) => {
                    tracing::error!(timestamp = ts, error = %e, "Failed to read indexed record");
                }
            }
        }

        Ok(found)
    }

    /// Snapshot of the FIFO index.
    pub fn index(&self) -> Result<FifoIndex, StorageError> {
        self.load_index()
    }

    /// The oldest `count` indexed timestamps, without removing them.
    pub fn fifo_peek(&self, count: usize) -> Result<Vec<Timestamp>, StorageError> {
        Ok(self.load_index()?.peek_front(count))
    }

    /// Drop the oldest `count` index entries. Records are not touched.
    pub fn fifo_remove_front(&self, count: usize) -> Result<usize, StorageError> {
        let _guard = self.lock();
        let mut index = self.load_index()?;
        let removed = index.remove_front(count);
        if removed > 0 {
            self.partition.commit(&[index.to_op()])?;
        }
        Ok(removed)
    }

    /// Delete the given records and drop them from the index, in one batch.
    ///
    /// Used after a successful offload. Returns how many index entries were
    /// dropped.
    pub fn retire(&self, timestamps: &[Timestamp]) -> Result<usize, StorageError> {
        if timestamps.is_empty() {
            return Ok(0);
        }

        let _guard = self.lock();
        let mut index = self.load_index()?;
        let removed = index.remove_all(timestamps);

        let mut batch: Vec<KvOp> = timestamps
            .iter()
            .map(|ts| KvOp::Delete {
                key: record_key(*ts),
            })
            .collect();
        batch.push(index.to_op());
        self.partition.commit(&batch)?;

        tracing::debug!(retired = timestamps.len(), remaining = index.len(), "Records retired");
        Ok(removed)
    }
}

impl std::fmt::Debug for PersistentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentStore")
            .field("partition", &self.partition.name())
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::{LmdbPartition, MemoryPartition};
    use tempfile::TempDir;

    fn memory_store(max_entries: usize) -> (PersistentStore, Arc<MemoryPartition>) {
        let partition = Arc::new(MemoryPartition::default());
        (
            PersistentStore::new(partition.clone(), max_entries),
            partition,
        )
    }

    #[test]
    fn test_record_key_is_fixed_width_hex() {
        assert_eq!(record_key(300), "0000012c");
        assert_eq!(record_key(u32::MAX), "ffffffff");
    }

    #[test]
    fn test_put_is_idempotent() {
        let (store, partition) = memory_store(256);
        let m = Measurement::new(300, 21.5);

        assert_eq!(store.put(&m).expect("put"), PutOutcome::Written);
        assert_eq!(store.put(&m).expect("put"), PutOutcome::AlreadyPresent);
        assert_eq!(partition.counters().puts, 1);

        let stored = store.get(300).expect("get").expect("present");
        assert_eq!(stored.tier, Tier::Persisted);
        assert_eq!(stored.value, 21.5);
    }

    #[test]
    fn test_offloaded_input_is_stored_persisted() {
        let (store, _) = memory_store(256);
        let recovered = Measurement::new(700, 19.5).with_tier(Tier::Offloaded);

        store.put_indexed(&recovered).expect("put_indexed");
        let stored = store.get(700).expect("get").expect("present");
        assert_eq!(stored.tier, Tier::Persisted);
        assert_eq!(stored.value, 19.5);
    }

    #[test]
    fn test_put_indexed_writes_record_and_index_together() {
        let (store, partition) = memory_store(256);
        store
            .put_indexed(&Measurement::new(100, 1.0))
            .expect("put_indexed");
        store
            .put_indexed(&Measurement::new(120, 2.0))
            .expect("put_indexed");

        assert_eq!(store.index().expect("index").as_slice(), &[100, 120]);
        // One batch per record.
        assert_eq!(partition.counters().commits, 2);

        assert_eq!(
            store
                .put_indexed(&Measurement::new(100, 1.0))
                .expect("put_indexed"),
            PutOutcome::AlreadyPresent
        );
        assert_eq!(partition.counters().commits, 2);
    }

    #[test]
    fn test_put_indexed_failure_leaves_nothing_behind() {
        let (store, partition) = memory_store(256);
        partition.set_fail_commits(true);

        assert!(store.put_indexed(&Measurement::new(100, 1.0)).is_err());
        assert!(!store.contains(100).expect("contains"));
        assert!(store.index().expect("index").is_empty());
    }

    #[test]
    fn test_put_indexed_repairs_unindexed_record() {
        let (store, _partition) = memory_store(256);
        store.put(&Measurement::new(100, 1.0)).expect("put");
        assert!(store.index().expect("index").is_empty());

        assert_eq!(
            store
                .put_indexed(&Measurement::new(100, 1.0))
                .expect("put_indexed"),
            PutOutcome::AlreadyPresent
        );
        assert_eq!(store.index().expect("index").as_slice(), &[100]);
    }

    #[test]
    fn test_get_absent_is_none() {
        let (store, _partition) = memory_store(256);
        assert_eq!(store.get(42).expect("get"), None);
    }

    #[test]
    fn test_usage_percent_counts_index_key_and_clamps() {
        let (store, _partition) = memory_store(4);
        assert_eq!(store.usage_percent().expect("usage"), 0);

        store
            .put_indexed(&Measurement::new(1, 0.0))
            .expect("put_indexed");
        // One record plus the index value.
        assert_eq!(store.usage_percent().expect("usage"), 50);

        for ts in 2..10 {
            store
                .put_indexed(&Measurement::new(ts, 0.0))
                .expect("put_indexed");
        }
        assert_eq!(store.usage_percent().expect("usage"), 100);
    }

    #[test]
    fn test_erase_all_clears_records_and_index() {
        let (store, _partition) = memory_store(256);
        for ts in [1, 2, 3] {
            store
                .put_indexed(&Measurement::new(ts, 0.0))
                .expect("put_indexed");
        }

        store.erase_all().expect("erase");
        store.erase_all().expect("erase twice");
        assert_eq!(store.get(1).expect("get"), None);
        assert!(store.index().expect("index").is_empty());
        assert_eq!(store.usage_percent().expect("usage"), 0);
    }

    #[test]
    fn test_range_filters_caps_and_skips_failed_keys() {
        let (store, partition) = memory_store(256);
        for ts in [100, 120, 140, 160, 180, 200, 220] {
            store
                .put_indexed(&Measurement::new(ts, ts as f32))
                .expect("put_indexed");
        }
        partition.fail_reads_of(record_key(140));

        let found = store.range(100, 200, 10).expect("range");
        let stamps: Vec<Timestamp> = found.iter().map(|m| m.timestamp).collect();
        assert_eq!(stamps, vec![100, 120, 160, 180, 200]);

        let capped = store.range(100, 200, 2).expect("range");
        assert_eq!(capped.len(), 2);
    }

    #[test]
    fn test_fifo_peek_then_remove_front() {
        let (store, _partition) = memory_store(256);
        for ts in [10, 20, 30] {
            store
                .put_indexed(&Measurement::new(ts, 0.0))
                .expect("put_indexed");
        }

        assert_eq!(store.fifo_peek(2).expect("peek"), vec![10, 20]);
        assert_eq!(store.fifo_peek(2).expect("peek"), vec![10, 20]);
        assert_eq!(store.fifo_remove_front(2).expect("remove"), 2);
        assert_eq!(store.fifo_peek(5).expect("peek"), vec![30]);
        // Records stay until retired.
        assert!(store.contains(10).expect("contains"));
    }

    #[test]
    fn test_retire_deletes_records_and_index_entries() {
        let (store, _partition) = memory_store(256);
        for ts in [10, 20, 30, 40] {
            store
                .put_indexed(&Measurement::new(ts, 0.0))
                .expect("put_indexed");
        }

        assert_eq!(store.retire(&[10, 30]).expect("retire"), 2);
        assert_eq!(store.index().expect("index").as_slice(), &[20, 40]);
        assert!(!store.contains(10).expect("contains"));
        assert!(store.contains(20).expect("contains"));
        assert!(!store.contains(30).expect("contains"));
    }

    #[test]
    fn test_lmdb_backed_store() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let partition =
            LmdbPartition::open(dir.path(), "storage", 10).expect("partition should open");
        let store = PersistentStore::new(Arc::new(partition), 256);

        store
            .put_indexed(&Measurement::new(100, 20.0))
            .expect("put_indexed");
        store
            .put_indexed(&Measurement::new(120, 21.0))
            .expect("put_indexed");

        assert_eq!(store.fifo_peek(10).expect("peek"), vec![100, 120]);
        assert_eq!(store.range(0, 1000, 10).expect("range").len(), 2);
        store.retire(&[100]).expect("retire");
        assert_eq!(store.get(100).expect("get"), None);
        assert_eq!(store.fifo_peek(10).expect("peek"), vec![120]);
    }
}
