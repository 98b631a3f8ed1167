//! In-memory partition with I/O counters and fault injection.
//!
//! Used by tests that need to prove how many reads a query issued, or to make
//! a single key fail without touching the rest of the namespace.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use strata_core::StorageError;

use super::{KvOp, KvPartition};

/// Snapshot of the I/O a [`MemoryPartition`] has served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionCounters {
    /// `get` calls, including misses.
    pub reads: u64,
    /// `Put` ops that reached the map.
    pub puts: u64,
    /// `Delete` ops that reached the map.
    pub deletes: u64,
    /// Successful batches.
    pub commits: u64,
}

/// Hash map standing in for a flash key-value namespace.
#[derive(Debug)]
pub struct MemoryPartition {
    name: String,
    entries: RwLock<HashMap<String, Vec<u8>>>,
    reads: AtomicU64,
    puts: AtomicU64,
    deletes: AtomicU64,
    commits: AtomicU64,
    fail_commits: AtomicBool,
    failing_reads: RwLock<HashSet<String>>,
}

impl MemoryPartition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(HashMap::new()),
            reads: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            commits: AtomicU64::new(0),
            fail_commits: AtomicBool::new(false),
            failing_reads: RwLock::new(HashSet::new()),
        }
    }

    /// Current I/O counters.
    pub fn counters(&self) -> PartitionCounters {
        PartitionCounters {
            reads: self.reads.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
        }
    }

    pub fn reset_counters(&self) {
        self.reads.store(0, Ordering::Relaxed);
        self.puts.store(0, Ordering::Relaxed);
        self.deletes.store(0, Ordering::Relaxed);
        self.commits.store(0, Ordering::Relaxed);
    }

    /// Make every subsequent `commit` and `clear` fail until switched off.
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::Relaxed);
    }

    /// Make reads of `key` fail until [`MemoryPartition::clear_read_failures`].
    pub fn fail_reads_of(&self, key: impl Into<String>) {
        self.failing_reads
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into());
    }

    pub fn clear_read_failures(&self) {
        self.failing_reads
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Every key currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn check_commit(&self) -> Result<(), StorageError> {
        if self.fail_commits.load(Ordering::Relaxed) {
            return Err(StorageError::Commit {
                reason: "injected commit failure".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for MemoryPartition {
    fn default() -> Self {
        Self::new("storage")
    }
}

impl KvPartition for MemoryPartition {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.reads.fetch_add(1, Ordering::Relaxed);

        let failing = self
            .failing_reads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key);
        if failing {
            return Err(StorageError::Read {
                key: key.to_string(),
                reason: "injected read failure".to_string(),
            });
        }

        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn commit(&self, batch: &[KvOp]) -> Result<(), StorageError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.check_commit()?;

        // Single write guard over the whole batch keeps it atomic for readers.
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        for op in batch {
            match op {
                KvOp::Put { key, value } => {
                    entries.insert(key.clone(), value.clone());
                    self.puts.fetch_add(1, Ordering::Relaxed);
                }
                KvOp::Delete { key } => {
                    entries.remove(key);
                    self.deletes.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        self.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.check_commit()?;
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn len(&self) -> Result<u64, StorageError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.len() as u64)
    }
}
