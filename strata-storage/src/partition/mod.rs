//! Key-value partition seam.
//!
//! The persistent tier is a flat namespace of string keys to byte blobs with
//! no ordered enumeration, modelled on a flash key-value partition. Backends
//! must apply a [`KvOp`] batch atomically: the store relies on that to keep a
//! record and its FIFO index entry in lockstep.

pub mod lmdb;
pub mod memory;

pub use lmdb::LmdbPartition;
pub use memory::{MemoryPartition, PartitionCounters};

use strata_core::StorageError;

/// One mutation in an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvOp {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

impl KvOp {
    pub fn key(&self) -> &str {
        match self {
            KvOp::Put { key, .. } | KvOp::Delete { key } => key,
        }
    }
}

/// Storage backend for the persistent tier.
///
/// Implementations must be thread-safe. Each method is its own unit of
/// work; only [`KvPartition::commit`] spans several keys.
pub trait KvPartition: Send + Sync {
    /// Namespace name, used in log lines and errors.
    fn name(&self) -> &str;

    /// Fetch the blob stored under `key`.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Whether `key` holds a value.
    fn contains(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key)?.is_some())
    }

    /// Apply every op in `batch`, or none of them.
    fn commit(&self, batch: &[KvOp]) -> Result<(), StorageError>;

    /// Remove every key in the namespace.
    fn clear(&self) -> Result<(), StorageError>;

    /// Number of keys currently stored.
    fn len(&self) -> Result<u64, StorageError>;
}
