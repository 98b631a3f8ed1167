//! LMDB-backed partition.
//!
//! Uses the heed crate (Rust bindings for LMDB) as the durable key-value
//! namespace. Every batch runs in a single write transaction, so a record and
//! its index update commit together or not at all.

use std::path::Path;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use strata_core::StorageError;

use super::{KvOp, KvPartition};

/// LMDB environment holding one named database.
///
/// # Example
///
/// ```ignore
/// let partition = LmdbPartition::open("/var/lib/strata", "storage", 16)?;
/// let store = PersistentStore::new(Arc::new(partition), 256);
/// ```
pub struct LmdbPartition {
    /// The LMDB environment.
    env: Env,
    /// The namespace database.
    db: Database<Bytes, Bytes>,
    name: String,
}

impl LmdbPartition {
    /// Open or create a partition.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `namespace` - Name of the database inside the environment
    /// * `max_size_mb` - Maximum size of the memory map in megabytes
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::PartitionOpen`] if the directory cannot be
    /// created or the environment/database cannot be opened.
    pub fn open<P: AsRef<Path>>(
        path: P,
        namespace: &str,
        max_size_mb: usize,
    ) -> Result<Self, StorageError> {
        let open_err = |reason: String| StorageError::PartitionOpen {
            partition: namespace.to_string(),
            reason,
        };

        std::fs::create_dir_all(&path).map_err(|e| open_err(e.to_string()))?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| open_err(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(|e| open_err(e.to_string()))?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(namespace))
            .map_err(|e| open_err(e.to_string()))?;
        wtxn.commit().map_err(|e| open_err(e.to_string()))?;

        tracing::debug!(namespace, path = %path.as_ref().display(), "LMDB partition opened");

        Ok(Self {
            env,
            db,
            name: namespace.to_string(),
        })
    }
}

impl KvPartition for LmdbPartition {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let read_err = |e: heed::Error| StorageError::Read {
            key: key.to_string(),
            reason: e.to_string(),
        };

        let rtxn = self.env.read_txn().map_err(read_err)?;
        let value = self.db.get(&rtxn, key.as_bytes()).map_err(read_err)?;
        Ok(value.map(|bytes| bytes.to_vec()))
    }

    fn commit(&self, batch: &[KvOp]) -> Result<(), StorageError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut wtxn = self.env.write_txn().map_err(|e| StorageError::Commit {
            reason: e.to_string(),
        })?;

        for op in batch {
            let result = match op {
                KvOp::Put { key, value } => self.db.put(&mut wtxn, key.as_bytes(), value),
                KvOp::Delete { key } => self.db.delete(&mut wtxn, key.as_bytes()).map(|_| ()),
            };
            // Dropping the transaction aborts it.
            result.map_err(|e| StorageError::Write {
                key: op.key().to_string(),
                reason: e.to_string(),
            })?;
        }

        wtxn.commit().map_err(|e| StorageError::Commit {
            reason: e.to_string(),
        })
    }

    fn clear(&self) -> Result<(), StorageError> {
        let commit_err = |e: heed::Error| StorageError::Commit {
            reason: e.to_string(),
        };

        let mut wtxn = self.env.write_txn().map_err(commit_err)?;
        self.db.clear(&mut wtxn).map_err(commit_err)?;
        wtxn.commit().map_err(commit_err)
    }

    fn len(&self) -> Result<u64, StorageError> {
        let read_err = |e: heed::Error| StorageError::Read {
            key: "*".to_string(),
            reason: e.to_string(),
        };

        let rtxn = self.env.read_txn().map_err(read_err)?;
        self.db.len(&rtxn).map_err(read_err)
    }
}
