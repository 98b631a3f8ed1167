//! Insertion-ordered list of persisted timestamps.
//!
//! The partition has no ordered enumeration, so the store keeps the order in
//! which records arrived in one extra value under [`INDEX_KEY`]: a flat
//! little-endian `u32` array, oldest first. Every mutation rewrites the whole
//! value, which is fine at a few hundred entries.

use std::collections::HashSet;

use strata_core::{StorageError, Timestamp};

use crate::partition::KvOp;

/// Well-known key holding the serialized index.
pub const INDEX_KEY: &str = "timestamp_list";

/// Ordered timestamps of persisted-but-not-offloaded records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FifoIndex {
    entries: Vec<Timestamp>,
}

impl FifoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the stored value. An absent value is an empty index.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        if bytes.len() % 4 != 0 {
            return Err(StorageError::Corrupt {
                key: INDEX_KEY.to_string(),
                reason: format!("length {} is not a multiple of 4", bytes.len()),
            });
        }

        let entries = bytes
            .chunks_exact(4)
            .map(|chunk| Timestamp::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Ok(Self { entries })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.entries.iter().flat_map(|ts| ts.to_le_bytes()).collect()
    }

    /// Batch op that writes this index back.
    pub fn to_op(&self) -> KvOp {
        KvOp::Put {
            key: INDEX_KEY.to_string(),
            value: self.to_bytes(),
        }
    }

    pub fn append(&mut self, timestamp: Timestamp) {
        self.entries.push(timestamp);
    }

    /// The oldest `count` timestamps, without removing them.
    pub fn peek_front(&self, count: usize) -> Vec<Timestamp> {
        self.entries.iter().take(count).copied().collect()
    }

    /// Drop the oldest `count` timestamps. Returns how many were dropped.
    pub fn remove_front(&mut self, count: usize) -> usize {
        let n = count.min(self.entries.len());
        self.entries.drain(..n);
        n
    }

    /// Drop every listed timestamp wherever it sits, keeping the order of the
    /// rest. Returns how many entries were dropped.
    pub fn remove_all(&mut self, timestamps: &[Timestamp]) -> usize {
        // Common case: the offloaded batch is exactly the head.
        if self.entries.starts_with(timestamps) {
            return self.remove_front(timestamps.len());
        }

        let doomed: HashSet<Timestamp> = timestamps.iter().copied().collect();
        let before = self.entries.len();
        self.entries.retain(|ts| !doomed.contains(ts));
        before - self.entries.len()
    }

    pub fn contains(&self, timestamp: Timestamp) -> bool {
        self.entries.contains(&timestamp)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn as_slice(&self) -> &[Timestamp] {
        &self.entries
    }
}
