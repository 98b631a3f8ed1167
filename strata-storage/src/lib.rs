//! Strata Storage - Cache and Persistent Tier
//!
//! The two local tiers of the store: a bounded in-memory cache and a
//! key-value partition whose insertion order is kept by a FIFO index.
//! Backends plug in behind [`KvPartition`]; LMDB for devices with a
//! filesystem, an in-memory map for tests.

pub mod cache;
pub mod fifo_index;
pub mod partition;
pub mod store;

pub use cache::{AddOutcome, CacheStats, FlushReport, MeasurementCache};
pub use fifo_index::{FifoIndex, INDEX_KEY};
pub use partition::{KvOp, KvPartition, LmdbPartition, MemoryPartition, PartitionCounters};
pub use store::{record_key, PersistentStore, PutOutcome};
