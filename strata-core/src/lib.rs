//! Strata Core - Measurement Types
//!
//! Pure data structures shared by every tier of the store. All other crates
//! depend on this one. It holds no tier logic: the cache, the persistent
//! partition, the edge channel and the query engine live in their own crates.

mod config;
mod error;
mod measurement;
mod ports;
pub mod wire;

pub use config::{StrataConfig, TopicConfig};
pub use error::{
    ChannelError, ConfigError, MessageError, StorageError, StrataError, StrataResult,
};
pub use measurement::{Measurement, Tier, Timestamp, MEASUREMENT_BLOB_LEN};
pub use ports::{Clock, SensorSource, SystemClock, Transport};
