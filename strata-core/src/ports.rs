//! Collaborator ports.
//!
//! The store consumes exactly four things from the outside world: one sensor
//! sample, publishing bytes on a named channel, inbound bytes on subscribed
//! channels (pushed into the node by the host), and the wall clock.

use crate::{ChannelError, Timestamp};
use async_trait::async_trait;

/// Outbound side of the publish/subscribe transport.
///
/// Connection lifecycle and subscriptions belong to the host; implementations
/// only enqueue a payload on a topic.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish `payload` on `topic`.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), ChannelError>;
}

/// Source of raw sensor samples.
#[async_trait]
pub trait SensorSource: Send + Sync {
    /// Read one sample. The error string is logged and the cycle skipped.
    async fn read_sample(&self) -> Result<f32, String>;
}

/// Wall-clock seconds.
pub trait Clock: Send + Sync {
    fn now_secs(&self) -> Timestamp;
}

/// System wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> Timestamp {
        // Readings before 1970 or after 2106 do not fit the record format.
        u32::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
    }
}
