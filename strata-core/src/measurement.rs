//! Measurement record and tier marker.

use crate::StorageError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Seconds since the Unix epoch. The sole identity of a measurement.
pub type Timestamp = u32;

/// Size of an encoded measurement blob: `u32` timestamp, `f32` value, `u8` tier.
pub const MEASUREMENT_BLOB_LEN: usize = 9;

// ============================================================================
// TIER
// ============================================================================

/// Where durable or cached copies of a measurement currently exist.
///
/// Variants are declared in transition order, so `Ord` follows the only
/// legal direction of travel: `BufferOnly -> Persisted -> Offloaded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Tier {
    /// Exists only in the cache.
    BufferOnly,
    /// Also durably stored in the persistent partition.
    Persisted,
    /// Pushed to the remote peer; eligible for purge from the persistent tier.
    Offloaded,
}

impl Tier {
    /// Wire and on-disk code for this tier.
    pub fn code(self) -> u8 {
        match self {
            Tier::BufferOnly => 0,
            Tier::Persisted => 1,
            Tier::Offloaded => 2,
        }
    }

    /// Decode a tier code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Tier::BufferOnly),
            1 => Some(Tier::Persisted),
            2 => Some(Tier::Offloaded),
            _ => None,
        }
    }

    /// Move forward to `next`, never backward.
    ///
    /// Returns the later of the two tiers, so a stale request to regress a
    /// record (e.g. a promotion tagging an offloaded record as persisted) is
    /// absorbed instead of violating monotonicity.
    pub fn advance(self, next: Tier) -> Tier {
        self.max(next)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::BufferOnly => "buffer_only",
            Tier::Persisted => "persisted",
            Tier::Offloaded => "offloaded",
        };
        f.write_str(name)
    }
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> u8 {
        tier.code()
    }
}

impl TryFrom<u8> for Tier {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Tier::from_code(code).ok_or_else(|| format!("unknown tier code {}", code))
    }
}

// ============================================================================
// MEASUREMENT
// ============================================================================

/// One sensor reading.
///
/// Fixed-size and independent of every other record. Two measurements with
/// the same `timestamp` are the same measurement, whatever their value or tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub timestamp: Timestamp,
    pub value: f32,
    pub tier: Tier,
}

impl Measurement {
    /// A fresh reading that so far exists only in the cache.
    pub fn new(timestamp: Timestamp, value: f32) -> Self {
        Self {
            timestamp,
            value,
            tier: Tier::BufferOnly,
        }
    }

    /// Same reading with its tier moved forward to `tier`.
    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = self.tier.advance(tier);
        self
    }

    /// Encode as the 9-byte little-endian blob stored in the persistent tier.
    pub fn to_blob(&self) -> [u8; MEASUREMENT_BLOB_LEN] {
        let mut blob = [0u8; MEASUREMENT_BLOB_LEN];
        blob[0..4].copy_from_slice(&self.timestamp.to_le_bytes());
        blob[4..8].copy_from_slice(&self.value.to_le_bytes());
        blob[8] = self.tier.code();
        blob
    }

    /// Decode a blob written by [`Measurement::to_blob`].
    pub fn from_blob(key: &str, bytes: &[u8]) -> Result<Self, StorageError> {
        if bytes.len() != MEASUREMENT_BLOB_LEN {
            return Err(StorageError::Corrupt {
                key: key.to_string(),
                reason: format!(
                    "expected {} bytes, found {}",
                    MEASUREMENT_BLOB_LEN,
                    bytes.len()
                ),
            });
        }

        let mut ts = [0u8; 4];
        ts.copy_from_slice(&bytes[0..4]);
        let mut value = [0u8; 4];
        value.copy_from_slice(&bytes[4..8]);
        let tier = Tier::from_code(bytes[8]).ok_or_else(|| StorageError::Corrupt {
            key: key.to_string(),
            reason: format!("unknown tier code {}", bytes[8]),
        })?;

        Ok(Self {
            timestamp: u32::from_le_bytes(ts),
            value: f32::from_le_bytes(value),
            tier,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
