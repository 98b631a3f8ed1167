//! Query engine: point and range lookups across every tier.
//!
//! Point lookups walk cache, persistent tier, then the edge peer, promoting
//! what they recover. Range lookups never reach the edge; they trust the
//! cache alone when its bounds cover the interval and it holds as many
//! records as the sampling cadence predicts.

use std::collections::HashSet;
use std::sync::Arc;

use strata_core::{Measurement, StrataConfig, Tier, Timestamp};
use strata_edge::EdgeChannel;
use strata_storage::{MeasurementCache, PersistentStore};

/// Which tier answered a point lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuerySource {
    Cache,
    Persistent,
    Edge,
}

/// Result of a range lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeAnswer {
    /// Cache matches first, then persistent matches, at most `cap` in all.
    pub measurements: Vec<Measurement>,
    /// How many came from the cache.
    pub from_cache: usize,
    /// How many came from the persistent tier.
    pub from_persistent: usize,
    /// The cache answer was complete and the persistent tier was not read.
    pub cache_authoritative: bool,
    /// Persistent results copied into the cache.
    pub promoted: usize,
}

impl RangeAnswer {
    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }
}

/// Number of samples a fully populated `[start, end]` should hold at the
/// given cadence. A heuristic: missed samples make it an overestimate.
pub fn expected_count(start: Timestamp, end: Timestamp, sampling_interval: u32) -> usize {
    if end < start {
        return 0;
    }
    ((end - start) / sampling_interval.max(1)) as usize + 1
}

/// Answers point and range queries over the cache, the persistent tier and
/// the edge channel.
pub struct QueryEngine {
    cache: Arc<MeasurementCache>,
    store: Arc<PersistentStore>,
    edge: Arc<EdgeChannel>,
    sampling_interval: u32,
    promotion_limit: usize,
}

impl QueryEngine {
    pub fn new(
        cache: Arc<MeasurementCache>,
        store: Arc<PersistentStore>,
        edge: Arc<EdgeChannel>,
        config: &StrataConfig,
    ) -> Self {
        Self {
            cache,
            store,
            edge,
            sampling_interval: config.sampling_interval_secs.max(1),
            promotion_limit: config.promotion_limit(),
        }
    }

    /// Look up one measurement.
    pub async fn get(&self, timestamp: Timestamp) -> Option<Measurement> {
        self.locate(timestamp).await.map(|(m, _)| m)
    }

    /// Look up one measurement and report which tier answered.
    ///
    /// A record found in the persistent tier is promoted into the cache. A
    /// record recovered from the edge is written back to the persistent tier
    /// and cached as [`Tier::Offloaded`]. Storage and channel failures are
    /// logged and treated as a miss at that tier.
    pub async fn locate(&self, timestamp: Timestamp) -> Option<(Measurement, QuerySource)> {
        if let Some(m) = self.cache.find(timestamp) {
            return Some((m, QuerySource::Cache));
        }

        match self.store.get(timestamp) {
            Ok(Some(m)) => {
                if let Err(e) = self.cache.promote(m) {
                    tracing::warn!(timestamp, error = %e, "Failed to promote persisted record");
                }
                return Some((m, QuerySource::Persistent));
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(timestamp, error = %e, "Persistent lookup failed");
            }
        }

        let recovered = match self.edge.request(timestamp).await {
            Ok(m) => m.with_tier(Tier::Offloaded),
            Err(e) => {
                tracing::info!(timestamp, error = %e, "Measurement not found on any tier");
                return None;
            }
        };

        if let Err(e) = self.store.put_indexed(&recovered) {
            tracing::error!(timestamp, error = %e, "Failed to write back edge record");
        }
        if let Err(e) = self.cache.promote(recovered) {
            tracing::warn!(timestamp, error = %e, "Failed to cache edge record");
        }
        Some((recovered, QuerySource::Edge))
    }

    /// Measurements with `start <= timestamp <= end`, at most `cap`.
    ///
    /// Returns an empty answer when nothing matches or `end < start`.
    pub fn get_range(&self, start: Timestamp, end: Timestamp, cap: usize) -> RangeAnswer {
        if end < start || cap == 0 {
            return RangeAnswer::default();
        }

        let expected = expected_count(start, end, self.sampling_interval);
        let (cached, covered) = self.cache.range_covering(start, end, cap);

        if covered && cached.len() == expected {
            tracing::debug!(start, end, count = cached.len(), "Range answered from cache");
            return RangeAnswer {
                from_cache: cached.len(),
                measurements: cached,
                cache_authoritative: true,
                ..RangeAnswer::default()
            };
        }

        let remaining = cap - cached.len();
        let persisted = if remaining == 0 {
            Vec::new()
        } else {
            self.persistent_range(start, end, &cached, remaining)
        };

        let mut answer = RangeAnswer {
            from_cache: cached.len(),
            from_persistent: persisted.len(),
            measurements: cached,
            ..RangeAnswer::default()
        };

        if answer.from_persistent > 0
            && answer.from_cache + answer.from_persistent <= self.promotion_limit
        {
            for m in &persisted {
                match self.cache.promote(*m) {
                    Ok(true) => answer.promoted += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(timestamp = m.timestamp, error = %e, "Failed to promote range record");
                    }
                }
            }
        }

        answer.measurements.extend(persisted);
        tracing::debug!(
            start,
            end,
            from_cache = answer.from_cache,
            from_persistent = answer.from_persistent,
            promoted = answer.promoted,
            "Range answered"
        );
        answer
    }

    /// Persistent matches not already in `cached`, at most `limit`.
    fn persistent_range(
        &self,
        start: Timestamp,
        end: Timestamp,
        cached: &[Measurement],
        limit: usize,
    ) -> Vec<Measurement> {
        let seen: HashSet<Timestamp> = cached.iter().map(|m| m.timestamp).collect();
        // Records can sit in both tiers; read enough to fill `limit` after
        // dropping the overlap.
        match self.store.range(start, end, limit + seen.len()) {
            Ok(found) => found
                .into_iter()
                .filter(|m| !seen.contains(&m.timestamp))
                .take(limit)
                .collect(),
            Err(e) => {
                tracing::error!(start, end, error = %e, "Persistent range lookup failed");
                Vec::new()
            }
        }
    }

    pub fn cache(&self) -> &Arc<MeasurementCache> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<PersistentStore> {
        &self.store
    }
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("sampling_interval", &self.sampling_interval)
            .field("promotion_limit", &self.promotion_limit)
            .finish()
    }
}
