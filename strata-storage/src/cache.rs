//! Bounded ring buffer of recent measurements.
//!
//! The cache is the only ingestion point. When it is full, the oldest slot is
//! evicted; a record that exists nowhere else is spilled to the persistent
//! tier (record and index entry together) before its slot is reused.
//!
//! One coarse mutex guards the slots, the occupancy window and the cached
//! `earliest`/`latest` bounds. Lock order is cache, then store: the store
//! never calls back into the cache.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use strata_core::{Measurement, StorageError, Tier, Timestamp};

use crate::store::PersistentStore;

/// Result of [`MeasurementCache::add`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AddOutcome {
    /// The record pushed out of the oldest slot, with its tier after the
    /// spill, if the cache was full.
    pub evicted: Option<Measurement>,
}

/// Result of [`MeasurementCache::flush_half_to_persistent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushReport {
    /// Records newly written to the persistent tier.
    pub persisted: usize,
    /// Occupied slots skipped because they were already persisted.
    pub skipped: usize,
    /// Writes that failed; those records stay `BufferOnly`.
    pub failed: usize,
}

/// Cache activity counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// `find` calls that returned a record.
    pub hits: u64,
    /// `find` calls that did not.
    pub misses: u64,
    /// Records pushed out of the oldest slot.
    pub evictions: u64,
    /// Evictions that had to write the record to the persistent tier.
    pub spills: u64,
    /// Records inserted from a lower tier.
    pub promotions: u64,
}

impl CacheStats {
    /// Hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
struct CacheState {
    slots: Vec<Option<Measurement>>,
    head: usize,
    tail: usize,
    count: usize,
    earliest: Option<Timestamp>,
    latest: Option<Timestamp>,
    stats: CacheStats,
}

impl CacheState {
    fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            head: 0,
            tail: 0,
            count: 0,
            earliest: None,
            latest: None,
            stats: CacheStats::default(),
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn reset(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.head = 0;
        self.tail = 0;
        self.count = 0;
        self.earliest = None;
        self.latest = None;
    }

    /// Slot indices from oldest to newest.
    fn occupied(&self) -> impl Iterator<Item = usize> + '_ {
        let capacity = self.capacity();
        (0..self.count).map(move |i| (self.tail + i) % capacity)
    }

    fn records(&self) -> impl Iterator<Item = &Measurement> + '_ {
        self.occupied().filter_map(|idx| self.slots[idx].as_ref())
    }

    fn position(&self, timestamp: Timestamp) -> Option<usize> {
        self.occupied().find(|&idx| {
            self.slots[idx]
                .as_ref()
                .is_some_and(|m| m.timestamp == timestamp)
        })
    }

    fn mark_offloaded(&mut self, timestamp: Timestamp) -> bool {
        match self.position(timestamp) {
            Some(idx) => {
                if let Some(m) = self.slots[idx].as_mut() {
                    m.tier = m.tier.advance(Tier::Offloaded);
                }
                true
            }
            None => false,
        }
    }

    fn extend_bounds(&mut self, timestamp: Timestamp) {
        self.earliest = Some(self.earliest.map_or(timestamp, |e| e.min(timestamp)));
        self.latest = Some(self.latest.map_or(timestamp, |l| l.max(timestamp)));
    }

    fn rescan_bounds(&mut self) {
        let (earliest, latest) = self.records().fold((None, None), |(lo, hi), m| {
            (
                Some(lo.map_or(m.timestamp, |lo: Timestamp| lo.min(m.timestamp))),
                Some(hi.map_or(m.timestamp, |hi: Timestamp| hi.max(m.timestamp))),
            )
        });
        self.earliest = earliest;
        self.latest = latest;
    }
}

/// Fixed-capacity measurement cache in front of a [`PersistentStore`].
pub struct MeasurementCache {
    state: Mutex<CacheState>,
    store: Arc<PersistentStore>,
}

impl MeasurementCache {
    /// Create an empty cache of `capacity` slots (at least one).
    pub fn new(capacity: usize, store: Arc<PersistentStore>) -> Self {
        Self {
            state: Mutex::new(CacheState::new(capacity.max(1))),
            store,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // State is consistent between statements, so a poisoned lock is usable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn store(&self) -> &Arc<PersistentStore> {
        &self.store
    }

    /// Empty the cache. Statistics are kept.
    pub fn init(&self) {
        let mut state = self.lock();
        if state.count > 0 {
            state.reset();
        }
    }

    /// Insert a measurement at the head, evicting the oldest slot first when
    /// full.
    ///
    /// If the evicted record is still `BufferOnly` it is written to the
    /// persistent tier and indexed before its slot is reused. When that write
    /// fails the error is returned and the cache is left untouched, so the
    /// record is never dropped.
    pub fn add(&self, m: Measurement) -> Result<AddOutcome, StorageError> {
        let mut state = self.lock();
        let evicted = self.insert_locked(&mut state, m)?;
        if evicted.is_some() {
            state.rescan_bounds();
        } else {
            state.extend_bounds(m.timestamp);
        }
        Ok(AddOutcome { evicted })
    }

    fn insert_locked(
        &self,
        state: &mut CacheState,
        m: Measurement,
    ) -> Result<Option<Measurement>, StorageError> {
        let capacity = state.capacity();
        let mut evicted = None;

        if state.count == capacity {
            let tail = state.tail;
            if let Some(mut oldest) = state.slots[tail] {
                if oldest.tier == Tier::BufferOnly {
                    self.store.put_indexed(&oldest)?;
                    oldest = oldest.with_tier(Tier::Persisted);
                    state.stats.spills += 1;
                    tracing::debug!(timestamp = oldest.timestamp, "Evicted record spilled");
                }
                evicted = Some(oldest);
            }
            state.slots[tail] = None;
            state.tail = (tail + 1) % capacity;
            state.count -= 1;
            state.stats.evictions += 1;
        }

        let head = state.head;
        state.slots[head] = Some(m);
        state.head = (head + 1) % capacity;
        state.count += 1;
        Ok(evicted)
    }

    /// Whether occupancy has reached `threshold_pct` percent of capacity.
    pub fn is_threshold_full(&self, threshold_pct: u8) -> bool {
        let state = self.lock();
        let threshold = (state.capacity() * usize::from(threshold_pct) / 100).max(1);
        state.count >= threshold
    }

    /// Persist up to half the capacity of `BufferOnly` records, oldest first.
    ///
    /// Records already persisted are skipped. A failed write is logged and the
    /// record stays `BufferOnly` for the next flush.
    pub fn flush_half_to_persistent(&self) -> FlushReport {
        let mut state = self.lock();
        let quota = state.capacity() / 2;
        let slots: Vec<usize> = state.occupied().collect();
        let mut report = FlushReport::default();

        for idx in slots {
            if report.persisted >= quota {
                break;
            }
            let Some(m) = state.slots[idx] else { continue };
            if m.tier != Tier::BufferOnly {
                report.skipped += 1;
                continue;
            }
            match self.store.put_indexed(&m) {
                Ok(_) => {
                    state.slots[idx] = Some(m.with_tier(Tier::Persisted));
                    report.persisted += 1;
                }
                Err(e) => {
                    tracing::error!(timestamp = m.timestamp, error = %e, "Failed to flush record");
                    report.failed += 1;
                }
            }
        }

        if report.persisted > 0 || report.failed > 0 {
            tracing::info!(
                persisted = report.persisted,
                skipped = report.skipped,
                failed = report.failed,
                "Cache flushed to persistent tier"
            );
        }
        report
    }

    /// Look up one timestamp.
    pub fn find(&self, timestamp: Timestamp) -> Option<Measurement> {
        let mut state = self.lock();
        let found = state
            .position(timestamp)
            .and_then(|idx| state.slots[idx]);
        if found.is_some() {
            state.stats.hits += 1;
        } else {
            state.stats.misses += 1;
        }
        found
    }

    /// Cached records with `start <= timestamp <= end`, oldest slot first, at
    /// most `cap` of them.
    pub fn range(&self, start: Timestamp, end: Timestamp, cap: usize) -> Vec<Measurement> {
        self.range_covering(start, end, cap).0
    }

    /// [`MeasurementCache::range`] plus whether `[start, end]` lies within the
    /// cached `[earliest, latest]` bounds, read under the same lock.
    pub fn range_covering(
        &self,
        start: Timestamp,
        end: Timestamp,
        cap: usize,
    ) -> (Vec<Measurement>, bool) {
        let state = self.lock();
        let matches = state
            .records()
            .filter(|m| m.timestamp >= start && m.timestamp <= end)
            .take(cap)
            .copied()
            .collect();
        let covered = matches!(
            (state.earliest, state.latest),
            (Some(lo), Some(hi)) if lo <= start && end <= hi
        );
        (matches, covered)
    }

    /// Cached `(earliest, latest)` bounds, if any record is cached.
    pub fn coverage(&self) -> Option<(Timestamp, Timestamp)> {
        let state = self.lock();
        state.earliest.zip(state.latest)
    }

    /// Recompute the earliest bound from the occupied slots.
    pub fn rescan_earliest(&self) -> Option<Timestamp> {
        let mut state = self.lock();
        let earliest = state.records().map(|m| m.timestamp).min();
        state.earliest = earliest;
        earliest
    }

    /// Insert a record recovered from a lower tier.
    ///
    /// Returns `Ok(false)` without touching the ring when the timestamp is
    /// already cached. The record keeps its tier, except that a `Persisted`
    /// copy whose key has since been retired is cached as `Offloaded`.
    /// Promotion can insert out of timestamp order, so both bounds are
    /// rescanned.
    pub fn promote(&self, mut m: Measurement) -> Result<bool, StorageError> {
        let mut state = self.lock();
        if state.position(m.timestamp).is_some() {
            return Ok(false);
        }
        // Checked under the cache lock, which `commit_offload` also holds
        // across its retire.
        if m.tier == Tier::Persisted && !self.store.contains(m.timestamp)? {
            m.tier = Tier::Offloaded;
        }
        self.insert_locked(&mut state, m)?;
        state.rescan_bounds();
        state.stats.promotions += 1;
        tracing::debug!(timestamp = m.timestamp, tier = %m.tier, "Record promoted into cache");
        Ok(true)
    }

    /// Tag the cached copy of `timestamp` as offloaded. Returns whether a
    /// cached copy existed.
    pub fn mark_offloaded(&self, timestamp: Timestamp) -> bool {
        self.lock().mark_offloaded(timestamp)
    }

    /// Retire `retired` from the persistent tier, then tag the cached copies
    /// of `delivered` as offloaded.
    ///
    /// Both steps run under the cache lock, so a concurrent `promote` sees
    /// either the record still on disk or the retired key. Cached copies are
    /// tagged only once the retire has committed; on error nothing changes.
    /// Returns the number of records deleted.
    pub fn commit_offload(
        &self,
        retired: &[Timestamp],
        delivered: &[Timestamp],
    ) -> Result<usize, StorageError> {
        let mut state = self.lock();
        let deleted = self.store.retire(retired)?;
        for &ts in delivered {
            state.mark_offloaded(ts);
        }
        Ok(deleted)
    }

    pub fn len(&self) -> usize {
        self.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    /// Cached records, oldest slot first.
    pub fn snapshot(&self) -> Vec<Measurement> {
        self.lock().records().copied().collect()
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }
}

impl std::fmt::Debug for MeasurementCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MeasurementCache")
            .field("capacity", &state.capacity())
            .field("count", &state.count)
            .field("earliest", &state.earliest)
            .field("latest", &state.latest)
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================


// =============================================================================
// PROPERTY TESTS
// =============================================================================
