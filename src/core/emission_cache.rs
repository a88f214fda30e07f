//! Emission cache with TTL and single-flight guard.
//!
//! **Why**: several nodes and events ask for the same process figure at once;
//! the in-flight set collapses them into one network read, and the TTL keeps
//! repeated renders off the network.
//!
//! **Used by**: EmissionCoordinator only (private state; UI never touches it)
//!
//! Product readings are never stored here: their authoritative value is a live
//! request-time computation. Products still go through the in-flight set.
//!
//! Every invalidation bumps a generation counter. A fetch remembers the
//! generation it started under and its result is only stored if nothing was
//! invalidated meanwhile, so a read racing a recalculation never repopulates
//! the cache with a pre-recalculation figure.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use log::trace;

use crate::entities::{BusinessId, EmissionSnapshot, EntityKind};

/// Cache statistics for monitoring hit rate and deduplication
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    deduplicated: AtomicU64,
}

impl CacheStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deduplicated(&self) {
        self.deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Requests answered "already in flight"
    pub fn deduplicated(&self) -> u64 {
        self.deduplicated.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 { 0.0 } else { self.hits() as f64 / total as f64 }
    }
}

/// Cached process reading
#[derive(Debug, Clone, Copy)]
pub struct CacheEntry {
    pub entity_id: BusinessId,
    pub entity_kind: EntityKind,
    pub payload: EmissionSnapshot,
    pub fetched_at: Instant,
}

#[derive(Debug)]
pub struct EmissionCache {
    processes: Mutex<HashMap<BusinessId, CacheEntry>>,
    in_flight: Mutex<HashSet<(EntityKind, BusinessId)>>,
    /// Bumped (under the `processes` lock) on every invalidation
    generation: AtomicU64,
    ttl: Duration,
    stats: CacheStats,
}

impl EmissionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            processes: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            generation: AtomicU64::new(0),
            ttl,
            stats: CacheStats::default(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    // ========== Process entries ==========

    /// Fresh cached reading for a process, if any
    pub fn get_process(&self, id: BusinessId) -> Option<EmissionSnapshot> {
        self.get_process_at(id, Instant::now())
    }

    /// Same as [`get_process`](Self::get_process) against an explicit clock
    pub fn get_process_at(&self, id: BusinessId, now: Instant) -> Option<EmissionSnapshot> {
        let mut entries = self.processes.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(&id) {
            Some(entry) if now.saturating_duration_since(entry.fetched_at) < self.ttl => {
                self.stats.record_hit();
                Some(entry.payload)
            }
            Some(_) => {
                entries.remove(&id);
                trace!("EmissionCache: process {} expired", id);
                self.stats.record_miss();
                None
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    #[cfg(test)]
    pub fn put_process_at(&self, id: BusinessId, payload: EmissionSnapshot, fetched_at: Instant) {
        self.processes.lock().unwrap_or_else(|e| e.into_inner()).insert(
            id,
            CacheEntry {
                entity_id: id,
                entity_kind: EntityKind::Process,
                payload,
                fetched_at,
            },
        );
    }

    /// Store a reading fetched under `generation`; skipped (returns false) when
    /// the cache was invalidated after the fetch began.
    pub fn put_process_if_current(&self, id: BusinessId, payload: EmissionSnapshot, generation: u64) -> bool {
        let mut entries = self.processes.lock().unwrap_or_else(|e| e.into_inner());
        if self.generation.load(Ordering::Acquire) != generation {
            trace!("EmissionCache: process {} invalidated while in flight, not stored", id);
            return false;
        }
        entries.insert(
            id,
            CacheEntry {
                entity_id: id,
                entity_kind: EntityKind::Process,
                payload,
                fetched_at: Instant::now(),
            },
        );
        true
    }

    pub fn invalidate_process(&self, id: BusinessId) {
        let mut entries = self.processes.lock().unwrap_or_else(|e| e.into_inner());
        self.generation.fetch_add(1, Ordering::AcqRel);
        if entries.remove(&id).is_some() {
            trace!("EmissionCache: invalidated process {}", id);
        }
    }

    /// Drop every cached reading (in-flight markers are untouched)
    pub fn clear(&self) {
        let mut entries = self.processes.lock().unwrap_or_else(|e| e.into_inner());
        self.generation.fetch_add(1, Ordering::AcqRel);
        entries.clear();
    }

    /// Current invalidation generation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.processes.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ========== Single-flight ==========

    /// Mark `(kind, id)` in flight. Returns None when another fetch already is.
    ///
    /// The marker lives exactly as long as the returned guard, so it is cleared
    /// on success, on error and when the fetching future is dropped.
    pub fn try_begin(&self, kind: EntityKind, id: BusinessId) -> Option<InFlightGuard<'_>> {
        let inserted = self
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((kind, id));
        if !inserted {
            self.stats.record_deduplicated();
            trace!("EmissionCache: {} {} already in flight", kind, id);
            return None;
        }
        Some(InFlightGuard {
            cache: self,
            key: (kind, id),
            generation: self.generation(),
        })
    }
}

/// In-flight marker; removes itself from the set on drop.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    cache: &'a EmissionCache,
    key: (EntityKind, BusinessId),
    generation: u64,
}

impl InFlightGuard<'_> {
    /// Cache generation when the fetch began
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.cache
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_entry_expires_after_ttl() {
        let cache = EmissionCache::new(Duration::from_secs(30));
        let t0 = Instant::now();
        cache.put_process_at(BusinessId(1), EmissionSnapshot::attributed(5.0), t0);

        let fresh = cache.get_process_at(BusinessId(1), t0 + Duration::from_secs(29));
        assert_eq!(fresh.map(|s| s.attributed_emission), Some(5.0));

        assert!(cache.get_process_at(BusinessId(1), t0 + Duration::from_secs(30)).is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
    }

    #[test]
    fn test_in_flight_guard_blocks_duplicates_until_dropped() {
        let cache = EmissionCache::new(Duration::from_secs(30));

        let guard = cache.try_begin(EntityKind::Process, BusinessId(7));
        assert!(guard.is_some());
        assert!(cache.try_begin(EntityKind::Process, BusinessId(7)).is_none());
        // Different kind, same id: independent
        assert!(cache.try_begin(EntityKind::Product, BusinessId(7)).is_some());

        drop(guard);
        assert!(cache.try_begin(EntityKind::Process, BusinessId(7)).is_some());
        assert_eq!(cache.stats().deduplicated(), 1);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache = EmissionCache::new(Duration::from_secs(30));
        cache.put_process_at(BusinessId(1), EmissionSnapshot::attributed(1.0), Instant::now());
        cache.put_process_at(BusinessId(2), EmissionSnapshot::attributed(2.0), Instant::now());

        cache.invalidate_process(BusinessId(1));
        assert!(cache.get_process(BusinessId(1)).is_none());
        assert!(cache.get_process(BusinessId(2)).is_some());

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_reading_fetched_before_invalidation_is_dropped() {
        let cache = EmissionCache::new(Duration::from_secs(30));

        let guard = cache.try_begin(EntityKind::Process, BusinessId(1)).unwrap();
        cache.clear();
        assert!(!cache.put_process_if_current(BusinessId(1), EmissionSnapshot::attributed(10.0), guard.generation()));
        assert!(cache.get_process(BusinessId(1)).is_none());
        drop(guard);

        let guard = cache.try_begin(EntityKind::Process, BusinessId(1)).unwrap();
        cache.invalidate_process(BusinessId(2));
        assert!(!cache.put_process_if_current(BusinessId(1), EmissionSnapshot::attributed(10.0), guard.generation()));
        drop(guard);

        let guard = cache.try_begin(EntityKind::Process, BusinessId(1)).unwrap();
        assert!(cache.put_process_if_current(BusinessId(1), EmissionSnapshot::attributed(12.0), guard.generation()));
        assert_eq!(cache.get_process(BusinessId(1)).map(|s| s.attributed_emission), Some(12.0));
    }
}
