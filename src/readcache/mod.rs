//! Read cache: a second, memory-only allocator that caches records
//! promoted from the read-only region or disk, reachable through the
//! hash index itself rather than a side table — a hash entry with its
//! `readcache` bit set stores a cache slot index instead of a real log
//! address (see [`crate::index::bucket::HashBucketEntry::readcache`]).
//! Evicted with a second-chance (clock) policy instead of strict LRU;
//! eviction best-effort CAS-restores the hash entry it shadowed back to
//! the real log address underneath it.
//!
//! Grounded on the spec's §4.6 description of the read cache as a
//! second allocator plus a CAS-based eviction callback, expressed with
//! the same slot-pool shape as [`crate::log::HybridLogAllocator`]'s page
//! ring but backed purely by memory (no device, no flush) since cached
//! entries are always reconstructible from the primary log.

use crate::address::Address;
use crate::config::ReadCacheSettings;
use crate::index::key_hash::KeyHash;
use crate::index::HashIndex;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

struct CacheSlot<V> {
    value: RwLock<Option<V>>,
    key_hash: AtomicU64,
    previous_address: AtomicU64,
    referenced: AtomicBool,
}

impl<V> CacheSlot<V> {
    fn empty() -> Self {
        Self {
            value: RwLock::new(None),
            key_hash: AtomicU64::new(0),
            previous_address: AtomicU64::new(0),
            referenced: AtomicBool::new(false),
        }
    }
}

/// A bounded, second-chance-eviction cache addressed by slot index —
/// the same index a hash entry's address field carries once its
/// `readcache` bit is set.
pub struct ReadCache<V> {
    capacity: usize,
    slots: Vec<CacheSlot<V>>,
    clock_hand: AtomicU64,
    free: RwLock<Vec<usize>>,
    index: Arc<HashIndex>,
}

impl<V: Clone> ReadCache<V> {
    pub fn new(settings: &ReadCacheSettings, index: Arc<HashIndex>) -> Self {
        let page_bytes = 1usize << settings.page_size_bits;
        let memory_bytes = 1usize << settings.memory_size_bits;
        let capacity = (memory_bytes / page_bytes).max(16);
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(CacheSlot::empty());
        }
        Self {
            capacity,
            slots,
            clock_hand: AtomicU64::new(0),
            free: RwLock::new((0..capacity).collect()),
            index,
        }
    }

    /// Looks up a cached value by slot index. `None` means the slot has
    /// since been evicted; the caller falls back to `previous_address`.
    pub fn get(&self, slot_index: usize) -> Option<V> {
        let slot = self.slots.get(slot_index)?;
        let value = slot.value.read().clone()?;
        slot.referenced.store(true, Ordering::Release);
        Some(value)
    }

    /// The real log address a (possibly now-evicted) cache slot used to
    /// shadow, so a miss here can still fall back to the main log
    /// instead of reporting the key absent.
    pub fn previous_address(&self, slot_index: usize) -> Address {
        self.slots
            .get(slot_index)
            .map(|s| Address::from_raw(s.previous_address.load(Ordering::Acquire)))
            .unwrap_or(Address::INVALID)
    }

    /// Caches `value` (read from `previous_address` in the main log)
    /// under `key_hash`, returning the slot index the caller publishes
    /// into the hash entry with the `readcache` bit set.
    pub fn insert(&self, key_hash: KeyHash, previous_address: Address, value: V) -> usize {
        let slot_idx = self.acquire_slot();
        let slot = &self.slots[slot_idx];
        *slot.value.write() = Some(value);
        slot.key_hash.store(key_hash.raw(), Ordering::Release);
        slot.previous_address
            .store(previous_address.raw(), Ordering::Release);
        slot.referenced.store(true, Ordering::Release);
        slot_idx
    }

    fn acquire_slot(&self) -> usize {
        if let Some(idx) = self.free.write().pop() {
            return idx;
        }
        self.evict_one()
    }

    /// Clock/second-chance eviction: sweep slots starting at the hand; a
    /// referenced slot gets its bit cleared and a reprieve, an
    /// unreferenced slot is evicted and best-effort CAS-unlinked from
    /// whatever hash bucket still points at it.
    fn evict_one(&self) -> usize {
        loop {
            let hand = self.clock_hand.fetch_add(1, Ordering::AcqRel) as usize % self.capacity;
            let slot = &self.slots[hand];
            if slot.referenced.swap(false, Ordering::AcqRel) {
                continue;
            }
            let mut value = slot.value.write();
            if value.is_some() {
                *value = None;
                let key_hash = KeyHash::from_raw(slot.key_hash.load(Ordering::Acquire));
                let previous = Address::from_raw(slot.previous_address.load(Ordering::Acquire));
                drop(value);
                self.index.evict_readcache_entry(key_hash, hand, previous);
                return hand;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.capacity - self.free.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ReadCacheSettings {
        ReadCacheSettings {
            page_size_bits: 10,
            memory_size_bits: 14, // 16 slots
            second_chance_fraction: 0.5,
        }
    }

    #[test]
    fn insert_then_get() {
        let index = Arc::new(HashIndex::new(16));
        let cache: ReadCache<u64> = ReadCache::new(&settings(), index);
        let slot = cache.insert(KeyHash::of(&1u64), Address::new(1, 0), 100);
        assert_eq!(cache.get(slot), Some(100));
    }

    #[test]
    fn eviction_restores_hash_entry_to_previous_address() {
        let index = Arc::new(HashIndex::new(16));
        let cache: ReadCache<u64> = ReadCache::new(&settings(), index.clone());

        let key_hash = KeyHash::of(&1u64);
        let previous = Address::new(1, 0);
        let found = index.find_or_create_entry(key_hash);
        let slot = cache.insert(key_hash, previous, 100);
        assert!(index.try_update_entry(&found, Address::from_raw(slot as u64), key_hash.tag(), true));

        // Churn enough other keys through the cache to force the first
        // slot to be reclaimed via second-chance eviction.
        for i in 0..64u64 {
            let kh = KeyHash::of(&(i + 1000));
            cache.insert(kh, Address::new(1, i), i);
        }
        assert!(cache.len() <= 16);

        let found_after = index.find_entry(key_hash);
        assert!(found_after.found());
        assert!(!found_after.entry.readcache());
        assert_eq!(found_after.entry.address(), previous);
    }

    #[test]
    fn eviction_makes_room_under_pressure() {
        let index = Arc::new(HashIndex::new(16));
        let cache: ReadCache<u64> = ReadCache::new(&settings(), index);
        for i in 0..64u64 {
            cache.insert(KeyHash::of(&i), Address::new(1, i), i);
        }
        assert!(cache.len() <= 16);
    }
}
