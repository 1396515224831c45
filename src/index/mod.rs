//! Latch-free(ish) hash index over the hybrid log.
//!
//! `HashIndex` maps a key's hash to the address of the newest log record
//! for that key. Lookups and inserts only ever take a read lock over the
//! current table snapshot (an `Arc<HashTable>` clone is effectively
//! free); [`HashIndex::grow`] is the only writer, building a brand new
//! table and atomically swapping it in. That swap is what the spec's
//! "two versions of the table array" data model element refers to: the
//! old `Arc<HashTable>` stays valid for any reader still holding a clone
//! of it, and is simply dropped once the last clone goes away — no
//! separate epoch-protected reclamation is needed for the table itself
//! because `Arc` already gives us exactly that lifetime guarantee.

pub mod bucket;
pub mod key_hash;
pub mod overflow;

use crate::address::{Address, INVALID_ADDRESS};
use crate::epoch::EpochManager;
use bucket::{AtomicHashBucketEntry, ENTRIES_PER_BUCKET, HashBucket, HashBucketEntry};
use key_hash::KeyHash;
use overflow::{OverflowAddress, OverflowAllocator};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A find result: the entry found (or `UNUSED` if absent) plus a handle
/// back to the exact slot, so a follow-up `try_update_entry` can CAS it
/// without re-walking the bucket chain.
pub struct FindResult {
    pub entry: HashBucketEntry,
    slot: *const AtomicHashBucketEntry,
    // Keeps the table snapshot this slot pointer is borrowed from alive
    // for at least as long as the FindResult itself.
    _table: Arc<HashTable>,
}

impl FindResult {
    pub fn found(&self) -> bool {
        !self.entry.is_unused() && !self.entry.tentative()
    }
}

struct HashTable {
    buckets: Vec<HashBucket>,
    overflow: OverflowAllocator,
}

impl HashTable {
    fn new(size: u64) -> Self {
        let mut buckets = Vec::with_capacity(size as usize);
        buckets.resize_with(size as usize, HashBucket::new);
        Self {
            buckets,
            overflow: OverflowAllocator::new(),
        }
    }

    fn size(&self) -> u64 {
        self.buckets.len() as u64
    }

    fn overflow_bucket(&self, addr: OverflowAddress) -> &HashBucket {
        // SAFETY: `addr` always comes from this table's own `overflow`
        // allocator, and the allocator never frees a bucket that is
        // still reachable from a live overflow pointer.
        unsafe { &*self.overflow.get(addr) }
    }
}

pub struct HashIndex {
    table: RwLock<Arc<HashTable>>,
}

impl HashIndex {
    pub fn new(table_size: u64) -> Self {
        Self {
            table: RwLock::new(Arc::new(HashTable::new(table_size.next_power_of_two()))),
        }
    }

    pub fn table_size(&self) -> u64 {
        self.table.read().size()
    }

    fn snapshot(&self) -> Arc<HashTable> {
        self.table.read().clone()
    }

    fn locate_bucket<'t>(table: &'t HashTable, key_hash: KeyHash) -> &'t HashBucket {
        let idx = key_hash.table_index(table.size());
        &table.buckets[idx as usize]
    }

    /// Walks the bucket chain for `key_hash`, returning the first
    /// non-tentative entry whose tag matches. Tag collisions between
    /// distinct keys are expected and resolved by the caller comparing
    /// full keys at the log record the address points to.
    pub fn find_entry(&self, key_hash: KeyHash) -> FindResult {
        let table = self.snapshot();
        let tag = key_hash.tag();
        let mut bucket = Self::locate_bucket(&table, key_hash);
        loop {
            for slot in bucket.entries.iter() {
                let entry = slot.load();
                if !entry.is_unused() && entry.tag() == tag && !entry.tentative() {
                    let slot_ptr = slot as *const AtomicHashBucketEntry;
                    return FindResult {
                        entry,
                        slot: slot_ptr,
                        _table: table,
                    };
                }
            }
            let overflow = bucket.overflow.load();
            if overflow.is_unused() {
                return FindResult {
                    entry: HashBucketEntry::UNUSED,
                    slot: std::ptr::null(),
                    _table: table,
                };
            }
            bucket = table.overflow_bucket(overflow.address().raw());
        }
    }

    fn has_conflicting_entry(table: &HashTable, key_hash: KeyHash) -> bool {
        let tag = key_hash.tag();
        let mut bucket = Self::locate_bucket(table, key_hash);
        loop {
            for slot in bucket.entries.iter() {
                let entry = slot.load();
                if !entry.is_unused() && entry.tag() == tag && !entry.tentative() {
                    return true;
                }
            }
            let overflow = bucket.overflow.load();
            if overflow.is_unused() {
                return false;
            }
            bucket = table.overflow_bucket(overflow.address().raw());
        }
    }

    /// Finds an existing entry, or atomically claims a slot for a new
    /// one using FASTER's tentative-insert protocol: claim the slot with
    /// the tentative bit set, re-scan the chain for a conflicting
    /// finalized entry written concurrently by another racer, then
    /// either back out and retry or clear the tentative bit to finalize.
    pub fn find_or_create_entry(&self, key_hash: KeyHash) -> FindResult {
        let tag = key_hash.tag();
        loop {
            let table = self.snapshot();
            let mut bucket = Self::locate_bucket(&table, key_hash);
            let mut free_slot: Option<*const AtomicHashBucketEntry> = None;
            let mut claimed: Option<*const AtomicHashBucketEntry> = None;

            'chain: loop {
                for slot in bucket.entries.iter() {
                    let entry = slot.load();
                    if entry.is_unused() {
                        if free_slot.is_none() {
                            free_slot = Some(slot as *const AtomicHashBucketEntry);
                        }
                        continue;
                    }
                    if entry.tag() == tag && !entry.tentative() {
                        return FindResult {
                            entry,
                            slot: slot as *const AtomicHashBucketEntry,
                            _table: table,
                        };
                    }
                }
                let overflow = bucket.overflow.load();
                if overflow.is_unused() {
                    if let Some(slot_ptr) = free_slot {
                        // SAFETY: slot_ptr borrowed from `table`, kept
                        // alive via `table` below.
                        let slot = unsafe { &*slot_ptr };
                        let desired = HashBucketEntry::new(INVALID_ADDRESS, tag, true, false);
                        if slot.compare_exchange(HashBucketEntry::UNUSED, desired).is_ok() {
                            claimed = Some(slot_ptr);
                        }
                    } else {
                        let new_addr = table.overflow.allocate();
                        let new_overflow = HashBucketEntry::new(
                            Address::from_raw(new_addr),
                            0,
                            false,
                            false,
                        );
                        if bucket
                            .overflow
                            .compare_exchange(HashBucketEntry::UNUSED, new_overflow)
                            .is_ok()
                        {
                            let new_bucket = table.overflow_bucket(new_addr);
                            let slot = &new_bucket.entries[0];
                            let desired = HashBucketEntry::new(INVALID_ADDRESS, tag, true, false);
                            let _ = slot.compare_exchange(HashBucketEntry::UNUSED, desired);
                            claimed = Some(slot as *const AtomicHashBucketEntry);
                        } else {
                            table.overflow.free(new_addr);
                        }
                    }
                    break 'chain;
                }
                bucket = table.overflow_bucket(overflow.address().raw());
            }

            let Some(slot_ptr) = claimed else {
                // Lost the CAS race for the free slot or the overflow
                // link; another thread is inserting concurrently. Retry.
                continue;
            };

            if Self::has_conflicting_entry(&table, key_hash) {
                // SAFETY: slot_ptr still belongs to `table`, alive here.
                let slot = unsafe { &*slot_ptr };
                slot.store(HashBucketEntry::UNUSED);
                continue;
            }

            // SAFETY: slot_ptr still belongs to `table`, alive here.
            let slot = unsafe { &*slot_ptr };
            let finalized = HashBucketEntry::new(INVALID_ADDRESS, tag, false, false);
            slot.store(finalized);
            return FindResult {
                entry: finalized,
                slot: slot_ptr,
                _table: table,
            };
        }
    }

    /// CASes the address of a previously located entry. Fails with
    /// `false` if the entry changed since it was found (another writer
    /// got there first); the caller is expected to retry via
    /// `find_or_create_entry`. `readcache` marks whether `new_address`
    /// is a real log address (`false`) or a read-cache slot index
    /// (`true`) — the caller decides this explicitly rather than it
    /// being silently inherited from whatever the entry previously
    /// pointed at.
    pub fn try_update_entry(
        &self,
        found: &FindResult,
        new_address: Address,
        tag: u16,
        readcache: bool,
    ) -> bool {
        if found.slot.is_null() {
            return false;
        }
        // SAFETY: `found` keeps `_table` alive, so `slot` is valid.
        let slot = unsafe { &*found.slot };
        let desired = HashBucketEntry::new(new_address, tag, false, readcache);
        slot.compare_exchange(found.entry, desired).is_ok()
    }

    /// Best-effort CAS restoration of a read-cache-tagged hash entry
    /// back to the real log address it shadowed. Called by the read
    /// cache when it evicts `slot_index`; a no-op if the entry has
    /// since been overwritten by a writer (the common case under
    /// churn) or no longer points at this slot.
    pub fn evict_readcache_entry(&self, key_hash: KeyHash, slot_index: usize, previous_address: Address) {
        let found = self.find_entry(key_hash);
        if found.slot.is_null() || !found.entry.readcache() {
            return;
        }
        if found.entry.address().raw() != slot_index as u64 {
            return;
        }
        // SAFETY: `found` keeps its table snapshot alive.
        let slot = unsafe { &*found.slot };
        let restored = HashBucketEntry::new(previous_address, found.entry.tag(), false, false);
        let _ = slot.compare_exchange(found.entry, restored);
    }

    /// Counts non-empty, non-tentative entries across every bucket and
    /// overflow chain. `O(table_size)`; meant for the observability
    /// accessor, not the hot path.
    pub fn entry_count(&self) -> u64 {
        let table = self.snapshot();
        let mut count = 0u64;
        for i in 0..table.size() {
            let mut bucket = &table.buckets[i as usize];
            loop {
                for slot in bucket.entries.iter() {
                    let e = slot.load();
                    if !e.is_unused() && !e.tentative() {
                        count += 1;
                    }
                }
                let overflow = bucket.overflow.load();
                if overflow.is_unused() {
                    break;
                }
                bucket = table.overflow_bucket(overflow.address().raw());
            }
        }
        count
    }

    pub fn index_size(&self) -> u64 {
        self.table.read().size()
    }

    /// Doubles the table size, rehashing every live entry into a fresh
    /// table and atomically swapping it in. Concurrent `find`/`upsert`
    /// calls either see the pre-grow table (their snapshot `Arc` was
    /// taken before the swap) or the post-grow one; no operation can
    /// observe a half-built table.
    ///
    /// A bucket entry only carries a 14-bit tag, not the key's full
    /// hash, so recomputing the post-grow bucket index needs the actual
    /// key back from the log. `rehash` is the engine's callback for
    /// that: given a record address, it reads the key and returns its
    /// full [`KeyHash`].
    ///
    /// Growing the table races any operation that is mid-insert against
    /// the pre-resize table: if we simply cloned the old table and
    /// scanned it while it stayed open to concurrent writes, an entry
    /// written into an already-copied bucket would be silently dropped
    /// once the swap lands. We close that window with an epoch drain
    /// *before* copying: every `Read`/`Upsert`/`RMW`/`Delete` wraps its
    /// whole call in an epoch guard, so draining here waits for any
    /// operation that already captured a handle to the current table to
    /// finish its write before we start reading it. We deliberately
    /// drain before taking the table lock (not while holding it) —
    /// holding the lock first would make a fresh operation trying to
    /// snapshot the table block on it forever, which is exactly the
    /// condition the drain is waiting to see clear, a classic
    /// lock/epoch deadlock.
    pub fn grow(&self, epoch: &EpochManager, rehash: impl Fn(Address) -> KeyHash) {
        let target = epoch.bump_current_epoch(|_| {});
        epoch.wait_for_drain(target);

        let mut table_guard = self.table.write();
        let old = table_guard.clone();
        let new_size = old.size() * 2;
        let new_table = HashTable::new(new_size);

        for i in 0..old.size() {
            let mut bucket = &old.buckets[i as usize];
            loop {
                for slot in bucket.entries.iter() {
                    let e = slot.load();
                    if e.is_unused() || e.tentative() {
                        continue;
                    }
                    let key_hash = rehash(e.address());
                    Self::place_entry(&new_table, key_hash, e);
                }
                let overflow = bucket.overflow.load();
                if overflow.is_unused() {
                    break;
                }
                bucket = old.overflow_bucket(overflow.address().raw());
            }
        }

        *table_guard = Arc::new(new_table);
    }

    fn place_entry(table: &HashTable, key_hash: KeyHash, entry: HashBucketEntry) {
        let mut bucket = Self::locate_bucket(table, key_hash);
        loop {
            if let Some(slot) = bucket.entries.iter().find(|s| s.load().is_unused()) {
                slot.store(entry);
                return;
            }
            let overflow = bucket.overflow.load();
            if overflow.is_unused() {
                let new_addr = table.overflow.allocate();
                bucket.overflow.store(HashBucketEntry::new(
                    Address::from_raw(new_addr),
                    0,
                    false,
                    false,
                ));
                table.overflow_bucket(new_addr).entries[0].store(entry);
                return;
            }
            bucket = table.overflow_bucket(overflow.address().raw());
        }
    }

    /// Every live entry's bucket, tag, and address, for an index
    /// checkpoint. Unlike `grow`'s rehash (which needs the key back to
    /// recompute a *different* table's bucket index), a checkpoint
    /// restores into a table of the same size, so the bucket index
    /// alone is enough to place it back without touching the log.
    pub fn snapshot_entries(&self) -> Vec<IndexEntrySnapshot> {
        let table = self.snapshot();
        let mut out = Vec::new();
        for i in 0..table.size() {
            let mut bucket = &table.buckets[i as usize];
            loop {
                for slot in bucket.entries.iter() {
                    let e = slot.load();
                    if !e.is_unused() && !e.tentative() {
                        out.push(IndexEntrySnapshot {
                            bucket: i,
                            tag: e.tag(),
                            address: e.address().raw(),
                        });
                    }
                }
                let overflow = bucket.overflow.load();
                if overflow.is_unused() {
                    break;
                }
                bucket = table.overflow_bucket(overflow.address().raw());
            }
        }
        out
    }

    /// Rebuilds a freshly constructed, still-unshared table from a
    /// checkpoint's entry list. Only valid before any concurrent access
    /// begins: recovery constructs a brand new `HashIndex` of the same
    /// table size and calls this once, so there is nothing else to race
    /// against.
    pub fn restore_entries(&self, entries: &[IndexEntrySnapshot]) {
        let table_guard = self.table.write();
        for e in entries {
            let entry = HashBucketEntry::new(Address::from_raw(e.address), e.tag, false, false);
            Self::place_entry_at_bucket(&table_guard, e.bucket, entry);
        }
    }

    fn place_entry_at_bucket(table: &HashTable, bucket_index: u64, entry: HashBucketEntry) {
        let mut bucket = &table.buckets[bucket_index as usize];
        loop {
            if let Some(slot) = bucket.entries.iter().find(|s| s.load().is_unused()) {
                slot.store(entry);
                return;
            }
            let overflow = bucket.overflow.load();
            if overflow.is_unused() {
                let new_addr = table.overflow.allocate();
                bucket.overflow.store(HashBucketEntry::new(
                    Address::from_raw(new_addr),
                    0,
                    false,
                    false,
                ));
                table.overflow_bucket(new_addr).entries[0].store(entry);
                return;
            }
            bucket = table.overflow_bucket(overflow.address().raw());
        }
    }
}

/// One hash-index entry as persisted by an index checkpoint: enough to
/// rebuild a bucket slot's tag/address without needing the original key
/// back, since the checkpoint already records the exact bucket it lived
/// in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntrySnapshot {
    pub bucket: u64,
    pub tag: u16,
    pub address: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_find() {
        let idx = HashIndex::new(16);
        let h = KeyHash::of(&42u64);
        let r = idx.find_or_create_entry(h);
        assert!(idx.try_update_entry(&r, Address::new(1, 0), h.tag(), false));
        let found = idx.find_entry(h);
        assert!(found.found());
        assert_eq!(found.entry.address(), Address::new(1, 0));
    }

    #[test]
    fn not_found_for_absent_key() {
        let idx = HashIndex::new(16);
        let h = KeyHash::of(&"nope");
        let found = idx.find_entry(h);
        assert!(!found.found());
    }

    #[test]
    fn entry_count_tracks_live_entries() {
        let idx = HashIndex::new(64);
        for i in 0..20u64 {
            let h = KeyHash::of(&i);
            let r = idx.find_or_create_entry(h);
            idx.try_update_entry(&r, Address::new(1, i), h.tag(), false);
        }
        assert_eq!(idx.entry_count(), 20);
    }

    #[test]
    fn grow_preserves_all_entries_under_concurrent_writers() {
        use std::sync::Arc;
        use std::thread;

        let idx = Arc::new(HashIndex::new(16));
        for i in 0..16u64 {
            let h = KeyHash::of(&i);
            let r = idx.find_or_create_entry(h);
            idx.try_update_entry(&r, Address::new(1, i), h.tag(), false);
        }

        let writer_idx = idx.clone();
        let writer = thread::spawn(move || {
            for i in 16..48u64 {
                let h = KeyHash::of(&i);
                loop {
                    let r = writer_idx.find_or_create_entry(h);
                    if writer_idx.try_update_entry(&r, Address::new(1, i), h.tag(), false) {
                        break;
                    }
                }
            }
        });

        let epoch = EpochManager::new();
        idx.grow(&epoch, |addr| KeyHash::of(&addr.offset()));
        writer.join().unwrap();

        for i in 0..16u64 {
            let h = KeyHash::of(&i);
            assert!(idx.find_entry(h).found(), "key {i} lost across grow");
        }
    }
}
