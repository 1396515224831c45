//! Packed hash bucket entries and the 64-byte bucket layout.
//!
//! Ground truth for the bit layout and the two-phase tentative insert
//! protocol is FASTER's own hash table design, reflected closely by the
//! `mem_index`/`hash_bucket` pair in the hand-ported reference crate
//! this module is grounded on. Where that reference uses raw pointers
//! and `unsafe` bucket indexing, this module keeps the same CAS protocol
//! but stores entries as plain `AtomicU64` fields behind safe Rust
//! references, matching how the rest of this crate's concurrent
//! structures are built on top of `parking_lot`/`std::sync::atomic`
//! rather than hand-rolled unsafe memory.

use crate::address::Address;
use std::sync::atomic::{AtomicU64, Ordering};

const TAG_BITS: u32 = 14;
const ADDRESS_BITS: u32 = 48;
const TAG_SHIFT: u32 = 64 - TAG_BITS; // 50
const TENTATIVE_BIT: u64 = 1 << (TAG_SHIFT - 1); // bit 49
const READCACHE_BIT: u64 = 1 << (TAG_SHIFT - 2); // bit 48
const ADDRESS_MASK: u64 = (1u64 << ADDRESS_BITS) - 1;
const TAG_MASK: u64 = (1u64 << TAG_BITS) - 1;

/// A single 8-byte hash-bucket slot: `{ tag: 14, address: 48, tentative: 1, readcache: 1 }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HashBucketEntry(u64);

impl HashBucketEntry {
    pub const UNUSED: HashBucketEntry = HashBucketEntry(0);

    pub fn new(address: Address, tag: u16, tentative: bool, readcache: bool) -> Self {
        let mut bits = (address.raw() & ADDRESS_MASK) | (((tag as u64) & TAG_MASK) << TAG_SHIFT);
        if tentative {
            bits |= TENTATIVE_BIT;
        }
        if readcache {
            bits |= READCACHE_BIT;
        }
        HashBucketEntry(bits)
    }

    #[inline]
    pub fn is_unused(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn address(self) -> Address {
        Address::from_raw(self.0 & ADDRESS_MASK)
    }

    #[inline]
    pub fn tag(self) -> u16 {
        ((self.0 >> TAG_SHIFT) & TAG_MASK) as u16
    }

    #[inline]
    pub fn tentative(self) -> bool {
        self.0 & TENTATIVE_BIT != 0
    }

    #[inline]
    pub fn readcache(self) -> bool {
        self.0 & READCACHE_BIT != 0
    }

    #[inline]
    pub fn with_address(self, address: Address) -> Self {
        HashBucketEntry((self.0 & !ADDRESS_MASK) | (address.raw() & ADDRESS_MASK))
    }
}

/// CAS-able cell wrapping a [`HashBucketEntry`].
#[derive(Debug, Default)]
pub struct AtomicHashBucketEntry(AtomicU64);

impl AtomicHashBucketEntry {
    pub fn load(&self) -> HashBucketEntry {
        HashBucketEntry(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, value: HashBucketEntry) {
        self.0.store(value.0, Ordering::Release);
    }

    pub fn compare_exchange(
        &self,
        current: HashBucketEntry,
        new: HashBucketEntry,
    ) -> Result<HashBucketEntry, HashBucketEntry> {
        self.0
            .compare_exchange(current.0, new.0, Ordering::AcqRel, Ordering::Acquire)
            .map(HashBucketEntry)
            .map_err(HashBucketEntry)
    }
}

/// Overflow-chain pointer stored in the 8th slot of a bucket. Carries
/// only an address (into the overflow bucket allocator); reuses
/// [`HashBucketEntry`]'s packing since both are "tag or nothing plus an
/// address" shaped.
pub type OverflowPointer = AtomicHashBucketEntry;

/// A 64-byte hash bucket: 7 entries plus one overflow pointer.
#[repr(align(64))]
pub struct HashBucket {
    pub entries: [AtomicHashBucketEntry; 7],
    pub overflow: OverflowPointer,
}

pub const ENTRIES_PER_BUCKET: usize = 7;

impl HashBucket {
    pub fn new() -> Self {
        Self {
            entries: Default::default(),
            overflow: AtomicHashBucketEntry::default(),
        }
    }
}

impl Default for HashBucket {
    fn default() -> Self {
        Self::new()
    }
}

const _: () = assert!(std::mem::size_of::<HashBucket>() == 64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_roundtrip() {
        let addr = Address::new(5, 100);
        let e = HashBucketEntry::new(addr, 0x1234 & 0x3FFF, true, false);
        assert_eq!(e.address(), addr);
        assert_eq!(e.tag(), 0x1234 & 0x3FFF);
        assert!(e.tentative());
        assert!(!e.readcache());
    }

    #[test]
    fn bucket_is_64_bytes() {
        assert_eq!(std::mem::size_of::<HashBucket>(), 64);
    }

    #[test]
    fn cas_entry_slot() {
        let cell = AtomicHashBucketEntry::default();
        let desired = HashBucketEntry::new(Address::new(1, 1), 7, true, false);
        assert!(cell.compare_exchange(HashBucketEntry::UNUSED, desired).is_ok());
        assert_eq!(cell.load(), desired);
    }
}
