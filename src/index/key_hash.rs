//! Splits a 64-bit key hash into a bucket index and a 14-bit tag.

use std::hash::{Hash, Hasher};
use std::collections::hash_map::DefaultHasher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyHash(u64);

const TAG_BITS: u32 = 14;
const TAG_MASK: u64 = (1u64 << TAG_BITS) - 1;

impl KeyHash {
    pub fn of<K: Hash + ?Sized>(key: &K) -> Self {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        KeyHash(hasher.finish())
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    /// Reconstructs a `KeyHash` from its raw bits, used where the
    /// original key isn't available to rehash (e.g. a read-cache slot
    /// that stored the hash alongside the cached value).
    pub fn from_raw(raw: u64) -> Self {
        KeyHash(raw)
    }

    /// Low 14 bits identify the record among bucket-mates; collisions
    /// within a bucket are resolved by full key comparison at the log
    /// record, not by the tag.
    pub fn tag(self) -> u16 {
        (self.0 & TAG_MASK) as u16
    }

    /// Remaining high bits select the bucket. `table_size` must be a
    /// power of two.
    pub fn table_index(self, table_size: u64) -> u64 {
        debug_assert!(table_size.is_power_of_two());
        (self.0 >> TAG_BITS) & (table_size - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_index_within_bounds() {
        for i in 0..1000u64 {
            let h = KeyHash::of(&i);
            assert!(h.table_index(1024) < 1024);
        }
    }
}
