//! Logical addressing for the hybrid log.
//!
//! FASTER addresses the log with a single 64-bit value that is really two
//! fields packed together: a page number and an offset within that page.
//! Only 48 bits of the value are ever meaningful; the remaining high bits
//! are reserved so the hash index can steal them for its tag/control bits
//! without colliding with a real address.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of bits used for the in-page offset. FASTER itself uses 25;
/// we keep the same split so `page_bits`/`memory_bits` in [`crate::config::LogSettings`]
/// read the same way a reader of the original design would expect.
pub const OFFSET_BITS: u32 = 25;
pub const OFFSET_MASK: u64 = (1u64 << OFFSET_BITS) - 1;

/// Total width of a meaningful address. The top 16 bits of a `u64` are
/// left unused so callers can never accidentally construct something
/// that looks like a valid address out of garbage high bits.
pub const ADDRESS_BITS: u32 = 48;
pub const ADDRESS_MASK: u64 = (1u64 << ADDRESS_BITS) - 1;

/// Sentinel meaning "no record" / "end of chain".
pub const INVALID_ADDRESS: Address = Address(0);

/// A 48-bit logical log address, packed as `page << OFFSET_BITS | offset`.
///
/// Ordering on `Address` is address ordering: comparisons and arithmetic
/// operate on the packed value directly, which matches the `<=` frontier
/// chain in the log's invariant (`BeginAddress <= HeadAddress <= ...`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Address(u64);

impl Address {
    pub const INVALID: Address = INVALID_ADDRESS;

    #[inline]
    pub fn new(page: u64, offset: u64) -> Self {
        debug_assert!(offset <= OFFSET_MASK);
        Address(((page << OFFSET_BITS) | (offset & OFFSET_MASK)) & ADDRESS_MASK)
    }

    #[inline]
    pub fn from_raw(value: u64) -> Self {
        Address(value & ADDRESS_MASK)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn page(self) -> u64 {
        self.0 >> OFFSET_BITS
    }

    #[inline]
    pub fn offset(self) -> u64 {
        self.0 & OFFSET_MASK
    }

    #[inline]
    pub fn is_invalid(self) -> bool {
        self.0 == 0
    }

    /// Address of the first byte of the next page after this one.
    #[inline]
    pub fn next_page_start(self) -> Address {
        Address::new(self.page() + 1, 0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x} (page {}, offset {})", self.0, self.page(), self.offset())
    }
}

impl std::ops::Add<u64> for Address {
    type Output = Address;
    fn add(self, rhs: u64) -> Address {
        Address::from_raw(self.0 + rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_is_zero() {
        assert!(INVALID_ADDRESS.is_invalid());
        assert_eq!(INVALID_ADDRESS.raw(), 0);
    }

    #[test]
    fn page_offset_roundtrip() {
        let a = Address::new(7, 123);
        assert_eq!(a.page(), 7);
        assert_eq!(a.offset(), 123);
    }

    #[test]
    fn ordering_matches_raw_value() {
        let a = Address::new(1, 0);
        let b = Address::new(1, 10);
        let c = Address::new(2, 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn next_page_start_resets_offset() {
        let a = Address::new(3, 500);
        let next = a.next_page_start();
        assert_eq!(next.page(), 4);
        assert_eq!(next.offset(), 0);
    }
}
