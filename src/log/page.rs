//! In-memory page state for the hybrid log's circular page ring.
//!
//! Grounded on the reference crate's `hlog.rs` `PageStatus`/page-ring
//! design (an `AtomicPageOffset` per slot plus a lock-guarded byte
//! buffer), adapted to this crate's `parking_lot`-based locking idiom
//! in place of raw unsafe buffer access.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of one page in the ring.
///
/// `Empty -> Open` on first allocation into the page, `Open -> Closed`
/// once the tail moves past it (no more mutable writers), `Closed ->
/// Flushed` once the device has durably stored its bytes, at which
/// point it becomes eligible for eviction back to `Empty` once
/// `HeadAddress` passes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    Empty,
    Open,
    Closed,
    Flushed,
}

impl PageStatus {
    fn to_u8(self) -> u8 {
        match self {
            PageStatus::Empty => 0,
            PageStatus::Open => 1,
            PageStatus::Closed => 2,
            PageStatus::Flushed => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => PageStatus::Empty,
            1 => PageStatus::Open,
            2 => PageStatus::Closed,
            _ => PageStatus::Flushed,
        }
    }
}

pub struct Page {
    status: AtomicU8,
    bytes: RwLock<Vec<u8>>,
}

impl Page {
    pub fn empty(page_size: usize) -> Self {
        Self {
            status: AtomicU8::new(PageStatus::Empty.to_u8()),
            bytes: RwLock::new(vec![0u8; page_size]),
        }
    }

    pub fn status(&self) -> PageStatus {
        PageStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: PageStatus) {
        self.status.store(status.to_u8(), Ordering::Release);
    }

    pub fn write(&self, offset: usize, data: &[u8]) {
        let mut bytes = self.bytes.write();
        bytes[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn read(&self, offset: usize, len: usize) -> Vec<u8> {
        let bytes = self.bytes.read();
        bytes[offset..offset + len].to_vec()
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }

    /// Resets a page back to `Empty`, zeroing its bytes so a future
    /// reuse of this ring slot never leaks stale data.
    pub fn reset(&self) {
        self.bytes.write().iter_mut().for_each(|b| *b = 0);
        self.set_status(PageStatus::Empty);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_roundtrip() {
        let page = Page::empty(64);
        page.write(8, b"hi");
        assert_eq!(page.read(8, 2), b"hi");
    }

    #[test]
    fn reset_clears_bytes_and_status() {
        let page = Page::empty(16);
        page.write(0, b"data");
        page.set_status(PageStatus::Flushed);
        page.reset();
        assert_eq!(page.status(), PageStatus::Empty);
        assert_eq!(page.read(0, 4), vec![0, 0, 0, 0]);
    }
}
