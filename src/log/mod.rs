//! The hybrid log allocator: a single monotonically growing logical
//! address space backed by a fixed-size ring of in-memory pages, with
//! older pages flushed to a [`Device`] and evicted once durable.
//!
//! Grounded on the reference crate's `hlog.rs` (`HybridLog`,
//! `PageStatus`, the page-ring buffer, `shift_head_address`/
//! `shift_read_only_address`/`advance_begin_address`), combined with the
//! teacher's `storage::buffer`/`storage::page` idiom of wrapping shared
//! mutable pool state behind `parking_lot` locks rather than raw
//! pointers. Page-ring transitions (closing/flushing/evicting a page)
//! are serialized through a single `roll` lock rather than FASTER's
//! fully lock-free page-boundary CAS dance — allocation *within* an
//! already-open page is still a lock-free CAS bump on `tail_address`,
//! which is the path every `Upsert`/`RMW`/`Delete` actually takes.

pub mod device;
pub mod page;

use crate::address::{Address, INVALID_ADDRESS};
use crate::config::LogSettings;
use crate::epoch::EpochManager;
use device::Device;
use page::{Page, PageStatus};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Address frontiers, matching the spec's invariant chain:
/// `BeginAddress <= HeadAddress <= SafeHeadAddress <= ReadOnlyAddress
/// <= SafeReadOnlyAddress <= TailAddress`.
pub struct Frontiers {
    pub begin_address: AtomicU64,
    pub head_address: AtomicU64,
    pub safe_head_address: AtomicU64,
    pub read_only_address: AtomicU64,
    pub safe_read_only_address: AtomicU64,
    pub tail_address: AtomicU64,
}

impl Frontiers {
    fn new(start: Address) -> Self {
        Self {
            begin_address: AtomicU64::new(start.raw()),
            head_address: AtomicU64::new(start.raw()),
            safe_head_address: AtomicU64::new(start.raw()),
            read_only_address: AtomicU64::new(start.raw()),
            safe_read_only_address: AtomicU64::new(start.raw()),
            tail_address: AtomicU64::new(start.raw()),
        }
    }

    pub fn begin(&self) -> Address {
        Address::from_raw(self.begin_address.load(Ordering::Acquire))
    }
    pub fn head(&self) -> Address {
        Address::from_raw(self.head_address.load(Ordering::Acquire))
    }
    pub fn safe_head(&self) -> Address {
        Address::from_raw(self.safe_head_address.load(Ordering::Acquire))
    }
    pub fn read_only(&self) -> Address {
        Address::from_raw(self.read_only_address.load(Ordering::Acquire))
    }
    pub fn safe_read_only(&self) -> Address {
        Address::from_raw(self.safe_read_only_address.load(Ordering::Acquire))
    }
    pub fn tail(&self) -> Address {
        Address::from_raw(self.tail_address.load(Ordering::Acquire))
    }
}

struct RingSlot {
    /// Page number currently resident in this slot, or `u64::MAX` if empty.
    resident: AtomicU64,
    page: Page,
}

/// Whether an address falls in the mutable tail, the in-memory
/// read-only region, or has aged out to disk (or below `BeginAddress`
/// entirely).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressRegion {
    Mutable,
    ReadOnlyInMemory,
    OnDisk,
    BelowBegin,
}

pub struct HybridLogAllocator<D: Device> {
    page_size: u64,
    pages_in_memory: u64,
    /// Number of resident pages, counted from the current tail
    /// backwards, that `roll_to_next_page` keeps mutable before it
    /// organically pushes `ReadOnlyAddress` forward. Derived from
    /// `LogSettings::mutable_fraction` so ordinary `Upsert`/`RMW`
    /// traffic ages records into the read-only region on its own,
    /// rather than only at an explicit checkpoint's `flush_until`.
    mutable_region_pages: u64,
    ring: Vec<RingSlot>,
    pub frontiers: Frontiers,
    device: D,
    epoch: EpochManager,
    /// Serializes page-boundary transitions (close current tail page,
    /// open the next one, evict the oldest resident page if the ring
    /// slot is needed). Record-local writes within an already-open page
    /// never take this lock.
    roll: Mutex<()>,
}

impl<D: Device> HybridLogAllocator<D> {
    pub fn new(settings: &LogSettings, device: D, epoch: EpochManager) -> Self {
        let page_size = 1u64 << settings.page_size_bits;
        let pages_in_memory =
            (1u64 << settings.memory_size_bits.max(settings.page_size_bits)) / page_size;
        let pages_in_memory = pages_in_memory.max(2);
        let mutable_region_pages = ((pages_in_memory as f64) * settings.mutable_fraction)
            .floor()
            .max(1.0) as u64;
        let mut ring = Vec::with_capacity(pages_in_memory as usize);
        for _ in 0..pages_in_memory {
            ring.push(RingSlot {
                resident: AtomicU64::new(u64::MAX),
                page: Page::empty(page_size as usize),
            });
        }
        // Page 0 starts out resident and open.
        ring[0].resident.store(0, Ordering::Release);
        ring[0].page.set_status(PageStatus::Open);
        Self {
            page_size,
            pages_in_memory,
            mutable_region_pages,
            ring,
            frontiers: Frontiers::new(Address::new(0, 0)),
            device,
            epoch,
            roll: Mutex::new(()),
        }
    }

    fn slot_for(&self, page_number: u64) -> &RingSlot {
        &self.ring[(page_number % self.pages_in_memory) as usize]
    }

    pub fn region_of(&self, addr: Address) -> AddressRegion {
        if addr < self.frontiers.begin() {
            AddressRegion::BelowBegin
        } else if addr < self.frontiers.head() {
            AddressRegion::OnDisk
        } else if addr < self.frontiers.read_only() {
            AddressRegion::ReadOnlyInMemory
        } else {
            AddressRegion::Mutable
        }
    }

    /// Reserves `size` bytes in the mutable tail, rolling to a fresh
    /// page when the current one doesn't have room. Returns the address
    /// of the first reserved byte.
    pub fn allocate(&self, size: usize) -> Address {
        assert!((size as u64) < self.page_size, "record larger than page size");
        loop {
            let tail = self.frontiers.tail_address.load(Ordering::Acquire);
            let addr = Address::from_raw(tail);
            if addr.offset() as usize + size > self.page_size as usize {
                self.roll_to_next_page(addr.page());
                continue;
            }
            let new_tail = tail + size as u64;
            if self
                .frontiers
                .tail_address
                .compare_exchange(tail, new_tail, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return addr;
            }
        }
    }

    fn roll_to_next_page(&self, current_page: u64) {
        let _guard = self.roll.lock();
        // Re-check: another thread may have already rolled while we
        // waited for the lock.
        let tail = self.frontiers.tail();
        if tail.page() != current_page {
            return;
        }
        let next_page = current_page + 1;
        let next_start = Address::new(next_page, 0);

        let current_slot = self.slot_for(current_page);
        current_slot.page.set_status(PageStatus::Closed);
        trace!(page = current_page, "closed page");

        self.ensure_resident(next_page);
        self.frontiers
            .tail_address
            .store(next_start.raw(), Ordering::Release);

        // Organic mutable/read-only boundary: once the tail has rolled
        // far enough ahead of ReadOnlyAddress that more than
        // `mutable_region_pages` pages are behind it, age the oldest of
        // them out of the mutable region on ordinary traffic, not only
        // at an explicit checkpoint.
        let read_only_page = self.frontiers.read_only().page();
        if next_page.saturating_sub(read_only_page) > self.mutable_region_pages {
            let cut = next_page - self.mutable_region_pages;
            self.flush_until(Address::new(cut, 0));
        }
    }

    fn ensure_resident(&self, page_number: u64) {
        let slot = self.slot_for(page_number);
        if slot.resident.load(Ordering::Acquire) == page_number {
            return;
        }
        let evicted = slot.resident.swap(page_number, Ordering::AcqRel);
        if evicted != u64::MAX && evicted != page_number {
            // The slot we need is occupied by an older page; it must
            // already be durable before we can reuse its buffer.
            self.flush_page(evicted);
            // A straggling reader may still be mid-`read_bytes` against
            // the page we just reused this ring slot for. We can't wait
            // for it synchronously here: this call runs from inside an
            // operation that is itself an active epoch participant, and
            // blocking on our own drain would never return. Instead
            // register the reclamation as a drain action (it fires once
            // every thread active at this epoch has moved on) and nudge
            // progress with a non-blocking refresh.
            self.epoch.bump_current_epoch(move |epoch| {
                trace!(page = evicted, epoch, "ring slot reclaimed");
            });
            self.epoch.refresh();
        }
        slot.page.reset();
        slot.page.set_status(PageStatus::Open);
    }

    fn flush_page(&self, page_number: u64) {
        let slot = self.slot_for(page_number);
        if slot.resident.load(Ordering::Acquire) != page_number {
            return;
        }
        if slot.page.status() == PageStatus::Flushed {
            return;
        }
        let bytes = slot.page.snapshot();
        let offset = page_number * self.page_size;
        if let Err(err) = self.device.write_at(offset, &bytes) {
            debug!(?err, page = page_number, "page flush failed");
            return;
        }
        slot.page.set_status(PageStatus::Flushed);
        trace!(page = page_number, "flushed page to device");
    }

    /// Flushes every page up to (but not including) `up_to`, advancing
    /// `ReadOnlyAddress`/`SafeReadOnlyAddress` to match. This is the
    /// FoldOver checkpoint's "cut": once called, every record below
    /// `up_to` is durable and immutable.
    pub fn flush_until(&self, up_to: Address) {
        let ro = self.frontiers.read_only();
        if up_to <= ro {
            return;
        }
        let from_page = ro.page();
        let to_page = up_to.page();
        for p in from_page..to_page {
            let slot = self.slot_for(p);
            if slot.page.status() == PageStatus::Open {
                slot.page.set_status(PageStatus::Closed);
            }
            self.flush_page(p);
        }
        self.frontiers.read_only_address.store(up_to.raw(), Ordering::Release);
        self.frontiers
            .safe_read_only_address
            .store(up_to.raw(), Ordering::Release);
        let _ = self.device.sync();
    }

    /// Advances `HeadAddress`/`SafeHeadAddress`, evicting any
    /// now-stale in-memory pages entirely below the new head. Pages
    /// must already be `Flushed`; this never drops data that is only
    /// resident in memory.
    pub fn shift_head_address(&self, new_head: Address) {
        let old_head = self.frontiers.head();
        if new_head <= old_head {
            return;
        }
        // Same reasoning as `ensure_resident`: register the eviction as
        // a drain action rather than blocking on our own epoch guard.
        self.epoch.bump_current_epoch(|_| {});
        for p in old_head.page()..new_head.page() {
            let slot = self.slot_for(p);
            if slot.resident.load(Ordering::Acquire) == p && slot.page.status() == PageStatus::Flushed {
                slot.page.reset();
                slot.resident.store(u64::MAX, Ordering::Release);
            }
        }
        self.epoch.refresh();
        self.frontiers.head_address.store(new_head.raw(), Ordering::Release);
        self.frontiers
            .safe_head_address
            .store(new_head.raw(), Ordering::Release);
    }

    /// After restoring frontiers to a recovered tail address, rounds the
    /// tail up to the next page boundary and marks that page resident
    /// and open so the next `allocate()` can write into it immediately.
    /// Recovered stores always resume appending at a fresh page rather
    /// than mid-page, so nothing from the recovered tail's own page
    /// needs to be reloaded from disk first.
    pub fn prepare_for_new_writes(&self) {
        let tail = self.frontiers.tail();
        let fresh_page = tail.page() + 1;
        let fresh_addr = Address::new(fresh_page, 0);
        self.frontiers
            .tail_address
            .store(fresh_addr.raw(), Ordering::Release);
        let slot = self.slot_for(fresh_page);
        slot.resident.store(fresh_page, Ordering::Release);
        slot.page.reset();
        slot.page.set_status(PageStatus::Open);
    }

    /// Advances `BeginAddress`. Space below it is permanently
    /// unreachable; a real device implementation could truncate the
    /// corresponding file prefix, but reclaiming disk space is left to
    /// the device, not modeled here.
    pub fn advance_begin_address(&self, new_begin: Address) {
        let old = self.frontiers.begin();
        if new_begin > old {
            self.frontiers.begin_address.store(new_begin.raw(), Ordering::Release);
        }
    }

    pub fn read_bytes(&self, addr: Address, len: usize) -> Vec<u8> {
        let page_number = addr.page();
        let slot = self.slot_for(page_number);
        if slot.resident.load(Ordering::Acquire) == page_number {
            return slot.page.read(addr.offset() as usize, len);
        }
        // Not resident: must be on disk.
        let mut buf = vec![0u8; len];
        let offset = page_number * self.page_size + addr.offset();
        let _ = self.device.read_at(offset, &mut buf);
        buf
    }

    pub fn write_bytes(&self, addr: Address, data: &[u8]) {
        let page_number = addr.page();
        let slot = self.slot_for(page_number);
        debug_assert_eq!(slot.resident.load(Ordering::Acquire), page_number);
        slot.page.write(addr.offset() as usize, data);
    }

    pub fn tail_address(&self) -> Address {
        self.frontiers.tail()
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }
}
