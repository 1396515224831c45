//! Epoch-based memory reclamation.
//!
//! This is the crate's own reclamation contract — `Acquire`/`Release` to
//! mark a thread as active, `ProtectAndDrain` to make progress on pending
//! drain actions, `BumpCurrentEpoch` to register a callback that fires
//! once every thread has caught up to the new epoch, `Refresh` as the
//! lightweight "stay current" call on an already-acquired thread. It is
//! shaped after the same entry/exit reentrant-counting idea as the
//! teacher's `concurrent::epoch::Participant` and crossbeam's classic
//! `Participant::enter`/`exit`, but exposes the explicit drain-action
//! queue the checkpoint state machine needs (CPR schedules a phase
//! transition as a drain action tied to a version bump, not as garbage
//! to free).

use crossbeam::utils::{Backoff, CachePadded};
use parking_lot::Mutex;
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Ring size for pending drain actions, indexed by `epoch % EPOCH_RING`.
/// Three slots is enough headroom for one epoch bump to be in flight
/// while a previous one is still draining.
const EPOCH_RING: usize = 3;

type DrainAction = Box<dyn Fn(u64) + Send + Sync>;

#[repr(align(64))]
struct ThreadEntry {
    /// 0 means "not acquired". Otherwise the last epoch this thread
    /// observed while active.
    local_epoch: AtomicU64,
    /// Reentrant `Acquire` count; `Release` only truly drops out at 0.
    depth: AtomicUsize,
}

impl ThreadEntry {
    fn new() -> Self {
        Self {
            local_epoch: AtomicU64::new(0),
            depth: AtomicUsize::new(0),
        }
    }

    fn is_active(&self) -> bool {
        self.depth.load(Ordering::Acquire) > 0
    }
}

struct Slot {
    actions: Mutex<Vec<DrainAction>>,
}

impl Slot {
    fn new() -> Self {
        Self {
            actions: Mutex::new(Vec::new()),
        }
    }
}

/// Shared state behind every [`EpochManager`] clone.
struct Shared {
    current_epoch: AtomicU64,
    safe_to_reclaim_epoch: AtomicU64,
    threads: Mutex<Vec<Arc<CachePadded<ThreadEntry>>>>,
    ring: [Slot; EPOCH_RING],
}

/// Handle to the epoch manager, cheap to clone and share across worker
/// threads (each clone refers to the same [`Shared`] state via `Arc`).
#[derive(Clone)]
pub struct EpochManager {
    shared: Arc<Shared>,
}

thread_local! {
    static LOCAL: Cell<Option<Arc<CachePadded<ThreadEntry>>>> = Cell::new(None);
}

impl Default for EpochManager {
    fn default() -> Self {
        Self::new()
    }
}

impl EpochManager {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                current_epoch: AtomicU64::new(1),
                safe_to_reclaim_epoch: AtomicU64::new(0),
                threads: Mutex::new(Vec::new()),
                ring: [Slot::new(), Slot::new(), Slot::new()],
            }),
        }
    }

    fn entry_for_this_thread(&self) -> Arc<CachePadded<ThreadEntry>> {
        LOCAL.with(|cell| {
            let existing = cell.take();
            let entry = existing.unwrap_or_else(|| {
                let entry = Arc::new(CachePadded::new(ThreadEntry::new()));
                self.shared.threads.lock().push(entry.clone());
                entry
            });
            cell.set(Some(entry.clone()));
            entry
        })
    }

    /// Marks the calling thread as active in the current epoch. Must be
    /// paired with [`EpochManager::release`]; reentrant (nested
    /// `acquire` calls simply bump a depth counter).
    pub fn acquire(&self) -> EpochGuard {
        let entry = self.entry_for_this_thread();
        if entry.depth.fetch_add(1, Ordering::AcqRel) == 0 {
            let current = self.shared.current_epoch.load(Ordering::Acquire);
            entry.local_epoch.store(current, Ordering::Release);
        }
        EpochGuard {
            manager: self.clone(),
        }
    }

    /// Drops the calling thread's active marker once the reentrant depth
    /// reaches zero. Prefer holding an [`EpochGuard`] (RAII) over calling
    /// this directly.
    pub fn release(&self) {
        let entry = self.entry_for_this_thread();
        let prev = entry.depth.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "release() without a matching acquire()");
        if prev == 1 {
            entry.local_epoch.store(0, Ordering::Release);
        }
    }

    /// Refreshes this thread's recorded epoch to the current global
    /// epoch without changing acquire/release depth. Call periodically
    /// from a long-held acquire to let drain actions make progress.
    pub fn refresh(&self) {
        let entry = self.entry_for_this_thread();
        if entry.is_active() {
            let current = self.shared.current_epoch.load(Ordering::Acquire);
            entry.local_epoch.store(current, Ordering::Release);
        }
        self.protect_and_drain();
    }

    fn min_active_epoch(&self) -> Option<u64> {
        let threads = self.shared.threads.lock();
        threads
            .iter()
            .filter_map(|t| {
                if t.is_active() {
                    Some(t.local_epoch.load(Ordering::Acquire))
                } else {
                    None
                }
            })
            .min()
    }

    /// Attempts to advance `safe_to_reclaim_epoch` and fires any drain
    /// actions whose target epoch every active thread has now passed.
    /// Never blocks; a caller wanting a stronger guarantee should spin
    /// calling this with a [`Backoff`].
    pub fn protect_and_drain(&self) -> bool {
        let current = self.shared.current_epoch.load(Ordering::Acquire);
        let safe = match self.min_active_epoch() {
            // A thread pinned at `e` may still hold references minted
            // under `e`; only epochs strictly before it are safe.
            Some(e) => e.saturating_sub(1),
            // Nobody is pinned: everything up to (and including) the
            // current epoch is safe.
            None => current,
        };
        let prev_safe = self.shared.safe_to_reclaim_epoch.load(Ordering::Acquire);
        if safe <= prev_safe {
            return false;
        }
        if self
            .shared
            .safe_to_reclaim_epoch
            .compare_exchange(prev_safe, safe, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        for epoch in (prev_safe + 1)..=safe {
            let slot = &self.shared.ring[(epoch as usize) % EPOCH_RING];
            let actions: Vec<DrainAction> = std::mem::take(&mut *slot.actions.lock());
            for action in actions {
                action(epoch);
            }
        }
        true
    }

    /// Advances the global epoch and registers `action` to run once
    /// every currently-active thread has observed an epoch at or past
    /// the new one (i.e. once it is safe to assume no thread still holds
    /// a reference created under the old epoch). This is how the CPR
    /// phase-walk schedules "finish this phase once everyone has
    /// checked in" transitions.
    pub fn bump_current_epoch(&self, action: impl Fn(u64) + Send + Sync + 'static) -> u64 {
        let new_epoch = self.shared.current_epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let slot = &self.shared.ring[(new_epoch as usize) % EPOCH_RING];
        slot.actions.lock().push(Box::new(action));
        new_epoch
    }

    pub fn current_epoch(&self) -> u64 {
        self.shared.current_epoch.load(Ordering::Acquire)
    }

    pub fn safe_to_reclaim_epoch(&self) -> u64 {
        self.shared.safe_to_reclaim_epoch.load(Ordering::Acquire)
    }

    /// Spins calling [`EpochManager::protect_and_drain`] until the given
    /// epoch has fully drained. Used by `CompletePending(wait = true)`
    /// style blocking calls.
    pub fn wait_for_drain(&self, epoch: u64) {
        let backoff = Backoff::new();
        while self.safe_to_reclaim_epoch() < epoch {
            self.protect_and_drain();
            backoff.snooze();
        }
    }
}

/// RAII guard returned by [`EpochManager::acquire`]; releases on drop.
pub struct EpochGuard {
    manager: EpochManager,
}

impl Drop for EpochGuard {
    fn drop(&mut self) {
        self.manager.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn acquire_release_is_reentrant() {
        let mgr = EpochManager::new();
        let g1 = mgr.acquire();
        let g2 = mgr.acquire();
        drop(g2);
        drop(g1);
    }

    #[test]
    fn bump_current_epoch_advances_counter() {
        let mgr = EpochManager::new();
        let before = mgr.current_epoch();
        mgr.bump_current_epoch(|_| {});
        assert_eq!(mgr.current_epoch(), before + 1);
    }

    #[test]
    fn drain_action_fires_once_no_thread_is_active() {
        let mgr = EpochManager::new();
        let counter = Arc::new(AtomicU32::new(0));
        let counter2 = counter.clone();
        let target = mgr.bump_current_epoch(move |_| {
            counter2.fetch_add(1, Ordering::SeqCst);
        });
        mgr.wait_for_drain(target);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drain_waits_for_active_thread() {
        let mgr = EpochManager::new();
        let guard = mgr.acquire();
        let counter = Arc::new(AtomicU32::new(0));
        let counter2 = counter.clone();
        mgr.bump_current_epoch(move |_| {
            counter2.fetch_add(1, Ordering::SeqCst);
        });
        mgr.protect_and_drain();
        assert_eq!(counter.load(Ordering::SeqCst), 0, "active thread should block drain");
        drop(guard);
        mgr.protect_and_drain();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
