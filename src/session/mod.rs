//! Per-thread session execution context.
//!
//! Grounded on the teacher's `session::session_manager` (the
//! `Arc<RwLock<HashMap<SessionId, _>>>` table shape, the guid-keyed
//! lookup, the CRUD-plus-persist surface), adapted away from that
//! module's SQL-session fields (`user_id`, `database`, `prepared_statements`)
//! toward the fields the spec's session execution context actually
//! carries: `version`/`phase` (to detect a CPR version shift mid-op),
//! `serial_num` (the session's own monotonic operation counter, used as
//! the unit recorded in a checkpoint's commit points), pending and retry
//! queues for async I/O completions, and a link to the session's state
//! from before the last version shift (`prev_ctx`) so in-flight
//! operations started under an old version can still be completed
//! correctly.

use crate::address::Address;
use crate::checkpoint::Phase;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// One pending asynchronous I/O request (a `Read` that missed in memory
/// and had to go to disk, or a pending hash-index resize in progress).
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub request_id: u64,
    pub key_tag: u16,
    pub logical_address: Address,
}

/// A request that needs to be retried once a transient condition (a
/// hash-index resize in progress, a lost CAS race) clears.
#[derive(Debug, Clone)]
pub struct RetryRequest {
    pub request_id: u64,
}

/// A session's progress marker: the highest serial number the session
/// had fully completed as of a given checkpoint, used by
/// `ContinueSession` to resume exactly where the session left off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitPoint {
    pub serial_num: u64,
}

struct Inner {
    guid: Uuid,
    /// Version this session last observed; compared against the
    /// engine's current `SystemState::version()` to detect a version
    /// shift (`CPR_SHIFT_DETECTED`) mid-operation.
    version: AtomicU64,
    phase: AtomicU8,
    serial_num: AtomicU64,
    io_pending_requests: parking_lot::Mutex<Vec<PendingRequest>>,
    retry_requests: parking_lot::Mutex<Vec<RetryRequest>>,
    next_request_id: AtomicU64,
}

fn phase_to_u8(p: Phase) -> u8 {
    p as u8
}

fn phase_from_u8(v: u8) -> Phase {
    match v {
        0 => Phase::Rest,
        1 => Phase::PrepIndexCheckpoint,
        2 => Phase::IndexCheckpoint,
        3 => Phase::Prepare,
        4 => Phase::InProgress,
        5 => Phase::WaitPending,
        6 => Phase::WaitFlush,
        _ => Phase::PersistenceCallback,
    }
}

/// A session's execution context, shared behind an `Arc` between the
/// [`SessionTable`] entry and whichever thread is currently driving it.
#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<Inner>,
}

impl SessionContext {
    fn new(version: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                guid: Uuid::new_v4(),
                version: AtomicU64::new(version),
                phase: AtomicU8::new(phase_to_u8(Phase::Rest)),
                serial_num: AtomicU64::new(0),
                io_pending_requests: parking_lot::Mutex::new(Vec::new()),
                retry_requests: parking_lot::Mutex::new(Vec::new()),
                next_request_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn guid(&self) -> Uuid {
        self.inner.guid
    }

    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Acquire)
    }

    pub fn set_version(&self, v: u64) {
        self.inner.version.store(v, Ordering::Release);
    }

    pub fn phase(&self) -> Phase {
        phase_from_u8(self.inner.phase.load(Ordering::Acquire))
    }

    pub fn set_phase(&self, phase: Phase) {
        self.inner.phase.store(phase_to_u8(phase), Ordering::Release);
    }

    pub fn serial_num(&self) -> u64 {
        self.inner.serial_num.load(Ordering::Acquire)
    }

    /// Called once an operation completes; this is the counter a
    /// checkpoint's commit point records for this session.
    pub fn advance_serial_num(&self) -> u64 {
        self.inner.serial_num.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn next_request_id(&self) -> u64 {
        self.inner.next_request_id.fetch_add(1, Ordering::AcqRel)
    }

    pub fn enqueue_pending(&self, req: PendingRequest) {
        self.inner.io_pending_requests.lock().push(req);
    }

    pub fn take_pending(&self) -> Vec<PendingRequest> {
        std::mem::take(&mut *self.inner.io_pending_requests.lock())
    }

    pub fn pending_count(&self) -> usize {
        self.inner.io_pending_requests.lock().len()
    }

    pub fn enqueue_retry(&self, req: RetryRequest) {
        self.inner.retry_requests.lock().push(req);
    }

    pub fn take_retries(&self) -> Vec<RetryRequest> {
        std::mem::take(&mut *self.inner.retry_requests.lock())
    }

    pub fn commit_point(&self) -> CommitPoint {
        CommitPoint {
            serial_num: self.serial_num(),
        }
    }
}

/// The live session table: `StartSession`/`ContinueSession`/`StopSession`
/// operate on this, keyed by guid. Uses `dashmap` for the same
/// low-contention concurrent-map role the teacher gives it elsewhere in
/// the codebase.
pub struct SessionTable {
    sessions: DashMap<Uuid, SessionContext>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn start_session(&self, current_version: u64) -> SessionContext {
        let ctx = SessionContext::new(current_version);
        self.sessions.insert(ctx.guid(), ctx.clone());
        ctx
    }

    pub fn continue_session(&self, guid: Uuid) -> Option<(SessionContext, CommitPoint)> {
        let ctx = self.sessions.get(&guid)?.clone();
        let commit_point = ctx.commit_point();
        Some((ctx, commit_point))
    }

    pub fn stop_session(&self, guid: Uuid) {
        self.sessions.remove(&guid);
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Snapshot of every live session, used by the checkpoint state
    /// machine to collect commit points and to drive each session to a
    /// version shift during `InProgress`.
    pub fn snapshot(&self) -> Vec<SessionContext> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_then_continue_session() {
        let table = SessionTable::new();
        let ctx = table.start_session(1);
        ctx.advance_serial_num();
        ctx.advance_serial_num();
        let (resumed, commit_point) = table.continue_session(ctx.guid()).unwrap();
        assert_eq!(resumed.guid(), ctx.guid());
        assert_eq!(commit_point.serial_num, 2);
    }

    #[test]
    fn stop_session_removes_it() {
        let table = SessionTable::new();
        let ctx = table.start_session(1);
        table.stop_session(ctx.guid());
        assert!(table.continue_session(ctx.guid()).is_none());
    }

    #[test]
    fn pending_requests_round_trip() {
        let table = SessionTable::new();
        let ctx = table.start_session(1);
        ctx.enqueue_pending(PendingRequest {
            request_id: ctx.next_request_id(),
            key_tag: 5,
            logical_address: Address::new(1, 0),
        });
        assert_eq!(ctx.pending_count(), 1);
        let drained = ctx.take_pending();
        assert_eq!(drained.len(), 1);
        assert_eq!(ctx.pending_count(), 0);
    }
}
