//! User-supplied callback traits and the terminal status of an operation.
//!
//! FASTER pushes copy/merge/initial-value policy out to the caller instead
//! of baking in an `Update` trait on `V` directly — that is what lets the
//! same engine serve both "replace" and "read-modify-write" semantics.
//! These traits are the Rust expression of that same seam.

use crate::checkpoint::CheckpointToken;

/// Terminal outcome of a dispatched operation, distinct from [`crate::error::HlogError`]:
/// these are expected results of calling `Read`/`Upsert`/`RMW`/`Delete`,
/// not failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    NotFound,
    Pending,
}

/// Policy for `Read`: how to hand the found value back to the caller.
pub trait ReadFunctions<K, V> {
    /// Called with the value found in the log (or read cache) when the
    /// resolved address is below `SafeReadOnlyAddress` — a region a
    /// concurrent writer could still be mutating in place, so this path
    /// is free to take whatever extra care a caller's `V` needs against
    /// a torn read. Returning `false` treats the record as absent (used
    /// for user-level tombstone semantics layered on top of the log's
    /// own tombstone bit).
    fn single_reader(&mut self, key: &K, value: &V) -> bool {
        let _ = key;
        let _ = value;
        true
    }

    /// Called instead of `single_reader` when the resolved address is
    /// at or above `SafeReadOnlyAddress`: no writer can still be
    /// mutating this record in place, so a caller with a cheaper
    /// conflict-free read path can specialize it here. Defaults to
    /// `single_reader`'s behavior.
    fn concurrent_reader(&mut self, key: &K, value: &V) -> bool {
        self.single_reader(key, value)
    }

    /// Fires once `Read` has fully resolved, after whichever of
    /// `single_reader`/`concurrent_reader` ran. A hook for metrics or
    /// logging, not a decision point.
    fn read_completion(&mut self, key: &K, status: Status) {
        let _ = key;
        let _ = status;
    }
}

/// Policy for `Upsert`: how to write a brand new value, and how to
/// overwrite one in place when the existing record still lives in the
/// mutable region.
pub trait UpsertFunctions<K, V> {
    fn single_writer(&mut self, key: &K, value: V) -> V {
        let _ = key;
        value
    }

    /// In-place update of an existing mutable-region record. Returning
    /// `false` forces a read-copy-update (RCU) append instead.
    fn concurrent_writer(&mut self, key: &K, value: V, dst: &mut V) -> bool {
        let _ = key;
        *dst = value;
        true
    }

    fn upsert_completion(&mut self, key: &K, status: Status) {
        let _ = key;
        let _ = status;
    }
}

/// Policy for `RMW`: how to seed the value when the key is absent, and
/// how to merge an update into an existing value either in place or via
/// a copy when the existing record is read-only.
pub trait RmwFunctions<K, V> {
    fn initial_update(&mut self, key: &K) -> V;

    /// In-place merge against a mutable-region record. Returning `false`
    /// forces a copy-update (RCU append) instead.
    fn in_place_update(&mut self, key: &K, value: &mut V) -> bool {
        let _ = key;
        let _ = value;
        false
    }

    /// Merge against an immutable (read-only or on-disk) record,
    /// producing the new value to append.
    fn copy_update(&mut self, key: &K, old_value: &V) -> V;

    fn rmw_completion(&mut self, key: &K, status: Status) {
        let _ = key;
        let _ = status;
    }
}

/// Policy for `Delete`: whether the deletion needs any caller
/// notification beyond the engine writing a tombstone record.
pub trait DeleteFunctions<K, V> {
    fn on_delete(&mut self, key: &K) {
        let _ = key;
    }

    fn delete_completion(&mut self, key: &K, status: Status) {
        let _ = key;
        let _ = status;
    }
}

/// Callback fired once a checkpoint's durable commit marker is
/// observed by `FasterKv::complete_checkpoint_with` — the completion
/// hook analogue for the checkpoint surface, matching the per-operation
/// completion callbacks above rather than `Read`/`Upsert`/`RMW`/`Delete`
/// themselves.
pub trait CheckpointCompletionFunctions {
    fn checkpoint_completion(&mut self, token: &CheckpointToken, success: bool) {
        let _ = token;
        let _ = success;
    }
}
