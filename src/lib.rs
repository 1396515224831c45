//! `hlogkv` — a concurrent hybrid-log key-value store: a latch-free
//! hash index over a single-address-space log spanning memory and
//! disk, with epoch-based reclamation and Concurrent Prefix Recovery
//! (CPR) checkpointing.

pub mod address;
pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod epoch;
pub mod error;
pub mod functions;
pub mod index;
pub mod log;
pub mod readcache;
pub mod record;
pub mod session;

pub use error::{HlogError, Result};
pub use engine::{FasterKv, Statistics};
pub use functions::{DeleteFunctions, ReadFunctions, RmwFunctions, Status, UpsertFunctions};

/// Initializes `tracing` output for binaries embedding this crate,
/// matching the teacher's own `main.rs` subscriber setup.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();
}
