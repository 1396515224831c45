//! Crate-wide error type and result alias.
//!
//! Most failure modes inside the engine (capacity retries, CAS races,
//! version-shift detection) are internal control flow, not errors: they
//! resolve into a retry loop or a `Status::Pending` before ever reaching
//! a caller. `HlogError` only covers the conditions that are genuinely
//! terminal from the caller's point of view.

use thiserror::Error;

/// Crate-wide result alias, mirroring the convention of pairing a
/// `thiserror` enum with a short `Result<T>` alias.
pub type Result<T> = std::result::Result<T, HlogError>;

#[derive(Error, Debug)]
pub enum HlogError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("recovery failed: {0}")]
    RecoveryFailed(String),

    #[error("(de)serialization error: {0}")]
    Serialization(String),

    #[error("invalid address: {0}")]
    InvalidAddress(u64),
}
