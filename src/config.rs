//! Construction-time configuration for [`crate::engine::FasterKv`].
//!
//! Follows the teacher crate's habit of a plain builder-friendly struct
//! with a `Default` impl (see the old `Config`/`DatabaseConfig` types)
//! rather than a trait-heavy configuration DSL.

use crate::error::{HlogError, Result};
use std::path::PathBuf;
use std::sync::Arc;

use crate::checkpoint::manager::CheckpointManager;

/// `checkpoint_type` axis of [`CheckpointSettings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointType {
    /// The in-memory read-only region becomes the checkpoint: cheap, but
    /// ties the checkpoint's lifetime to the live log.
    FoldOver,
    /// Copies the mutable region to a separate file, leaving the live
    /// log's addressing untouched.
    Snapshot,
}

/// Log geometry and mutability split, named directly after the spec's
/// `log_settings` construction input.
#[derive(Debug, Clone)]
pub struct LogSettings {
    /// log2 of the page size, in bytes.
    pub page_size_bits: u32,
    /// log2 of the in-memory region size, in bytes.
    pub memory_size_bits: u32,
    /// log2 of the on-disk segment size, in bytes.
    pub segment_size_bits: u32,
    /// Fraction (0.0, 1.0] of the in-memory region kept mutable
    /// (`ReadOnlyAddress` sits at `memory_size * mutable_fraction` bytes
    /// behind `TailAddress`).
    pub mutable_fraction: f64,
    /// Whether a hit on a read-only or on-disk record is copied back to
    /// the mutable tail (read-hot promotion) instead of left in place.
    pub copy_reads_to_tail: bool,
    /// Second, smaller allocator for caching reads from the read-only
    /// region / disk without promoting them into the main log.
    pub read_cache_settings: Option<ReadCacheSettings>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            page_size_bits: 25,  // 32 MiB pages
            memory_size_bits: 30, // 1 GiB resident
            segment_size_bits: 30,
            mutable_fraction: 0.9,
            copy_reads_to_tail: false,
            read_cache_settings: None,
        }
    }
}

/// Geometry for the read cache, mirroring [`LogSettings`] minus the
/// on-disk segment dimension (the read cache never spills to disk).
#[derive(Debug, Clone)]
pub struct ReadCacheSettings {
    pub page_size_bits: u32,
    pub memory_size_bits: u32,
    /// Fraction of entries given a second chance before eviction.
    pub second_chance_fraction: f64,
}

impl Default for ReadCacheSettings {
    fn default() -> Self {
        Self {
            page_size_bits: 20, // 1 MiB pages
            memory_size_bits: 25, // 32 MiB resident
            second_chance_fraction: 0.5,
        }
    }
}

/// Where checkpoints are persisted: exactly one of a plain directory or
/// a caller-supplied [`CheckpointManager`], never both.
pub enum CheckpointDestination {
    Directory(PathBuf),
    Manager(Arc<dyn CheckpointManager>),
}

impl std::fmt::Debug for CheckpointDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointDestination::Directory(p) => write!(f, "Directory({})", p.display()),
            CheckpointDestination::Manager(_) => write!(f, "Manager(..)"),
        }
    }
}

#[derive(Debug)]
pub struct CheckpointSettings {
    pub destination: CheckpointDestination,
    pub checkpoint_type: CheckpointType,
    /// See `UseRelaxedCPR` in the public surface: construction-time only,
    /// not a runtime mutator (open question resolved in DESIGN.md).
    pub relaxed_cpr: bool,
}

impl CheckpointSettings {
    pub fn with_directory(dir: impl Into<PathBuf>, checkpoint_type: CheckpointType) -> Self {
        Self {
            destination: CheckpointDestination::Directory(dir.into()),
            checkpoint_type,
            relaxed_cpr: false,
        }
    }

    pub fn with_manager(manager: Arc<dyn CheckpointManager>, checkpoint_type: CheckpointType) -> Self {
        Self {
            destination: CheckpointDestination::Manager(manager),
            checkpoint_type,
            relaxed_cpr: false,
        }
    }
}

/// Helper for non-blittable / variable-length key and value types: the
/// minimum and average sizes the allocator should assume when estimating
/// how many records fit per page. Fixed-size `K`/`V` types can ignore
/// this and rely on `Default`.
#[derive(Debug, Clone, Copy)]
pub struct VariableLengthSettings {
    pub average_key_size: usize,
    pub average_value_size: usize,
}

impl Default for VariableLengthSettings {
    fn default() -> Self {
        Self {
            average_key_size: 32,
            average_value_size: 64,
        }
    }
}

/// Top-level construction input for [`crate::engine::FasterKv`].
#[derive(Debug)]
pub struct FasterKvConfig {
    pub hash_table_size: u64,
    pub log_settings: LogSettings,
    pub checkpoint_settings: CheckpointSettings,
    pub variable_length_settings: VariableLengthSettings,
}

impl FasterKvConfig {
    pub fn new(hash_table_size: u64, checkpoint_settings: CheckpointSettings) -> Self {
        Self {
            hash_table_size: hash_table_size.next_power_of_two(),
            log_settings: LogSettings::default(),
            checkpoint_settings,
            variable_length_settings: VariableLengthSettings::default(),
        }
    }

    pub fn with_log_settings(mut self, log_settings: LogSettings) -> Self {
        self.log_settings = log_settings;
        self
    }

    pub fn with_variable_length_settings(mut self, settings: VariableLengthSettings) -> Self {
        self.variable_length_settings = settings;
        self
    }

    /// Validates cross-field invariants not expressible in the type
    /// alone (mutable_fraction range, power-of-two table size).
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.log_settings.mutable_fraction) {
            return Err(HlogError::Configuration(format!(
                "mutable_fraction must be in (0, 1], got {}",
                self.log_settings.mutable_fraction
            )));
        }
        if self.hash_table_size == 0 {
            return Err(HlogError::Configuration("hash_table_size must be nonzero".into()));
        }
        if self.log_settings.memory_size_bits < self.log_settings.page_size_bits {
            return Err(HlogError::Configuration(
                "memory_size_bits must be >= page_size_bits".into(),
            ));
        }
        Ok(())
    }
}
