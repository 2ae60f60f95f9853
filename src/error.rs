//! Typed error kinds surfaced by the NVM persistence layer.
//!
//! Every fallible entry point in [`crate::manager`], [`crate::vector`], and
//! [`crate::attribute_vector`] returns [`NvmError`] rather than a bare
//! string. Initialization failures (anything up to and including
//! [`NvmError::StaticAreaMissing`]) are meant to be treated as fatal by the
//! binary embedding this crate; lookup and bounds errors are recoverable at
//! the call site; `persist` and `atomic_inc` do not fail absent a
//! programming error.

use std::path::PathBuf;

/// A `Result` alias for fallible NVM operations.
pub type Result<T> = std::result::Result<T, NvmError>;

/// Error kinds produced by the NVM allocator, vector, and attribute-vector
/// layers.
#[derive(Debug, thiserror::Error)]
pub enum NvmError {
    /// [`crate::manager::NVManager::set_non_volatile_mode`] or
    /// [`crate::manager::NVManager::configure`] was called after the
    /// manager singleton had already been materialized by an earlier
    /// operation.
    #[error("cannot change NVManager configuration after it has been materialized")]
    ConfigLocked,

    /// The configured mount point is not present in the system mount table
    /// with filesystem type `pmfs`.
    #[error("persistent memory mount point `{0}` is not mounted as pmfs")]
    PmfsUnmounted(PathBuf),

    /// The writability probe on the mount point failed with a permission
    /// error.
    #[error("persistent memory mount point `{0}` is read-only")]
    PmfsReadOnly(PathBuf),

    /// The writability probe failed for a reason other than permissions.
    #[error("failed to probe persistent memory mount point `{path}`: {source}")]
    ProbeFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Creating or mmap-ing the backing file failed.
    #[error("failed to map backing file `{path}`: {source}")]
    MapFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The static header at the start of the mapped file could not be
    /// located or is corrupt.
    #[error("static root header is missing or corrupt")]
    StaticAreaMissing,

    /// The pool has no room for the requested allocation.
    #[error("persistent memory pool is exhausted (requested {requested} bytes)")]
    OutOfMemory { requested: usize },

    /// [`crate::manager::NVManager::get_or_create`] was called with a
    /// nonzero UUID that does not name a live region.
    #[error("no live region with uuid {0}")]
    NotFound(u64),

    /// A caller-supplied argument combination is invalid, e.g. both `uuid`
    /// and `size_bytes` zero in `get_or_create`.
    #[error("invalid argument: {0}")]
    InvalidArg(&'static str),

    /// [`crate::manager::NVManager::persist`] was asked to flush a byte
    /// range outside the mapping.
    #[error("byte range [{start}, {end}) is outside the mapping")]
    RangeError { start: usize, end: usize },

    /// An indexed accessor (`NVVector::at`, `NVAttributeVector` bounds
    /// checks) was called with an out-of-range index.
    #[error("index {index} out of range for length {len}")]
    OutOfRange { index: usize, len: usize },

    /// A declared-but-undefined operation, e.g. `NVAttributeVector::copy`.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
}
