//! Non-volatile memory allocation and growable vector storage for a
//! column-store engine's attribute data.
//!
//! This crate manages one memory-mapped backing file as a process-wide
//! pool of byte regions, each identified by a uuid and reachable from a
//! single root offset after a restart. On top of that pool it provides
//! [`vector::NVVector`], a typed growable array, and
//! [`attribute_vector::NVAttributeVector`], a row-major 2D view over one
//! such vector suited to column storage.
//!
//! # Layout
//!
//! * [`pmem`] — mount-point and backing-file handling: the only module
//!   that talks to the operating system.
//! * [`region`] — the on-disk byte layout (static header, per-region node
//!   header, payload header) and offset/pointer translation helpers.
//! * [`manager`] — [`manager::NVManager`], the process-wide allocator
//!   singleton: configuration, initialization, allocate/resize/destroy,
//!   cache-line persistence, canary verification.
//! * [`vector`] — [`vector::NVVector<T>`], a single typed sequence backed
//!   by one region.
//! * [`attribute_vector`] — [`attribute_vector::NVAttributeVector<T>`], a
//!   2D row-major view over an [`vector::NVVector<T>`].
//! * [`error`] — [`error::NvmError`], the typed error surfaced by every
//!   fallible entry point.
//!
//! # Example
//!
//! ```no_run
//! use nvmstore::vector::NVVector;
//!
//! let mut v: NVVector<i64> = NVVector::new(4, 0)?;
//! v.push_back(42)?;
//! v.persist(false)?;
//! let uuid = v.uuid();
//! drop(v);
//!
//! let restored: NVVector<i64> = NVVector::from_uuid(uuid)?;
//! assert_eq!(restored.len(), 5);
//! # Ok::<(), nvmstore::error::NvmError>(())
//! ```

#![allow(clippy::missing_safety_doc)]

pub mod attribute_vector;
pub mod error;
pub mod manager;
pub mod pmem;
pub mod region;
pub mod vector;

pub use error::{NvmError, Result};
