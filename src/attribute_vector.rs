//! `NVAttributeVector<T>`: a row-major 2D view over one [`NVVector<T>`],
//! sized for a fixed column count and a growable row count.
//!
//! Grounded on `original_source/src/lib/storage/NVAttributeVector.h`. Used
//! the way a column store uses it: one attribute vector per table column,
//! with `columns` equal to however many physical sub-columns that
//! attribute is split into (dictionary-encoded columns commonly use two:
//! value ids and null markers).

use std::fmt;

use crate::error::{NvmError, Result};
use crate::manager::Region;
use crate::vector::NVVector;

pub struct NVAttributeVector<T: Copy> {
    data: NVVector<T>,
    columns: usize,
}

impl<T: Copy + Default> NVAttributeVector<T> {
    /// Allocates backing storage for `rows * columns` elements and sets
    /// the logical row count to zero; call [`Self::resize`] to grow it.
    pub fn new(columns: usize, rows: usize) -> Result<Self> {
        if columns == 0 {
            return Err(NvmError::InvalidArg("columns must be nonzero"));
        }
        let mut data = NVVector::new(columns * rows, T::default())?;
        data.clear();
        Ok(NVAttributeVector { data, columns })
    }

    /// Restores an attribute vector by uuid. `columns` must match how it
    /// was originally constructed; it is not itself persisted.
    pub fn from_uuid(uuid: u64, columns: usize) -> Result<Self> {
        if columns == 0 {
            return Err(NvmError::InvalidArg("columns must be nonzero"));
        }
        Ok(NVAttributeVector {
            data: NVVector::from_uuid(uuid)?,
            columns,
        })
    }

    pub fn from_region(region: Region, columns: usize) -> Result<Self> {
        if columns == 0 {
            return Err(NvmError::InvalidArg("columns must be nonzero"));
        }
        Ok(NVAttributeVector {
            data: NVVector::from_existing(region),
            columns,
        })
    }

    pub fn uuid(&self) -> u64 {
        self.data.uuid()
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn size(&self) -> usize {
        self.data.len() / self.columns
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity() / self.columns
    }

    #[inline]
    fn pos(&self, row: usize, column: usize) -> usize {
        row * self.columns + column
    }

    #[inline]
    fn check_access(&self, row: usize, column: usize) -> Result<usize> {
        let pos = self.pos(row, column);
        if column >= self.columns || pos >= self.data.len() {
            return Err(NvmError::OutOfRange { index: pos, len: self.data.len() });
        }
        Ok(pos)
    }

    /// Reads `(row, column)`. Bounds are only checked when the
    /// `expensive_assertions` feature is enabled; out-of-range access is
    /// undefined behavior otherwise.
    pub fn get(&self, row: usize, column: usize) -> T {
        #[cfg(feature = "expensive_assertions")]
        self.check_access(row, column).expect("NVAttributeVector access out of bounds");
        self.data[self.pos(row, column)]
    }

    /// Checked counterpart to [`Self::get`].
    pub fn at(&self, row: usize, column: usize) -> Result<T> {
        let pos = self.check_access(row, column)?;
        Ok(self.data[pos])
    }

    /// Writes `(row, column)`. Bounds are only checked when the
    /// `expensive_assertions` feature is enabled.
    pub fn set(&mut self, row: usize, column: usize, value: T) {
        #[cfg(feature = "expensive_assertions")]
        self.check_access(row, column).expect("NVAttributeVector access out of bounds");
        let pos = self.pos(row, column);
        self.data[pos] = value;
    }

    pub fn set_checked(&mut self, row: usize, column: usize, value: T) -> Result<()> {
        let pos = self.check_access(row, column)?;
        self.data[pos] = value;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Grows or shrinks to `rows` rows, filling any new cells with
    /// `value`.
    pub fn resize(&mut self, rows: usize, value: T) -> Result<()> {
        self.data.resize(rows * self.columns, value)
    }

    pub fn reserve(&mut self, rows: usize) -> Result<()> {
        self.data.reserve(rows * self.columns)
    }

    /// Declared but not implemented by the storage this type was modeled
    /// on; attribute vectors are moved by swapping uuids at the table
    /// level rather than by deep copy.
    pub fn copy(&self) -> Result<Self> {
        Err(NvmError::Unsupported("NVAttributeVector::copy"))
    }

    pub fn persist(&self, without_data: bool) -> Result<()> {
        self.data.persist(without_data)
    }

    /// Flushes only the cells named by `(row, column)` pairs, translating
    /// each to its flat index before delegating to the coalescing flush
    /// in [`NVVector::persist_scattered`].
    pub fn persist_scattered(&self, cells: &[(usize, usize)]) -> Result<()> {
        let indices: Vec<usize> = cells.iter().map(|&(r, c)| self.pos(r, c)).collect();
        self.data.persist_scattered(&indices, false)
    }
}

/// Generates `inc`/`atomic_inc` for one integer element type, backed by the
/// matching `core::sync::atomic` type. `inc`/`atomic_inc` only make sense
/// for types with a hardware fetch-add, so this is implemented per
/// concrete integer type rather than generically over `T`.
macro_rules! impl_counter_ops {
    ($t:ty, $atomic:ty) => {
        impl NVAttributeVector<$t> {
            /// Increments `(column, row)` by one and returns the
            /// pre-increment value. Not synchronized against concurrent
            /// writers to the same cell; use [`Self::atomic_inc`] for that.
            pub fn inc(&mut self, column: usize, row: usize) -> $t {
                #[cfg(feature = "expensive_assertions")]
                self.check_access(row, column).expect("NVAttributeVector access out of bounds");
                let pos = self.pos(row, column);
                let prev = self.data[pos];
                self.data[pos] = prev.wrapping_add(1);
                prev
            }

            /// Atomic fetch-and-add of one at `(column, row)`, returning
            /// the pre-increment value. The only thread-safe mutator on
            /// this layer, mirroring the original's
            /// `__sync_fetch_and_add`. Atomicity is CPU-cache atomicity
            /// only: crash-consistency of the new value still requires an
            /// explicit `persist`/`persist_scattered` call afterward.
            pub fn atomic_inc(&self, column: usize, row: usize) -> $t {
                #[cfg(feature = "expensive_assertions")]
                self.check_access(row, column).expect("NVAttributeVector access out of bounds");
                let pos = self.pos(row, column);
                // SAFETY: `pos` is within the vector's allocated element
                // array, which is at least as aligned as `$t` (the
                // allocator hands out regions whose raw array starts
                // immediately after a fixed-size header); a `$atomic`
                // access over that slot never touches header bytes.
                unsafe {
                    let ptr = self.data.data() as *mut $t as *mut $atomic;
                    (*ptr.add(pos)).fetch_add(1, std::sync::atomic::Ordering::SeqCst)
                }
            }
        }
    };
}

impl_counter_ops!(i32, std::sync::atomic::AtomicI32);
impl_counter_ops!(i64, std::sync::atomic::AtomicI64);
impl_counter_ops!(u32, std::sync::atomic::AtomicU32);
impl_counter_ops!(u64, std::sync::atomic::AtomicU64);
impl_counter_ops!(isize, std::sync::atomic::AtomicIsize);
impl_counter_ops!(usize, std::sync::atomic::AtomicUsize);

impl<T: Copy + Default + fmt::Display> fmt::Display for NVAttributeVector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in 0..self.size() {
            for column in 0..self.columns {
                if column > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{}", self.get(row, column))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
