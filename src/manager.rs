//! The process-wide NVM allocator singleton.
//!
//! [`NVManager`] is a zero-sized handle whose methods carry no `&self`,
//! keeping every method static so that a single allocator can be shared
//! without threading a reference through every call site. All mutable
//! process state lives behind a small set of statics below instead of
//! inside a struct instance.

use std::mem;
use std::path::PathBuf;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicUsize, Ordering};

use memmap2::MmapMut;
use parking_lot::Mutex;

use crate::error::{NvmError, Result};
use crate::pmem::{self, NvmConfig};
use crate::region::{self, NodeHeader, StaticHeader, VectorInfo, NULL_OFFSET};
use crate::{abs_ptr, rel_off};

/// Bookkeeping the allocator keeps for itself, immediately following the
/// [`StaticHeader`] in the mapped file, ahead of the first region.
///
/// This is a bump allocator: it only ever grows `next_free_offset`. Freed
/// regions are unlinked from the live list but their bytes are not
/// reclaimed; compaction is left to whatever allocator sits underneath
/// this one.
#[repr(C)]
struct AllocatorBookkeeping {
    next_free_offset: u64,
}

const STATIC_HEADER_OFFSET: u64 = 0;
const BOOKKEEPING_OFFSET: u64 = STATIC_HEADER_OFFSET + mem::size_of::<StaticHeader>() as u64;
const FIRST_REGION_OFFSET: u64 = BOOKKEEPING_OFFSET + mem::size_of::<AllocatorBookkeeping>() as u64;

struct ManagerState {
    mmap: MmapMut,
    #[allow(dead_code)]
    path: PathBuf,
}

static CONFIG: Mutex<Option<NvmConfig>> = Mutex::new(None);
static NON_VOLATILE: AtomicBool = AtomicBool::new(false);
static MATERIALIZED: AtomicBool = AtomicBool::new(false);

static MAPPING: Mutex<Option<ManagerState>> = Mutex::new(None);
static BASE_PTR: AtomicPtr<u8> = AtomicPtr::new(ptr::null_mut());
static MAP_LEN: AtomicUsize = AtomicUsize::new(0);

/// Guards mutations to the live-region list: `allocate`, `resize`,
/// `destroy`. Lookups (`get_or_create` on an existing uuid) and `persist`
/// do not take it, so readers never block behind an in-flight mutation.
static ALLOC_LOCK: Mutex<()> = Mutex::new(());

static UUID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A live handle onto one region's payload header and raw byte array.
///
/// Holds a raw pointer to the mapping base rather than a borrow, because
/// the mapping's base address is stable for the whole process lifetime
/// once established (the backing file never changes size after
/// `initialize()`; only regions move within it). A region's own data
/// pointer can still move under `resize`, which is why [`NVVector`]
/// re-derives it after every capacity change instead of caching it.
///
/// [`NVVector`]: crate::vector::NVVector
#[derive(Clone, Copy)]
pub struct Region {
    base: *mut u8,
    node_offset: u64,
}

// SAFETY: a `Region` is just an offset into the single NVM mapping plus
// that mapping's stable base pointer; moving it across threads carries no
// additional hazard beyond what accessing the pointed-to memory already
// requires, which callers (`NVVector`) uphold.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    #[inline]
    fn node_ptr(&self) -> *mut NodeHeader {
        unsafe { abs_ptr!(self.base, self.node_offset) as *mut NodeHeader }
    }

    #[inline]
    fn info_offset(&self) -> u64 {
        self.node_offset + NodeHeader::size() as u64
    }

    #[inline]
    pub(crate) fn info_ptr(&self) -> *mut VectorInfo {
        unsafe { abs_ptr!(self.base, self.info_offset()) as *mut VectorInfo }
    }

    /// Pointer to the first element of the raw byte array.
    #[inline]
    pub fn data_ptr(&self) -> *mut u8 {
        unsafe { abs_ptr!(self.base, self.info_offset() + VectorInfo::size() as u64) }
    }

    #[inline]
    pub fn info_byte_offset(&self) -> u64 {
        self.info_offset()
    }

    pub fn uuid(&self) -> u64 {
        unsafe { (*self.info_ptr()).uuid }
    }

    pub fn size(&self) -> usize {
        unsafe { (*self.info_ptr()).size as usize }
    }

    pub fn capacity(&self) -> usize {
        unsafe { (*self.info_ptr()).capacity as usize }
    }

    pub fn allocated(&self) -> usize {
        unsafe { (*self.info_ptr()).allocated as usize }
    }

    pub fn set_size(&self, size: usize) {
        unsafe { (*self.info_ptr()).size = size as u64 };
    }

    pub fn set_capacity(&self, capacity: usize) {
        unsafe { (*self.info_ptr()).capacity = capacity as u64 };
    }

    pub(crate) fn set_uuid(&self, uuid: u64) {
        unsafe { (*self.info_ptr()).uuid = uuid };
    }

    fn verify_one(&self) {
        if !region::canaries_enabled() {
            return;
        }
        unsafe {
            let node = &*self.node_ptr();
            region::check_head_canary(node);
            let allocated = (*self.info_ptr()).allocated as usize;
            let tail_off = self.node_offset + region::tail_canary_offset(allocated) as u64;
            let tail = *(abs_ptr!(self.base, tail_off) as *const u64);
            assert_eq!(tail, region::TAIL_CANARY, "NVM tail canary corrupted");
        }
    }
}

/// The process-wide NVM allocator.
///
/// All methods are associated functions; there is no instance to hold.
/// Configuration is set once (`configure`, `set_non_volatile_mode`) before
/// the first operation materializes the backing mapping; afterward
/// configuration is locked for the life of the process.
pub struct NVManager;

impl NVManager {
    /// Sets the pool's mount point, backing-file path, and size before the
    /// manager is first used.
    ///
    /// Fails with [`NvmError::ConfigLocked`] once the manager has been
    /// materialized by any prior operation.
    pub fn configure(cfg: NvmConfig) -> Result<()> {
        if MATERIALIZED.load(Ordering::Acquire) {
            return Err(NvmError::ConfigLocked);
        }
        *CONFIG.lock() = Some(cfg);
        Ok(())
    }

    /// Declares that the backing file should survive process exit.
    ///
    /// Must be called before the manager is first used; fails with
    /// [`NvmError::ConfigLocked`] afterward. Default is volatile mode.
    pub fn set_non_volatile_mode() -> Result<()> {
        if MATERIALIZED.load(Ordering::Acquire) {
            return Err(NvmError::ConfigLocked);
        }
        NON_VOLATILE.store(true, Ordering::Release);
        Ok(())
    }

    /// Returns whether the manager is running in non-volatile mode.
    pub fn is_non_volatile_mode() -> bool {
        NON_VOLATILE.load(Ordering::Acquire)
    }

    fn ensure_initialized() -> Result<()> {
        if !BASE_PTR.load(Ordering::Acquire).is_null() {
            return Ok(());
        }
        let mut guard = MAPPING.lock();
        if guard.is_some() {
            return Ok(());
        }
        MATERIALIZED.store(true, Ordering::Release);
        let state = Self::initialize()?;
        BASE_PTR.store(state.mmap.as_ptr() as *mut u8, Ordering::Release);
        MAP_LEN.store(state.mmap.len(), Ordering::Release);
        *guard = Some(state);
        Ok(())
    }

    fn initialize() -> Result<ManagerState> {
        let cfg = CONFIG.lock().clone().unwrap_or_default();

        pmem::check_mounted(&cfg)?;
        pmem::check_writable(&cfg)?;
        let mut mmap = pmem::open_mapping(&cfg)?;

        if !NON_VOLATILE.load(Ordering::Acquire) {
            pmem::unlink(&cfg.backing_file).map_err(|source| NvmError::MapFailed {
                path: cfg.backing_file.clone(),
                source,
            })?;
        }

        let header = unsafe { &mut *(mmap.as_mut_ptr() as *mut StaticHeader) };
        if header.initialized == 0 {
            header.root_offset = NULL_OFFSET;
            header.format_tag = StaticHeader::expected_format_tag();
            header.initialized = 1;
            let bookkeeping = unsafe {
                &mut *(mmap.as_mut_ptr().add(BOOKKEEPING_OFFSET as usize)
                    as *mut AllocatorBookkeeping)
            };
            bookkeeping.next_free_offset = FIRST_REGION_OFFSET;
            let _ = mmap.flush_range(0, FIRST_REGION_OFFSET as usize);
        } else if header.format_tag != StaticHeader::expected_format_tag() {
            tracing::error!("NVM backing file format tag mismatch (debug/release canary layout)");
            return Err(NvmError::StaticAreaMissing);
        }

        UUID_COUNTER.store(1, Ordering::Release);

        tracing::debug!(
            non_volatile = NON_VOLATILE.load(Ordering::Acquire),
            "NVManager initialized"
        );

        Ok(ManagerState {
            mmap,
            path: cfg.backing_file,
        })
    }

    fn root_offset() -> u64 {
        let base = BASE_PTR.load(Ordering::Acquire);
        unsafe { (*(base as *const StaticHeader)).root_offset }
    }

    fn set_root_offset(base: *mut u8, off: u64) -> Result<()> {
        unsafe {
            (*(base as *mut StaticHeader)).root_offset = off;
        }
        Self::persist_raw(0, mem::size_of::<StaticHeader>())
    }

    fn lookup(uuid: u64) -> Result<Region> {
        let base = BASE_PTR.load(Ordering::Acquire);
        let mut off = Self::root_offset();
        while off != NULL_OFFSET {
            let region = Region { base, node_offset: off };
            if region.uuid() == uuid {
                return Ok(region);
            }
            off = unsafe { (*region.node_ptr()).next };
        }
        Err(NvmError::NotFound(uuid))
    }

    fn bump_alloc(base: *mut u8, payload_bytes: usize) -> Result<u64> {
        let total = region::region_total_size(payload_bytes) as u64;
        let bookkeeping = unsafe { &mut *(abs_ptr!(base, BOOKKEEPING_OFFSET) as *mut AllocatorBookkeeping) };
        let start = bookkeeping.next_free_offset;
        let end = start
            .checked_add(total)
            .ok_or(NvmError::OutOfMemory { requested: payload_bytes })?;
        if end as usize > MAP_LEN.load(Ordering::Acquire) {
            return Err(NvmError::OutOfMemory { requested: payload_bytes });
        }
        bookkeeping.next_free_offset = end;
        Ok(start)
    }

    /// Reserves and fully links a new region of `payload_bytes`, assigning
    /// it `uuid` (the caller passes `0` to have one generated).
    ///
    /// The node is filled in completely (canaries included) before any of
    /// the three link-up writes (`new.next`, `old_root.prev`, `root`)
    /// happen, and those three writes happen in the order that keeps the
    /// list valid if observed between any two of them: a crash mid-link
    /// leaves either the old root or the new root reachable, never neither.
    fn allocate(payload_bytes: usize, uuid: u64) -> Result<Region> {
        let _guard = ALLOC_LOCK.lock();
        Self::ensure_initialized()?;
        let base = BASE_PTR.load(Ordering::Acquire);

        let node_offset = Self::bump_alloc(base, payload_bytes)?;
        // Persisted before activation: if the process crashes between here
        // and the root-link writes below, the bump offset on disk already
        // reflects this reservation, so a restart never hands out the same
        // bytes twice even though the region is not yet reachable from root.
        Self::persist_raw(BOOKKEEPING_OFFSET, mem::size_of::<AllocatorBookkeeping>())?;
        let region = Region { base, node_offset };

        unsafe {
            let node = &mut *region.node_ptr();
            region::write_head_canary(node);
            node.prev = NULL_OFFSET;
            node.next = NULL_OFFSET;

            let info = &mut *region.info_ptr();
            info.uuid = if uuid == 0 { Self::generate_uuid() } else { uuid };
            info.size = 0;
            info.capacity = 0;
            info.allocated = payload_bytes as u64;

            if region::canaries_enabled() {
                let tail_off = node_offset + region::tail_canary_offset(payload_bytes) as u64;
                *(abs_ptr!(base, tail_off) as *mut u64) = region::TAIL_CANARY;
            }
        }

        // --- activation: link the new node in as the new root ---
        let old_root = Self::root_offset();
        unsafe { (*region.node_ptr()).next = old_root };
        if old_root != NULL_OFFSET {
            let old_root_region = Region { base, node_offset: old_root };
            unsafe { (*old_root_region.node_ptr()).prev = node_offset };
            Self::persist_raw(old_root, NodeHeader::size())?;
        }
        Self::set_root_offset(base, node_offset)?;
        Self::persist_raw(node_offset, region::region_total_size(payload_bytes))?;

        tracing::debug!(uuid = region.uuid(), bytes = payload_bytes, "allocated NVM region");
        Ok(region)
    }

    fn generate_uuid() -> u64 {
        UUID_COUNTER.fetch_add(1, Ordering::Relaxed)
    }

    /// `get_or_create(uuid, size_bytes) -> Region`
    ///
    /// * `uuid != 0`: look up the existing region, ignoring `size_bytes`
    ///   (a nonzero uuid always takes priority over a size request).
    /// * `uuid == 0 && size_bytes > 0`: allocate a fresh region with a
    ///   freshly generated uuid.
    /// * `uuid == 0 && size_bytes == 0`: `InvalidArg`.
    pub fn get_or_create(uuid: u64, size_bytes: usize) -> Result<Region> {
        Self::ensure_initialized()?;
        if uuid != 0 {
            Self::lookup(uuid)
        } else if size_bytes > 0 {
            Self::allocate(size_bytes, 0)
        } else {
            Err(NvmError::InvalidArg(
                "must provide either a nonzero uuid or a positive size_bytes",
            ))
        }
    }

    /// Allocates a fresh region of `new_bytes`, copies
    /// `min(new_bytes, old.allocated)` payload bytes over, carries the
    /// `uuid` forward, persists the new region, and destroys the old one.
    ///
    /// Capacity and size of the returned region are byte-level only; the
    /// caller ([`crate::vector::NVVector`]) sets the element-level
    /// `capacity`/`size` fields afterward.
    pub fn resize(old: Region, new_bytes: usize) -> Result<Region> {
        let uuid = old.uuid();
        let new_region = Self::allocate(new_bytes, uuid)?;

        let copy_len = new_bytes.min(old.allocated());
        unsafe {
            ptr::copy_nonoverlapping(old.data_ptr(), new_region.data_ptr(), copy_len);
        }
        Self::persist_raw(
            new_region.info_byte_offset() - NodeHeader::size() as u64,
            region::region_total_size(new_bytes),
        )?;

        Self::destroy(old)?;
        Ok(new_region)
    }

    /// Unlinks `region` from the live list and marks it dead. The bytes
    /// themselves are not reclaimed (see [`AllocatorBookkeeping`]).
    pub fn destroy(region: Region) -> Result<()> {
        let _guard = ALLOC_LOCK.lock();
        let base = region.base;
        let (next, prev) = unsafe {
            let node = &*region.node_ptr();
            (node.next, node.prev)
        };
        let is_root = region.node_offset == Self::root_offset();

        if next != NULL_OFFSET {
            let next_region = Region { base, node_offset: next };
            unsafe { (*next_region.node_ptr()).prev = prev };
            Self::persist_raw(next, NodeHeader::size())?;
        }
        if prev != NULL_OFFSET {
            let prev_region = Region { base, node_offset: prev };
            unsafe { (*prev_region.node_ptr()).next = next };
            Self::persist_raw(prev, NodeHeader::size())?;
        }
        if is_root {
            Self::set_root_offset(base, next)?;
        }

        unsafe {
            let info = &mut *region.info_ptr();
            info.uuid = 0;
            info.size = 0;
            info.capacity = 0;
            info.allocated = 0;
        }
        Self::persist_raw(region.info_byte_offset(), VectorInfo::size())?;

        tracing::debug!(offset = region.node_offset, "destroyed NVM region");
        Ok(())
    }

    fn persist_raw(offset: u64, len: usize) -> Result<()> {
        let map_len = MAP_LEN.load(Ordering::Acquire);
        let start = offset as usize;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= map_len)
            .ok_or(NvmError::RangeError { start, end: start + len })?;
        let mut guard = MAPPING.lock();
        let state = guard.as_mut().ok_or(NvmError::StaticAreaMissing)?;
        state
            .mmap
            .flush_range(start, end - start)
            .map_err(|source| NvmError::MapFailed {
                path: PathBuf::new(),
                source,
            })
    }

    /// Flushes `[ptr, ptr+len)` from CPU caches to persistent media.
    ///
    /// `ptr` must lie inside the mapping and `ptr + len` must not exceed
    /// it, otherwise [`NvmError::RangeError`].
    pub fn persist(ptr: *const u8, len: usize) -> Result<()> {
        let base = BASE_PTR.load(Ordering::Acquire);
        let offset = unsafe { rel_off!(base, ptr) };
        Self::persist_raw(offset, len)
    }

    /// Verifies debug canaries are intact on every live region. No-op when
    /// canaries are disabled. Panics on the first mismatch: corruption is
    /// never papered over.
    pub fn verify_canaries() {
        if !region::canaries_enabled() || BASE_PTR.load(Ordering::Acquire).is_null() {
            return;
        }
        let base = BASE_PTR.load(Ordering::Acquire);
        let mut off = Self::root_offset();
        while off != NULL_OFFSET {
            let region = Region { base, node_offset: off };
            region.verify_one();
            off = unsafe { (*region.node_ptr()).next };
        }
    }

    /// Verifies canaries, unmaps, and re-runs initialization. Intended for
    /// test isolation between otherwise-independent test cases: it also
    /// re-opens the configuration latch so a following test can call
    /// [`NVManager::configure`]/[`NVManager::set_non_volatile_mode`] again.
    pub fn reset() -> Result<()> {
        Self::verify_canaries();
        *MAPPING.lock() = None;
        BASE_PTR.store(ptr::null_mut(), Ordering::Release);
        MAP_LEN.store(0, Ordering::Release);
        MATERIALIZED.store(false, Ordering::Release);
        NON_VOLATILE.store(false, Ordering::Release);
        *CONFIG.lock() = None;
        Ok(())
    }
}
