//! On-disk layout: the static root header, the per-region node header, and
//! the vector-info payload header, plus the offset<->pointer translation
//! helpers every boundary crossing must go through.
//!
//! All cross-references that live in the mapped file are intra-file
//! offsets; nothing absolute is ever persisted.

use std::mem;

/// Sentinel offset standing in for a null pointer. Offset 0 is the start of
/// the mapping (the static header itself), so it is never a valid region
/// offset and cannot collide with this sentinel.
pub const NULL_OFFSET: u64 = u64::MAX;

/// Head canary value written just before a region's node header when
/// canaries are enabled.
pub const HEAD_CANARY: u64 = 0xDEAD_BEEF_DEAD_BEEF;

/// Tail canary value written immediately after a region's raw byte array.
pub const TAIL_CANARY: u64 = 0xDEAD_BABE_DEAD_BABE;

/// Returns whether this build writes and checks debug canaries.
///
/// A release build compiled without the `canaries` feature uses a smaller
/// [`NodeHeader`]; mixing the two within one backing file would
/// misinterpret every offset past the first region, so the format tag in
/// [`StaticHeader`] exists specifically to refuse that.
#[inline]
pub const fn canaries_enabled() -> bool {
    cfg!(any(feature = "canaries", debug_assertions))
}

/// The fixed-offset header at the start of the mapped file.
///
/// Written once per file lifetime (see [`StaticHeader::initialized`]) and
/// updated on allocate/free as part of the same durable transition that
/// links/unlinks the affected region.
#[repr(C)]
pub struct StaticHeader {
    /// Offset of the first live region node, or [`NULL_OFFSET`].
    pub root_offset: u64,
    /// `0` until the first `initialize()` of this file's lifetime, `1`
    /// thereafter.
    pub initialized: u8,
    /// `1` if this file was written by a build with canaries enabled, `0`
    /// otherwise. A mismatch against [`canaries_enabled`] at open time is
    /// refused rather than silently reinterpreted.
    pub format_tag: u8,
}

impl StaticHeader {
    pub fn expected_format_tag() -> u8 {
        if canaries_enabled() {
            1
        } else {
            0
        }
    }
}

/// Allocator-owned node header: the doubly-linked-list plumbing for one
/// region, plus an optional debug head canary. The payload header
/// ([`VectorInfo`]) follows immediately after this struct in the mapped
/// bytes, rather than being embedded as a field.
#[repr(C)]
pub struct NodeHeader {
    #[cfg(any(feature = "canaries", debug_assertions))]
    pub head_canary: u64,
    pub next: u64,
    pub prev: u64,
}

impl NodeHeader {
    pub const fn size() -> usize {
        mem::size_of::<NodeHeader>()
    }
}

/// Payload header: identity and sizing of the element array that follows
/// it in the mapped bytes.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct VectorInfo {
    /// `0` means this region is dead (unreachable from the root).
    pub uuid: u64,
    /// Logical element count.
    pub size: u64,
    /// Element count the payload can hold without reallocation.
    pub capacity: u64,
    /// Byte count of the raw array (`capacity * size_of::<T>() <= allocated`).
    pub allocated: u64,
}

impl VectorInfo {
    pub const fn size() -> usize {
        mem::size_of::<VectorInfo>()
    }

    pub fn is_live(&self) -> bool {
        self.uuid != 0
    }
}

/// Writes the head canary into `node`, compiled in only when canaries are
/// enabled (no-op otherwise). Split out as a function rather than a
/// runtime `if` because [`NodeHeader::head_canary`] does not exist as a
/// field at all in a canary-free build.
#[cfg(any(feature = "canaries", debug_assertions))]
pub fn write_head_canary(node: &mut NodeHeader) {
    node.head_canary = HEAD_CANARY;
}

#[cfg(not(any(feature = "canaries", debug_assertions)))]
pub fn write_head_canary(_node: &mut NodeHeader) {}

/// Asserts the head canary in `node` is intact. No-op in a canary-free
/// build.
#[cfg(any(feature = "canaries", debug_assertions))]
pub fn check_head_canary(node: &NodeHeader) {
    assert_eq!(node.head_canary, HEAD_CANARY, "NVM head canary corrupted");
}

#[cfg(not(any(feature = "canaries", debug_assertions)))]
pub fn check_head_canary(_node: &NodeHeader) {}

/// Translates an intra-file offset into an absolute pointer against
/// `$base`, the mapping's base address.
///
/// Every persisted cross-reference must pass through this (or [`rel_off`])
/// at the point it crosses from on-disk representation into an in-memory
/// reference.
#[macro_export]
macro_rules! abs_ptr {
    ($base:expr, $off:expr) => {
        ($base as *mut u8).add($off as usize)
    };
}

/// Translates an absolute pointer back into an intra-file offset against
/// `$base`.
#[macro_export]
macro_rules! rel_off {
    ($base:expr, $ptr:expr) => {
        (($ptr as *const u8 as usize) - ($base as *const u8 as usize)) as u64
    };
}

/// Computes the total byte size of a region (node header + vector info +
/// raw array + optional tail canary) for a requested payload size.
pub fn region_total_size(allocated: usize) -> usize {
    let mut total = NodeHeader::size() + VectorInfo::size() + allocated;
    if canaries_enabled() {
        total += mem::size_of::<u64>();
    }
    total
}

/// Byte offset of the tail canary relative to the start of the region,
/// given `allocated` payload bytes.
pub fn tail_canary_offset(allocated: usize) -> usize {
    NodeHeader::size() + VectorInfo::size() + allocated
}
