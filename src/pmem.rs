//! External collaborators: the pmfs mount table, the backing file, and the
//! memory mapping itself.
//!
//! This module is the only place that talks to the operating system: mount
//! table probing against `/proc/mounts`, and the file-backed mapping
//! itself via [`memmap2`].

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::error::{NvmError, Result};

/// Default mount point the PMFS filesystem is expected to live at.
pub const DEFAULT_MOUNTPOINT: &str = "/mnt/pmfs";

/// Default path of the backing file inside the mount point.
pub const DEFAULT_FILENAME: &str = "/mnt/pmfs/hyrise";

/// Default capacity of the backing file, in bytes.
pub const DEFAULT_POOL_SIZE: u64 = 100 * 1024 * 1024;

/// Runtime configuration for where and how big the pool is: mount point,
/// backing file path, and file size, plus a test-only escape hatch so
/// suites can point the manager at a scratch directory instead of the real
/// `/mnt/pmfs`.
#[derive(Debug, Clone)]
pub struct NvmConfig {
    pub mount_point: PathBuf,
    pub backing_file: PathBuf,
    pub pool_size: u64,
    /// Test-only escape hatch: skip the `pmfs`-filesystem-type check and
    /// only require that `mount_point` exist. Production code must never
    /// need this; it exists because CI runners do not have a real PMFS
    /// mount.
    pub allow_any_fs: bool,
}

impl Default for NvmConfig {
    fn default() -> Self {
        NvmConfig {
            mount_point: PathBuf::from(DEFAULT_MOUNTPOINT),
            backing_file: PathBuf::from(DEFAULT_FILENAME),
            pool_size: DEFAULT_POOL_SIZE,
            allow_any_fs: false,
        }
    }
}

/// Verifies that `mount_point` is present in the system mount table with
/// filesystem type `pmfs` (or, in `allow_any_fs` test mode, is simply a
/// directory that exists).
///
/// Fatal at init: `NvmError::PmfsUnmounted` if the check fails.
pub fn check_mounted(cfg: &NvmConfig) -> Result<()> {
    if cfg.allow_any_fs {
        return if cfg.mount_point.is_dir() {
            Ok(())
        } else {
            Err(NvmError::PmfsUnmounted(cfg.mount_point.clone()))
        };
    }

    let mounted = mount_table_entries()
        .map_err(|source| NvmError::ProbeFailed {
            path: PathBuf::from("/proc/mounts"),
            source,
        })?
        .into_iter()
        .any(|(dir, fstype)| dir == cfg.mount_point && fstype == "pmfs");

    if mounted {
        Ok(())
    } else {
        tracing::error!(mount_point = %cfg.mount_point.display(), "pmfs mount point not found");
        Err(NvmError::PmfsUnmounted(cfg.mount_point.clone()))
    }
}

fn mount_table_entries() -> io::Result<Vec<(PathBuf, String)>> {
    let file = File::open("/proc/mounts")?;
    let reader = io::BufReader::new(file);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let mut fields = line.split_whitespace();
        let _device = fields.next();
        let dir = fields.next();
        let fstype = fields.next();
        if let (Some(dir), Some(fstype)) = (dir, fstype) {
            entries.push((PathBuf::from(dir), fstype.to_string()));
        }
    }
    Ok(entries)
}

/// Probes `mount_point` for write access by creating and removing a
/// sentinel file, mirroring `NVManager::_pmfsWritable`.
///
/// Permission denied becomes `NvmError::PmfsReadOnly`; any other failure
/// becomes `NvmError::ProbeFailed`.
pub fn check_writable(cfg: &NvmConfig) -> Result<()> {
    let sentinel = cfg.mount_point.join(".nvmstore_probe");
    match OpenOptions::new().write(true).create(true).open(&sentinel) {
        Ok(_) => {
            let _ = std::fs::remove_file(&sentinel);
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            Err(NvmError::PmfsReadOnly(cfg.mount_point.clone()))
        }
        Err(source) => Err(NvmError::ProbeFailed {
            path: sentinel,
            source,
        }),
    }
}

/// Creates (if needed) and memory-maps the backing file at `cfg.pool_size`
/// bytes, returning the mapping.
///
/// In volatile mode the caller is expected to unlink the file immediately
/// after this returns, so the data disappears once the process exits; in
/// non-volatile mode the file is left in place.
pub fn open_mapping(cfg: &NvmConfig) -> Result<MmapMut> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(&cfg.backing_file)
        .map_err(|source| NvmError::MapFailed {
            path: cfg.backing_file.clone(),
            source,
        })?;

    let needs_resize = file
        .metadata()
        .map_err(|source| NvmError::MapFailed {
            path: cfg.backing_file.clone(),
            source,
        })?
        .len()
        != cfg.pool_size;
    if needs_resize {
        file.set_len(cfg.pool_size)
            .map_err(|source| NvmError::MapFailed {
                path: cfg.backing_file.clone(),
                source,
            })?;
    }

    // SAFETY: the file is exclusively owned by this process for the
    // lifetime of the mapping; nothing else maps or truncates it.
    let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|source| NvmError::MapFailed {
        path: cfg.backing_file.clone(),
        source,
    })?;

    tracing::debug!(
        path = %cfg.backing_file.display(),
        size = cfg.pool_size,
        "mapped NVM backing file"
    );

    Ok(mmap)
}

/// Removes the backing file from the directory entry, used in volatile
/// mode right after the mapping is established.
pub fn unlink(path: &Path) -> io::Result<()> {
    std::fs::remove_file(path)
}
