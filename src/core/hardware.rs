use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;

/// A discrete transition in the set of removable devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Attached { mount_path: PathBuf, size_bytes: u64 },
    Detached { mount_path: PathBuf },
}

impl DeviceEvent {
    pub fn mount_path(&self) -> &Path {
        match self {
            Self::Attached { mount_path, .. } | Self::Detached { mount_path } => mount_path,
        }
    }
}

/// One row of the operating system's mounted-filesystem table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: PathBuf,
    pub filesystem: String,
}

/// Source of mounted filesystems and their capacities.
///
/// Both queries may fail; the monitor treats a failed `mounts()` as a skipped
/// poll cycle and a failed `capacity()` as zero.
pub trait MountTable: Send + Sync {
    /// List all currently mounted filesystems.
    fn mounts(&self) -> Result<Vec<MountEntry>>;

    /// Total capacity in bytes of the volume mounted at `mount_point`.
    fn capacity(&self, mount_point: &Path) -> Result<u64>;
}

/// Decides whether a mounted filesystem lives on removable media.
pub trait RemovablePredicate: Send + Sync {
    fn is_removable(&self, entry: &MountEntry) -> bool;
}

impl<F> RemovablePredicate for F
where
    F: Fn(&MountEntry) -> bool + Send + Sync,
{
    fn is_removable(&self, entry: &MountEntry) -> bool {
        self(entry)
    }
}

/// Device-path naming convention, e.g. `^/dev/sd` for SCSI/USB disks on Linux.
#[derive(Debug, Clone)]
pub struct DevicePattern {
    regex: Regex,
}

impl DevicePattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .with_context(|| format!("Invalid device pattern '{}'", pattern))?;
        Ok(Self { regex })
    }
}

impl RemovablePredicate for DevicePattern {
    fn is_removable(&self, entry: &MountEntry) -> bool {
        self.regex.is_match(&entry.device)
    }
}
