use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Input to one synchronization run.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub source_root: PathBuf,
    pub destination_root: PathBuf,
    pub excluded_substrings: Vec<String>,
}

impl SyncRequest {
    pub fn new(source_root: impl Into<PathBuf>, destination_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            destination_root: destination_root.into(),
            excluded_substrings: crate::core::exclusion::DEFAULT_EXCLUDED_SUBSTRINGS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn with_excluded_substrings(mut self, substrings: Vec<String>) -> Self {
        self.excluded_substrings = substrings;
        self
    }
}

/// Which part of a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Enumeration,
    DirectoryCreation,
    FileCopy,
    Cancelled,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Enumeration => "enumeration",
            Self::DirectoryCreation => "directory creation",
            Self::FileCopy => "file copy",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("enumeration failed at {}: {source}", path.display())]
    Enumeration { path: PathBuf, source: io::Error },

    #[error("directory creation failed at {}: {source}", path.display())]
    DirectoryCreation { path: PathBuf, source: io::Error },

    #[error("file copy failed at {}: {source}", path.display())]
    FileCopy { path: PathBuf, source: io::Error },

    #[error("synchronization cancelled after {copied} file(s)")]
    Cancelled { copied: u64 },
}

impl SyncError {
    pub fn phase(&self) -> SyncPhase {
        match self {
            Self::Enumeration { .. } => SyncPhase::Enumeration,
            Self::DirectoryCreation { .. } => SyncPhase::DirectoryCreation,
            Self::FileCopy { .. } => SyncPhase::FileCopy,
            Self::Cancelled { .. } => SyncPhase::Cancelled,
        }
    }

    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::Enumeration { path, .. }
            | Self::DirectoryCreation { path, .. }
            | Self::FileCopy { path, .. } => Some(path),
            Self::Cancelled { .. } => None,
        }
    }

    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            Self::Enumeration { source, .. }
            | Self::DirectoryCreation { source, .. }
            | Self::FileCopy { source, .. } => Some(source),
            Self::Cancelled { .. } => None,
        }
    }

    /// True if the underlying I/O error looks like the device went away.
    pub fn is_device_removed(&self) -> bool {
        self.io_error().is_some_and(is_device_removed_error)
    }
}

/// Terminal result of a synchronization run.
#[derive(Debug)]
pub enum SyncOutcome {
    Success,
    Failure(SyncError),
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn into_result(self) -> Result<(), SyncError> {
        match self {
            Self::Success => Ok(()),
            Self::Failure(e) => Err(e),
        }
    }
}

impl From<Result<(), SyncError>> for SyncOutcome {
    fn from(result: Result<(), SyncError>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(e) => Self::Failure(e),
        }
    }
}

/// Check if an I/O error indicates the device has been removed
pub fn is_device_removed_error(error: &io::Error) -> bool {
    match error.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted => true,
        _ => error.raw_os_error().is_some_and(|code| {
            matches!(
                code,
                libc::EIO | libc::ENODEV | libc::ENXIO | libc::ENOMEDIUM | libc::EMEDIUMTYPE
            )
        }),
    }
}
