use std::fs::{self, File, Metadata, Permissions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn};

use super::exclusion::ExclusionRules;
use super::models::{SyncError, SyncOutcome, SyncRequest};
use super::progress::{ProgressSink, SyncProgress};

/// Buffer size for file I/O operations (128KB for optimal throughput)
const BUFFER_SIZE: usize = 128 * 1024;

/// Recursive copy of a source tree into a destination root.
///
/// A run is two walks over the source with the same `ExclusionRules`: the
/// first counts files for the progress denominator and tolerates errors, the
/// second copies and stops at the first error.
pub struct TreeSynchronizer {
    /// Whether to fsync each file after writing (safer but slower)
    pub sync_files: bool,
}

impl Default for TreeSynchronizer {
    fn default() -> Self {
        Self { sync_files: true }
    }
}

impl TreeSynchronizer {
    /// Run one synchronization to completion. Blocking.
    pub fn synchronize(
        &self,
        request: &SyncRequest,
        sink: &mut dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> SyncOutcome {
        let span = info_span!(
            "synchronize",
            source = %request.source_root.display(),
            destination = %request.destination_root.display()
        );

        span.in_scope(|| {
            let outcome = SyncOutcome::from(self.run(request, sink, cancel));
            if let SyncOutcome::Failure(e) = &outcome {
                error!(phase = %e.phase(), error = %e, "Synchronization failed");
            }
            outcome
        })
    }

    fn run(
        &self,
        request: &SyncRequest,
        sink: &mut dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let start_time = Instant::now();

        let source_root =
            resolve_source(&request.source_root).map_err(|source| SyncError::Enumeration {
                path: request.source_root.clone(),
                source,
            })?;
        let destination_root = resolve_destination(&request.destination_root).map_err(|source| {
            SyncError::DirectoryCreation {
                path: request.destination_root.clone(),
                source,
            }
        })?;

        check_source(&source_root, &destination_root)?;

        let rules = ExclusionRules::new(
            source_root.clone(),
            destination_root.clone(),
            request.excluded_substrings.clone(),
        );

        // Phase 1: best-effort count
        info!("Counting source files");
        let total_files = count_files(&source_root, &rules);
        info!(total_files, "Count complete");

        // Phase 2: destination root
        fs::create_dir_all(&destination_root).map_err(|source| SyncError::DirectoryCreation {
            path: destination_root.clone(),
            source,
        })?;

        // Phase 3: strict copy
        let mut pass = CopyPass {
            rules: &rules,
            source_root: &source_root,
            destination_root: &destination_root,
            sync_files: self.sync_files,
            total_files,
            files_copied: 0,
            bytes_copied: 0,
            cancel,
        };
        pass.copy_dir(&source_root, sink)?;

        let duration_secs = start_time.elapsed().as_secs();
        info!(
            files_copied = pass.files_copied,
            total_bytes = pass.bytes_copied,
            duration_secs,
            "Synchronization complete"
        );

        Ok(())
    }
}

/// Drop `.` components and fold `..` into their parent without touching the
/// filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// The source must exist, so it is resolved all the way through symlinks.
fn resolve_source(path: &Path) -> io::Result<PathBuf> {
    normalize_lexically(&std::path::absolute(path)?).canonicalize()
}

/// The destination may not exist yet: canonicalize its deepest existing
/// ancestor and re-append the missing tail. Walked source paths are always
/// canonical, so the destination has to be spelled the same way to be
/// excluded.
fn resolve_destination(path: &Path) -> io::Result<PathBuf> {
    let normalized = normalize_lexically(&std::path::absolute(path)?);

    let mut missing = Vec::new();
    let mut existing = normalized.as_path();
    loop {
        match existing.canonicalize() {
            Ok(mut resolved) => {
                resolved.extend(missing.iter().rev());
                return Ok(resolved);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                match (existing.parent(), existing.file_name()) {
                    (Some(parent), Some(name)) => {
                        missing.push(name);
                        existing = parent;
                    }
                    _ => return Ok(normalized),
                }
            }
            // Left for create_dir_all to report.
            Err(_) => return Ok(normalized),
        }
    }
}

/// Reject sources that cannot be walked, or that live inside the destination
/// (every entry would then be excluded).
fn check_source(source_root: &Path, destination_root: &Path) -> Result<(), SyncError> {
    let metadata = fs::metadata(source_root).map_err(|source| SyncError::Enumeration {
        path: source_root.to_path_buf(),
        source,
    })?;

    if !metadata.is_dir() {
        return Err(SyncError::Enumeration {
            path: source_root.to_path_buf(),
            source: io::Error::new(ErrorKind::NotADirectory, "source is not a directory"),
        });
    }

    if source_root.starts_with(destination_root) {
        return Err(SyncError::Enumeration {
            path: source_root.to_path_buf(),
            source: io::Error::new(
                ErrorKind::InvalidInput,
                "source lies inside the destination",
            ),
        });
    }

    Ok(())
}

/// What a source entry is, once symlinks to regular files are resolved.
enum Entry {
    Directory(Metadata),
    File(Metadata),
    /// Special files, dangling links and links to directories.
    Other,
}

fn classify(path: &Path) -> io::Result<Entry> {
    // Use symlink_metadata to avoid following symlinks
    let metadata = path.symlink_metadata()?;

    if metadata.is_dir() {
        return Ok(Entry::Directory(metadata));
    }
    if metadata.is_file() {
        return Ok(Entry::File(metadata));
    }
    if metadata.file_type().is_symlink() {
        return match fs::metadata(path) {
            Ok(target) if target.is_file() => Ok(Entry::File(target)),
            Ok(_) => Ok(Entry::Other),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Entry::Other),
            Err(e) => Err(e),
        };
    }

    Ok(Entry::Other)
}

/// Directory entries sorted by file name, for a deterministic visiting order.
fn sorted_entries(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut paths = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()?;
    paths.sort();
    Ok(paths)
}

fn count_files(dir: &Path, rules: &ExclusionRules) -> u64 {
    let entries = match sorted_entries(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "Skipping unreadable directory");
            return 0;
        }
    };

    let mut total = 0;
    for path in entries {
        if rules.is_excluded(&path) {
            continue;
        }
        match classify(&path) {
            Ok(Entry::Directory(_)) => total += count_files(&path, rules),
            Ok(Entry::File(_)) => total += 1,
            Ok(Entry::Other) => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable entry");
            }
        }
    }
    total
}

struct CopyPass<'a> {
    rules: &'a ExclusionRules,
    source_root: &'a Path,
    destination_root: &'a Path,
    sync_files: bool,
    total_files: u64,
    files_copied: u64,
    bytes_copied: u64,
    cancel: &'a CancellationToken,
}

impl CopyPass<'_> {
    fn mirror(&self, path: &Path) -> PathBuf {
        match path.strip_prefix(self.source_root) {
            Ok(relative) => self.destination_root.join(relative),
            Err(_) => self.destination_root.to_path_buf(),
        }
    }

    fn copy_dir(&mut self, dir: &Path, sink: &mut dyn ProgressSink) -> Result<(), SyncError> {
        let entries = sorted_entries(dir).map_err(|source| SyncError::Enumeration {
            path: dir.to_path_buf(),
            source,
        })?;

        for path in entries {
            if self.rules.is_excluded(&path) {
                debug!(path = %path.display(), "Excluded");
                continue;
            }

            let entry = classify(&path).map_err(|source| SyncError::Enumeration {
                path: path.clone(),
                source,
            })?;

            match entry {
                Entry::Directory(metadata) => {
                    let dest_dir = self.mirror(&path);
                    fs::create_dir_all(&dest_dir).map_err(|source| {
                        SyncError::DirectoryCreation {
                            path: dest_dir.clone(),
                            source,
                        }
                    })?;
                    // A previous run may have left it read-only.
                    ensure_owner_writable(&dest_dir).map_err(|source| {
                        SyncError::DirectoryCreation {
                            path: dest_dir.clone(),
                            source,
                        }
                    })?;

                    self.copy_dir(&path, sink)?;

                    // Applied after the contents so read-only directories can be filled.
                    fs::set_permissions(&dest_dir, metadata.permissions()).map_err(|source| {
                        SyncError::DirectoryCreation {
                            path: dest_dir.clone(),
                            source,
                        }
                    })?;
                }
                Entry::File(metadata) => {
                    if self.cancel.is_cancelled() {
                        info!(files_copied = self.files_copied, "Synchronization cancelled");
                        return Err(SyncError::Cancelled {
                            copied: self.files_copied,
                        });
                    }

                    let dest = self.mirror(&path);
                    debug!(file = %path.display(), size = metadata.len(), "Copying file");

                    let bytes = copy_file(&path, &dest, metadata.permissions(), self.sync_files)
                        .map_err(|source| SyncError::FileCopy {
                            path: path.clone(),
                            source,
                        })?;

                    self.files_copied += 1;
                    self.bytes_copied += bytes;
                    sink.on_progress(SyncProgress::new(self.files_copied, self.total_files));
                }
                Entry::Other => {
                    debug!(path = %path.display(), "Skipping special file");
                }
            }
        }

        Ok(())
    }
}

/// Copy a single file's bytes and permission bits.
fn copy_file(
    source: &Path,
    dest: &Path,
    permissions: Permissions,
    sync_file: bool,
) -> io::Result<u64> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    ensure_owner_writable(dest)?;

    let mut reader = BufReader::with_capacity(BUFFER_SIZE, File::open(source)?);
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, File::create(dest)?);

    // Copy data in chunks
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut bytes_written: u64 = 0;

    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buffer[..bytes_read])?;
        bytes_written += bytes_read as u64;
    }

    let file = writer.into_inner().map_err(|e| e.into_error())?;
    if sync_file {
        file.sync_all()?;
    }
    drop(file);

    fs::set_permissions(dest, permissions)?;

    Ok(bytes_written)
}

/// Add the owner write bit to an existing file or directory so it can be
/// overwritten. Missing paths and symlinks are left alone.
fn ensure_owner_writable(path: &Path) -> io::Result<()> {
    let metadata = match path.symlink_metadata() {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if metadata.file_type().is_symlink() {
        return Ok(());
    }

    let mode = metadata.permissions().mode();
    if mode & 0o200 == 0 {
        fs::set_permissions(path, Permissions::from_mode((mode & 0o7777) | 0o200))?;
    }
    Ok(())
}
