use std::ffi::OsString;
use std::fs;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nix::sys::statvfs::statvfs;

use crate::core::hardware::{MountEntry, MountTable};

/// Mount table backed by `/proc/self/mounts` and `statvfs(3)`.
pub struct ProcMountTable {
    path: PathBuf,
}

impl ProcMountTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn with_defaults() -> Self {
        Self::new("/proc/self/mounts")
    }
}

impl MountTable for ProcMountTable {
    fn mounts(&self) -> Result<Vec<MountEntry>> {
        let content = fs::read(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        Ok(parse_mounts(&content))
    }

    fn capacity(&self, mount_point: &Path) -> Result<u64> {
        let stat = statvfs(mount_point)
            .with_context(|| format!("statvfs failed for {}", mount_point.display()))?;
        Ok(stat.blocks() as u64 * stat.fragment_size() as u64)
    }
}

/// Parse `fstab(5)`-style lines: device, mount point, fstype, ...
///
/// Mount points are kept as raw bytes, so paths that are not valid UTF-8
/// still name the real directory.
pub fn parse_mounts(content: &[u8]) -> Vec<MountEntry> {
    content
        .split(|&b| b == b'\n')
        .filter_map(|line| {
            let mut fields = line
                .split(|b| b.is_ascii_whitespace())
                .filter(|field| !field.is_empty());
            let device = fields.next()?;
            let mount_point = fields.next()?;
            let filesystem = fields.next()?;

            Some(MountEntry {
                device: String::from_utf8_lossy(&unescape(device)).into_owned(),
                mount_point: PathBuf::from(OsString::from_vec(unescape(mount_point))),
                filesystem: String::from_utf8_lossy(filesystem).into_owned(),
            })
        })
        .collect()
}

/// Decode the octal escapes the kernel uses for whitespace and backslashes
/// (`\040`, `\011`, `\012`, `\134`).
fn unescape(field: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(field.len());
    let mut i = 0;

    while i < field.len() {
        if field[i] == b'\\' && i + 3 < field.len() && is_octal_escape(&field[i + 1..i + 4]) {
            let value =
                (field[i + 1] - b'0') * 64 + (field[i + 2] - b'0') * 8 + (field[i + 3] - b'0');
            out.push(value);
            i += 4;
        } else {
            out.push(field[i]);
            i += 1;
        }
    }

    out
}

fn is_octal_escape(digits: &[u8]) -> bool {
    digits.len() == 3 && digits[0] <= b'3' && digits.iter().all(|d| (b'0'..=b'7').contains(d))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
/dev/nvme0n1p2 / ext4 rw,relatime 0 0
/dev/sdb1 /media/user/KINGSTON vfat rw,nosuid,nodev 0 0
/dev/sdc1 /media/user/My\\040Drive exfat rw,nosuid,nodev 0 0
";

    #[test]
    fn test_parse_mounts() {
        let entries = parse_mounts(SAMPLE.as_bytes());
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[2].device, "/dev/sdb1");
        assert_eq!(entries[2].mount_point, PathBuf::from("/media/user/KINGSTON"));
        assert_eq!(entries[2].filesystem, "vfat");
    }

    #[test]
    fn test_parse_decodes_escaped_spaces() {
        let entries = parse_mounts(SAMPLE.as_bytes());
        assert_eq!(entries[3].mount_point, PathBuf::from("/media/user/My Drive"));
    }

    #[test]
    fn test_parse_skips_short_lines() {
        assert!(parse_mounts(b"garbage\n\n/dev/sda1 /boot\n").is_empty());
    }

    #[test]
    fn test_unescape_leaves_plain_backslashes() {
        assert_eq!(unescape(b"a\\b"), b"a\\b");
        assert_eq!(unescape(b"tab\\011x"), b"tab\tx");
        assert_eq!(unescape(b"back\\134slash"), b"back\\slash");
    }

    #[test]
    fn test_parse_keeps_non_utf8_mount_points() {
        use std::os::unix::ffi::OsStrExt;

        let entries = parse_mounts(b"/dev/sdb1 /media/caf\xe9\\040disk vfat rw 0 0\n");
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].mount_point.as_os_str().as_bytes(),
            b"/media/caf\xe9 disk"
        );
    }

    #[test]
    fn test_reads_mount_file() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), SAMPLE).unwrap();

        let table = ProcMountTable::new(temp.path());
        assert_eq!(table.mounts().unwrap().len(), 4);
    }

    #[test]
    fn test_missing_mount_file_is_error() {
        let table = ProcMountTable::new("/nonexistent/mounts");
        assert!(table.mounts().is_err());
    }

    #[test]
    fn test_capacity_of_root() {
        let table = ProcMountTable::with_defaults();
        assert!(table.capacity(Path::new("/")).unwrap() > 0);
    }
}
