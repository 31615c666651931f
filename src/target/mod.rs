//! Target file preparation
//!
//! The benchmark always works on exactly one regular file. [`TargetFile`]
//! creates (or truncates) it, extends it to the requested logical size
//! without allocating any blocks, and keeps the descriptor open until the
//! backend that owns it is closed.
//!
//! After `set_len` the whole extent is one hole, so whatever storage the file
//! consumes once the run is over came from the planned writes. That number is
//! available through [`TargetFile::allocated_bytes`].
//!
//! # Direct IO alignment
//!
//! `O_DIRECT` writes must start at, and be a multiple of, the logical block
//! size of the device underneath the file. [`TargetFile::create`] detects it
//! once:
//!
//! 1. `BLKSSZGET` ioctl, which answers for block device targets
//! 2. `st_blksize` from `fstat` for regular files, if it is a power of two
//!    of at least 512 bytes
//! 3. 512 bytes when neither source answers

use crate::error::BenchError;
use crate::Result;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use tracing::debug;

/// `st_blocks` is always counted in 512-byte units
const STAT_BLOCK_SIZE: u64 = 512;

/// Smallest logical block size any device reports
pub const MIN_LOGICAL_BLOCK_SIZE: u64 = 512;

/// An open, sparse benchmark target
#[derive(Debug)]
pub struct TargetFile {
    path: PathBuf,
    file: File,
    size: u64,
    logical_block_size: u64,
}

impl TargetFile {
    /// Create or truncate `path` and extend it to `size` bytes
    ///
    /// With `direct` the descriptor is opened with `O_DIRECT`. Filesystems
    /// that do not support it (tmpfs on older kernels, for example) refuse
    /// the open, which is reported as a resource error.
    ///
    /// # Arguments
    ///
    /// * `path` - File to create, or truncate if it already exists
    /// * `size` - Logical size; the whole extent starts out as one hole
    /// * `direct` - Open with `O_DIRECT`
    ///
    /// # Errors
    ///
    /// - `BenchError::Config` if `path` names a directory
    /// - `BenchError::Resource` if the file cannot be opened or sized
    pub fn create(path: impl AsRef<Path>, size: u64, direct: bool) -> Result<Self> {
        let path = path.as_ref();
        if path.is_dir() {
            return Err(BenchError::config(format!(
                "filename {} is a directory",
                path.display()
            )));
        }

        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true).truncate(true);
        if direct {
            options.custom_flags(libc::O_DIRECT);
        }

        let file = options.open(path).map_err(|e| {
            BenchError::resource(format!("open {}", path.display()), e)
        })?;

        file.set_len(size).map_err(|e| {
            BenchError::resource(format!("extend {} to {} bytes", path.display(), size), e)
        })?;

        let logical_block_size = detect_logical_block_size(&file);
        debug!(
            path = %path.display(),
            size,
            direct,
            logical_block_size,
            "target file ready"
        );

        Ok(Self {
            path: path.to_path_buf(),
            file,
            size,
            logical_block_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Logical size of the file
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Alignment unit `O_DIRECT` writes to this file must respect
    pub fn logical_block_size(&self) -> u64 {
        self.logical_block_size
    }

    pub fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    /// Bytes of storage actually backing the file
    pub fn allocated_bytes(&self) -> Result<u64> {
        let metadata = self.file.metadata().map_err(|e| {
            BenchError::resource(format!("stat {}", self.path.display()), e)
        })?;
        Ok(metadata.blocks() * STAT_BLOCK_SIZE)
    }

    /// Flush data and metadata to stable storage
    pub fn sync(&self) -> Result<()> {
        self.file
            .sync_all()
            .map_err(|e| BenchError::resource(format!("fsync {}", self.path.display()), e))
    }
}

/// Detect the logical block size of the device backing `file`
///
/// Never fails; falls back to [`MIN_LOGICAL_BLOCK_SIZE`].
fn detect_logical_block_size(file: &File) -> u64 {
    let fd = file.as_raw_fd();

    let mut block_size: libc::c_int = 0;
    // SAFETY: BLKSSZGET writes one c_int through the pointer, which outlives the call.
    let rc = unsafe { libc::ioctl(fd, libc::BLKSSZGET, &mut block_size) };
    if rc == 0 && block_size > 0 {
        return block_size as u64;
    }

    // Regular files answer ENOTTY; the filesystem block size bounds the device's
    match file.metadata() {
        Ok(metadata) => {
            let blksize = metadata.blksize();
            if blksize >= MIN_LOGICAL_BLOCK_SIZE && blksize.is_power_of_two() {
                blksize
            } else {
                MIN_LOGICAL_BLOCK_SIZE
            }
        }
        Err(_) => MIN_LOGICAL_BLOCK_SIZE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::FileExt;
    use tempfile::TempDir;

    #[test]
    fn test_create_is_sparse() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("target.dat");

        let target = TargetFile::create(&path, 64 * 1024 * 1024, false).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 64 * 1024 * 1024);
        assert_eq!(target.size(), 64 * 1024 * 1024);

        // A freshly extended file should not be backed by its full size
        assert!(target.allocated_bytes().unwrap() < 64 * 1024 * 1024);
    }

    #[test]
    fn test_logical_block_size_is_a_sector_multiple() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("target.dat");
        let target = TargetFile::create(&path, 1024 * 1024, false).unwrap();

        let lbs = target.logical_block_size();
        assert!(lbs >= MIN_LOGICAL_BLOCK_SIZE);
        assert!(lbs.is_power_of_two());
    }

    #[test]
    fn test_create_truncates_existing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("target.dat");
        std::fs::write(&path, vec![0xAB; 8192]).unwrap();

        let target = TargetFile::create(&path, 4096, false).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);

        let mut buf = [0xFFu8; 16];
        target.file.read_exact_at(&mut buf, 0).unwrap();
        assert_eq!(buf, [0u8; 16]);
    }

    #[test]
    fn test_directory_is_config_error() {
        let dir = TempDir::new().unwrap();
        match TargetFile::create(dir.path(), 4096, false) {
            Err(BenchError::Config(msg)) => assert!(msg.contains("directory")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_parent_is_resource_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("target.dat");
        assert!(matches!(
            TargetFile::create(&path, 4096, false),
            Err(BenchError::Resource { .. })
        ));
    }

    #[test]
    fn test_allocated_bytes_grow_with_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("target.dat");
        let target = TargetFile::create(&path, 1024 * 1024, false).unwrap();
        let before = target.allocated_bytes().unwrap();

        target.file.write_all_at(&[1u8; 65536], 0).unwrap();
        target.sync().unwrap();
        assert!(target.allocated_bytes().unwrap() > before);
    }
}
