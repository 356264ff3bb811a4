//! A single segment file of a bundle.
//!
//! Reads and writes are positional, so concurrent writers can target
//! disjoint offsets of the same segment without sharing a file cursor.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::errors::{GeIndexError, GeIndexResult};

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

#[cfg(unix)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.write_at(buf, offset)
}

#[cfg(windows)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_write(buf, offset)
}

/// One segment file. `size` is the allocated extent, which may run ahead
/// of the bytes physically written while delayed writes are in flight.
#[derive(Debug)]
pub struct Segment {
    id: u32,
    name: String,
    path: PathBuf,
    file: File,
    read_only: bool,
    size: AtomicU64,
}

impl Segment {
    pub(crate) fn create(id: u32, name: String, path: PathBuf, file_mode: u32) -> GeIndexResult<Self> {
        let mut options = OpenOptions::new();
        options.read(true).write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(file_mode);
        }
        #[cfg(not(unix))]
        let _ = file_mode;

        let file = options.open(&path)?;
        log::debug!("Created segment {} at {:?}", id, path);
        Ok(Self {
            id,
            name,
            path,
            file,
            read_only: false,
            size: AtomicU64::new(0),
        })
    }

    /// Opens an existing segment read-only, checking that the file holds at
    /// least `size` bytes.
    pub(crate) fn open_read_only(id: u32, name: String, path: PathBuf, size: u64) -> GeIndexResult<Self> {
        let file = OpenOptions::new().read(true).open(&path)?;
        let on_disk = file.metadata()?.len();
        if on_disk < size {
            return Err(GeIndexError::corruption(format!(
                "segment {:?} holds {} bytes but the header records {}",
                path, on_disk, size
            )));
        }
        Ok(Self {
            id,
            name,
            path,
            file,
            read_only: true,
            size: AtomicU64::new(size),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// File name relative to the bundle directory.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    pub(crate) fn set_size(&self, size: u64) {
        self.size.store(size, Ordering::Release);
    }

    /// Reads exactly `buf.len()` bytes at `offset`.
    pub fn pread(&self, buf: &mut [u8], offset: u64) -> GeIndexResult<()> {
        let read = self.pread_partial(buf, offset)?;
        if read < buf.len() {
            return Err(GeIndexError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "short read of {} bytes at {} in {:?} (wanted {})",
                    read,
                    offset,
                    self.path,
                    buf.len()
                ),
            )));
        }
        Ok(())
    }

    /// Reads up to `buf.len()` bytes at `offset`, stopping at end of file.
    pub fn pread_partial(&self, buf: &mut [u8], offset: u64) -> GeIndexResult<usize> {
        let mut total = 0;
        while total < buf.len() {
            match read_at(&self.file, &mut buf[total..], offset + total as u64) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(total)
    }

    pub(crate) fn pwrite(&self, buf: &[u8], offset: u64) -> GeIndexResult<()> {
        if self.read_only {
            return Err(GeIndexError::write(format!(
                "segment {:?} is read-only",
                self.path
            )));
        }
        let mut total = 0;
        while total < buf.len() {
            match write_at(&self.file, &buf[total..], offset + total as u64) {
                Ok(0) => {
                    return Err(GeIndexError::Io(io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!("failed to write segment {:?}", self.path),
                    )))
                }
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub(crate) fn sync(&self) -> GeIndexResult<()> {
        if !self.read_only {
            self.file.sync_data()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_segment_write_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bundle.0000");
        let segment = Segment::create(0, "bundle.0000".into(), path.clone(), 0o644).unwrap();

        segment.pwrite(b"hello segment", 100).unwrap();
        let mut buf = vec![0u8; 13];
        segment.pread(&mut buf, 100).unwrap();
        assert_eq!(&buf, b"hello segment");

        // partial read stops at end of file
        let mut buf = vec![0u8; 50];
        assert_eq!(segment.pread_partial(&mut buf, 105).unwrap(), 8);
        assert!(segment.pread(&mut buf, 105).is_err());
    }

    #[test]
    fn test_create_refuses_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bundle.0000");
        Segment::create(0, "bundle.0000".into(), path.clone(), 0o644).unwrap();
        assert!(Segment::create(0, "bundle.0000".into(), path, 0o644).is_err());
    }

    #[test]
    fn test_read_only_segment_rejects_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bundle.0000");
        {
            let segment = Segment::create(0, "bundle.0000".into(), path.clone(), 0o644).unwrap();
            segment.pwrite(&[7u8; 64], 0).unwrap();
        }
        let segment = Segment::open_read_only(0, "bundle.0000".into(), path, 64).unwrap();
        assert!(segment.is_read_only());
        assert_eq!(segment.size(), 64);
        assert!(matches!(
            segment.pwrite(&[1, 2, 3], 0),
            Err(GeIndexError::Write(_))
        ));
    }

    #[test]
    fn test_open_short_segment_is_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bundle.0000");
        std::fs::write(&path, [0u8; 10]).unwrap();
        let err = Segment::open_read_only(0, "bundle.0000".into(), path, 11).unwrap_err();
        assert!(err.is_corruption());
    }
}
