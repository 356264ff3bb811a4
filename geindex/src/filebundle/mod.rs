//! Segmented, CRC-protected byte storage.
//!
//! A bundle is a directory holding a header file plus numbered segment
//! files of at most `segment_break` bytes each. A bundle position maps to
//! `(position / segment_break, position % segment_break)`; no record ever
//! spans two segments.
//!
//! ```text
//! <bundle_dir>/bundle.hdr
//! <bundle_dir>/bundle.0000
//! <bundle_dir>/bundle.0001
//! ...
//! ```

mod cached_read_accessor;
mod header;
mod pack_import;
mod reader;
mod segment;
mod writer;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

pub use cached_read_accessor::{BlockAddress, CachedReadAccessor};
pub use header::{read_simple_file_with_crc, write_simple_file_with_crc, FileBundleHeader, SegmentRecord};
pub use pack_import::FileBundlePackImport;
pub use reader::FileBundleReader;
pub use segment::Segment;
pub use writer::{FileBundleUpdateWriter, FileBundleWriter};

use crate::errors::{GeIndexError, GeIndexResult};

/// Size of the CRC32 trailer on protected records.
pub const CRC_SIZE: usize = 4;

/// Width of the zero-padded sequence number in segment file names.
pub const SEGMENT_FILE_SUFFIX_LENGTH: usize = 4;

/// Hard cap on the number of segments in one bundle.
pub const SEGMENT_FILE_COUNT_MAX: u32 = 10_000;

const SEGMENT_FILE_PREFIX: &str = "bundle.";

/// Deterministic file name of segment `id`.
pub fn segment_file_name(id: u32) -> String {
    format!(
        "{}{:0width$}",
        SEGMENT_FILE_PREFIX,
        id,
        width = SEGMENT_FILE_SUFFIX_LENGTH
    )
}

pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Appends the little-endian CRC32 of the current contents.
pub fn append_crc(buf: &mut Vec<u8>) {
    let crc = crc32(buf);
    buf.extend_from_slice(&crc.to_le_bytes());
}

/// Overwrites the trailing [`CRC_SIZE`] bytes with the CRC32 of the rest.
pub fn fill_crc(buf: &mut [u8]) -> GeIndexResult<()> {
    if buf.len() < CRC_SIZE {
        return Err(GeIndexError::usage(format!(
            "buffer of {} bytes has no room for a CRC",
            buf.len()
        )));
    }
    let split = buf.len() - CRC_SIZE;
    let crc = crc32(&buf[..split]);
    buf[split..].copy_from_slice(&crc.to_le_bytes());
    Ok(())
}

/// Verifies the trailing CRC32 and returns the payload in front of it.
pub fn check_crc(buf: &[u8]) -> GeIndexResult<&[u8]> {
    if buf.len() < CRC_SIZE {
        return Err(GeIndexError::corruption(format!(
            "record of {} bytes is too short to hold a CRC",
            buf.len()
        )));
    }
    let (payload, trailer) = buf.split_at(buf.len() - CRC_SIZE);
    let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let computed = crc32(payload);
    if stored != computed {
        return Err(GeIndexError::corruption(format!(
            "CRC mismatch (stored {:08x}, computed {:08x})",
            stored, computed
        )));
    }
    Ok(payload)
}

/// One file of a deployment manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Path the file had when the bundle was built.
    pub orig_path: PathBuf,
    /// Path the file has now.
    pub current_path: PathBuf,
    pub size: u64,
}

/// Shared state of an open bundle: location, segment break and the segment
/// handles it exclusively owns.
#[derive(Debug)]
pub(crate) struct FileBundle {
    dir: PathBuf,
    orig_dir: PathBuf,
    header_name: Option<String>,
    segment_break: u64,
    segments: RwLock<Vec<Arc<Segment>>>,
}

impl FileBundle {
    pub(crate) fn new(
        dir: PathBuf,
        orig_dir: PathBuf,
        header_name: Option<String>,
        segment_break: u64,
        segments: Vec<Arc<Segment>>,
    ) -> Self {
        Self {
            dir,
            orig_dir,
            header_name,
            segment_break,
            segments: RwLock::new(segments),
        }
    }

    /// Opens every segment listed in the header read-only.
    pub(crate) fn open_segments(dir: &Path, header: &FileBundleHeader) -> GeIndexResult<Vec<Arc<Segment>>> {
        header
            .segments
            .iter()
            .enumerate()
            .map(|(id, record)| {
                Segment::open_read_only(id as u32, record.name.clone(), dir.join(&record.name), record.size)
                    .map(Arc::new)
            })
            .collect()
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn orig_dir(&self) -> &Path {
        &self.orig_dir
    }

    pub(crate) fn segment_break(&self) -> u64 {
        self.segment_break
    }

    pub(crate) fn segment_count(&self) -> u32 {
        self.segments.read().len() as u32
    }

    pub(crate) fn segment(&self, id: u32) -> Option<Arc<Segment>> {
        self.segments.read().get(id as usize).cloned()
    }

    pub(crate) fn last_segment(&self) -> Option<Arc<Segment>> {
        self.segments.read().last().cloned()
    }

    pub(crate) fn push_segment(&self, segment: Arc<Segment>) {
        self.segments.write().push(segment);
    }

    pub(crate) fn release_segments(&self) -> usize {
        let mut segments = self.segments.write();
        let count = segments.len();
        segments.clear();
        count
    }

    pub(crate) fn sync_segments(&self) -> GeIndexResult<()> {
        for segment in self.segments.read().iter() {
            segment.sync()?;
        }
        Ok(())
    }

    /// Sum of allocated segment sizes.
    pub(crate) fn data_size(&self) -> u64 {
        self.segments.read().iter().map(|s| s.size()).sum()
    }

    pub(crate) fn position_of(&self, segment_id: u32, offset: u64) -> u64 {
        u64::from(segment_id) * self.segment_break + offset
    }

    /// Resolves `[position, position + len)` to a segment and offset,
    /// rejecting spans that leave the segment's allocated extent.
    pub(crate) fn locate(&self, position: u64, len: usize) -> GeIndexResult<(Arc<Segment>, u64)> {
        let segment_id = position / self.segment_break;
        let offset = position % self.segment_break;
        let end = offset + len as u64;
        if end > self.segment_break {
            return Err(GeIndexError::corruption(format!(
                "record at {} of {} bytes crosses a segment boundary",
                position, len
            )));
        }
        let segment = u32::try_from(segment_id)
            .ok()
            .and_then(|id| self.segment(id))
            .ok_or_else(|| {
                GeIndexError::corruption(format!(
                    "position {} lies beyond the last segment of {:?}",
                    position, self.dir
                ))
            })?;
        if end > segment.size() {
            return Err(GeIndexError::corruption(format!(
                "record at {} of {} bytes runs past the end of segment {}",
                position,
                len,
                segment.id()
            )));
        }
        Ok((segment, offset))
    }

    pub(crate) fn read_at(&self, position: u64, buf: &mut [u8]) -> GeIndexResult<()> {
        let (segment, offset) = self.locate(position, buf.len())?;
        segment.pread(buf, offset)
    }

    /// Reads `len` bytes (CRC included) and returns the verified payload.
    pub(crate) fn read_at_crc(&self, position: u64, len: usize) -> GeIndexResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_at(position, &mut buf)?;
        let payload_len = check_crc(&buf)
            .map_err(|e| GeIndexError::corruption(format!("record at {}: {}", position, e)))?
            .len();
        buf.truncate(payload_len);
        Ok(buf)
    }

    pub(crate) fn read_at_cached(
        &self,
        position: u64,
        buf: &mut [u8],
        accessor: &mut CachedReadAccessor,
    ) -> GeIndexResult<()> {
        let (segment, offset) = self.locate(position, buf.len())?;
        accessor.pread(&segment, buf, offset)
    }

    pub(crate) fn read_at_crc_cached(
        &self,
        position: u64,
        len: usize,
        accessor: &mut CachedReadAccessor,
    ) -> GeIndexResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_at_cached(position, &mut buf, accessor)?;
        let payload_len = check_crc(&buf)
            .map_err(|e| GeIndexError::corruption(format!("record at {}: {}", position, e)))?
            .len();
        buf.truncate(payload_len);
        Ok(buf)
    }

    pub(crate) fn header_path(&self) -> Option<PathBuf> {
        self.header_name.as_ref().map(|name| self.dir.join(name))
    }

    pub(crate) fn header(&self) -> FileBundleHeader {
        FileBundleHeader {
            segment_break: self.segment_break,
            orig_dir: self.orig_dir.clone(),
            segments: self
                .segments
                .read()
                .iter()
                .map(|s| SegmentRecord {
                    name: s.name().to_string(),
                    size: s.size(),
                })
                .collect(),
        }
    }

    /// Appends the header file (first) and every segment file.
    pub(crate) fn append_manifest(&self, manifest: &mut Vec<ManifestEntry>) -> GeIndexResult<()> {
        if let (Some(name), Some(current)) = (&self.header_name, self.header_path()) {
            let size = std::fs::metadata(&current)?.len();
            manifest.push(ManifestEntry {
                orig_path: self.orig_dir.join(name),
                current_path: current,
                size,
            });
        }
        for segment in self.segments.read().iter() {
            manifest.push(ManifestEntry {
                orig_path: self.orig_dir.join(segment.name()),
                current_path: segment.path().to_path_buf(),
                size: std::fs::metadata(segment.path())?.len(),
            });
        }
        Ok(())
    }
}

/// Absolute form of `path` without touching the filesystem.
pub(crate) fn absolute_dir(path: &Path) -> GeIndexResult<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
