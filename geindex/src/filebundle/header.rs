//! Persistent header of a file bundle: segment break, original location
//! and the ordered list of segments with their sizes.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::BufMut;

use super::{append_crc, check_crc};
use crate::codec::{get_string, get_u16, get_u32, get_u64};
use crate::errors::{GeIndexError, GeIndexResult};

const FILE_BUNDLE_MAGIC: &[u8; 12] = b"GEFileBundle";
const FILE_BUNDLE_VERSION: u16 = 1;

/// Name and allocated size of one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRecord {
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBundleHeader {
    pub segment_break: u64,
    /// Absolute directory the bundle was created in.
    pub orig_dir: PathBuf,
    pub segments: Vec<SegmentRecord>,
}

impl FileBundleHeader {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_slice(FILE_BUNDLE_MAGIC);
        buf.put_u16_le(FILE_BUNDLE_VERSION);
        buf.put_u64_le(self.segment_break);
        crate::codec::put_string(&mut buf, &self.orig_dir.to_string_lossy());
        buf.put_u32_le(self.segments.len() as u32);
        for segment in &self.segments {
            crate::codec::put_string(&mut buf, &segment.name);
            buf.put_u64_le(segment.size);
        }
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> GeIndexResult<Self> {
        if bytes.len() < FILE_BUNDLE_MAGIC.len() || &bytes[..FILE_BUNDLE_MAGIC.len()] != FILE_BUNDLE_MAGIC {
            return Err(GeIndexError::corruption("bad file bundle header magic"));
        }
        let mut buf = &bytes[FILE_BUNDLE_MAGIC.len()..];
        let version = get_u16(&mut buf, "bundle header version")?;
        if version > FILE_BUNDLE_VERSION {
            return Err(GeIndexError::UnsupportedVersion {
                found: version,
                supported: FILE_BUNDLE_VERSION,
            });
        }
        let segment_break = get_u64(&mut buf, "segment break")?;
        if segment_break == 0 {
            return Err(GeIndexError::corruption("bundle header has zero segment break"));
        }
        let orig_dir = PathBuf::from(get_string(&mut buf, "original directory")?);
        let count = get_u32(&mut buf, "segment count")?;
        let mut segments = Vec::with_capacity(count.min(super::SEGMENT_FILE_COUNT_MAX) as usize);
        for _ in 0..count {
            let name = get_string(&mut buf, "segment name")?;
            let size = get_u64(&mut buf, "segment size")?;
            if size > segment_break {
                return Err(GeIndexError::corruption(format!(
                    "segment {} size {} exceeds segment break {}",
                    name, size, segment_break
                )));
            }
            segments.push(SegmentRecord { name, size });
        }
        if !buf.is_empty() {
            return Err(GeIndexError::corruption(format!(
                "{} trailing bytes after bundle header",
                buf.len()
            )));
        }
        Ok(Self {
            segment_break,
            orig_dir,
            segments,
        })
    }

    pub fn write(&self, path: &Path, file_mode: u32) -> GeIndexResult<()> {
        write_simple_file_with_crc(path, &self.to_bytes(), file_mode)
    }

    pub fn read(path: &Path) -> GeIndexResult<Self> {
        Self::from_bytes(&read_simple_file_with_crc(path)?)
    }
}

/// Writes `data || CRC32(data)` to `path` atomically: the content lands in
/// a uniquely named sibling file that is then renamed over `path`.
pub fn write_simple_file_with_crc(path: &Path, data: &[u8], file_mode: u32) -> GeIndexResult<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| GeIndexError::usage(format!("{:?} has no file name", path)))?
        .to_string_lossy();
    let tmp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let mut contents = Vec::with_capacity(data.len() + super::CRC_SIZE);
    contents.extend_from_slice(data);
    append_crc(&mut contents);

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(file_mode);
    }
    #[cfg(not(unix))]
    let _ = file_mode;

    let result = (|| -> GeIndexResult<()> {
        let mut file = options.open(&tmp_path)?;
        file.write_all(&contents)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

/// Reads a file written by [`write_simple_file_with_crc`], verifying and
/// stripping the trailing CRC.
pub fn read_simple_file_with_crc(path: &Path) -> GeIndexResult<Vec<u8>> {
    let mut contents = fs::read(path)?;
    let payload_len = check_crc(&contents)
        .map_err(|e| GeIndexError::corruption(format!("{:?}: {}", path, e)))?
        .len();
    contents.truncate(payload_len);
    Ok(contents)
}
