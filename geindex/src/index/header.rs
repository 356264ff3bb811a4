//! Index-wide metadata persisted in `index.hdr`.

use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use bytes::BufMut;

use crate::buckets::{ChildBucketAddr, EntryBucketAddr};
use crate::codec::{get_bool, get_string, get_u16, get_u32, get_u64, put_string};
use crate::errors::{GeIndexError, GeIndexResult};
use crate::filebundle::{read_simple_file_with_crc, write_simple_file_with_crc};

/// File name of the index header inside an index directory.
pub const INDEX_HEADER_NAME: &str = "index.hdr";

const INDEX_MAGIC: &[u8; 13] = b"GEIndexHeader";

/// Newest header format: version 1 added packet-file extras, version 2 the
/// content description.
pub const CURRENT_FORMAT_VERSION: u16 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub format_version: u16,
    pub root_child_addr: ChildBucketAddr,
    pub root_entry_addr: EntryBucketAddr,
    pub slots_are_single: bool,
    pub wasted_space: u64,
    /// Absolute packet-file paths, indexed by file number.
    pub packet_files: Vec<PathBuf>,
    /// One value per packet file; blend indexes rank files by it.
    pub packet_extras: Vec<u32>,
    pub content_desc: String,
}

impl Header {
    pub fn new(slots_are_single: bool, content_desc: impl Into<String>) -> Self {
        Self {
            format_version: CURRENT_FORMAT_VERSION,
            root_child_addr: ChildBucketAddr::null(),
            root_entry_addr: EntryBucketAddr::null(),
            slots_are_single,
            wasted_space: 0,
            packet_files: Vec::new(),
            packet_extras: Vec::new(),
            content_desc: content_desc.into(),
        }
    }

    /// Encodes the header with packet paths made relative to `index_dir`.
    pub fn push(&self, index_dir: &Path) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_slice(INDEX_MAGIC);
        buf.put_u16_le(CURRENT_FORMAT_VERSION);
        self.root_child_addr.push(&mut buf);
        self.root_entry_addr.push(&mut buf);
        buf.put_u8(u8::from(self.slots_are_single));
        buf.put_u64_le(self.wasted_space);

        buf.put_u32_le(self.packet_files.len() as u32);
        for path in &self.packet_files {
            put_string(&mut buf, &relative_path(path, index_dir).to_string_lossy());
        }
        buf.put_u32_le(self.packet_extras.len() as u32);
        for extra in &self.packet_extras {
            buf.put_u32_le(*extra);
        }
        put_string(&mut buf, &self.content_desc);
        buf
    }

    /// Decodes a header, resolving packet paths against `index_dir` and then
    /// re-rooting them under `prefix_override` when one is given.
    pub fn pull(bytes: &[u8], index_dir: &Path, prefix_override: Option<&Path>) -> GeIndexResult<Self> {
        if bytes.len() < INDEX_MAGIC.len() || &bytes[..INDEX_MAGIC.len()] != INDEX_MAGIC {
            return Err(GeIndexError::corruption("bad index header magic"));
        }
        let mut buf = &bytes[INDEX_MAGIC.len()..];
        let format_version = get_u16(&mut buf, "index format version")?;
        if format_version > CURRENT_FORMAT_VERSION {
            return Err(GeIndexError::UnsupportedVersion {
                found: format_version,
                supported: CURRENT_FORMAT_VERSION,
            });
        }
        let root_child_addr = ChildBucketAddr::pull(&mut buf)?;
        let root_entry_addr = EntryBucketAddr::pull(&mut buf)?;
        let slots_are_single = get_bool(&mut buf, "slots are single")?;
        let wasted_space = get_u64(&mut buf, "wasted space")?;

        let count = get_u32(&mut buf, "packet file count")?;
        let mut packet_files = Vec::new();
        for _ in 0..count {
            let stored = PathBuf::from(get_string(&mut buf, "packet file path")?);
            let resolved = resolve_path(index_dir, &stored);
            packet_files.push(match prefix_override {
                Some(prefix) => reroot(prefix, &resolved),
                None => resolved,
            });
        }

        let packet_extras = if format_version >= 1 {
            let count = get_u32(&mut buf, "packet extra count")?;
            let mut extras = Vec::new();
            for _ in 0..count {
                extras.push(get_u32(&mut buf, "packet extra")?);
            }
            extras
        } else {
            vec![0; packet_files.len()]
        };
        if packet_extras.len() != packet_files.len() {
            return Err(GeIndexError::corruption(format!(
                "index header lists {} packet files but {} extras",
                packet_files.len(),
                packet_extras.len()
            )));
        }

        let content_desc = if format_version >= 2 {
            get_string(&mut buf, "content description")?
        } else {
            String::new()
        };

        Ok(Self {
            format_version,
            root_child_addr,
            root_entry_addr,
            slots_are_single,
            wasted_space,
            packet_files,
            packet_extras,
            content_desc,
        })
    }

    pub fn read(index_dir: &Path, prefix_override: Option<&Path>) -> GeIndexResult<Self> {
        let bytes = read_simple_file_with_crc(&index_dir.join(INDEX_HEADER_NAME))?;
        Self::pull(&bytes, index_dir, prefix_override)
    }

    pub fn write(&self, index_dir: &Path, file_mode: u32) -> GeIndexResult<()> {
        write_simple_file_with_crc(&index_dir.join(INDEX_HEADER_NAME), &self.push(index_dir), file_mode)
    }

    /// Content description of the index in `index_dir` without opening
    /// its bundle.
    pub fn content_desc_of(index_dir: &Path) -> GeIndexResult<String> {
        Ok(Self::read(index_dir, None)?.content_desc)
    }

    /// True when `index_dir` holds an index header.
    pub fn is_geindex(index_dir: &Path) -> bool {
        let mut magic = [0u8; 13];
        File::open(index_dir.join(INDEX_HEADER_NAME))
            .and_then(|mut file| file.read_exact(&mut magic))
            .map(|_| &magic == INDEX_MAGIC)
            .unwrap_or(false)
    }

    /// True when `index_dir` holds an index whose content description is
    /// `content_desc`.
    pub fn is_geindex_of_type(index_dir: &Path, content_desc: &str) -> bool {
        Self::is_geindex(index_dir)
            && Self::content_desc_of(index_dir)
                .map(|desc| desc == content_desc)
                .unwrap_or(false)
    }
}

/// Lexically normalizes `path`, dropping `.` and folding `..`.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// `target` expressed relative to `base`; both are normalized first.
/// Returns `target` unchanged when either path is relative.
pub(crate) fn relative_path(target: &Path, base: &Path) -> PathBuf {
    if !target.is_absolute() || !base.is_absolute() {
        return target.to_path_buf();
    }
    let target = normalize(target);
    let base = normalize(base);
    let target_parts: Vec<_> = target.components().collect();
    let base_parts: Vec<_> = base.components().collect();
    let common = target_parts
        .iter()
        .zip(&base_parts)
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..base_parts.len() {
        relative.push("..");
    }
    for part in &target_parts[common..] {
        relative.push(part.as_os_str());
    }
    relative
}

/// Inverse of [`relative_path`].
pub(crate) fn resolve_path(base: &Path, stored: &Path) -> PathBuf {
    if stored.is_absolute() {
        normalize(stored)
    } else {
        normalize(&base.join(stored))
    }
}

fn reroot(prefix: &Path, path: &Path) -> PathBuf {
    let tail: PathBuf = path
        .components()
        .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
        .collect();
    prefix.join(tail)
}
