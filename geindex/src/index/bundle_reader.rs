use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::{BlockSource, Header, INDEX_HEADER_NAME};
use crate::buckets::EntryBucketAddr;
use crate::config::ReaderConfig;
use crate::errors::GeIndexResult;
use crate::filebundle::{absolute_dir, CachedReadAccessor, FileBundleReader, ManifestEntry};

/// Read side of an index bundle.
pub struct IndexBundleReader {
    bundle: FileBundleReader,
    header: Header,
    dir: PathBuf,
    accessor: Option<Mutex<CachedReadAccessor>>,
}

impl IndexBundleReader {
    pub fn open(dir: impl AsRef<Path>, config: &ReaderConfig) -> GeIndexResult<Self> {
        config.validate()?;
        let dir = absolute_dir(dir.as_ref())?;
        let header = Header::read(&dir, config.prefix_override())?;
        let bundle = FileBundleReader::open_with_config(&dir, config.bundle())?;
        let accessor = config
            .read_cache()
            .map(CachedReadAccessor::new)
            .transpose()?
            .map(Mutex::new);
        log::debug!(
            "Opened index {:?} ({} packet files, content '{}')",
            dir,
            header.packet_files.len(),
            header.content_desc
        );
        Ok(Self {
            bundle,
            header,
            dir,
            accessor,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `(bytes_read, disk_accesses)` of the block cache, when one is
    /// configured.
    pub fn read_cache_stats(&self) -> Option<(u64, u64)> {
        self.accessor.as_ref().map(|accessor| {
            let accessor = accessor.lock();
            (accessor.stats_bytes_read(), accessor.stats_disk_accesses())
        })
    }

    /// Appends `index.hdr` first, then the bundle's own files.
    pub fn append_manifest(&self, manifest: &mut Vec<ManifestEntry>) -> GeIndexResult<()> {
        append_index_header(self.bundle.orig_dir(), &self.dir, manifest)?;
        self.bundle.append_manifest(manifest)
    }
}

/// `index.hdr` lives next to the bundle files, so it shares their original
/// directory.
pub(crate) fn append_index_header(
    orig_dir: &Path,
    dir: &Path,
    manifest: &mut Vec<ManifestEntry>,
) -> GeIndexResult<()> {
    let path = dir.join(INDEX_HEADER_NAME);
    let size = std::fs::metadata(&path)?.len();
    manifest.push(ManifestEntry {
        orig_path: orig_dir.join(INDEX_HEADER_NAME),
        current_path: path,
        size,
    });
    Ok(())
}

impl BlockSource for IndexBundleReader {
    fn load_with_crc(&self, addr: EntryBucketAddr) -> GeIndexResult<Vec<u8>> {
        if addr.is_null() {
            return Ok(Vec::new());
        }
        match &self.accessor {
            Some(accessor) => {
                self.bundle
                    .read_at_crc_cached(addr.offset, addr.size as usize, &mut accessor.lock())
            }
            None => self.bundle.read_at_crc(addr.offset, addr.size as usize),
        }
    }

    fn load_without_crc(&self, offset: u64, len: usize) -> GeIndexResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        match &self.accessor {
            Some(accessor) => self.bundle.read_at_cached(offset, &mut buf, &mut accessor.lock())?,
            None => self.bundle.read_at(offset, &mut buf)?,
        }
        Ok(buf)
    }
}
