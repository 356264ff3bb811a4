use std::path::Path;

use super::{absolute_dir, CachedReadAccessor, FileBundle, FileBundleHeader, ManifestEntry};
use crate::config::FileBundleConfig;
use crate::errors::GeIndexResult;

/// Read-only view of a closed file bundle.
pub struct FileBundleReader {
    bundle: FileBundle,
}

impl FileBundleReader {
    /// Opens the bundle in `dir` using the default header name.
    pub fn open(dir: impl AsRef<Path>) -> GeIndexResult<Self> {
        Self::open_with_config(dir, &FileBundleConfig::default())
    }

    pub fn open_with_config(dir: impl AsRef<Path>, config: &FileBundleConfig) -> GeIndexResult<Self> {
        config.validate()?;
        let dir = absolute_dir(dir.as_ref())?;
        let header = FileBundleHeader::read(&dir.join(config.header_name()))?;
        let segments = FileBundle::open_segments(&dir, &header)?;
        log::debug!(
            "Opened file bundle {:?} for reading ({} segments)",
            dir,
            segments.len()
        );
        Ok(Self {
            bundle: FileBundle::new(
                dir,
                header.orig_dir,
                Some(config.header_name().to_string()),
                header.segment_break,
                segments,
            ),
        })
    }

    pub(crate) fn from_bundle(bundle: FileBundle) -> Self {
        Self { bundle }
    }

    pub fn read_at(&self, position: u64, buf: &mut [u8]) -> GeIndexResult<()> {
        self.bundle.read_at(position, buf)
    }

    /// Reads `len` bytes including the trailing CRC and returns the
    /// verified payload.
    pub fn read_at_crc(&self, position: u64, len: usize) -> GeIndexResult<Vec<u8>> {
        self.bundle.read_at_crc(position, len)
    }

    pub fn read_at_cached(
        &self,
        position: u64,
        buf: &mut [u8],
        accessor: &mut CachedReadAccessor,
    ) -> GeIndexResult<()> {
        self.bundle.read_at_cached(position, buf, accessor)
    }

    pub fn read_at_crc_cached(
        &self,
        position: u64,
        len: usize,
        accessor: &mut CachedReadAccessor,
    ) -> GeIndexResult<Vec<u8>> {
        self.bundle.read_at_crc_cached(position, len, accessor)
    }

    pub fn dir(&self) -> &Path {
        self.bundle.dir()
    }

    /// Directory the bundle was built in.
    pub fn orig_dir(&self) -> &Path {
        self.bundle.orig_dir()
    }

    pub fn segment_break(&self) -> u64 {
        self.bundle.segment_break()
    }

    pub fn segment_count(&self) -> u32 {
        self.bundle.segment_count()
    }

    pub fn data_size(&self) -> u64 {
        self.bundle.data_size()
    }

    pub fn append_manifest(&self, manifest: &mut Vec<ManifestEntry>) -> GeIndexResult<()> {
        self.bundle.append_manifest(manifest)
    }
}
