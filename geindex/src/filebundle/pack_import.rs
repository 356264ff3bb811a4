//! Read-only adapter presenting a legacy list of flat pack files as a file
//! bundle. Pack `i` becomes segment `i`, so a `(pack, offset)` address maps
//! to `i * segment_break + offset`.

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{absolute_dir, FileBundle, FileBundleReader, Segment};
use crate::errors::{GeIndexError, GeIndexResult};

pub struct FileBundlePackImport {
    reader: FileBundleReader,
    pack_files: Vec<PathBuf>,
}

impl FileBundlePackImport {
    /// Imports `pack_files` in order. `segment_break` defaults to the
    /// smallest power of two that holds the largest pack; a caller value
    /// smaller than that is rejected.
    pub fn open<P: AsRef<Path>>(pack_files: &[P], segment_break: Option<u64>) -> GeIndexResult<Self> {
        if pack_files.is_empty() {
            return Err(GeIndexError::usage("pack import needs at least one pack file"));
        }
        if pack_files.len() > super::SEGMENT_FILE_COUNT_MAX as usize {
            return Err(GeIndexError::Capacity(format!(
                "{} pack files exceed the segment cap of {}",
                pack_files.len(),
                super::SEGMENT_FILE_COUNT_MAX
            )));
        }

        let paths = pack_files
            .iter()
            .map(|p| absolute_dir(p.as_ref()))
            .collect::<GeIndexResult<Vec<_>>>()?;
        let sizes = paths
            .iter()
            .map(|p| Ok(std::fs::metadata(p)?.len()))
            .collect::<GeIndexResult<Vec<u64>>>()?;

        let largest = sizes.iter().copied().max().unwrap_or(0).max(1);
        let minimum = largest.checked_next_power_of_two().ok_or_else(|| {
            GeIndexError::Capacity(format!("pack file of {} bytes is too large", largest))
        })?;
        let segment_break = match segment_break {
            Some(requested) if requested < largest => {
                return Err(GeIndexError::usage(format!(
                    "segment break {} is smaller than the largest pack file ({} bytes)",
                    requested, largest
                )))
            }
            Some(requested) => requested,
            None => minimum,
        };

        let segments = paths
            .iter()
            .zip(&sizes)
            .enumerate()
            .map(|(id, (path, size))| {
                Segment::open_read_only(id as u32, path.to_string_lossy().into_owned(), path.clone(), *size)
                    .map(Arc::new)
            })
            .collect::<GeIndexResult<Vec<_>>>()?;

        let dir = paths[0]
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        log::debug!(
            "Imported {} pack files from {:?} (segment break {})",
            paths.len(),
            dir,
            segment_break
        );
        let bundle = FileBundle::new(dir.clone(), dir, None, segment_break, segments);
        Ok(Self {
            reader: FileBundleReader::from_bundle(bundle),
            pack_files: paths,
        })
    }

    pub fn pack_files(&self) -> &[PathBuf] {
        &self.pack_files
    }

    /// Bundle position of byte `offset` in pack `pack_index`.
    pub fn position_for(&self, pack_index: u32, offset: u64) -> GeIndexResult<u64> {
        if pack_index as usize >= self.pack_files.len() {
            return Err(GeIndexError::not_found(format!("no pack file {}", pack_index)));
        }
        if offset >= self.reader.segment_break() {
            return Err(GeIndexError::usage(format!(
                "offset {} is beyond the segment break {}",
                offset,
                self.reader.segment_break()
            )));
        }
        Ok(u64::from(pack_index) * self.reader.segment_break() + offset)
    }

    /// Inverse of [`position_for`](Self::position_for).
    pub fn pack_address(&self, position: u64) -> (u32, u64) {
        let segment_break = self.reader.segment_break();
        ((position / segment_break) as u32, position % segment_break)
    }
}

impl Deref for FileBundlePackImport {
    type Target = FileBundleReader;

    fn deref(&self) -> &Self::Target {
        &self.reader
    }
}
