//! Append/update writers for file bundles.
//!
//! Space allocation, segment creation and the coalescing buffer are
//! serialized behind `modify_lock`; unbuffered disk writes happen after the
//! lock is released, so writers targeting different offsets never queue
//! behind each other's I/O.

use std::fs::DirBuilder;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{
    absolute_dir, fill_crc, segment_file_name, FileBundle, FileBundleHeader, ManifestEntry, Segment,
    SEGMENT_FILE_COUNT_MAX,
};
use crate::config::FileBundleConfig;
use crate::errors::{GeIndexError, GeIndexResult};

/// Pending sequential bytes for one segment.
struct WriteBuffer {
    capacity: usize,
    segment: Option<Arc<Segment>>,
    offset: u64,
    data: Vec<u8>,
}

impl WriteBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            segment: None,
            offset: 0,
            data: Vec::with_capacity(capacity),
        }
    }

    fn try_append(&mut self, segment: &Arc<Segment>, offset: u64, buf: &[u8]) -> bool {
        match &self.segment {
            Some(current)
                if current.id() == segment.id()
                    && self.offset + self.data.len() as u64 == offset
                    && self.data.len() + buf.len() <= self.capacity =>
            {
                self.data.extend_from_slice(buf);
                true
            }
            _ => false,
        }
    }

    fn start(&mut self, segment: &Arc<Segment>, offset: u64, buf: &[u8]) {
        self.segment = Some(segment.clone());
        self.offset = offset;
        self.data.clear();
        self.data.extend_from_slice(buf);
    }

    fn overlaps(&self, segment_id: u32, offset: u64, len: usize) -> bool {
        match &self.segment {
            Some(current) if current.id() == segment_id && !self.data.is_empty() => {
                let end = self.offset + self.data.len() as u64;
                offset < end && offset + len as u64 > self.offset
            }
            _ => false,
        }
    }

    fn flush(&mut self) -> GeIndexResult<()> {
        if let Some(segment) = self.segment.take() {
            if !self.data.is_empty() {
                segment.pwrite(&self.data, self.offset)?;
            }
        }
        self.data.clear();
        Ok(())
    }

    fn pending(&self) -> usize {
        self.data.len()
    }
}

struct WriteState {
    buffer: Option<WriteBuffer>,
    closed: bool,
}

/// Writer for a file bundle. All methods take `&self`, so one writer can
/// be shared across threads behind an `Arc`.
pub struct FileBundleWriter {
    bundle: FileBundle,
    config: FileBundleConfig,
    first_writable: u32,
    modify_lock: Mutex<WriteState>,
}

fn create_bundle_dir(dir: &Path, mode: u32) -> GeIndexResult<()> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    builder.create(dir)?;
    Ok(())
}

impl FileBundleWriter {
    /// Creates a new bundle in `dir`. The first segment and the header are
    /// written immediately.
    pub fn create(dir: impl AsRef<Path>, config: FileBundleConfig) -> GeIndexResult<Self> {
        config.validate()?;
        let dir = absolute_dir(dir.as_ref())?;
        create_bundle_dir(&dir, config.dir_mode())?;
        let header_path = dir.join(config.header_name());
        if header_path.exists() {
            return Err(GeIndexError::usage(format!(
                "a file bundle already exists at {:?}",
                dir
            )));
        }

        let bundle = FileBundle::new(
            dir.clone(),
            dir.clone(),
            Some(config.header_name().to_string()),
            config.segment_break(),
            Vec::new(),
        );
        let writer = Self::with_bundle(bundle, config, 0);
        writer.new_segment()?;
        writer.checkpoint()?;
        log::debug!(
            "Created file bundle at {:?} (segment break {})",
            dir,
            writer.bundle.segment_break()
        );
        Ok(writer)
    }

    /// Reopens an existing bundle: existing segments become read-only and a
    /// fresh writable segment receives all new data.
    pub(crate) fn open_for_update(dir: impl AsRef<Path>, config: FileBundleConfig) -> GeIndexResult<Self> {
        config.validate()?;
        let dir = absolute_dir(dir.as_ref())?;
        let header_path = dir.join(config.header_name());
        let header = FileBundleHeader::read(&header_path)?;
        if header.segment_break != config.segment_break() {
            log::debug!(
                "Keeping segment break {} of existing bundle {:?} (configured {})",
                header.segment_break,
                dir,
                config.segment_break()
            );
        }
        let segments = FileBundle::open_segments(&dir, &header)?;
        let first_writable = segments.len() as u32;
        let bundle = FileBundle::new(
            dir.clone(),
            header.orig_dir.clone(),
            Some(config.header_name().to_string()),
            header.segment_break,
            segments,
        );
        let writer = Self::with_bundle(bundle, config, first_writable);
        writer.new_segment()?;
        writer.checkpoint()?;
        log::debug!(
            "Opened file bundle {:?} for update ({} read-only segments)",
            dir,
            first_writable
        );
        Ok(writer)
    }

    fn with_bundle(bundle: FileBundle, config: FileBundleConfig, first_writable: u32) -> Self {
        let buffer = config.write_buffer_size().map(WriteBuffer::new);
        Self {
            bundle,
            config,
            first_writable,
            modify_lock: Mutex::new(WriteState {
                buffer,
                closed: false,
            }),
        }
    }

    /// Creates the next segment. Callers hold `modify_lock` or have
    /// exclusive access during construction.
    fn new_segment(&self) -> GeIndexResult<Arc<Segment>> {
        let id = self.bundle.segment_count();
        if id >= SEGMENT_FILE_COUNT_MAX {
            return Err(GeIndexError::Capacity(format!(
                "bundle {:?} already has the maximum of {} segments",
                self.bundle.dir(),
                SEGMENT_FILE_COUNT_MAX
            )));
        }
        let name = segment_file_name(id);
        let path = self.bundle.dir().join(&name);
        let segment = Arc::new(Segment::create(id, name, path, self.config.file_mode())?);
        self.bundle.push_segment(segment.clone());
        Ok(segment)
    }

    fn allocate_locked(&self, state: &mut WriteState, len: usize) -> GeIndexResult<(Arc<Segment>, u64)> {
        if state.closed {
            return Err(GeIndexError::write(format!(
                "file bundle {:?} is closed",
                self.bundle.dir()
            )));
        }
        let len = len as u64;
        if len > self.bundle.segment_break() {
            return Err(GeIndexError::Capacity(format!(
                "record of {} bytes exceeds the segment break {}",
                len,
                self.bundle.segment_break()
            )));
        }
        let mut segment = self
            .bundle
            .last_segment()
            .ok_or_else(|| GeIndexError::usage("file bundle has no segments"))?;
        if segment.is_read_only() || segment.size() + len > self.bundle.segment_break() {
            segment = self.new_segment()?;
        }
        let offset = segment.size();
        segment.set_size(offset + len);
        Ok((segment, offset))
    }

    /// Reserves `len` bytes at the end of the bundle without writing them.
    /// The span must be filled later with [`write_at`](Self::write_at).
    pub fn allocate(&self, len: usize) -> GeIndexResult<u64> {
        let mut state = self.modify_lock.lock();
        let (segment, offset) = self.allocate_locked(&mut state, len)?;
        Ok(self.bundle.position_of(segment.id(), offset))
    }

    /// Appends `buf` and returns its bundle position.
    pub fn write_append(&self, buf: &[u8]) -> GeIndexResult<u64> {
        let mut state = self.modify_lock.lock();
        let (segment, offset) = self.allocate_locked(&mut state, buf.len())?;
        let position = self.bundle.position_of(segment.id(), offset);

        if let Some(buffer) = state.buffer.as_mut() {
            if !buffer.try_append(&segment, offset, buf) {
                buffer.flush()?;
                if buf.len() < buffer.capacity {
                    buffer.start(&segment, offset, buf);
                } else {
                    segment.pwrite(buf, offset)?;
                }
            }
            return Ok(position);
        }

        drop(state);
        segment.pwrite(buf, offset)?;
        Ok(position)
    }

    /// Like [`write_append`](Self::write_append) after overwriting the last
    /// 4 bytes of `buf` with the CRC32 of the bytes in front of them.
    pub fn write_append_crc(&self, buf: &mut [u8]) -> GeIndexResult<u64> {
        fill_crc(buf)?;
        self.write_append(buf)
    }

    /// Rewrites previously allocated space.
    pub fn write_at(&self, position: u64, buf: &[u8]) -> GeIndexResult<()> {
        let segment_break = self.bundle.segment_break();
        let segment_id = position / segment_break;
        let offset = position % segment_break;
        if offset + buf.len() as u64 > segment_break {
            return Err(GeIndexError::write(format!(
                "write of {} bytes at {} crosses a segment boundary",
                buf.len(),
                position
            )));
        }

        let mut state = self.modify_lock.lock();
        if state.closed {
            return Err(GeIndexError::write(format!(
                "file bundle {:?} is closed",
                self.bundle.dir()
            )));
        }
        let segment = u32::try_from(segment_id)
            .ok()
            .and_then(|id| self.bundle.segment(id))
            .ok_or_else(|| GeIndexError::write(format!("no segment holds position {}", position)))?;
        if segment.id() < self.first_writable || segment.is_read_only() {
            return Err(GeIndexError::write(format!(
                "position {} lies in read-only segment {}",
                position,
                segment.id()
            )));
        }
        if offset + buf.len() as u64 > segment.size() {
            return Err(GeIndexError::write(format!(
                "write of {} bytes at {} runs past the allocated space",
                buf.len(),
                position
            )));
        }
        if let Some(buffer) = state.buffer.as_mut() {
            if buffer.overlaps(segment.id(), offset, buf.len()) {
                buffer.flush()?;
            }
        }
        drop(state);
        segment.pwrite(buf, offset)
    }

    pub fn write_at_crc(&self, position: u64, buf: &mut [u8]) -> GeIndexResult<()> {
        fill_crc(buf)?;
        self.write_at(position, buf)
    }

    fn flush_if_overlapping(&self, position: u64, len: usize) -> GeIndexResult<()> {
        let mut state = self.modify_lock.lock();
        let segment_break = self.bundle.segment_break();
        if let Some(buffer) = state.buffer.as_mut() {
            let segment_id = (position / segment_break) as u32;
            if buffer.overlaps(segment_id, position % segment_break, len) {
                buffer.flush()?;
            }
        }
        Ok(())
    }

    pub fn read_at(&self, position: u64, buf: &mut [u8]) -> GeIndexResult<()> {
        self.flush_if_overlapping(position, buf.len())?;
        self.bundle.read_at(position, buf)
    }

    pub fn read_at_crc(&self, position: u64, len: usize) -> GeIndexResult<Vec<u8>> {
        self.flush_if_overlapping(position, len)?;
        self.bundle.read_at_crc(position, len)
    }

    /// True when `[position, position + len)` may still be rewritten.
    pub fn is_writable(&self, position: u64, len: usize) -> bool {
        let segment_break = self.bundle.segment_break();
        let segment_id = position / segment_break;
        let offset = position % segment_break;
        if offset + len as u64 > segment_break || segment_id < u64::from(self.first_writable) {
            return false;
        }
        u32::try_from(segment_id)
            .ok()
            .and_then(|id| self.bundle.segment(id))
            .map(|segment| !segment.is_read_only() && offset + len as u64 <= segment.size())
            .unwrap_or(false)
    }

    fn persist_locked(&self, state: &mut WriteState) -> GeIndexResult<()> {
        if let Some(buffer) = state.buffer.as_mut() {
            buffer.flush()?;
        }
        self.bundle.sync_segments()?;
        let header_path = self
            .bundle
            .header_path()
            .ok_or_else(|| GeIndexError::usage("file bundle has no header file"))?;
        self.bundle.header().write(&header_path, self.config.file_mode())
    }

    /// Flushes buffered data and persists the header without closing any
    /// segment.
    pub fn checkpoint(&self) -> GeIndexResult<()> {
        let mut state = self.modify_lock.lock();
        if state.closed {
            return Err(GeIndexError::write(format!(
                "file bundle {:?} is closed",
                self.bundle.dir()
            )));
        }
        self.persist_locked(&mut state)
    }

    /// Flushes, persists the header and releases every segment handle.
    /// Closing twice is a no-op.
    pub fn close(&self) -> GeIndexResult<()> {
        let mut state = self.modify_lock.lock();
        if state.closed {
            return Ok(());
        }
        self.persist_locked(&mut state)?;
        state.closed = true;
        let released = self.bundle.release_segments();
        log::debug!(
            "Closed file bundle {:?} ({} segments)",
            self.bundle.dir(),
            released
        );
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.modify_lock.lock().closed
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

    /// Index of the first segment this writer may modify.
    pub fn first_writable_segment(&self) -> u32 {
        self.first_writable
    }

    pub fn data_size(&self) -> u64 {
        self.bundle.data_size()
    }

    pub fn append_manifest(&self, manifest: &mut Vec<ManifestEntry>) -> GeIndexResult<()> {
        self.bundle.append_manifest(manifest)
    }
}

impl Drop for FileBundleWriter {
    fn drop(&mut self) {
        let state = self.modify_lock.get_mut();
        if !state.closed {
            let pending = state.buffer.as_ref().map_or(0, |b| b.pending());
            log::error!(
                "FileBundleWriter for {:?} dropped without close ({} unflushed bytes, {} open segments)",
                self.bundle.dir(),
                pending,
                self.bundle.segment_count()
            );
            debug_assert!(
                std::thread::panicking(),
                "FileBundleWriter dropped without close"
            );
        }
    }
}

/// A [`FileBundleWriter`] over an existing bundle whose pre-existing
/// segments are read-only.
pub struct FileBundleUpdateWriter {
    inner: FileBundleWriter,
}

impl FileBundleUpdateWriter {
    pub fn open(dir: impl AsRef<Path>, config: FileBundleConfig) -> GeIndexResult<Self> {
        Ok(Self {
            inner: FileBundleWriter::open_for_update(dir, config)?,
        })
    }

    pub fn into_inner(self) -> FileBundleWriter {
        self.inner
    }
}

impl Deref for FileBundleUpdateWriter {
    type Target = FileBundleWriter;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
