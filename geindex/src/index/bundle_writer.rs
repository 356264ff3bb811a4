use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::bundle_reader::append_index_header;
use super::delayed_write::DelayedWriteQueue;
use super::{BlockSource, BufferCache, BundleFreePool, Header};
use crate::buckets::EntryBucketAddr;
use crate::config::WriterConfig;
use crate::errors::{GeIndexError, GeIndexResult};
use crate::filebundle::{absolute_dir, FileBundleUpdateWriter, FileBundleWriter, ManifestEntry};

/// Write side of an index bundle: block storage for buckets plus the
/// header that is persisted on close.
pub struct IndexBundleWriter {
    bundle: Arc<FileBundleWriter>,
    header: Header,
    dir: PathBuf,
    file_mode: u32,
    free_pool: BundleFreePool,
    buffers: Arc<BufferCache>,
    delayed: Option<DelayedWriteQueue>,
    read_only_wasted: u64,
    closed: bool,
}

impl IndexBundleWriter {
    /// Creates a fresh index in `dir`.
    pub fn create(
        dir: impl AsRef<Path>,
        packet_files: Vec<PathBuf>,
        slots_are_single: bool,
        config: &WriterConfig,
    ) -> GeIndexResult<Self> {
        let dir = absolute_dir(dir.as_ref())?;
        let bundle = FileBundleWriter::create(&dir, config.bundle().clone())?;
        let mut header = Header::new(slots_are_single, config.content_desc());
        header.packet_extras = vec![0; packet_files.len()];
        header.packet_files = packet_files
            .iter()
            .map(|p| absolute_dir(p))
            .collect::<GeIndexResult<Vec<_>>>()?;
        log::debug!("Creating index {:?}", dir);
        Self::with_bundle(dir, bundle, header, config)
    }

    /// Reopens an existing index. Existing blocks become read-only; every
    /// rewritten bucket lands in a new segment.
    pub fn open_for_update(dir: impl AsRef<Path>, config: &WriterConfig) -> GeIndexResult<Self> {
        let dir = absolute_dir(dir.as_ref())?;
        let header = Header::read(&dir, None)?;
        let bundle = FileBundleUpdateWriter::open(&dir, config.bundle().clone())?.into_inner();
        log::debug!(
            "Opening index {:?} for update ({} wasted bytes so far)",
            dir,
            header.wasted_space
        );
        Self::with_bundle(dir, bundle, header, config)
    }

    fn with_bundle(
        dir: PathBuf,
        bundle: FileBundleWriter,
        header: Header,
        config: &WriterConfig,
    ) -> GeIndexResult<Self> {
        let bundle = Arc::new(bundle);
        let buffers = Arc::new(BufferCache::new(config.buffer_cache_capacity()));
        let delayed = if config.delayed_writes() {
            match DelayedWriteQueue::start(bundle.clone(), buffers.clone()) {
                Ok(queue) => Some(queue),
                Err(e) => {
                    if let Err(close_err) = bundle.close() {
                        log::error!("Failed to close bundle {:?}: {}", dir, close_err);
                    }
                    return Err(e);
                }
            }
        } else {
            None
        };
        Ok(Self {
            bundle,
            header,
            dir,
            file_mode: config.bundle().file_mode(),
            free_pool: BundleFreePool::new(),
            buffers,
            delayed,
            read_only_wasted: 0,
            closed: false,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Registers another packet file and returns its file number.
    pub fn add_packet_file(&mut self, path: impl AsRef<Path>, extra: u32) -> GeIndexResult<u32> {
        let path = absolute_dir(path.as_ref())?;
        self.header.packet_files.push(path);
        self.header.packet_extras.push(extra);
        Ok((self.header.packet_files.len() - 1) as u32)
    }

    pub fn set_packet_extra(&mut self, file_num: u32, extra: u32) -> GeIndexResult<()> {
        let slot = self
            .header
            .packet_extras
            .get_mut(file_num as usize)
            .ok_or_else(|| GeIndexError::usage(format!("no packet file {}", file_num)))?;
        *slot = extra;
        Ok(())
    }

    /// A pooled, empty write buffer. Hand it back through
    /// [`store_and_return_buffer`](Self::store_and_return_buffer).
    pub fn get_write_buffer(&self) -> Vec<u8> {
        self.buffers.get()
    }

    /// Stores a serialized block that replaces `prev` and returns its new
    /// address. The block is rewritten in place when it keeps its size and
    /// still lives in writable space; otherwise it is appended and `prev`
    /// is released. An empty buffer releases `prev` and yields null.
    ///
    /// `buf` goes back to the buffer cache on every path, errors included.
    pub fn store_and_return_buffer(&mut self, prev: EntryBucketAddr, buf: Vec<u8>) -> GeIndexResult<EntryBucketAddr> {
        let (addr, pending) = match self.place_block(prev, &buf) {
            Ok(placed) => placed,
            Err(e) => {
                self.buffers.put(buf);
                return Err(e);
            }
        };
        if !pending {
            self.buffers.put(buf);
            return Ok(addr);
        }
        match &self.delayed {
            // the queue hands the buffer back once it is written
            Some(queue) => queue.submit(addr.offset, buf)?,
            None => {
                let written = self.bundle.write_at(addr.offset, &buf);
                self.buffers.put(buf);
                written?;
            }
        }
        Ok(addr)
    }

    /// Picks the address for `buf`. The flag is true when the bytes still
    /// have to be written there.
    fn place_block(&mut self, prev: EntryBucketAddr, buf: &[u8]) -> GeIndexResult<(EntryBucketAddr, bool)> {
        if self.closed {
            return Err(GeIndexError::write(format!("index {:?} is closed", self.dir)));
        }
        if buf.is_empty() {
            self.release(prev);
            return Ok((EntryBucketAddr::null(), false));
        }
        let size = u32::try_from(buf.len()).map_err(|_| {
            GeIndexError::Capacity(format!("bucket of {} bytes is too large", buf.len()))
        })?;

        if !prev.is_null() && prev.size == size && self.bundle.is_writable(prev.offset, buf.len()) {
            log::trace!("Rewriting {} byte block at {} in place", size, prev.offset);
            return Ok((prev, true));
        }
        self.release(prev);
        if let Some(reused) = self.free_pool.get(size) {
            return Ok((reused, true));
        }
        if self.delayed.is_some() {
            let offset = self.bundle.allocate(buf.len())?;
            log::trace!("Allocated {} byte block at {}", size, offset);
            return Ok((EntryBucketAddr::new(offset, size), true));
        }
        let offset = self.bundle.write_append(buf)?;
        log::trace!("Appended {} byte block at {}", size, offset);
        Ok((EntryBucketAddr::new(offset, size), false))
    }

    fn release(&mut self, prev: EntryBucketAddr) {
        if prev.is_null() {
            return;
        }
        if self.bundle.is_writable(prev.offset, prev.size as usize) {
            self.free_pool.add(prev);
        } else {
            log::trace!(
                "Superseded {} byte read-only block at {}",
                prev.size,
                prev.offset
            );
            self.read_only_wasted += u64::from(prev.size);
        }
    }

    /// Bytes lost to superseded blocks in this session so far.
    pub fn wasted_space(&self) -> u64 {
        self.read_only_wasted + self.free_pool.free_bytes()
    }

    pub fn free_pool(&self) -> &BundleFreePool {
        &self.free_pool
    }

    /// Finishes queued writes, persists the index header and closes the
    /// bundle. Closing twice is a no-op.
    pub fn close(&mut self) -> GeIndexResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let drained = match self.delayed.as_mut() {
            Some(queue) => queue.finish(),
            None => Ok(()),
        };
        if let Err(e) = drained {
            if let Err(close_err) = self.bundle.close() {
                log::error!("Failed to close bundle {:?}: {}", self.dir, close_err);
            }
            return Err(e);
        }

        if self.read_only_wasted > 0 {
            log::warn!(
                "Index {:?} superseded {} bytes in read-only segments",
                self.dir,
                self.read_only_wasted
            );
        }
        self.header.wasted_space += self.wasted_space();
        let data_size = self.bundle.data_size();
        let persisted = self.header.write(&self.dir, self.file_mode);
        let closed = self.bundle.close();
        persisted?;
        closed?;
        log::debug!(
            "Closed index {:?} ({} bytes of data, {} wasted)",
            self.dir,
            data_size,
            self.header.wasted_space
        );
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Appends `index.hdr` first, then the bundle's own files.
    pub fn append_manifest(&self, manifest: &mut Vec<ManifestEntry>) -> GeIndexResult<()> {
        append_index_header(self.bundle.orig_dir(), &self.dir, manifest)?;
        self.bundle.append_manifest(manifest)
    }
}

impl BlockSource for IndexBundleWriter {
    fn load_with_crc(&self, addr: EntryBucketAddr) -> GeIndexResult<Vec<u8>> {
        if addr.is_null() {
            return Ok(Vec::new());
        }
        if let Some(queue) = &self.delayed {
            queue.drain()?;
        }
        self.bundle.read_at_crc(addr.offset, addr.size as usize)
    }

    fn load_without_crc(&self, offset: u64, len: usize) -> GeIndexResult<Vec<u8>> {
        if let Some(queue) = &self.delayed {
            queue.drain()?;
        }
        let mut buf = vec![0u8; len];
        self.bundle.read_at(offset, &mut buf)?;
        Ok(buf)
    }
}

impl Drop for IndexBundleWriter {
    fn drop(&mut self) {
        if !self.closed {
            log::error!("IndexBundleWriter for {:?} dropped without close", self.dir);
        }
    }
}
