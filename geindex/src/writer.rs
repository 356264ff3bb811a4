//! Builds an index from an increasing stream of `(path, entry)` puts.
//!
//! Only the buckets on the path most recently written are held in memory:
//! the root entry bucket, the root child bucket and, per bucket level
//! below it, one open child bucket carrying at most one open entry bucket.
//! A bucket is stored as soon as the input moves past it.

use std::path::{Path, PathBuf};

use itertools::Itertools;

use crate::buckets::{ChildBucket, ChildBucketAddr, EntryBucket, EntryBucketAddr};
use crate::config::WriterConfig;
use crate::entries::Entry;
use crate::errors::{GeIndexError, GeIndexResult};
use crate::filebundle::ManifestEntry;
use crate::index::{BlockSource, Header, IndexBundleWriter};
use crate::quadtree::{BucketPath, QuadtreePath};

struct OpenEntryBucket<B> {
    slot: usize,
    bucket: B,
    addr: EntryBucketAddr,
    dirty: bool,
}

impl<B: EntryBucket> OpenEntryBucket<B> {
    fn load(bundle: &IndexBundleWriter, slot: usize, addr: EntryBucketAddr) -> GeIndexResult<Self> {
        Ok(Self {
            slot,
            bucket: bundle.load_entry_bucket(addr)?,
            addr,
            dirty: false,
        })
    }

    /// Stores the bucket when it changed and returns its current address.
    fn store(&self, bundle: &mut IndexBundleWriter) -> GeIndexResult<EntryBucketAddr> {
        if !self.dirty {
            return Ok(self.addr);
        }
        let mut buf = bundle.get_write_buffer();
        self.bucket.serialize(&mut buf);
        bundle.store_and_return_buffer(self.addr, buf)
    }
}

struct OpenChildBucket<B> {
    path: BucketPath,
    bucket: ChildBucket,
    addr: ChildBucketAddr,
    dirty: bool,
    entry: Option<OpenEntryBucket<B>>,
}

impl<B: EntryBucket> OpenChildBucket<B> {
    fn load(bundle: &IndexBundleWriter, path: BucketPath, addr: ChildBucketAddr) -> GeIndexResult<Self> {
        let bucket = if addr.is_null() {
            ChildBucket::default()
        } else {
            bundle.load_child_bucket(addr)?
        };
        Ok(Self {
            path,
            bucket,
            addr,
            dirty: false,
            entry: None,
        })
    }

    fn close_entry(&mut self, bundle: &mut IndexBundleWriter) -> GeIndexResult<()> {
        if let Some(open) = self.entry.take() {
            let addr = open.store(bundle)?;
            if addr != open.addr {
                self.bucket.set_entry_addr(open.slot, addr);
                self.dirty = true;
            }
        }
        Ok(())
    }

    /// The entry bucket stored at `slot`, closing a different open one.
    fn entry_bucket(
        &mut self,
        bundle: &mut IndexBundleWriter,
        slot: usize,
    ) -> GeIndexResult<&mut OpenEntryBucket<B>> {
        if self.entry.as_ref().is_some_and(|open| open.slot != slot) {
            self.close_entry(bundle)?;
        }
        let open = match self.entry.take() {
            Some(open) => open,
            None => OpenEntryBucket::load(bundle, slot, self.bucket.entry_addr(slot))?,
        };
        Ok(self.entry.insert(open))
    }

    /// Stores the bucket when it changed and returns its current address.
    fn store(&self, bundle: &mut IndexBundleWriter) -> GeIndexResult<ChildBucketAddr> {
        if !self.dirty {
            return Ok(self.addr);
        }
        let mut buf = bundle.get_write_buffer();
        let (child_size, _) = self.bucket.serialize(&mut buf);
        let block = bundle.store_and_return_buffer(self.addr.block(), buf)?;
        Ok(ChildBucketAddr::from_block(block, child_size))
    }
}

/// Index writer over one concrete bucket type.
///
/// Paths must be put in non-decreasing preorder; equal paths are allowed so
/// multi-entry slots can receive several entries. A writer must be closed,
/// dropping an open writer loses everything since the last close.
pub struct Writer<B: EntryBucket> {
    bundle: IndexBundleWriter,
    root_entry: OpenEntryBucket<B>,
    spine: Vec<OpenChildBucket<B>>,
    last_path: Option<QuadtreePath>,
    puts: u64,
    closed: bool,
}

impl<B: EntryBucket> Writer<B> {
    /// Creates a fresh index in `dir` referencing `packet_files` as file
    /// numbers `0..`.
    pub fn create(
        dir: impl AsRef<Path>,
        packet_files: Vec<PathBuf>,
        config: &WriterConfig,
    ) -> GeIndexResult<Self> {
        log::debug!(
            "Building index in {:?} over packet files [{}]",
            dir.as_ref(),
            packet_files.iter().map(|p| p.display()).join(", ")
        );
        let bundle = IndexBundleWriter::create(dir, packet_files, B::SLOTS_ARE_SINGLE, config)?;
        Self::with_bundle(bundle)
    }

    /// Reopens an existing index for a delta update. Existing buckets are
    /// loaded on demand and rewritten into new segments.
    pub fn open_delta(dir: impl AsRef<Path>, config: &WriterConfig) -> GeIndexResult<Self> {
        let mut bundle = IndexBundleWriter::open_for_update(dir, config)?;
        if bundle.header().slots_are_single != B::SLOTS_ARE_SINGLE {
            if let Err(e) = bundle.close() {
                log::error!("Failed to close index {:?}: {}", bundle.dir(), e);
            }
            return Err(GeIndexError::usage(format!(
                "index {:?} stores {} entries per slot",
                bundle.dir(),
                if B::SLOTS_ARE_SINGLE { "multiple" } else { "single" }
            )));
        }
        Self::with_bundle(bundle)
    }

    fn with_bundle(mut bundle: IndexBundleWriter) -> GeIndexResult<Self> {
        let header = bundle.header().clone();
        let loaded = OpenEntryBucket::load(&bundle, 0, header.root_entry_addr).and_then(|root_entry| {
            OpenChildBucket::load(&bundle, BucketPath::root(), header.root_child_addr)
                .map(|root_child| (root_entry, root_child))
        });
        let (root_entry, root_child) = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                if let Err(close_err) = bundle.close() {
                    log::error!("Failed to close index {:?}: {}", bundle.dir(), close_err);
                }
                return Err(e);
            }
        };
        Ok(Self {
            bundle,
            root_entry,
            spine: vec![root_child],
            last_path: None,
            puts: 0,
            closed: false,
        })
    }

    pub fn header(&self) -> &Header {
        self.bundle.header()
    }

    pub fn dir(&self) -> &Path {
        self.bundle.dir()
    }

    /// Registers another packet file and returns its file number.
    pub fn add_packet_file(&mut self, path: impl AsRef<Path>, extra: u32) -> GeIndexResult<u32> {
        self.bundle.add_packet_file(path, extra)
    }

    pub fn set_packet_extra(&mut self, file_num: u32, extra: u32) -> GeIndexResult<()> {
        self.bundle.set_packet_extra(file_num, extra)
    }

    /// Stores `entry` at `path`. A delete marker removes the matching entry.
    pub fn put(&mut self, path: &QuadtreePath, entry: B::Entry) -> GeIndexResult<()> {
        if self.closed {
            return Err(GeIndexError::write(format!(
                "index writer for {:?} is closed",
                self.bundle.dir()
            )));
        }
        if let Some(last) = &self.last_path {
            if path < last {
                return Err(GeIndexError::OrderViolation {
                    previous: last.to_string(),
                    current: path.to_string(),
                });
            }
        }

        let target = BucketPath::containing(path);
        let slot = target.entry_slot_of(path);
        if target.is_root() {
            self.root_entry.bucket.put(slot, entry);
            self.root_entry.dirty = true;
        } else {
            self.open_spine_to(&target)?;
            let parent_depth = target.bucket_depth() as usize - 1;
            let Self { spine, bundle, .. } = self;
            let parent = spine.get_mut(parent_depth).ok_or_else(|| {
                GeIndexError::usage(format!("no open child bucket above {}", target))
            })?;
            let open = parent.entry_bucket(bundle, target.slot_in_parent())?;
            open.bucket.put(slot, entry);
            open.dirty = true;
        }

        self.last_path = Some(*path);
        self.puts += 1;
        Ok(())
    }

    /// Removes the entry at `path` that `entry` write-matches. Removing
    /// something that is not there is a no-op.
    pub fn delete(&mut self, path: &QuadtreePath, entry: &B::Entry) -> GeIndexResult<()> {
        self.put(path, entry.to_delete())
    }

    /// Leaves open exactly the child buckets from the root down to the
    /// parent of `target`, keeping those already on the way.
    fn open_spine_to(&mut self, target: &BucketPath) -> GeIndexResult<()> {
        let depth = target.bucket_depth() as usize;
        let keep = self
            .spine
            .iter()
            .enumerate()
            .take_while(|(i, frame)| *i <= depth && frame.path == target.ancestor_at_depth(*i as u32))
            .count()
            .max(1);
        while self.spine.len() > keep {
            self.close_deepest()?;
        }

        for level in self.spine.len()..depth {
            let path = target.ancestor_at_depth(level as u32);
            let addr = match self.spine.last() {
                Some(parent) => parent.bucket.child_addr(path.slot_in_parent()),
                None => ChildBucketAddr::null(),
            };
            let frame = OpenChildBucket::load(&self.bundle, path, addr)?;
            log::trace!("Opened child bucket {} at {:?}", path, addr);
            self.spine.push(frame);
        }
        Ok(())
    }

    fn close_deepest(&mut self) -> GeIndexResult<()> {
        let Some(mut frame) = self.spine.pop() else {
            return Ok(());
        };
        frame.close_entry(&mut self.bundle)?;
        let addr = frame.store(&mut self.bundle)?;
        let parent = self.spine.last_mut().ok_or_else(|| {
            GeIndexError::usage(format!("child bucket {} has no parent", frame.path))
        })?;
        if addr != frame.addr {
            parent.bucket.set_child_addr(frame.path.slot_in_parent(), addr);
            parent.dirty = true;
        }
        Ok(())
    }

    fn flush(&mut self) -> GeIndexResult<()> {
        while self.spine.len() > 1 {
            self.close_deepest()?;
        }
        let Self {
            spine,
            bundle,
            root_entry,
            ..
        } = self;
        if let Some(root) = spine.first_mut() {
            root.close_entry(bundle)?;
            let addr = root.store(bundle)?;
            root.addr = addr;
            root.dirty = false;
            bundle.header_mut().root_child_addr = addr;
        }
        let addr = root_entry.store(bundle)?;
        root_entry.addr = addr;
        root_entry.dirty = false;
        bundle.header_mut().root_entry_addr = addr;
        Ok(())
    }

    /// Stores every open bucket, persists the header and closes the bundle.
    /// Closing twice is a no-op.
    pub fn close(&mut self) -> GeIndexResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let flushed = self.flush();
        let closed = self.bundle.close();
        flushed?;
        closed?;
        log::debug!(
            "Closed index writer for {:?} after {} puts",
            self.bundle.dir(),
            self.puts
        );
        Ok(())
    }

    pub fn append_manifest(&self, manifest: &mut Vec<ManifestEntry>) -> GeIndexResult<()> {
        self.bundle.append_manifest(manifest)
    }
}

impl<B: EntryBucket> Drop for Writer<B> {
    fn drop(&mut self) {
        if !self.closed {
            log::error!(
                "Index writer for {:?} dropped without close, {} puts lost",
                self.bundle.dir(),
                self.puts
            );
            if let Err(e) = self.bundle.close() {
                log::error!("Failed to close index {:?}: {}", self.bundle.dir(), e);
            }
        }
    }
}
