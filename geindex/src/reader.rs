//! Random lookup of single entries by quadtree path.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::buckets::{ChildBucket, EntryBucket, EntryBucketAddr};
use crate::config::ReaderConfig;
use crate::entries::{Entry, ExternalDataAddress};
use crate::errors::{GeIndexError, GeIndexResult};
use crate::filebundle::ManifestEntry;
use crate::index::{BlockSource, Header, IndexBundleReader};
use crate::packetfile::PacketFileReader;
use crate::quadtree::{BucketPath, QuadtreePath};

/// A child bucket resolved for the cache, or the knowledge that it does
/// not exist.
#[derive(Debug)]
enum CachedChildBucket {
    Exists(ChildBucket),
    Missing,
}

impl CachedChildBucket {
    fn bucket(&self) -> Option<&ChildBucket> {
        match self {
            CachedChildBucket::Exists(bucket) => Some(bucket),
            CachedChildBucket::Missing => None,
        }
    }
}

/// Counters of the child-bucket cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReaderCacheStats {
    pub cached_child_buckets: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Index reader over one concrete bucket type. Safe to share between
/// threads.
pub struct Reader<B: EntryBucket> {
    bundle: IndexBundleReader,
    root_child: Arc<CachedChildBucket>,
    cache: Mutex<LruCache<BucketPath, Arc<CachedChildBucket>>>,
    cached_depths: u32,
    hits: AtomicU64,
    misses: AtomicU64,
    packet_readers: Mutex<HashMap<u32, Arc<PacketFileReader>>>,
    _bucket: PhantomData<fn() -> B>,
}

impl<B: EntryBucket> Reader<B> {
    pub fn open(dir: impl AsRef<Path>, config: &ReaderConfig) -> GeIndexResult<Self> {
        let bundle = IndexBundleReader::open(dir, config)?;
        if bundle.header().slots_are_single != B::SLOTS_ARE_SINGLE {
            return Err(GeIndexError::usage(format!(
                "index {:?} does not hold {} entries per slot",
                bundle.dir(),
                if B::SLOTS_ARE_SINGLE { "single" } else { "multiple" }
            )));
        }
        let root_addr = bundle.header().root_child_addr;
        let root_child = if root_addr.is_null() {
            CachedChildBucket::Missing
        } else {
            CachedChildBucket::Exists(bundle.load_child_bucket(root_addr)?)
        };
        let capacity = NonZeroUsize::new(config.cached_bucket_capacity())
            .ok_or_else(|| GeIndexError::usage("cached bucket capacity must be non-zero"))?;

        Ok(Self {
            bundle,
            root_child: Arc::new(root_child),
            cache: Mutex::new(LruCache::new(capacity)),
            cached_depths: u32::from(config.cached_bucket_levels()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            packet_readers: Mutex::new(HashMap::new()),
            _bucket: PhantomData,
        })
    }

    pub fn header(&self) -> &Header {
        self.bundle.header()
    }

    pub fn dir(&self) -> &Path {
        self.bundle.dir()
    }

    pub fn bundle(&self) -> &IndexBundleReader {
        &self.bundle
    }

    /// The entry at `path` matching `key`. When several entries of the
    /// slot match, the entry type picks the winner.
    pub fn get_entry(
        &self,
        path: &QuadtreePath,
        key: &<B::Entry as Entry>::ReadKey,
    ) -> GeIndexResult<B::Entry> {
        let target = BucketPath::containing(path);
        let addr = self.get_entry_bucket_addr(&target)?;
        if addr.is_null() {
            return Err(GeIndexError::not_found(format!("no entry bucket for {}", path)));
        }
        let bucket: B = self.bundle.load_entry_bucket(addr)?;
        let candidates: Vec<&B::Entry> = bucket
            .slot_entries(target.entry_slot_of(path))
            .iter()
            .filter(|entry| entry.read_matches(key))
            .collect();
        <B::Entry as Entry>::select_winner(&candidates, &self.header().packet_extras)
            .cloned()
            .ok_or_else(|| GeIndexError::not_found(format!("no matching entry at {}", path)))
    }

    /// Address of the entry bucket `target`, null when it does not exist.
    pub fn get_entry_bucket_addr(&self, target: &BucketPath) -> GeIndexResult<EntryBucketAddr> {
        let Some(parent) = target.parent() else {
            return Ok(self.header().root_entry_addr);
        };
        let parent_depth = parent.bucket_depth();
        let cached_depth = parent_depth.min(self.cached_depths - 1);
        let cached = self.cached_child_bucket(&parent.ancestor_at_depth(cached_depth))?;
        let Some(cached) = cached.bucket() else {
            return Ok(EntryBucketAddr::null());
        };
        if cached_depth == parent_depth {
            return Ok(cached.entry_addr(target.slot_in_parent()));
        }

        // below the cached tiers only child halves are read on the way down
        let mut addr = cached.child_addr(parent.ancestor_at_depth(cached_depth + 1).slot_in_parent());
        for depth in cached_depth + 1..parent_depth {
            if addr.is_null() {
                return Ok(EntryBucketAddr::null());
            }
            let half = self.bundle.load_child_half(addr)?;
            addr = half.child_addr(parent.ancestor_at_depth(depth + 1).slot_in_parent());
        }
        if addr.is_null() {
            return Ok(EntryBucketAddr::null());
        }
        let half = self.bundle.load_entry_half(addr)?;
        Ok(half.entry_addr(target.slot_in_parent()))
    }

    /// Child bucket `path` from the cache, filling the cache from the
    /// nearest cached ancestor on a miss.
    fn cached_child_bucket(&self, path: &BucketPath) -> GeIndexResult<Arc<CachedChildBucket>> {
        let Some(parent) = path.parent() else {
            return Ok(self.root_child.clone());
        };
        if let Some(found) = self.cache.lock().get(path) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(found.clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let parent_bucket = self.cached_child_bucket(&parent)?;
        let fetched = match parent_bucket.bucket() {
            Some(bucket) => {
                let addr = bucket.child_addr(path.slot_in_parent());
                if addr.is_null() {
                    CachedChildBucket::Missing
                } else {
                    CachedChildBucket::Exists(self.bundle.load_child_bucket(addr)?)
                }
            }
            None => CachedChildBucket::Missing,
        };

        let mut cache = self.cache.lock();
        if let Some(raced) = cache.get(path) {
            log::trace!("Discarding redundant fetch of child bucket {}", path);
            return Ok(raced.clone());
        }
        let fetched = Arc::new(fetched);
        cache.put(*path, fetched.clone());
        Ok(fetched)
    }

    pub fn cache_stats(&self) -> ReaderCacheStats {
        ReaderCacheStats {
            cached_child_buckets: self.cache.lock().len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// `(bytes_read, disk_accesses)` of the block cache, when configured.
    pub fn read_cache_stats(&self) -> Option<(u64, u64)> {
        self.bundle.read_cache_stats()
    }

    /// Payload bytes referenced by `addr`, read with a CRC check from the
    /// packet file it names.
    pub fn load_external_data(&self, addr: &ExternalDataAddress) -> GeIndexResult<Vec<u8>> {
        self.packet_reader(addr.file_num)?.read(addr)
    }

    fn packet_reader(&self, file_num: u32) -> GeIndexResult<Arc<PacketFileReader>> {
        if let Some(reader) = self.packet_readers.lock().get(&file_num) {
            return Ok(reader.clone());
        }
        let path = self
            .header()
            .packet_files
            .get(file_num as usize)
            .ok_or_else(|| {
                GeIndexError::corruption(format!(
                    "entry refers to packet file {} of {}",
                    file_num,
                    self.header().packet_files.len()
                ))
            })?;
        let opened = Arc::new(PacketFileReader::open(path)?);
        log::debug!("Opened packet file {} at {:?}", file_num, path);

        let mut readers = self.packet_readers.lock();
        Ok(readers.entry(file_num).or_insert(opened).clone())
    }

    pub fn append_manifest(&self, manifest: &mut Vec<ManifestEntry>) -> GeIndexResult<()> {
        self.bundle.append_manifest(manifest)
    }
}
