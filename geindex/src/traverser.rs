//! Preorder iteration over whole indexes.
//!
//! A [`Traverser`] walks one index depth-first, holding one loaded child
//! bucket per level plus the entry bucket currently being yielded. Several
//! traversers combine through [`Merge`], and an [`AdaptingTraverser`]
//! re-expresses the entries of one index in a flattened entry type.

use std::cmp::Ordering;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use crate::buckets::{ChildBucket, ChildBucketAddr, EntryBucket};
use crate::config::ReaderConfig;
use crate::entries::{AdaptContext, AdaptFrom, Entry, TypedEntryType};
use crate::errors::{GeIndexError, GeIndexResult};
use crate::index::{BlockSource, Header, IndexBundleReader};
use crate::merge::{Merge, MergeSource, VecSource};
use crate::quadtree::{BucketPath, QuadtreePath};

/// All entries stored at one path. Ordered by path alone.
#[derive(Debug, Clone)]
pub struct TraverserValue<E> {
    pub path: QuadtreePath,
    pub entries: Vec<E>,
}

impl<E> PartialEq for TraverserValue<E> {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl<E> Eq for TraverserValue<E> {}

impl<E> PartialOrd for TraverserValue<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for TraverserValue<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.path.cmp(&other.path)
    }
}

/// Occupied slots of an entry bucket in slot order, which is preorder.
fn entry_bucket_values<B: EntryBucket>(path: &BucketPath, bucket: &B) -> Vec<TraverserValue<B::Entry>> {
    bucket
        .occupied_slots()
        .into_iter()
        .map(|slot| TraverserValue {
            path: path.entry_slot_path(slot),
            entries: bucket.slot_entries(slot).to_vec(),
        })
        .collect()
}

/// Walks the 256 slots of one child bucket. Each occupied slot becomes a
/// sub-merge of the entry bucket and the child bucket stored there, run to
/// exhaustion before the next slot is opened.
struct ChildBucketSource<B: EntryBucket> {
    bundle: Arc<IndexBundleReader>,
    path: BucketPath,
    bucket: ChildBucket,
    slots: std::vec::IntoIter<usize>,
    sub: Merge<TraverserValue<B::Entry>>,
    _bucket: PhantomData<fn() -> B>,
}

impl<B: EntryBucket> ChildBucketSource<B> {
    fn open(bundle: Arc<IndexBundleReader>, path: BucketPath, addr: ChildBucketAddr) -> GeIndexResult<Self> {
        let bucket = bundle.load_child_bucket(addr)?;
        let slots: Vec<usize> = bucket.occupied_slots().collect();
        let mut source = Self {
            bundle,
            path,
            bucket,
            slots: slots.into_iter(),
            sub: Merge::new(),
            _bucket: PhantomData,
        };
        source.open_next_slot()?;
        Ok(source)
    }

    fn open_next_slot(&mut self) -> GeIndexResult<()> {
        while self.sub.current().is_none() {
            let Some(slot) = self.slots.next() else {
                return Ok(());
            };
            let child = self.path.child(slot);
            let mut sub = Merge::new();

            let entry_addr = self.bucket.entry_addr(slot);
            if !entry_addr.is_null() {
                let entries: B = self.bundle.load_entry_bucket(entry_addr)?;
                sub.add_source(Box::new(VecSource::new(entry_bucket_values(&child, &entries))));
            }
            let child_addr = self.bucket.child_addr(slot);
            if !child_addr.is_null() {
                sub.add_source(Box::new(ChildBucketSource::<B>::open(
                    self.bundle.clone(),
                    child,
                    child_addr,
                )?));
            }
            self.sub = sub;
        }
        Ok(())
    }
}

impl<B: EntryBucket> MergeSource for ChildBucketSource<B> {
    type Item = TraverserValue<B::Entry>;

    fn current(&self) -> Option<&Self::Item> {
        self.sub.current()
    }

    fn advance(&mut self) -> GeIndexResult<()> {
        self.sub.advance()?;
        self.open_next_slot()
    }
}

/// Yields every `(path, entries)` of an index in increasing preorder.
pub struct Traverser<B: EntryBucket> {
    bundle: Arc<IndexBundleReader>,
    merge: Merge<TraverserValue<B::Entry>>,
    failed: bool,
    _bucket: PhantomData<fn() -> B>,
}

impl<B: EntryBucket> Traverser<B> {
    pub fn open(dir: impl AsRef<Path>, config: &ReaderConfig) -> GeIndexResult<Self> {
        Self::new(Arc::new(IndexBundleReader::open(dir, config)?))
    }

    pub fn new(bundle: Arc<IndexBundleReader>) -> GeIndexResult<Self> {
        if bundle.header().slots_are_single != B::SLOTS_ARE_SINGLE {
            return Err(GeIndexError::usage(format!(
                "index {:?} does not hold {} entries per slot",
                bundle.dir(),
                if B::SLOTS_ARE_SINGLE { "single" } else { "multiple" }
            )));
        }
        let header = bundle.header();
        let mut merge = Merge::new();
        let root: B = bundle.load_entry_bucket(header.root_entry_addr)?;
        merge.add_source(Box::new(VecSource::new(entry_bucket_values(
            &BucketPath::root(),
            &root,
        ))));
        if !header.root_child_addr.is_null() {
            let children =
                ChildBucketSource::<B>::open(bundle.clone(), BucketPath::root(), header.root_child_addr)?;
            merge.add_source(Box::new(children));
        }
        log::debug!("Traversing index {:?}", bundle.dir());
        Ok(Self {
            bundle,
            merge,
            failed: false,
            _bucket: PhantomData,
        })
    }

    pub fn header(&self) -> &Header {
        self.bundle.header()
    }

    pub fn bundle(&self) -> &Arc<IndexBundleReader> {
        &self.bundle
    }
}

impl<B: EntryBucket> MergeSource for Traverser<B> {
    type Item = TraverserValue<B::Entry>;

    fn current(&self) -> Option<&Self::Item> {
        self.merge.current()
    }

    fn advance(&mut self) -> GeIndexResult<()> {
        self.merge.advance()
    }
}

impl<B: EntryBucket> Iterator for Traverser<B> {
    type Item = GeIndexResult<TraverserValue<B::Entry>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let value = self.merge.current()?.clone();
        match self.merge.advance() {
            Ok(()) => Some(Ok(value)),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Re-expresses the entries of a traverser as `T`.
///
/// Entry types with a single winner per slot keep only the winner, picked
/// the same way [`Reader::get_entry`](crate::reader::Reader::get_entry)
/// picks it.
pub struct AdaptingTraverser<T, B: EntryBucket> {
    inner: Traverser<B>,
    entry_type: TypedEntryType,
    channel: u32,
    extras: Vec<u32>,
    current: Option<TraverserValue<T>>,
}

impl<T, B> AdaptingTraverser<T, B>
where
    T: AdaptFrom<B::Entry>,
    B: EntryBucket,
{
    /// Adapts `inner`; source entries lacking a type or channel take
    /// `entry_type` and `channel`.
    pub fn new(inner: Traverser<B>, entry_type: TypedEntryType, channel: u32) -> Self {
        let extras = inner.header().packet_extras.clone();
        let mut traverser = Self {
            inner,
            entry_type,
            channel,
            extras,
            current: None,
        };
        traverser.current = traverser.adapt_current();
        traverser
    }

    fn adapt_current(&self) -> Option<TraverserValue<T>> {
        let value = self.inner.current()?;
        let ctx = AdaptContext {
            entry_type: self.entry_type,
            channel: self.channel,
            extras: &self.extras,
        };
        let entries = if <B::Entry as Entry>::SINGLE_WINNER {
            let candidates: Vec<&B::Entry> = value.entries.iter().collect();
            <B::Entry as Entry>::select_winner(&candidates, &self.extras)
                .map(|winner| T::adapt_from(winner, &ctx))
                .into_iter()
                .collect()
        } else {
            value.entries.iter().map(|e| T::adapt_from(e, &ctx)).collect()
        };
        Some(TraverserValue {
            path: value.path,
            entries,
        })
    }
}

impl<T, B> MergeSource for AdaptingTraverser<T, B>
where
    T: AdaptFrom<B::Entry>,
    B: EntryBucket,
{
    type Item = TraverserValue<T>;

    fn current(&self) -> Option<&Self::Item> {
        self.current.as_ref()
    }

    fn advance(&mut self) -> GeIndexResult<()> {
        self.inner.advance()?;
        self.current = self.adapt_current();
        Ok(())
    }
}
