//! On-disk buckets of the quadtree index.
//!
//! An entry bucket holds the entries of the 85 paths a bucket covers. A
//! child bucket holds, for each of its 256 slots, the address of the child
//! bucket and of the entry bucket rooted one hop below. Each encoded bucket
//! (and each half of a child bucket) ends with its own CRC32.

mod child;
mod multiple;
mod single;

use bytes::{Buf, BufMut};

pub use child::ChildBucket;
pub use multiple::LoadedMultipleEntryBucket;
pub use single::LoadedSingleEntryBucket;

use crate::codec::ensure_remaining;
use crate::entries::{AllInfoEntry, BlendEntry, ChannelledEntry, Entry, SimpleInsetEntry, TypedEntry};
use crate::errors::GeIndexResult;
use crate::quadtree::ENTRY_SLOTS_PER_BUCKET;

pub type CombinedTmeshBucket = LoadedSingleEntryBucket<SimpleInsetEntry>;
pub type BlendBucket = LoadedMultipleEntryBucket<BlendEntry>;
pub type VectorBucket = LoadedMultipleEntryBucket<ChannelledEntry>;
pub type UnifiedBucket = LoadedMultipleEntryBucket<TypedEntry>;
pub type AllInfoBucket = LoadedMultipleEntryBucket<AllInfoEntry>;

/// Address of a stored entry bucket, or of any block of the index bundle.
/// A zero size means null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EntryBucketAddr {
    pub offset: u64,
    pub size: u32,
}

impl EntryBucketAddr {
    pub const PUSHED_SIZE: usize = 12;

    pub fn new(offset: u64, size: u32) -> Self {
        Self { offset, size }
    }

    pub fn null() -> Self {
        Self::default()
    }

    pub fn is_null(&self) -> bool {
        self.size == 0
    }

    pub fn push(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.offset);
        buf.put_u32_le(self.size);
    }

    pub fn pull(buf: &mut impl Buf) -> GeIndexResult<Self> {
        ensure_remaining(&*buf, Self::PUSHED_SIZE, "entry bucket address")?;
        Ok(Self {
            offset: buf.get_u64_le(),
            size: buf.get_u32_le(),
        })
    }
}

/// Address of a stored child bucket: the child half is followed by the
/// entry half in one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChildBucketAddr {
    pub offset: u64,
    pub child_size: u32,
    pub entry_size: u32,
}

impl ChildBucketAddr {
    pub const PUSHED_SIZE: usize = 16;

    pub fn null() -> Self {
        Self::default()
    }

    pub fn is_null(&self) -> bool {
        self.child_size == 0 && self.entry_size == 0
    }

    /// Whole stored block.
    pub fn block(&self) -> EntryBucketAddr {
        EntryBucketAddr::new(self.offset, self.child_size + self.entry_size)
    }

    pub fn from_block(block: EntryBucketAddr, child_size: u32) -> Self {
        if block.is_null() {
            return Self::null();
        }
        Self {
            offset: block.offset,
            child_size,
            entry_size: block.size.saturating_sub(child_size),
        }
    }

    pub fn child_half(&self) -> EntryBucketAddr {
        EntryBucketAddr::new(self.offset, self.child_size)
    }

    pub fn entry_half(&self) -> EntryBucketAddr {
        EntryBucketAddr::new(self.offset + u64::from(self.child_size), self.entry_size)
    }

    pub fn push(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.offset);
        buf.put_u32_le(self.child_size);
        buf.put_u32_le(self.entry_size);
    }

    pub fn pull(buf: &mut impl Buf) -> GeIndexResult<Self> {
        ensure_remaining(&*buf, Self::PUSHED_SIZE, "child bucket address")?;
        Ok(Self {
            offset: buf.get_u64_le(),
            child_size: buf.get_u32_le(),
            entry_size: buf.get_u32_le(),
        })
    }
}

/// An in-memory entry bucket of one concrete entry type.
pub trait EntryBucket: Default + Send + Sync + 'static {
    type Entry: Entry;

    /// True when each slot holds at most one entry.
    const SLOTS_ARE_SINGLE: bool;

    /// Decodes a CRC-stripped payload.
    fn load(payload: &[u8]) -> GeIndexResult<Self>;

    /// Appends the encoded bucket including its CRC. Appends nothing for
    /// an empty bucket.
    fn serialize(&self, buf: &mut Vec<u8>);

    /// Stores `entry` in `slot`; a delete marker removes the matching entry.
    fn put(&mut self, slot: usize, entry: Self::Entry);

    fn is_empty(&self) -> bool;

    /// Entries of `slot` in stored order.
    fn slot_entries(&self, slot: usize) -> &[Self::Entry];

    /// Occupied slots in increasing order.
    fn occupied_slots(&self) -> Vec<usize> {
        (0..ENTRY_SLOTS_PER_BUCKET)
            .filter(|&slot| !self.slot_entries(slot).is_empty())
            .collect()
    }
}

/// True when the sparse encoding of `num_slots` single entries of
/// `entry_size` bytes is smaller than the full 85-slot encoding.
pub fn should_store_singles_sparsely(entry_size: usize, num_slots: usize) -> bool {
    2 + num_slots * (1 + entry_size) < 2 + ENTRY_SLOTS_PER_BUCKET * entry_size
}
