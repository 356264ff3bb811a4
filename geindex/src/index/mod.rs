//! The index bundle: a file bundle plus the index header, with CRC-checked
//! block loads for the bucket layer.

mod buffer_cache;
mod bundle_reader;
mod bundle_writer;
mod delayed_write;
mod free_pool;
mod header;

pub use buffer_cache::BufferCache;
pub use bundle_reader::IndexBundleReader;
pub use bundle_writer::IndexBundleWriter;
pub use free_pool::BundleFreePool;
pub use header::{Header, CURRENT_FORMAT_VERSION, INDEX_HEADER_NAME};

use crate::buckets::{ChildBucket, ChildBucketAddr, EntryBucket, EntryBucketAddr};
use crate::errors::GeIndexResult;

/// CRC-checked block loads shared by index bundle readers and writers.
pub trait BlockSource {
    /// Reads the block at `addr` and returns its payload without the CRC.
    /// A null address yields an empty payload.
    fn load_with_crc(&self, addr: EntryBucketAddr) -> GeIndexResult<Vec<u8>>;

    /// Reads raw bytes without any CRC handling.
    fn load_without_crc(&self, offset: u64, len: usize) -> GeIndexResult<Vec<u8>>;

    /// Loads only the child-address half of a child bucket.
    fn load_child_half(&self, addr: ChildBucketAddr) -> GeIndexResult<ChildBucket> {
        let mut bucket = ChildBucket::default();
        bucket.load_child_half(&self.load_with_crc(addr.child_half())?)?;
        Ok(bucket)
    }

    /// Loads only the entry-address half of a child bucket.
    fn load_entry_half(&self, addr: ChildBucketAddr) -> GeIndexResult<ChildBucket> {
        let mut bucket = ChildBucket::default();
        bucket.load_entry_half(&self.load_with_crc(addr.entry_half())?)?;
        Ok(bucket)
    }

    fn load_child_bucket(&self, addr: ChildBucketAddr) -> GeIndexResult<ChildBucket> {
        ChildBucket::load(
            &self.load_with_crc(addr.child_half())?,
            &self.load_with_crc(addr.entry_half())?,
        )
    }

    /// Loads an entry bucket; a null address yields an empty bucket.
    fn load_entry_bucket<B: EntryBucket>(&self, addr: EntryBucketAddr) -> GeIndexResult<B> {
        if addr.is_null() {
            return Ok(B::default());
        }
        B::load(&self.load_with_crc(addr)?)
    }
}
