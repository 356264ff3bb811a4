use crate::buckets::EntryBucketAddr;

/// Tracks space released by superseded writable blocks.
///
/// Released blocks are only counted; [`get`](BundleFreePool::get) never
/// hands space back out, so every store still appends or rewrites in
/// place. The counted bytes end up in the index header's wasted space.
#[derive(Debug, Default)]
pub struct BundleFreePool {
    free_bytes: u64,
    free_blocks: u64,
}

impl BundleFreePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, block: EntryBucketAddr) {
        if block.is_null() {
            return;
        }
        self.free_bytes += u64::from(block.size);
        self.free_blocks += 1;
        log::trace!(
            "Released {} bytes at {} to the free pool",
            block.size,
            block.offset
        );
    }

    /// A free block of at least `size` bytes. Always `None`: released space
    /// is not reused.
    pub fn get(&mut self, _size: u32) -> Option<EntryBucketAddr> {
        None
    }

    pub fn free_bytes(&self) -> u64 {
        self.free_bytes
    }

    pub fn free_blocks(&self) -> u64 {
        self.free_blocks
    }
}
