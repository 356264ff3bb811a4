use bytes::BufMut;

use super::{ChildBucketAddr, EntryBucketAddr};
use crate::codec::get_u8;
use crate::errors::GeIndexResult;
use crate::filebundle::crc32;
use crate::quadtree::CHILD_ADDRS_PER_BUCKET;

/// Addresses of the buckets one hop below, indexed by child slot.
///
/// Stored as two CRC-protected halves so a lookup walking down the tree can
/// load only the child addresses: `[u8 slot, ChildBucketAddr]* CRC` then
/// `[u8 slot, EntryBucketAddr]* CRC`. A half without occupied slots takes
/// zero bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildBucket {
    child_addrs: Vec<ChildBucketAddr>,
    entry_addrs: Vec<EntryBucketAddr>,
}

impl Default for ChildBucket {
    fn default() -> Self {
        Self {
            child_addrs: vec![ChildBucketAddr::null(); CHILD_ADDRS_PER_BUCKET],
            entry_addrs: vec![EntryBucketAddr::null(); CHILD_ADDRS_PER_BUCKET],
        }
    }
}

impl ChildBucket {
    /// Builds a bucket from CRC-stripped halves; either may be empty.
    pub fn load(child_half: &[u8], entry_half: &[u8]) -> GeIndexResult<Self> {
        let mut bucket = Self::default();
        bucket.load_child_half(child_half)?;
        bucket.load_entry_half(entry_half)?;
        Ok(bucket)
    }

    pub fn load_child_half(&mut self, payload: &[u8]) -> GeIndexResult<()> {
        let mut buf = payload;
        while !buf.is_empty() {
            let slot = get_u8(&mut buf, "child bucket slot")? as usize;
            self.child_addrs[slot] = ChildBucketAddr::pull(&mut buf)?;
        }
        Ok(())
    }

    pub fn load_entry_half(&mut self, payload: &[u8]) -> GeIndexResult<()> {
        let mut buf = payload;
        while !buf.is_empty() {
            let slot = get_u8(&mut buf, "entry bucket slot")? as usize;
            self.entry_addrs[slot] = EntryBucketAddr::pull(&mut buf)?;
        }
        Ok(())
    }

    pub fn child_addr(&self, slot: usize) -> ChildBucketAddr {
        self.child_addrs[slot]
    }

    pub fn entry_addr(&self, slot: usize) -> EntryBucketAddr {
        self.entry_addrs[slot]
    }

    pub fn set_child_addr(&mut self, slot: usize, addr: ChildBucketAddr) {
        self.child_addrs[slot] = addr;
    }

    pub fn set_entry_addr(&mut self, slot: usize, addr: EntryBucketAddr) {
        self.entry_addrs[slot] = addr;
    }

    pub fn is_empty(&self) -> bool {
        self.child_addrs.iter().all(ChildBucketAddr::is_null)
            && self.entry_addrs.iter().all(EntryBucketAddr::is_null)
    }

    /// Slots holding a child bucket or an entry bucket, in slot order.
    pub fn occupied_slots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..CHILD_ADDRS_PER_BUCKET)
            .filter(move |&slot| !self.child_addrs[slot].is_null() || !self.entry_addrs[slot].is_null())
    }

    /// Appends both halves and returns `(child_size, entry_size)`.
    pub fn serialize(&self, buf: &mut Vec<u8>) -> (u32, u32) {
        let start = buf.len();
        for (slot, addr) in self.child_addrs.iter().enumerate() {
            if !addr.is_null() {
                buf.put_u8(slot as u8);
                addr.push(buf);
            }
        }
        if buf.len() > start {
            let crc = crc32(&buf[start..]);
            buf.put_u32_le(crc);
        }
        let child_size = (buf.len() - start) as u32;

        let entry_start = buf.len();
        for (slot, addr) in self.entry_addrs.iter().enumerate() {
            if !addr.is_null() {
                buf.put_u8(slot as u8);
                addr.push(buf);
            }
        }
        if buf.len() > entry_start {
            let crc = crc32(&buf[entry_start..]);
            buf.put_u32_le(crc);
        }
        let entry_size = (buf.len() - entry_start) as u32;
        (child_size, entry_size)
    }
}
