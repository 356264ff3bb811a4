use bytes::BufMut;

use super::{should_store_singles_sparsely, EntryBucket};
use crate::codec::{get_u16, get_u8};
use crate::entries::Entry;
use crate::errors::{GeIndexError, GeIndexResult};
use crate::filebundle::crc32;
use crate::quadtree::ENTRY_SLOTS_PER_BUCKET;

/// Entry bucket holding at most one entry per slot.
///
/// Encoded as `u16 count` followed by either the sparse form
/// `[u8 slot]*count [entry]*count` or the full form `[entry]*85`, whichever
/// is smaller. Empty slots of the full form are stored as absent entries.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedSingleEntryBucket<E: Entry> {
    slots: Vec<Option<E>>,
}

impl<E: Entry> Default for LoadedSingleEntryBucket<E> {
    fn default() -> Self {
        Self {
            slots: vec![None; ENTRY_SLOTS_PER_BUCKET],
        }
    }
}

impl<E: Entry> LoadedSingleEntryBucket<E> {
    fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    fn full_size() -> usize {
        2 + ENTRY_SLOTS_PER_BUCKET * E::PUSHED_SIZE
    }

    pub fn get(&self, slot: usize) -> Option<&E> {
        self.slots.get(slot).and_then(Option::as_ref)
    }
}

impl<E: Entry> EntryBucket for LoadedSingleEntryBucket<E> {
    type Entry = E;
    const SLOTS_ARE_SINGLE: bool = true;

    fn load(payload: &[u8]) -> GeIndexResult<Self> {
        let mut bucket = Self::default();
        let mut buf = payload;
        let count = get_u16(&mut buf, "single bucket slot count")? as usize;
        if count > ENTRY_SLOTS_PER_BUCKET {
            return Err(GeIndexError::corruption(format!(
                "single entry bucket claims {} slots",
                count
            )));
        }

        if payload.len() == Self::full_size() {
            for slot in 0..ENTRY_SLOTS_PER_BUCKET {
                let entry = E::pull(&mut buf)?;
                if !entry.is_delete() {
                    bucket.slots[slot] = Some(entry);
                }
            }
        } else {
            let expected = 2 + count * (1 + E::PUSHED_SIZE);
            if payload.len() != expected {
                return Err(GeIndexError::corruption(format!(
                    "single entry bucket of {} bytes, expected {} for {} slots",
                    payload.len(),
                    expected,
                    count
                )));
            }
            let mut slot_ids = Vec::with_capacity(count);
            for _ in 0..count {
                let slot = get_u8(&mut buf, "single bucket slot")? as usize;
                if slot >= ENTRY_SLOTS_PER_BUCKET {
                    return Err(GeIndexError::corruption(format!("entry slot {} out of range", slot)));
                }
                slot_ids.push(slot);
            }
            for slot in slot_ids {
                bucket.slots[slot] = Some(E::pull(&mut buf)?);
            }
        }
        Ok(bucket)
    }

    fn serialize(&self, buf: &mut Vec<u8>) {
        let count = self.occupied();
        if count == 0 {
            return;
        }
        let start = buf.len();
        buf.put_u16_le(count as u16);
        if should_store_singles_sparsely(E::PUSHED_SIZE, count) {
            for (slot, entry) in self.slots.iter().enumerate() {
                if entry.is_some() {
                    buf.put_u8(slot as u8);
                }
            }
            for entry in self.slots.iter().flatten() {
                entry.push(buf);
            }
        } else {
            for entry in &self.slots {
                match entry {
                    Some(entry) => entry.push(buf),
                    None => buf.put_bytes(0, E::PUSHED_SIZE),
                }
            }
        }
        let crc = crc32(&buf[start..]);
        buf.put_u32_le(crc);
    }

    fn put(&mut self, slot: usize, entry: E) {
        self.slots[slot] = if entry.is_delete() { None } else { Some(entry) };
    }

    fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    fn slot_entries(&self, slot: usize) -> &[E] {
        self.slots[slot].as_slice()
    }
}
