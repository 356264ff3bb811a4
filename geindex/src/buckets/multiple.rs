use bytes::BufMut;

use super::EntryBucket;
use crate::codec::{get_u16, get_u8};
use crate::entries::Entry;
use crate::errors::{GeIndexError, GeIndexResult};
use crate::filebundle::crc32;
use crate::quadtree::ENTRY_SLOTS_PER_BUCKET;

/// Entry bucket holding any number of entries per slot.
///
/// Encoded as `u16 count`, `[u8 slot, u16 entries]*count`, then the
/// entries of every listed slot in slot order.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedMultipleEntryBucket<E: Entry> {
    slots: Vec<Vec<E>>,
}

impl<E: Entry> Default for LoadedMultipleEntryBucket<E> {
    fn default() -> Self {
        Self {
            slots: vec![Vec::new(); ENTRY_SLOTS_PER_BUCKET],
        }
    }
}

impl<E: Entry> LoadedMultipleEntryBucket<E> {
    pub fn entry_count(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }
}

impl<E: Entry> EntryBucket for LoadedMultipleEntryBucket<E> {
    type Entry = E;
    const SLOTS_ARE_SINGLE: bool = false;

    fn load(payload: &[u8]) -> GeIndexResult<Self> {
        let mut bucket = Self::default();
        let mut buf = payload;
        let count = get_u16(&mut buf, "multiple bucket slot count")? as usize;
        if count > ENTRY_SLOTS_PER_BUCKET {
            return Err(GeIndexError::corruption(format!(
                "multiple entry bucket claims {} slots",
                count
            )));
        }

        let mut directory = Vec::with_capacity(count);
        for _ in 0..count {
            let slot = get_u8(&mut buf, "multiple bucket slot")? as usize;
            let entries = get_u16(&mut buf, "multiple bucket slot size")? as usize;
            if slot >= ENTRY_SLOTS_PER_BUCKET {
                return Err(GeIndexError::corruption(format!("entry slot {} out of range", slot)));
            }
            directory.push((slot, entries));
        }

        let total: usize = directory.iter().map(|(_, n)| n).sum();
        if buf.len() != total * E::PUSHED_SIZE {
            return Err(GeIndexError::corruption(format!(
                "multiple entry bucket holds {} entry bytes, expected {}",
                buf.len(),
                total * E::PUSHED_SIZE
            )));
        }
        for (slot, entries) in directory {
            for _ in 0..entries {
                bucket.slots[slot].push(E::pull(&mut buf)?);
            }
        }
        Ok(bucket)
    }

    fn serialize(&self, buf: &mut Vec<u8>) {
        let occupied: Vec<(usize, &Vec<E>)> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, entries)| !entries.is_empty())
            .collect();
        if occupied.is_empty() {
            return;
        }
        let start = buf.len();
        buf.put_u16_le(occupied.len() as u16);
        for (slot, entries) in &occupied {
            buf.put_u8(*slot as u8);
            buf.put_u16_le(entries.len() as u16);
        }
        for (_, entries) in &occupied {
            for entry in entries.iter() {
                entry.push(buf);
            }
        }
        let crc = crc32(&buf[start..]);
        buf.put_u32_le(crc);
    }

    fn put(&mut self, slot: usize, entry: E) {
        let entries = &mut self.slots[slot];
        match entries.iter().position(|existing| existing.write_matches(&entry)) {
            Some(index) if entry.is_delete() => {
                entries.remove(index);
            }
            Some(index) => entries[index] = entry,
            None if entry.is_delete() => {}
            None => entries.push(entry),
        }
    }

    fn is_empty(&self) -> bool {
        self.slots.iter().all(Vec::is_empty)
    }

    fn slot_entries(&self, slot: usize) -> &[E] {
        &self.slots[slot]
    }
}
