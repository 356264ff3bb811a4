//! Block cache in front of segment reads.
//!
//! Reads are served from aligned blocks of `block_size` bytes. A request
//! that touches more than two blocks bypasses the cache. Eviction removes
//! the least recently touched block. The accessor is single-owner; share it
//! behind a mutex.

use std::collections::HashMap;
use std::io;

use super::Segment;
use crate::config::CachedReadConfig;
use crate::errors::{GeIndexError, GeIndexResult};

/// Identity of a cached block: segment plus block-aligned offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockAddress {
    pub segment_id: u32,
    pub offset: u64,
}

struct CachedBlock {
    buffer: Vec<u8>,
    last_access: u64,
}

pub struct CachedReadAccessor {
    config: CachedReadConfig,
    blocks: HashMap<BlockAddress, CachedBlock>,
    tick: u64,
    stats_bytes_read: u64,
    stats_disk_accesses: u64,
}

impl CachedReadAccessor {
    pub fn new(config: CachedReadConfig) -> GeIndexResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            blocks: HashMap::with_capacity(config.max_blocks),
            tick: 0,
            stats_bytes_read: 0,
            stats_disk_accesses: 0,
        })
    }

    pub fn config(&self) -> CachedReadConfig {
        self.config
    }

    /// Fills `buf` with the bytes of `segment` starting at `offset`.
    pub fn pread(&mut self, segment: &Segment, buf: &mut [u8], offset: u64) -> GeIndexResult<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let block_size = self.config.block_size;
        let first_block = offset / block_size * block_size;
        let last_block = (offset + buf.len() as u64 - 1) / block_size * block_size;
        let block_count = (last_block - first_block) / block_size + 1;

        if block_count > 2 {
            segment.pread(buf, offset)?;
            self.stats_disk_accesses += 1;
            self.stats_bytes_read += buf.len() as u64;
            return Ok(());
        }

        let mut copied = 0usize;
        let mut block_offset = first_block;
        while block_offset <= last_block {
            let address = BlockAddress {
                segment_id: segment.id(),
                offset: block_offset,
            };
            let block = self.touch_block(segment, address)?;

            let start = (offset + copied as u64 - block_offset) as usize;
            let wanted = (buf.len() - copied).min(block_size as usize - start);
            if start + wanted > block.len() {
                return Err(GeIndexError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "read of {} bytes at {} runs past the end of {:?}",
                        buf.len(),
                        offset,
                        segment.path()
                    ),
                )));
            }
            buf[copied..copied + wanted].copy_from_slice(&block[start..start + wanted]);
            copied += wanted;
            block_offset += block_size;
        }
        Ok(())
    }

    /// Returns the block at `address`, loading it on a miss.
    fn touch_block(&mut self, segment: &Segment, address: BlockAddress) -> GeIndexResult<&[u8]> {
        self.tick += 1;
        let tick = self.tick;

        if !self.blocks.contains_key(&address) {
            let mut buffer = vec![0u8; self.config.block_size as usize];
            let read = segment.pread_partial(&mut buffer, address.offset)?;
            buffer.truncate(read);
            self.stats_disk_accesses += 1;
            self.stats_bytes_read += self.config.block_size;

            if self.blocks.len() >= self.config.max_blocks {
                self.evict_oldest();
            }
            self.blocks.insert(
                address,
                CachedBlock {
                    buffer,
                    last_access: tick,
                },
            );
        }

        let block = self
            .blocks
            .get_mut(&address)
            .ok_or_else(|| GeIndexError::usage("cached block vanished"))?;
        block.last_access = tick;
        Ok(&block.buffer)
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .blocks
            .iter()
            .min_by_key(|(_, block)| block.last_access)
            .map(|(address, _)| *address);
        if let Some(address) = oldest {
            self.blocks.remove(&address);
        }
    }

    pub fn contains(&self, address: &BlockAddress) -> bool {
        self.blocks.contains_key(address)
    }

    pub fn cached_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Bytes requested from disk. Block fetches count a whole block even
    /// when clamped at the end of the segment.
    pub fn stats_bytes_read(&self) -> u64 {
        self.stats_bytes_read
    }

    pub fn stats_disk_accesses(&self) -> u64 {
        self.stats_disk_accesses
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
    }
}
