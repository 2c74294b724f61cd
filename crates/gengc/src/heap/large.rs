//! Large Object Space
//!
//! Objects with a payload above `GcConfig::large_object_threshold` live here.
//! Large objects are never moved: a full collection sweeps dead blocks into
//! a free list and later allocations reuse them.
//!
//! Strategy:
//! - Blocks are page aligned to limit fragmentation
//! - First fit over the free list, remainder split off
//! - Freed blocks coalesce with free neighbours
//! - A free block touching the end of the space is returned to the bump tail

use crate::error::{GcError, Result};
use crate::object::{Generation, ObjectHeader};
use std::collections::BTreeMap;

/// Alignment of large object blocks
pub const LARGE_ALIGNMENT: usize = 4096;

/// LargeObjectSpace - non-moving space for large objects
pub struct LargeObjectSpace {
    bytes: Vec<u8>,

    /// Live blocks: offset -> block size
    allocated: BTreeMap<usize, usize>,

    /// Free blocks below `top`: offset -> block size
    free_blocks: BTreeMap<usize, usize>,

    /// End of the highest block ever handed out
    top: usize,

    /// Bytes in live blocks
    used: usize,
}

impl LargeObjectSpace {
    pub fn new() -> Self {
        Self {
            bytes: Vec::new(),
            allocated: BTreeMap::new(),
            free_blocks: BTreeMap::new(),
            top: 0,
            used: 0,
        }
    }

    /// Block size reserved for an object of `object_size` bytes
    #[inline]
    pub fn block_size_for(object_size: usize) -> usize {
        (object_size + LARGE_ALIGNMENT - 1) & !(LARGE_ALIGNMENT - 1)
    }

    /// Reserve a zeroed block for an object of `object_size` bytes
    ///
    /// Returns the block offset.
    pub fn allocate(&mut self, object_size: usize) -> Result<usize> {
        let size = Self::block_size_for(object_size);

        let offset = match self.take_free_block(size) {
            Some(offset) => offset,
            None => self.bump(size)?,
        };

        self.bytes[offset..offset + size].fill(0);
        self.allocated.insert(offset, size);
        self.used += size;
        Ok(offset)
    }

    /// Release the block at `offset`
    pub fn free(&mut self, offset: usize) -> Result<usize> {
        let size = self
            .allocated
            .remove(&offset)
            .ok_or(GcError::InvalidObject {
                address: self.address_of(offset),
            })?;
        self.used -= size;
        self.insert_free_block(offset, size);
        Ok(size)
    }

    fn take_free_block(&mut self, size: usize) -> Option<usize> {
        let (&offset, &block) = self.free_blocks.iter().find(|(_, block)| **block >= size)?;
        self.free_blocks.remove(&offset);
        if block > size {
            self.free_blocks.insert(offset + size, block - size);
        }
        Some(offset)
    }

    fn bump(&mut self, size: usize) -> Result<usize> {
        let offset = self.top;
        let new_top = offset + size;
        if new_top as u64 > crate::config::SPACE_LIMIT {
            return Err(GcError::OutOfMemory {
                requested: size,
                available: crate::config::SPACE_LIMIT as usize - self.top,
            });
        }
        if new_top > self.bytes.len() {
            self.bytes.resize(new_top, 0);
        }
        self.top = new_top;
        Ok(offset)
    }

    fn insert_free_block(&mut self, mut offset: usize, mut size: usize) {
        // Merge with the block just below
        if let Some((&prev, &prev_size)) = self.free_blocks.range(..offset).next_back() {
            if prev + prev_size == offset {
                self.free_blocks.remove(&prev);
                offset = prev;
                size += prev_size;
            }
        }

        // Merge with the block just above
        if let Some(&next_size) = self.free_blocks.get(&(offset + size)) {
            self.free_blocks.remove(&(offset + size));
            size += next_size;
        }

        if offset + size == self.top {
            self.top = offset;
            self.bytes.truncate(self.top);
        } else {
            self.free_blocks.insert(offset, size);
        }
    }

    #[inline]
    pub fn address_of(&self, offset: usize) -> u64 {
        Generation::Large.base() + offset as u64
    }

    #[inline]
    pub fn offset_of(&self, address: u64) -> usize {
        (address - Generation::Large.base()) as usize
    }

    /// Check that `address` is the start of a live large block
    pub fn is_object_start(&self, address: u64) -> bool {
        address >= Generation::Large.base() && self.allocated.contains_key(&self.offset_of(address))
    }

    /// Check whether `address` falls inside any live block
    pub fn contains(&self, address: u64) -> bool {
        if address < Generation::Large.base() {
            return false;
        }
        let offset = self.offset_of(address);
        self.allocated
            .range(..=offset)
            .next_back()
            .is_some_and(|(start, size)| offset < start + size)
    }

    #[inline]
    pub fn header(&self, offset: usize) -> ObjectHeader {
        ObjectHeader::load(&self.bytes, offset)
    }

    #[inline]
    pub fn set_header(&mut self, offset: usize, header: &ObjectHeader) {
        header.store(&mut self.bytes, offset);
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Offsets of every live block, in address order
    pub fn object_offsets(&self) -> Vec<usize> {
        self.allocated.keys().copied().collect()
    }

    /// Bytes in live blocks
    pub fn used(&self) -> usize {
        self.used
    }

    pub fn object_count(&self) -> usize {
        self.allocated.len()
    }

    /// Free list summary: (block count, total bytes)
    pub fn free_block_stats(&self) -> (usize, usize) {
        (self.free_blocks.len(), self.free_blocks.values().sum())
    }

    /// Bytes backing the space, free blocks included
    pub fn committed(&self) -> usize {
        self.bytes.len()
    }
}

impl Default for LargeObjectSpace {
    fn default() -> Self {
        Self::new()
    }
}
