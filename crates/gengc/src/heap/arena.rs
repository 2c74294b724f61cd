//! Heap Submodule - Generation Arenas
//!
//! Gen0, Gen1 and Gen2 each own one contiguous, bump-allocated arena.
//! Objects are laid out back to back, so the arena can be walked linearly
//! from offset 0 up to the bump pointer.
//!
//! ```text
//! base                                 alloc_ptr            capacity
//! │ hdr │ payload │ hdr │ payload │ ... │      free          │
//! └─────┴─────────┴─────┴─────────┴─────┴────────────────────┘
//! ```
//!
//! Compaction slides survivors toward offset 0 and lowers the bump pointer;
//! the freed tail is zeroed so fresh allocations start with zeroed payloads.
//! A start bitmap records where each object begins; compaction rebuilds it
//! once survivors are in place.

use super::bitmap::StartBitmap;
use crate::config::SPACE_LIMIT;
use crate::error::{GcError, Result};
use crate::object::{align_up, Generation, ObjectHeader, HEADER_SIZE, OBJECT_ALIGNMENT};

/// GenerationArena - bump pointer arena backing one generation
pub struct GenerationArena {
    generation: Generation,
    bytes: Vec<u8>,
    alloc_ptr: usize,
    starts: StartBitmap,
}

impl GenerationArena {
    /// Create arena with `capacity` zeroed bytes
    pub fn new(generation: Generation, capacity: usize) -> Self {
        let capacity = align_up(capacity);
        Self {
            generation,
            bytes: vec![0; capacity],
            alloc_ptr: 0,
            starts: StartBitmap::new(capacity),
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Address of offset 0
    #[inline]
    pub fn base(&self) -> u64 {
        self.generation.base()
    }

    /// Bytes handed out so far
    #[inline]
    pub fn used(&self) -> usize {
        self.alloc_ptr
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.alloc_ptr
    }

    /// Bump `block_size` bytes. Returns the block offset, or `None` when the
    /// arena is full.
    #[inline]
    pub fn try_bump(&mut self, block_size: usize) -> Option<usize> {
        debug_assert_eq!(block_size % OBJECT_ALIGNMENT, 0);
        let offset = self.alloc_ptr;
        let new_top = offset.checked_add(block_size)?;
        if new_top > self.bytes.len() {
            return None;
        }
        self.alloc_ptr = new_top;
        self.starts.set(offset);
        Some(offset)
    }

    /// Grow committed capacity to at least `min_capacity` bytes
    ///
    /// Capacity at least doubles so repeated growth stays amortized.
    pub fn ensure_capacity(&mut self, min_capacity: usize) -> Result<()> {
        if min_capacity <= self.bytes.len() {
            return Ok(());
        }
        if min_capacity as u64 > SPACE_LIMIT {
            return Err(GcError::OutOfMemory {
                requested: min_capacity,
                available: SPACE_LIMIT as usize - self.alloc_ptr,
            });
        }

        let doubled = (self.bytes.len() * 2).min(SPACE_LIMIT as usize);
        let new_capacity = align_up(min_capacity.max(doubled));
        log::debug!(
            "{} arena grows from {} to {} bytes",
            self.generation,
            self.bytes.len(),
            new_capacity
        );
        self.bytes.resize(new_capacity, 0);
        self.starts.resize(new_capacity);
        Ok(())
    }

    /// Move the bump pointer to `new_top` after compaction or promotion
    ///
    /// Bytes between a lowered pointer and the old one are zeroed. Object
    /// starts are not updated; call `rebuild_starts` once the moved objects
    /// are in place.
    pub fn set_alloc_ptr(&mut self, new_top: usize) {
        debug_assert!(new_top <= self.bytes.len());
        if new_top < self.alloc_ptr {
            self.bytes[new_top..self.alloc_ptr].fill(0);
        }
        self.alloc_ptr = new_top;
    }

    /// Re-record object starts in `[start, alloc_ptr)` by walking headers
    ///
    /// `start` must be an object boundary.
    pub fn rebuild_starts(&mut self, start: usize) {
        self.starts.clear_from(start);
        let mut offset = start;
        while offset < self.alloc_ptr {
            self.starts.set(offset);
            offset += self.header(offset).block_size();
        }
    }

    /// Number of recorded object starts
    pub fn start_count(&self) -> usize {
        self.starts.count()
    }

    /// Check whether `address` falls in the allocated part of the arena
    #[inline]
    pub fn contains(&self, address: u64) -> bool {
        address >= self.base() && address < self.base() + self.alloc_ptr as u64
    }

    #[inline]
    pub fn offset_of(&self, address: u64) -> usize {
        (address - self.base()) as usize
    }

    #[inline]
    pub fn address_of(&self, offset: usize) -> u64 {
        self.base() + offset as u64
    }

    /// Check that `address` starts an object
    ///
    /// The offset must be a recorded start, and the header there must
    /// describe a block that ends at or before the bump pointer.
    pub fn is_object_start(&self, address: u64) -> bool {
        if !self.contains(address) || address % OBJECT_ALIGNMENT as u64 != 0 {
            return false;
        }
        let offset = self.offset_of(address);
        if offset + HEADER_SIZE > self.alloc_ptr || !self.starts.is_set(offset) {
            return false;
        }
        let header = self.header(offset);
        header.size as usize % OBJECT_ALIGNMENT == 0
            && offset + header.block_size() <= self.alloc_ptr
            && header.generation() == self.generation
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

    /// Offsets of every object below the bump pointer, in address order
    pub fn object_offsets(&self) -> Vec<usize> {
        self.object_offsets_from(0)
    }

    /// Offsets of every object in `[start, alloc_ptr)`
    pub fn object_offsets_from(&self, start: usize) -> Vec<usize> {
        let mut offsets = Vec::new();
        let mut offset = start;
        while offset < self.alloc_ptr {
            offsets.push(offset);
            offset += self.header(offset).block_size();
        }
        offsets
    }
}
