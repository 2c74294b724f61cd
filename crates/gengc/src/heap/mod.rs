//! Heap Management Module - Generational Spaces
//!
//! The heap is split into four spaces, each with its own reserved address
//! range so an address alone tells which space owns it:
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────────┬──────────────┐
//! │    Gen0      │    Gen1      │    Gen2      │    Large     │
//! │ 0x1_0000_0000│ 0x2_0000_0000│ 0x3_0000_0000│ 0x4_0000_0000│
//! │ bump, moved  │ bump, moved  │ bump, moved  │ free list,   │
//! │              │              │              │ never moved  │
//! └──────────────┴──────────────┴──────────────┴──────────────┘
//! ```
//!
//! The heap only stores bytes. Policy (when to collect, where survivors go)
//! lives in the allocator and collector.

pub mod arena;
pub mod bitmap;
pub mod large;

pub use arena::GenerationArena;
pub use bitmap::StartBitmap;
pub use large::{LargeObjectSpace, LARGE_ALIGNMENT};

use crate::error::{GcError, Result};
use crate::object::header::{read_u64, write_u64};
use crate::object::{Generation, ObjectHeader, ObjectRef, HEADER_SIZE};

/// Heap - container for all generation spaces
pub struct Heap {
    /// Gen0, Gen1, Gen2 arenas, indexed by `Generation::index`
    arenas: [GenerationArena; 3],

    large: LargeObjectSpace,

    /// Hard limit on bytes in use across all spaces
    max_size: usize,
}

impl Heap {
    /// Create heap with a `gen0_size` nursery and a `max_size` limit
    ///
    /// Older arenas start empty and grow as survivors are promoted.
    pub fn new(gen0_size: usize, max_size: usize) -> Self {
        Self {
            arenas: [
                GenerationArena::new(Generation::Gen0, gen0_size),
                GenerationArena::new(Generation::Gen1, 0),
                GenerationArena::new(Generation::Gen2, 0),
            ],
            large: LargeObjectSpace::new(),
            max_size,
        }
    }

    // === Spaces ===

    /// Arena of a bump-allocated generation
    ///
    /// # Panics
    /// Panics for `Generation::Large`, which has no arena.
    #[inline]
    pub fn arena(&self, generation: Generation) -> &GenerationArena {
        &self.arenas[generation.index()]
    }

    #[inline]
    pub fn arena_mut(&mut self, generation: Generation) -> &mut GenerationArena {
        &mut self.arenas[generation.index()]
    }

    /// Disjoint mutable access to a generation and the one it promotes into
    pub fn arena_pair_mut(
        &mut self,
        from: Generation,
        to: Generation,
    ) -> (&mut GenerationArena, &mut GenerationArena) {
        debug_assert!(from.index() < to.index() && to.index() < 3);
        let (low, high) = self.arenas.split_at_mut(to.index());
        (&mut low[from.index()], &mut high[0])
    }

    #[inline]
    pub fn large(&self) -> &LargeObjectSpace {
        &self.large
    }

    #[inline]
    pub fn large_mut(&mut self) -> &mut LargeObjectSpace {
        &mut self.large
    }

    // === Accounting ===

    /// Bytes in use by one space
    pub fn used_in(&self, generation: Generation) -> usize {
        match generation {
            Generation::Large => self.large.used(),
            generation => self.arena(generation).used(),
        }
    }

    /// Bytes in use across every space
    pub fn used_bytes(&self) -> usize {
        Generation::ALL.iter().map(|g| self.used_in(*g)).sum()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Bytes that can still be allocated before hitting `max_size`
    pub fn headroom(&self) -> usize {
        self.max_size.saturating_sub(self.used_bytes())
    }

    // === Object Access ===

    /// Check that `address` names an object start in some space
    pub fn is_object(&self, address: u64) -> bool {
        match Generation::from_address(address) {
            Some(Generation::Large) => self.large.is_object_start(address),
            Some(generation) => self.arena(generation).is_object_start(address),
            None => false,
        }
    }

    /// Validate a mutator-supplied reference
    pub fn check(&self, obj: ObjectRef) -> Result<Generation> {
        match obj.generation() {
            Some(generation) if self.is_object(obj.addr()) => Ok(generation),
            _ => Err(GcError::InvalidObject { address: obj.addr() }),
        }
    }

    /// Space bytes and header offset of an object
    #[inline]
    fn locate(&self, address: u64) -> (&[u8], usize) {
        match Generation::from_address(address) {
            Some(Generation::Large) => (self.large.bytes(), self.large.offset_of(address)),
            Some(generation) => {
                let arena = self.arena(generation);
                (arena.bytes(), arena.offset_of(address))
            }
            None => (&[], 0),
        }
    }

    #[inline]
    fn locate_mut(&mut self, address: u64) -> (&mut [u8], usize) {
        match Generation::from_address(address) {
            Some(Generation::Large) => {
                let offset = self.large.offset_of(address);
                (self.large.bytes_mut(), offset)
            }
            Some(generation) => {
                let arena = self.arena_mut(generation);
                let offset = arena.offset_of(address);
                (arena.bytes_mut(), offset)
            }
            None => (&mut [], 0),
        }
    }

    /// Header of the object at `address`
    ///
    /// The address must have passed `is_object`.
    #[inline]
    pub fn header(&self, address: u64) -> ObjectHeader {
        let (bytes, offset) = self.locate(address);
        ObjectHeader::load(bytes, offset)
    }

    #[inline]
    pub fn set_header(&mut self, address: u64, header: &ObjectHeader) {
        let (bytes, offset) = self.locate_mut(address);
        header.store(bytes, offset);
    }

    /// Read the 8-byte payload word at `offset`
    #[inline]
    pub fn read_word(&self, address: u64, offset: usize) -> u64 {
        let (bytes, start) = self.locate(address);
        read_u64(bytes, start + HEADER_SIZE + offset)
    }

    /// Write the 8-byte payload word at `offset`
    #[inline]
    pub fn write_word(&mut self, address: u64, offset: usize, value: u64) {
        let (bytes, start) = self.locate_mut(address);
        write_u64(bytes, start + HEADER_SIZE + offset, value);
    }

    /// Payload bytes `[offset, offset + len)`
    pub fn payload(&self, address: u64, offset: usize, len: usize) -> &[u8] {
        let (bytes, start) = self.locate(address);
        let begin = start + HEADER_SIZE + offset;
        &bytes[begin..begin + len]
    }

    pub fn payload_mut(&mut self, address: u64, offset: usize, len: usize) -> &mut [u8] {
        let (bytes, start) = self.locate_mut(address);
        let begin = start + HEADER_SIZE + offset;
        &mut bytes[begin..begin + len]
    }

    /// Addresses of every object in a space, in address order
    pub fn objects_in(&self, generation: Generation) -> Vec<u64> {
        match generation {
            Generation::Large => self
                .large
                .object_offsets()
                .into_iter()
                .map(|offset| self.large.address_of(offset))
                .collect(),
            generation => {
                let arena = self.arena(generation);
                arena
                    .object_offsets()
                    .into_iter()
                    .map(|offset| arena.address_of(offset))
                    .collect()
            }
        }
    }

    /// Number of objects in a space
    pub fn object_count(&self, generation: Generation) -> usize {
        match generation {
            Generation::Large => self.large.object_count(),
            generation => self.arena(generation).object_offsets().len(),
        }
    }

    // === Allocation ===

    /// Bump-allocate a block in Gen0 and write its header
    ///
    /// Returns `None` when Gen0 has no room.
    pub fn try_allocate_small(&mut self, header: ObjectHeader) -> Option<ObjectRef> {
        let arena = &mut self.arenas[Generation::Gen0.index()];
        let offset = arena.try_bump(header.block_size())?;
        arena.set_header(offset, &header);
        ObjectRef::from_raw(arena.address_of(offset))
    }

    /// Allocate a block in the large object space and write its header
    pub fn allocate_large(&mut self, header: ObjectHeader) -> Result<ObjectRef> {
        let offset = self.large.allocate(header.block_size())?;
        self.large.set_header(offset, &header);
        let address = self.large.address_of(offset);
        ObjectRef::from_raw(address).ok_or(GcError::Internal(format!(
            "large object space produced null address for offset {}",
            offset
        )))
    }

    /// Grow Gen0 so at least `block_size` more bytes fit
    ///
    /// Returns the old and new capacity.
    pub fn grow_gen0(&mut self, block_size: usize) -> Result<(usize, usize)> {
        let arena = &mut self.arenas[Generation::Gen0.index()];
        let old_capacity = arena.capacity();
        arena.ensure_capacity(arena.used() + block_size)?;
        Ok((old_capacity, arena.capacity()))
    }
}
