//! Object Header - Metadata for GC-managed objects
//!
//! Object Header Layout (32 bytes, little-endian words):
//! ┌─────────────────────────────────────────┐
//! │         Mark Word (8 bytes)             │
//! │  - Bit 0: Marked                        │
//! │  - Bit 1: Has finalizer                 │
//! │  - Bit 2: Finalized                     │
//! │  - Bit 3: Forwarded                     │
//! │  - Bits 8-11: Age (survived Gen0 GCs)   │
//! │  - Bits 12-15: Generation tag           │
//! ├─────────────────────────────────────────┤
//! │  Size class (4 bytes) | Type id (4)     │
//! ├─────────────────────────────────────────┤
//! │      Finalizer slot id (8 bytes)        │
//! ├─────────────────────────────────────────┤
//! │    Forwarding address (8 bytes)         │  <- only while Forwarded
//! └─────────────────────────────────────────┘
//!
//! The payload follows the header directly. Reference fields in the payload
//! are 8-byte addresses, 0 meaning null.

use super::type_info::TypeId;
use crate::config::SPACE_LIMIT;
use serde::Serialize;
use std::fmt;
use std::num::NonZeroU64;

/// Size of object header in bytes
pub const HEADER_SIZE: usize = 32;

/// Minimum object alignment (bytes)
pub const OBJECT_ALIGNMENT: usize = 8;

/// Mark word bit positions
pub const MARK_BIT: u64 = 0;
pub const FINALIZER_BIT: u64 = 1;
pub const FINALIZED_BIT: u64 = 2;
pub const FORWARDED_BIT: u64 = 3;
pub const AGE_SHIFT: u64 = 8;
pub const GENERATION_SHIFT: u64 = 12;

/// Masks for mark word fields
pub const MARK_MASK: u64 = 1 << MARK_BIT;
pub const FINALIZER_MASK: u64 = 1 << FINALIZER_BIT;
pub const FINALIZED_MASK: u64 = 1 << FINALIZED_BIT;
pub const FORWARDED_MASK: u64 = 1 << FORWARDED_BIT;
pub const AGE_MASK: u64 = 0b1111 << AGE_SHIFT;
pub const GENERATION_MASK: u64 = 0b1111 << GENERATION_SHIFT;

/// Largest age the header can hold
pub const MAX_AGE: u8 = 15;

/// Round a byte count up to the object alignment
#[inline]
pub const fn align_up(size: usize) -> usize {
    (size + OBJECT_ALIGNMENT - 1) & !(OBJECT_ALIGNMENT - 1)
}

/// Reference to a GC-managed object
///
/// An `ObjectRef` is the object's current heap address. It stays valid only
/// until the next collection; hold objects across collections through root
/// handles or a [`RootProvider`](crate::roots::RootProvider).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(NonZeroU64);

impl ObjectRef {
    /// Wrap a raw address. Returns `None` for null.
    #[inline]
    pub fn from_raw(address: u64) -> Option<Self> {
        NonZeroU64::new(address).map(ObjectRef)
    }

    /// Raw heap address
    #[inline]
    pub fn addr(self) -> u64 {
        self.0.get()
    }

    /// Space the address belongs to
    #[inline]
    pub fn generation(self) -> Option<Generation> {
        Generation::from_address(self.addr())
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({:#x})", self.addr())
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.addr())
    }
}

impl Serialize for ObjectRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.addr())
    }
}

/// Heap space an object lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Generation {
    /// Nursery, bump-allocated and compacted
    Gen0,
    /// Survivors promoted out of Gen0
    Gen1,
    /// Long-lived objects
    Gen2,
    /// Large object space, swept in place
    Large,
}

impl Generation {
    /// All spaces, youngest first
    pub const ALL: [Generation; 4] = [
        Generation::Gen0,
        Generation::Gen1,
        Generation::Gen2,
        Generation::Large,
    ];

    /// Age order used by the write barrier (larger is older)
    #[inline]
    pub fn rank(self) -> u8 {
        match self {
            Generation::Gen0 => 0,
            Generation::Gen1 => 1,
            Generation::Gen2 => 2,
            Generation::Large => 3,
        }
    }

    /// First address of the space's reserved range
    #[inline]
    pub fn base(self) -> u64 {
        (self.rank() as u64 + 1) * SPACE_LIMIT
    }

    /// Space that owns an address
    #[inline]
    pub fn from_address(address: u64) -> Option<Generation> {
        match address / SPACE_LIMIT {
            1 => Some(Generation::Gen0),
            2 => Some(Generation::Gen1),
            3 => Some(Generation::Gen2),
            4 => Some(Generation::Large),
            _ => None,
        }
    }

    fn from_tag(tag: u64) -> Generation {
        match tag {
            0 => Generation::Gen0,
            1 => Generation::Gen1,
            2 => Generation::Gen2,
            _ => Generation::Large,
        }
    }

    /// Space a survivor is promoted into. Gen2 and Large stay put.
    #[inline]
    pub fn older(self) -> Generation {
        match self {
            Generation::Gen0 => Generation::Gen1,
            Generation::Gen1 | Generation::Gen2 => Generation::Gen2,
            Generation::Large => Generation::Large,
        }
    }

    /// Index into per-space arrays
    #[inline]
    pub fn index(self) -> usize {
        self.rank() as usize
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Generation::Gen0 => write!(f, "gen0"),
            Generation::Gen1 => write!(f, "gen1"),
            Generation::Gen2 => write!(f, "gen2"),
            Generation::Large => write!(f, "loh"),
        }
    }
}

/// Object Header
///
/// Decoded copy of the 32 header bytes in front of every object. Mutate the
/// copy and `store` it back; the arena bytes are the source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    /// Mark word: flags, age and generation tag
    pub mark_word: u64,
    /// Payload size in bytes (multiple of 8)
    pub size: u32,
    /// Type descriptor id
    pub type_id: TypeId,
    /// Finalizer table slot, 0 when none is registered
    pub finalizer_slot: u64,
    /// New address while the object is forwarded
    pub forwarding: u64,
}

impl ObjectHeader {
    /// Create header for a freshly allocated, unmarked object
    pub fn new(type_id: TypeId, size: u32, generation: Generation, has_finalizer: bool) -> Self {
        let mut header = Self {
            mark_word: 0,
            size,
            type_id,
            finalizer_slot: 0,
            forwarding: 0,
        };
        header.set_generation(generation);
        header.set_flag(FINALIZER_MASK, has_finalizer);
        header
    }

    /// Decode the header stored at `offset`
    #[inline]
    pub fn load(bytes: &[u8], offset: usize) -> Self {
        let size_type = read_u64(bytes, offset + 8);
        Self {
            mark_word: read_u64(bytes, offset),
            size: size_type as u32,
            type_id: TypeId((size_type >> 32) as u32),
            finalizer_slot: read_u64(bytes, offset + 16),
            forwarding: read_u64(bytes, offset + 24),
        }
    }

    /// Encode the header at `offset`
    #[inline]
    pub fn store(&self, bytes: &mut [u8], offset: usize) {
        write_u64(bytes, offset, self.mark_word);
        write_u64(
            bytes,
            offset + 8,
            (self.size as u64) | ((self.type_id.0 as u64) << 32),
        );
        write_u64(bytes, offset + 16, self.finalizer_slot);
        write_u64(bytes, offset + 24, self.forwarding);
    }

    #[inline]
    fn flag(&self, mask: u64) -> bool {
        self.mark_word & mask != 0
    }

    #[inline]
    fn set_flag(&mut self, mask: u64, value: bool) {
        if value {
            self.mark_word |= mask;
        } else {
            self.mark_word &= !mask;
        }
    }

    // === Mark Bit ===

    #[inline]
    pub fn is_marked(&self) -> bool {
        self.flag(MARK_MASK)
    }

    #[inline]
    pub fn set_marked(&mut self, marked: bool) {
        self.set_flag(MARK_MASK, marked);
    }

    // === Finalization ===

    #[inline]
    pub fn has_finalizer(&self) -> bool {
        self.flag(FINALIZER_MASK)
    }

    #[inline]
    pub fn set_has_finalizer(&mut self, value: bool) {
        self.set_flag(FINALIZER_MASK, value);
    }

    #[inline]
    pub fn is_finalized(&self) -> bool {
        self.flag(FINALIZED_MASK)
    }

    #[inline]
    pub fn set_finalized(&mut self, value: bool) {
        self.set_flag(FINALIZED_MASK, value);
    }

    /// Unreachable objects in this state get resurrected for finalization
    #[inline]
    pub fn needs_finalization(&self) -> bool {
        self.has_finalizer() && !self.is_finalized()
    }

    // === Forwarding ===

    #[inline]
    pub fn is_forwarded(&self) -> bool {
        self.flag(FORWARDED_MASK)
    }

    #[inline]
    pub fn set_forwarding(&mut self, new_address: u64) {
        self.forwarding = new_address;
        self.set_flag(FORWARDED_MASK, true);
    }

    #[inline]
    pub fn clear_forwarding(&mut self) {
        self.forwarding = 0;
        self.set_flag(FORWARDED_MASK, false);
    }

    // === Age & Generation ===

    #[inline]
    pub fn age(&self) -> u8 {
        ((self.mark_word & AGE_MASK) >> AGE_SHIFT) as u8
    }

    #[inline]
    pub fn set_age(&mut self, age: u8) {
        let age = age.min(MAX_AGE) as u64;
        self.mark_word = (self.mark_word & !AGE_MASK) | (age << AGE_SHIFT);
    }

    #[inline]
    pub fn generation(&self) -> Generation {
        Generation::from_tag((self.mark_word & GENERATION_MASK) >> GENERATION_SHIFT)
    }

    #[inline]
    pub fn set_generation(&mut self, generation: Generation) {
        self.mark_word = (self.mark_word & !GENERATION_MASK)
            | ((generation.rank() as u64) << GENERATION_SHIFT);
    }

    // === Size ===

    /// Payload size in bytes
    #[inline]
    pub fn payload_size(&self) -> usize {
        self.size as usize
    }

    /// Header plus payload
    #[inline]
    pub fn block_size(&self) -> usize {
        HEADER_SIZE + self.size as usize
    }
}

#[inline]
pub(crate) fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(word)
}

#[inline]
pub(crate) fn write_u64(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
