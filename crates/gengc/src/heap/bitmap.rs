//! Start Bitmap - Exact Object Boundaries
//!
//! One bit per 8-byte granule of an arena. A set bit means an object header
//! starts at that offset. Header bytes alone cannot tell a real object from a
//! zeroed payload word, so reference validation consults this map.
//!
//! ```text
//! Arena offset:  0      56     112
//!                │ obj  │ obj  │ free ...
//! Bit index:     0      7      14
//! ```

use crate::object::OBJECT_ALIGNMENT;

/// StartBitmap - one bit per aligned granule of an arena
#[derive(Debug, Clone, Default)]
pub struct StartBitmap {
    /// 64 granules per word
    bits: Vec<u64>,
}

impl StartBitmap {
    /// Create a bitmap covering `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            bits: vec![0; Self::words_for(capacity)],
        }
    }

    fn words_for(capacity: usize) -> usize {
        capacity.div_ceil(OBJECT_ALIGNMENT).div_ceil(64)
    }

    #[inline]
    fn indices(offset: usize) -> (usize, usize) {
        let granule = offset / OBJECT_ALIGNMENT;
        (granule / 64, granule % 64)
    }

    /// Cover at least `capacity` bytes, keeping existing bits
    pub fn resize(&mut self, capacity: usize) {
        let words = Self::words_for(capacity);
        if words > self.bits.len() {
            self.bits.resize(words, 0);
        }
    }

    /// Record an object start at `offset`
    #[inline]
    pub fn set(&mut self, offset: usize) {
        let (word, bit) = Self::indices(offset);
        if let Some(word) = self.bits.get_mut(word) {
            *word |= 1 << bit;
        }
    }

    #[inline]
    pub fn is_set(&self, offset: usize) -> bool {
        let (word, bit) = Self::indices(offset);
        self.bits.get(word).is_some_and(|word| word & (1 << bit) != 0)
    }

    /// Clear every bit at or above `offset`
    pub fn clear_from(&mut self, offset: usize) {
        let (word, bit) = Self::indices(offset);
        if let Some(first) = self.bits.get_mut(word) {
            *first &= (1u64 << bit) - 1;
        }
        for rest in self.bits.iter_mut().skip(word + 1) {
            *rest = 0;
        }
    }

    /// Number of recorded starts
    pub fn count(&self) -> usize {
        self.bits.iter().map(|word| word.count_ones() as usize).sum()
    }
}
