//! Generational Policy - Collection targets and promotion
//!
//! Based on the observation that:
//! - Most objects die young
//! - Objects that survive tend to live long
//!
//! A collection condemns a prefix of the generations. Survivors age, and
//! once old enough move one generation up:
//!
//! ```text
//!            survive x2              survive
//!   Gen0 ─────────────────▶ Gen1 ──────────────▶ Gen2 ──▶ stays
//!   (age 0, 1 stay put)
//! ```
//!
//! Large objects never move and are only reclaimed by a `Full` collection.

use crate::object::{Generation, ObjectHeader};
use serde::Serialize;
use std::fmt;

/// Gen0 collections an object must survive before moving to Gen1
pub const GEN0_PROMOTION_AGE: u8 = 2;

/// Which generations a collection condemns
///
/// Collecting a generation always collects every younger one too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum CollectTarget {
    /// Gen0 only (minor collection)
    Gen0,
    /// Gen0 and Gen1
    Gen1,
    /// Gen0, Gen1 and Gen2; the large object space is left alone
    Gen2,
    /// Every space, large object space included
    Full,
}

impl CollectTarget {
    pub const ALL: [CollectTarget; 4] = [
        CollectTarget::Gen0,
        CollectTarget::Gen1,
        CollectTarget::Gen2,
        CollectTarget::Full,
    ];

    /// Spaces condemned by this target
    pub fn condemned(self) -> CondemnedSet {
        CondemnedSet::for_target(self)
    }

    #[inline]
    pub fn index(self) -> usize {
        match self {
            CollectTarget::Gen0 => 0,
            CollectTarget::Gen1 => 1,
            CollectTarget::Gen2 => 2,
            CollectTarget::Full => 3,
        }
    }
}

impl fmt::Display for CollectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectTarget::Gen0 => write!(f, "gen0"),
            CollectTarget::Gen1 => write!(f, "gen1"),
            CollectTarget::Gen2 => write!(f, "gen2"),
            CollectTarget::Full => write!(f, "full"),
        }
    }
}

/// Set of spaces condemned by one collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CondemnedSet {
    spaces: [bool; 4],
}

impl CondemnedSet {
    pub fn for_target(target: CollectTarget) -> Self {
        let spaces = match target {
            CollectTarget::Gen0 => [true, false, false, false],
            CollectTarget::Gen1 => [true, true, false, false],
            CollectTarget::Gen2 => [true, true, true, false],
            CollectTarget::Full => [true, true, true, true],
        };
        Self { spaces }
    }

    #[inline]
    pub fn contains(&self, generation: Generation) -> bool {
        self.spaces[generation.index()]
    }

    /// Check if the space owning `address` is condemned
    #[inline]
    pub fn contains_address(&self, address: u64) -> bool {
        Generation::from_address(address).is_some_and(|g| self.contains(g))
    }

    /// Condemned bump-allocated generations, oldest first
    pub fn arenas_oldest_first(&self) -> Vec<Generation> {
        [Generation::Gen2, Generation::Gen1, Generation::Gen0]
            .into_iter()
            .filter(|g| self.contains(*g))
            .collect()
    }
}

/// Where a surviving object goes and the age it carries there
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub generation: Generation,
    pub age: u8,
}

impl Placement {
    /// Check if the survivor leaves its current space
    pub fn is_promotion(&self, from: Generation) -> bool {
        self.generation != from
    }
}

/// PromotionPolicy - decides survivor placement
#[derive(Debug, Clone, Copy)]
pub struct PromotionPolicy {
    gen0_promotion_age: u8,
}

impl PromotionPolicy {
    pub fn new() -> Self {
        Self {
            gen0_promotion_age: GEN0_PROMOTION_AGE,
        }
    }

    /// Placement of an object in `from` that survived a collection
    pub fn place(&self, from: Generation, header: &ObjectHeader) -> Placement {
        match from {
            Generation::Gen0 => {
                let age = header.age().saturating_add(1);
                if age >= self.gen0_promotion_age {
                    Placement {
                        generation: Generation::Gen1,
                        age: 0,
                    }
                } else {
                    Placement {
                        generation: Generation::Gen0,
                        age,
                    }
                }
            }
            Generation::Gen1 => Placement {
                generation: Generation::Gen2,
                age: 0,
            },
            other => Placement {
                generation: other,
                age: header.age(),
            },
        }
    }
}

impl Default for PromotionPolicy {
    fn default() -> Self {
        Self::new()
    }
}
