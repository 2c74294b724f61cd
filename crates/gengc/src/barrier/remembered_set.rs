//! Remembered Set - old-to-young holders
//!
//! Records objects in an older space that hold a reference into a younger
//! space. A minor collection scans the fields of every remembered holder
//! that is not itself being collected, treating them as extra roots.
//!
//! Entries are holder addresses, deduplicated on insert. The set is rebuilt
//! from scratch at the end of every collection, so stale entries never
//! outlive one cycle.

use crate::object::{Generation, ObjectRef};
use indexmap::IndexSet;

/// RememberedSet - deduplicated holder addresses
#[derive(Default)]
pub struct RememberedSet {
    holders: IndexSet<u64>,
}

impl RememberedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `holder`. Returns `true` if it was not already present.
    #[inline]
    pub fn insert(&mut self, holder: ObjectRef) -> bool {
        self.holders.insert(holder.addr())
    }

    #[inline]
    pub fn contains(&self, holder: ObjectRef) -> bool {
        self.holders.contains(&holder.addr())
    }

    /// Holders that live outside the condemned spaces
    pub fn holders_outside(&self, condemned: impl Fn(Generation) -> bool) -> Vec<u64> {
        self.holders
            .iter()
            .copied()
            .filter(|addr| Generation::from_address(*addr).is_some_and(|g| !condemned(g)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.holders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }

    pub fn clear(&mut self) {
        self.holders.clear();
    }
}
