//! Weak References Support
//!
//! Weak handles refer to objects without keeping them alive. They are not
//! roots. When the referent dies the handle's slot is cleared and it resolves
//! to `None` from then on; a cleared slot is never repointed.
//!
//! Use Cases:
//! - Caches (don't prevent object collection)
//! - Observer lists (listeners that can be collected)
//! - Canonicalization maps
//!
//! Processed after finalization resurrection, so a referent kept alive only
//! for its finalizer stays resolvable until it is actually freed.

use super::header::ObjectRef;
use crate::error::{GcError, Result};
use rustc_hash::FxHashMap;
use std::fmt;

/// Caller-visible, stable id of a weak table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WeakHandle(u64);

impl WeakHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WeakHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "weak#{}", self.0)
    }
}

/// What a collection decided about a weak referent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferentStatus {
    /// Survived, possibly at a new address
    Live(ObjectRef),
    /// Reclaimed this cycle
    Dead,
    /// Not part of the condemned spaces
    Untouched,
}

/// WeakHandleTable - handle id to nullable object slot
pub struct WeakHandleTable {
    slots: FxHashMap<u64, Option<ObjectRef>>,
    next_id: u64,
    cleared_total: u64,
}

impl WeakHandleTable {
    pub fn new() -> Self {
        Self {
            slots: FxHashMap::default(),
            next_id: 1,
            cleared_total: 0,
        }
    }

    /// Create weak handle to `target`
    pub fn create(&mut self, target: ObjectRef) -> WeakHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.slots.insert(id, Some(target));
        WeakHandle(id)
    }

    /// Current referent, or `None` once it has been collected
    pub fn resolve(&self, handle: WeakHandle) -> Result<Option<ObjectRef>> {
        self.slots
            .get(&handle.0)
            .copied()
            .ok_or(GcError::InvalidHandle(handle.0))
    }

    /// Release the entry. Later lookups fail with `InvalidHandle`.
    pub fn free(&mut self, handle: WeakHandle) -> Result<()> {
        self.slots
            .remove(&handle.0)
            .map(|_| ())
            .ok_or(GcError::InvalidHandle(handle.0))
    }

    /// Apply a collection's verdict to every live slot
    ///
    /// Returns the number of slots cleared.
    pub fn process(&mut self, mut status: impl FnMut(ObjectRef) -> ReferentStatus) -> usize {
        let mut cleared = 0;

        for slot in self.slots.values_mut() {
            let Some(target) = *slot else { continue };
            match status(target) {
                ReferentStatus::Live(moved) => *slot = Some(moved),
                ReferentStatus::Dead => {
                    *slot = None;
                    cleared += 1;
                }
                ReferentStatus::Untouched => {}
            }
        }

        self.cleared_total += cleared as u64;
        cleared
    }

    /// Number of entries, cleared or not
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slots cleared over the table's lifetime
    pub fn cleared_total(&self) -> u64 {
        self.cleared_total
    }
}

impl Default for WeakHandleTable {
    fn default() -> Self {
        Self::new()
    }
}
