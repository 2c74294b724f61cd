//! Barrier Module - Generational Write Barrier
//!
//! Every reference store goes through the write barrier. When the holder
//! lives in an older space than the target, the holder is added to the
//! remembered set so a minor collection can find the old-to-young edge
//! without scanning the older spaces.
//!
//! Space order (older on the right):
//!
//! ```text
//! Gen0 < Gen1 < Gen2 < Large
//! ```
//!
//! Stores of null, or of a reference into the same or an older space, need
//! no record.

pub mod remembered_set;

pub use remembered_set::RememberedSet;

use crate::object::ObjectRef;

/// WriteBarrier - remembered set plus barrier counters
#[derive(Default)]
pub struct WriteBarrier {
    remembered: RememberedSet,
    invocations: u64,
    recorded: u64,
}

impl WriteBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the store of `target` into a field of `holder`
    #[inline]
    pub fn on_reference_store(&mut self, holder: ObjectRef, target: Option<ObjectRef>) {
        self.invocations += 1;
        if let Some(target) = target {
            if needs_remembering(holder, target) && self.remembered.insert(holder) {
                self.recorded += 1;
            }
        }
    }

    pub fn remembered(&self) -> &RememberedSet {
        &self.remembered
    }

    pub fn remembered_mut(&mut self) -> &mut RememberedSet {
        &mut self.remembered
    }

    /// Barrier executions since creation
    pub fn invocations(&self) -> u64 {
        self.invocations
    }

    /// Holders newly added by the barrier since creation
    pub fn recorded(&self) -> u64 {
        self.recorded
    }
}

/// Check whether a `holder -> target` edge points into a younger space
#[inline]
pub fn needs_remembering(holder: ObjectRef, target: ObjectRef) -> bool {
    match (holder.generation(), target.generation()) {
        (Some(h), Some(t)) => h.rank() > t.rank(),
        _ => false,
    }
}
