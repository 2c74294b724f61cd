//! Roots Module - Where tracing starts
//!
//! A root is any reference the collector must treat as live. Roots come from
//! two places:
//!
//! - The root handle table owned by the collector (`add_root`/`remove_root`)
//! - Registered [`RootProvider`]s, which expose mutable slots so the
//!   collector can rewrite them after moving objects
//!
//! Every root slot is visited twice per collection: once to mark, once to
//! update it to the survivor's new address.

use crate::error::{GcError, Result};
use crate::object::ObjectRef;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Source of root slots outside the collector
///
/// Providers are invoked with the heap lock held. They must not call back
/// into the collector.
pub trait RootProvider: Send {
    /// Call `visitor` once for each root slot
    ///
    /// The visitor may overwrite a slot with the object's new address.
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut ObjectRef));
}

impl<F> RootProvider for F
where
    F: FnMut(&mut dyn FnMut(&mut ObjectRef)) + Send,
{
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut ObjectRef)) {
        self(visitor)
    }
}

/// Handle to an entry in the collector's root table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RootHandle(u64);

impl RootHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RootHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "root#{}", self.0)
    }
}

/// Handle to a registered root provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderId(u64);

impl ProviderId {
    pub fn id(self) -> u64 {
        self.0
    }
}

/// RootTable - strong handles owned by the collector
pub struct RootTable {
    slots: IndexMap<u64, ObjectRef>,
    next_id: u64,
}

impl RootTable {
    pub fn new() -> Self {
        Self {
            slots: IndexMap::new(),
            next_id: 1,
        }
    }

    pub fn add(&mut self, obj: ObjectRef) -> RootHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.slots.insert(id, obj);
        RootHandle(id)
    }

    pub fn get(&self, handle: RootHandle) -> Result<ObjectRef> {
        self.slots
            .get(&handle.0)
            .copied()
            .ok_or(GcError::InvalidHandle(handle.0))
    }

    pub fn set(&mut self, handle: RootHandle, obj: ObjectRef) -> Result<()> {
        let slot = self
            .slots
            .get_mut(&handle.0)
            .ok_or(GcError::InvalidHandle(handle.0))?;
        *slot = obj;
        Ok(())
    }

    pub fn remove(&mut self, handle: RootHandle) -> Result<ObjectRef> {
        self.slots
            .shift_remove(&handle.0)
            .ok_or(GcError::InvalidHandle(handle.0))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn visit_mut(&mut self, visitor: &mut dyn FnMut(&mut ObjectRef)) {
        for slot in self.slots.values_mut() {
            visitor(slot);
        }
    }
}

impl Default for RootTable {
    fn default() -> Self {
        Self::new()
    }
}

/// RootProviders - registered external root sources
pub struct RootProviders {
    providers: IndexMap<u64, Box<dyn RootProvider>>,
    next_id: u64,
}

impl RootProviders {
    pub fn new() -> Self {
        Self {
            providers: IndexMap::new(),
            next_id: 1,
        }
    }

    pub fn add(&mut self, provider: Box<dyn RootProvider>) -> ProviderId {
        let id = self.next_id;
        self.next_id += 1;
        self.providers.insert(id, provider);
        ProviderId(id)
    }

    pub fn remove(&mut self, id: ProviderId) -> Result<Box<dyn RootProvider>> {
        self.providers
            .shift_remove(&id.0)
            .ok_or(GcError::InvalidHandle(id.0))
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn visit_mut(&mut self, visitor: &mut dyn FnMut(&mut ObjectRef)) {
        for provider in self.providers.values_mut() {
            provider.visit_roots(visitor);
        }
    }
}

impl Default for RootProviders {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared, growable list of root slots
///
/// Models a mutator stack: the embedder pushes and pops references while
/// the collector keeps every `Some` slot alive and up to date. Clone it to
/// keep one handle for the mutator and register another as a provider.
///
/// Do not hold a slot guard across a call into the collector.
#[derive(Clone, Default)]
pub struct SharedRoots {
    slots: Arc<Mutex<Vec<Option<ObjectRef>>>>,
}

impl SharedRoots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a slot and return its index
    pub fn push(&self, obj: ObjectRef) -> usize {
        let mut slots = self.slots.lock();
        slots.push(Some(obj));
        slots.len() - 1
    }

    /// Remove and return the last slot
    pub fn pop(&self) -> Option<ObjectRef> {
        self.slots.lock().pop().flatten()
    }

    pub fn get(&self, index: usize) -> Option<ObjectRef> {
        self.slots.lock().get(index).copied().flatten()
    }

    /// Overwrite a slot. `None` drops the reference but keeps the index.
    pub fn set(&self, index: usize, obj: Option<ObjectRef>) {
        if let Some(slot) = self.slots.lock().get_mut(index) {
            *slot = obj;
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    pub fn clear(&self) {
        self.slots.lock().clear();
    }
}

impl RootProvider for SharedRoots {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut ObjectRef)) {
        for slot in self.slots.lock().iter_mut().flatten() {
            visitor(slot);
        }
    }
}
