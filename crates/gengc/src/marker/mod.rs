//! Marker Module - Stop-the-world tracing
//!
//! Marking finds every object reachable from the roots inside the condemned
//! spaces. Objects outside the condemned spaces are treated as live and are
//! not traversed; edges from them into condemned spaces are found through
//! the remembered set instead.
//!
//! Marking Phases:
//! 1. Roots - root table, providers, finalization queue, remembered holders
//! 2. Transitive closure - explicit worklist, no recursion
//! 3. Resurrection - unreachable objects that still need finalization are
//!    marked again, together with everything they reach
//!
//! The mark bit lives in the object header, so a cycle is traversed at most
//! once per object.

use crate::allocator::CondemnedSet;
use crate::error::{GcError, Result};
use crate::heap::Heap;
use crate::object::{Generation, ObjectRef, TypeId, TypeInfo, TypeSystem};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Counters for one marking pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarkStats {
    /// Objects marked from roots
    pub marked_objects: usize,
    pub marked_bytes: usize,
    /// Reference fields read while tracing
    pub traced_references: usize,
    /// Objects marked only because a finalizer must still run
    pub resurrected_objects: usize,
    pub resurrected_bytes: usize,
}

/// Marker - worklist tracer over the condemned spaces
pub struct Marker<'a> {
    heap: &'a mut Heap,
    types: &'a dyn TypeSystem,
    condemned: CondemnedSet,
    worklist: Vec<u64>,
    layouts: FxHashMap<TypeId, Arc<TypeInfo>>,
    resurrecting: bool,
    stats: MarkStats,
}

impl<'a> Marker<'a> {
    pub fn new(heap: &'a mut Heap, types: &'a dyn TypeSystem, condemned: CondemnedSet) -> Self {
        Self {
            heap,
            types,
            condemned,
            worklist: Vec::with_capacity(256),
            layouts: FxHashMap::default(),
            resurrecting: false,
            stats: MarkStats::default(),
        }
    }

    pub fn stats(&self) -> MarkStats {
        self.stats
    }

    /// Mark a root and queue it for scanning
    pub fn mark_root(&mut self, root: ObjectRef) -> Result<()> {
        if !self.heap.is_object(root.addr()) {
            return Err(GcError::CorruptHeapInvariant {
                address: root.addr(),
                reason: "root does not reference an object".to_string(),
            });
        }
        self.mark(root.addr());
        Ok(())
    }

    /// Treat the reference fields of a live holder outside the condemned
    /// spaces as roots
    pub fn scan_holder(&mut self, holder: u64) -> Result<()> {
        if !self.heap.is_object(holder) {
            // Remembered holders are rebuilt every cycle; a missing one is a bug.
            return Err(GcError::CorruptHeapInvariant {
                address: holder,
                reason: "remembered holder is not an object".to_string(),
            });
        }
        self.scan(holder)
    }

    /// Trace until the worklist is empty
    pub fn drain(&mut self) -> Result<()> {
        while let Some(address) = self.worklist.pop() {
            self.scan(address)?;
        }
        Ok(())
    }

    /// Unmarked objects in condemned spaces that still need finalization
    ///
    /// Taken as one snapshot after the root closure, so an object only
    /// reachable from another candidate is a candidate too.
    pub fn finalization_candidates(&self) -> Vec<u64> {
        let mut candidates = Vec::new();
        for generation in Generation::ALL {
            if !self.condemned.contains(generation) {
                continue;
            }
            for address in self.heap.objects_in(generation) {
                let header = self.heap.header(address);
                if !header.is_marked() && header.needs_finalization() {
                    candidates.push(address);
                }
            }
        }
        candidates
    }

    /// Keep finalization candidates and everything they reach alive
    pub fn resurrect(&mut self, candidates: &[u64]) -> Result<()> {
        self.resurrecting = true;
        for &address in candidates {
            self.mark(address);
        }
        let result = self.drain();
        self.resurrecting = false;
        result
    }

    fn mark(&mut self, address: u64) {
        if !self.condemned.contains_address(address) {
            return;
        }
        let mut header = self.heap.header(address);
        if header.is_marked() {
            return;
        }
        header.set_marked(true);
        self.heap.set_header(address, &header);

        if self.resurrecting {
            self.stats.resurrected_objects += 1;
            self.stats.resurrected_bytes += header.block_size();
        } else {
            self.stats.marked_objects += 1;
            self.stats.marked_bytes += header.block_size();
        }
        self.worklist.push(address);
    }

    fn layout(&mut self, address: u64, type_id: TypeId) -> Result<Arc<TypeInfo>> {
        if let Some(info) = self.layouts.get(&type_id) {
            return Ok(Arc::clone(info));
        }
        let info = self
            .types
            .type_info(type_id)
            .ok_or_else(|| GcError::CorruptHeapInvariant {
                address,
                reason: format!("object has unknown {}", type_id),
            })?;
        self.layouts.insert(type_id, Arc::clone(&info));
        Ok(info)
    }

    fn scan(&mut self, address: u64) -> Result<()> {
        let header = self.heap.header(address);
        let info = self.layout(address, header.type_id)?;

        let mut fields = Vec::new();
        info.for_each_reference(header.payload_size(), |offset| fields.push(offset));

        for offset in fields {
            let target = self.heap.read_word(address, offset);
            if target == 0 {
                continue;
            }
            self.stats.traced_references += 1;
            if !self.heap.is_object(target) {
                return Err(GcError::CorruptHeapInvariant {
                    address,
                    reason: format!("field +{} references {:#x} outside the heap", offset, target),
                });
            }
            self.mark(target);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::CollectTarget;
    use crate::object::{ObjectHeader, ReferenceLayout, TypeRegistry};

    struct Fixture {
        heap: Heap,
        types: TypeRegistry,
        node: TypeId,
    }

    impl Fixture {
        fn new() -> Self {
            let types = TypeRegistry::new();
            let node = types.register(TypeInfo::new("Node", ReferenceLayout::Fields(vec![0])).unwrap());
            Self {
                heap: Heap::new(4096, 1 << 20),
                types,
                node,
            }
        }

        fn alloc(&mut self, finalizable: bool) -> ObjectRef {
            let header = ObjectHeader::new(self.node, 8, Generation::Gen0, finalizable);
            self.heap.try_allocate_small(header).unwrap()
        }

        fn link(&mut self, from: ObjectRef, to: ObjectRef) {
            self.heap.write_word(from.addr(), 0, to.addr());
        }

        fn marked(&self, obj: ObjectRef) -> bool {
            self.heap.header(obj.addr()).is_marked()
        }
    }

    #[test]
    fn test_marks_transitive_closure() {
        let mut fx = Fixture::new();
        let a = fx.alloc(false);
        let b = fx.alloc(false);
        let garbage = fx.alloc(false);
        fx.link(a, b);

        let types = &fx.types;
        let mut marker = Marker::new(&mut fx.heap, types, CollectTarget::Gen0.condemned());
        marker.mark_root(a).unwrap();
        marker.drain().unwrap();
        assert_eq!(marker.stats().marked_objects, 2);
        assert_eq!(marker.stats().traced_references, 1);

        assert!(fx.marked(a));
        assert!(fx.marked(b));
        assert!(!fx.marked(garbage));
    }

    #[test]
    fn test_cycle_terminates() {
        let mut fx = Fixture::new();
        let a = fx.alloc(false);
        let b = fx.alloc(false);
        fx.link(a, b);
        fx.link(b, a);

        let types = &fx.types;
        let mut marker = Marker::new(&mut fx.heap, types, CollectTarget::Gen0.condemned());
        marker.mark_root(a).unwrap();
        marker.drain().unwrap();
        assert_eq!(marker.stats().marked_objects, 2);
    }

    #[test]
    fn test_resurrection_marks_reachable_from_finalizable() {
        let mut fx = Fixture::new();
        let finalizable = fx.alloc(true);
        let child = fx.alloc(false);
        fx.link(finalizable, child);

        let types = &fx.types;
        let mut marker = Marker::new(&mut fx.heap, types, CollectTarget::Gen0.condemned());
        marker.drain().unwrap();
        let candidates = marker.finalization_candidates();
        assert_eq!(candidates, vec![finalizable.addr()]);

        marker.resurrect(&candidates).unwrap();
        assert_eq!(marker.stats().resurrected_objects, 2);
        assert!(fx.marked(finalizable));
        assert!(fx.marked(child));
    }

    #[test]
    fn test_dangling_field_is_corruption() {
        let mut fx = Fixture::new();
        let a = fx.alloc(false);
        fx.heap.write_word(a.addr(), 0, 0xDEAD_0000);

        let types = &fx.types;
        let mut marker = Marker::new(&mut fx.heap, types, CollectTarget::Gen0.condemned());
        marker.mark_root(a).unwrap();
        assert!(matches!(
            marker.drain(),
            Err(GcError::CorruptHeapInvariant { .. })
        ));
    }

    #[test]
    fn test_unknown_type_is_corruption() {
        let mut fx = Fixture::new();
        let header = ObjectHeader::new(TypeId(42), 8, Generation::Gen0, false);
        let stray = fx.heap.try_allocate_small(header).unwrap();

        let types = &fx.types;
        let mut marker = Marker::new(&mut fx.heap, types, CollectTarget::Gen0.condemned());
        marker.mark_root(stray).unwrap();
        assert!(matches!(
            marker.drain(),
            Err(GcError::CorruptHeapInvariant { .. })
        ));
    }
}
