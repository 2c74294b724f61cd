//! Relocate Module - Compaction and Sweeping
//!
//! Runs after marking and finalization resurrection, with the world stopped:
//!
//! 1. Plan - assign forwarding addresses ([`ForwardingPlan`])
//! 2. Fix up - rewrite every reference that points at a forwarded object:
//!    roots, queue entries, weak slots, remembered holders, survivor fields
//! 3. Sweep - release dead large objects (full collections only)
//! 4. Move - copy promoted objects out, then slide staying objects down
//! 5. Finish - clear mark and forwarding bits, rebuild the remembered set
//!
//! Fix-up happens before the move, while every header still sits at its
//! old address, so forwarding lookups are a single header read.

pub mod forwarding;

pub use forwarding::{ForwardingPlan, Move, SpacePlan};

use crate::allocator::{CondemnedSet, PromotionPolicy};
use crate::barrier::{needs_remembering, RememberedSet};
use crate::error::{GcError, Result};
use crate::heap::Heap;
use crate::object::{Generation, ObjectRef, ReferentStatus, TypeId, TypeInfo, TypeSystem};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Outcome of one compaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    pub survivors: usize,
    pub promoted_objects: usize,
    pub promoted_bytes: usize,
    pub reclaimed_objects: usize,
    pub reclaimed_bytes: usize,
    /// Dead large objects released to the free list
    pub swept_large_objects: usize,
    pub swept_large_bytes: usize,
}

/// Compactor - moves survivors and reclaims dead space
pub struct Compactor<'a> {
    heap: &'a mut Heap,
    types: &'a dyn TypeSystem,
    plan: ForwardingPlan,
    layouts: FxHashMap<TypeId, Arc<TypeInfo>>,
    large_survivors: Vec<u64>,
    stats: CompactionStats,
}

impl<'a> Compactor<'a> {
    /// Plan the compaction of the condemned spaces
    pub fn new(
        heap: &'a mut Heap,
        types: &'a dyn TypeSystem,
        condemned: CondemnedSet,
        policy: &PromotionPolicy,
    ) -> Result<Self> {
        let plan = ForwardingPlan::build(heap, condemned, policy)?;

        let large_survivors = if condemned.contains(Generation::Large) {
            heap.objects_in(Generation::Large)
                .into_iter()
                .filter(|address| heap.header(*address).is_marked())
                .collect()
        } else {
            Vec::new()
        };

        let stats = CompactionStats {
            survivors: plan.survivor_count() + large_survivors.len(),
            promoted_objects: plan.promoted_objects(),
            promoted_bytes: plan.promoted_bytes(),
            reclaimed_objects: plan.dead_objects(),
            reclaimed_bytes: plan.dead_bytes(),
            ..Default::default()
        };

        Ok(Self {
            heap,
            types,
            plan,
            layouts: FxHashMap::default(),
            large_survivors,
            stats,
        })
    }

    pub fn plan(&self) -> &ForwardingPlan {
        &self.plan
    }

    pub fn stats(&self) -> CompactionStats {
        self.stats
    }

    // === Fix-up ===

    /// Post-compaction address of `obj`
    #[inline]
    pub fn forward(&self, obj: ObjectRef) -> ObjectRef {
        self.plan.forward_ref(self.heap, obj)
    }

    /// Rewrite a root slot in place
    #[inline]
    pub fn fix_slot(&self, slot: &mut ObjectRef) {
        *slot = self.forward(*slot);
    }

    /// Fate of a weak referent
    ///
    /// Must run before `sweep_large` and `relocate`, while the referent's
    /// header is still in place.
    pub fn referent_status(&self, target: ObjectRef) -> ReferentStatus {
        let condemned = self.plan.condemned();
        if !condemned.contains_address(target.addr()) {
            return ReferentStatus::Untouched;
        }
        if self.heap.header(target.addr()).is_marked() {
            ReferentStatus::Live(self.forward(target))
        } else {
            ReferentStatus::Dead
        }
    }

    /// Rewrite the reference fields of every object that survives or is
    /// remembered, while headers are still at their old addresses
    pub fn fix_heap_references(&mut self, remembered_holders: &[u64]) -> Result<()> {
        let mut holders = Vec::with_capacity(self.plan.survivor_count() + remembered_holders.len());
        for generation in [Generation::Gen0, Generation::Gen1, Generation::Gen2] {
            let arena = self.heap.arena(generation);
            let space = self.plan.space(generation);
            for relocation in space.stays.iter().chain(space.promotions.iter()) {
                holders.push(arena.address_of(relocation.from));
            }
        }
        holders.extend_from_slice(&self.large_survivors);
        holders.extend_from_slice(remembered_holders);

        for holder in holders {
            self.fix_fields(holder)?;
        }
        Ok(())
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

    fn reference_fields(&mut self, address: u64) -> Result<Vec<usize>> {
        let header = self.heap.header(address);
        let info = self.layout(address, header.type_id)?;
        Ok(info.reference_offsets(header.payload_size()))
    }

    fn fix_fields(&mut self, holder: u64) -> Result<()> {
        for offset in self.reference_fields(holder)? {
            let target = self.heap.read_word(holder, offset);
            if target == 0 {
                continue;
            }
            let moved = self.plan.forward(self.heap, target);
            if moved != target {
                self.heap.write_word(holder, offset, moved);
            }
        }
        Ok(())
    }

    // === Sweep ===

    /// Release dead large objects (only when the large space is condemned)
    pub fn sweep_large(&mut self) -> Result<Vec<u64>> {
        let mut orphaned_slots = Vec::new();
        if !self.plan.condemned().contains(Generation::Large) {
            return Ok(orphaned_slots);
        }

        for address in self.heap.objects_in(Generation::Large) {
            let header = self.heap.header(address);
            if header.is_marked() {
                continue;
            }
            if header.finalizer_slot != 0 {
                orphaned_slots.push(header.finalizer_slot);
            }
            let offset = self.heap.large().offset_of(address);
            let freed = self.heap.large_mut().free(offset)?;
            self.stats.swept_large_objects += 1;
            self.stats.swept_large_bytes += freed;
            self.stats.reclaimed_objects += 1;
            self.stats.reclaimed_bytes += freed;
        }
        Ok(orphaned_slots)
    }

    // === Move ===

    /// Copy every survivor to its planned address
    pub fn relocate(&mut self) {
        let condemned = self.plan.condemned();

        for generation in condemned.arenas_oldest_first() {
            let space = self.plan.space(generation);

            if !space.promotions.is_empty() {
                let (from, to) = self.heap.arena_pair_mut(generation, generation.older());
                for relocation in &space.promotions {
                    let source = &from.bytes()[relocation.from..relocation.from + relocation.size];
                    to.bytes_mut()[relocation.to..relocation.to + relocation.size]
                        .copy_from_slice(source);
                }
            }

            let arena = self.heap.arena_mut(generation);
            for relocation in &space.stays {
                if relocation.from != relocation.to {
                    arena
                        .bytes_mut()
                        .copy_within(relocation.from..relocation.from + relocation.size, relocation.to);
                }
            }
            arena.set_alloc_ptr(self.plan.new_top(generation));
        }

        for generation in [Generation::Gen1, Generation::Gen2] {
            if !condemned.contains(generation) {
                let top = self.plan.new_top(generation);
                self.heap.arena_mut(generation).set_alloc_ptr(top);
            }
        }

        for generation in [Generation::Gen0, Generation::Gen1, Generation::Gen2] {
            let start = if condemned.contains(generation) {
                0
            } else {
                self.plan.incoming_start(generation)
            };
            self.heap.arena_mut(generation).rebuild_starts(start);
        }
    }

    // === Finish ===

    /// Clear collection bits on survivors and rebuild the remembered set
    ///
    /// `previous_holders` are remembered holders outside the condemned
    /// spaces; they keep their entry only if they still need it.
    pub fn finish(mut self, previous_holders: &[u64], remembered: &mut RememberedSet) -> Result<CompactionStats> {
        let condemned = self.plan.condemned();
        let mut survivors = Vec::new();

        for generation in [Generation::Gen0, Generation::Gen1, Generation::Gen2] {
            let arena = self.heap.arena(generation);
            let start = if condemned.contains(generation) {
                0
            } else {
                self.plan.incoming_start(generation)
            };
            survivors.extend(
                arena
                    .object_offsets_from(start)
                    .into_iter()
                    .map(|offset| arena.address_of(offset)),
            );
        }
        survivors.extend_from_slice(&self.large_survivors);

        for &address in &survivors {
            let mut header = self.heap.header(address);
            header.set_marked(false);
            header.clear_forwarding();
            self.heap.set_header(address, &header);
        }

        remembered.clear();
        for holder in survivors.into_iter().chain(previous_holders.iter().copied()) {
            if self.holds_younger(holder)? {
                if let Some(holder) = ObjectRef::from_raw(holder) {
                    remembered.insert(holder);
                }
            }
        }

        Ok(self.stats)
    }

    fn holds_younger(&mut self, holder: u64) -> Result<bool> {
        let Some(holder_ref) = ObjectRef::from_raw(holder) else {
            return Ok(false);
        };
        for offset in self.reference_fields(holder)? {
            let target = self.heap.read_word(holder, offset);
            if let Some(target) = ObjectRef::from_raw(target) {
                if needs_remembering(holder_ref, target) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::CollectTarget;
    use crate::marker::Marker;
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

        fn alloc(&mut self, value: u64) -> ObjectRef {
            let header = ObjectHeader::new(self.node, 16, Generation::Gen0, false);
            let obj = self.heap.try_allocate_small(header).unwrap();
            self.heap.write_word(obj.addr(), 8, value);
            obj
        }

        fn link(&mut self, from: ObjectRef, to: ObjectRef) {
            self.heap.write_word(from.addr(), 0, to.addr());
        }

        /// Mark from `roots`, compact, and return the roots' new addresses
        fn collect(&mut self, target: CollectTarget, roots: &[ObjectRef]) -> (Vec<ObjectRef>, CompactionStats) {
            let condemned = target.condemned();
            let types = &self.types;
            let mut marker = Marker::new(&mut self.heap, types, condemned);
            for root in roots {
                marker.mark_root(*root).unwrap();
            }
            marker.drain().unwrap();

            let mut compactor =
                Compactor::new(&mut self.heap, types, condemned, &PromotionPolicy::new()).unwrap();
            let moved: Vec<ObjectRef> = roots.iter().map(|r| compactor.forward(*r)).collect();
            compactor.fix_heap_references(&[]).unwrap();
            compactor.sweep_large().unwrap();
            compactor.relocate();
            let mut remembered = RememberedSet::new();
            let stats = compactor.finish(&[], &mut remembered).unwrap();
            (moved, stats)
        }
    }

    #[test]
    fn test_compaction_preserves_graph() {
        let mut fx = Fixture::new();
        let _garbage = fx.alloc(1);
        let a = fx.alloc(2);
        let _more_garbage = fx.alloc(3);
        let b = fx.alloc(4);
        fx.link(a, b);

        let (moved, stats) = fx.collect(CollectTarget::Gen0, &[a]);
        let a = moved[0];
        assert_eq!(a.addr(), Generation::Gen0.base());
        assert_eq!(stats.survivors, 2);
        assert_eq!(stats.reclaimed_objects, 2);

        let b = fx.heap.read_word(a.addr(), 0);
        assert_eq!(fx.heap.read_word(a.addr(), 8), 2);
        assert_eq!(fx.heap.read_word(b, 8), 4);
        assert!(!fx.heap.header(a.addr()).is_marked());
        assert!(!fx.heap.header(b).is_forwarded());
        assert_eq!(fx.heap.used_in(Generation::Gen0), 96);
    }

    #[test]
    fn test_second_survival_promotes() {
        let mut fx = Fixture::new();
        let a = fx.alloc(7);

        let (moved, _) = fx.collect(CollectTarget::Gen0, &[a]);
        assert_eq!(moved[0].generation(), Some(Generation::Gen0));

        let (moved, stats) = fx.collect(CollectTarget::Gen0, &moved);
        let a = moved[0];
        assert_eq!(a.generation(), Some(Generation::Gen1));
        assert_eq!(stats.promoted_objects, 1);
        assert_eq!(fx.heap.read_word(a.addr(), 8), 7);
        assert_eq!(fx.heap.used_in(Generation::Gen0), 0);
        assert!(fx.heap.is_object(a.addr()));
    }

    #[test]
    fn test_unreachable_cycle_reclaimed() {
        let mut fx = Fixture::new();
        let a = fx.alloc(0);
        let b = fx.alloc(0);
        fx.link(a, b);
        fx.link(b, a);

        let (_, stats) = fx.collect(CollectTarget::Gen0, &[]);
        assert_eq!(stats.reclaimed_objects, 2);
        assert_eq!(fx.heap.used_bytes(), 0);
    }

    #[test]
    fn test_full_collection_sweeps_large_space() {
        let mut fx = Fixture::new();
        let header = ObjectHeader::new(fx.node, 8192, Generation::Large, false);
        let large = fx.heap.allocate_large(header).unwrap();
        let keep = fx.heap.allocate_large(header).unwrap();

        let (moved, stats) = fx.collect(CollectTarget::Full, &[keep]);
        assert_eq!(moved[0], keep);
        assert_eq!(stats.swept_large_objects, 1);
        assert!(!fx.heap.is_object(large.addr()));
        assert!(fx.heap.is_object(keep.addr()));
    }
}
