//! Allocator Module - Allocation Paths
//!
//! Every new object starts in Gen0, unless its payload is above the large
//! object threshold, in which case it goes straight to the large object
//! space.
//!
//! ## Allocation Flow
//!
//! ```text
//! small:  bump Gen0 ──full──▶ collect (escalated) ──▶ bump
//!                             └─still full──▶ collect Full ──▶ bump
//!                                             └─still full──▶ grow Gen0 ──▶ bump
//!                                                             └─over limit──▶ OutOfMemory
//!
//! large:  over LOH budget? ──yes──▶ collect Full
//!         fits heap limit? ──yes──▶ free list / bump
//!                          └─no───▶ collect Full ──▶ retry ──▶ OutOfMemory
//! ```
//!
//! Every path counts the whole block (header plus payload) against
//! `GcConfig::max_heap_size`.

pub mod generational;

pub use generational::{
    CollectTarget, CondemnedSet, Placement, PromotionPolicy, GEN0_PROMOTION_AGE,
};

use crate::config::GcConfig;
use crate::error::{GcError, Result};
use crate::gc::GcReason;
use crate::heap::{Heap, LargeObjectSpace};
use crate::object::{align_up, Generation, ObjectHeader, ObjectRef, TypeId, TypeSystem, HEADER_SIZE};

/// Size class of an allocation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    /// Bump-allocated in Gen0
    Small,
    /// Placed in the large object space
    Large,
}

/// Validated allocation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocRequest {
    pub type_id: TypeId,
    /// Payload size, already rounded to the object alignment
    pub payload_size: usize,
    pub has_finalizer: bool,
    pub size_class: SizeClass,
}

impl AllocRequest {
    /// Bytes the request occupies in its space
    pub fn block_size(&self) -> usize {
        match self.size_class {
            SizeClass::Small => HEADER_SIZE + self.payload_size,
            SizeClass::Large => LargeObjectSpace::block_size_for(HEADER_SIZE + self.payload_size),
        }
    }

    fn header(&self) -> ObjectHeader {
        let generation = match self.size_class {
            SizeClass::Small => Generation::Gen0,
            SizeClass::Large => Generation::Large,
        };
        ObjectHeader::new(
            self.type_id,
            self.payload_size as u32,
            generation,
            self.has_finalizer,
        )
    }
}

/// What the allocator needs from its owner to make room
pub trait AllocationContext {
    fn heap(&mut self) -> &mut Heap;

    /// Run a collection of `target`
    fn collect(&mut self, target: CollectTarget, reason: GcReason) -> Result<()>;

    /// Gen0 capacity changed from `old` to `new` bytes
    fn on_gen0_growth(&mut self, old: usize, new: usize);
}

/// Allocator - size classing and the collect-and-retry ladder
pub struct Allocator {
    large_object_threshold: usize,
    gen1_budget: usize,
    gen2_budget: usize,
    loh_budget: usize,
    policy: PromotionPolicy,
}

impl Allocator {
    pub fn new(config: &GcConfig) -> Self {
        Self {
            large_object_threshold: config.large_object_threshold,
            gen1_budget: config.gen1_budget,
            gen2_budget: config.gen2_budget,
            loh_budget: config.loh_budget,
            policy: PromotionPolicy::new(),
        }
    }

    pub fn policy(&self) -> &PromotionPolicy {
        &self.policy
    }

    #[inline]
    pub fn size_class(&self, payload_size: usize) -> SizeClass {
        if payload_size > self.large_object_threshold {
            SizeClass::Large
        } else {
            SizeClass::Small
        }
    }

    /// Check a request against the type system and size limits
    pub fn prepare(
        &self,
        types: &dyn TypeSystem,
        type_id: TypeId,
        size: usize,
        has_finalizer: bool,
    ) -> Result<AllocRequest> {
        let info = types.type_info(type_id).ok_or(GcError::UnknownType(type_id))?;

        if size < info.min_payload() {
            return Err(GcError::InvalidArgument(format!(
                "payload of {} bytes cannot hold the reference fields of {} ({} bytes)",
                size,
                info.name(),
                info.min_payload()
            )));
        }

        let payload_size = align_up(size);
        if payload_size > u32::MAX as usize {
            return Err(GcError::InvalidArgument(format!(
                "payload of {} bytes exceeds the largest object size",
                size
            )));
        }

        Ok(AllocRequest {
            type_id,
            payload_size,
            has_finalizer,
            size_class: self.size_class(payload_size),
        })
    }

    /// Allocate without collecting. `None` means a collection is needed.
    pub fn try_allocate(&self, heap: &mut Heap, request: &AllocRequest) -> Result<Option<ObjectRef>> {
        if request.block_size() > heap.headroom() {
            return Ok(None);
        }
        match request.size_class {
            SizeClass::Small => Ok(heap.try_allocate_small(request.header())),
            SizeClass::Large => heap.allocate_large(request.header()).map(Some),
        }
    }

    /// Allocate, collecting and growing as needed
    pub fn allocate(
        &self,
        ctx: &mut impl AllocationContext,
        request: &AllocRequest,
    ) -> Result<ObjectRef> {
        match request.size_class {
            SizeClass::Small => self.allocate_small(ctx, request),
            SizeClass::Large => self.allocate_large(ctx, request),
        }
    }

    fn allocate_small(
        &self,
        ctx: &mut impl AllocationContext,
        request: &AllocRequest,
    ) -> Result<ObjectRef> {
        if let Some(obj) = self.try_allocate(ctx.heap(), request)? {
            return Ok(obj);
        }

        let target = self.escalate(ctx.heap());
        ctx.collect(target, GcReason::Gen0Exhausted {
            requested: request.block_size(),
        })?;
        if let Some(obj) = self.try_allocate(ctx.heap(), request)? {
            return Ok(obj);
        }

        if target != CollectTarget::Full {
            ctx.collect(CollectTarget::Full, GcReason::AllocationFailure {
                requested: request.block_size(),
            })?;
            if let Some(obj) = self.try_allocate(ctx.heap(), request)? {
                return Ok(obj);
            }
        }

        // Survivors fill Gen0; grow it while the heap limit allows.
        let block = request.block_size();
        if block <= ctx.heap().headroom() {
            let (old, new) = ctx.heap().grow_gen0(block)?;
            ctx.on_gen0_growth(old, new);
            if let Some(obj) = self.try_allocate(ctx.heap(), request)? {
                return Ok(obj);
            }
        }

        Err(self.out_of_memory(ctx.heap(), request))
    }

    fn allocate_large(
        &self,
        ctx: &mut impl AllocationContext,
        request: &AllocRequest,
    ) -> Result<ObjectRef> {
        let loh_used = ctx.heap().used_in(Generation::Large);
        if loh_used > self.loh_budget {
            ctx.collect(CollectTarget::Full, GcReason::LargeObjectBudget {
                used: loh_used,
                budget: self.loh_budget,
            })?;
        }

        if let Some(obj) = self.try_allocate(ctx.heap(), request)? {
            return Ok(obj);
        }

        ctx.collect(CollectTarget::Full, GcReason::AllocationFailure {
            requested: request.block_size(),
        })?;
        if let Some(obj) = self.try_allocate(ctx.heap(), request)? {
            return Ok(obj);
        }

        Err(self.out_of_memory(ctx.heap(), request))
    }

    /// Collection to run when Gen0 is exhausted
    pub fn escalate(&self, heap: &Heap) -> CollectTarget {
        if heap.used_in(Generation::Gen2) > self.gen2_budget
            || heap.used_in(Generation::Large) > self.loh_budget
        {
            CollectTarget::Full
        } else if heap.used_in(Generation::Gen1) > self.gen1_budget {
            CollectTarget::Gen1
        } else {
            CollectTarget::Gen0
        }
    }

    fn out_of_memory(&self, heap: &Heap, request: &AllocRequest) -> GcError {
        log::warn!(
            "allocation of {} bytes failed: {} of {} bytes in use",
            request.block_size(),
            heap.used_bytes(),
            heap.max_size()
        );
        GcError::OutOfMemory {
            requested: request.block_size(),
            available: heap.headroom(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ReferenceLayout, TypeInfo, TypeRegistry};

    /// Context that records collections without freeing anything
    struct NoopContext {
        heap: Heap,
        collections: Vec<CollectTarget>,
        growths: usize,
    }

    impl AllocationContext for NoopContext {
        fn heap(&mut self) -> &mut Heap {
            &mut self.heap
        }

        fn collect(&mut self, target: CollectTarget, _reason: GcReason) -> Result<()> {
            self.collections.push(target);
            Ok(())
        }

        fn on_gen0_growth(&mut self, _old: usize, _new: usize) {
            self.growths += 1;
        }
    }

    fn setup(gen0: usize, max: usize) -> (Allocator, TypeRegistry, TypeId, NoopContext) {
        let config = GcConfig {
            gen0_size: gen0,
            max_heap_size: max,
            large_object_threshold: 1024,
            ..Default::default()
        };
        let types = TypeRegistry::new();
        let id = types.register(TypeInfo::new("Pair", ReferenceLayout::Fields(vec![0, 8])).unwrap());
        let ctx = NoopContext {
            heap: Heap::new(gen0, max),
            collections: Vec::new(),
            growths: 0,
        };
        (Allocator::new(&config), types, id, ctx)
    }

    #[test]
    fn test_prepare_validates() {
        let (allocator, types, id, _) = setup(4096, 1 << 20);
        assert!(matches!(
            allocator.prepare(&types, TypeId(99), 16, false),
            Err(GcError::UnknownType(_))
        ));
        assert!(matches!(
            allocator.prepare(&types, id, 8, false),
            Err(GcError::InvalidArgument(_))
        ));

        let request = allocator.prepare(&types, id, 21, true).unwrap();
        assert_eq!(request.payload_size, 24);
        assert_eq!(request.size_class, SizeClass::Small);
        assert_eq!(allocator.prepare(&types, id, 2048, false).unwrap().size_class, SizeClass::Large);
    }

    #[test]
    fn test_fast_path_needs_no_collection() {
        let (allocator, types, id, mut ctx) = setup(4096, 1 << 20);
        let request = allocator.prepare(&types, id, 16, false).unwrap();
        let obj = allocator.allocate(&mut ctx, &request).unwrap();
        assert_eq!(obj.generation(), Some(Generation::Gen0));
        assert!(ctx.collections.is_empty());
    }

    #[test]
    fn test_full_gen0_collects_then_grows() {
        let (allocator, types, id, mut ctx) = setup(4096, 1 << 20);
        let request = allocator.prepare(&types, id, 1000, false).unwrap();
        for _ in 0..3 {
            allocator.allocate(&mut ctx, &request).unwrap();
        }
        assert!(ctx.collections.is_empty());

        allocator.allocate(&mut ctx, &request).unwrap();
        assert_eq!(ctx.collections, vec![CollectTarget::Gen0, CollectTarget::Full]);
        assert_eq!(ctx.growths, 1);
    }

    #[test]
    fn test_heap_limit_reports_out_of_memory() {
        let (allocator, types, id, mut ctx) = setup(4096, 4096);
        let request = allocator.prepare(&types, id, 1000, false).unwrap();
        for _ in 0..3 {
            allocator.allocate(&mut ctx, &request).unwrap();
        }
        let err = allocator.allocate(&mut ctx, &request).unwrap_err();
        assert!(matches!(err, GcError::OutOfMemory { requested: 1032, .. }));
        assert_eq!(ctx.growths, 0);
    }

    #[test]
    fn test_large_request_goes_to_large_space() {
        let (allocator, types, id, mut ctx) = setup(4096, 1 << 20);
        let request = allocator.prepare(&types, id, 5000, false).unwrap();
        let obj = allocator.allocate(&mut ctx, &request).unwrap();
        assert_eq!(obj.generation(), Some(Generation::Large));
        assert_eq!(ctx.heap.used_in(Generation::Large), 8192);
    }

    #[test]
    fn test_escalation_by_budget() {
        let (allocator, _, _, mut ctx) = setup(4096, 1 << 20);
        assert_eq!(allocator.escalate(&ctx.heap), CollectTarget::Gen0);

        let tight = Allocator::new(&GcConfig {
            gen1_budget: 32,
            ..Default::default()
        });
        let gen1 = ctx.heap.arena_mut(Generation::Gen1);
        gen1.ensure_capacity(64).unwrap();
        gen1.try_bump(64).unwrap();
        assert_eq!(tight.escalate(&ctx.heap), CollectTarget::Gen1);
        assert_eq!(allocator.escalate(&ctx.heap), CollectTarget::Gen0);
    }
}
