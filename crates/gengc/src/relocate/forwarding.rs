//! Forwarding Plan - New addresses for every survivor
//!
//! After marking, each condemned arena is walked once in address order.
//! Every marked object gets a destination, which is written into its
//! header's forwarding word:
//!
//! ```text
//! Gen0 before:  [A*][b][C*][d][E*]        * = marked, E old enough to promote
//! Gen0 after:   [A][C]
//! Gen1 after:   [..gen1 survivors..][E]
//! ```
//!
//! Survivors that stay slide toward the start of their arena. Promoted
//! survivors are appended after the destination arena's own survivors when
//! that arena is condemned too, or after its current bump pointer when it
//! is not. Sliding never moves an object to a higher address, so moves
//! can run in address order without clobbering unmoved objects.

use crate::allocator::{CondemnedSet, PromotionPolicy};
use crate::error::Result;
use crate::heap::Heap;
use crate::object::{Generation, ObjectRef};

/// One survivor relocation, as arena offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Move {
    pub from: usize,
    pub to: usize,
    pub size: usize,
}

/// Relocations out of one condemned arena
#[derive(Debug, Clone, Default)]
pub struct SpacePlan {
    /// Survivors that stay, in address order
    pub stays: Vec<Move>,
    /// Survivors promoted into the next generation
    pub promotions: Vec<Move>,
    pub dead_objects: usize,
    pub dead_bytes: usize,
}

/// ForwardingPlan - result of planning one compaction
#[derive(Debug, Clone)]
pub struct ForwardingPlan {
    condemned: CondemnedSet,
    spaces: [SpacePlan; 3],
    /// Where promoted objects start in each arena
    incoming_start: [usize; 3],
    /// Bump pointer of each arena after the moves
    new_top: [usize; 3],
    /// Finalizer slots still attached to dead objects
    orphaned_slots: Vec<u64>,
}

impl ForwardingPlan {
    /// Assign destinations to every marked object in the condemned arenas
    ///
    /// Writes forwarding address, new age and new generation tag into each
    /// survivor's header, and grows destination arenas so the moves fit.
    pub fn build(heap: &mut Heap, condemned: CondemnedSet, policy: &PromotionPolicy) -> Result<Self> {
        let arenas = [Generation::Gen0, Generation::Gen1, Generation::Gen2];
        let mut spaces: [SpacePlan; 3] = Default::default();
        let mut orphaned_slots = Vec::new();

        // Pass 1: classify survivors and size the staying part of each arena.
        let mut survivors: [Vec<(usize, usize, bool, u8)>; 3] = Default::default();
        let mut stay_total = [0usize; 3];
        for generation in arenas {
            if !condemned.contains(generation) {
                continue;
            }
            let arena = heap.arena(generation);
            let plan = &mut spaces[generation.index()];
            for offset in arena.object_offsets() {
                let header = arena.header(offset);
                let size = header.block_size();
                if !header.is_marked() {
                    plan.dead_objects += 1;
                    plan.dead_bytes += size;
                    if header.finalizer_slot != 0 {
                        orphaned_slots.push(header.finalizer_slot);
                    }
                    continue;
                }
                let placement = policy.place(generation, &header);
                let promoted = placement.is_promotion(generation);
                if !promoted {
                    stay_total[generation.index()] += size;
                }
                survivors[generation.index()].push((offset, size, promoted, placement.age));
            }
        }

        // Pass 2: hand out addresses.
        let mut incoming_start = [0usize; 3];
        for generation in arenas {
            incoming_start[generation.index()] = if condemned.contains(generation) {
                stay_total[generation.index()]
            } else {
                heap.arena(generation).used()
            };
        }
        let mut incoming_cursor = incoming_start;

        for generation in arenas {
            if !condemned.contains(generation) {
                continue;
            }
            let older = generation.older();
            let mut stay_cursor = 0;
            for &(offset, size, promoted, age) in &survivors[generation.index()] {
                let (destination, to) = if promoted {
                    let to = incoming_cursor[older.index()];
                    incoming_cursor[older.index()] += size;
                    (older, to)
                } else {
                    let to = stay_cursor;
                    stay_cursor += size;
                    (generation, to)
                };

                let arena = heap.arena_mut(generation);
                let mut header = arena.header(offset);
                header.set_forwarding(destination.base() + to as u64);
                header.set_age(age);
                header.set_generation(destination);
                arena.set_header(offset, &header);

                let relocation = Move {
                    from: offset,
                    to,
                    size,
                };
                let plan = &mut spaces[generation.index()];
                if promoted {
                    plan.promotions.push(relocation);
                } else {
                    plan.stays.push(relocation);
                }
            }
        }

        let mut new_top = [0usize; 3];
        for generation in arenas {
            let index = generation.index();
            new_top[index] = if condemned.contains(generation) {
                incoming_cursor[index]
            } else {
                heap.arena(generation).used().max(incoming_cursor[index])
            };
            heap.arena_mut(generation).ensure_capacity(new_top[index])?;
        }

        Ok(Self {
            condemned,
            spaces,
            incoming_start,
            new_top,
            orphaned_slots,
        })
    }

    pub fn condemned(&self) -> CondemnedSet {
        self.condemned
    }

    pub fn space(&self, generation: Generation) -> &SpacePlan {
        &self.spaces[generation.index()]
    }

    pub fn incoming_start(&self, generation: Generation) -> usize {
        self.incoming_start[generation.index()]
    }

    pub fn new_top(&self, generation: Generation) -> usize {
        self.new_top[generation.index()]
    }

    pub fn orphaned_slots(&self) -> &[u64] {
        &self.orphaned_slots
    }

    /// Objects that survive in the condemned arenas
    pub fn survivor_count(&self) -> usize {
        self.spaces
            .iter()
            .map(|s| s.stays.len() + s.promotions.len())
            .sum()
    }

    pub fn promoted_objects(&self) -> usize {
        self.spaces.iter().map(|s| s.promotions.len()).sum()
    }

    pub fn promoted_bytes(&self) -> usize {
        self.spaces
            .iter()
            .flat_map(|s| s.promotions.iter())
            .map(|m| m.size)
            .sum()
    }

    pub fn dead_objects(&self) -> usize {
        self.spaces.iter().map(|s| s.dead_objects).sum()
    }

    pub fn dead_bytes(&self) -> usize {
        self.spaces.iter().map(|s| s.dead_bytes).sum()
    }

    /// Current address of whatever lived at `address` before the moves
    ///
    /// Only forwarded objects in condemned arenas change address.
    #[inline]
    pub fn forward(&self, heap: &Heap, address: u64) -> u64 {
        match Generation::from_address(address) {
            Some(Generation::Large) | None => address,
            Some(generation) if self.condemned.contains(generation) => {
                let header = heap.header(address);
                if header.is_forwarded() {
                    header.forwarding
                } else {
                    address
                }
            }
            Some(_) => address,
        }
    }

    #[inline]
    pub fn forward_ref(&self, heap: &Heap, obj: ObjectRef) -> ObjectRef {
        ObjectRef::from_raw(self.forward(heap, obj.addr())).unwrap_or(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::CollectTarget;
    use crate::object::{ObjectHeader, TypeId};

    fn alloc(heap: &mut Heap, payload: u32, marked: bool, age: u8) -> ObjectRef {
        let mut header = ObjectHeader::new(TypeId(0), payload, Generation::Gen0, false);
        header.set_marked(marked);
        header.set_age(age);
        heap.try_allocate_small(header).unwrap()
    }

    #[test]
    fn test_survivors_slide_to_start() {
        let mut heap = Heap::new(4096, 1 << 20);
        let _dead = alloc(&mut heap, 32, false, 0);
        let live = alloc(&mut heap, 16, true, 0);

        let plan = ForwardingPlan::build(
            &mut heap,
            CollectTarget::Gen0.condemned(),
            &PromotionPolicy::new(),
        )
        .unwrap();

        assert_eq!(plan.forward(&heap, live.addr()), Generation::Gen0.base());
        assert_eq!(plan.dead_objects(), 1);
        assert_eq!(plan.dead_bytes(), 64);
        assert_eq!(plan.new_top(Generation::Gen0), 48);
        assert_eq!(heap.header(live.addr()).age(), 1);
    }

    #[test]
    fn test_old_survivor_promoted_after_gen1_top() {
        let mut heap = Heap::new(4096, 1 << 20);
        heap.arena_mut(Generation::Gen1).ensure_capacity(64).unwrap();
        heap.arena_mut(Generation::Gen1).try_bump(64).unwrap();

        let young = alloc(&mut heap, 8, true, 0);
        let old = alloc(&mut heap, 8, true, 1);

        let plan = ForwardingPlan::build(
            &mut heap,
            CollectTarget::Gen0.condemned(),
            &PromotionPolicy::new(),
        )
        .unwrap();

        assert_eq!(plan.forward(&heap, young.addr()), Generation::Gen0.base());
        assert_eq!(plan.forward(&heap, old.addr()), Generation::Gen1.base() + 64);
        assert_eq!(plan.promoted_objects(), 1);
        assert_eq!(plan.promoted_bytes(), 40);
        assert_eq!(plan.incoming_start(Generation::Gen1), 64);
        assert_eq!(plan.new_top(Generation::Gen1), 104);
        assert_eq!(heap.header(old.addr()).generation(), Generation::Gen1);
        assert_eq!(heap.header(old.addr()).age(), 0);
    }

    #[test]
    fn test_uncondemned_addresses_not_forwarded() {
        let mut heap = Heap::new(4096, 1 << 20);
        let live = alloc(&mut heap, 8, true, 0);
        let plan = ForwardingPlan::build(
            &mut heap,
            CollectTarget::Gen0.condemned(),
            &PromotionPolicy::new(),
        )
        .unwrap();
        let large = Generation::Large.base() + 4096;
        assert_eq!(plan.forward(&heap, large), large);
        assert_eq!(plan.forward_ref(&heap, live), live);
    }
}
