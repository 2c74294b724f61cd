//! GC Core Module - Garbage Collection Cycle Management
//!
//! Implements the stop-the-world generational collection cycle and the
//! mutator-facing API. Every operation takes the heap lock, so a running
//! collection suspends all mutators at the API boundary.
//!
//! ## Cycle
//!
//! ```text
//! Mark ──▶ Resurrect finalizable ──▶ Plan ──▶ Fix references ──▶ Sweep LOH ──▶ Move ──▶ Finish
//!  │              │                                   │
//!  roots,         F-reachable queue                   weak handles cleared
//!  providers,                                         or redirected
//!  queue, remembered set
//! ```

use crate::allocator::{AllocationContext, Allocator, CollectTarget, CondemnedSet};
use crate::barrier::WriteBarrier;
use crate::config::GcConfig;
use crate::error::{GcError, Result};
use crate::heap::Heap;
use crate::logging::{self, GcEvent, GcLogRecord, GcLogger, GcLoggerConfig, LogLevel};
use crate::marker::Marker;
use crate::object::{Generation, ObjectRef, TypeId, TypeInfo, TypeSystem, WeakHandle, WeakHandleTable};
use crate::relocate::Compactor;
use crate::roots::{ProviderId, RootHandle, RootProvider, RootProviders, RootTable};
use crate::runtime::finalizer::{
    self, FinalizationQueue, FinalizerHost, FinalizerTable, FinalizerThread, WaitMode,
};
use crate::stats::{CollectionReport, GcMetrics, GcStats, GcSummary, GcTimer};
use indexmap::IndexMap;
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// GC cycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GcState {
    /// Idle - no GC in progress
    Idle,
    /// Marking phase - tracing from roots
    Marking,
    /// Finalization phase - resurrecting finalizable objects
    Finalizing,
    /// Compacting phase - moving survivors, sweeping large objects
    Compacting,
}

/// Reason for GC trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GcReason {
    /// Explicit GC request (user call)
    Explicit,
    /// Gen0 had no room for an allocation
    Gen0Exhausted { requested: usize },
    /// Allocation still failed after a partial collection, or the heap limit
    /// was reached
    AllocationFailure { requested: usize },
    /// Large object space grew past its budget
    LargeObjectBudget { used: usize, budget: usize },
}

impl fmt::Display for GcReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GcReason::Explicit => write!(f, "explicit"),
            GcReason::Gen0Exhausted { requested } => {
                write!(f, "gen0 exhausted ({} bytes requested)", requested)
            }
            GcReason::AllocationFailure { requested } => {
                write!(f, "allocation failure ({} bytes requested)", requested)
            }
            GcReason::LargeObjectBudget { used, budget } => {
                write!(f, "large object budget ({} of {} bytes)", used, budget)
            }
        }
    }
}

/// Snapshot of heap occupancy
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HeapInfo {
    pub gen0_used: usize,
    pub gen0_capacity: usize,
    pub gen0_objects: usize,
    pub gen1_used: usize,
    pub gen1_objects: usize,
    pub gen2_used: usize,
    pub gen2_objects: usize,
    pub large_used: usize,
    pub large_objects: usize,
    /// Free list of the large object space: (blocks, bytes)
    pub large_free_blocks: usize,
    pub large_free_bytes: usize,
    pub used_bytes: usize,
    pub max_bytes: usize,
    pub remembered_holders: usize,
    pub root_handles: usize,
    pub root_providers: usize,
    pub weak_handles: usize,
    pub registered_finalizers: usize,
}

impl HeapInfo {
    /// Heap utilization (0.0 - 1.0)
    pub fn utilization(&self) -> f64 {
        if self.max_bytes == 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.max_bytes as f64
    }

    /// Bytes in use in a space
    pub fn used_in(&self, generation: Generation) -> usize {
        match generation {
            Generation::Gen0 => self.gen0_used,
            Generation::Gen1 => self.gen1_used,
            Generation::Gen2 => self.gen2_used,
            Generation::Large => self.large_used,
        }
    }
}

/// Everything guarded by the heap lock
struct HeapState {
    heap: Heap,
    roots: RootTable,
    providers: RootProviders,
    weak: WeakHandleTable,
    barrier: WriteBarrier,
    finalizers: FinalizerTable,
}

/// State shared between the collector handle and the finalizer thread
struct Shared {
    config: GcConfig,
    types: Arc<dyn TypeSystem>,
    allocator: Allocator,

    /// Heap lock. Lock order: heap, then finalization queue.
    state: Mutex<HeapState>,
    queue: FinalizationQueue,

    stats: GcStats,
    logger: GcLogger,
    cycle_count: AtomicU64,
    gc_state: Mutex<GcState>,
}

/// GarbageCollector - orchestrator for the entire GC cycle
///
/// Coordinates all GC components:
/// - Allocator and heap spaces
/// - Marker and compactor for collections
/// - Finalization queue and finalizer thread
/// - Stats and event log for monitoring
///
/// ## Thread Safety
///
/// `GarbageCollector` is `Send + Sync`. Collections are stop-the-world:
/// they hold the heap lock that every other operation needs.
///
/// An `ObjectRef` is only valid until the next collection. Keep objects
/// across collections through root handles or a [`RootProvider`]. With more
/// than one mutator thread, another thread may collect between any two
/// calls; group dependent operations in a [`Mutator`] scope.
///
/// # Examples
///
/// ```rust
/// use gengc::{CollectTarget, GarbageCollector, GcConfig, ReferenceLayout, TypeInfo, TypeRegistry};
/// use std::sync::Arc;
///
/// let types = Arc::new(TypeRegistry::new());
/// let node = types.register(TypeInfo::new("Node", ReferenceLayout::Fields(vec![0])).unwrap());
/// let gc = GarbageCollector::new(GcConfig::default(), types).unwrap();
///
/// let obj = gc.allocate(node, 16, false).unwrap();
/// let root = gc.add_root(obj).unwrap();
/// gc.collect(CollectTarget::Gen0).unwrap();
/// assert!(gc.root(root).is_ok());
/// ```
pub struct GarbageCollector {
    shared: Arc<Shared>,
    finalizer_thread: Option<FinalizerThread>,
}

impl GarbageCollector {
    /// Create a new GarbageCollector with specified configuration
    ///
    /// Starts the finalizer thread unless `config.finalizer_thread` is off.
    ///
    /// # Errors
    /// `Configuration` if the configuration is invalid, `Internal` if the
    /// finalizer thread cannot be spawned.
    pub fn new(config: GcConfig, types: Arc<dyn TypeSystem>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| GcError::Configuration(format!("Invalid configuration: {}", e)))?;

        let logger = GcLogger::new(GcLoggerConfig {
            level: LogLevel::Debug,
            console: false,
            history: config.event_history,
            ..Default::default()
        });

        let shared = Arc::new(Shared {
            allocator: Allocator::new(&config),
            state: Mutex::new(HeapState {
                heap: Heap::new(config.gen0_size, config.max_heap_size),
                roots: RootTable::new(),
                providers: RootProviders::new(),
                weak: WeakHandleTable::new(),
                barrier: WriteBarrier::new(),
                finalizers: FinalizerTable::new(),
            }),
            queue: FinalizationQueue::new(),
            stats: GcStats::new(),
            logger,
            cycle_count: AtomicU64::new(0),
            gc_state: Mutex::new(GcState::Idle),
            types,
            config,
        });

        let finalizer_thread = if shared.config.finalizer_thread {
            Some(FinalizerThread::spawn(Arc::clone(&shared))?)
        } else {
            None
        };

        log::debug!(
            "gengc initialized: gen0 {} bytes, heap limit {} bytes",
            shared.config.gen0_size,
            shared.config.max_heap_size
        );

        Ok(Self {
            shared,
            finalizer_thread,
        })
    }

    // ========================================================================
    // MUTATOR OPERATIONS
    // ========================================================================

    /// Enter a mutator scope
    ///
    /// The scope holds the heap lock until it is dropped, so no other thread
    /// can collect while it is alive. Collections triggered through the scope
    /// itself (allocation, [`Mutator::collect`]) still move objects.
    ///
    /// Calling back into this `GarbageCollector` on the same thread while the
    /// scope is alive deadlocks.
    pub fn mutator(&self) -> Mutator<'_> {
        Mutator {
            shared: &self.shared,
            state: self.shared.state.lock(),
        }
    }

    /// Allocate a zeroed object of `type_id` with a `size`-byte payload
    ///
    /// See [`Mutator::allocate`].
    pub fn allocate(&self, type_id: TypeId, size: usize, has_finalizer: bool) -> Result<ObjectRef> {
        self.mutator().allocate(type_id, size, has_finalizer)
    }

    /// Store a reference (or null) into the reference slot at `offset`
    pub fn write_ref(&self, obj: ObjectRef, offset: usize, value: Option<ObjectRef>) -> Result<()> {
        self.mutator().write_ref(obj, offset, value)
    }

    /// Load the reference slot at `offset`
    pub fn read_ref(&self, obj: ObjectRef, offset: usize) -> Result<Option<ObjectRef>> {
        self.mutator().read_ref(obj, offset)
    }

    pub fn write_data(&self, obj: ObjectRef, offset: usize, data: &[u8]) -> Result<()> {
        self.mutator().write_data(obj, offset, data)
    }

    pub fn read_data(&self, obj: ObjectRef, offset: usize, len: usize) -> Result<Vec<u8>> {
        self.mutator().read_data(obj, offset, len)
    }

    /// Payload size in bytes (rounded to 8)
    pub fn size_of(&self, obj: ObjectRef) -> Result<usize> {
        self.mutator().size_of(obj)
    }

    pub fn type_of(&self, obj: ObjectRef) -> Result<TypeId> {
        self.mutator().type_of(obj)
    }

    pub fn generation_of(&self, obj: ObjectRef) -> Result<Generation> {
        self.mutator().generation_of(obj)
    }

    // ========================================================================
    // FINALIZATION
    // ========================================================================

    /// Attach a finalizer callback to `obj`
    ///
    /// See [`Mutator::register_finalizer`].
    pub fn register_finalizer<F>(&self, obj: ObjectRef, callback: F) -> Result<()>
    where
        F: FnOnce(ObjectRef) + Send + 'static,
    {
        self.mutator().register_finalizer(obj, callback)
    }

    pub fn suppress_finalization(&self, obj: ObjectRef) -> Result<()> {
        self.mutator().suppress_finalization(obj)
    }

    /// Block until the F-reachable queue is empty and nothing is in flight
    ///
    /// Without a finalizer thread the queue is drained on the calling
    /// thread. Returns immediately when called from inside a finalizer.
    pub fn wait_for_pending_finalizers(&self) {
        if finalizer::in_finalizer() {
            return;
        }
        match &self.finalizer_thread {
            Some(thread) if thread.is_current() => {}
            Some(_) => self.shared.queue.wait_idle(),
            None => {
                self.run_pending_finalizers();
            }
        }
    }

    /// Run queued finalizers on the calling thread
    ///
    /// Returns the number of queue entries processed. Competes with the
    /// finalizer thread if one is running.
    pub fn run_pending_finalizers(&self) -> usize {
        if finalizer::in_finalizer() {
            return 0;
        }
        let mut processed = 0;
        while self.shared.run_next(WaitMode::WhilePending) {
            processed += 1;
        }
        processed
    }

    /// Queue entries not yet finished, the in-flight one included
    pub fn pending_finalizers(&self) -> usize {
        self.shared.queue.pending()
    }

    // ========================================================================
    // COLLECTION
    // ========================================================================

    /// Run a stop-the-world collection of `target`
    ///
    /// Blocks until the cycle is complete. Finalizers of objects found
    /// unreachable run later on the finalizer thread.
    ///
    /// # Errors
    /// `CorruptHeapInvariant` when `abort_on_corruption` is off and tracing
    /// finds a broken heap; the heap must not be used afterwards.
    pub fn collect(&self, target: CollectTarget) -> Result<CollectionReport> {
        self.mutator().collect(target)
    }

    // ========================================================================
    // WEAK HANDLES AND ROOTS
    // ========================================================================

    pub fn create_weak(&self, obj: ObjectRef) -> Result<WeakHandle> {
        self.mutator().create_weak(obj)
    }

    /// Current referent of a weak handle, `None` once collected
    pub fn resolve(&self, handle: WeakHandle) -> Result<Option<ObjectRef>> {
        self.mutator().resolve(handle)
    }

    pub fn free_weak(&self, handle: WeakHandle) -> Result<()> {
        self.mutator().free_weak(handle)
    }

    /// Register `obj` as a strong root
    pub fn add_root(&self, obj: ObjectRef) -> Result<RootHandle> {
        self.mutator().add_root(obj)
    }

    /// Current address of a rooted object
    pub fn root(&self, handle: RootHandle) -> Result<ObjectRef> {
        self.mutator().root(handle)
    }

    pub fn set_root(&self, handle: RootHandle, obj: ObjectRef) -> Result<()> {
        self.mutator().set_root(handle, obj)
    }

    pub fn remove_root(&self, handle: RootHandle) -> Result<()> {
        self.mutator().remove_root(handle)
    }

    /// Register an external root source
    ///
    /// The provider is called with the heap lock held during every
    /// collection.
    pub fn add_root_provider(&self, provider: Box<dyn RootProvider>) -> ProviderId {
        self.shared.state.lock().providers.add(provider)
    }

    pub fn remove_root_provider(&self, id: ProviderId) -> Result<()> {
        self.shared.state.lock().providers.remove(id).map(|_| ())
    }

    // ========================================================================
    // INTROSPECTION
    // ========================================================================

    /// Get GC statistics
    pub fn stats(&self) -> GcSummary {
        self.shared.stats.summary()
    }

    /// Statistics in exportable form
    pub fn metrics(&self) -> GcMetrics {
        self.shared.stats.metrics()
    }

    /// Get heap occupancy
    pub fn heap_info(&self) -> HeapInfo {
        let state = self.shared.state.lock();
        let heap = &state.heap;
        let (large_free_blocks, large_free_bytes) = heap.large().free_block_stats();
        HeapInfo {
            gen0_used: heap.used_in(Generation::Gen0),
            gen0_capacity: heap.arena(Generation::Gen0).capacity(),
            gen0_objects: heap.object_count(Generation::Gen0),
            gen1_used: heap.used_in(Generation::Gen1),
            gen1_objects: heap.object_count(Generation::Gen1),
            gen2_used: heap.used_in(Generation::Gen2),
            gen2_objects: heap.object_count(Generation::Gen2),
            large_used: heap.used_in(Generation::Large),
            large_objects: heap.object_count(Generation::Large),
            large_free_blocks,
            large_free_bytes,
            used_bytes: heap.used_bytes(),
            max_bytes: heap.max_size(),
            remembered_holders: state.barrier.remembered().len(),
            root_handles: state.roots.len(),
            root_providers: state.providers.len(),
            weak_handles: state.weak.len(),
            registered_finalizers: state.finalizers.len(),
        }
    }

    /// Get detailed diagnostic information
    pub fn diagnostics(&self) -> IndexMap<String, String> {
        let info = self.heap_info();
        let summary = self.stats();
        let mut diagnostics = IndexMap::new();

        diagnostics.insert("state".to_string(), format!("{:?}", self.state()));
        diagnostics.insert("cycle_count".to_string(), self.cycle_count().to_string());
        diagnostics.insert("heap_used".to_string(), info.used_bytes.to_string());
        diagnostics.insert("heap_max".to_string(), info.max_bytes.to_string());
        diagnostics.insert(
            "heap_utilization".to_string(),
            format!("{:.2}", info.utilization()),
        );
        for generation in Generation::ALL {
            diagnostics.insert(
                format!("{}_used", generation),
                info.used_in(generation).to_string(),
            );
        }
        diagnostics.insert("gen0_capacity".to_string(), info.gen0_capacity.to_string());
        diagnostics.insert(
            "remembered_holders".to_string(),
            info.remembered_holders.to_string(),
        );
        diagnostics.insert("weak_handles".to_string(), info.weak_handles.to_string());
        diagnostics.insert(
            "pending_finalizers".to_string(),
            self.pending_finalizers().to_string(),
        );
        diagnostics.insert(
            "finalizer_thread".to_string(),
            self.finalizer_thread.is_some().to_string(),
        );
        diagnostics.insert(
            "max_pause_ms".to_string(),
            format!("{:.3}", summary.max_pause_ms),
        );

        diagnostics
    }

    /// Get current GC state
    pub fn state(&self) -> GcState {
        *self.shared.gc_state.lock()
    }

    /// Check if GC is currently running
    pub fn is_collecting(&self) -> bool {
        self.state() != GcState::Idle
    }

    /// Get total GC cycles executed
    pub fn cycle_count(&self) -> u64 {
        self.shared.cycle_count.load(Ordering::Relaxed)
    }

    /// Events kept by this collector's log, oldest first
    pub fn events(&self) -> Vec<GcLogRecord> {
        self.shared.logger.get_events()
    }

    pub fn config(&self) -> &GcConfig {
        &self.shared.config
    }

    pub fn types(&self) -> &Arc<dyn TypeSystem> {
        &self.shared.types
    }
}

impl Drop for GarbageCollector {
    fn drop(&mut self) {
        match self.finalizer_thread.as_mut() {
            Some(thread) => thread.stop(&self.shared.queue),
            None => {
                let abandoned = self.shared.queue.shutdown();
                if abandoned > 0 {
                    log::debug!("{} queued finalizers dropped at shutdown", abandoned);
                }
            }
        }
    }
}

impl fmt::Debug for GarbageCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GarbageCollector")
            .field("state", &self.state())
            .field("cycle_count", &self.cycle_count())
            .field("finalizer_thread", &self.finalizer_thread)
            .finish()
    }
}

// ============================================================================
// MUTATOR SCOPE
// ============================================================================

/// Mutator scope holding the heap lock
///
/// Obtained from [`GarbageCollector::mutator`]. Other threads block at the
/// API boundary until the scope is dropped, so a sequence such as
/// allocate, initialize, root cannot be interleaved with a collection on
/// another thread.
///
/// A collection inside the scope, explicit or triggered by `allocate`,
/// releases the lock while a finalizer callback on another thread finishes.
/// References read before that collection are stale either way.
///
/// # Examples
///
/// ```rust
/// use gengc::{GarbageCollector, GcConfig, TypeInfo, TypeRegistry};
/// use std::sync::Arc;
///
/// let types = Arc::new(TypeRegistry::new());
/// let blob = types.register(TypeInfo::leaf("Blob"));
/// let gc = GarbageCollector::new(GcConfig::default(), types).unwrap();
///
/// let root = {
///     let mut m = gc.mutator();
///     let obj = m.allocate(blob, 8, false).unwrap();
///     m.write_data(obj, 0, &7u64.to_le_bytes()).unwrap();
///     m.add_root(obj).unwrap()
/// };
/// let obj = gc.root(root).unwrap();
/// assert_eq!(gc.read_data(obj, 0, 8).unwrap(), 7u64.to_le_bytes());
/// ```
pub struct Mutator<'gc> {
    shared: &'gc Shared,
    state: MutexGuard<'gc, HeapState>,
}

impl Mutator<'_> {
    /// Allocate a zeroed object of `type_id` with a `size`-byte payload
    ///
    /// May run collections synchronously. With `has_finalizer` the object is
    /// resurrected once when it becomes unreachable; attach the callback
    /// with [`register_finalizer`](Self::register_finalizer).
    ///
    /// # Errors
    /// `UnknownType`, `InvalidArgument` for a payload that cannot hold the
    /// type's reference fields, `OutOfMemory` when the heap limit is reached.
    pub fn allocate(&mut self, type_id: TypeId, size: usize, has_finalizer: bool) -> Result<ObjectRef> {
        let shared = self.shared;
        let request = shared
            .allocator
            .prepare(&*shared.types, type_id, size, has_finalizer)?;

        let mut ctx = AllocCtx {
            shared,
            state: &mut self.state,
        };

        match shared.allocator.allocate(&mut ctx, &request) {
            Ok(obj) => {
                shared.stats.record_allocation(request.block_size());
                Ok(obj)
            }
            Err(err) => {
                if let GcError::OutOfMemory { requested, .. } = err {
                    shared.stats.record_allocation_failure();
                    shared.emit(GcEvent::AllocationFailure {
                        size: requested,
                        heap_used: self.state.heap.used_bytes(),
                        heap_limit: self.state.heap.max_size(),
                    });
                }
                Err(err)
            }
        }
    }

    /// Store a reference (or null) into the reference slot at `offset`
    ///
    /// Runs the write barrier.
    pub fn write_ref(&mut self, obj: ObjectRef, offset: usize, value: Option<ObjectRef>) -> Result<()> {
        let state = &mut *self.state;
        state.heap.check(obj)?;
        if let Some(value) = value {
            state.heap.check(value)?;
        }
        self.shared.check_reference_slot(&state.heap, obj, offset)?;

        state
            .heap
            .write_word(obj.addr(), offset, value.map_or(0, ObjectRef::addr));
        state.barrier.on_reference_store(obj, value);
        Ok(())
    }

    pub fn read_ref(&self, obj: ObjectRef, offset: usize) -> Result<Option<ObjectRef>> {
        self.state.heap.check(obj)?;
        self.shared.check_reference_slot(&self.state.heap, obj, offset)?;
        Ok(ObjectRef::from_raw(self.state.heap.read_word(obj.addr(), offset)))
    }

    /// Copy raw bytes into the payload
    ///
    /// The range must not touch a reference slot.
    pub fn write_data(&mut self, obj: ObjectRef, offset: usize, data: &[u8]) -> Result<()> {
        let state = &mut *self.state;
        state.heap.check(obj)?;
        self.shared.check_data_range(&state.heap, obj, offset, data.len())?;
        state
            .heap
            .payload_mut(obj.addr(), offset, data.len())
            .copy_from_slice(data);
        Ok(())
    }

    /// Copy `len` raw payload bytes out
    pub fn read_data(&self, obj: ObjectRef, offset: usize, len: usize) -> Result<Vec<u8>> {
        let heap = &self.state.heap;
        heap.check(obj)?;
        let payload_size = heap.header(obj.addr()).payload_size();
        if offset.checked_add(len).map_or(true, |end| end > payload_size) {
            return Err(GcError::InvalidArgument(format!(
                "read of {} bytes at +{} exceeds payload of {} bytes",
                len, offset, payload_size
            )));
        }
        Ok(heap.payload(obj.addr(), offset, len).to_vec())
    }

    pub fn size_of(&self, obj: ObjectRef) -> Result<usize> {
        self.state.heap.check(obj)?;
        Ok(self.state.heap.header(obj.addr()).payload_size())
    }

    pub fn type_of(&self, obj: ObjectRef) -> Result<TypeId> {
        self.state.heap.check(obj)?;
        Ok(self.state.heap.header(obj.addr()).type_id)
    }

    pub fn generation_of(&self, obj: ObjectRef) -> Result<Generation> {
        self.state.heap.check(obj)
    }

    /// Attach a finalizer callback to `obj`
    ///
    /// Replaces a callback registered earlier and re-arms an object whose
    /// finalizer already ran or was suppressed.
    pub fn register_finalizer<F>(&mut self, obj: ObjectRef, callback: F) -> Result<()>
    where
        F: FnOnce(ObjectRef) + Send + 'static,
    {
        let state = &mut *self.state;
        state.heap.check(obj)?;

        let mut header = state.heap.header(obj.addr());
        let callback: finalizer::FinalizerFn = Box::new(callback);
        if header.finalizer_slot != 0 && state.finalizers.contains(header.finalizer_slot) {
            state.finalizers.replace(header.finalizer_slot, callback);
        } else {
            header.finalizer_slot = state.finalizers.insert(callback);
        }
        header.set_has_finalizer(true);
        header.set_finalized(false);
        state.heap.set_header(obj.addr(), &header);
        Ok(())
    }

    /// Mark `obj` as finalized and drop its callback
    ///
    /// A queued entry for `obj` is skipped when its turn comes.
    pub fn suppress_finalization(&mut self, obj: ObjectRef) -> Result<()> {
        let state = &mut *self.state;
        state.heap.check(obj)?;

        let mut header = state.heap.header(obj.addr());
        if header.needs_finalization() {
            self.shared.stats.record_finalizer_suppressed();
        }
        if header.finalizer_slot != 0 {
            state.finalizers.take(header.finalizer_slot);
            header.finalizer_slot = 0;
        }
        header.set_finalized(true);
        state.heap.set_header(obj.addr(), &header);
        Ok(())
    }

    /// Run a stop-the-world collection of `target`
    pub fn collect(&mut self, target: CollectTarget) -> Result<CollectionReport> {
        self.shared
            .collect_locked(&mut self.state, target, GcReason::Explicit)
    }

    /// Create a weak handle to `obj`
    pub fn create_weak(&mut self, obj: ObjectRef) -> Result<WeakHandle> {
        self.state.heap.check(obj)?;
        Ok(self.state.weak.create(obj))
    }

    pub fn resolve(&self, handle: WeakHandle) -> Result<Option<ObjectRef>> {
        self.state.weak.resolve(handle)
    }

    pub fn free_weak(&mut self, handle: WeakHandle) -> Result<()> {
        self.state.weak.free(handle)
    }

    pub fn add_root(&mut self, obj: ObjectRef) -> Result<RootHandle> {
        self.state.heap.check(obj)?;
        Ok(self.state.roots.add(obj))
    }

    pub fn root(&self, handle: RootHandle) -> Result<ObjectRef> {
        self.state.roots.get(handle)
    }

    pub fn set_root(&mut self, handle: RootHandle, obj: ObjectRef) -> Result<()> {
        self.state.heap.check(obj)?;
        self.state.roots.set(handle, obj)
    }

    pub fn remove_root(&mut self, handle: RootHandle) -> Result<()> {
        self.state.roots.remove(handle).map(|_| ())
    }
}

impl fmt::Debug for Mutator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutator")
            .field("heap_used", &self.state.heap.used_bytes())
            .finish()
    }
}

// ============================================================================
// COLLECTION CYCLE
// ============================================================================

impl Shared {
    fn emit(&self, event: GcEvent) {
        if self.config.verbose {
            logging::log_event(event.clone());
        }
        self.logger.log(event);
    }

    fn set_state(&self, state: GcState) {
        *self.gc_state.lock() = state;
    }

    fn type_info(&self, address: u64, type_id: TypeId) -> Result<Arc<TypeInfo>> {
        self.types
            .type_info(type_id)
            .ok_or_else(|| GcError::CorruptHeapInvariant {
                address,
                reason: format!("object has unknown {}", type_id),
            })
    }

    fn check_reference_slot(&self, heap: &Heap, obj: ObjectRef, offset: usize) -> Result<()> {
        let header = heap.header(obj.addr());
        let info = self.type_info(obj.addr(), header.type_id)?;
        if !info.is_reference_slot(header.payload_size(), offset) {
            return Err(GcError::InvalidArgument(format!(
                "offset +{} is not a reference slot of {}",
                offset,
                info.name()
            )));
        }
        Ok(())
    }

    fn check_data_range(&self, heap: &Heap, obj: ObjectRef, offset: usize, len: usize) -> Result<()> {
        let header = heap.header(obj.addr());
        let payload_size = header.payload_size();
        if offset.checked_add(len).map_or(true, |end| end > payload_size) {
            return Err(GcError::InvalidArgument(format!(
                "write of {} bytes at +{} exceeds payload of {} bytes",
                len, offset, payload_size
            )));
        }
        let info = self.type_info(obj.addr(), header.type_id)?;
        if info.overlaps_reference(payload_size, offset, len) {
            return Err(GcError::InvalidArgument(format!(
                "write of {} bytes at +{} overlaps a reference slot of {}",
                len,
                offset,
                info.name()
            )));
        }
        Ok(())
    }

    /// Let a finalizer callback running on another thread return first
    ///
    /// The heap lock is released while waiting so the callback can call into
    /// the collector. A collection started from inside the callback does not
    /// wait.
    fn wait_for_callback(&self, state: &mut MutexGuard<'_, HeapState>) {
        if finalizer::in_finalizer() {
            return;
        }
        while self.queue.callback_running() {
            log::trace!("collection waits for running finalizer");
            MutexGuard::unlocked(state, || self.queue.wait_callback());
        }
    }

    /// Run one collection with the heap lock held
    fn collect_locked(
        &self,
        state: &mut MutexGuard<'_, HeapState>,
        target: CollectTarget,
        reason: GcReason,
    ) -> Result<CollectionReport> {
        self.wait_for_callback(state);
        let cycle = self.cycle_count.fetch_add(1, Ordering::Relaxed) + 1;
        let mut report = CollectionReport::new(cycle, target, reason.to_string());
        report.heap_used_before = state.heap.used_bytes();

        log::debug!("gc #{} {} started: {}", cycle, target, reason);
        self.emit(GcEvent::CycleStart {
            cycle,
            target: target.to_string(),
            reason: reason.to_string(),
        });

        let pause = GcTimer::new();
        self.queue.begin_collection();
        let result = self.run_cycle(state, target, &mut report);
        self.queue.end_collection();
        self.set_state(GcState::Idle);

        if let Err(err) = result {
            reset_collection_bits(&mut state.heap, target.condemned());
            log::error!("gc #{} failed: {}", cycle, err);
            if matches!(err, GcError::CorruptHeapInvariant { .. }) && self.config.abort_on_corruption {
                std::process::abort();
            }
            return Err(err);
        }

        report.pause_ns = pause.elapsed_ns();
        report.heap_used_after = state.heap.used_bytes();
        self.stats.record_collection(&report);

        if report.finalizers_enqueued > 0 {
            self.emit(GcEvent::FinalizersQueued {
                cycle,
                count: report.finalizers_enqueued,
            });
        }
        if report.weak_cleared > 0 {
            self.emit(GcEvent::WeakCleared {
                cycle,
                count: report.weak_cleared,
            });
        }
        self.emit(GcEvent::CycleEnd {
            cycle,
            pause_ms: report.pause_ns as f64 / 1_000_000.0,
            reclaimed_bytes: report.bytes_reclaimed,
            promoted_bytes: report.bytes_promoted,
            heap_used: report.heap_used_after,
        });
        log::info!("{}", report.summary());

        Ok(report)
    }

    fn run_cycle(
        &self,
        state: &mut HeapState,
        target: CollectTarget,
        report: &mut CollectionReport,
    ) -> Result<()> {
        let condemned = target.condemned();
        let mut phase = GcTimer::new();

        let HeapState {
            heap,
            roots,
            providers,
            weak,
            barrier,
            finalizers,
        } = state;
        let remembered = barrier.remembered().holders_outside(|g| condemned.contains(g));

        // Phase 1: Marking
        self.set_state(GcState::Marking);
        let mut marker = Marker::new(heap, &*self.types, condemned);
        let mut root_slots = Vec::with_capacity(roots.len());
        roots.visit_mut(&mut |slot| root_slots.push(*slot));
        providers.visit_mut(&mut |slot| root_slots.push(*slot));
        self.queue.visit_mut(&mut |slot| root_slots.push(*slot));
        for root in root_slots {
            marker.mark_root(root)?;
        }
        for &holder in &remembered {
            marker.scan_holder(holder)?;
        }
        marker.drain()?;
        report.mark_ns = self.phase_end(report.cycle, "mark", &mut phase);

        // Phase 2: Finalization
        self.set_state(GcState::Finalizing);
        let candidates = marker.finalization_candidates();
        marker.resurrect(&candidates)?;
        let mark_stats = marker.stats();
        report.objects_marked = mark_stats.marked_objects + mark_stats.resurrected_objects;
        report.finalizers_enqueued = candidates.len();
        report.finalize_ns = self.phase_end(report.cycle, "finalize", &mut phase);

        // Phase 3: Compaction
        self.set_state(GcState::Compacting);
        let mut compactor = Compactor::new(heap, &*self.types, condemned, self.allocator.policy())?;
        roots.visit_mut(&mut |slot| compactor.fix_slot(slot));
        providers.visit_mut(&mut |slot| compactor.fix_slot(slot));
        self.queue.visit_mut(&mut |slot| compactor.fix_slot(slot));
        let resurrected: Vec<ObjectRef> = candidates
            .iter()
            .filter_map(|&address| ObjectRef::from_raw(address))
            .map(|obj| compactor.forward(obj))
            .collect();
        report.weak_cleared = weak.process(|referent| compactor.referent_status(referent));

        compactor.fix_heap_references(&remembered)?;
        let mut orphaned_slots = compactor.sweep_large()?;
        compactor.relocate();
        orphaned_slots.extend_from_slice(compactor.plan().orphaned_slots());
        let compaction = compactor.finish(&remembered, barrier.remembered_mut())?;

        finalizers.release(&orphaned_slots);
        self.queue.enqueue(resurrected);

        report.survivors = compaction.survivors;
        report.objects_reclaimed = compaction.reclaimed_objects;
        report.bytes_reclaimed = compaction.reclaimed_bytes;
        report.objects_promoted = compaction.promoted_objects;
        report.bytes_promoted = compaction.promoted_bytes;
        report.large_objects_swept = compaction.swept_large_objects;
        report.compact_ns = self.phase_end(report.cycle, "compact", &mut phase);
        Ok(())
    }

    fn phase_end(&self, cycle: u64, phase: &str, timer: &mut GcTimer) -> u64 {
        let elapsed = timer.lap();
        log::debug!("gc #{} {} phase: {:?}", cycle, phase, elapsed);
        self.emit(GcEvent::PhaseEnd {
            cycle,
            phase: phase.to_string(),
            duration_ms: elapsed.as_secs_f64() * 1000.0,
        });
        elapsed.as_nanos() as u64
    }
}

/// Clear mark and forwarding bits left by an aborted cycle
fn reset_collection_bits(heap: &mut Heap, condemned: CondemnedSet) {
    for generation in Generation::ALL {
        if !condemned.contains(generation) {
            continue;
        }
        for address in heap.objects_in(generation) {
            let mut header = heap.header(address);
            if header.is_marked() || header.is_forwarded() {
                header.set_marked(false);
                header.clear_forwarding();
                heap.set_header(address, &header);
            }
        }
    }
}

// ============================================================================
// FINALIZER RUNNER
// ============================================================================

impl FinalizerHost for Shared {
    fn queue(&self) -> &FinalizationQueue {
        &self.queue
    }

    fn run_next(&self, mode: WaitMode) -> bool {
        if self.queue.take_next(mode).is_none() {
            return false;
        }

        // The entry may have moved since it was dequeued; the queue slot is
        // kept current by the collector.
        let job = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            match self.queue.in_flight() {
                Some(obj) if state.heap.is_object(obj.addr()) => {
                    let mut header = state.heap.header(obj.addr());
                    if header.is_finalized() || header.finalizer_slot == 0 {
                        None
                    } else {
                        let slot = header.finalizer_slot;
                        header.finalizer_slot = 0;
                        state.heap.set_header(obj.addr(), &header);
                        let job = state.finalizers.take(slot).map(|callback| (obj, callback));
                        if job.is_some() {
                            self.queue.start_callback();
                        }
                        job
                    }
                }
                Some(obj) => {
                    log::error!("queued finalizer target {} is not an object", obj);
                    None
                }
                None => None,
            }
        };

        if let Some((obj, callback)) = job {
            let outcome = finalizer::invoke(callback, obj);
            self.queue.finish_callback();
            match outcome {
                Ok(()) => self.stats.record_finalizer_run(),
                Err(message) => {
                    self.stats.record_finalizer_fault();
                    let fault = GcError::FinalizerFault {
                        object: obj,
                        message: message.clone(),
                    };
                    log::error!("{}", fault);
                    self.emit(GcEvent::FinalizerFault {
                        object: obj.addr(),
                        message,
                    });
                }
            }
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(done) = self.queue.in_flight() {
            if state.heap.is_object(done.addr()) {
                let mut header = state.heap.header(done.addr());
                // A callback registered while this one ran re-arms the object.
                if header.finalizer_slot == 0 {
                    header.set_finalized(true);
                    state.heap.set_header(done.addr(), &header);
                }
            }
        }
        self.queue.complete();
        true
    }
}

// ============================================================================
// ALLOCATION CONTEXT
// ============================================================================

/// Collector view handed to the allocator while the heap lock is held
struct AllocCtx<'a, 'gc> {
    shared: &'a Shared,
    state: &'a mut MutexGuard<'gc, HeapState>,
}

impl AllocationContext for AllocCtx<'_, '_> {
    fn heap(&mut self) -> &mut Heap {
        &mut self.state.heap
    }

    fn collect(&mut self, target: CollectTarget, reason: GcReason) -> Result<()> {
        self.shared.collect_locked(self.state, target, reason).map(|_| ())
    }

    fn on_gen0_growth(&mut self, old: usize, new: usize) {
        log::warn!("gen0 grown from {} to {} bytes", old, new);
        self.shared.emit(GcEvent::HeapGrowth {
            generation: Generation::Gen0.to_string(),
            old_capacity: old,
            new_capacity: new,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ReferenceLayout, TypeRegistry};

    fn collector() -> (GarbageCollector, TypeId) {
        let types = Arc::new(TypeRegistry::new());
        let node = types.register(TypeInfo::new("Node", ReferenceLayout::Fields(vec![0])).unwrap());
        let config = GcConfig {
            finalizer_thread: false,
            abort_on_corruption: false,
            ..Default::default()
        };
        (GarbageCollector::new(config, types).unwrap(), node)
    }

    #[test]
    fn test_collector_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<GarbageCollector>();
    }

    #[test]
    fn test_rejects_invalid_config() {
        let types = Arc::new(TypeRegistry::new());
        let config = GcConfig {
            max_heap_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            GarbageCollector::new(config, types),
            Err(GcError::Configuration(_))
        ));
    }

    #[test]
    fn test_rooted_object_survives_and_moves() {
        let (gc, node) = collector();
        let _garbage = gc.allocate(node, 8, false).unwrap();
        let obj = gc.allocate(node, 16, false).unwrap();
        gc.write_data(obj, 8, &7u64.to_le_bytes()).unwrap();
        let root = gc.add_root(obj).unwrap();

        let report = gc.collect(CollectTarget::Gen0).unwrap();
        assert_eq!(report.objects_reclaimed, 1);
        assert_eq!(report.cycle, 1);

        let moved = gc.root(root).unwrap();
        assert_ne!(moved, obj);
        assert_eq!(gc.read_data(moved, 8, 8).unwrap(), 7u64.to_le_bytes());
        assert_eq!(gc.state(), GcState::Idle);
    }

    #[test]
    fn test_field_access_validation() {
        let (gc, node) = collector();
        let obj = gc.allocate(node, 16, false).unwrap();
        assert!(matches!(
            gc.write_ref(obj, 8, Some(obj)),
            Err(GcError::InvalidArgument(_))
        ));
        assert!(matches!(
            gc.write_data(obj, 4, &[0; 8]),
            Err(GcError::InvalidArgument(_))
        ));
        assert!(matches!(
            gc.read_data(obj, 8, 16),
            Err(GcError::InvalidArgument(_))
        ));
        gc.write_ref(obj, 0, Some(obj)).unwrap();
        assert_eq!(gc.read_ref(obj, 0).unwrap(), Some(obj));
        assert_eq!(gc.type_of(obj).unwrap(), node);
        assert_eq!(gc.size_of(obj).unwrap(), 16);
    }

    #[test]
    fn test_stale_reference_rejected() {
        let (gc, node) = collector();
        let obj = gc.allocate(node, 8, false).unwrap();
        gc.collect(CollectTarget::Gen0).unwrap();
        assert!(matches!(gc.size_of(obj), Err(GcError::InvalidObject { .. })));
    }

    #[test]
    fn test_mutator_scope_groups_operations() {
        let (gc, node) = collector();
        let root = {
            let mut m = gc.mutator();
            m.allocate(node, 8, false).unwrap();
            let obj = m.allocate(node, 16, false).unwrap();
            let root = m.add_root(obj).unwrap();
            let weak = m.create_weak(obj).unwrap();

            let report = m.collect(CollectTarget::Gen0).unwrap();
            assert_eq!(report.objects_reclaimed, 1);
            assert_eq!(m.resolve(weak).unwrap(), Some(m.root(root).unwrap()));
            root
        };
        assert_eq!(gc.cycle_count(), 1);
        assert_eq!(gc.generation_of(gc.root(root).unwrap()).unwrap(), Generation::Gen0);
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(GcReason::Explicit.to_string(), "explicit");
        assert_eq!(
            GcReason::Gen0Exhausted { requested: 64 }.to_string(),
            "gen0 exhausted (64 bytes requested)"
        );
    }

    #[test]
    fn test_events_recorded() {
        let (gc, _) = collector();
        gc.collect(CollectTarget::Full).unwrap();
        let events = gc.events();
        assert!(matches!(events.first().map(|r| &r.event), Some(GcEvent::CycleStart { .. })));
        assert!(matches!(events.last().map(|r| &r.event), Some(GcEvent::CycleEnd { .. })));
    }
}
