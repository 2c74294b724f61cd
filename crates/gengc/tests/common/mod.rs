//! Test Utilities for the gengc Test Suite
//!
//! Provides a [`GcFixture`] with a small type universe and helpers to build
//! and verify object graphs. Assertions are strict: a moved object must keep
//! its payload and its edges, bit for bit.

#![allow(dead_code)]

use gengc::{
    CollectTarget, CollectionReport, GarbageCollector, GcConfig, ObjectRef, ReferenceLayout,
    RootHandle, TypeId, TypeInfo, TypeRegistry,
};
use std::sync::Arc;
use std::time::Duration;

/// Maximum time a test may wait for the finalizer thread
pub const TEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Payload of a node: `next` at 0, `other` at 8, value at 16
pub const NODE_SIZE: usize = 24;
pub const NEXT: usize = 0;
pub const OTHER: usize = 8;
pub const VALUE: usize = 16;

/// Payload size that always lands in the large object space
pub const LARGE_SIZE: usize = 100_000;

/// ============================================================================
/// GC FIXTURE
/// ============================================================================

/// Test fixture for GC operations
///
/// Registers three types:
/// - `node`: two reference fields and a u64 value
/// - `leaf`: plain data
/// - `array`: every slot is a reference
pub struct GcFixture {
    pub gc: Arc<GarbageCollector>,
    pub types: Arc<TypeRegistry>,
    pub config: GcConfig,
    pub node: TypeId,
    pub leaf: TypeId,
    pub array: TypeId,
}

impl GcFixture {
    /// Deterministic fixture: finalizers only run through
    /// `run_pending_finalizers`
    pub fn with_defaults() -> Self {
        Self::with_config(test_config())
    }

    /// Fixture with the background finalizer thread running
    pub fn with_finalizer_thread() -> Self {
        Self::with_config(GcConfig {
            finalizer_thread: true,
            ..test_config()
        })
    }

    /// Fixture with a small Gen0 so allocation triggers collections quickly
    pub fn with_small_gen0() -> Self {
        Self::with_config(GcConfig {
            gen0_size: 16 * 1024,
            large_object_threshold: 4 * 1024,
            ..test_config()
        })
    }

    /// Fixture with a hard heap limit (for OOM tests)
    pub fn with_heap_limit(max_heap_size: usize) -> Self {
        Self::with_config(GcConfig {
            gen0_size: 64 * 1024,
            max_heap_size,
            large_object_threshold: 8 * 1024,
            gen1_budget: 64 * 1024,
            gen2_budget: 256 * 1024,
            loh_budget: 256 * 1024,
            ..test_config()
        })
    }

    pub fn with_config(config: GcConfig) -> Self {
        let types = Arc::new(TypeRegistry::new());
        let node = types.register(
            TypeInfo::new("Node", ReferenceLayout::Fields(vec![NEXT as u32, OTHER as u32]))
                .expect("node layout is slot aligned"),
        );
        let leaf = types.register(TypeInfo::leaf("Leaf"));
        let array = types.register(TypeInfo::array("Array"));

        let gc = Arc::new(
            GarbageCollector::new(config.clone(), types.clone())
                .expect("GC initialization should succeed with valid config"),
        );

        Self {
            gc,
            types,
            config,
            node,
            leaf,
            array,
        }
    }

    // === Allocation ===

    /// Allocate a node carrying `value`
    pub fn node(&self, value: u64) -> ObjectRef {
        let obj = self
            .gc
            .allocate(self.node, NODE_SIZE, false)
            .unwrap_or_else(|e| panic!("Node allocation failed: {:?}", e));
        self.set_value(obj, value);
        obj
    }

    /// Allocate a finalizable node carrying `value`
    pub fn finalizable_node(&self, value: u64) -> ObjectRef {
        let obj = self
            .gc
            .allocate(self.node, NODE_SIZE, true)
            .unwrap_or_else(|e| panic!("Finalizable node allocation failed: {:?}", e));
        self.set_value(obj, value);
        obj
    }

    /// Allocate a plain data object
    pub fn leaf(&self, size: usize) -> ObjectRef {
        self.gc
            .allocate(self.leaf, size, false)
            .unwrap_or_else(|e| panic!("Allocation of {} bytes failed: {:?}", size, e))
    }

    /// Allocate a reference array with `slots` slots
    pub fn array(&self, slots: usize) -> ObjectRef {
        self.gc
            .allocate(self.array, slots * 8, false)
            .unwrap_or_else(|e| panic!("Array allocation failed: {:?}", e))
    }

    /// Build a rooted singly linked list holding `values` in order
    pub fn rooted_list(&self, values: impl IntoIterator<Item = u64>) -> RootHandle {
        let values: Vec<u64> = values.into_iter().collect();
        assert!(!values.is_empty(), "list needs at least one node");

        // Build back to front so each node is linked before the next
        // allocation can trigger a collection.
        let mut head = self.node(values[values.len() - 1]);
        let root = self.gc.add_root(head).expect("Failed to register root");
        for value in values.iter().rev().skip(1) {
            let node = self.node(*value);
            head = self.gc.root(root).expect("root handle is live");
            self.link(node, NEXT, head);
            self.gc.set_root(root, node).expect("root handle is live");
        }
        root
    }

    // === Field Access ===

    pub fn link(&self, from: ObjectRef, offset: usize, to: ObjectRef) {
        self.gc
            .write_ref(from, offset, Some(to))
            .unwrap_or_else(|e| panic!("write_ref {} +{} failed: {:?}", from, offset, e));
    }

    pub fn next(&self, obj: ObjectRef) -> Option<ObjectRef> {
        self.gc.read_ref(obj, NEXT).expect("read_ref on a live node")
    }

    pub fn set_value(&self, obj: ObjectRef, value: u64) {
        self.gc
            .write_data(obj, VALUE, &value.to_le_bytes())
            .expect("write value");
    }

    pub fn value(&self, obj: ObjectRef) -> u64 {
        let bytes = self.gc.read_data(obj, VALUE, 8).expect("read value");
        u64::from_le_bytes(bytes.try_into().expect("eight bytes"))
    }

    /// Values along the `next` chain starting at `head`
    pub fn list_values(&self, head: ObjectRef) -> Vec<u64> {
        let mut values = Vec::new();
        let mut cursor = Some(head);
        while let Some(node) = cursor {
            values.push(self.value(node));
            cursor = self.next(node);
        }
        values
    }

    // === Collection ===

    pub fn collect(&self, target: CollectTarget) -> CollectionReport {
        self.gc
            .collect(target)
            .unwrap_or_else(|e| panic!("{} collection failed: {:?}", target, e))
    }

    /// Age a rooted object until it reaches Gen1
    pub fn promote_to_gen1(&self) {
        self.collect(CollectTarget::Gen0);
        self.collect(CollectTarget::Gen0);
    }

    pub fn cycle_count(&self) -> u64 {
        self.gc.cycle_count()
    }
}

/// Base configuration of every fixture
pub fn test_config() -> GcConfig {
    GcConfig {
        finalizer_thread: false,
        abort_on_corruption: false,
        verbose: false,
        ..Default::default()
    }
}

/// ============================================================================
/// STRICT ASSERTION HELPERS
/// ============================================================================

/// Assert that a rooted list still holds exactly `expected`
#[track_caller]
pub fn assert_list_intact(fixture: &GcFixture, root: RootHandle, expected: &[u64], context: &str) {
    let head = fixture
        .gc
        .root(root)
        .unwrap_or_else(|e| panic!("{}: root handle lost: {:?}", context, e));
    let values = fixture.list_values(head);
    assert_eq!(
        values, expected,
        "{}: list contents changed across collection - survivor copy or fix-up bug",
        context
    );
}

/// Assert that a collection reclaimed exactly `expected` objects
#[track_caller]
pub fn assert_reclaimed(report: &CollectionReport, expected: usize, context: &str) {
    assert_eq!(
        report.objects_reclaimed, expected,
        "{}: {} collection reclaimed {} objects, expected {}",
        context, report.target, report.objects_reclaimed, expected
    );
}

/// Assert that a reference no longer names an object
#[track_caller]
pub fn assert_stale(fixture: &GcFixture, obj: ObjectRef, context: &str) {
    assert!(
        matches!(fixture.gc.size_of(obj), Err(gengc::GcError::InvalidObject { .. })),
        "{}: {} should no longer be a valid object",
        context,
        obj
    );
}
