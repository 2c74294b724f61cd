//! GC Finalization Tests - Deferred Finalizers and Resurrection
//!
//! These tests verify that:
//! - An unreachable finalizable object is resurrected, queued and finalized
//!   exactly once, then reclaimed by a later collection
//! - Everything reachable from it stays alive until its finalizer has run
//! - Suppression, re-registration and panicking finalizers behave
//! - The finalizer thread runs callbacks outside every collector lock

mod common;

use common::{assert_reclaimed, GcFixture, NEXT, TEST_TIMEOUT};
use gengc::{
    in_finalizer, CollectTarget, GcEvent, ObjectRef, SharedRoots, FINALIZER_THREAD_NAME,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

fn counting_finalizer(count: &Arc<AtomicUsize>) -> impl FnOnce(ObjectRef) + Send + 'static {
    let count = Arc::clone(count);
    move |_| {
        count.fetch_add(1, Ordering::SeqCst);
    }
}

/// ============================================================================
/// LIFECYCLE TESTS
/// ============================================================================

/// **Bug this finds:** finalizer run twice, run early, or object freed
/// before its finalizer
#[test]
fn test_finalizer_runs_exactly_once() {
    let fixture = GcFixture::with_defaults();
    let runs = counter();
    let obj = fixture.finalizable_node(1);
    fixture.gc.register_finalizer(obj, counting_finalizer(&runs)).unwrap();

    let first = fixture.collect(CollectTarget::Full);
    assert_eq!(first.finalizers_enqueued, 1);
    assert_reclaimed(&first, 0, "finalizable object is resurrected");
    assert_eq!(runs.load(Ordering::SeqCst), 0, "finalizer ran during collection");
    assert_eq!(fixture.gc.pending_finalizers(), 1);

    assert_eq!(fixture.gc.run_pending_finalizers(), 1);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.gc.pending_finalizers(), 0);

    let second = fixture.collect(CollectTarget::Full);
    assert_eq!(second.finalizers_enqueued, 0);
    assert_reclaimed(&second, 1, "finalized object");
    assert_eq!(fixture.gc.run_pending_finalizers(), 0);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let stats = fixture.gc.stats();
    assert_eq!(stats.finalizers_enqueued, 1);
    assert_eq!(stats.finalizers_run, 1);
}

#[test]
fn test_reachable_finalizable_object_not_queued() {
    let fixture = GcFixture::with_defaults();
    let runs = counter();
    let obj = fixture.finalizable_node(1);
    fixture.gc.register_finalizer(obj, counting_finalizer(&runs)).unwrap();
    let _root = fixture.gc.add_root(obj).unwrap();

    let report = fixture.collect(CollectTarget::Full);

    assert_eq!(report.finalizers_enqueued, 0);
    assert_eq!(fixture.gc.run_pending_finalizers(), 0);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

/// **Bug this finds:** finalizer observing freed children
#[test]
fn test_children_kept_until_finalized() {
    let fixture = GcFixture::with_defaults();
    let parent = fixture.finalizable_node(1);
    let child = fixture.node(2);
    fixture.link(parent, NEXT, child);
    let child_weak = fixture.gc.create_weak(child).unwrap();
    let parent_weak = fixture.gc.create_weak(parent).unwrap();

    fixture.collect(CollectTarget::Full);

    let parent_now = fixture.gc.resolve(parent_weak).unwrap().expect("parent resurrected");
    let child_now = fixture.gc.resolve(child_weak).unwrap().expect("child kept by parent");
    assert_eq!(fixture.next(parent_now), Some(child_now));
    assert_eq!(fixture.value(child_now), 2);

    fixture.gc.run_pending_finalizers();
    let report = fixture.collect(CollectTarget::Full);

    assert_reclaimed(&report, 2, "parent and child after finalization");
    assert_eq!(report.weak_cleared, 2);
    assert_eq!(fixture.gc.resolve(parent_weak).unwrap(), None);
    assert_eq!(fixture.gc.resolve(child_weak).unwrap(), None);
}

/// **Bug this finds:** callback handed a pre-move address
#[test]
fn test_finalizer_receives_current_address() {
    let fixture = GcFixture::with_defaults();
    let _garbage = fixture.leaf(64);
    let obj = fixture.finalizable_node(77);
    let weak = fixture.gc.create_weak(obj).unwrap();

    let seen: Arc<Mutex<Option<ObjectRef>>> = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    fixture
        .gc
        .register_finalizer(obj, move |obj| *sink.lock() = Some(obj))
        .unwrap();

    fixture.collect(CollectTarget::Gen0);
    let current = fixture.gc.resolve(weak).unwrap().unwrap();
    assert_ne!(current, obj, "resurrected object should slide over the leaf");

    fixture.gc.run_pending_finalizers();
    assert_eq!(*seen.lock(), Some(current));
    assert_eq!(fixture.value(current), 77);
}

#[test]
fn test_finalizable_object_without_callback() {
    let fixture = GcFixture::with_defaults();
    fixture.finalizable_node(1);

    let first = fixture.collect(CollectTarget::Gen0);
    assert_eq!(first.finalizers_enqueued, 1);
    assert_eq!(fixture.gc.run_pending_finalizers(), 1);

    let second = fixture.collect(CollectTarget::Gen0);
    assert_reclaimed(&second, 1, "finalized object without callback");
}

/// ============================================================================
/// SUPPRESSION AND RE-REGISTRATION TESTS
/// ============================================================================

#[test]
fn test_suppressed_object_reclaimed_immediately() {
    let fixture = GcFixture::with_defaults();
    let runs = counter();
    let obj = fixture.finalizable_node(1);
    fixture.gc.register_finalizer(obj, counting_finalizer(&runs)).unwrap();
    fixture.gc.suppress_finalization(obj).unwrap();

    let report = fixture.collect(CollectTarget::Gen0);

    assert_eq!(report.finalizers_enqueued, 0);
    assert_reclaimed(&report, 1, "suppressed object");
    assert_eq!(fixture.gc.run_pending_finalizers(), 0);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(fixture.gc.stats().finalizers_suppressed, 1);
    assert_eq!(fixture.gc.heap_info().registered_finalizers, 0);
}

/// **Bug this finds:** suppression ignored for already queued objects
#[test]
fn test_suppress_after_enqueue_skips_callback() {
    let fixture = GcFixture::with_defaults();
    let runs = counter();
    let obj = fixture.finalizable_node(1);
    fixture.gc.register_finalizer(obj, counting_finalizer(&runs)).unwrap();
    let weak = fixture.gc.create_weak(obj).unwrap();

    fixture.collect(CollectTarget::Gen0);
    let queued = fixture.gc.resolve(weak).unwrap().unwrap();
    fixture.gc.suppress_finalization(queued).unwrap();

    assert_eq!(fixture.gc.run_pending_finalizers(), 1);
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    let report = fixture.collect(CollectTarget::Gen0);
    assert_reclaimed(&report, 1, "suppressed queued object");
}

/// **Bug this finds:** re-registered finalizers ignored
#[test]
fn test_reregistration_rearms_finalizer() {
    let fixture = GcFixture::with_defaults();
    let runs = counter();
    let obj = fixture.finalizable_node(1);
    fixture.gc.register_finalizer(obj, counting_finalizer(&runs)).unwrap();
    let weak = fixture.gc.create_weak(obj).unwrap();

    fixture.collect(CollectTarget::Full);
    fixture.gc.run_pending_finalizers();
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let obj = fixture.gc.resolve(weak).unwrap().expect("finalized but not yet collected");
    fixture.gc.register_finalizer(obj, counting_finalizer(&runs)).unwrap();

    let report = fixture.collect(CollectTarget::Full);
    assert_eq!(report.finalizers_enqueued, 1);
    fixture.gc.run_pending_finalizers();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn test_register_replaces_callback() {
    let fixture = GcFixture::with_defaults();
    let first = counter();
    let second = counter();
    let obj = fixture.finalizable_node(1);
    fixture.gc.register_finalizer(obj, counting_finalizer(&first)).unwrap();
    fixture.gc.register_finalizer(obj, counting_finalizer(&second)).unwrap();
    assert_eq!(fixture.gc.heap_info().registered_finalizers, 1);

    fixture.collect(CollectTarget::Gen0);
    fixture.gc.run_pending_finalizers();

    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 1);
}

/// ============================================================================
/// FAULT TESTS
/// ============================================================================

/// **Bug this finds:** one panicking finalizer stopping the drain loop
#[test]
fn test_panicking_finalizer_is_contained() {
    let fixture = GcFixture::with_defaults();
    let runs = counter();

    let bad = fixture.finalizable_node(1);
    fixture
        .gc
        .register_finalizer(bad, |_| panic!("finalizer failure"))
        .unwrap();
    let good = fixture.finalizable_node(2);
    fixture.gc.register_finalizer(good, counting_finalizer(&runs)).unwrap();

    fixture.collect(CollectTarget::Full);
    assert_eq!(fixture.gc.run_pending_finalizers(), 2);

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    let stats = fixture.gc.stats();
    assert_eq!(stats.finalizer_faults, 1);
    assert_eq!(stats.finalizers_run, 1);

    let fault = fixture.gc.events().into_iter().find_map(|record| match record.event {
        GcEvent::FinalizerFault { message, .. } => Some(message),
        _ => None,
    });
    assert_eq!(fault.as_deref(), Some("finalizer failure"));

    // The faulted object counts as finalized.
    let report = fixture.collect(CollectTarget::Full);
    assert_reclaimed(&report, 2, "both finalized objects");
}

/// ============================================================================
/// RESURRECTION TESTS
/// ============================================================================

/// **Bug this finds:** resurrected objects freed, or finalized twice
#[test]
fn test_finalizer_can_resurrect_object() {
    let fixture = GcFixture::with_defaults();
    let runs = counter();
    let roots = SharedRoots::new();
    fixture.gc.add_root_provider(Box::new(roots.clone()));

    let obj = fixture.finalizable_node(31);
    let keep = roots.clone();
    let count = Arc::clone(&runs);
    fixture
        .gc
        .register_finalizer(obj, move |obj| {
            count.fetch_add(1, Ordering::SeqCst);
            keep.push(obj);
        })
        .unwrap();

    fixture.collect(CollectTarget::Full);
    fixture.gc.run_pending_finalizers();

    for _ in 0..3 {
        let report = fixture.collect(CollectTarget::Full);
        assert_reclaimed(&report, 0, "resurrected object");
        assert_eq!(report.finalizers_enqueued, 0);
    }
    let obj = roots.get(0).expect("finalizer stored the object");
    assert_eq!(fixture.value(obj), 31);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

/// **Bug this finds:** finalizers deadlocking when they call back into the
/// collector
#[test]
fn test_finalizer_may_call_collector() {
    let fixture = GcFixture::with_defaults();
    let roots = SharedRoots::new();
    fixture.gc.add_root_provider(Box::new(roots.clone()));

    let gc = Arc::downgrade(&fixture.gc);
    let node = fixture.node;
    let keep = roots.clone();
    let obj = fixture.finalizable_node(1);
    fixture
        .gc
        .register_finalizer(obj, move |_| {
            assert!(in_finalizer());
            let gc = gc.upgrade().expect("collector alive while finalizers run");
            gc.wait_for_pending_finalizers();
            assert_eq!(gc.run_pending_finalizers(), 0);
            let fresh = gc.allocate(node, 24, false).expect("allocation inside finalizer");
            gc.write_data(fresh, 16, &5u64.to_le_bytes()).unwrap();
            keep.push(fresh);
        })
        .unwrap();

    fixture.collect(CollectTarget::Full);
    assert_eq!(fixture.gc.run_pending_finalizers(), 1);
    assert!(!in_finalizer());

    fixture.collect(CollectTarget::Full);
    let fresh = roots.get(0).expect("allocated by the finalizer");
    assert_eq!(fixture.value(fresh), 5);
}

/// ============================================================================
/// FINALIZER THREAD TESTS
/// ============================================================================

#[test]
fn test_finalizer_thread_runs_callbacks() {
    let fixture = GcFixture::with_finalizer_thread();
    let (tx, rx) = mpsc::channel();

    let obj = fixture.finalizable_node(1);
    fixture
        .gc
        .register_finalizer(obj, move |_| {
            let name = std::thread::current().name().map(str::to_string);
            let _ = tx.send((name, in_finalizer()));
        })
        .unwrap();

    fixture.collect(CollectTarget::Full);
    let (name, flagged) = rx.recv_timeout(TEST_TIMEOUT).expect("finalizer never ran");

    assert_eq!(name.as_deref(), Some(FINALIZER_THREAD_NAME));
    assert!(flagged);
}

/// **Bug this finds:** wait returning before queued finalizers ran
#[test]
fn test_wait_for_pending_finalizers() {
    let fixture = GcFixture::with_finalizer_thread();
    let runs = counter();
    for i in 0..50 {
        let obj = fixture.finalizable_node(i);
        fixture.gc.register_finalizer(obj, counting_finalizer(&runs)).unwrap();
    }

    let report = fixture.collect(CollectTarget::Full);
    assert_eq!(report.finalizers_enqueued, 50);
    fixture.gc.wait_for_pending_finalizers();

    assert_eq!(runs.load(Ordering::SeqCst), 50);
    assert_eq!(fixture.gc.pending_finalizers(), 0);

    let report = fixture.collect(CollectTarget::Full);
    assert_reclaimed(&report, 50, "finalized objects");
}

#[test]
fn test_wait_without_thread_drains_inline() {
    let fixture = GcFixture::with_defaults();
    let runs = counter();
    let obj = fixture.finalizable_node(1);
    fixture.gc.register_finalizer(obj, counting_finalizer(&runs)).unwrap();

    fixture.collect(CollectTarget::Gen0);
    fixture.gc.wait_for_pending_finalizers();

    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

/// **Bug this finds:** shutdown hanging on a non-empty queue
#[test]
fn test_drop_with_pending_finalizers() {
    let fixture = GcFixture::with_finalizer_thread();
    for i in 0..100 {
        fixture.finalizable_node(i);
    }
    fixture.collect(CollectTarget::Full);
    drop(fixture);
}
