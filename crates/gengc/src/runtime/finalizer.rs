//! Finalizer - Deferred Object Finalization
//!
//! Objects with a registered finalizer are not freed the first time they
//! become unreachable. The collector resurrects them and appends them to the
//! F-reachable queue; the finalizer thread then runs their callbacks one by
//! one, outside every collector lock.
//!
//! ```text
//!   collect ──resurrect──▶ [queue: A B C] ──pop──▶ in flight ──▶ callback(A)
//!                                                       │
//!                          next collect frees A ◀── is_finalized = true
//! ```
//!
//! The thread never starts a callback while a collection is running, and a
//! collection waits for a running callback to return before it moves
//! anything. The in-flight entry stays a root until its callback returns.
//!
//! Finalizers should be avoided when possible:
//! - Unpredictable timing
//! - Objects survive at least one extra collection
//!
//! Use only for cleanup of native resources.

use crate::error::{GcError, Result};
use crate::object::ObjectRef;
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

/// Opaque finalizer callback
pub type FinalizerFn = Box<dyn FnOnce(ObjectRef) + Send + 'static>;

/// Name of the background finalizer thread
pub const FINALIZER_THREAD_NAME: &str = "gengc-finalizer";

thread_local! {
    static IN_FINALIZER: Cell<bool> = const { Cell::new(false) };
}

/// Check if the current thread is inside a finalizer callback
pub fn in_finalizer() -> bool {
    IN_FINALIZER.with(|flag| flag.get())
}

/// Run a callback with panics caught
///
/// Returns the panic message when the callback panicked.
pub fn invoke(callback: FinalizerFn, obj: ObjectRef) -> std::result::Result<(), String> {
    struct Reset(bool);
    impl Drop for Reset {
        fn drop(&mut self) {
            IN_FINALIZER.with(|flag| flag.set(self.0));
        }
    }

    let _reset = Reset(IN_FINALIZER.with(|flag| flag.replace(true)));
    panic::catch_unwind(AssertUnwindSafe(move || callback(obj))).map_err(|payload| {
        if let Some(message) = payload.downcast_ref::<&str>() {
            message.to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "finalizer panicked".to_string()
        }
    })
}

// ============================================================================
// FINALIZER TABLE
// ============================================================================

/// FinalizerTable - callbacks by slot id
///
/// The slot id is stored in the object header, so the callback follows the
/// object when it moves. Slot 0 means "no callback".
pub struct FinalizerTable {
    callbacks: FxHashMap<u64, FinalizerFn>,
    next_slot: u64,
}

impl FinalizerTable {
    pub fn new() -> Self {
        Self {
            callbacks: FxHashMap::default(),
            next_slot: 1,
        }
    }

    /// Store a callback and return its slot
    pub fn insert(&mut self, callback: FinalizerFn) -> u64 {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.callbacks.insert(slot, callback);
        slot
    }

    /// Replace the callback in an existing slot
    ///
    /// Returns false if the slot is unknown.
    pub fn replace(&mut self, slot: u64, callback: FinalizerFn) -> bool {
        match self.callbacks.get_mut(&slot) {
            Some(existing) => {
                *existing = callback;
                true
            }
            None => false,
        }
    }

    pub fn take(&mut self, slot: u64) -> Option<FinalizerFn> {
        self.callbacks.remove(&slot)
    }

    /// Drop callbacks of objects that were freed
    pub fn release(&mut self, slots: &[u64]) -> usize {
        slots
            .iter()
            .filter(|slot| self.callbacks.remove(slot).is_some())
            .count()
    }

    pub fn contains(&self, slot: u64) -> bool {
        self.callbacks.contains_key(&slot)
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl Default for FinalizerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FinalizerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalizerTable")
            .field("callbacks", &self.callbacks.len())
            .field("next_slot", &self.next_slot)
            .finish()
    }
}

// ============================================================================
// F-REACHABLE QUEUE
// ============================================================================

/// How `FinalizationQueue::take_next` behaves when nothing is runnable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Sleep until an entry arrives or the queue shuts down
    Block,
    /// Return `None` as soon as the queue is empty
    WhilePending,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<ObjectRef>,
    in_flight: Option<ObjectRef>,
    /// The in-flight entry's callback is executing
    callback_running: bool,
    collecting: bool,
    shutdown: bool,
    enqueued_total: u64,
    completed_total: u64,
}

impl QueueState {
    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_none()
    }
}

/// FinalizationQueue - FIFO of resurrected objects
///
/// Shared between the collector (producer) and finalizer runners
/// (consumers). At most one entry is in flight at a time, so callbacks run
/// in queue order.
#[derive(Debug, Default)]
pub struct FinalizationQueue {
    state: Mutex<QueueState>,
    /// Signalled when an entry may have become runnable
    ready: Condvar,
    /// Signalled when the queue drains
    idle: Condvar,
    /// Signalled when a callback returns
    callback_done: Condvar,
}

impl FinalizationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop runners from starting callbacks until `end_collection`
    pub fn begin_collection(&self) {
        self.state.lock().collecting = true;
    }

    pub fn end_collection(&self) {
        let mut state = self.state.lock();
        state.collecting = false;
        if !state.pending.is_empty() {
            self.ready.notify_all();
        }
    }

    /// Append resurrected objects in order
    pub fn enqueue(&self, objects: impl IntoIterator<Item = ObjectRef>) -> usize {
        let mut state = self.state.lock();
        let before = state.pending.len();
        state.pending.extend(objects);
        let added = state.pending.len() - before;
        state.enqueued_total += added as u64;
        if added > 0 && !state.collecting {
            self.ready.notify_all();
        }
        added
    }

    /// Visit every queued and in-flight entry as a mutable root slot
    pub fn visit_mut(&self, visitor: &mut dyn FnMut(&mut ObjectRef)) {
        let mut state = self.state.lock();
        for entry in state.pending.iter_mut() {
            visitor(entry);
        }
        if let Some(entry) = state.in_flight.as_mut() {
            visitor(entry);
        }
    }

    /// Mark the in-flight entry's callback as executing
    ///
    /// Called with the heap lock held, so no collection is running.
    pub fn start_callback(&self) {
        self.state.lock().callback_running = true;
    }

    pub fn finish_callback(&self) {
        self.state.lock().callback_running = false;
        self.callback_done.notify_all();
    }

    pub fn callback_running(&self) -> bool {
        self.state.lock().callback_running
    }

    /// Block until no callback is executing
    pub fn wait_callback(&self) {
        let mut state = self.state.lock();
        while state.callback_running {
            self.callback_done.wait(&mut state);
        }
    }

    /// Make the next entry the in-flight one
    ///
    /// Returns `None` once shut down, or in `WhilePending` mode when the
    /// queue is empty.
    pub fn take_next(&self, mode: WaitMode) -> Option<ObjectRef> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if state.pending.is_empty() && mode == WaitMode::WhilePending {
                return None;
            }
            if !state.collecting && state.in_flight.is_none() {
                if let Some(next) = state.pending.pop_front() {
                    state.in_flight = Some(next);
                    return Some(next);
                }
            }
            self.ready.wait(&mut state);
        }
    }

    /// Current address of the in-flight entry
    pub fn in_flight(&self) -> Option<ObjectRef> {
        self.state.lock().in_flight
    }

    /// Clear the in-flight entry and wake waiters
    ///
    /// Returns the entry's current address.
    pub fn complete(&self) -> Option<ObjectRef> {
        let mut state = self.state.lock();
        let done = state.in_flight.take();
        if done.is_some() {
            state.completed_total += 1;
        }
        if state.is_idle() {
            self.idle.notify_all();
        }
        self.ready.notify_all();
        done
    }

    /// Block until nothing is queued or in flight
    pub fn wait_idle(&self) {
        let mut state = self.state.lock();
        while !state.is_idle() && !state.shutdown {
            self.idle.wait(&mut state);
        }
    }

    /// Wake every waiter and refuse further work
    ///
    /// Returns the number of entries that will never run.
    pub fn shutdown(&self) -> usize {
        let mut state = self.state.lock();
        state.shutdown = true;
        self.ready.notify_all();
        self.idle.notify_all();
        self.callback_done.notify_all();
        state.pending.len()
    }

    /// Entries waiting to run, the in-flight one included
    pub fn pending(&self) -> usize {
        let state = self.state.lock();
        state.pending.len() + usize::from(state.in_flight.is_some())
    }

    pub fn enqueued_total(&self) -> u64 {
        self.state.lock().enqueued_total
    }

    pub fn completed_total(&self) -> u64 {
        self.state.lock().completed_total
    }
}

// ============================================================================
// FINALIZER THREAD
// ============================================================================

/// What the finalizer thread drives
pub trait FinalizerHost: Send + Sync + 'static {
    fn queue(&self) -> &FinalizationQueue;

    /// Run the next queued finalizer
    ///
    /// Returns false when there is nothing left to run in `mode`.
    fn run_next(&self, mode: WaitMode) -> bool;
}

/// FinalizerThread - background runner of queued finalizers
pub struct FinalizerThread {
    handle: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl FinalizerThread {
    /// Start finalizer thread
    pub fn spawn<H: FinalizerHost>(host: Arc<H>) -> Result<Self> {
        let handle = thread::Builder::new()
            .name(FINALIZER_THREAD_NAME.to_string())
            .spawn(move || {
                log::debug!("finalizer thread started");
                while host.run_next(WaitMode::Block) {}
                log::debug!("finalizer thread stopped");
            })
            .map_err(|e| GcError::Internal(format!("failed to spawn finalizer thread: {}", e)))?;

        Ok(Self {
            thread_id: handle.thread().id(),
            handle: Some(handle),
        })
    }

    /// Check if the caller is the finalizer thread
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Shut the queue down and join the thread
    ///
    /// Queued entries are not run. Called from the finalizer thread itself
    /// the thread is detached instead of joined.
    pub fn stop(&mut self, queue: &FinalizationQueue) {
        let abandoned = queue.shutdown();
        if abandoned > 0 {
            log::debug!("{} queued finalizers dropped at shutdown", abandoned);
        }
        let Some(handle) = self.handle.take() else {
            return;
        };
        if self.is_current() {
            return;
        }
        if handle.join().is_err() {
            log::error!("finalizer thread terminated abnormally");
        }
    }
}

impl fmt::Debug for FinalizerThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalizerThread")
            .field("thread_id", &self.thread_id)
            .field("running", &self.handle.is_some())
            .finish()
    }
}
