//! Runtime Module - Collector Runtime Services
//!
//! Services that run beside the mutators rather than inside a collection:
//! - F-reachable queue
//! - Finalizer callback table
//! - Finalizer thread lifecycle

pub mod finalizer;

pub use finalizer::{
    in_finalizer, FinalizationQueue, FinalizerFn, FinalizerHost, FinalizerTable, FinalizerThread,
    WaitMode, FINALIZER_THREAD_NAME,
};
