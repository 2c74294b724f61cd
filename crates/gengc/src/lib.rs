//! # gengc - Generational Garbage Collector with Deferred Finalization
//!
//! gengc is a precise, stop-the-world, generational tracing collector over a
//! simulated heap. Objects are addressed by [`ObjectRef`]s, their reference
//! layout comes from a [`TypeSystem`], and unreachable objects with a
//! finalizer are resurrected once so a background thread can run their
//! callback.
//!
//! ## Overview
//!
//! - **Generations**: Gen0, Gen1 and Gen2 are compacting bump arenas;
//!   survivors are promoted by age
//! - **Large Object Space**: payloads above the threshold are swept in place
//!   and never moved
//! - **Write Barrier**: old-to-young stores are recorded in a remembered set
//!   so partial collections stay precise
//! - **Finalization**: an F-reachable queue drained by a dedicated thread,
//!   outside every collector lock
//! - **Weak Handles**: cleared when their referent dies, updated when it moves
//!
//! ## Quick Start
//!
//! ```rust
//! use gengc::{CollectTarget, GarbageCollector, GcConfig, ReferenceLayout, TypeInfo, TypeRegistry};
//! use std::sync::Arc;
//!
//! fn main() -> gengc::Result<()> {
//!     let types = Arc::new(TypeRegistry::new());
//!     let pair = types.register(TypeInfo::new("Pair", ReferenceLayout::Fields(vec![0, 8]))?);
//!     let gc = GarbageCollector::new(GcConfig::default(), types)?;
//!
//!     let head = gc.allocate(pair, 16, false)?;
//!     let tail = gc.allocate(pair, 16, false)?;
//!     gc.write_ref(head, 0, Some(tail))?;
//!
//!     // Only roots survive; objects may move, so read them back from the root.
//!     let root = gc.add_root(head)?;
//!     gc.collect(CollectTarget::Full)?;
//!
//!     let head = gc.root(root)?;
//!     assert!(gc.read_ref(head, 0)?.is_some());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     Mutator Threads                      │
//! │   allocate / write_ref / read_ref / roots / weak handles │
//! └────────────────────────────┬─────────────────────────────┘
//!                              │ heap lock
//! ┌────────────────────────────▼─────────────────────────────┐
//! │  Allocator ──▶ Heap: Gen0 │ Gen1 │ Gen2 │ Large          │
//! │                 Write Barrier ──▶ Remembered Set          │
//! │                                                          │
//! │  Collection: Mark ▶ Resurrect ▶ Plan ▶ Fix ▶ Sweep ▶ Move │
//! └────────────────────────────┬─────────────────────────────┘
//!                              │ F-reachable queue
//! ┌────────────────────────────▼─────────────────────────────┐
//! │                    Finalizer Thread                      │
//! │        runs one callback at a time, no locks held        │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rules for Mutators
//!
//! 1. **Root what you keep**: an `ObjectRef` is only valid until the next
//!    collection; keep objects through root handles or a [`RootProvider`]
//! 2. **Store references through `write_ref`**: it runs the write barrier
//! 3. **Finalizers may allocate and register roots**; waiting for pending
//!    finalizers from inside one returns at once. The object handed to a
//!    callback stays put until it returns, unless the callback itself
//!    collects
//! 4. **Group dependent calls in a [`Mutator`] scope** when several threads
//!    mutate: another thread may collect between two plain calls
//!
//! ## Modules
//!
//! - [`allocator`]: Size classes and the collect-and-retry ladder
//! - [`barrier`]: Write barrier and remembered set
//! - [`config`]: GC configuration parameters and validation
//! - [`error`]: Error types for all gengc operations
//! - [`gc`]: Collection cycle and the mutator API
//! - [`heap`]: Generation arenas and the large object space
//! - [`logging`]: Structured GC events
//! - [`marker`]: Tracing from roots and finalization resurrection
//! - [`object`]: Object headers, type descriptors and weak handles
//! - [`relocate`]: Forwarding, compaction and sweeping
//! - [`roots`]: Root handles and root providers
//! - [`runtime`]: Finalization queue and finalizer thread
//! - [`stats`]: Collection reports and statistics

// Core GC modules
pub mod config;
pub mod error;
pub mod gc;

// Memory management subsystems
pub mod allocator;
pub mod heap;
pub mod object;
pub mod roots;

// GC algorithm components
pub mod barrier;
pub mod marker;
pub mod relocate;

// Runtime and monitoring
pub mod logging;
pub mod runtime;
pub mod stats;

// Re-export main types for convenience
pub use allocator::CollectTarget;
pub use config::{ConfigError, GcConfig};
pub use error::{GcError, Result};
pub use gc::{GarbageCollector, GcReason, GcState, HeapInfo, Mutator};
pub use logging::{GcEvent, GcLogRecord};
pub use object::{
    Generation, ObjectRef, ReferenceLayout, TypeId, TypeInfo, TypeRegistry, TypeSystem, WeakHandle,
};
pub use roots::{ProviderId, RootHandle, RootProvider, SharedRoots};
pub use runtime::{in_finalizer, FINALIZER_THREAD_NAME};
pub use stats::{CollectionReport, GcMetrics, GcSummary};

/// gengc version string from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Create a collector with default configuration
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
///
/// let gc = gengc::init(Arc::new(gengc::TypeRegistry::new()))?;
/// assert_eq!(gc.cycle_count(), 0);
/// # Ok::<(), gengc::GcError>(())
/// ```
pub fn init(types: std::sync::Arc<dyn TypeSystem>) -> Result<GarbageCollector> {
    GarbageCollector::new(GcConfig::default(), types)
}

/// Create a collector with configuration taken from `GENGC_*` environment
/// variables
pub fn init_from_env(types: std::sync::Arc<dyn TypeSystem>) -> Result<GarbageCollector> {
    GarbageCollector::new(GcConfig::from_env(), types)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_init_default() {
        let result = init(Arc::new(TypeRegistry::new()));
        assert!(result.is_ok());
    }

    #[test]
    fn test_init_from_env_without_overrides() {
        let gc = init_from_env(Arc::new(TypeRegistry::new())).unwrap();
        assert!(gc.config().validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = GcConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_version_not_empty() {
        assert!(!VERSION.is_empty());
    }
}
