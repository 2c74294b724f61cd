//! Error Module - Collector Error Types
//!
//! Defines all error types used by gengc.
//!
//! # Error Categories
//!
//! ## Allocation Errors
//! - `OutOfMemory` - Heap exhaustion after a full collection and arena growth
//!
//! ## Mutator Errors
//! - `InvalidObject` - Address is not a live object
//! - `InvalidArgument` - Bad offset, size or overlapping write
//! - `UnknownType` - Type not registered with the type system
//! - `InvalidHandle` - Unknown or released root/weak/provider handle
//!
//! ## Collector Errors
//! - `FinalizerFault` - A finalizer panicked (logged, never surfaced to mutators)
//! - `CorruptHeapInvariant` - Heap metadata is inconsistent (fatal)
//! - `Configuration` - Invalid configuration
//! - `Internal` - Invariant violation inside the collector

use crate::object::{ObjectRef, TypeId};
use thiserror::Error;

/// Main error type for all gengc operations
///
/// # Examples
///
/// ```rust
/// use gengc::GcError;
///
/// fn handle_error(err: GcError) {
///     match err {
///         GcError::OutOfMemory { requested, available } => {
///             eprintln!("OOM: requested {}, available {}", requested, available);
///         }
///         other => eprintln!("Other error: {}", other),
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum GcError {
    /// Out of memory - heap exhaustion
    ///
    /// **When returned:** Allocation request cannot be satisfied after a full
    /// collection and arena growth up to `max_heap_size`
    ///
    /// **Recovery strategy:** Release roots and retry, or fail gracefully
    #[error("Out of memory: requested {requested} bytes, available {available} bytes")]
    OutOfMemory { requested: usize, available: usize },

    /// A user finalizer panicked
    ///
    /// **When returned:** Never to mutators. Built by the finalizer thread,
    /// logged and counted, then the drain loop continues.
    #[error("Finalizer for object {object} panicked: {message}")]
    FinalizerFault { object: ObjectRef, message: String },

    /// Heap metadata is inconsistent
    ///
    /// **When returned:** Tracing reached an object with an unknown type or a
    /// reference outside every arena
    ///
    /// **Recovery strategy:** None. The collector aborts the process unless
    /// `GcConfig::abort_on_corruption` is disabled.
    #[error("Corrupt heap at {address:#x}: {reason}")]
    CorruptHeapInvariant { address: u64, reason: String },

    /// Address does not name a live object
    ///
    /// **When returned:** Mutator passed a stale or foreign `ObjectRef`
    #[error("Invalid object reference: {address:#x}")]
    InvalidObject { address: u64 },

    /// Invalid argument
    ///
    /// **Example scenarios:**
    /// - Offset is not a reference slot of the object's type
    /// - Data write overlaps a reference slot
    /// - Payload too small for the type's reference layout
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Type id not known to the type system
    #[error("Unknown type: {0}")]
    UnknownType(TypeId),

    /// Root, weak or provider handle is unknown or already released
    #[error("Invalid handle: {0}")]
    InvalidHandle(u64),

    /// Configuration error
    ///
    /// **When returned:** `GcConfig::validate` rejected the configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error - indicates a bug or an OS resource failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GcError {
    /// Check if this error is recoverable by the caller
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GcError::OutOfMemory { .. }
                | GcError::InvalidObject { .. }
                | GcError::InvalidArgument(_)
                | GcError::UnknownType(_)
                | GcError::InvalidHandle(_)
        )
    }

    /// Check if this error must stop the process
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GcError::CorruptHeapInvariant { .. } | GcError::Internal(_)
        )
    }
}

/// Result type alias for gengc operations
pub type Result<T> = std::result::Result<T, GcError>;
