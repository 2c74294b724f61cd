//! Object Module - GC-managed object model
//!
//! Headers, type descriptors and weak handles.

pub mod header;
pub mod type_info;
pub mod weak;

pub use header::{align_up, Generation, ObjectHeader, ObjectRef, HEADER_SIZE, OBJECT_ALIGNMENT};
pub use type_info::{ReferenceLayout, TypeId, TypeInfo, TypeRegistry, TypeSystem, SLOT_SIZE};
pub use weak::{ReferentStatus, WeakHandle, WeakHandleTable};
