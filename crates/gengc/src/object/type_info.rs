//! Type Descriptors - Where reference fields live inside a payload
//!
//! The collector does not know the host's object model. It only asks the
//! type system, through [`TypeSystem`], which payload slots hold references.
//! Each slot is 8 bytes wide and holds an object address (0 = null).
//!
//! ```text
//! Payload of a type with Fields([0, 16]):
//! ┌─────────┬─────────┬─────────┬─────────┐
//! │ 0-7     │ 8-15    │ 16-23   │ 24-31   │
//! │ ref     │ data    │ ref     │ data    │
//! └─────────┴─────────┴─────────┴─────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use gengc::object::{ReferenceLayout, TypeInfo, TypeRegistry, TypeSystem};
//!
//! let registry = TypeRegistry::new();
//! let node = registry
//!     .register(TypeInfo::new("Node", ReferenceLayout::Fields(vec![0, 16])).unwrap());
//!
//! let info = registry.type_info(node).unwrap();
//! assert_eq!(info.reference_offsets(32), vec![0, 16]);
//! ```

use crate::error::{GcError, Result};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Size of a reference slot in bytes
pub const SLOT_SIZE: usize = 8;

/// Identifier of a type descriptor, stored in every object header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type#{}", self.0)
    }
}

/// Placement of reference slots in a payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceLayout {
    /// Plain data, nothing to trace
    NoReferences,
    /// Fixed payload offsets, each a multiple of [`SLOT_SIZE`]
    Fields(Vec<u32>),
    /// Every slot of the payload is a reference (reference arrays)
    AllSlots,
}

/// Immutable description of a managed type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    name: String,
    layout: ReferenceLayout,
}

impl TypeInfo {
    /// Create a type descriptor
    ///
    /// Fails if a field offset is not slot aligned.
    pub fn new(name: impl Into<String>, layout: ReferenceLayout) -> Result<Self> {
        if let ReferenceLayout::Fields(offsets) = &layout {
            if let Some(bad) = offsets.iter().find(|o| **o as usize % SLOT_SIZE != 0) {
                return Err(GcError::InvalidArgument(format!(
                    "reference offset {} is not {}-byte aligned",
                    bad, SLOT_SIZE
                )));
            }
        }

        let mut layout = layout;
        if let ReferenceLayout::Fields(offsets) = &mut layout {
            offsets.sort_unstable();
            offsets.dedup();
        }

        Ok(Self {
            name: name.into(),
            layout,
        })
    }

    /// Type without reference fields
    pub fn leaf(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layout: ReferenceLayout::NoReferences,
        }
    }

    /// Reference array type
    pub fn array(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layout: ReferenceLayout::AllSlots,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> &ReferenceLayout {
        &self.layout
    }

    /// Smallest payload that holds every fixed reference field
    pub fn min_payload(&self) -> usize {
        match &self.layout {
            ReferenceLayout::Fields(offsets) => offsets
                .last()
                .map(|last| *last as usize + SLOT_SIZE)
                .unwrap_or(0),
            _ => 0,
        }
    }

    /// Visit every reference slot offset of a payload of `payload_size` bytes
    #[inline]
    pub fn for_each_reference(&self, payload_size: usize, mut visit: impl FnMut(usize)) {
        match &self.layout {
            ReferenceLayout::NoReferences => {}
            ReferenceLayout::Fields(offsets) => {
                for &offset in offsets {
                    let offset = offset as usize;
                    if offset + SLOT_SIZE <= payload_size {
                        visit(offset);
                    }
                }
            }
            ReferenceLayout::AllSlots => {
                let mut offset = 0;
                while offset + SLOT_SIZE <= payload_size {
                    visit(offset);
                    offset += SLOT_SIZE;
                }
            }
        }
    }

    /// Reference slot offsets of a payload of `payload_size` bytes
    pub fn reference_offsets(&self, payload_size: usize) -> Vec<usize> {
        let mut offsets = Vec::new();
        self.for_each_reference(payload_size, |offset| offsets.push(offset));
        offsets
    }

    /// Check whether `offset` starts a reference slot
    pub fn is_reference_slot(&self, payload_size: usize, offset: usize) -> bool {
        if offset % SLOT_SIZE != 0 || offset + SLOT_SIZE > payload_size {
            return false;
        }
        match &self.layout {
            ReferenceLayout::NoReferences => false,
            ReferenceLayout::Fields(offsets) => offsets.binary_search(&(offset as u32)).is_ok(),
            ReferenceLayout::AllSlots => true,
        }
    }

    /// Check whether `[offset, offset + len)` touches a reference slot
    pub fn overlaps_reference(&self, payload_size: usize, offset: usize, len: usize) -> bool {
        let end = offset + len;
        let mut overlaps = false;
        self.for_each_reference(payload_size, |slot| {
            if slot < end && offset < slot + SLOT_SIZE {
                overlaps = true;
            }
        });
        overlaps
    }
}

/// Type system interface consumed by the collector
///
/// Descriptors are owned by the type system and read-only to the collector.
pub trait TypeSystem: Send + Sync {
    /// Descriptor for `id`, or `None` if the id was never registered
    fn type_info(&self, id: TypeId) -> Option<Arc<TypeInfo>>;
}

/// Process-wide registry of type descriptors
///
/// Ids are dense and handed out in registration order. Registered
/// descriptors are never removed or changed.
#[derive(Default)]
pub struct TypeRegistry {
    types: RwLock<Vec<Arc<TypeInfo>>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor and return its id
    pub fn register(&self, info: TypeInfo) -> TypeId {
        let mut types = self.types.write();
        let id = TypeId(types.len() as u32);
        types.push(Arc::new(info));
        id
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }
}

impl TypeSystem for TypeRegistry {
    fn type_info(&self, id: TypeId) -> Option<Arc<TypeInfo>> {
        self.types.read().get(id.0 as usize).cloned()
    }
}
