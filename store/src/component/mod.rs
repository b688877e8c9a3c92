//! Component type identity and metadata.
//!
//! Every payload stored by a [`crate::storage::table::Table`] is an instance of a registered
//! component type. This module provides the pieces the store needs to know about such a type:
//!
//! - [`Component`]: The trait that all component types must implement
//! - [`Id`]: A unique identifier for each registered component type
//! - [`Info`]: Metadata about a component type (layout, drop function, etc.)
//! - [`Registry`]: Thread-safe registration and lookup of component types
//!
//! ## Thread Safety
//!
//! The [`Registry`] is designed for concurrent access: lock-free reads for component ID
//! lookups, minimal locking for registration (only when a new type is first registered).
//! The tables and chunks built on top of these ids are deliberately *not* thread-safe;
//! only the identity layer is shared.
//!
//! ## Usage
//!
//! ```ignore
//! use quasar_store::component::Registry;
//! use quasar_macros::Component;
//!
//! #[derive(Component)]
//! struct Position { x: f32, y: f32 }
//!
//! let registry = Registry::new();
//! let pos_id = registry.register::<Position>();
//! ```

mod info;
mod registry;

pub use info::Info;
pub use registry::Registry;

/// A component identifier. This is a unique identifier for a component type in the store.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(u32);

impl Id {
    /// Construct a new component Id from a raw u32 value.
    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the index of this component if it were to live in indexable storage (e.g. Vec)
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for Id {
    #[inline]
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

impl From<usize> for Id {
    #[inline]
    fn from(value: usize) -> Self {
        Self::new(value as u32)
    }
}

/// A trait representing a component payload storable in the component store.
///
/// At present this only sets the required trait bounds for a type to be used as a component.
///
/// Note that zero-sized types satisfy these bounds but are rejected at table construction;
/// the store hands out slots of the component's size and a zero-byte slot is meaningless.
pub trait Component: 'static + Sized + Send + Sync {}
