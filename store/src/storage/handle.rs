use crate::component;
use crate::storage::chunk::ChunkId;

/// An opaque reference to an allocated component slot.
///
/// A handle names a component type, a chunk and a slot index; it is handed out in place
/// of a raw pointer so callers cannot dangle. A handle becomes stale the moment the slot
/// is freed: reads through a stale handle return `None`, and freeing one again fails
/// loudly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    /// The component type this handle's slot stores.
    component: component::Id,

    /// The chunk holding the slot.
    chunk: ChunkId,

    /// The slot index within the chunk.
    slot: u32,
}

impl Handle {
    /// Construct a handle for a slot.
    #[inline]
    pub(crate) const fn new(component: component::Id, chunk: ChunkId, slot: u32) -> Self {
        Self {
            component,
            chunk,
            slot,
        }
    }

    /// Get the component type this handle refers to.
    #[inline]
    pub fn component(&self) -> component::Id {
        self.component
    }

    /// Get the chunk this handle's slot lives in.
    #[inline]
    pub(crate) fn chunk(&self) -> ChunkId {
        self.chunk
    }

    /// Get the slot index within the chunk.
    #[inline]
    pub(crate) fn slot(&self) -> u32 {
        self.slot
    }
}
