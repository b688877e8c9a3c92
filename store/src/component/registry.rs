use std::{
    any::TypeId,
    sync::RwLock,
    sync::atomic::{AtomicU32, Ordering},
};

use dashmap::DashMap;

use crate::component::{Component, Id, Info};

/// A thread-safe component type registry. This is responsible for assigning stable
/// identifiers to component types and serving their metadata to the storage layers.
///
/// The registry uses lock-free reads for TypeId→Id lookups via `DashMap`, making the
/// common read path highly performant. Component registration uses minimal locking - only a
/// single shard of the DashMap and a write lock for the component info vector.
///
/// Why thread-safe?
/// - The storage tables themselves are single-writer, but managers may be created on
///   different threads, and all managers sharing a registry must agree on component IDs.
pub struct Registry {
    /// Map from TypeId to component Id. Lock-free reads via sharded concurrent hashmap.
    type_map: DashMap<TypeId, Id>,

    /// List of registered component entries. Protected by RwLock for rare writes.
    components: RwLock<Vec<Option<Info>>>,

    /// Next available component identifier.
    next_id: AtomicU32,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create a new component registry.
    #[inline]
    pub fn new() -> Self {
        Self {
            type_map: DashMap::new(),
            components: RwLock::new(Vec::new()),
            next_id: AtomicU32::new(0),
        }
    }

    /// Register a new component type and get its unique identifier.
    ///
    /// This method is thread-safe and can be called concurrently. If the component type is
    /// already registered, returns the existing ID. Otherwise, allocates a new ID and stores
    /// the component info.
    pub fn register<C: Component>(&self) -> Id {
        let type_id = TypeId::of::<C>();

        // Fast path: check if already registered (lock-free read)
        if let Some(id) = self.type_map.get(&type_id) {
            return *id;
        }

        // Slow path: need to register
        // Use entry API to avoid race condition where two threads both miss the cache
        *self
            .type_map
            .entry(type_id)
            .or_insert_with(|| {
                // Generate a new unique identifier
                let id_value = self.next_id.fetch_add(1, Ordering::Relaxed);
                let comp_id = Id::new(id_value);

                // Add entry to the components list
                let mut components = self.components.write().unwrap();
                let index = id_value as usize;

                // Expand if necessary
                if index >= components.len() {
                    components.resize(index + 1, None);
                }

                components[index] = Some(Info::new::<C>(comp_id));

                comp_id
            })
            .value()
    }

    /// Get the component ID for a provided type `C`, if registered.
    #[inline]
    pub fn get<C: Component>(&self) -> Option<Id> {
        let type_id = TypeId::of::<C>();
        self.type_map.get(&type_id).map(|entry| *entry.value())
    }

    /// Get the component info for a provided type `C`, if registered.
    #[inline]
    pub fn get_info<C: Component>(&self) -> Option<Info> {
        let id = self.get::<C>()?;
        self.get_info_by_id(id)
    }

    /// Get component info by ID.
    #[inline]
    pub fn get_info_by_id(&self, id: Id) -> Option<Info> {
        let components = self.components.read().unwrap();
        components.get(id.index()).and_then(|i| *i)
    }
}
