use std::sync::Arc;

use log::debug;

use crate::component::{self, Component, Registry};
use crate::storage::{
    handle::Handle,
    mem::{ChunkAllocator, RecyclingChunkAllocator},
    table::{ReclaimPolicy, Table, TableIter, TableIterMut},
};

/// The top-level component store: one [`Table`] per registered component type.
///
/// The manager maps component types to tables, creating each table the first time its
/// type is allocated. All tables share the manager's chunk provider and reclaim policy;
/// all type identity comes from a [`Registry`] that can be shared across managers so
/// handles and ids stay consistent between them.
///
/// Mutation goes through `&mut self`: one logical writer owns the store at a time, as in
/// the rest of the engine's simulation model. Readers on other threads must be
/// synchronized externally (e.g. an end-of-frame barrier).
///
/// # Example Usage
///
/// ```ignore
/// use quasar_store::storage::manager::Manager;
/// use quasar_macros::Component;
///
/// #[derive(Component)]
/// struct Velocity { dx: f32, dy: f32 }
///
/// let mut manager = Manager::new();
///
/// let handle = manager.alloc(Velocity { dx: 0.5, dy: -1.0 });
/// manager.get_mut::<Velocity>(handle).unwrap().dx = 0.0;
/// manager.free(handle);
/// ```
pub struct Manager {
    /// Shared component type registry.
    registry: Arc<Registry>,

    /// Tables indexed by component id. `None` until a type's first allocation.
    tables: Vec<Option<Table>>,

    /// Chunk memory provider shared by every table.
    allocator: Arc<dyn ChunkAllocator>,

    /// Target slot count for new tables' chunks.
    slots_per_chunk: usize,

    /// Reclaim policy applied to new tables.
    policy: ReclaimPolicy,
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl Manager {
    /// Default target slot count per chunk.
    pub const DEFAULT_SLOTS_PER_CHUNK: usize = 128;

    /// Create a manager with its own registry, a recycling chunk provider and the
    /// default reclaim policy.
    pub fn new() -> Self {
        Self::with_config(
            Arc::new(Registry::new()),
            Arc::new(RecyclingChunkAllocator::new()),
            Self::DEFAULT_SLOTS_PER_CHUNK,
            ReclaimPolicy::default(),
        )
    }

    /// Create a manager sharing an existing registry, with default provider and policy.
    pub fn with_registry(registry: Arc<Registry>) -> Self {
        Self::with_config(
            registry,
            Arc::new(RecyclingChunkAllocator::new()),
            Self::DEFAULT_SLOTS_PER_CHUNK,
            ReclaimPolicy::default(),
        )
    }

    /// Create a fully configured manager.
    ///
    /// # Panics
    /// Panics if `slots_per_chunk` is zero.
    pub fn with_config(
        registry: Arc<Registry>,
        allocator: Arc<dyn ChunkAllocator>,
        slots_per_chunk: usize,
        policy: ReclaimPolicy,
    ) -> Self {
        assert!(slots_per_chunk > 0, "slots_per_chunk must be greater than 0");
        Self {
            registry,
            tables: Vec::new(),
            allocator,
            slots_per_chunk,
            policy,
        }
    }

    /// Get the shared component registry.
    #[inline]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Allocate a slot for `value`, creating the component's table on first use.
    ///
    /// # Panics
    /// Panics if `C` is zero-sized (see [`Table::new`]).
    pub fn alloc<C: Component>(&mut self, value: C) -> Handle {
        let id = self.registry.register::<C>();
        self.table_for(id).alloc(value)
    }

    /// Free the slot behind a handle.
    ///
    /// # Panics
    /// - If no table exists for the handle's component type. A handle that outlived its
    ///   table (or was minted elsewhere) cannot be trusted and must fail loudly.
    /// - On double frees and foreign handles (see [`Table::free`]).
    pub fn free(&mut self, handle: Handle) {
        match self
            .tables
            .get_mut(handle.component().index())
            .and_then(Option::as_mut)
        {
            Some(table) => table.free(handle),
            None => panic!(
                "no component table exists for handle {:?}; the handle cannot be trusted",
                handle
            ),
        }
    }

    /// Get a reference to the component behind a handle.
    ///
    /// Returns `None` if the handle is stale or its type has no table.
    pub fn get<C: Component>(&self, handle: Handle) -> Option<&C> {
        self.table::<C>()?.get(handle)
    }

    /// Get a mutable reference to the component behind a handle.
    ///
    /// Returns `None` if the handle is stale or its type has no table.
    pub fn get_mut<C: Component>(&mut self, handle: Handle) -> Option<&mut C> {
        let id = self.registry.get::<C>()?;
        self.tables
            .get_mut(id.index())
            .and_then(Option::as_mut)?
            .get_mut(handle)
    }

    /// Get the number of live components of type `C`.
    pub fn len<C: Component>(&self) -> usize {
        self.table::<C>().map_or(0, Table::len)
    }

    /// Iterate over live components of type `C` in allocation order.
    ///
    /// Returns `None` if the type has no table yet.
    pub fn iter<C: Component>(&self) -> Option<TableIter<'_, C>> {
        self.table::<C>().map(Table::iter)
    }

    /// Iterate mutably over live components of type `C` in allocation order.
    ///
    /// Returns `None` if the type has no table yet.
    pub fn iter_mut<C: Component>(&mut self) -> Option<TableIterMut<'_, C>> {
        let id = self.registry.get::<C>()?;
        self.tables
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .map(Table::iter_mut)
    }

    /// Get the table for component type `C`, if one has been created.
    pub fn table<C: Component>(&self) -> Option<&Table> {
        let id = self.registry.get::<C>()?;
        self.tables.get(id.index()).and_then(Option::as_ref)
    }

    /// Get the table for a component id, creating it on first use.
    fn table_for(&mut self, id: component::Id) -> &mut Table {
        let index = id.index();
        if index >= self.tables.len() {
            self.tables.resize_with(index + 1, || None);
        }
        if self.tables[index].is_none() {
            let info = self
                .registry
                .get_info_by_id(id)
                .expect("component id came from the registry");
            debug!("creating component table for {:?}", info);
            self.tables[index] = Some(Table::new(
                info,
                self.slots_per_chunk,
                self.allocator.clone(),
                self.policy,
            ));
        }
        self.tables[index]
            .as_mut()
            .expect("table created just above")
    }
}

#[cfg(test)]
mod tests {
    use quasar_macros::Component;

    use super::*;
    use crate::storage::mem::SystemChunkAllocator;

    #[derive(Component, Debug, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Component, Debug, PartialEq)]
    struct Health {
        value: i32,
    }

    #[test]
    fn alloc_routes_by_component_type() {
        // Given
        let mut manager = Manager::new();

        // When
        let pos = manager.alloc(Position { x: 1.0, y: 2.0 });
        let health = manager.alloc(Health { value: 100 });

        // Then - each type landed in its own table
        assert_ne!(pos.component(), health.component());
        assert_eq!(manager.len::<Position>(), 1);
        assert_eq!(manager.len::<Health>(), 1);
        assert_eq!(manager.get::<Position>(pos), Some(&Position { x: 1.0, y: 2.0 }));
        assert_eq!(manager.get::<Health>(health), Some(&Health { value: 100 }));
    }

    #[test]
    fn free_releases_the_right_table() {
        // Given
        let mut manager = Manager::new();
        let pos = manager.alloc(Position { x: 1.0, y: 2.0 });
        let health = manager.alloc(Health { value: 100 });

        // When
        manager.free(pos);

        // Then
        assert_eq!(manager.len::<Position>(), 0);
        assert_eq!(manager.len::<Health>(), 1);
        assert_eq!(manager.get::<Position>(pos), None);
        assert_eq!(manager.get::<Health>(health), Some(&Health { value: 100 }));
    }

    #[test]
    fn get_mut_modifies_in_place() {
        // Given
        let mut manager = Manager::new();
        let handle = manager.alloc(Health { value: 100 });

        // When
        manager.get_mut::<Health>(handle).unwrap().value = 25;

        // Then
        assert_eq!(manager.get::<Health>(handle), Some(&Health { value: 25 }));
    }

    #[test]
    fn iteration_covers_each_type_separately() {
        // Given
        let mut manager = Manager::new();
        for i in 0..5 {
            manager.alloc(Position {
                x: i as f32,
                y: 0.0,
            });
        }
        for i in 0..3 {
            manager.alloc(Health { value: i * 10 });
        }

        // When
        let xs: Vec<f32> = manager
            .iter::<Position>()
            .unwrap()
            .map(|(_, p)| p.x)
            .collect();
        let healths: Vec<i32> = manager
            .iter::<Health>()
            .unwrap()
            .map(|(_, h)| h.value)
            .collect();

        // Then
        assert_eq!(xs, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(healths, vec![0, 10, 20]);
    }

    #[test]
    fn iter_mut_through_the_manager() {
        // Given
        let mut manager = Manager::new();
        for i in 0..3 {
            manager.alloc(Health { value: i });
        }

        // When
        for (_, health) in manager.iter_mut::<Health>().unwrap() {
            health.value += 100;
        }

        // Then
        let values: Vec<i32> = manager
            .iter::<Health>()
            .unwrap()
            .map(|(_, h)| h.value)
            .collect();
        assert_eq!(values, vec![100, 101, 102]);
    }

    #[test]
    fn unallocated_type_has_no_table() {
        // Given
        let manager = Manager::new();

        // Then
        assert!(manager.table::<Position>().is_none());
        assert!(manager.iter::<Position>().is_none());
        assert_eq!(manager.len::<Position>(), 0);
    }

    #[test]
    fn managers_sharing_a_registry_agree_on_ids() {
        // Given
        let registry = Arc::new(Registry::new());
        let mut manager_a = Manager::with_registry(registry.clone());
        let mut manager_b = Manager::with_registry(registry.clone());

        // When
        let handle_a = manager_a.alloc(Position { x: 1.0, y: 1.0 });
        let handle_b = manager_b.alloc(Position { x: 2.0, y: 2.0 });

        // Then - same component id from both managers
        assert_eq!(handle_a.component(), handle_b.component());
        assert_eq!(registry.get::<Position>(), Some(handle_a.component()));
    }

    #[test]
    fn configured_manager_uses_given_policy_and_provider() {
        // Given - tiny chunks with eager reclamation
        let mut manager = Manager::with_config(
            Arc::new(Registry::new()),
            Arc::new(SystemChunkAllocator),
            2,
            ReclaimPolicy::Eager,
        );
        let handles: Vec<_> = (0..4)
            .map(|i| manager.alloc(Health { value: i }))
            .collect();
        assert_eq!(manager.table::<Health>().unwrap().chunk_count(), 2);

        // When - empty the first chunk
        manager.free(handles[0]);
        manager.free(handles[1]);

        // Then - the emptied chunk was reclaimed
        assert_eq!(manager.table::<Health>().unwrap().chunk_count(), 1);
    }

    #[test]
    #[should_panic(expected = "no component table exists for handle")]
    fn freeing_into_a_missing_table_panics() {
        // Given - a handle from one manager and a fresh manager that never saw the type
        let mut source = Manager::new();
        let handle = source.alloc(Position { x: 0.0, y: 0.0 });

        let mut other = Manager::new();

        // When / Then
        other.free(handle);
    }

    #[test]
    #[should_panic(expected = "zero-sized component")]
    fn zero_sized_component_rejected() {
        #[derive(Component)]
        struct Marker;

        let mut manager = Manager::new();
        let _ = manager.alloc(Marker);
    }
}
