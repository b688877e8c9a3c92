use std::alloc::Layout;
use std::any::TypeId;
use std::ptr;
use std::sync::Arc;

use fixedbitset::FixedBitSet;
use log::debug;

use crate::component::{self, Component};
use crate::storage::{
    bitmap::MAX_SLOTS_PER_CHUNK,
    chunk::{Chunk, ChunkId, ChunkInit, SlotLink, calculate_stride},
    handle::Handle,
    mem::{CHUNK_ALIGN, ChunkAllocator},
};

/// What to do with a chunk once its last slot is freed.
///
/// The right answer depends on the workload: retaining avoids provider round-trips for
/// populations that shrink and regrow every frame, eager reclamation keeps memory tight
/// for populations that shrink for good.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimPolicy {
    /// Keep emptied chunks linked into the chain for reuse.
    #[default]
    Retain,

    /// Unlink emptied chunks and return their buffers to the provider.
    Eager,
}

/// A table stores every instance of a single component type across a chain of
/// fixed-capacity chunks.
///
/// Chunks live in an arena (`Vec` plus recycled-id list) and link to their siblings by
/// [`ChunkId`]. Allocation walks the chain first-fit and appends a new chunk when every
/// existing one is full; freeing clears the slot's bitmap bit and, depending on the
/// [`ReclaimPolicy`], retires emptied chunks. Live slots additionally form an intrusive
/// doubly-linked list through their headers, giving allocation-order iteration without
/// scanning bitmaps.
///
/// A table is deliberately not thread-safe: all mutation goes through `&mut self`,
/// matching the single simulation-writer model of the surrounding engine.
///
/// # Example Usage
///
/// ```ignore
/// use std::sync::Arc;
/// use quasar_store::component::{Info, Id, Registry};
/// use quasar_store::storage::mem::SystemChunkAllocator;
/// use quasar_store::storage::table::{ReclaimPolicy, Table};
/// use quasar_macros::Component;
///
/// #[derive(Component)]
/// struct Position { x: f32, y: f32 }
///
/// let registry = Registry::new();
/// let id = registry.register::<Position>();
///
/// let mut table = Table::new(
///     registry.get_info_by_id(id).unwrap(),
///     128,
///     Arc::new(SystemChunkAllocator),
///     ReclaimPolicy::Retain,
/// );
///
/// let handle = table.alloc(Position { x: 1.0, y: 2.0 });
/// assert_eq!(table.get::<Position>(handle).unwrap().x, 1.0);
/// table.free(handle);
/// ```
pub struct Table {
    /// Metadata for the stored component type.
    info: component::Info,

    /// Target slot count for newly created chunks.
    slots_per_chunk: usize,

    /// Byte size requested from the provider for each new chunk.
    chunk_size: usize,

    /// The chunk arena. `None` entries are retired chunks awaiting id reuse.
    chunks: Vec<Option<Chunk>>,

    /// Arena ids of retired chunks, reused before the arena grows.
    recycled_ids: Vec<ChunkId>,

    /// Bit per arena slot: set while a chunk occupies it. This is how a foreign or
    /// stale handle is caught in O(1) before any pointer is formed.
    owned: FixedBitSet,

    /// First chunk in the chain.
    head: Option<ChunkId>,

    /// Most recently appended chunk.
    tail: Option<ChunkId>,

    /// Oldest live slot (start of the iteration order).
    live_head: SlotLink,

    /// Most recently allocated live slot.
    live_tail: SlotLink,

    /// Number of live slots across all chunks.
    len: usize,

    /// The provider supplying chunk memory.
    allocator: Arc<dyn ChunkAllocator>,

    /// What to do with emptied chunks.
    policy: ReclaimPolicy,
}

impl Table {
    /// Create a new table for the given component type.
    ///
    /// `slots_per_chunk` is a target; it is clamped to the per-chunk maximum.
    ///
    /// # Panics
    /// - If the component type is zero-sized. Handing out zero-byte slots hides bugs in
    ///   the caller, so this fails loudly instead.
    /// - If the component requires stricter alignment than the 8-byte slot alignment.
    pub fn new(
        info: component::Info,
        slots_per_chunk: usize,
        allocator: Arc<dyn ChunkAllocator>,
        policy: ReclaimPolicy,
    ) -> Self {
        assert!(
            !info.is_zero_sized(),
            "zero-sized component {:?} cannot be stored in a table",
            info
        );
        assert!(
            info.layout().align() <= CHUNK_ALIGN,
            "component {:?} requires {}-byte alignment, slots are {}-aligned",
            info,
            info.layout().align(),
            CHUNK_ALIGN
        );
        assert!(slots_per_chunk > 0, "slots_per_chunk must be greater than 0");

        let slots_per_chunk = slots_per_chunk.min(MAX_SLOTS_PER_CHUNK);
        let chunk_size = slots_per_chunk * calculate_stride(info.size());
        Self {
            info,
            slots_per_chunk,
            chunk_size,
            chunks: Vec::new(),
            recycled_ids: Vec::new(),
            owned: FixedBitSet::new(),
            head: None,
            tail: None,
            live_head: SlotLink::NONE,
            live_tail: SlotLink::NONE,
            len: 0,
            allocator,
            policy,
        }
    }

    /// Get the info for the stored component type.
    #[inline]
    pub fn info(&self) -> &component::Info {
        &self.info
    }

    /// Get the number of live components in the table.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the table holds no live components.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get the number of chunks currently in the chain.
    pub fn chunk_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_some()).count()
    }

    /// Allocate a slot and move `value` into it.
    ///
    /// Walks the chunk chain first-fit; if every chunk is full, a new chunk is appended
    /// to the tail and the allocation is served from it.
    ///
    /// # Panics
    /// Panics if the type `C` doesn't match the table's component type.
    pub fn alloc<C: Component>(&mut self, value: C) -> Handle {
        self.ensure_type::<C>();

        let (chunk_id, slot) = self.allocate_slot();
        let payload = self.chunk(chunk_id).payload_ptr(slot);
        // SAFETY: the slot was just allocated and zero-filled; the payload region is
        // stride-covered, 8-aligned and exclusively ours until the handle is returned.
        unsafe {
            ptr::write(payload.as_ptr().cast::<C>(), value);
        }
        Handle::new(self.info.id(), chunk_id, slot)
    }

    /// Free the slot behind a handle, dropping its payload.
    ///
    /// If this empties the chunk and the policy is [`ReclaimPolicy::Eager`], the chunk
    /// is unlinked from the chain and its buffer returned to the provider.
    ///
    /// # Panics
    /// - If the handle's component type doesn't match this table.
    /// - If the handle's chunk is not owned by this table. A foreign chunk id means the
    ///   handle was minted by another table and trusting it risks heap corruption.
    /// - If the slot is not live (double free).
    pub fn free(&mut self, handle: Handle) {
        assert!(
            handle.component() == self.info.id(),
            "handle for component {:?} freed on the table for {:?}",
            handle.component(),
            self.info.id()
        );

        let chunk_id = handle.chunk();
        assert!(
            self.owns_chunk(chunk_id),
            "handle {:?} does not reference a chunk owned by this table",
            handle
        );

        let slot = handle.slot();
        let chunk = self.chunk(chunk_id);
        assert!(
            chunk.is_allocated(slot),
            "double free: handle {:?} references a slot that is not live",
            handle
        );

        // Unlink from the live list while the header is still trustworthy.
        self.unlink_live(SlotLink::to(chunk_id, slot));

        // Run the payload destructor, then release the slot. The memory itself is left
        // as-is; the next allocation zero-fills it.
        let drop_fn = self.info.drop_fn();
        let chunk = self.chunk_mut(chunk_id);
        // SAFETY: the slot is live, so its payload is an initialized value of the
        // table's component type.
        unsafe {
            drop_fn(chunk.payload_ptr(slot));
        }
        chunk.free(slot);
        self.len -= 1;

        if self.policy == ReclaimPolicy::Eager && self.chunk(chunk_id).is_empty() {
            self.reclaim_chunk(chunk_id);
        }
    }

    /// Get a reference to the component behind a handle.
    ///
    /// Returns `None` if the handle is stale (its slot was freed, or its chunk was
    /// reclaimed) or was minted by another table.
    ///
    /// # Panics
    /// Panics if the type `C` doesn't match the table's component type.
    pub fn get<C: Component>(&self, handle: Handle) -> Option<&C> {
        self.ensure_type::<C>();
        let chunk = self.live_chunk(handle)?;
        // SAFETY: the slot is live, so the payload holds an initialized C; ensure_type
        // proved C is the table's component type.
        Some(unsafe { &*chunk.payload_ptr(handle.slot()).as_ptr().cast::<C>() })
    }

    /// Get a mutable reference to the component behind a handle.
    ///
    /// Returns `None` if the handle is stale or was minted by another table.
    ///
    /// # Panics
    /// Panics if the type `C` doesn't match the table's component type.
    pub fn get_mut<C: Component>(&mut self, handle: Handle) -> Option<&mut C> {
        self.ensure_type::<C>();
        let chunk = self.live_chunk(handle)?;
        let payload = chunk.payload_ptr(handle.slot());
        // SAFETY: as in `get`, plus `&mut self` guarantees exclusivity.
        Some(unsafe { &mut *payload.as_ptr().cast::<C>() })
    }

    /// Iterate over live components in allocation order, yielding `(Handle, &C)`.
    ///
    /// # Panics
    /// Panics if the type `C` doesn't match the table's component type.
    pub fn iter<C: Component>(&self) -> TableIter<'_, C> {
        self.ensure_type::<C>();
        TableIter {
            table: self,
            cursor: self.live_head,
            remaining: self.len,
            _marker: std::marker::PhantomData,
        }
    }

    /// Iterate mutably over live components in allocation order, yielding
    /// `(Handle, &mut C)`.
    ///
    /// # Panics
    /// Panics if the type `C` doesn't match the table's component type.
    pub fn iter_mut<C: Component>(&mut self) -> TableIterMut<'_, C> {
        self.ensure_type::<C>();
        let cursor = self.live_head;
        let remaining = self.len;
        TableIterMut {
            table: self,
            cursor,
            remaining,
            _marker: std::marker::PhantomData,
        }
    }

    /// Free every live slot, dropping payloads. Chunks stay linked for reuse.
    pub fn clear(&mut self) {
        let drop_fn = self.info.drop_fn();
        let mut cursor = self.head;
        while let Some(id) = cursor {
            let chunk = self.chunks[id.index()]
                .as_mut()
                .expect("chunk chain references a retired arena entry");
            for slot in 0..chunk.capacity() as u32 {
                if chunk.is_allocated(slot) {
                    // SAFETY: live slot, initialized payload of the table's type.
                    unsafe {
                        drop_fn(chunk.payload_ptr(slot));
                    }
                    chunk.free(slot);
                }
            }
            cursor = chunk.next();
        }
        self.live_head = SlotLink::NONE;
        self.live_tail = SlotLink::NONE;
        self.len = 0;
    }

    /// Ensure the type `C` is valid for this table.
    ///
    /// This validates both TypeId and Layout, in every build. The cost is two integer
    /// comparisons; silently reinterpreting payload bytes would be far worse.
    ///
    /// # Panics
    /// Panics if the TypeId or Layout of `C` doesn't match the table's component type.
    #[inline]
    pub fn ensure_type<C: Component>(&self) {
        assert!(
            TypeId::of::<C>() == self.info.type_id(),
            "Type mismatch: attempted to use type {} with table storing {:?}",
            std::any::type_name::<C>(),
            self.info
        );
        assert!(
            Layout::new::<C>() == self.info.layout(),
            "Layout mismatch: component layout does not match table layout"
        );
    }

    /// Verify that the chain, bitmap and live-list bookkeeping agree.
    /// This is useful for debugging and testing.
    ///
    /// # Panics
    /// Panics if any count disagrees.
    #[cfg(debug_assertions)]
    pub fn verify_invariants(&self) {
        // Bitmap population across the chain matches the live count.
        let mut bitmap_total = 0;
        let mut cursor = self.head;
        while let Some(id) = cursor {
            let chunk = self.chunks[id.index()]
                .as_ref()
                .expect("chunk chain references a retired arena entry");
            bitmap_total += chunk.used();
            cursor = chunk.next();
        }
        assert_eq!(
            bitmap_total, self.len,
            "bitmap population {} doesn't match live count {}",
            bitmap_total, self.len
        );

        // The live list visits exactly len slots and ends at the tail.
        let mut list_total = 0;
        let mut link = self.live_head;
        let mut last = SlotLink::NONE;
        while let Some((id, slot)) = link.get() {
            last = link;
            list_total += 1;
            assert!(
                list_total <= self.len,
                "live list is longer than the live count {}",
                self.len
            );
            link = self.chunk(id).header(slot).next;
        }
        assert_eq!(list_total, self.len, "live list length doesn't match live count");
        assert_eq!(last, self.live_tail, "live list doesn't end at the recorded tail");
    }

    /// Check whether the given arena id currently holds one of this table's chunks.
    #[inline]
    fn owns_chunk(&self, id: ChunkId) -> bool {
        id.index() < self.owned.len() && self.owned.contains(id.index())
    }

    /// Resolve a handle to its chunk if the handle still references a live slot here.
    fn live_chunk(&self, handle: Handle) -> Option<&Chunk> {
        if handle.component() != self.info.id() || !self.owns_chunk(handle.chunk()) {
            return None;
        }
        let chunk = self.chunk(handle.chunk());
        if (handle.slot() as usize) < chunk.capacity() && chunk.is_allocated(handle.slot()) {
            Some(chunk)
        } else {
            None
        }
    }

    /// Get a chunk by arena id.
    ///
    /// # Panics
    /// Panics if the id does not hold a chunk; callers validate ownership first.
    #[inline]
    fn chunk(&self, id: ChunkId) -> &Chunk {
        self.chunks[id.index()]
            .as_ref()
            .expect("chunk arena entry missing")
    }

    /// Get a chunk mutably by arena id.
    #[inline]
    fn chunk_mut(&mut self, id: ChunkId) -> &mut Chunk {
        self.chunks[id.index()]
            .as_mut()
            .expect("chunk arena entry missing")
    }

    /// Find a chunk with room and allocate a slot, growing the chain if needed.
    fn allocate_slot(&mut self) -> (ChunkId, u32) {
        let mut cursor = self.head;
        while let Some(id) = cursor {
            let chunk = self.chunks[id.index()]
                .as_mut()
                .expect("chunk chain references a retired arena entry");
            match chunk.try_allocate(id) {
                Some(slot) => {
                    self.link_live(id, slot);
                    self.len += 1;
                    return (id, slot);
                }
                None => cursor = chunk.next(),
            }
        }

        // Every chunk is full (or the chain is empty); append a fresh one.
        let id = self.grow();
        let slot = self
            .chunk_mut(id)
            .try_allocate(id)
            .expect("freshly initialized chunk must have a free slot");
        self.link_live(id, slot);
        self.len += 1;
        (id, slot)
    }

    /// Append a new chunk to the tail of the chain.
    fn grow(&mut self) -> ChunkId {
        let memory = self.allocator.allocate(self.chunk_size);
        let chunk = Chunk::new(ChunkInit {
            memory,
            component_size: self.info.size(),
            prev: self.tail,
            next: None,
        });

        let id = match self.recycled_ids.pop() {
            Some(id) => id,
            None => {
                self.chunks.push(None);
                ChunkId::new(self.chunks.len() - 1)
            }
        };
        debug!(
            "component {:?}: appending chunk {} ({} slots)",
            self.info.id(),
            id.index(),
            chunk.capacity()
        );
        self.chunks[id.index()] = Some(chunk);
        self.owned.grow(id.index() + 1);
        self.owned.insert(id.index());

        if let Some(tail) = self.tail {
            self.chunk_mut(tail).set_next(Some(id));
        } else {
            self.head = Some(id);
        }
        self.tail = Some(id);
        id
    }

    /// Unlink an emptied chunk from the chain and return its buffer to the provider.
    fn reclaim_chunk(&mut self, id: ChunkId) {
        let (prev, next) = {
            let chunk = self.chunk(id);
            debug_assert!(chunk.is_empty(), "reclaiming a chunk with live slots");
            (chunk.prev(), chunk.next())
        };

        // Relink the siblings to bypass this chunk.
        match prev {
            Some(prev_id) => self.chunk_mut(prev_id).set_next(next),
            None => self.head = next,
        }
        match next {
            Some(next_id) => self.chunk_mut(next_id).set_prev(prev),
            None => self.tail = prev,
        }

        let chunk = self.chunks[id.index()]
            .take()
            .expect("chunk arena entry missing");
        self.owned.set(id.index(), false);
        self.recycled_ids.push(id);
        debug!("component {:?}: reclaimed chunk {}", self.info.id(), id.index());
        self.allocator.release(chunk.into_memory());
    }

    /// Append a freshly allocated slot to the tail of the live list.
    fn link_live(&mut self, id: ChunkId, slot: u32) {
        let link = SlotLink::to(id, slot);
        let prev = self.live_tail;

        {
            let header = self.chunk_mut(id).header_mut(slot);
            header.prev = prev;
            header.next = SlotLink::NONE;
        }

        match prev.get() {
            Some((prev_id, prev_slot)) => {
                self.chunk_mut(prev_id).header_mut(prev_slot).next = link;
            }
            None => self.live_head = link,
        }
        self.live_tail = link;
    }

    /// Remove a live slot from the live list.
    fn unlink_live(&mut self, link: SlotLink) {
        let (chunk_id, slot) = link.get().expect("cannot unlink the empty link");
        let (prev, next) = {
            let header = self.chunk(chunk_id).header(slot);
            (header.prev, header.next)
        };

        match prev.get() {
            Some((id, s)) => self.chunk_mut(id).header_mut(s).next = next,
            None => self.live_head = next,
        }
        match next.get() {
            Some((id, s)) => self.chunk_mut(id).header_mut(s).prev = prev,
            None => self.live_tail = prev,
        }
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        // Drop all live payloads, then hand every buffer back to the provider so
        // recycling providers can reuse them.
        self.clear();
        for entry in self.chunks.drain(..) {
            if let Some(chunk) = entry {
                self.allocator.release(chunk.into_memory());
            }
        }
    }
}

/// Iterator over live components in allocation order.
pub struct TableIter<'a, C: Component> {
    table: &'a Table,
    cursor: SlotLink,
    remaining: usize,
    _marker: std::marker::PhantomData<&'a C>,
}

impl<'a, C: Component> Iterator for TableIter<'a, C> {
    type Item = (Handle, &'a C);

    fn next(&mut self) -> Option<Self::Item> {
        let (chunk_id, slot) = self.cursor.get()?;
        let chunk = self.table.chunk(chunk_id);
        self.cursor = chunk.header(slot).next;
        self.remaining -= 1;

        let handle = Handle::new(self.table.info.id(), chunk_id, slot);
        // SAFETY: the live list only contains allocated slots, and iter() validated C.
        let value = unsafe { &*chunk.payload_ptr(slot).as_ptr().cast::<C>() };
        Some((handle, value))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, C: Component> ExactSizeIterator for TableIter<'a, C> {}

/// Mutable iterator over live components in allocation order.
pub struct TableIterMut<'a, C: Component> {
    table: &'a mut Table,
    cursor: SlotLink,
    remaining: usize,
    _marker: std::marker::PhantomData<&'a mut C>,
}

impl<'a, C: Component> Iterator for TableIterMut<'a, C> {
    type Item = (Handle, &'a mut C);

    fn next(&mut self) -> Option<Self::Item> {
        let (chunk_id, slot) = self.cursor.get()?;
        let chunk = self.table.chunk(chunk_id);
        self.cursor = chunk.header(slot).next;
        self.remaining -= 1;

        let handle = Handle::new(self.table.info.id(), chunk_id, slot);
        let payload = chunk.payload_ptr(slot);
        // SAFETY:
        // - the live list only contains allocated slots, and iter_mut() validated C
        // - the cursor advances past this slot, so it is never yielded twice
        // - the lifetime 'a ensures exclusive access for the iterator's lifetime
        let value = unsafe { &mut *payload.as_ptr().cast::<C>() };
        Some((handle, value))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, C: Component> ExactSizeIterator for TableIterMut<'a, C> {}
