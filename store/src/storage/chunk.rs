//! Fixed-capacity chunks of identically-sized component slots.
//!
//! A [`Chunk`] owns one block of raw memory and divides it into `capacity` slots of
//! `stride` bytes each. Every slot starts with a [`SlotHeader`] followed by the component
//! payload; the stride is the header size plus the payload size, rounded up to the slot
//! alignment. Occupancy is tracked by the embedded
//! [`AllocationTable`](crate::storage::bitmap::AllocationTable).
//!
//! Chunks live in their table's arena and refer to their siblings by [`ChunkId`] rather
//! than by pointer, so links stay valid no matter how the arena vector reallocates.

use std::ptr::{self, NonNull};

use crate::storage::{
    bitmap::{AllocationTable, MAX_SLOTS_PER_CHUNK},
    mem::{CHUNK_ALIGN, ChunkMemory},
};

/// A stable identifier for a chunk within its table's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkId(u32);

impl ChunkId {
    /// Construct a new chunk Id from an arena index.
    #[inline]
    pub(crate) const fn new(index: usize) -> Self {
        Self(index as u32)
    }

    /// Get the index of this chunk in the owning table's arena.
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    /// Get the raw id value.
    #[inline]
    pub(crate) const fn raw(&self) -> u32 {
        self.0
    }
}

/// A packed reference to a slot: chunk id in the high half, slot index in the low half.
///
/// Headers store their navigation links in this form so a link fits in one word and a
/// zeroed slot cannot be mistaken for a missing link (the empty link is all-ones, and it
/// is rewritten explicitly right after the zero-fill).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub(crate) struct SlotLink(u64);

impl SlotLink {
    /// The empty link.
    pub(crate) const NONE: Self = Self(u64::MAX);

    /// Pack a chunk id and slot index into a link.
    #[inline]
    pub(crate) fn to(chunk: ChunkId, slot: u32) -> Self {
        // An arena can never reach u32::MAX chunks; the all-ones pattern stays reserved.
        debug_assert!(chunk.raw() != u32::MAX, "chunk id collides with empty link");
        Self(((chunk.raw() as u64) << 32) | slot as u64)
    }

    /// Unpack the link, or `None` for the empty link.
    #[inline]
    pub(crate) fn get(self) -> Option<(ChunkId, u32)> {
        if self == Self::NONE {
            None
        } else {
            Some((ChunkId((self.0 >> 32) as u32), self.0 as u32))
        }
    }

    /// Check if this link refers to a slot.
    #[inline]
    pub(crate) fn is_some(self) -> bool {
        self != Self::NONE
    }
}

/// The intrusive record prepended to every component payload.
///
/// A live slot's header names its owning chunk and slot, plus its neighbors in the
/// table's live-slot list. A freed slot's header is garbage until the slot is
/// reallocated, at which point the zero-fill and the explicit rewrite below reset it.
#[repr(C)]
pub(crate) struct SlotHeader {
    /// Link to the previously allocated live slot in the owning table.
    pub(crate) prev: SlotLink,

    /// Link to the next allocated live slot in the owning table.
    pub(crate) next: SlotLink,

    /// The arena id of the owning chunk.
    pub(crate) chunk: u32,

    /// This slot's index within the owning chunk.
    pub(crate) slot: u32,
}

/// Byte size of the slot header. Payloads start at this offset within a slot.
pub const HEADER_SIZE: usize = size_of::<SlotHeader>();

// The header must not disturb the 8-byte slot alignment.
const _: () = assert!(HEADER_SIZE % CHUNK_ALIGN == 0);

/// Compute the slot stride for a component payload size.
///
/// This is the single source of truth for slot sizing: tables use it to size chunk
/// buffers and chunks use it to address slots. The result is always a multiple of the
/// slot alignment and always at least `HEADER_SIZE + component_size`.
#[inline]
pub const fn calculate_stride(component_size: usize) -> usize {
    align_up(HEADER_SIZE + component_size, CHUNK_ALIGN)
}

/// Round `value` up to the next multiple of `align` (a power of two).
#[inline]
const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// The parameters needed to initialize a chunk.
pub(crate) struct ChunkInit {
    /// The raw block backing the chunk's slots.
    pub memory: ChunkMemory,

    /// The component payload size in bytes.
    pub component_size: usize,

    /// The preceding sibling in the table's chunk chain.
    pub prev: Option<ChunkId>,

    /// The following sibling in the table's chunk chain.
    pub next: Option<ChunkId>,
}

/// One fixed-capacity block of component slots.
///
/// The slot count is fixed at construction: as many stride-sized slots as the buffer
/// holds, capped at [`MAX_SLOTS_PER_CHUNK`]. Allocation failure here is not an error -
/// it tells the owning table to try the next chunk or grow the chain.
pub struct Chunk {
    /// The raw backing memory. All of it is slot array; bookkeeping lives here in the
    /// arena entry, not inside the buffer.
    memory: ChunkMemory,

    /// Occupancy bitmap for the slots.
    bitmap: AllocationTable,

    /// Byte distance between consecutive slots.
    stride: usize,

    /// The preceding sibling chunk.
    prev: Option<ChunkId>,

    /// The following sibling chunk.
    next: Option<ChunkId>,
}

impl Chunk {
    /// Initialize a chunk over the given memory block.
    ///
    /// # Panics
    /// Panics if the buffer cannot hold even one slot of the computed stride.
    pub(crate) fn new(init: ChunkInit) -> Self {
        let stride = calculate_stride(init.component_size);
        let slots = (init.memory.len() / stride).min(MAX_SLOTS_PER_CHUNK);
        assert!(
            slots > 0,
            "chunk buffer of {} bytes cannot hold a slot of stride {}",
            init.memory.len(),
            stride
        );
        Self {
            memory: init.memory,
            bitmap: AllocationTable::new(slots),
            stride,
            prev: init.prev,
            next: init.next,
        }
    }

    /// Get the slot stride in bytes.
    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Get the number of slots in this chunk.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.bitmap.capacity()
    }

    /// Get the number of allocated slots.
    #[inline]
    pub fn used(&self) -> usize {
        self.bitmap.used()
    }

    /// Check if every slot is allocated.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.bitmap.is_full()
    }

    /// Check if no slot is allocated.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bitmap.is_empty()
    }

    /// Check whether a specific slot is currently allocated.
    #[inline]
    pub fn is_allocated(&self, slot: u32) -> bool {
        self.bitmap.is_allocated(slot as usize)
    }

    /// Get the preceding sibling chunk.
    #[inline]
    pub(crate) fn prev(&self) -> Option<ChunkId> {
        self.prev
    }

    /// Get the following sibling chunk.
    #[inline]
    pub(crate) fn next(&self) -> Option<ChunkId> {
        self.next
    }

    /// Set the preceding sibling chunk.
    #[inline]
    pub(crate) fn set_prev(&mut self, prev: Option<ChunkId>) {
        self.prev = prev;
    }

    /// Set the following sibling chunk.
    #[inline]
    pub(crate) fn set_next(&mut self, next: Option<ChunkId>) {
        self.next = next;
    }

    /// Allocate a slot, zero-fill it and initialize its header.
    ///
    /// `own_id` is this chunk's id in the owning table's arena; the header records it so
    /// a handle's payload can always be traced back to its chunk.
    ///
    /// Returns `None` when the chunk is full.
    pub(crate) fn try_allocate(&mut self, own_id: ChunkId) -> Option<u32> {
        let slot = self.bitmap.try_allocate()? as u32;
        let base = self.slot_ptr(slot);

        // The new tenant must never observe the previous tenant's bytes.
        unsafe { ptr::write_bytes(base.as_ptr(), 0, self.stride) };

        // The zero-fill left the links decoding as chunk 0 slot 0; rewrite the header
        // with real values before anyone reads it.
        let header = unsafe { &mut *base.as_ptr().cast::<SlotHeader>() };
        header.prev = SlotLink::NONE;
        header.next = SlotLink::NONE;
        header.chunk = own_id.raw();
        header.slot = slot;

        Some(slot)
    }

    /// Free a previously allocated slot.
    ///
    /// The slot's memory is left untouched; its contents are undefined until the next
    /// allocation zero-fills it.
    ///
    /// # Panics
    /// Panics on out-of-range indices and double frees (see
    /// [`AllocationTable::free`]).
    pub(crate) fn free(&mut self, slot: u32) {
        self.bitmap.free(slot as usize);
    }

    /// Get a pointer to the start of a slot (its header).
    #[inline]
    fn slot_ptr(&self, slot: u32) -> NonNull<u8> {
        debug_assert!(
            (slot as usize) < self.bitmap.capacity(),
            "slot {} out of bounds (capacity: {})",
            slot,
            self.bitmap.capacity()
        );
        self.memory.ptr_at(self.stride * slot as usize)
    }

    /// Get a pointer to a slot's payload region.
    #[inline]
    pub(crate) fn payload_ptr(&self, slot: u32) -> NonNull<u8> {
        unsafe { NonNull::new_unchecked(self.slot_ptr(slot).as_ptr().add(HEADER_SIZE)) }
    }

    /// Get a slot's header.
    ///
    /// Only meaningful for allocated slots; a freed slot's header is garbage.
    #[inline]
    pub(crate) fn header(&self, slot: u32) -> &SlotHeader {
        unsafe { &*self.slot_ptr(slot).as_ptr().cast::<SlotHeader>() }
    }

    /// Get a slot's header mutably.
    #[inline]
    pub(crate) fn header_mut(&mut self, slot: u32) -> &mut SlotHeader {
        unsafe { &mut *self.slot_ptr(slot).as_ptr().cast::<SlotHeader>() }
    }

    /// Take the backing memory out of the chunk, consuming it.
    pub(crate) fn into_memory(self) -> ChunkMemory {
        self.memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_for(component_size: usize, slots: usize) -> Chunk {
        let stride = calculate_stride(component_size);
        Chunk::new(ChunkInit {
            memory: ChunkMemory::allocate(stride * slots),
            component_size,
            prev: None,
            next: None,
        })
    }

    #[test]
    fn stride_is_aligned_and_covers_header_and_payload() {
        // Given the payload sizes called out in the store's sizing contract
        for size in [0usize, 1, 7, 8, 9, 63, 64] {
            // When
            let stride = calculate_stride(size);

            // Then
            assert_eq!(stride % CHUNK_ALIGN, 0, "stride for size {} misaligned", size);
            assert!(
                stride >= HEADER_SIZE + size,
                "stride {} too small for header {} + payload {}",
                stride,
                HEADER_SIZE,
                size
            );
            // Determinism: the same size always yields the same stride
            assert_eq!(stride, calculate_stride(size));
        }
    }

    #[test]
    fn slot_count_derived_from_buffer_size() {
        // Given - room for exactly 10 slots of a 16-byte payload
        let chunk = chunk_for(16, 10);

        // Then
        assert_eq!(chunk.capacity(), 10);
        assert_eq!(chunk.used(), 0);
        assert!(chunk.is_empty());
    }

    #[test]
    fn slot_count_capped_at_maximum() {
        // Given - a buffer that could mathematically fit far more slots than the cap
        let stride = calculate_stride(4);
        let chunk = Chunk::new(ChunkInit {
            memory: ChunkMemory::allocate(stride * MAX_SLOTS_PER_CHUNK * 3),
            component_size: 4,
            prev: None,
            next: None,
        });

        // Then
        assert_eq!(chunk.capacity(), MAX_SLOTS_PER_CHUNK);
    }

    #[test]
    #[should_panic(expected = "cannot hold a slot")]
    fn undersized_buffer_panics() {
        let _ = Chunk::new(ChunkInit {
            memory: ChunkMemory::allocate(8),
            component_size: 64,
            prev: None,
            next: None,
        });
    }

    #[test]
    fn allocate_writes_header() {
        // Given
        let mut chunk = chunk_for(8, 4);
        let own_id = ChunkId::new(7);

        // When
        let slot = chunk.try_allocate(own_id).unwrap();

        // Then
        assert_eq!(slot, 0);
        assert!(chunk.is_allocated(slot));
        let header = chunk.header(slot);
        assert_eq!(header.chunk, 7);
        assert_eq!(header.slot, 0);
        assert_eq!(header.prev, SlotLink::NONE);
        assert_eq!(header.next, SlotLink::NONE);
    }

    #[test]
    fn allocate_until_full_then_none() {
        // Given
        let mut chunk = chunk_for(8, 3);
        let own_id = ChunkId::new(0);

        // When - fill the chunk
        for expected in 0..3 {
            assert_eq!(chunk.try_allocate(own_id), Some(expected));
        }

        // Then - a full chunk signals, it does not fail
        assert!(chunk.is_full());
        assert_eq!(chunk.try_allocate(own_id), None);
    }

    #[test]
    fn reallocated_slot_reads_back_zero() {
        // Given - a slot with every payload byte dirtied
        let mut chunk = chunk_for(16, 2);
        let own_id = ChunkId::new(0);
        let slot = chunk.try_allocate(own_id).unwrap();
        unsafe {
            ptr::write_bytes(chunk.payload_ptr(slot).as_ptr(), 0xAB, 16);
        }

        // When - free it and allocate again (lowest index: the same slot comes back)
        chunk.free(slot);
        let reused = chunk.try_allocate(own_id).unwrap();
        assert_eq!(reused, slot);

        // Then - the previous tenant's bytes are gone
        let payload = chunk.payload_ptr(reused).as_ptr();
        for offset in 0..16 {
            let byte = unsafe { payload.add(offset).read() };
            assert_eq!(byte, 0, "stale byte at payload offset {}", offset);
        }
    }

    #[test]
    fn slots_do_not_overlap() {
        // Given
        let mut chunk = chunk_for(8, 4);
        let own_id = ChunkId::new(0);
        let slots: Vec<u32> = (0..4).map(|_| chunk.try_allocate(own_id).unwrap()).collect();

        // When - write a distinct payload into every slot
        for &slot in &slots {
            unsafe {
                chunk
                    .payload_ptr(slot)
                    .as_ptr()
                    .cast::<u64>()
                    .write(0x1111 * (slot as u64 + 1));
            }
        }

        // Then - each slot still holds its own value
        for &slot in &slots {
            let value = unsafe { chunk.payload_ptr(slot).as_ptr().cast::<u64>().read() };
            assert_eq!(value, 0x1111 * (slot as u64 + 1));
        }
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn chunk_double_free_panics() {
        let mut chunk = chunk_for(8, 2);
        let slot = chunk.try_allocate(ChunkId::new(0)).unwrap();
        chunk.free(slot);
        chunk.free(slot);
    }

    #[test]
    fn slot_link_round_trip() {
        // Given
        let link = SlotLink::to(ChunkId::new(3), 41);

        // Then
        assert!(link.is_some());
        assert_eq!(link.get(), Some((ChunkId::new(3), 41)));
        assert_eq!(SlotLink::NONE.get(), None);
        assert!(!SlotLink::NONE.is_some());
    }
}
