//! Fixed-capacity bitmap slot allocation.
//!
//! Each chunk embeds one [`AllocationTable`] tracking which of its slots are occupied.
//! The table is a small inline array of 64-bit words; bit N set means slot N is allocated.
//! Allocation scans words in index order and hands out the lowest free slot, so freed
//! low slots are reused before the chunk grows toward its tail.
//!
//! The free-count accounting is checked on every mutation. Double frees, out-of-range
//! frees and accounting drift are treated as fatal corruption, not recoverable errors -
//! by the time the bitmap disagrees with itself, component memory can no longer be
//! trusted.

/// Number of bits tracked per bitmap word.
pub const BITS_PER_WORD: usize = u64::BITS as usize;

/// Number of words in every allocation table.
const WORD_COUNT: usize = 8;

/// The hard cap on slots a single chunk can track.
pub const MAX_SLOTS_PER_CHUNK: usize = WORD_COUNT * BITS_PER_WORD;

/// A fixed-size bitmap tracking slot occupancy within one chunk.
///
/// The table always owns `WORD_COUNT` words but only `capacity` slots are valid; a
/// capacity above [`MAX_SLOTS_PER_CHUNK`] is clamped at construction. Bits above the
/// capacity stay clear for the table's lifetime - they are unreachable because
/// allocation stops once `free_count` hits zero, and `free` range-checks its index.
///
/// # Invariants
/// - `free_count == capacity - popcount(words)` after every operation
/// - a slot index is returned by at most one `try_allocate` between frees
#[derive(Debug, Clone)]
pub struct AllocationTable {
    /// The occupancy bitmap. Bit `i % 64` of word `i / 64` covers slot `i`.
    words: [u64; WORD_COUNT],

    /// Number of slots still available.
    free_count: usize,

    /// Number of valid slots in this table.
    capacity: usize,
}

impl AllocationTable {
    /// Construct a table with the given slot capacity, all slots free.
    ///
    /// The capacity is clamped to [`MAX_SLOTS_PER_CHUNK`].
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(MAX_SLOTS_PER_CHUNK);
        Self {
            words: [0; WORD_COUNT],
            free_count: capacity,
            capacity,
        }
    }

    /// Get the number of slots this table tracks.
    #[inline]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the number of free slots.
    #[inline]
    pub const fn free_count(&self) -> usize {
        self.free_count
    }

    /// Get the number of allocated slots.
    #[inline]
    pub const fn used(&self) -> usize {
        self.capacity - self.free_count
    }

    /// Check if every slot is allocated.
    #[inline]
    pub const fn is_full(&self) -> bool {
        self.free_count == 0
    }

    /// Check if no slot is allocated.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.free_count == self.capacity
    }

    /// Check whether a specific slot is currently allocated.
    ///
    /// # Panics
    /// Panics if `index >= capacity()`.
    #[inline]
    pub fn is_allocated(&self, index: usize) -> bool {
        assert!(
            index < self.capacity,
            "slot index {} out of range (capacity: {})",
            index,
            self.capacity
        );
        self.words[index / BITS_PER_WORD] & (1u64 << (index % BITS_PER_WORD)) != 0
    }

    /// Allocate the lowest free slot, returning its index.
    ///
    /// Returns `None` when the table is full. This is control flow, not an error - the
    /// caller moves on to the next chunk or grows the chain.
    ///
    /// # Panics
    /// Panics if the free count and the bitmap disagree. That state is unreachable
    /// through this API and indicates memory corruption.
    pub fn try_allocate(&mut self) -> Option<usize> {
        if self.free_count == 0 {
            return None;
        }

        for (word_index, word) in self.words.iter_mut().enumerate() {
            // A full word has no bit to offer, skip it wholesale.
            if *word == u64::MAX {
                continue;
            }

            // Lowest clear bit wins; trailing_ones is the count of set bits below it.
            let bit = word.trailing_ones() as usize;
            let index = word_index * BITS_PER_WORD + bit;
            assert!(
                index < self.capacity,
                "allocation bitmap corrupt: free_count is {} but the lowest clear bit {} is past capacity {}",
                self.free_count,
                index,
                self.capacity
            );
            *word |= 1u64 << bit;
            self.free_count -= 1;
            return Some(index);
        }

        panic!(
            "allocation bitmap corrupt: free_count is {} but no word has a clear bit",
            self.free_count
        );
    }

    /// Free a previously allocated slot.
    ///
    /// # Panics
    /// - If `index >= capacity()`.
    /// - If the slot is already free (double free).
    /// - If freeing would push the free count past the capacity.
    pub fn free(&mut self, index: usize) {
        assert!(
            index < self.capacity,
            "slot index {} out of range (capacity: {})",
            index,
            self.capacity
        );

        let word = &mut self.words[index / BITS_PER_WORD];
        let mask = 1u64 << (index % BITS_PER_WORD);
        assert!(*word & mask != 0, "double free of slot {}", index);

        *word &= !mask;
        self.free_count += 1;
        assert!(
            self.free_count <= self.capacity,
            "free count {} exceeds capacity {}",
            self.free_count,
            self.capacity
        );
    }

    /// Count the allocated bits across all words.
    pub(crate) fn popcount(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}
