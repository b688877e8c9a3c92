//! Raw chunk memory and the provider seam that supplies it.
//!
//! A [`ChunkMemory`] is one fixed-size, 8-byte-aligned block of uninitialized bytes.
//! Unlike a growable buffer, a chunk block never reallocates: its size is decided when
//! the owning table sizes a chunk, and the block lives unchanged until it is released.
//!
//! Tables do not call the system allocator directly. They go through a shared
//! [`ChunkAllocator`], which lets the embedding engine decide where chunk memory comes
//! from and what happens to it when a chunk is retired:
//!
//! - [`SystemChunkAllocator`] hands out fresh blocks and drops released ones.
//! - [`RecyclingChunkAllocator`] keeps released blocks in per-size pools so a table that
//!   churns chunks (or a table created later with the same stride) can reuse them
//!   without touching the system allocator.
//!
//! # Safety Contract
//!
//! The bytes inside a [`ChunkMemory`] are uninitialized until a chunk zero-fills a slot.
//! Callers must not read a slot before it has been allocated through the chunk's bitmap.

use std::{
    alloc::{self, Layout},
    ptr::NonNull,
};

use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use log::{debug, trace};

/// Alignment of every chunk block and every slot within it.
pub const CHUNK_ALIGN: usize = 8;

/// An owned, fixed-size block of raw chunk memory.
///
/// The block is allocated 8-byte-aligned and deallocated when the value drops. It makes
/// no assumptions about its contents; initialization tracking belongs to the chunk's
/// allocation bitmap.
pub struct ChunkMemory {
    /// The pointer to the underlying memory.
    ptr: NonNull<u8>,
    /// The block size in bytes.
    len: usize,
}

impl ChunkMemory {
    /// Allocate a new block of `len` bytes.
    ///
    /// # Panics
    /// Panics if `len` is zero. Aborts via the global allocation error handler if the
    /// system allocator fails.
    pub fn allocate(len: usize) -> Self {
        assert!(len > 0, "chunk memory must have a non-zero size");
        let layout =
            Layout::from_size_align(len, CHUNK_ALIGN).expect("chunk memory layout overflow");
        let ptr = unsafe { alloc::alloc(layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            alloc::handle_alloc_error(layout);
        };
        Self { ptr, len }
    }

    /// Get the block size in bytes.
    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Get a pointer to the start of the block.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Get a pointer to the byte at the given offset.
    ///
    /// # Panics
    /// Panics in debug mode if `offset >= len()`.
    #[inline]
    pub fn ptr_at(&self, offset: usize) -> NonNull<u8> {
        debug_assert!(
            offset < self.len,
            "offset {} out of bounds (len: {})",
            offset,
            self.len
        );
        unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(offset)) }
    }
}

impl Drop for ChunkMemory {
    fn drop(&mut self) {
        let layout = Layout::from_size_align(self.len, CHUNK_ALIGN)
            .expect("chunk memory layout overflow");
        unsafe {
            alloc::dealloc(self.ptr.as_ptr(), layout);
        }
    }
}

// SAFETY: ChunkMemory owns its allocation exclusively; the caller is responsible for
// ensuring any values stored within are Send.
unsafe impl Send for ChunkMemory {}

// SAFETY: ChunkMemory provides no internal mutability; the caller is responsible for
// ensuring any values stored within are Sync.
unsafe impl Sync for ChunkMemory {}

/// The seam through which tables obtain and return chunk memory.
///
/// Implementations must hand out blocks of exactly the requested size, aligned to
/// [`CHUNK_ALIGN`]. Providers are shared across tables (and possibly threads) via `Arc`,
/// so they must be internally synchronized.
pub trait ChunkAllocator: Send + Sync {
    /// Obtain a block of exactly `size` bytes.
    fn allocate(&self, size: usize) -> ChunkMemory;

    /// Accept a block back from a retired chunk.
    fn release(&self, memory: ChunkMemory);
}

/// A pass-through provider backed directly by the system allocator.
///
/// Released blocks are dropped immediately. Use this when chunk churn is rare or when
/// an external recycling layer already exists.
#[derive(Debug, Default)]
pub struct SystemChunkAllocator;

impl ChunkAllocator for SystemChunkAllocator {
    #[inline]
    fn allocate(&self, size: usize) -> ChunkMemory {
        ChunkMemory::allocate(size)
    }

    #[inline]
    fn release(&self, memory: ChunkMemory) {
        drop(memory);
    }
}

/// A provider that pools released blocks for reuse, keyed by block size.
///
/// Tables for different component types use different chunk sizes, so the pool is a
/// concurrent map from size to a lock-free queue of idle blocks. Each size class keeps
/// at most `max_pooled` blocks; further releases fall through to the system allocator.
pub struct RecyclingChunkAllocator {
    /// Idle blocks, grouped by exact byte size.
    pools: DashMap<usize, SegQueue<ChunkMemory>>,

    /// Cap on idle blocks retained per size class.
    max_pooled: usize,
}

impl RecyclingChunkAllocator {
    /// Default cap on idle blocks kept per size class.
    pub const DEFAULT_MAX_POOLED: usize = 8;

    /// Create a recycling provider with the default per-size pool cap.
    #[inline]
    pub fn new() -> Self {
        Self::with_max_pooled(Self::DEFAULT_MAX_POOLED)
    }

    /// Create a recycling provider keeping at most `max_pooled` idle blocks per size.
    #[inline]
    pub fn with_max_pooled(max_pooled: usize) -> Self {
        Self {
            pools: DashMap::new(),
            max_pooled,
        }
    }

    /// Get the number of idle blocks currently pooled for the given size.
    pub fn pooled(&self, size: usize) -> usize {
        self.pools.get(&size).map_or(0, |pool| pool.len())
    }
}

impl Default for RecyclingChunkAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkAllocator for RecyclingChunkAllocator {
    fn allocate(&self, size: usize) -> ChunkMemory {
        if let Some(pool) = self.pools.get(&size)
            && let Some(memory) = pool.pop()
        {
            trace!("reusing pooled chunk block ({} bytes)", size);
            return memory;
        }
        ChunkMemory::allocate(size)
    }

    fn release(&self, memory: ChunkMemory) {
        let size = memory.len();
        let pool = self.pools.entry(size).or_default();
        if pool.len() < self.max_pooled {
            pool.push(memory);
        } else {
            debug!("chunk block pool for {} bytes is full, dropping block", size);
            drop(memory);
        }
    }
}
