//! Chunked component storage for the Quasar engine.
//!
//! This crate is the engine's component memory layer: for each component type it keeps a
//! chain of fixed-capacity chunks, each chunk a block of identically-sized slots tracked
//! by an inline allocation bitmap. Callers allocate and free component instances through
//! opaque handles; the engine layers above (worlds, rendering, audio) never touch slot
//! memory directly.
//!
//! # Architecture
//!
//! - **Component Registry**: thread-safe mapping from Rust types to stable component ids
//! - **Manager**: routes allocations to the per-type table, creating tables on demand
//! - **Table**: owns the chunk chain for one component type
//! - **Chunk**: a fixed block of header+payload slots plus its occupancy bitmap
//! - **Chunk Provider**: injected source of chunk memory, optionally recycling
//!
//! # Example
//!
//! ```ignore
//! use quasar_store::storage::manager::Manager;
//! use quasar_macros::Component;
//!
//! #[derive(Component)]
//! struct Position { x: f32, y: f32 }
//!
//! let mut manager = Manager::new();
//!
//! let handle = manager.alloc(Position { x: 0.0, y: 0.0 });
//! manager.get_mut::<Position>(handle).unwrap().x += 1.0;
//!
//! for (_, position) in manager.iter::<Position>().unwrap() {
//!     println!("({}, {})", position.x, position.y);
//! }
//!
//! manager.free(handle);
//! ```
//!
//! # Threading
//!
//! The store assumes a single simulation writer per manager: mutation takes `&mut self`.
//! Only the component registry and the chunk providers are internally synchronized, so
//! managers on different threads can share ids and pooled chunk memory.

// Allows the derive macro's `::quasar_store::...` paths to resolve inside this crate.
extern crate self as quasar_store;

pub mod component;
pub mod storage;
