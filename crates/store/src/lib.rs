//! Paged store for LatticeDB
//!
//! The store hands out byte-addressable **areas**: variable-size
//! allocations with stable ids. Everything durable in the engine (the
//! table state header, the visible/delete lists, table source records,
//! large objects) lives in an area.
//!
//! Two implementations share the [`AreaStore`] trait:
//! - [`MemoryStore`]: ephemeral, for tests and in-memory databases
//! - [`FileStore`]: a single-file, crash-safe store with alternating
//!   superblock slots and CRC-framed records
//!
//! On top of the raw store, [`TableStateStore`] persists the three pieces
//! of global table state: the visible table list, the pending-delete
//! list, and the monotonic table-id counter.

#![warn(clippy::all)]

pub mod area;
pub mod file;
pub mod memory;
pub mod state;
pub mod store;

pub use area::{Area, AreaId};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use state::{TableSourceState, TableStateStore, STATE_MAGIC, STATE_VERSION};
pub use store::{AreaStore, StoreLatchGuard};
