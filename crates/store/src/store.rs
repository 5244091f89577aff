//! The `AreaStore` trait and the coarse store latch
//!
//! A store hands out areas, reclaims them, and flushes pending writes to
//! backing storage. The latch is the coarse exclusive lock used to batch
//! multi-area header updates into one atomic group: everything written
//! between `lock()` and `unlock()` becomes visible post-recovery together
//! or not at all (the file store publishes a flush with a single
//! superblock write).

use crate::area::{Area, AreaId};
use lattice_core::Result;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::ThreadId;

/// A store of byte-addressable areas.
pub trait AreaStore: Send + Sync {
    /// Allocate a new area of `size` bytes, returned writable.
    fn create_area(&self, size: usize) -> Result<Area>;

    /// Open an existing area. `NotFound` if the id is unknown.
    fn get_area(&self, id: AreaId, writable: bool) -> Result<Area>;

    /// Schedule an area for reclamation. The bytes stay readable through
    /// already-open handles; the id becomes unknown to `get_area`.
    fn delete_area(&self, id: AreaId) -> Result<()>;

    /// Acquire the coarse exclusive latch. Re-entrant per thread.
    fn lock(&self);

    /// Release the coarse exclusive latch.
    fn unlock(&self);

    /// Durably commit all writes completed before this call.
    fn flush(&self) -> Result<()>;
}

/// RAII helper over [`AreaStore::lock`]/[`AreaStore::unlock`].
pub struct StoreLatchGuard<'a> {
    store: &'a dyn AreaStore,
}

impl<'a> StoreLatchGuard<'a> {
    /// Lock `store` until the guard drops.
    pub fn acquire(store: &'a dyn AreaStore) -> Self {
        store.lock();
        StoreLatchGuard { store }
    }
}

impl Drop for StoreLatchGuard<'_> {
    fn drop(&mut self) {
        self.store.unlock();
    }
}

/// Re-entrant exclusive latch shared by the store implementations.
///
/// `next_table_id` locks the latch and then calls `flush`, which locks it
/// again from the same thread, so plain mutual exclusion is not enough.
#[derive(Debug, Default)]
pub(crate) struct Latch {
    state: Mutex<LatchState>,
    cv: Condvar,
}

#[derive(Debug, Default)]
struct LatchState {
    owner: Option<ThreadId>,
    depth: usize,
}

impl Latch {
    pub(crate) fn lock(&self) {
        let me = std::thread::current().id();
        let mut state = self.state.lock();
        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.depth = 1;
                    return;
                }
                Some(owner) if owner == me => {
                    state.depth += 1;
                    return;
                }
                Some(_) => self.cv.wait(&mut state),
            }
        }
    }

    pub(crate) fn unlock(&self) {
        let me = std::thread::current().id();
        let mut state = self.state.lock();
        debug_assert_eq!(state.owner, Some(me), "latch released by non-owner");
        if state.owner == Some(me) {
            state.depth -= 1;
            if state.depth == 0 {
                state.owner = None;
                self.cv.notify_one();
            }
        }
    }
}

// Blanket impls so `Arc<dyn AreaStore>` and friends are stores too.
impl<S: AreaStore + ?Sized> AreaStore for Arc<S> {
    fn create_area(&self, size: usize) -> Result<Area> {
        (**self).create_area(size)
    }
    fn get_area(&self, id: AreaId, writable: bool) -> Result<Area> {
        (**self).get_area(id, writable)
    }
    fn delete_area(&self, id: AreaId) -> Result<()> {
        (**self).delete_area(id)
    }
    fn lock(&self) {
        (**self).lock()
    }
    fn unlock(&self) {
        (**self).unlock()
    }
    fn flush(&self) -> Result<()> {
        (**self).flush()
    }
}
