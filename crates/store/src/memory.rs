//! In-memory area store
//!
//! Backs ephemeral databases and tests. `flush` is a no-op; the latch and
//! area semantics match the file store exactly so the transactional core
//! behaves identically over both.

use crate::area::{Area, AreaBuf, AreaId};
use crate::store::{AreaStore, Latch};
use lattice_core::{Error, Result};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Ephemeral area store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    areas: RwLock<FxHashMap<u64, Arc<RwLock<AreaBuf>>>>,
    next_id: AtomicU64,
    latch: Latch,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        MemoryStore {
            areas: RwLock::new(FxHashMap::default()),
            next_id: AtomicU64::new(1),
            latch: Latch::default(),
        }
    }

    /// Number of live areas.
    pub fn area_count(&self) -> usize {
        self.areas.read().len()
    }
}

impl AreaStore for MemoryStore {
    fn create_area(&self, size: usize) -> Result<Area> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let buf = Arc::new(RwLock::new(AreaBuf::new(size)));
        self.areas.write().insert(id, buf.clone());
        Ok(Area::new(AreaId(id), true, buf))
    }

    fn get_area(&self, id: AreaId, writable: bool) -> Result<Area> {
        let areas = self.areas.read();
        let buf = areas
            .get(&id.0)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        Ok(Area::new(id, writable, buf.clone()))
    }

    fn delete_area(&self, id: AreaId) -> Result<()> {
        self.areas
            .write()
            .remove(&id.0)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn lock(&self) {
        self.latch.lock();
    }

    fn unlock(&self) {
        self.latch.unlock();
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_get_delete() {
        let store = MemoryStore::new();
        let a = store.create_area(32).unwrap();
        a.write(0, b"hello").unwrap();

        let again = store.get_area(a.id(), false).unwrap();
        let mut buf = [0u8; 5];
        again.read(0, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        store.delete_area(a.id()).unwrap();
        assert!(store.get_area(a.id(), false).is_err());
        assert!(matches!(
            store.delete_area(a.id()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn ids_are_never_reused() {
        let store = MemoryStore::new();
        let a = store.create_area(1).unwrap();
        store.delete_area(a.id()).unwrap();
        let b = store.create_area(1).unwrap();
        assert!(b.id() > a.id());
    }

    #[test]
    fn deleted_area_stays_readable_through_open_handles() {
        let store = MemoryStore::new();
        let a = store.create_area(4).unwrap();
        a.write(0, b"keep").unwrap();
        store.delete_area(a.id()).unwrap();
        let mut buf = [0u8; 4];
        a.read(0, &mut buf).unwrap();
        assert_eq!(&buf, b"keep");
    }
}
