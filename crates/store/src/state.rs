//! Table state store
//!
//! Persists the three pieces of global table state on top of the paged
//! store: the **visible table list**, the **pending-delete list**, and the
//! monotonic **next-table-id** counter.
//!
//! # Header area (32 bytes, little-endian)
//!
//! ```text
//! ┌───────────┬─────────────┬──────────────────┬──────────────────┬─────────────────┐
//! │ Magic (4) │ Version (4) │ NextTableId (8)  │ VisibleArea (8)  │ DeleteArea (8)  │
//! └───────────┴─────────────┴──────────────────┴──────────────────┴─────────────────┘
//! ```
//!
//! # List area
//!
//! ```text
//! Version (4) · Count (8) · Count × ( TableId (8) · NameLen (4) · UTF-16LE code units )
//! ```
//!
//! List edits are buffered in memory and written by [`flush`]: each dirty
//! list is serialized into a *new* area, the header pointers are updated
//! under the store lock, the old areas are deleted. A crash between a
//! counter bump and a list flush leaves the counter advanced, which is
//! safe because table ids are never recycled.
//!
//! [`flush`]: TableStateStore::flush

use crate::area::{Area, AreaId};
use crate::store::{AreaStore, StoreLatchGuard};
use byteorder::{ByteOrder, LittleEndian};
use lattice_core::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Magic number identifying a table state header area.
pub const STATE_MAGIC: u32 = 0x0BAC_8001;
/// Current header/list format version.
pub const STATE_VERSION: u32 = 0;

const HEADER_SIZE: usize = 32;
const OFF_MAGIC: usize = 0;
const OFF_VERSION: usize = 4;
const OFF_NEXT_ID: usize = 8;
const OFF_VISIBLE: usize = 16;
const OFF_DELETE: usize = 24;

/// One entry of the visible or pending-delete list: a table id plus the
/// name of the source record backing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSourceState {
    /// Table id assigned by [`TableStateStore::next_table_id`]
    pub table_id: u64,
    /// Source record name (resolves to the source's own area)
    pub name: String,
}

impl TableSourceState {
    /// Build an entry.
    pub fn new(table_id: u64, name: impl Into<String>) -> Self {
        TableSourceState {
            table_id,
            name: name.into(),
        }
    }
}

#[derive(Debug)]
struct StateInner {
    next_table_id: u64,
    visible_area: AreaId,
    delete_area: AreaId,
    visible: Vec<TableSourceState>,
    delete: Vec<TableSourceState>,
    visible_dirty: bool,
    delete_dirty: bool,
}

/// Persistent visible/pending-delete table lists plus the table-id
/// counter.
pub struct TableStateStore {
    store: Arc<dyn AreaStore>,
    header: Area,
    inner: Mutex<StateInner>,
}

impl TableStateStore {
    /// Allocate two empty list areas and a header; returns the store and
    /// the header's area id (the database's bootstrap pointer).
    pub fn create(store: Arc<dyn AreaStore>) -> Result<(TableStateStore, AreaId)> {
        let empty = encode_list(&[]);
        let visible = store.create_area(empty.len())?;
        visible.write(0, &empty)?;
        let delete = store.create_area(empty.len())?;
        delete.write(0, &empty)?;

        let header = store.create_area(HEADER_SIZE)?;
        header.write_u32(OFF_MAGIC, STATE_MAGIC)?;
        header.write_u32(OFF_VERSION, STATE_VERSION)?;
        header.write_u64(OFF_NEXT_ID, 1)?;
        header.write_u64(OFF_VISIBLE, visible.id().0)?;
        header.write_u64(OFF_DELETE, delete.id().0)?;
        store.flush()?;

        let header_id = header.id();
        Ok((
            TableStateStore {
                store,
                header,
                inner: Mutex::new(StateInner {
                    next_table_id: 1,
                    visible_area: visible.id(),
                    delete_area: delete.id(),
                    visible: Vec::new(),
                    delete: Vec::new(),
                    visible_dirty: false,
                    delete_dirty: false,
                }),
            },
            header_id,
        ))
    }

    /// Open from an existing header area, validating magic and version.
    pub fn open(store: Arc<dyn AreaStore>, header_id: AreaId) -> Result<TableStateStore> {
        let header = store.get_area(header_id, true)?;
        let magic = header.read_u32(OFF_MAGIC)?;
        if magic != STATE_MAGIC {
            return Err(Error::Corruption(format!(
                "table state header has magic {magic:#010x}, expected {STATE_MAGIC:#010x}"
            )));
        }
        let version = header.read_u32(OFF_VERSION)?;
        if version != STATE_VERSION {
            return Err(Error::Corruption(format!(
                "table state header version {version} not supported"
            )));
        }
        let next_table_id = header.read_u64(OFF_NEXT_ID)?;
        let visible_area = AreaId(header.read_u64(OFF_VISIBLE)?);
        let delete_area = AreaId(header.read_u64(OFF_DELETE)?);

        let visible = decode_list(&store.get_area(visible_area, false)?.read_all())?;
        let delete = decode_list(&store.get_area(delete_area, false)?.read_all())?;

        Ok(TableStateStore {
            store,
            header,
            inner: Mutex::new(StateInner {
                next_table_id,
                visible_area,
                delete_area,
                visible,
                delete,
                visible_dirty: false,
                delete_dirty: false,
            }),
        })
    }

    /// Hand out a fresh table id. The counter is bumped and persisted
    /// under the store lock before the id is returned, so ids are never
    /// reused even across a crash.
    pub fn next_table_id(&self) -> Result<u64> {
        let _latch = StoreLatchGuard::acquire(&*self.store);
        let mut inner = self.inner.lock();
        let id = inner.next_table_id;
        inner.next_table_id += 1;
        self.header.write_u64(OFF_NEXT_ID, inner.next_table_id)?;
        self.store.flush()?;
        Ok(id)
    }

    /// Current counter value (the next id that would be handed out).
    pub fn peek_next_table_id(&self) -> u64 {
        self.inner.lock().next_table_id
    }

    /// Append to the visible list. In-memory until [`flush`](Self::flush).
    pub fn add_visible(&self, state: TableSourceState) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.visible.iter().any(|s| s.table_id == state.table_id) {
            return Err(Error::InvalidState(format!(
                "table {} is already visible",
                state.table_id
            )));
        }
        inner.visible.push(state);
        inner.visible_dirty = true;
        Ok(())
    }

    /// Append to the pending-delete list. In-memory until `flush`.
    pub fn add_delete(&self, state: TableSourceState) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.delete.iter().any(|s| s.table_id == state.table_id) {
            return Err(Error::InvalidState(format!(
                "table {} is already pending delete",
                state.table_id
            )));
        }
        inner.delete.push(state);
        inner.delete_dirty = true;
        Ok(())
    }

    /// Remove the named entry from the visible list.
    pub fn remove_visible(&self, name: &str) -> Result<TableSourceState> {
        let mut inner = self.inner.lock();
        let pos = inner
            .visible
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| Error::NotFound(format!("visible table source '{name}'")))?;
        inner.visible_dirty = true;
        Ok(inner.visible.remove(pos))
    }

    /// Remove the named entry from the pending-delete list.
    pub fn remove_delete(&self, name: &str) -> Result<TableSourceState> {
        let mut inner = self.inner.lock();
        let pos = inner
            .delete
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| Error::NotFound(format!("pending-delete table source '{name}'")))?;
        inner.delete_dirty = true;
        Ok(inner.delete.remove(pos))
    }

    /// Snapshot of the visible list.
    pub fn visible_tables(&self) -> Vec<TableSourceState> {
        self.inner.lock().visible.clone()
    }

    /// Snapshot of the pending-delete list.
    pub fn delete_tables(&self) -> Vec<TableSourceState> {
        self.inner.lock().delete.clone()
    }

    /// Persist dirty lists: serialize each into a new area, swap the
    /// header pointers under the store lock, delete the old areas.
    ///
    /// The store latch is taken before the list mutex; `next_table_id`
    /// nests the two in the same order.
    pub fn flush(&self) -> Result<()> {
        let _latch = StoreLatchGuard::acquire(&*self.store);
        let mut inner = self.inner.lock();
        if !inner.visible_dirty && !inner.delete_dirty {
            return Ok(());
        }

        if inner.visible_dirty {
            let bytes = encode_list(&inner.visible);
            let area = self.store.create_area(bytes.len())?;
            area.write(0, &bytes)?;
            self.header.write_u64(OFF_VISIBLE, area.id().0)?;
            let old = inner.visible_area;
            inner.visible_area = area.id();
            self.store.delete_area(old)?;
            inner.visible_dirty = false;
        }
        if inner.delete_dirty {
            let bytes = encode_list(&inner.delete);
            let area = self.store.create_area(bytes.len())?;
            area.write(0, &bytes)?;
            self.header.write_u64(OFF_DELETE, area.id().0)?;
            let old = inner.delete_area;
            inner.delete_area = area.id();
            self.store.delete_area(old)?;
            inner.delete_dirty = false;
        }
        self.store.flush()?;
        debug!(
            visible = inner.visible.len(),
            pending_delete = inner.delete.len(),
            "table state flushed"
        );
        Ok(())
    }
}

fn encode_list(entries: &[TableSourceState]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(12 + entries.len() * 24);
    let mut scratch = [0u8; 8];
    LittleEndian::write_u32(&mut scratch[..4], STATE_VERSION);
    buf.extend_from_slice(&scratch[..4]);
    LittleEndian::write_u64(&mut scratch, entries.len() as u64);
    buf.extend_from_slice(&scratch);
    for entry in entries {
        LittleEndian::write_u64(&mut scratch, entry.table_id);
        buf.extend_from_slice(&scratch);
        let units: Vec<u16> = entry.name.encode_utf16().collect();
        LittleEndian::write_u32(&mut scratch[..4], units.len() as u32);
        buf.extend_from_slice(&scratch[..4]);
        for unit in units {
            LittleEndian::write_u16(&mut scratch[..2], unit);
            buf.extend_from_slice(&scratch[..2]);
        }
    }
    buf
}

fn decode_list(bytes: &[u8]) -> Result<Vec<TableSourceState>> {
    let corrupt = |what: &str| Error::Corruption(format!("table state list: {what}"));
    if bytes.len() < 12 {
        return Err(corrupt("shorter than its fixed header"));
    }
    let version = LittleEndian::read_u32(&bytes[0..4]);
    if version != STATE_VERSION {
        return Err(corrupt(&format!("version {version} not supported")));
    }
    let count = LittleEndian::read_u64(&bytes[4..12]) as usize;
    let mut at = 12;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        if bytes.len() < at + 12 {
            return Err(corrupt("entry truncated"));
        }
        let table_id = LittleEndian::read_u64(&bytes[at..at + 8]);
        let unit_count = LittleEndian::read_u32(&bytes[at + 8..at + 12]) as usize;
        at += 12;
        if bytes.len() < at + unit_count * 2 {
            return Err(corrupt("name truncated"));
        }
        let units: Vec<u16> = (0..unit_count)
            .map(|i| LittleEndian::read_u16(&bytes[at + i * 2..at + i * 2 + 2]))
            .collect();
        at += unit_count * 2;
        let name = String::from_utf16(&units).map_err(|_| corrupt("name is not valid UTF-16"))?;
        entries.push(TableSourceState { table_id, name });
    }
    Ok(entries)
}
