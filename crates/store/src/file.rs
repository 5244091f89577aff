//! Single-file crash-safe area store
//!
//! # File Layout
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │ Superblock slot 0 (48 bytes)         │  offset 0
//! ├──────────────────────────────────────┤
//! │ Superblock slot 1 (48 bytes)         │  offset 48
//! ├──────────────────────────────────────┤
//! │ Area payload / directory records     │  offset 96, append-only
//! │ ...                                  │
//! └──────────────────────────────────────┘
//! ```
//!
//! # Superblock (48 bytes, little-endian)
//!
//! ```text
//! ┌───────────┬─────────┬─────────┬────────────┬─────────┬─────────┬──────────────┬─────────┐
//! │ Magic (4) │ Ver (4) │ Epoch(8)│ DirOff (8) │ DirLen(8)│ DirCRC(4)│ NextAreaId(8)│ CRC (4) │
//! └───────────┴─────────┴─────────┴────────────┴─────────┴─────────┴──────────────┴─────────┘
//! ```
//!
//! # Directory payload
//!
//! ```text
//! Count (8) · Count × ( AreaId (8) · Offset (8) · Len (8) · CRC32 (4) )
//! ```
//!
//! `flush` appends the current contents of every dirty area, appends a
//! fresh directory naming all live areas, syncs, then publishes by
//! writing the superblock slot with the next epoch and syncing again.
//! Open picks the valid superblock with the highest epoch, so a crash at
//! any point leaves the previous flush intact. Space abandoned by
//! rewritten and deleted areas is reclaimed by compaction on open once
//! the waste crosses a threshold.

use crate::area::{Area, AreaBuf, AreaId};
use crate::store::{AreaStore, Latch};
use byteorder::{ByteOrder, LittleEndian};
use fs2::FileExt;
use lattice_core::{Error, Result};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Magic bytes identifying a Lattice store file.
const MAGIC: [u8; 4] = *b"LTCS";
/// Current store format version.
const FORMAT_VERSION: u32 = 1;
/// Size of one superblock slot.
const SUPERBLOCK_SIZE: u64 = 48;
/// First byte of the append region.
const DATA_START: u64 = 2 * SUPERBLOCK_SIZE;
/// Waste threshold (bytes) before open rewrites the file.
const COMPACT_WASTE_BYTES: u64 = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Superblock {
    epoch: u64,
    dir_offset: u64,
    dir_len: u64,
    dir_crc: u32,
    next_area_id: u64,
}

impl Superblock {
    fn to_bytes(self) -> [u8; SUPERBLOCK_SIZE as usize] {
        let mut b = [0u8; SUPERBLOCK_SIZE as usize];
        b[0..4].copy_from_slice(&MAGIC);
        LittleEndian::write_u32(&mut b[4..8], FORMAT_VERSION);
        LittleEndian::write_u64(&mut b[8..16], self.epoch);
        LittleEndian::write_u64(&mut b[16..24], self.dir_offset);
        LittleEndian::write_u64(&mut b[24..32], self.dir_len);
        LittleEndian::write_u32(&mut b[32..36], self.dir_crc);
        LittleEndian::write_u64(&mut b[36..44], self.next_area_id);
        let crc = crc32fast::hash(&b[0..44]);
        LittleEndian::write_u32(&mut b[44..48], crc);
        b
    }

    fn from_bytes(b: &[u8]) -> Option<Self> {
        if b.len() < SUPERBLOCK_SIZE as usize || b[0..4] != MAGIC {
            return None;
        }
        if LittleEndian::read_u32(&b[4..8]) != FORMAT_VERSION {
            return None;
        }
        if crc32fast::hash(&b[0..44]) != LittleEndian::read_u32(&b[44..48]) {
            return None;
        }
        Some(Superblock {
            epoch: LittleEndian::read_u64(&b[8..16]),
            dir_offset: LittleEndian::read_u64(&b[16..24]),
            dir_len: LittleEndian::read_u64(&b[24..32]),
            dir_crc: LittleEndian::read_u32(&b[32..36]),
            next_area_id: LittleEndian::read_u64(&b[36..44]),
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct DiskLoc {
    offset: u64,
    len: u64,
    crc: u32,
}

#[derive(Debug)]
struct AreaEntry {
    buf: Arc<RwLock<AreaBuf>>,
    disk: Option<DiskLoc>,
}

#[derive(Debug)]
struct FileInner {
    areas: FxHashMap<u64, AreaEntry>,
    next_id: u64,
    epoch: u64,
    tail: u64,
}

/// Single-file crash-safe store.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    file: Mutex<File>,
    inner: RwLock<FileInner>,
    latch: Latch,
}

impl FileStore {
    /// Create a fresh store file. Fails if the path exists.
    pub fn create(path: impl AsRef<Path>) -> Result<FileStore> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)?;
        file.try_lock_exclusive()?;

        let sb = Superblock {
            epoch: 1,
            dir_offset: 0,
            dir_len: 0,
            dir_crc: 0,
            next_area_id: 1,
        };
        // Epoch parity picks the slot, so each flush overwrites the stale
        // slot and never the latest valid one.
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&[0u8; SUPERBLOCK_SIZE as usize])?;
        file.write_all(&sb.to_bytes())?;
        file.sync_data()?;

        info!(path = %path.display(), "created store file");
        Ok(FileStore {
            path,
            file: Mutex::new(file),
            inner: RwLock::new(FileInner {
                areas: FxHashMap::default(),
                next_id: 1,
                epoch: 1,
                tail: DATA_START,
            }),
            latch: Latch::default(),
        })
    }

    /// Open an existing store file, recovering the latest flushed state
    /// and compacting when abandoned space crosses the threshold.
    pub fn open(path: impl AsRef<Path>) -> Result<FileStore> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        file.try_lock_exclusive()?;

        let sb = Self::read_superblock(&mut file)?;
        let areas = Self::read_directory(&mut file, &sb)?;
        let file_len = file.seek(SeekFrom::End(0))?;
        let live: u64 = areas.values().map(|e| e.disk.map_or(0, |d| d.len)).sum();
        let waste = (file_len.saturating_sub(DATA_START)).saturating_sub(live + sb.dir_len);

        let store = FileStore {
            path,
            file: Mutex::new(file),
            inner: RwLock::new(FileInner {
                areas,
                next_id: sb.next_area_id,
                epoch: sb.epoch,
                tail: file_len.max(DATA_START),
            }),
            latch: Latch::default(),
        };

        if waste > COMPACT_WASTE_BYTES {
            info!(waste, "compacting store file");
            store.compact()?;
        }
        Ok(store)
    }

    fn read_superblock(file: &mut File) -> Result<Superblock> {
        let mut slots = [0u8; DATA_START as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut slots)
            .map_err(|_| Error::Corruption("store file shorter than its superblocks".into()))?;
        let a = Superblock::from_bytes(&slots[..SUPERBLOCK_SIZE as usize]);
        let b = Superblock::from_bytes(&slots[SUPERBLOCK_SIZE as usize..]);
        match (a, b) {
            (Some(a), Some(b)) => Ok(if a.epoch >= b.epoch { a } else { b }),
            (Some(a), None) => Ok(a),
            (None, Some(b)) => Ok(b),
            (None, None) => Err(Error::Corruption(
                "no valid superblock (bad magic, version, or checksum)".into(),
            )),
        }
    }

    fn read_directory(file: &mut File, sb: &Superblock) -> Result<FxHashMap<u64, AreaEntry>> {
        let mut areas = FxHashMap::default();
        if sb.dir_len == 0 {
            return Ok(areas);
        }
        let mut dir = vec![0u8; sb.dir_len as usize];
        file.seek(SeekFrom::Start(sb.dir_offset))?;
        file.read_exact(&mut dir)
            .map_err(|_| Error::Corruption("store directory truncated".into()))?;
        if crc32fast::hash(&dir) != sb.dir_crc {
            return Err(Error::Corruption("store directory checksum mismatch".into()));
        }

        let count = LittleEndian::read_u64(&dir[0..8]) as usize;
        let expected = 8 + count * 28;
        if dir.len() != expected {
            return Err(Error::Corruption(format!(
                "store directory length {} does not match count {count}",
                dir.len()
            )));
        }
        for i in 0..count {
            let at = 8 + i * 28;
            let id = LittleEndian::read_u64(&dir[at..at + 8]);
            let loc = DiskLoc {
                offset: LittleEndian::read_u64(&dir[at + 8..at + 16]),
                len: LittleEndian::read_u64(&dir[at + 16..at + 24]),
                crc: LittleEndian::read_u32(&dir[at + 24..at + 28]),
            };
            let mut payload = vec![0u8; loc.len as usize];
            file.seek(SeekFrom::Start(loc.offset))?;
            file.read_exact(&mut payload)
                .map_err(|_| Error::Corruption(format!("area-{id} payload truncated")))?;
            if crc32fast::hash(&payload) != loc.crc {
                return Err(Error::Corruption(format!("area-{id} checksum mismatch")));
            }
            areas.insert(
                id,
                AreaEntry {
                    buf: Arc::new(RwLock::new(AreaBuf::from_bytes(payload))),
                    disk: Some(loc),
                },
            );
        }
        Ok(areas)
    }

    /// Rewrite the file with only live data, then reopen the handle.
    fn compact(&self) -> Result<()> {
        self.latch.lock();
        let result = self.compact_locked();
        self.latch.unlock();
        result
    }

    fn compact_locked(&self) -> Result<()> {
        let tmp_path = self.path.with_extension("compact");
        {
            let inner = self.inner.read();
            let mut tmp = OpenOptions::new()
                .create(true)
                .truncate(true)
                .read(true)
                .write(true)
                .open(&tmp_path)?;
            tmp.seek(SeekFrom::Start(DATA_START))?;

            let mut dir_entries = Vec::with_capacity(inner.areas.len());
            let mut offset = DATA_START;
            for (&id, entry) in &inner.areas {
                let bytes = entry.buf.read().bytes.clone();
                let crc = crc32fast::hash(&bytes);
                tmp.write_all(&bytes)?;
                dir_entries.push((id, offset, bytes.len() as u64, crc));
                offset += bytes.len() as u64;
            }
            let dir = encode_directory(&dir_entries);
            let dir_crc = crc32fast::hash(&dir);
            tmp.write_all(&dir)?;

            let sb = Superblock {
                epoch: inner.epoch + 1,
                dir_offset: offset,
                dir_len: dir.len() as u64,
                dir_crc,
                next_area_id: inner.next_id,
            };
            tmp.seek(SeekFrom::Start(0))?;
            tmp.write_all(&[0u8; DATA_START as usize])?;
            tmp.seek(SeekFrom::Start((sb.epoch % 2) * SUPERBLOCK_SIZE))?;
            tmp.write_all(&sb.to_bytes())?;
            tmp.sync_data()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;

        let mut reopened = OpenOptions::new().read(true).write(true).open(&self.path)?;
        reopened.try_lock_exclusive()?;
        let sb = Self::read_superblock(&mut reopened)?;
        let areas = Self::read_directory(&mut reopened, &sb)?;
        let file_len = reopened.seek(SeekFrom::End(0))?;

        *self.file.lock() = reopened;
        let mut inner = self.inner.write();
        // Keep existing buffers alive for open handles by swapping disk
        // locations in place where ids match.
        for (id, entry) in areas {
            if let Some(existing) = inner.areas.get_mut(&id) {
                existing.disk = entry.disk;
            } else {
                inner.areas.insert(id, entry);
            }
        }
        inner.epoch = sb.epoch;
        inner.tail = file_len.max(DATA_START);
        Ok(())
    }

    fn flush_locked(&self) -> Result<()> {
        // Snapshot the dirty set: copy bytes and clear dirty under the
        // area's write lock so later writes re-mark it for the next flush.
        let mut to_write: Vec<(u64, Vec<u8>)> = Vec::new();
        let (mut tail, epoch, next_id) = {
            let inner = self.inner.read();
            for (&id, entry) in &inner.areas {
                let mut buf = entry.buf.write();
                if buf.dirty || entry.disk.is_none() {
                    to_write.push((id, buf.bytes.clone()));
                    buf.dirty = false;
                }
            }
            (inner.tail, inner.epoch, inner.next_id)
        };

        let undo_dirty = |ids: &[(u64, Vec<u8>)]| {
            let inner = self.inner.read();
            for (id, _) in ids {
                if let Some(entry) = inner.areas.get(id) {
                    entry.buf.write().dirty = true;
                }
            }
        };

        let result: Result<(u64, FxHashMap<u64, DiskLoc>, Superblock)> = (|| {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(tail))?;
            let mut new_locs = FxHashMap::default();
            for (id, bytes) in &to_write {
                let crc = crc32fast::hash(bytes);
                file.write_all(bytes)?;
                new_locs.insert(
                    *id,
                    DiskLoc {
                        offset: tail,
                        len: bytes.len() as u64,
                        crc,
                    },
                );
                tail += bytes.len() as u64;
            }

            // Directory covers every live area: freshly written ones at
            // their new location, clean ones where they already are. An
            // area created after the dirty-set snapshot has no location
            // yet and waits for the next flush.
            let dir_entries: Vec<(u64, u64, u64, u32)> = {
                let inner = self.inner.read();
                inner
                    .areas
                    .iter()
                    .filter_map(|(&id, entry)| {
                        let loc = new_locs.get(&id).copied().or(entry.disk)?;
                        Some((id, loc.offset, loc.len, loc.crc))
                    })
                    .collect()
            };
            let dir = encode_directory(&dir_entries);
            let dir_crc = crc32fast::hash(&dir);
            let dir_offset = tail;
            file.write_all(&dir)?;
            tail += dir.len() as u64;
            file.sync_data()?;

            let sb = Superblock {
                epoch: epoch + 1,
                dir_offset,
                dir_len: dir.len() as u64,
                dir_crc,
                next_area_id: next_id,
            };
            let slot = (sb.epoch % 2) * SUPERBLOCK_SIZE;
            file.seek(SeekFrom::Start(slot))?;
            file.write_all(&sb.to_bytes())?;
            file.sync_data()?;
            Ok((tail, new_locs, sb))
        })();

        match result {
            Ok((tail, new_locs, sb)) => {
                let mut inner = self.inner.write();
                inner.epoch = sb.epoch;
                inner.tail = tail;
                for (id, loc) in new_locs {
                    if let Some(entry) = inner.areas.get_mut(&id) {
                        entry.disk = Some(loc);
                    }
                }
                debug!(epoch = sb.epoch, areas = to_write.len(), "store flushed");
                Ok(())
            }
            Err(e) => {
                undo_dirty(&to_write);
                Err(e)
            }
        }
    }
}

fn encode_directory(entries: &[(u64, u64, u64, u32)]) -> Vec<u8> {
    let mut dir = vec![0u8; 8 + entries.len() * 28];
    LittleEndian::write_u64(&mut dir[0..8], entries.len() as u64);
    for (i, (id, offset, len, crc)) in entries.iter().enumerate() {
        let at = 8 + i * 28;
        LittleEndian::write_u64(&mut dir[at..at + 8], *id);
        LittleEndian::write_u64(&mut dir[at + 8..at + 16], *offset);
        LittleEndian::write_u64(&mut dir[at + 16..at + 24], *len);
        LittleEndian::write_u32(&mut dir[at + 24..at + 28], *crc);
    }
    dir
}

impl AreaStore for FileStore {
    fn create_area(&self, size: usize) -> Result<Area> {
        let mut inner = self.inner.write();
        let id = inner.next_id;
        inner.next_id += 1;
        let buf = Arc::new(RwLock::new(AreaBuf::new(size)));
        inner.areas.insert(
            id,
            AreaEntry {
                buf: buf.clone(),
                disk: None,
            },
        );
        Ok(Area::new(AreaId(id), true, buf))
    }

    fn get_area(&self, id: AreaId, writable: bool) -> Result<Area> {
        let inner = self.inner.read();
        let entry = inner
            .areas
            .get(&id.0)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        Ok(Area::new(id, writable, entry.buf.clone()))
    }

    fn delete_area(&self, id: AreaId) -> Result<()> {
        let mut inner = self.inner.write();
        inner
            .areas
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
        self.latch.lock();
        let result = self.flush_locked();
        self.latch.unlock();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn flush_then_open_recovers_areas() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.lattice");

        let a_id;
        {
            let store = FileStore::create(&path).unwrap();
            let a = store.create_area(16).unwrap();
            a.write(0, b"persistent bytes").unwrap();
            a_id = a.id();
            store.flush().unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        let a = store.get_area(a_id, false).unwrap();
        let mut buf = [0u8; 16];
        a.read(0, &mut buf).unwrap();
        assert_eq!(&buf, b"persistent bytes");
    }

    #[test]
    fn unflushed_writes_do_not_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.lattice");

        let a_id;
        {
            let store = FileStore::create(&path).unwrap();
            let a = store.create_area(8).unwrap();
            a.write(0, b"flushed!").unwrap();
            a_id = a.id();
            store.flush().unwrap();
            // Second write never flushed: the crash discards it.
            a.write(0, b"lost....").unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        let a = store.get_area(a_id, false).unwrap();
        let mut buf = [0u8; 8];
        a.read(0, &mut buf).unwrap();
        assert_eq!(&buf, b"flushed!");
    }

    #[test]
    fn deleted_area_gone_after_flush_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.lattice");

        let (keep, gone);
        {
            let store = FileStore::create(&path).unwrap();
            let a = store.create_area(4).unwrap();
            let b = store.create_area(4).unwrap();
            keep = a.id();
            gone = b.id();
            store.flush().unwrap();
            store.delete_area(gone).unwrap();
            store.flush().unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        assert!(store.get_area(keep, false).is_ok());
        assert!(store.get_area(gone, false).is_err());
    }

    #[test]
    fn torn_flush_keeps_previous_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.lattice");

        let a_id;
        {
            let store = FileStore::create(&path).unwrap();
            let a = store.create_area(4).unwrap();
            a.write(0, b"old!").unwrap();
            a_id = a.id();
            store.flush().unwrap();
        }

        // Simulate a torn flush: garbage appended after the live
        // directory, superblock never rewritten.
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0xAB; 512]).unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        let a = store.get_area(a_id, false).unwrap();
        let mut buf = [0u8; 4];
        a.read(0, &mut buf).unwrap();
        assert_eq!(&buf, b"old!");
    }

    #[test]
    fn corrupted_superblocks_are_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.lattice");
        {
            let store = FileStore::create(&path).unwrap();
            store.flush().unwrap();
        }
        {
            let mut f = OpenOptions::new().write(true).open(&path).unwrap();
            // Wreck both slots.
            f.write_all(&[0xFF; DATA_START as usize]).unwrap();
        }
        match FileStore::open(&path) {
            Err(Error::Corruption(_)) => {}
            other => panic!("expected corruption, got {other:?}"),
        }
    }

    #[test]
    fn ids_survive_reopen_and_never_recycle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.lattice");

        let first;
        {
            let store = FileStore::create(&path).unwrap();
            first = store.create_area(1).unwrap().id();
            store.delete_area(first).unwrap();
            store.flush().unwrap();
        }
        let store = FileStore::open(&path).unwrap();
        let next = store.create_area(1).unwrap().id();
        assert!(next > first);
    }

    #[test]
    fn multiple_flushes_alternate_superblocks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.lattice");

        let store = FileStore::create(&path).unwrap();
        let a = store.create_area(8).unwrap();
        for i in 0..5u8 {
            a.write(0, &[i; 8]).unwrap();
            store.flush().unwrap();
        }
        drop(store);

        let store = FileStore::open(&path).unwrap();
        let a = store.get_area(a.id(), false).unwrap();
        let mut buf = [0u8; 8];
        a.read(0, &mut buf).unwrap();
        assert_eq!(buf, [4u8; 8]);
    }
}
