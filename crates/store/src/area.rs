//! Byte-addressable areas
//!
//! An [`Area`] is a fixed-size allocation with a stable [`AreaId`]. The
//! handle shares its buffer with the owning store, so bytes written
//! through any handle are visible to every other handle of the same area
//! and get persisted by the store's next `flush`.

use byteorder::{ByteOrder, LittleEndian};
use lattice_core::{Error, Result};
use parking_lot::RwLock;
use std::sync::Arc;

/// Stable area identifier assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AreaId(pub u64);

impl std::fmt::Display for AreaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "area-{}", self.0)
    }
}

/// Shared area buffer plus its dirty flag.
#[derive(Debug)]
pub(crate) struct AreaBuf {
    pub(crate) bytes: Vec<u8>,
    pub(crate) dirty: bool,
}

impl AreaBuf {
    pub(crate) fn new(size: usize) -> Self {
        AreaBuf {
            bytes: vec![0; size],
            dirty: true,
        }
    }

    pub(crate) fn from_bytes(bytes: Vec<u8>) -> Self {
        AreaBuf {
            bytes,
            dirty: false,
        }
    }
}

/// Handle to one area of a store.
///
/// Reads are always allowed; writes require the handle to have been
/// opened writable. Out-of-bounds access is an error, never a grow.
#[derive(Debug, Clone)]
pub struct Area {
    id: AreaId,
    writable: bool,
    buf: Arc<RwLock<AreaBuf>>,
}

impl Area {
    pub(crate) fn new(id: AreaId, writable: bool, buf: Arc<RwLock<AreaBuf>>) -> Self {
        Area { id, writable, buf }
    }

    /// The area's stable id.
    pub fn id(&self) -> AreaId {
        self.id
    }

    /// Area size in bytes.
    pub fn len(&self) -> usize {
        self.buf.read().bytes.len()
    }

    /// Whether the area is zero-sized.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this handle may write.
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    fn check_bounds(&self, offset: usize, len: usize, total: usize) -> Result<()> {
        if offset.checked_add(len).map_or(true, |end| end > total) {
            return Err(Error::InvalidState(format!(
                "access [{offset}, {}) outside {} of {total} bytes",
                offset + len,
                self.id
            )));
        }
        Ok(())
    }

    /// Read `buf.len()` bytes starting at `offset`.
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        let guard = self.buf.read();
        self.check_bounds(offset, buf.len(), guard.bytes.len())?;
        buf.copy_from_slice(&guard.bytes[offset..offset + buf.len()]);
        Ok(())
    }

    /// Copy of the whole area.
    pub fn read_all(&self) -> Vec<u8> {
        self.buf.read().bytes.clone()
    }

    /// Write `data` starting at `offset` and mark the area dirty.
    pub fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(Error::ReadOnly);
        }
        let mut guard = self.buf.write();
        let total = guard.bytes.len();
        self.check_bounds(offset, data.len(), total)?;
        guard.bytes[offset..offset + data.len()].copy_from_slice(data);
        guard.dirty = true;
        Ok(())
    }

    /// Read a little-endian `u32` at `offset`.
    pub fn read_u32(&self, offset: usize) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read(offset, &mut b)?;
        Ok(LittleEndian::read_u32(&b))
    }

    /// Read a little-endian `u64` at `offset`.
    pub fn read_u64(&self, offset: usize) -> Result<u64> {
        let mut b = [0u8; 8];
        self.read(offset, &mut b)?;
        Ok(LittleEndian::read_u64(&b))
    }

    /// Write a little-endian `u32` at `offset`.
    pub fn write_u32(&self, offset: usize, v: u32) -> Result<()> {
        let mut b = [0u8; 4];
        LittleEndian::write_u32(&mut b, v);
        self.write(offset, &b)
    }

    /// Write a little-endian `u64` at `offset`.
    pub fn write_u64(&self, offset: usize, v: u64) -> Result<()> {
        let mut b = [0u8; 8];
        LittleEndian::write_u64(&mut b, v);
        self.write(offset, &b)
    }

    /// Change the area's size in place, zero-filling on growth. The id
    /// stays stable; the store persists the new size at the next flush.
    pub fn resize(&self, new_len: usize) -> Result<()> {
        if !self.writable {
            return Err(Error::ReadOnly);
        }
        let mut guard = self.buf.write();
        guard.bytes.resize(new_len, 0);
        guard.dirty = true;
        Ok(())
    }

    /// Replace the whole area contents, resizing to fit.
    pub fn replace(&self, data: &[u8]) -> Result<()> {
        self.resize(data.len())?;
        self.write(0, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn area(size: usize, writable: bool) -> Area {
        Area::new(
            AreaId(1),
            writable,
            Arc::new(RwLock::new(AreaBuf::new(size))),
        )
    }

    #[test]
    fn read_write_roundtrip() {
        let a = area(16, true);
        a.write(4, b"abcd").unwrap();
        let mut buf = [0u8; 4];
        a.read(4, &mut buf).unwrap();
        assert_eq!(&buf, b"abcd");
    }

    #[test]
    fn integer_helpers_are_little_endian() {
        let a = area(16, true);
        a.write_u32(0, 0x0BAC_8001).unwrap();
        let mut raw = [0u8; 4];
        a.read(0, &mut raw).unwrap();
        assert_eq!(raw, [0x01, 0x80, 0xAC, 0x0B]);
        a.write_u64(8, u64::MAX - 1).unwrap();
        assert_eq!(a.read_u64(8).unwrap(), u64::MAX - 1);
    }

    #[test]
    fn out_of_bounds_is_an_error() {
        let a = area(8, true);
        assert!(a.write(6, b"abcd").is_err());
        let mut buf = [0u8; 4];
        assert!(a.read(6, &mut buf).is_err());
    }

    #[test]
    fn read_only_handle_rejects_writes() {
        let a = area(8, false);
        assert!(matches!(a.write(0, b"x"), Err(Error::ReadOnly)));
    }

    #[test]
    fn handles_share_the_buffer() {
        let buf = Arc::new(RwLock::new(AreaBuf::new(8)));
        let w = Area::new(AreaId(7), true, buf.clone());
        let r = Area::new(AreaId(7), false, buf);
        w.write(0, b"hi").unwrap();
        let mut out = [0u8; 2];
        r.read(0, &mut out).unwrap();
        assert_eq!(&out, b"hi");
    }
}
