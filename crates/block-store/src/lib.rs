//! Byte-addressable persistent extents: the `Store` contract every
//! structure above this crate (`FixedRecordList`, `SectorStore`, ...) is
//! built on.
//!
//! `Store` is deliberately narrow: create/delete an extent, get a cursor
//! onto one, and a process-local exclusive section for multi-word header
//! updates. Two backends are provided: [`fs::Fs`] for real persistence and
//! [`memory::Memory`] for tests and the datastore's synthetic "check
//! view", which never persists.

pub mod fs;
pub mod memory;

use std::io;

use parking_lot::{Mutex, MutexGuard};

/// The id of an extent allocated by a [`Store`]. `FIXED_AREA` is the single
/// reserved 64-byte header extent every store exposes without an explicit
/// `create_area` call.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct AreaId(pub i64);

impl AreaId {
    /// The reserved id of the store's fixed 64-byte header extent.
    pub const FIXED_AREA: AreaId = AreaId(-1);
}

impl std::fmt::Display for AreaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Size, in bytes, of the store's single fixed header extent.
pub const FIXED_AREA_SIZE: u64 = 64;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("area {0} does not exist")]
    NoSuchArea(AreaId),
    #[error("I/O error on area {area}: {source}")]
    Io { area: AreaId, source: io::Error },
}

/// A cursor over one area's bytes, positioned independently of any other
/// cursor on the same area (mirrors the source's `mutableArea` returning a
/// fresh, independently-positioned view each call).
///
/// Writes through this cursor are visible to the backing store immediately;
/// `check_out` is the durability boundary a caller must cross before
/// relying on the write surviving a crash (for the `Fs` backend this is an
/// `fsync`; for `Memory` it is a no-op, since there is nothing to survive a
/// crash with).
pub struct MutableArea {
    handle: std::sync::Arc<dyn AreaHandle>,
    pos: u64,
}

/// Backend-specific storage for one area. Implementors provide positioned
/// reads/writes; `MutableArea` layers cursor state (and the fixed-width
/// integer helpers) on top.
pub trait AreaHandle: Send + Sync {
    fn id(&self) -> AreaId;
    fn len(&self) -> u64;
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), StoreError>;
    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<(), StoreError>;
    fn truncate(&self, new_len: u64) -> Result<(), StoreError>;
    fn flush(&self) -> Result<(), StoreError>;
}

impl MutableArea {
    fn new(handle: std::sync::Arc<dyn AreaHandle>) -> Self {
        Self { handle, pos: 0 }
    }

    pub fn id(&self) -> AreaId {
        self.handle.id()
    }

    pub fn len(&self) -> u64 {
        self.handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn set_position(&mut self, pos: u64) {
        self.pos = pos;
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<(), StoreError> {
        self.handle.read_at(self.pos, buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<(), StoreError> {
        self.handle.write_at(self.pos, buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    pub fn get_u8(&mut self) -> Result<u8, StoreError> {
        let mut b = [0u8; 1];
        self.read(&mut b)?;
        Ok(b[0])
    }

    pub fn put_u8(&mut self, v: u8) -> Result<(), StoreError> {
        self.write(&[v])
    }

    pub fn get_i32(&mut self) -> Result<i32, StoreError> {
        let mut b = [0u8; 4];
        self.read(&mut b)?;
        Ok(i32::from_be_bytes(b))
    }

    pub fn put_i32(&mut self, v: i32) -> Result<(), StoreError> {
        self.write(&v.to_be_bytes())
    }

    pub fn get_i64(&mut self) -> Result<i64, StoreError> {
        let mut b = [0u8; 8];
        self.read(&mut b)?;
        Ok(i64::from_be_bytes(b))
    }

    pub fn put_i64(&mut self, v: i64) -> Result<(), StoreError> {
        self.write(&v.to_be_bytes())
    }

    /// Flushes any staged writes to the backing store.
    pub fn check_out(&mut self) -> Result<(), StoreError> {
        self.handle.flush()
    }

    /// Shrinks (or, as a no-op-extension, grows) the area to exactly
    /// `new_len` bytes. Used by `clear_deleted_sectors`-style compaction.
    pub fn truncate(&mut self, new_len: u64) -> Result<(), StoreError> {
        self.handle.truncate(new_len)
    }
}

/// A coarse writer-exclusion section, released on drop via scoped
/// acquisition with guaranteed release on every exit path. Held across a
/// multi-word header update so a concurrent writer never observes it
/// half-written.
pub struct WriteGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

/// A persistent allocator of byte-addressable extents.
pub trait Store: Send + Sync {
    fn create_area(&self, size: u64) -> Result<AreaId, StoreError>;
    fn delete_area(&self, id: AreaId) -> Result<(), StoreError>;
    fn mutable_area(&self, id: AreaId) -> Result<MutableArea, StoreError>;

    /// The single 64-byte fixed header extent (`AreaId::FIXED_AREA`).
    fn fixed_area(&self) -> Result<MutableArea, StoreError> {
        self.mutable_area(AreaId::FIXED_AREA)
    }

    /// Begins a coarse writer-exclusion section; the returned guard must be
    /// held for the duration of a multi-word header update and dropped
    /// (releasing it) once that update is complete and `set_check_point`
    /// has been called if durability is required.
    fn lock_for_write(&self) -> WriteGuard<'_>;

    /// Marks a recovery-safe point: writes made under a `lock_for_write`
    /// section before this call are durable as a unit; a crash before this
    /// call may lose them but must never leave the store structurally
    /// inconsistent.
    fn set_check_point(&self) -> Result<(), StoreError>;
}

pub(crate) fn lock_guard(mutex: &Mutex<()>) -> WriteGuard<'_> {
    WriteGuard { _guard: mutex.lock() }
}

#[cfg(test)]
mod tests;
