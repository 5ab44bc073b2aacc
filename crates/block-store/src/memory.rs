//! An in-memory `Store`, for tests and the datastore's synthetic "check
//! view" which never needs to persist.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::{lock_guard, AreaHandle, AreaId, MutableArea, Store, StoreError, WriteGuard, FIXED_AREA_SIZE};

struct MemoryAreaHandle {
    id: AreaId,
    bytes: Mutex<Vec<u8>>,
}

impl AreaHandle for MemoryAreaHandle {
    fn id(&self) -> AreaId {
        self.id
    }

    fn len(&self) -> u64 {
        self.bytes.lock().len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), StoreError> {
        let bytes = self.bytes.lock();
        let start = offset as usize;
        let end = start + buf.len();
        if end > bytes.len() {
            return Err(StoreError::Io {
                area: self.id,
                source: std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "read past end of area"),
            });
        }
        buf.copy_from_slice(&bytes[start..end]);
        Ok(())
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<(), StoreError> {
        let mut bytes = self.bytes.lock();
        let start = offset as usize;
        let end = start + buf.len();
        if end > bytes.len() {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn truncate(&self, new_len: u64) -> Result<(), StoreError> {
        self.bytes.lock().resize(new_len as usize, 0);
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// An in-memory [`Store`]: every area is a `Vec<u8>` behind a mutex, keyed
/// in a `BTreeMap`. Never persists; dropping the `Memory` drops all areas.
pub struct Memory {
    areas: RwLock<BTreeMap<AreaId, Arc<MemoryAreaHandle>>>,
    next_id: AtomicI64,
    write_lock: Mutex<()>,
}

impl Memory {
    pub fn new() -> Self {
        let areas = RwLock::new(BTreeMap::new());
        areas.write().insert(
            AreaId::FIXED_AREA,
            Arc::new(MemoryAreaHandle {
                id: AreaId::FIXED_AREA,
                bytes: Mutex::new(vec![0u8; FIXED_AREA_SIZE as usize]),
            }),
        );
        Self {
            areas,
            next_id: AtomicI64::new(0),
            write_lock: Mutex::new(()),
        }
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for Memory {
    fn create_area(&self, size: u64) -> Result<AreaId, StoreError> {
        let id = AreaId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.areas.write().insert(
            id,
            Arc::new(MemoryAreaHandle {
                id,
                bytes: Mutex::new(vec![0u8; size as usize]),
            }),
        );
        Ok(id)
    }

    fn delete_area(&self, id: AreaId) -> Result<(), StoreError> {
        self.areas.write().remove(&id).ok_or(StoreError::NoSuchArea(id))?;
        Ok(())
    }

    fn mutable_area(&self, id: AreaId) -> Result<MutableArea, StoreError> {
        let handle = self.areas.read().get(&id).cloned().ok_or(StoreError::NoSuchArea(id))?;
        Ok(MutableArea::new(handle))
    }

    fn lock_for_write(&self) -> WriteGuard<'_> {
        lock_guard(&self.write_lock)
    }

    fn set_check_point(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let store = Memory::new();
        let id = store.create_area(16).unwrap();
        let mut area = store.mutable_area(id).unwrap();
        area.put_i32(7).unwrap();
        area.put_i64(-9).unwrap();

        let mut area = store.mutable_area(id).unwrap();
        assert_eq!(area.get_i32().unwrap(), 7);
        assert_eq!(area.get_i64().unwrap(), -9);
    }

    #[test]
    fn fixed_area_exists_without_create() {
        let store = Memory::new();
        let mut area = store.fixed_area().unwrap();
        assert_eq!(area.len(), FIXED_AREA_SIZE);
        area.put_i32(42).unwrap();
        assert_eq!(store.fixed_area().unwrap().get_i32().unwrap(), 42);
    }

    #[test]
    fn delete_area_then_access_fails() {
        let store = Memory::new();
        let id = store.create_area(8).unwrap();
        store.delete_area(id).unwrap();
        assert!(matches!(store.mutable_area(id), Err(StoreError::NoSuchArea(_))));
    }

    #[test]
    fn write_past_end_grows_the_area() {
        let store = Memory::new();
        let id = store.create_area(4).unwrap();
        let mut area = store.mutable_area(id).unwrap();
        area.set_position(4);
        area.put_i32(99).unwrap();
        assert_eq!(area.len(), 8);
    }
}
