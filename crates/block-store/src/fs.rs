//! A `Store` backed by ordinary files: one file per area, named by id, in a
//! directory; the fixed header extent is a dedicated `HEADER` file.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use log::warn;
use parking_lot::Mutex;

use crate::{lock_guard, AreaHandle, AreaId, MutableArea, Store, StoreError, WriteGuard, FIXED_AREA_SIZE};

const NEXT_ID_FILE: &str = "NEXT_ID";
const HEADER_FILE: &str = "HEADER";

fn io_err(area: AreaId, source: io::Error) -> StoreError {
    StoreError::Io { area, source }
}

struct FsAreaHandle {
    id: AreaId,
    path: PathBuf,
}

impl FsAreaHandle {
    fn open(&self, writable: bool) -> Result<File, StoreError> {
        OpenOptions::new()
            .read(true)
            .write(writable)
            .open(&self.path)
            .map_err(|e| io_err(self.id, e))
    }
}

impl AreaHandle for FsAreaHandle {
    fn id(&self) -> AreaId {
        self.id
    }

    fn len(&self) -> u64 {
        fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), StoreError> {
        let file = self.open(false)?;
        file.read_exact_at(buf, offset).map_err(|e| io_err(self.id, e))
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<(), StoreError> {
        let file = self.open(true)?;
        let needed = offset + buf.len() as u64;
        let current = file.metadata().map_err(|e| io_err(self.id, e))?.len();
        if needed > current {
            file.set_len(needed).map_err(|e| io_err(self.id, e))?;
        }
        file.write_all_at(buf, offset).map_err(|e| io_err(self.id, e))
    }

    fn truncate(&self, new_len: u64) -> Result<(), StoreError> {
        let file = self.open(true)?;
        file.set_len(new_len).map_err(|e| io_err(self.id, e))
    }

    fn flush(&self) -> Result<(), StoreError> {
        let file = self.open(true)?;
        file.sync_all().map_err(|e| io_err(self.id, e))
    }
}

/// A [`Store`] backed by one regular file per area inside `root`.
pub struct Fs {
    root: PathBuf,
    next_id: AtomicI64,
    write_lock: Mutex<()>,
}

impl Fs {
    /// Opens (creating if needed) a file-backed store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let header_path = root.join(HEADER_FILE);
        if !header_path.exists() {
            let file = File::create(&header_path)?;
            file.set_len(FIXED_AREA_SIZE)?;
        }

        let next_id_path = root.join(NEXT_ID_FILE);
        let next_id = if next_id_path.exists() {
            let raw = fs::read(&next_id_path)?;
            i64::from_be_bytes(raw.try_into().unwrap_or([0u8; 8]))
        } else {
            0
        };

        let store = Self {
            root,
            next_id: AtomicI64::new(next_id),
            write_lock: Mutex::new(()),
        };
        store.persist_next_id()?;
        Ok(store)
    }

    fn persist_next_id(&self) -> io::Result<()> {
        fs::write(self.root.join(NEXT_ID_FILE), self.next_id.load(Ordering::SeqCst).to_be_bytes())
    }

    fn area_path(&self, id: AreaId) -> PathBuf {
        if id == AreaId::FIXED_AREA {
            self.root.join(HEADER_FILE)
        } else {
            self.root.join(format!("area-{}", id.0))
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Store for Fs {
    fn create_area(&self, size: u64) -> Result<AreaId, StoreError> {
        let id = AreaId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.persist_next_id().map_err(|e| io_err(id, e))?;
        let path = self.area_path(id);
        let file = File::create(&path).map_err(|e| io_err(id, e))?;
        file.set_len(size).map_err(|e| io_err(id, e))?;
        Ok(id)
    }

    fn delete_area(&self, id: AreaId) -> Result<(), StoreError> {
        let path = self.area_path(id);
        fs::remove_file(&path).map_err(|e| io_err(id, e))
    }

    fn mutable_area(&self, id: AreaId) -> Result<MutableArea, StoreError> {
        let path = self.area_path(id);
        if !path.exists() {
            return Err(StoreError::NoSuchArea(id));
        }
        Ok(MutableArea::new(std::sync::Arc::new(FsAreaHandle { id, path })))
    }

    fn lock_for_write(&self) -> WriteGuard<'_> {
        lock_guard(&self.write_lock)
    }

    fn set_check_point(&self) -> Result<(), StoreError> {
        if let Err(e) = self.fixed_area().and_then(|mut a| a.check_out()) {
            warn!("set_check_point: failed to sync header: {e}");
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn area_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = Fs::open(dir.path()).unwrap();
            let id = store.create_area(16).unwrap();
            let mut area = store.mutable_area(id).unwrap();
            area.put_i32(123).unwrap();
            area.check_out().unwrap();
            id
        };

        let store = Fs::open(dir.path()).unwrap();
        let mut area = store.mutable_area(id).unwrap();
        assert_eq!(area.get_i32().unwrap(), 123);
    }

    #[test]
    fn next_id_counter_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let first = {
            let store = Fs::open(dir.path()).unwrap();
            store.create_area(4).unwrap()
        };
        let store = Fs::open(dir.path()).unwrap();
        let second = store.create_area(4).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn fixed_area_is_exactly_64_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = Fs::open(dir.path()).unwrap();
        assert_eq!(store.fixed_area().unwrap().len(), FIXED_AREA_SIZE);
    }
}
