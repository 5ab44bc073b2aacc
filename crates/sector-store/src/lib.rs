//! A sector-chained file store: fixed-size sectors linked into chains that
//! can span more than one sector, with a free-sector (delete) chain for
//! reuse and a dirty-open/repair recovery protocol.
//!
//! Used for streamed/large-value storage paths — the blob
//! store's content and a `MasterTable`'s per-column cell streams are both
//! chains of sectors here.

use std::collections::HashSet;
use std::sync::Arc;

use rdbcore_block_store::{AreaId, Store, StoreError};

pub const MAGIC: i32 = 0x0BADBEADu32 as i32;
pub const VERSION: i32 = 0x0100;

/// Size in bytes of the persisted file header.
pub const HEADER_SIZE: u64 = 512;
/// Size in bytes of each sector's header (status byte + `next` pointer).
pub const SECTOR_HEADER_SIZE: u64 = 5;

const STATUS_USED: u8 = 0x00;
const STATUS_DELETED: u8 = 0x80;
const TAIL: i32 = -1;

const USER_SCRATCH_OFFSET: u64 = 64;
const USER_SCRATCH_SIZE: u64 = 128;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct SectorId(pub i64);

impl std::fmt::Display for SectorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("bad magic: expected {expected:#x}, found {found:#x}")]
    BadMagic { expected: i32, found: i32 },
    #[error("unknown sector store version {0:#x}")]
    UnknownVersion(i32),
    #[error("sector size mismatch: store was created with {on_disk}, opened with {requested}")]
    SectorSizeMismatch { on_disk: u32, requested: u32 },
    #[error("store was not closed cleanly; run repair() before further writes")]
    DirtyOpenNeedsRepair,
    #[error("store is read-only")]
    ReadOnly,
    #[error("payload of {len} bytes exceeds the {capacity}-byte-per-sector capacity for add_sector; use write_across")]
    PayloadTooLarge { len: usize, capacity: u64 },
    #[error("sector {0} is marked deleted; refusing to read through it")]
    ReadThroughDeleted(SectorId),
    #[error("compaction requires lock_count == 0, currently {0}")]
    LockHeld(u32),
    #[error("unlock() called with no outstanding lock")]
    UnlockUnderflow,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A sector-chained file store over a single [`Store`] area.
///
/// Holds its backing store behind an `Arc` rather than a borrow, the same
/// choice `FixedRecordList` makes, so it can be owned by a long-lived
/// arena structure instead of threading a lifetime through every caller.
pub struct SectorStore {
    store: Arc<dyn Store>,
    area: AreaId,
    sector_size: u32,
    delete_head: i64,
    sectors_used: i64,
    open_flag: u8,
    read_only: bool,
    lock_count: u32,
}

impl SectorStore {
    fn payload_capacity(&self) -> u64 {
        self.sector_size as u64 - SECTOR_HEADER_SIZE
    }

    fn sector_offset(&self, id: SectorId) -> u64 {
        HEADER_SIZE + id.0 as u64 * self.sector_size as u64
    }

    fn sector_count(&self) -> Result<u64, Error> {
        let len = self.store.mutable_area(self.area)?.len();
        Ok((len - HEADER_SIZE) / self.sector_size as u64)
    }

    /// Opens (creating if the area is empty and `read_only` is false) a
    /// sector store over `area` with `sector_size` (including the 5-byte
    /// sector header). Returns the store and whether the previous session
    /// left it dirty (crashed without a clean close).
    pub fn open(store: Arc<dyn Store>, area: AreaId, sector_size: u32, read_only: bool) -> Result<(Self, bool), Error> {
        let mut cursor = store.mutable_area(area)?;
        if cursor.len() == 0 {
            if read_only {
                return Err(Error::ReadOnly);
            }
            let this = Self::initialize(store, area, sector_size)?;
            return Ok((this, false));
        }

        let magic = cursor.get_i32()?;
        if magic != MAGIC {
            return Err(Error::BadMagic { expected: MAGIC, found: magic });
        }
        let version = cursor.get_i32()?;
        if version != VERSION {
            return Err(Error::UnknownVersion(version));
        }
        let on_disk_sector_size = cursor.get_i32()? as u32;
        if on_disk_sector_size != sector_size {
            return Err(Error::SectorSizeMismatch {
                on_disk: on_disk_sector_size,
                requested: sector_size,
            });
        }
        let delete_head = cursor.get_i64()?;
        let sectors_used = cursor.get_i64()?;
        let open_flag = cursor.get_u8()?;
        let dirty = open_flag == 1;

        let mut this = Self {
            store,
            area,
            sector_size,
            delete_head,
            sectors_used,
            open_flag,
            read_only,
            lock_count: 0,
        };

        if !read_only {
            this.open_flag = 1;
            this.persist_header()?;
        }

        Ok((this, dirty))
    }

    fn initialize(store: Arc<dyn Store>, area: AreaId, sector_size: u32) -> Result<Self, Error> {
        let this = Self {
            store: Arc::clone(&store),
            area,
            sector_size,
            delete_head: TAIL as i64,
            sectors_used: 0,
            open_flag: 1,
            read_only: false,
            lock_count: 0,
        };
        this.persist_header()?;

        // The fixed fields above end at byte 33; pad to the scratch buffer
        // at 64, zero the scratch buffer itself, then fill the reserved
        // tail with 0xFF, all exactly once (every later `persist_header`
        // touches only the fixed fields, never this region).
        let mut header = store.mutable_area(area)?;
        header.set_position(33);
        header.write(&vec![0xFFu8; (USER_SCRATCH_OFFSET - 33) as usize])?;
        header.set_position(USER_SCRATCH_OFFSET);
        header.write(&vec![0u8; USER_SCRATCH_SIZE as usize])?;
        header.set_position(USER_SCRATCH_OFFSET + USER_SCRATCH_SIZE);
        header.write(&vec![0xFFu8; (HEADER_SIZE - USER_SCRATCH_OFFSET - USER_SCRATCH_SIZE) as usize])?;
        header.check_out()?;

        Ok(this)
    }

    /// Writes the fixed header fields (magic/version/sector_size/
    /// delete_head/sectors_used/open_flag/sector_data_offset) — the first
    /// 33 bytes of the header. Never touches the scratch or reserved
    /// regions, which are written once at creation.
    fn persist_header(&self) -> Result<(), Error> {
        let _guard = self.store.lock_for_write();
        let mut header = self.store.mutable_area(self.area)?;
        header.set_position(0);
        header.put_i32(MAGIC)?;
        header.put_i32(VERSION)?;
        header.put_i32(self.sector_size as i32)?;
        header.put_i64(self.delete_head)?;
        header.put_i64(self.sectors_used)?;
        header.put_u8(self.open_flag)?;
        header.put_i32(HEADER_SIZE as i32)?;
        header.check_out()?;
        Ok(())
    }

    /// Writes `delete_head`/`sectors_used` to the header.
    pub fn synch(&self) -> Result<(), Error> {
        self.persist_header()
    }

    /// `synch()` followed by an `fsync` of the backing area.
    pub fn hard_synch(&self) -> Result<(), Error> {
        self.synch()?;
        self.store.set_check_point()?;
        Ok(())
    }

    /// Writes final state (`synch`) and clears the dirty-open flag.
    pub fn close(&mut self) -> Result<(), Error> {
        if !self.read_only {
            self.open_flag = 0;
        }
        self.hard_synch()
    }

    fn read_sector_header(&self, id: SectorId) -> Result<(u8, i32), Error> {
        let mut area = self.store.mutable_area(self.area)?;
        area.set_position(self.sector_offset(id));
        let status = area.get_u8()?;
        let next = area.get_i32()?;
        Ok((status, next))
    }

    fn write_sector_header(&self, id: SectorId, status: u8, next: i32) -> Result<(), Error> {
        let mut area = self.store.mutable_area(self.area)?;
        area.set_position(self.sector_offset(id));
        area.put_u8(status)?;
        area.put_i32(next)?;
        Ok(())
    }

    fn write_sector_payload(&self, id: SectorId, chunk: &[u8]) -> Result<(), Error> {
        let capacity = self.payload_capacity() as usize;
        let mut padded = vec![0u8; capacity];
        padded[..chunk.len()].copy_from_slice(chunk);
        let mut area = self.store.mutable_area(self.area)?;
        area.set_position(self.sector_offset(id) + SECTOR_HEADER_SIZE);
        area.write(&padded)?;
        Ok(())
    }

    fn read_sector_payload(&self, id: SectorId, out: &mut [u8]) -> Result<(), Error> {
        let mut area = self.store.mutable_area(self.area)?;
        area.set_position(self.sector_offset(id) + SECTOR_HEADER_SIZE);
        area.read(out)?;
        Ok(())
    }

    /// Allocates `count` sector ids: from the delete chain first (unless an
    /// add-lock is held), then from the end of the file.
    fn allocate_sectors(&mut self, count: u64) -> Result<Vec<SectorId>, Error> {
        let mut ids = Vec::with_capacity(count as usize);
        if self.lock_count == 0 {
            while (ids.len() as u64) < count && self.delete_head != TAIL as i64 {
                let id = SectorId(self.delete_head);
                let (_status, next) = self.read_sector_header(id)?;
                self.delete_head = next as i64;
                ids.push(id);
            }
        }
        let mut next_new = self.sector_count()?;
        while (ids.len() as u64) < count {
            ids.push(SectorId(next_new as i64));
            next_new += 1;
        }
        Ok(ids)
    }

    /// Writes a single sector (must fit within one sector's payload
    /// capacity); returns its id.
    pub fn add_sector(&mut self, buf: &[u8]) -> Result<SectorId, Error> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let capacity = self.payload_capacity();
        if buf.len() as u64 > capacity {
            return Err(Error::PayloadTooLarge { len: buf.len(), capacity });
        }
        let ids = self.allocate_sectors(1)?;
        let id = ids[0];
        self.write_sector_header(id, STATUS_USED, TAIL)?;
        self.write_sector_payload(id, buf)?;
        self.sectors_used += 1;
        self.persist_header()?;
        Ok(id)
    }

    /// Writes `buf` across as many chained sectors as needed; returns the
    /// head sector id.
    pub fn write_across(&mut self, buf: &[u8]) -> Result<SectorId, Error> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let capacity = self.payload_capacity();
        let span_count = if buf.is_empty() { 1 } else { (buf.len() as u64).div_ceil(capacity) };
        let mut ids = self.allocate_sectors(span_count)?;
        ids.sort();

        for (i, &id) in ids.iter().enumerate() {
            let start = i as u64 * capacity;
            let end = ((i as u64 + 1) * capacity).min(buf.len() as u64);
            let chunk = if start < buf.len() as u64 { &buf[start as usize..end as usize] } else { &[] };
            let next = if i + 1 < ids.len() { ids[i + 1].0 as i32 } else { TAIL };
            self.write_sector_header(id, STATUS_USED, next)?;
            self.write_sector_payload(id, chunk)?;
        }
        self.sectors_used += span_count as i64;
        self.persist_header()?;
        Ok(ids[0])
    }

    /// Walks the `USED` chain from `head`, filling `out` (up to its
    /// length); returns the number of bytes read.
    pub fn read_across(&self, head: SectorId, out: &mut [u8]) -> Result<usize, Error> {
        let capacity = self.payload_capacity() as usize;
        let mut current = head;
        let mut written = 0usize;
        loop {
            let (status, next) = self.read_sector_header(current)?;
            if status == STATUS_DELETED {
                return Err(Error::ReadThroughDeleted(current));
            }
            let remaining = out.len() - written;
            if remaining == 0 {
                break;
            }
            let take = remaining.min(capacity);
            let mut chunk = vec![0u8; capacity];
            self.read_sector_payload(current, &mut chunk)?;
            out[written..written + take].copy_from_slice(&chunk[..take]);
            written += take;
            if next == TAIL || written >= out.len() {
                break;
            }
            current = SectorId(next as i64);
        }
        Ok(written)
    }

    /// Marks every sector in the `USED` chain from `head` as `DELETED` and
    /// splices it onto the head of the free chain. Only the final sector's
    /// `next` pointer is rewritten (to the old `delete_head`); every other
    /// in-chain pointer is left untouched so a reader already holding a
    /// lock can keep traversing it.
    pub fn delete_across(&mut self, head: SectorId) -> Result<(), Error> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let mut chain = Vec::new();
        let mut current = head;
        loop {
            let (status, next) = self.read_sector_header(current)?;
            if status == STATUS_DELETED {
                return Err(Error::ReadThroughDeleted(current));
            }
            chain.push(current);
            if next == TAIL {
                break;
            }
            current = SectorId(next as i64);
        }

        for (i, &id) in chain.iter().enumerate() {
            if i + 1 < chain.len() {
                let (_status, next) = self.read_sector_header(id)?;
                self.write_sector_header(id, STATUS_DELETED, next)?;
            } else {
                self.write_sector_header(id, STATUS_DELETED, self.delete_head as i32)?;
            }
        }
        self.delete_head = head.0;
        self.sectors_used -= chain.len() as i64;
        self.persist_header()
    }

    /// Bumps the add-lock count; while held, `allocate_sectors` (and thus
    /// `add_sector`/`write_across`) never reuses a `DELETED` sector, so a
    /// concurrent reader walking a deleted chain sees a stable view.
    pub fn lock(&mut self) {
        self.lock_count += 1;
    }

    /// Releases one add-lock hold. Fatal (returns `AssertionFailure`-class
    /// error) if the count is already zero.
    pub fn unlock(&mut self) -> Result<(), Error> {
        if self.lock_count == 0 {
            return Err(Error::UnlockUnderflow);
        }
        self.lock_count -= 1;
        Ok(())
    }

    pub fn lock_count(&self) -> u32 {
        self.lock_count
    }

    pub fn sectors_used(&self) -> i64 {
        self.sectors_used
    }

    pub fn delete_head(&self) -> i64 {
        self.delete_head
    }

    /// Compacts the store, sliding `USED` sectors down over `DELETED`
    /// holes and shrinking the file. Requires no outstanding add-lock.
    /// Returns whether any surviving sector's id changed, in which case
    /// callers must rebuild any external index that stored a sector id.
    pub fn clear_deleted_sectors(&mut self) -> Result<bool, Error> {
        if self.lock_count != 0 {
            return Err(Error::LockHeld(self.lock_count));
        }
        let count = self.sector_count()?;
        let mut entries = Vec::with_capacity(count as usize);
        for i in 0..count {
            let id = SectorId(i as i64);
            let (status, next) = self.read_sector_header(id)?;
            let mut payload = vec![0u8; self.payload_capacity() as usize];
            self.read_sector_payload(id, &mut payload)?;
            entries.push((id, status, next, payload));
        }

        let mut remap = hashbrown::HashMap::new();
        let mut new_id = 0i64;
        for (id, status, _, _) in &entries {
            if *status == STATUS_USED {
                remap.insert(id.0, new_id);
                new_id += 1;
            }
        }

        let mut moved = false;
        for (id, status, next, payload) in &entries {
            if *status != STATUS_USED {
                continue;
            }
            let mapped = remap[&id.0];
            if mapped != id.0 {
                moved = true;
            }
            let new_next = if *next == TAIL { TAIL } else { remap[&(*next as i64)] as i32 };
            self.write_sector_header(SectorId(mapped), STATUS_USED, new_next)?;
            self.write_sector_payload(SectorId(mapped), payload)?;
        }

        let new_count = new_id as u64;
        let mut area = self.store.mutable_area(self.area)?;
        area.truncate(HEADER_SIZE + new_count * self.sector_size as u64)?;

        self.delete_head = TAIL as i64;
        self.sectors_used = new_count as i64;
        self.persist_header()?;
        Ok(moved)
    }

    /// Rebuilds the delete chain from scratch by scanning every sector
    /// header. Used after a dirty open.
    pub fn repair(&mut self) -> Result<(), Error> {
        let count = self.sector_count()?;
        let mut new_delete_head = TAIL as i64;
        let mut used = 0i64;
        for i in (0..count).rev() {
            let id = SectorId(i as i64);
            let (status, _next) = self.read_sector_header(id)?;
            if status == STATUS_DELETED {
                self.write_sector_header(id, STATUS_DELETED, new_delete_head as i32)?;
                new_delete_head = id.0;
            } else {
                used += 1;
            }
        }
        self.delete_head = new_delete_head;
        self.sectors_used = used;
        self.persist_header()
    }

    /// Walks each `USED` chain rooted at a sector in `terminal`, detecting
    /// any sector visited by more than one chain. The first chain to reach
    /// a sector keeps it; every later re-visit is marked `DELETED`. Runs
    /// `repair()` afterward to fold the newly-deleted sectors back into
    /// the free chain. Returns the ids that were found duplicated.
    pub fn fix(&mut self, terminal: &[SectorId]) -> Result<Vec<SectorId>, Error> {
        let mut visited = HashSet::new();
        let mut duplicates = Vec::new();

        for &root in terminal {
            let mut current = root;
            loop {
                let (status, next) = self.read_sector_header(current)?;
                if status == STATUS_DELETED {
                    break;
                }
                if !visited.insert(current.0) {
                    duplicates.push(current);
                    break;
                }
                if next == TAIL {
                    break;
                }
                current = SectorId(next as i64);
            }
        }

        for &id in &duplicates {
            let (_status, next) = self.read_sector_header(id)?;
            self.write_sector_header(id, STATUS_DELETED, next)?;
        }

        self.repair()?;
        Ok(duplicates)
    }
}

#[cfg(test)]
mod tests;
