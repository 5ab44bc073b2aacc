//! A reference-counted store for large (out-of-row) values: binary blobs and
//! serialized objects.
//!
//! Content bytes live in a [`SectorStore`] chain; a [`FixedRecordList`] of
//! fixed-size metadata entries maps each [`BlobRef`] to its chain head,
//! length, type tag and reference count. The metadata index is append-only —
//! a reclaimed entry's slot is never reused — trading a little wasted header
//! space for not needing a second free-list mechanism alongside the sector
//! store's own one.
//!
//! Reclamation is split in two: [`BlobStore::is_zero_referenced`] is a local,
//! synchronous check; actually freeing the content chain
//! ([`BlobStore::try_reclaim`]) must only be called once the caller (the
//! conglomerate) has independently confirmed no open transaction's snapshot
//! still reaches the blob, since this crate has no visibility into open
//! transactions.

use std::sync::Arc;

use rdbcore_block_store::{AreaId, Store};
use rdbcore_primitives::BlobRef;
use rdbcore_record_list::FixedRecordList;
use rdbcore_sector_store::{SectorId, SectorStore};

/// `[live: u8][refcount: u32][type_tag: u32][head_sector: i64][content_len: u64]`
const ENTRY_SIZE: u64 = 1 + 4 + 4 + 8 + 8;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("blob {0} does not exist or was already reclaimed")]
    NotFound(BlobRef),
    #[error("release_reference on blob {0} with a refcount already at zero")]
    RefcountUnderflow(BlobRef),
    #[error(transparent)]
    RecordList(#[from] rdbcore_record_list::Error),
    #[error(transparent)]
    Sector(#[from] rdbcore_sector_store::Error),
}

/// The two extents a `BlobStore` is built from; persist these (e.g. in a
/// table's system catalog row) to reopen the store later.
#[derive(Copy, Clone, Debug)]
pub struct BlobStoreHandles {
    pub records_header: AreaId,
    pub sector_area: AreaId,
}

/// A blob's metadata and content, as returned by [`BlobStore::get`].
#[derive(Clone, Debug)]
pub struct BlobHandle {
    pub type_tag: u32,
    pub data: Vec<u8>,
    pub refcount: u32,
}

struct Entry {
    live: bool,
    refcount: u32,
    type_tag: u32,
    head_sector: i64,
    content_len: u64,
}

/// A reference-counted large-object allocator over a [`SectorStore`].
///
/// Not thread safe: the caller must serialize access, matching
/// [`FixedRecordList`] and [`SectorStore`].
pub struct BlobStore {
    records: FixedRecordList,
    sectors: SectorStore,
}

impl BlobStore {
    /// Allocates the two backing extents for a fresh, empty blob store.
    pub fn create(store: &Arc<dyn Store>, sector_size: u32) -> Result<BlobStoreHandles, Error> {
        let records_header = FixedRecordList::create(store, ENTRY_SIZE)?;
        let sector_area = store.create_area(0)?;
        // Initializes the sector store header; the handle itself is dropped,
        // `open` reopens it below.
        SectorStore::open(Arc::clone(store), sector_area, sector_size, false)?;
        Ok(BlobStoreHandles { records_header, sector_area })
    }

    /// Reopens a blob store from its handles. Returns whether the sector
    /// content store was left dirty by an unclean shutdown.
    pub fn open(store: Arc<dyn Store>, handles: BlobStoreHandles, sector_size: u32) -> Result<(Self, bool), Error> {
        let records = FixedRecordList::init(Arc::clone(&store), handles.records_header, ENTRY_SIZE)?;
        let (sectors, dirty) = SectorStore::open(store, handles.sector_area, sector_size, false)?;
        Ok((Self { records, sectors }, dirty))
    }

    /// Writes final state and clears the content store's dirty-open flag.
    pub fn close(&mut self) -> Result<(), Error> {
        self.sectors.close()?;
        Ok(())
    }

    fn next_id(&self) -> u64 {
        self.records.reserved_long() as u64
    }

    fn ensure_capacity(&mut self, id: u64) -> Result<(), Error> {
        while id >= self.records.addressable_node_count() {
            self.records.increase_size()?;
        }
        Ok(())
    }

    fn read_entry(&self, id: u64) -> Result<Entry, Error> {
        let mut cursor = self.records.position(id)?;
        let live = cursor.get_u8()? != 0;
        let refcount = cursor.get_i32()? as u32;
        let type_tag = cursor.get_i32()? as u32;
        let head_sector = cursor.get_i64()?;
        let content_len = cursor.get_i64()? as u64;
        Ok(Entry { live, refcount, type_tag, head_sector, content_len })
    }

    fn write_entry(&self, id: u64, entry: &Entry) -> Result<(), Error> {
        let mut cursor = self.records.position(id)?;
        cursor.put_u8(entry.live as u8)?;
        cursor.put_i32(entry.refcount as i32)?;
        cursor.put_i32(entry.type_tag as i32)?;
        cursor.put_i64(entry.head_sector)?;
        cursor.put_i64(entry.content_len as i64)?;
        cursor.check_out()?;
        Ok(())
    }

    /// Stores `data` as a new blob of `type_tag`, with a refcount of zero.
    /// The caller (a row incorporating the blob) must call
    /// [`Self::establish_reference`] once it commits to holding onto it.
    pub fn allocate(&mut self, type_tag: u32, data: &[u8]) -> Result<BlobRef, Error> {
        let head_sector = self.sectors.write_across(data)?;
        let id = self.next_id();
        self.ensure_capacity(id)?;
        self.write_entry(
            id,
            &Entry {
                live: true,
                refcount: 0,
                type_tag,
                head_sector: head_sector.0,
                content_len: data.len() as u64,
            },
        )?;
        self.records.set_reserved_long((id + 1) as i64)?;
        Ok(BlobRef::new(id))
    }

    /// Reads back a blob's type tag, content and current refcount.
    pub fn get(&self, reference: BlobRef) -> Result<BlobHandle, Error> {
        let entry = self.read_entry(reference.raw())?;
        if !entry.live {
            return Err(Error::NotFound(reference));
        }
        let mut data = vec![0u8; entry.content_len as usize];
        self.sectors.read_across(SectorId(entry.head_sector), &mut data)?;
        Ok(BlobHandle { type_tag: entry.type_tag, data, refcount: entry.refcount })
    }

    /// Increments a blob's reference count. Called when a row incorporates
    /// the blob.
    pub fn establish_reference(&mut self, reference: BlobRef) -> Result<(), Error> {
        let mut entry = self.read_entry(reference.raw())?;
        if !entry.live {
            return Err(Error::NotFound(reference));
        }
        entry.refcount += 1;
        self.write_entry(reference.raw(), &entry)
    }

    /// Decrements a blob's reference count and returns the new count. Does
    /// not free the content even once the count reaches zero — see
    /// [`Self::try_reclaim`].
    pub fn release_reference(&mut self, reference: BlobRef) -> Result<u32, Error> {
        let mut entry = self.read_entry(reference.raw())?;
        if !entry.live {
            return Err(Error::NotFound(reference));
        }
        if entry.refcount == 0 {
            return Err(Error::RefcountUnderflow(reference));
        }
        entry.refcount -= 1;
        self.write_entry(reference.raw(), &entry)?;
        Ok(entry.refcount)
    }

    pub fn is_zero_referenced(&self, reference: BlobRef) -> Result<bool, Error> {
        let entry = self.read_entry(reference.raw())?;
        if !entry.live {
            return Err(Error::NotFound(reference));
        }
        Ok(entry.refcount == 0)
    }

    /// Frees a blob's content chain and marks its entry dead, provided its
    /// refcount is currently zero. Returns whether it was actually
    /// reclaimed. The caller is responsible for having already established
    /// that no open transaction's snapshot still reaches this blob — this
    /// crate has no visibility into open transactions.
    pub fn try_reclaim(&mut self, reference: BlobRef) -> Result<bool, Error> {
        let mut entry = self.read_entry(reference.raw())?;
        if !entry.live {
            return Err(Error::NotFound(reference));
        }
        if entry.refcount != 0 {
            return Ok(false);
        }
        self.sectors.delete_across(SectorId(entry.head_sector))?;
        entry.live = false;
        entry.head_sector = -1;
        self.write_entry(reference.raw(), &entry)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests;
