//! A growable array of fixed-size records with stable record ids, backed by
//! a [`Store`].
//!
//! Up to 64 geometrically-sized blocks are allocated as the list grows:
//! block `k` holds `32 * 2^k` entries, so the list never needs more than 64
//! allocations to address `32 * (2^64 - 1)` records in principle. Growth is
//! append-only; shrinking always frees the last block.

use std::sync::Arc;

use rdbcore_block_store::{AreaId, MutableArea, Store, StoreError};

/// `0x087131AA`, the magic four bytes every `FixedRecordList` header opens
/// with.
pub const MAGIC: i32 = 0x087131AAu32 as i32;

/// Size in bytes of the persisted header: 4 (magic) + 4 (block_count) + 8
/// (reserved_long) + 64 * 8 (block pointers) = 528.
pub const HEADER_SIZE: u64 = 4 + 4 + 8 + 64 * 8;

const MAX_BLOCKS: usize = 64;

/// Entries per block smaller than this exponent (block 0 holds `32 * 2^0`).
const BASE_BLOCK_SIZE: u64 = 32;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("bad magic: expected {expected:#x}, found {found:#x}")]
    BadMagic { expected: i32, found: i32 },
    #[error("record {0} is beyond the addressable range ({1} blocks allocated)")]
    OutOfRange(u64, u32),
    #[error("cannot decrease size: no blocks are allocated")]
    NoBlocksToFree,
    #[error("cannot increase size: all {MAX_BLOCKS} blocks are already allocated")]
    AllBlocksAllocated,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Computes `(block, offset_within_block)` for record number `n`:
/// `k = floor(log2(n + 32)) - 5`, `offset = n - 32*(2^k - 1)`.
pub fn locate(n: u64) -> (u32, u64) {
    let v = n + BASE_BLOCK_SIZE;
    let msb = 63 - v.leading_zeros() as u64;
    let k = msb - 5;
    let block_start = BASE_BLOCK_SIZE * ((1u64 << k) - 1);
    (k as u32, n - block_start)
}

/// Number of entries in block `k`: `32 * 2^k`.
pub fn block_len(k: u32) -> u64 {
    BASE_BLOCK_SIZE << k
}

/// A growable, fixed-entry-size record list over a [`Store`].
///
/// Holds its backing store behind an `Arc` rather than a borrow so a
/// `FixedRecordList` can be owned by a long-lived, arena-style structure
/// (a `MasterTable` held in a `Conglomerate`'s table map) without tying
/// it to a borrow-checker lifetime threaded through every layer above it.
///
/// Not thread safe: the caller must serialize access.
pub struct FixedRecordList {
    store: Arc<dyn Store>,
    header_id: AreaId,
    entry_size: u64,
    block_count: u32,
    reserved_long: i64,
    block_pointers: [i64; MAX_BLOCKS],
}

impl FixedRecordList {
    /// Allocates and initializes a fresh header extent; returns its id so
    /// the caller can persist it (e.g. as a `MasterTable`'s row-status list
    /// pointer) and later reopen the list with [`Self::init`].
    pub fn create(store: &Arc<dyn Store>, entry_size: u64) -> Result<AreaId, Error> {
        let header_id = store.create_area(HEADER_SIZE)?;
        let list = FixedRecordList {
            store: Arc::clone(store),
            header_id,
            entry_size,
            block_count: 0,
            reserved_long: 0,
            block_pointers: [-1; MAX_BLOCKS],
        };
        list.persist_header()?;
        Ok(header_id)
    }

    /// Opens an existing header extent as a `FixedRecordList` of
    /// `entry_size`-byte records.
    pub fn init(store: Arc<dyn Store>, header_id: AreaId, entry_size: u64) -> Result<Self, Error> {
        let mut header = store.mutable_area(header_id)?;
        let magic = header.get_i32()?;
        if magic != MAGIC {
            return Err(Error::BadMagic { expected: MAGIC, found: magic });
        }
        let block_count = header.get_i32()? as u32;
        let reserved_long = header.get_i64()?;
        let mut block_pointers = [-1i64; MAX_BLOCKS];
        for p in block_pointers.iter_mut() {
            *p = header.get_i64()?;
        }
        Ok(Self {
            store,
            header_id,
            entry_size,
            block_count,
            reserved_long,
            block_pointers,
        })
    }

    fn persist_header(&self) -> Result<(), Error> {
        let _guard = self.store.lock_for_write();
        let mut header = self.store.mutable_area(self.header_id)?;
        header.set_position(0);
        header.put_i32(MAGIC)?;
        header.put_i32(self.block_count as i32)?;
        header.put_i64(self.reserved_long)?;
        for &p in &self.block_pointers {
            header.put_i64(p)?;
        }
        header.check_out()?;
        self.store.set_check_point()?;
        Ok(())
    }

    /// Total number of addressable (allocated) records: `32*(2^block_count - 1)`.
    pub fn addressable_node_count(&self) -> u64 {
        if self.block_count == 0 {
            0
        } else {
            BASE_BLOCK_SIZE * ((1u64 << self.block_count) - 1)
        }
    }

    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    /// Allocates the next block (`32 * 2^block_count` entries of
    /// `entry_size` bytes each).
    pub fn increase_size(&mut self) -> Result<(), Error> {
        if self.block_count as usize >= MAX_BLOCKS {
            return Err(Error::AllBlocksAllocated);
        }
        let k = self.block_count;
        let size = block_len(k) * self.entry_size;
        let area = self.store.create_area(size)?;
        self.block_pointers[k as usize] = area.0;
        self.block_count += 1;
        self.persist_header()
    }

    /// Frees the last allocated block.
    ///
    /// Mirrors the source's unconditional top-block free: this layer has
    /// no notion of which slots within a block are occupied by live rows
    /// (that bookkeeping lives one level up, in whatever keeps the delete
    /// chain rooted at `reserved_long`), so it cannot itself verify the
    /// block is empty. The caller is responsible for only calling this once
    /// every record in the top block has been retired.
    pub fn decrease_size(&mut self) -> Result<(), Error> {
        if self.block_count == 0 {
            return Err(Error::NoBlocksToFree);
        }
        let k = self.block_count - 1;
        let area = AreaId(self.block_pointers[k as usize]);
        self.store.delete_area(area)?;
        self.block_pointers[k as usize] = -1;
        self.block_count -= 1;
        self.persist_header()
    }

    /// A cursor positioned at the start of record `n`'s entry.
    pub fn position(&self, n: u64) -> Result<MutableArea, Error> {
        let (k, offset) = locate(n);
        if k >= self.block_count {
            return Err(Error::OutOfRange(n, self.block_count));
        }
        let area = AreaId(self.block_pointers[k as usize]);
        let mut cursor = self.store.mutable_area(area)?;
        cursor.set_position(offset * self.entry_size);
        Ok(cursor)
    }

    pub fn reserved_long(&self) -> i64 {
        self.reserved_long
    }

    pub fn set_reserved_long(&mut self, value: i64) -> Result<(), Error> {
        self.reserved_long = value;
        self.persist_header()
    }

    /// Every area this list owns: the header plus every allocated block,
    /// for full-copy operations such as live-copying a table.
    pub fn all_areas_used(&self) -> Vec<AreaId> {
        let mut areas = vec![self.header_id];
        areas.extend((0..self.block_count).map(|k| AreaId(self.block_pointers[k as usize])));
        areas
    }

    pub fn entry_size(&self) -> u64 {
        self.entry_size
    }
}

#[cfg(test)]
mod tests;
