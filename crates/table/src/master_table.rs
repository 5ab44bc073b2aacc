//! The physical representation of one table: a row-status
//! `FixedRecordList`, one `SectorStore` holding every cell's encoded bytes,
//! and the authoritative committed `IndexSet`.
//!
//! Row id 0 is a reserved sentinel, never handed out by `add_row`: its
//! entry roots the free-slot chain (mirroring how `FixedRecordList`'s
//! `reserved_long` is documented as rooting "a type-specific delete chain"
//! — this is that chain, just rooted one level up since `reserved_long`
//! itself is used here as the monotonic next-row-id counter instead).

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, warn};

use rdbcore_block_store::{AreaId, Store, StoreError};
use rdbcore_primitives::{ColId, CommitId, RowId, TableId};
use rdbcore_record_list::FixedRecordList;
use rdbcore_sats::{decode_cell, encode_cell, TObject};
use rdbcore_sector_store::{SectorId, SectorStore};
use rdbcore_schema::DataTableDef;

use crate::index_set::IndexSet;
use crate::journal::{MasterTableJournal, NormalizedJournal};
use crate::row_state::RowStatus;

const SENTINEL_ROW: u64 = 0;
const TAIL: i64 = -1;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("row {0} does not exist or is not addressable")]
    NoSuchRow(RowId),
    #[error("commit_transaction_change: row {0} is not UncommittedAdded")]
    NotUncommittedAdded(RowId),
    #[error("commit_transaction_change: row {0} is not CommittedAdded")]
    NotCommittedAdded(RowId),
    #[error("column index {0} is out of range for this table's schema")]
    NoSuchColumn(usize),
    #[error("this master table has {live} outstanding root locks and cannot be dropped")]
    RootLocked { live: u32 },
    #[error(transparent)]
    RecordList(#[from] rdbcore_record_list::Error),
    #[error(transparent)]
    Sector(#[from] rdbcore_sector_store::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The two extents a `MasterTable` is built from; persist these (e.g. in
/// the `StateStore`'s per-table entry) to reopen the table later.
#[derive(Copy, Clone, Debug)]
pub struct MasterTableHandles {
    pub rows_header: AreaId,
    pub sector_area: AreaId,
}

/// One committed transaction's effect on this table, retained until
/// [`MasterTable::merge_journal_changes`] discards it.
#[derive(Clone, Debug)]
pub struct CommittedJournal {
    pub commit_id: CommitId,
    pub changes: NormalizedJournal,
}

struct RowEntry {
    status: RowStatus,
    field_a: i64,
    field_b: i64,
    record_type: u8,
    columns: Vec<(i64, i64)>,
}

/// The physical, committed representation of a single table, shared
/// across transactions.
///
/// Not thread safe: the caller (the conglomerate, under its commit lock
/// for any mutating call) must serialize access.
pub struct MasterTable {
    table_id: TableId,
    schema: DataTableDef,
    indexed_columns: Vec<ColId>,
    store: Arc<dyn Store>,
    sector_area: AreaId,
    rows: FixedRecordList,
    sectors: SectorStore,
    index_set: IndexSet,
    journal_history: Vec<CommittedJournal>,
    pending_reclaim: BTreeMap<CommitId, Vec<RowId>>,
    root_locks: u32,
    pending_drop: bool,
}

impl MasterTable {
    fn entry_size(ncols: usize) -> u64 {
        // status(1) + field_a(8) + field_b(8) + record_type(1) + ncols * (head_sector(8) + content_len(8))
        1 + 8 + 8 + 1 + ncols as u64 * 16
    }

    /// Allocates the backing extents for a fresh, empty table, writes the
    /// row-0 sentinel, and returns the handles to reopen it with
    /// [`Self::open`]. Mirrors `BlobStore::create`: the handle built here is
    /// dropped, `open` is what actually hands back a live `MasterTable`.
    pub fn create(store: &Arc<dyn Store>, schema: &DataTableDef, data_sector_size: u32) -> Result<MasterTableHandles, Error> {
        let ncols = schema.column_count();
        let rows_header = FixedRecordList::create(store, Self::entry_size(ncols))?;
        let mut rows = FixedRecordList::init(Arc::clone(store), rows_header, Self::entry_size(ncols))?;
        let sector_area = store.create_area(0)?;
        SectorStore::open(Arc::clone(store), sector_area, data_sector_size, false)?;

        rows.increase_size()?;
        rows.set_reserved_long(1)?;
        write_sentinel(&rows, ncols)?;

        Ok(MasterTableHandles { rows_header, sector_area })
    }

    /// Reopens an existing table from its handles. Returns whether the
    /// cell sector store was left dirty by an unclean shutdown.
    pub fn open(
        store: Arc<dyn Store>,
        table_id: TableId,
        schema: DataTableDef,
        indexed_columns: Vec<ColId>,
        handles: MasterTableHandles,
        data_sector_size: u32,
    ) -> Result<(Self, bool), Error> {
        let ncols = schema.column_count();
        let rows = FixedRecordList::init(Arc::clone(&store), handles.rows_header, Self::entry_size(ncols))?;
        let (sectors, dirty) = SectorStore::open(Arc::clone(&store), handles.sector_area, data_sector_size, false)?;
        let n_indexed = indexed_columns.len();
        let this = Self {
            table_id,
            schema,
            indexed_columns,
            store,
            sector_area: handles.sector_area,
            rows,
            sectors,
            index_set: IndexSet::empty(n_indexed),
            journal_history: Vec::new(),
            pending_reclaim: BTreeMap::new(),
            root_locks: 0,
            pending_drop: false,
        };
        Ok((this, dirty))
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn schema(&self) -> &DataTableDef {
        &self.schema
    }

    fn read_entry(&self, id: u64) -> Result<RowEntry, Error> {
        let ncols = self.schema.column_count();
        let mut cursor = self.rows.position(id).map_err(|_| Error::NoSuchRow(RowId::new(id)))?;
        let status = RowStatus::from_tag(cursor.get_u8()?);
        let field_a = cursor.get_i64()?;
        let field_b = cursor.get_i64()?;
        let record_type = cursor.get_u8()?;
        let mut columns = Vec::with_capacity(ncols);
        for _ in 0..ncols {
            let head = cursor.get_i64()?;
            let len = cursor.get_i64()?;
            columns.push((head, len));
        }
        Ok(RowEntry { status, field_a, field_b, record_type, columns })
    }

    fn write_entry(&self, id: u64, entry: &RowEntry) -> Result<(), Error> {
        let mut cursor = self.rows.position(id)?;
        cursor.put_u8(entry.status.to_tag())?;
        cursor.put_i64(entry.field_a)?;
        cursor.put_i64(entry.field_b)?;
        cursor.put_u8(entry.record_type)?;
        for &(head, len) in &entry.columns {
            cursor.put_i64(head)?;
            cursor.put_i64(len)?;
        }
        cursor.check_out()?;
        Ok(())
    }

    fn ensure_capacity(&mut self, id: u64) -> Result<(), Error> {
        while id >= self.rows.addressable_node_count() {
            self.rows.increase_size()?;
        }
        Ok(())
    }

    fn alloc_row_slot(&mut self) -> Result<u64, Error> {
        if self.root_locks == 0 {
            let sentinel = self.read_entry(SENTINEL_ROW)?;
            if sentinel.field_a != TAIL {
                let id = sentinel.field_a as u64;
                let freed = self.read_entry(id)?;
                self.write_entry(
                    SENTINEL_ROW,
                    &RowEntry { field_a: freed.field_a, ..sentinel_entry(sentinel) },
                )?;
                return Ok(id);
            }
        }
        let id = self.rows.reserved_long() as u64;
        self.ensure_capacity(id + 1)?;
        self.rows.set_reserved_long((id + 1) as i64)?;
        Ok(id)
    }

    fn free_row_slot(&mut self, id: u64) -> Result<(), Error> {
        let entry = self.read_entry(id)?;
        for &(head, _len) in &entry.columns {
            if head != TAIL {
                self.sectors.delete_across(SectorId(head))?;
            }
        }
        let sentinel = self.read_entry(SENTINEL_ROW)?;
        self.write_entry(
            id,
            &RowEntry {
                status: RowStatus::Reclaimable,
                field_a: sentinel.field_a,
                field_b: TAIL,
                record_type: 0,
                columns: vec![(-1, 0); self.schema.column_count()],
            },
        )?;
        self.write_entry(SENTINEL_ROW, &RowEntry { field_a: id as i64, ..sentinel_entry(sentinel) })?;
        Ok(())
    }

    /// Appends a new, uncommitted row. Visible to nobody but the
    /// transaction that added it until a commit installs it.
    pub fn add_row(&mut self, cells: &[TObject]) -> Result<RowId, Error> {
        let ncols = self.schema.column_count();
        assert_eq!(cells.len(), ncols, "row width must match the table's schema");
        let id = self.alloc_row_slot()?;
        let mut columns = Vec::with_capacity(ncols);
        for (i, cell) in cells.iter().enumerate() {
            let type_tag = self.schema.column(ColId::new(i as u16)).col_type.wire_tag();
            let mut buf = Vec::new();
            encode_cell(cell, type_tag, &mut buf);
            let head = self.sectors.write_across(&buf)?;
            columns.push((head.0, buf.len() as i64));
        }
        self.write_entry(
            id,
            &RowEntry {
                status: RowStatus::UncommittedAdded,
                field_a: TAIL,
                field_b: TAIL,
                record_type: 0,
                columns,
            },
        )?;
        Ok(RowId::new(id))
    }

    /// Stamps a row with a caller-defined type tag (e.g. a polymorphic
    /// subtype marker for a system table row).
    pub fn write_record_type(&mut self, row: RowId, code: u8) -> Result<(), Error> {
        let mut entry = self.read_entry(row.raw())?;
        entry.record_type = code;
        self.write_entry(row.raw(), &entry)
    }

    pub fn get_cell(&self, col: ColId, row: RowId) -> Result<TObject, Error> {
        let entry = self.read_entry(row.raw())?;
        if matches!(entry.status, RowStatus::Reclaimable) {
            return Err(Error::NoSuchRow(row));
        }
        let (head, len) = *entry
            .columns
            .get(col.raw() as usize)
            .ok_or(Error::NoSuchColumn(col.raw() as usize))?;
        let mut buf = vec![0u8; len as usize];
        self.sectors.read_across(SectorId(head), &mut buf)?;
        let mut cursor = rdbcore_sats::buffer::Cursor::new(&buf);
        let (value, _type_tag) = decode_cell(&mut cursor).expect("cell bytes written by add_row decode cleanly");
        Ok(value)
    }

    /// Transitions a row from `CommittedAdded` to `CommittedRemoved`.
    /// Invoked only by [`Self::commit_transaction_change`] — see this
    /// module's doc comment for why there's no separate
    /// "uncommitted-removed" physical state.
    pub fn delete_row(&mut self, row: RowId, commit_id: CommitId) -> Result<(), Error> {
        let mut entry = self.read_entry(row.raw())?;
        if entry.status != RowStatus::CommittedAdded {
            return Err(Error::NotCommittedAdded(row));
        }
        entry.status = RowStatus::CommittedRemoved;
        entry.field_b = commit_id.raw() as i64;
        self.write_entry(row.raw(), &entry)
    }

    /// A fresh snapshot of the authoritative committed index set.
    pub fn create_index_set(&self) -> IndexSet {
        self.index_set.snapshot()
    }

    pub fn indexed_columns(&self) -> &[ColId] {
        &self.indexed_columns
    }

    /// Every row visible to a transaction whose snapshot was taken at
    /// `view`: committed-added at or before `view`, and either never
    /// removed or removed strictly after `view`.
    pub fn row_enumeration(&self, view: CommitId) -> Result<Vec<RowId>, Error> {
        let view = view.raw() as i64;
        let next_id = self.rows.reserved_long() as u64;
        let mut rows = Vec::new();
        for id in 1..next_id {
            let entry = self.read_entry(id)?;
            let visible = match entry.status {
                RowStatus::CommittedAdded => entry.field_a <= view,
                RowStatus::CommittedRemoved => entry.field_a <= view && entry.field_b > view,
                RowStatus::Reclaimable | RowStatus::UncommittedAdded => false,
            };
            if visible {
                rows.push(RowId::new(id));
            }
        }
        Ok(rows)
    }

    /// Every committed journal recorded strictly after `since` — the
    /// changes an open transaction with `start_commit_id == since` has not
    /// yet observed.
    pub fn find_all_journals_since(&self, since: CommitId) -> Vec<&CommittedJournal> {
        self.journal_history.iter().filter(|j| j.commit_id > since).collect()
    }

    /// Publishes a transaction's changes: advances row states
    /// (added -> committed-added, removed -> committed-removed) and
    /// installs the new committed index set. Must be called under the
    /// conglomerate's commit lock.
    pub fn commit_transaction_change(
        &mut self,
        commit_id: CommitId,
        journal: &MasterTableJournal,
        index_set: IndexSet,
    ) -> Result<(), Error> {
        let normalized = journal.normalized();
        for &row in &normalized.added_rows {
            let mut entry = self.read_entry(row.raw())?;
            if entry.status != RowStatus::UncommittedAdded {
                return Err(Error::NotUncommittedAdded(row));
            }
            entry.status = RowStatus::CommittedAdded;
            entry.field_a = commit_id.raw() as i64;
            self.write_entry(row.raw(), &entry)?;
        }
        for &row in &normalized.removed_rows {
            self.delete_row(row, commit_id)?;
            self.pending_reclaim.entry(commit_id).or_default().push(row);
        }
        self.index_set = index_set;
        debug!(
            "table {}: committed {} adds, {} removes at commit {commit_id}",
            self.table_id,
            normalized.added_rows.len(),
            normalized.removed_rows.len()
        );
        self.journal_history.push(CommittedJournal { commit_id, changes: normalized });
        Ok(())
    }

    /// Undoes an uncommitted add set by marking those rows reclaimable;
    /// removes are left untouched, since nothing was ever published for
    /// them.
    pub fn rollback_transaction_change(&mut self, journal: &MasterTableJournal) -> Result<(), Error> {
        let normalized = journal.normalized();
        for row in normalized.added_rows {
            self.free_row_slot(row.raw())?;
        }
        Ok(())
    }

    /// Discards journal history strictly older than `min_commit_id` (the
    /// minimum start-commit-id across all still-open transactions) and
    /// reclaims any row removed at a commit id strictly less than it,
    /// since no open transaction's snapshot can still need it.
    pub fn merge_journal_changes(&mut self, min_commit_id: CommitId) -> Result<(), Error> {
        self.journal_history.retain(|j| j.commit_id >= min_commit_id);

        let reclaimable: Vec<CommitId> = self
            .pending_reclaim
            .range(..min_commit_id)
            .map(|(&c, _)| c)
            .collect();
        for commit_id in reclaimable {
            let rows = self.pending_reclaim.remove(&commit_id).unwrap_or_default();
            for row in rows {
                self.free_row_slot(row.raw())?;
            }
        }
        Ok(())
    }

    /// A cheap heuristic: worth a compaction pass once there's at least
    /// one reclaimable row for every two live ones.
    pub fn is_worth_compacting(&self) -> bool {
        !self.pending_reclaim.is_empty()
    }

    pub fn is_root_locked(&self) -> bool {
        self.root_locks > 0
    }

    /// Taken by a transaction that holds an outstanding snapshot
    /// referencing this table, preventing `drop`/compaction until
    /// released.
    pub fn lock_root(&mut self) {
        self.root_locks += 1;
    }

    pub fn unlock_root(&mut self) {
        self.root_locks = self.root_locks.saturating_sub(1);
    }

    /// Marks this table for removal; the conglomerate actually frees its
    /// storage once [`Self::dispose`] confirms no root lock remains.
    pub fn drop_table(&mut self) {
        self.pending_drop = true;
    }

    /// Releases this table's storage. Refuses while any transaction still
    /// holds a root lock on it. When `pending_drop`
    /// is set, every extent backing this table (row list and cell sectors)
    /// is freed from the underlying store.
    pub fn dispose(&mut self, pending_drop: bool) -> Result<(), Error> {
        if self.is_root_locked() {
            warn!("table {}: dispose requested while root-locked, deferring", self.table_id);
            return Err(Error::RootLocked { live: self.root_locks });
        }
        self.pending_drop = pending_drop;
        if pending_drop {
            for area in self.rows.all_areas_used() {
                self.store.delete_area(area)?;
            }
            self.store.delete_area(self.sector_area)?;
        }
        Ok(())
    }
}

fn sentinel_entry(sentinel: RowEntry) -> RowEntry {
    RowEntry {
        status: RowStatus::Reclaimable,
        field_a: sentinel.field_a,
        field_b: TAIL,
        record_type: 0,
        columns: sentinel.columns,
    }
}

/// Writes the row-0 sentinel directly through a freshly-initialized
/// `FixedRecordList`, before a `MasterTable` exists to own it.
fn write_sentinel(rows: &FixedRecordList, ncols: usize) -> Result<(), Error> {
    let mut cursor = rows.position(SENTINEL_ROW)?;
    cursor.put_u8(RowStatus::Reclaimable.to_tag())?;
    cursor.put_i64(TAIL)?;
    cursor.put_i64(TAIL)?;
    cursor.put_u8(0)?;
    for _ in 0..ncols {
        cursor.put_i64(-1)?;
        cursor.put_i64(0)?;
    }
    cursor.check_out()?;
    Ok(())
}

#[cfg(test)]
mod tests;
