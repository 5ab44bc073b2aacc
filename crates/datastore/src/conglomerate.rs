//! The top-level handle over a whole transactional store:
//! owns every `MasterTable`, the `StateStore`, the conglomerate-wide
//! `BlobStore`, and runs the commit protocol under one internal lock.
//!
//! Everything that mutates shared state goes through `Inner`, guarded by a
//! single `parking_lot::Mutex`. The doc comment on `rdbcore_table::MasterTable`
//! already says mutating calls require "the conglomerate's commit lock"; this
//! is that lock, and it also serializes ordinary row reads/writes, not just
//! the commit point itself — a pragmatic simplification over finer-grained
//! per-table locking (see DESIGN.md).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use rdbcore_block_store::{AreaId, Store};
use rdbcore_blob_store::{BlobStore, BlobStoreHandles};
use rdbcore_fs_utils::ExclusiveLock;
use rdbcore_paths::ConglomerateRoot;
use rdbcore_primitives::{ColId, CommitId, RowId, TableId};
use TObject;
use rdbcore_schema::{system, ColumnDef, ColumnType, DataTableDef};
use rdbcore_table::master_table::MasterTableHandles;
use rdbcore_table::{IndexSet, MasterTable};

use crate::catalog;
use crate::constraint_engine::{self, ExpressionEvaluator, NullEvaluator};
use crate::error::{CommitConflict, ConstraintViolation, Error};
use crate::listener::{ModificationEvent, TransactionModificationListener};
use crate::namespace::NamespaceJournal;
use crate::options::Options;
use crate::state_store::{StateStore, TableCatalogEntry};
use crate::transaction::Transaction;

/// Everything a `Conglomerate` guards behind its one lock.
pub struct Inner {
    pub(crate) tables: HashMap<TableId, MasterTable>,
    /// Each table's backing extents and data sector size, kept alongside
    /// `tables` purely because `MasterTable` doesn't hand them back out —
    /// needed to rebuild `StateStore::commit`'s catalog entries.
    table_meta: HashMap<TableId, (MasterTableHandles, u32)>,
    state_store: StateStore,
    blob_store: BlobStore,
    commit_id: u64,
    next_table_id: u32,
    dropped_at: HashMap<TableId, CommitId>,
    namespace_journals: Vec<NamespaceJournal>,
    open_start_commits: Vec<CommitId>,
}

impl Inner {
    pub(crate) fn current_commit_id(&self) -> CommitId {
        CommitId::new(self.commit_id)
    }

    pub(crate) fn schema_of(&self, table: TableId) -> Result<DataTableDef, Error> {
        Ok(self.tables.get(&table).ok_or(Error::NoSuchTable(table))?.schema().clone())
    }

    /// Every row visible at `view`, as `(row_id, cell_tuple)` pairs — the
    /// check-view construction, reused by `catalog` for scanning
    /// `SYS_INFO.*`.
    pub(crate) fn row_tuples(&self, table: TableId, view: CommitId) -> Result<Vec<(RowId, Vec<TObject>)>, Error> {
        let mt = self.tables.get(&table).ok_or(Error::NoSuchTable(table))?;
        let ncols = mt.schema().column_count();
        let mut out = Vec::new();
        for id in mt.row_enumeration(view)? {
            let mut cells = Vec::with_capacity(ncols);
            for c in 0..ncols {
                cells.push(mt.get_cell(ColId::new(c as u16), id)?);
            }
            out.push((id, cells));
        }
        Ok(out)
    }

    /// Resolves a large-object reference's content bytes,
    /// used by `catalog` to read a CHECK constraint's serialized
    /// expression back out of `SYS_INFO.CheckInfo`.
    pub(crate) fn blob_bytes(&self, reference: rdbcore_primitives::BlobRef) -> Result<Vec<u8>, Error> {
        Ok(self.blob_store.get(reference)?.data)
    }

    /// Stores `data` as a new, referenced blob, for a catalog row that
    /// embeds it directly (e.g. `SYS_INFO.SchemaColumns.default_expression`).
    pub(crate) fn allocate_blob(&mut self, data: &[u8]) -> Result<rdbcore_primitives::BlobRef, Error> {
        let reference = self.blob_store.allocate(0, data)?;
        self.blob_store.establish_reference(reference)?;
        Ok(reference)
    }
}

/// A fully open transactional store: every `MasterTable` it holds, the
/// durable `StateStore`/`BlobStore`, and the namespace/commit bookkeeping the
/// commit protocol needs.
pub struct Conglomerate {
    store: Arc<dyn Store>,
    _lock: ExclusiveLock,
    options: Options,
    inner: Mutex<Inner>,
    next_txn_id: AtomicU64,
    listeners: RwLock<Vec<Arc<dyn TransactionModificationListener>>>,
    evaluator: Arc<dyn ExpressionEvaluator>,
}

const STATE_STORE_AREA_SLOT: u64 = 0;
const BLOB_RECORDS_AREA_SLOT: u64 = 8;
const BLOB_SECTOR_AREA_SLOT: u64 = 16;

impl Conglomerate {
    /// Creates a brand new, empty conglomerate rooted at `root`: acquires a
    /// process-exclusive lock, then initializes the `StateStore`/
    /// `BlobStore` and writes their area ids to the 64-byte fixed header.
    pub fn create(root: ConglomerateRoot, options: Options) -> Result<Self, Error> {
        std::fs::create_dir_all(&*root).map_err(|source| rdbcore_fs_utils::LockError::Io {
            path: root.lock_file().to_path_buf(),
            source,
        })?;
        let lock = ExclusiveLock::acquire(root.lock_file())?;
        let store: Arc<dyn Store> = Arc::new(open_fs_store(&root)?);

        let state_area = StateStore::create(&store)?;
        let blob_handles = BlobStore::create(&store, options.blob_sector_size)?;
        {
            let mut header = store.fixed_area()?;
            header.set_position(STATE_STORE_AREA_SLOT);
            header.put_i64(state_area.0)?;
            header.set_position(BLOB_RECORDS_AREA_SLOT);
            header.put_i64(blob_handles.records_header.0)?;
            header.set_position(BLOB_SECTOR_AREA_SLOT);
            header.put_i64(blob_handles.sector_area.0)?;
            header.check_out()?;
        }

        let mut state_store = StateStore::open(Arc::clone(&store), state_area)?;
        let (blob_store, _dirty) = BlobStore::open(Arc::clone(&store), blob_handles, options.blob_sector_size)?;

        let mut tables = HashMap::new();
        let mut table_meta = HashMap::new();
        let mut visible = Vec::new();
        for (table_id, schema) in system::system_table_defs() {
            let handles = MasterTable::create(&store, &schema, options.data_sector_size)?;
            let (mt, _dirty) = MasterTable::open(Arc::clone(&store), table_id, schema, Vec::new(), handles, options.data_sector_size)?;
            visible.push(TableCatalogEntry {
                table_id,
                schema_name: mt.schema().schema_name.clone(),
                table_name: mt.schema().table_name.clone(),
                rows_header: handles.rows_header,
                sector_area: handles.sector_area,
                data_sector_size: options.data_sector_size,
                indexed_columns: Vec::new(),
            });
            table_meta.insert(table_id, (handles, options.data_sector_size));
            tables.insert(table_id, mt);
        }
        state_store.commit(visible, Vec::new(), crate::options::MIN_COMMIT_ID)?;

        let inner = Inner {
            tables,
            table_meta,
            state_store,
            blob_store,
            commit_id: crate::options::MIN_COMMIT_ID,
            next_table_id: crate::options::DEFAULT_TABLE_ID_SEED,
            dropped_at: HashMap::new(),
            namespace_journals: Vec::new(),
            open_start_commits: Vec::new(),
        };

        Ok(Self {
            store,
            _lock: lock,
            options,
            inner: Mutex::new(inner),
            next_txn_id: AtomicU64::new(1),
            listeners: RwLock::new(Vec::new()),
            evaluator: Arc::new(NullEvaluator),
        })
    }

    /// Reopens an existing conglomerate, recovering each `MasterTable` and
    /// the `BlobStore` from the root pointers in the store's fixed header
    /// area.
    pub fn open(root: ConglomerateRoot, options: Options) -> Result<Self, Error> {
        let lock = ExclusiveLock::acquire(root.lock_file())?;
        let store: Arc<dyn Store> = Arc::new(open_fs_store(&root)?);

        let (state_area, blob_records, blob_sectors) = {
            let mut header = store.fixed_area()?;
            header.set_position(STATE_STORE_AREA_SLOT);
            let state_area = header.get_i64()?;
            header.set_position(BLOB_RECORDS_AREA_SLOT);
            let blob_records = header.get_i64()?;
            header.set_position(BLOB_SECTOR_AREA_SLOT);
            let blob_sectors = header.get_i64()?;
            (AreaId(state_area), AreaId(blob_records), AreaId(blob_sectors))
        };

        let state_store = StateStore::open(Arc::clone(&store), state_area)?;
        let (blob_store, _dirty) = BlobStore::open(
            Arc::clone(&store),
            BlobStoreHandles { records_header: blob_records, sector_area: blob_sectors },
            options.blob_sector_size,
        )?;

        let mut tables = HashMap::new();
        let mut table_meta = HashMap::new();
        let mut max_table_id = crate::options::DEFAULT_TABLE_ID_SEED.saturating_sub(1);
        let commit_id = state_store.commit_id();
        let view = CommitId::new(commit_id);

        // System tables first: a user table's schema is read back out of
        // `SYS_INFO.SchemaColumns`, which must itself already be open.
        let mut entries: Vec<&TableCatalogEntry> = state_store.visible().iter().collect();
        entries.sort_by_key(|entry| entry.table_id.raw() >= rdbcore_primitives::SYSTEM_TABLE_ID_RANGE_END);

        for entry in entries {
            let handles = MasterTableHandles { rows_header: entry.rows_header, sector_area: entry.sector_area };
            let schema = rebuild_schema(entry.table_id, &entry.schema_name, &entry.table_name, &tables, view, &blob_store)?;
            let (mt, _dirty) = MasterTable::open(
                Arc::clone(&store),
                entry.table_id,
                schema,
                entry.indexed_columns.clone(),
                handles,
                entry.data_sector_size,
            )?;
            max_table_id = max_table_id.max(entry.table_id.raw());
            table_meta.insert(entry.table_id, (handles, entry.data_sector_size));
            tables.insert(entry.table_id, mt);
        }

        let inner = Inner {
            tables,
            table_meta,
            state_store,
            blob_store,
            commit_id,
            next_table_id: max_table_id + 1,
            dropped_at: HashMap::new(),
            namespace_journals: Vec::new(),
            open_start_commits: Vec::new(),
        };

        Ok(Self {
            store,
            _lock: lock,
            options,
            inner: Mutex::new(inner),
            next_txn_id: AtomicU64::new(1),
            listeners: RwLock::new(Vec::new()),
            evaluator: Arc::new(NullEvaluator),
        })
    }

    /// Installs a real `ExpressionEvaluator` collaborator, e.g. a
    /// query-layer adapter. Without one, CHECK constraints always pass (see
    /// [`NullEvaluator`]).
    pub fn with_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub(crate) fn evaluator(&self) -> &dyn ExpressionEvaluator {
        self.evaluator.as_ref()
    }

    pub fn register_listener(&self, listener: Arc<dyn TransactionModificationListener>) {
        self.listeners.write().push(listener);
    }

    pub fn options(&self) -> Options {
        self.options
    }

    pub(crate) fn current_commit_id(&self) -> CommitId {
        self.inner.lock().current_commit_id()
    }

    /// Opens a fresh transaction snapshotting the current commit id.
    pub fn begin(&self) -> Transaction<'_> {
        let mut inner = self.inner.lock();
        let start = inner.current_commit_id();
        inner.open_start_commits.push(start);
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::Relaxed);
        rdbcore_metrics::METRICS.open_transactions.inc();
        Transaction::new(self, txn_id, start, self.options.error_on_dirty_select)
    }

    pub(crate) fn with_table<R>(&self, table: TableId, f: impl FnOnce(&MasterTable) -> R) -> Result<R, Error> {
        let inner = self.inner.lock();
        let mt = inner.tables.get(&table).ok_or(Error::NoSuchTable(table))?;
        Ok(f(mt))
    }

    pub(crate) fn schema_of(&self, table: TableId) -> Result<DataTableDef, Error> {
        self.inner.lock().schema_of(table)
    }

    pub(crate) fn allocate_blob(&self, data: &[u8]) -> Result<rdbcore_primitives::BlobRef, Error> {
        self.inner.lock().allocate_blob(data)
    }

    pub(crate) fn with_table_mut<R>(&self, table: TableId, f: impl FnOnce(&mut MasterTable) -> R) -> Result<R, Error> {
        let mut inner = self.inner.lock();
        let mt = inner.tables.get_mut(&table).ok_or(Error::NoSuchTable(table))?;
        Ok(f(mt))
    }

    pub(crate) fn table_name_to_id(&self, qualified: &str) -> Option<TableId> {
        let inner = self.inner.lock();
        inner
            .tables
            .iter()
            .find(|(_, mt)| format!("{}.{}", mt.schema().schema_name, mt.schema().table_name) == qualified)
            .map(|(id, _)| *id)
    }

    /// Allocates storage for a new table and registers it in the live table
    /// map immediately, so it is visible to the rest of the same
    /// transaction before that transaction ever commits.
    pub(crate) fn create_table_unregistered(
        &self,
        schema: DataTableDef,
        indexed_columns: Vec<ColId>,
        data_sector_size: u32,
        _index_sector_size: u32,
    ) -> Result<TableId, Error> {
        let mut inner = self.inner.lock();
        let table_id = TableId::new(inner.next_table_id);
        inner.next_table_id += 1;
        let handles = MasterTable::create(&self.store, &schema, data_sector_size)?;
        let (mt, _dirty) = MasterTable::open(Arc::clone(&self.store), table_id, schema, indexed_columns, handles, data_sector_size)?;
        inner.table_meta.insert(table_id, (handles, data_sector_size));
        inner.tables.insert(table_id, mt);
        Ok(table_id)
    }

    /// Runs the non-deferred add-constraint checks for one freshly inserted
    /// row, against the current committed state plus this one row.
    pub(crate) fn check_immediate_add(&self, table: TableId, row: RowId, cells: &[TObject]) -> Result<(), Error> {
        let inner = self.inner.lock();
        let view = inner.current_commit_id();
        let schema = inner.schema_of(table)?;
        let constraints = catalog::load_add_constraints(&inner, table, &schema)?;
        let mut view_rows = inner.row_tuples(table, view)?;
        view_rows.push((row, cells.to_vec()));
        let added = vec![(row, cells.to_vec())];
        let fk_match = |fk: &rdbcore_schema::ForeignKeyDef, tuple: &[TObject]| -> Result<bool, Error> {
            let target = inner.row_tuples(fk.ref_table, view)?;
            Ok(target.iter().any(|(_, cells)| {
                fk.ref_columns.as_slice().iter().enumerate().all(|(i, c)| cells[c.raw() as usize] == tuple[i])
            }))
        };
        constraint_engine::check_add(self.evaluator.as_ref(), table, &schema, &constraints, &added, &view_rows, fk_match, true)
    }

    /// Runs the inbound-FK remove check for one row about to be removed
    ///, against the database's current state.
    pub(crate) fn check_immediate_remove(&self, table: TableId, row: RowId) -> Result<(), Error> {
        let inner = self.inner.lock();
        let view = inner.current_commit_id();
        let cells = inner
            .row_tuples(table, view)?
            .into_iter()
            .find(|(id, _)| *id == row)
            .map(|(_, cells)| cells)
            .unwrap_or_default();
        let constraints = catalog::load_remove_constraints(&inner, table)?;
        let removed = vec![(row, cells)];
        let referencing = |fk: &rdbcore_schema::ForeignKeyDef| -> Result<Vec<Vec<TObject>>, Error> {
            Ok(inner.row_tuples(fk.table, view)?.into_iter().map(|(_, cells)| cells).collect())
        };
        constraint_engine::check_remove(table, &removed, &constraints, referencing)
    }

    /// The full commit protocol: conflict detection,
    /// constraint re-validation against a fresh check view, the commit
    /// point, and bookkeeping cleanup.
    pub(crate) fn process_commit(&self, txn: &mut Transaction<'_>) -> Result<CommitId, Error> {
        let mut inner = self.inner.lock();

        if let Err(e) = run_conflict_checks(&inner, txn) {
            undo_transaction_changes(&mut inner, txn);
            finish_open_transaction(&mut inner, txn.start_commit_id);
            return Err(e);
        }

        let mut staged = Vec::new();
        for &table in &txn.touched_tables {
            if txn.dropped_database_objects.contains(&table) {
                continue;
            }
            let state = txn.tables.get(&table).expect("touched_tables implies a TxnTableState exists");
            let normalized = state.journal.normalized();
            match build_table_plan(&inner, table, &normalized) {
                Ok(plan) => staged.push((table, normalized, plan)),
                Err(e) => {
                    undo_transaction_changes(&mut inner, txn);
                    finish_open_transaction(&mut inner, txn.start_commit_id);
                    return Err(e);
                }
            }
        }

        // Every touched table's effective row set (committed rows minus this
        // transaction's own removes, plus its own adds), keyed by table: a
        // deferred FK whose referenced table is committed in this very
        // transaction must see that table's own new rows, not just what was
        // already committed before this transaction began — a deferred FK
        // can still succeed within one transaction this way.
        let effective_views: HashMap<TableId, Vec<(RowId, Vec<TObject>)>> =
            staged.iter().map(|(table, _, plan)| (*table, plan.view_rows.clone())).collect();

        let mut plans = Vec::new();
        for (table, normalized, plan) in staged {
            if let Err(e) = check_table_constraints(
                &inner,
                self.evaluator.as_ref(),
                table,
                &normalized,
                txn.constraint_altered.contains(&table),
                &plan,
                &effective_views,
            ) {
                if let Error::Constraint(cv) = &e {
                    rdbcore_metrics::METRICS.constraint_violation_total.with_label_values(&[constraint_label(cv)]).inc();
                }
                undo_transaction_changes(&mut inner, txn);
                finish_open_transaction(&mut inner, txn.start_commit_id);
                return Err(e);
            }
            plans.push((table, normalized, plan.index_set));
        }

        let new_commit_id = CommitId::new(inner.commit_id + 1);

        for (table, _normalized, index_set) in &plans {
            let journal = txn.tables.get(table).expect("plan built against this table").journal.clone();
            inner
                .tables
                .get_mut(table)
                .expect("plan built against this table")
                .commit_transaction_change(new_commit_id, &journal, index_set.clone())?;
        }

        let listeners = self.listeners.read();
        for (table, normalized, _) in &plans {
            if listeners.is_empty() {
                continue;
            }
            let schema_name_and_table = inner.tables.get(table).map(|mt| format!("{}.{}", mt.schema().schema_name, mt.schema().table_name));
            if let Some(name) = schema_name_and_table {
                let event = ModificationEvent {
                    table_name: &name,
                    table_id: *table,
                    added_row_ids: &normalized.added_rows,
                    removed_row_ids: &normalized.removed_rows,
                };
                for listener in listeners.iter() {
                    listener.table_commit_change(&event);
                }
            }
        }
        drop(listeners);

        for &table in &txn.dropped_database_objects {
            inner.dropped_at.insert(table, new_commit_id);
        }

        persist_state_store(&mut inner, new_commit_id)?;

        if !txn.created_names.is_empty() || !txn.dropped_names.is_empty() {
            inner.namespace_journals.push(NamespaceJournal {
                commit_id: new_commit_id,
                created_names: txn.created_names.clone(),
                dropped_names: txn.dropped_names.clone(),
            });
        }

        inner.commit_id = new_commit_id.raw();
        finish_open_transaction(&mut inner, txn.start_commit_id);
        let min = inner.open_start_commits.iter().min().copied().unwrap_or(new_commit_id);
        for mt in inner.tables.values_mut() {
            let _ = mt.merge_journal_changes(min);
        }
        reclaim_dropped_tables(&mut inner, min);

        rdbcore_metrics::METRICS.commits_total.inc();
        Ok(new_commit_id)
    }

    /// Discards every change this transaction made.
    pub(crate) fn process_rollback(&self, txn: &mut Transaction<'_>) -> Result<(), Error> {
        self.process_rollback_ref(txn)
    }

    pub(crate) fn process_rollback_ref(&self, txn: &mut Transaction<'_>) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        undo_transaction_changes(&mut inner, txn);
        finish_open_transaction(&mut inner, txn.start_commit_id);
        rdbcore_metrics::METRICS.rollbacks_total.inc();
        Ok(())
    }
}

/// Undoes every in-memory effect a transaction had before it ever
/// committed: disposes tables it created, and rolls back row changes on
/// tables it merely touched. Shared by an explicit/implicit rollback and by
/// `process_commit`'s failure paths — a commit that fails a conflict or
/// constraint check must leave exactly the state an explicit rollback
/// would, not a half-applied transaction.
fn undo_transaction_changes(inner: &mut Inner, txn: &Transaction<'_>) {
    for (&table, state) in &txn.tables {
        if txn.created_database_objects.contains(&table) {
            if let Some(mut mt) = inner.tables.remove(&table) {
                let _ = mt.dispose(true);
            }
            inner.table_meta.remove(&table);
            continue;
        }
        if let Some(mt) = inner.tables.get_mut(&table) {
            let _ = mt.rollback_transaction_change(&state.journal);
        }
    }
}

fn finish_open_transaction(inner: &mut Inner, start: CommitId) {
    if let Some(pos) = inner.open_start_commits.iter().position(|c| *c == start) {
        inner.open_start_commits.remove(pos);
    }
    rdbcore_metrics::METRICS.open_transactions.dec();
}

/// Frees the storage of every table whose drop committed strictly before
/// `min_open_start`: no open transaction's snapshot predates the drop, so
/// none can still see the table's pre-drop state, and `with_table`/
/// `table_name_to_id` must stop finding it the moment this runs.
///
/// Mirrors `merge_journal_changes`'s row-level reclaim one level up: a
/// drop only takes effect for conflict detection at commit time (via
/// `dropped_at`), and only takes effect physically once every concurrent
/// reader has moved past it.
fn reclaim_dropped_tables(inner: &mut Inner, min_open_start: CommitId) {
    let ready: Vec<TableId> = inner.dropped_at.iter().filter(|&(_, &dropped_at)| dropped_at <= min_open_start).map(|(&table, _)| table).collect();
    for table in ready {
        inner.dropped_at.remove(&table);
        if let Some(mut mt) = inner.tables.remove(&table) {
            let _ = mt.dispose(true);
        }
        inner.table_meta.remove(&table);
    }
}

fn persist_state_store(inner: &mut Inner, commit_id: CommitId) -> Result<(), Error> {
    let visible: Vec<TableCatalogEntry> = inner
        .tables
        .iter()
        .filter(|(id, _)| !inner.dropped_at.contains_key(id))
        .map(|(id, mt)| {
            let (handles, data_sector_size) = inner
                .table_meta
                .get(id)
                .expect("every live table has an entry in table_meta");
            TableCatalogEntry {
                table_id: *id,
                schema_name: mt.schema().schema_name.clone(),
                table_name: mt.schema().table_name.clone(),
                rows_header: handles.rows_header,
                sector_area: handles.sector_area,
                data_sector_size: *data_sector_size,
                indexed_columns: mt.indexed_columns().to_vec(),
            }
        })
        .collect();
    let deleted: Vec<TableCatalogEntry> = Vec::new();
    inner.state_store.commit(visible, deleted, commit_id.raw())?;
    Ok(())
}

/// The label `rdbcore_constraint_violation_total` is broken down by.
fn constraint_label(cv: &ConstraintViolation) -> &'static str {
    match cv {
        ConstraintViolation::NullableViolation { .. } => "not_null",
        ConstraintViolation::PrimaryKeyViolation { .. } => "primary_key",
        ConstraintViolation::UniqueViolation { .. } => "unique",
        ConstraintViolation::ForeignKeyViolation { .. } => "foreign_key",
        ConstraintViolation::ForeignKeyRemoveViolation { .. } => "foreign_key_remove",
        ConstraintViolation::CheckViolation { .. } => "check",
    }
}

fn run_conflict_checks(inner: &Inner, txn: &Transaction<'_>) -> Result<(), Error> {
    if txn.error_on_dirty_select {
        for &table in &txn.selected_from_tables {
            if let Some(mt) = inner.tables.get(&table) {
                if !mt.find_all_journals_since(txn.start_commit_id).is_empty() {
                    return Err(CommitConflict::DirtyTableSelect(table).into());
                }
            }
        }
    }

    for journal in inner.namespace_journals.iter().filter(|j| j.commit_id > txn.start_commit_id) {
        if let Some(name) = journal.clashes_with(&txn.created_names, &txn.dropped_names) {
            return Err(CommitConflict::DuplicateTable(name).into());
        }
    }

    for &table in &txn.touched_tables {
        if txn.dropped_database_objects.contains(&table) {
            if let Some(mt) = inner.tables.get(&table) {
                if !mt.find_all_journals_since(txn.start_commit_id).is_empty() {
                    return Err(CommitConflict::TableRemoveClash(table).into());
                }
            }
            continue;
        }
        if let Some(&dropped_at) = inner.dropped_at.get(&table) {
            if dropped_at > txn.start_commit_id {
                return Err(CommitConflict::TableDropped(table).into());
            }
        }
        if let (Some(state), Some(mt)) = (txn.tables.get(&table), inner.tables.get(&table)) {
            let normalized = state.journal.normalized();
            for committed in mt.find_all_journals_since(txn.start_commit_id) {
                for row in &normalized.removed_rows {
                    if committed.changes.removed_rows.contains(row) {
                        rdbcore_metrics::METRICS.row_remove_clash_total.inc();
                        return Err(CommitConflict::RowRemoveClash { table, row: *row }.into());
                    }
                }
            }
        }
    }

    Ok(())
}

/// One touched table's fresh committed `IndexSet` plus its effective row
/// set (committed rows minus this transaction's own removes, plus its own
/// adds) — the latter doubles as this table's contribution to the
/// cross-table view `check_table_constraints` uses for FK targets.
struct TablePlan {
    index_set: IndexSet,
    view_rows: Vec<(RowId, Vec<TObject>)>,
    added_cells: Vec<(RowId, Vec<TObject>)>,
    removed_cells: Vec<(RowId, Vec<TObject>)>,
}

fn build_table_plan(inner: &Inner, table: TableId, normalized: &rdbcore_table::NormalizedJournal) -> Result<TablePlan, Error> {
    let mt = inner.tables.get(&table).ok_or(Error::NoSuchTable(table))?;
    let schema = mt.schema().clone();
    let indexed_cols = mt.indexed_columns().to_vec();
    let view = inner.current_commit_id();

    let committed_at_view = inner.row_tuples(table, view)?;

    let mut index_set = mt.create_index_set();
    let mut view_rows: Vec<(RowId, Vec<TObject>)> =
        committed_at_view.iter().filter(|(id, _)| !normalized.removed_rows.contains(id)).cloned().collect();

    let mut added_cells = Vec::new();
    for &row in &normalized.added_rows {
        let ncols = schema.column_count();
        let mut cells = Vec::with_capacity(ncols);
        for c in 0..ncols {
            cells.push(mt.get_cell(ColId::new(c as u16), row).map_err(Error::from)?);
        }
        for (i, col) in indexed_cols.iter().enumerate() {
            index_set.insert(i, &cells[col.raw() as usize], row);
        }
        added_cells.push((row, cells.clone()));
        view_rows.push((row, cells));
    }

    let mut removed_cells = Vec::new();
    for &row in &normalized.removed_rows {
        if let Some((_, cells)) = committed_at_view.iter().find(|(id, _)| *id == row) {
            for (i, col) in indexed_cols.iter().enumerate() {
                index_set.remove(i, &cells[col.raw() as usize], row);
            }
            removed_cells.push((row, cells.clone()));
        }
    }

    Ok(TablePlan { index_set, view_rows, added_cells, removed_cells })
}

/// Runs the full add/remove-constraint check for one touched table against
/// its fresh check view. Every constraint is checked regardless of its
/// declared deferral: a non-deferred constraint may already have passed an
/// immediate, per-row check at insert time, but that check ran against a
/// snapshot that a concurrently committed transaction can since have
/// invalidated — so the commit point is the only place re-validation is
/// actually authoritative.
///
/// `effective_views` supplies every *other* touched table's own in-flight
/// row set, so a deferred FK referencing a table this same transaction is
/// also committing sees that table's new rows, not just what was already
/// committed before this transaction began.
fn check_table_constraints(
    inner: &Inner,
    evaluator: &dyn ExpressionEvaluator,
    table: TableId,
    normalized: &rdbcore_table::NormalizedJournal,
    constraint_altered: bool,
    plan: &TablePlan,
    effective_views: &HashMap<TableId, Vec<(RowId, Vec<TObject>)>>,
) -> Result<(), Error> {
    let schema = inner.schema_of(table)?;
    let view = inner.current_commit_id();

    let target_rows = |ref_table: TableId| -> Result<Vec<(RowId, Vec<TObject>)>, Error> {
        match effective_views.get(&ref_table) {
            Some(rows) => Ok(rows.clone()),
            None => inner.row_tuples(ref_table, view),
        }
    };

    let constraints = catalog::load_add_constraints(inner, table, &schema)?;
    let fk_match = |fk: &rdbcore_schema::ForeignKeyDef, tuple: &[TObject]| -> Result<bool, Error> {
        let target = target_rows(fk.ref_table)?;
        Ok(target.iter().any(|(_, cells)| fk.ref_columns.as_slice().iter().enumerate().all(|(i, c)| cells[c.raw() as usize] == tuple[i])))
    };

    let rows_to_check = if constraint_altered { plan.view_rows.clone() } else { plan.added_cells.clone() };
    constraint_engine::check_add(evaluator, table, &schema, &constraints, &rows_to_check, &plan.view_rows, fk_match, true)?;
    constraint_engine::check_add(evaluator, table, &schema, &constraints, &rows_to_check, &plan.view_rows, fk_match, false)?;

    if !normalized.removed_rows.is_empty() {
        let remove_constraints = catalog::load_remove_constraints(inner, table)?;
        let referencing = |fk: &rdbcore_schema::ForeignKeyDef| -> Result<Vec<Vec<TObject>>, Error> {
            Ok(target_rows(fk.table)?.into_iter().map(|(_, cells)| cells).collect())
        };
        constraint_engine::check_remove(table, &plan.removed_cells, &remove_constraints, referencing)?;
    }

    Ok(())
}

fn open_fs_store(root: &ConglomerateRoot) -> Result<rdbcore_block_store::fs::Fs, Error> {
    rdbcore_block_store::fs::Fs::open(root.to_path_buf())
        .map_err(|source| rdbcore_fs_utils::LockError::Io { path: root.to_path_buf(), source }.into())
}

/// Reconstructs a table's `DataTableDef` for `MasterTable::open` during
/// recovery.
///
/// System tables (ids `0..SYSTEM_TABLE_ID_RANGE_END`) get their schema
/// straight from `system::system_table_defs()`. User tables get theirs by
/// reading their column shape back out of `SYS_INFO.SchemaColumns`, which
/// `open`'s first pass over system tables makes queryable in `tables`
/// before any user table's turn comes up.
fn rebuild_schema(
    table_id: TableId,
    schema_name: &str,
    table_name: &str,
    tables: &HashMap<TableId, MasterTable>,
    view: CommitId,
    blob_store: &BlobStore,
) -> Result<DataTableDef, Error> {
    if table_id.raw() < rdbcore_primitives::SYSTEM_TABLE_ID_RANGE_END {
        let (_, schema) = system::system_table_defs()
            .into_iter()
            .find(|(id, _)| *id == table_id)
            .ok_or_else(|| Error::AssertionFailure(format!("table {table_id:?} is in the reserved system id range but names no known system table")))?;
        return Ok(schema);
    }

    let columns_table = tables
        .get(&system::SCHEMA_COLUMNS)
        .ok_or_else(|| Error::AssertionFailure("SYS_INFO.SchemaColumns must already be open before any user table is reopened".to_owned()))?;

    let mut rows = Vec::new();
    for row in columns_table.row_enumeration(view)? {
        let table = columns_table.get_cell(ColId::new(0), row)?;
        if table != TObject::I64(table_id.raw() as i64) {
            continue;
        }
        let seq_no = match columns_table.get_cell(ColId::new(1), row)? {
            TObject::I64(n) => n,
            other => return Err(Error::AssertionFailure(format!("SchemaColumns.seq_no held a non-I64 value: {other:?}"))),
        };
        rows.push((seq_no, row));
    }
    rows.sort_by_key(|(seq_no, _)| *seq_no);

    let mut columns = Vec::with_capacity(rows.len());
    for (_, row) in rows {
        let name = match columns_table.get_cell(ColId::new(2), row)? {
            TObject::String(s) => s,
            other => return Err(Error::AssertionFailure(format!("SchemaColumns.name held a non-String value: {other:?}"))),
        };
        let col_type = match columns_table.get_cell(ColId::new(3), row)? {
            TObject::I64(tag) => ColumnType::from_wire_tag(tag as u16)
                .ok_or_else(|| Error::AssertionFailure(format!("SchemaColumns.type held an unknown wire tag: {tag}")))?,
            other => return Err(Error::AssertionFailure(format!("SchemaColumns.type held a non-I64 value: {other:?}"))),
        };
        let nullable = match columns_table.get_cell(ColId::new(4), row)? {
            TObject::Boolean(b) => b,
            other => return Err(Error::AssertionFailure(format!("SchemaColumns.nullable held a non-Boolean value: {other:?}"))),
        };
        let mut def = ColumnDef::new(name, col_type, nullable);
        if let TObject::Binary(reference) = columns_table.get_cell(ColId::new(5), row)? {
            def = def.with_default(blob_store.get(reference)?.data);
        }
        columns.push(def);
    }

    Ok(DataTableDef::new(schema_name, table_name, columns))
}
