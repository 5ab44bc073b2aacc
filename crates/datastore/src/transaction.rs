//! The per-transaction snapshot view and mutation surface.
//!
//! A `Transaction` never touches a `MasterTable` directly — it holds a
//! borrowed `Conglomerate` handle plus table ids and per-table overlay
//! state, and every mutating call goes back through the conglomerate's
//! table map: master tables never hold a back-reference to a
//! transaction.

use std::collections::{HashMap, HashSet};

use rdbcore_primitives::{ColId, CommitId, RowId, TableId};
use rdbcore_sats::TObject;
use rdbcore_schema::{system, DataTableDef};
use rdbcore_table::{IndexSet, MasterTableJournal};

use crate::conglomerate::Conglomerate;
use crate::constraint_engine::RowVariableResolver;
use crate::error::{Error, SchemaError};
use crate::options::MIN_SECTOR_SIZE;

/// One touched table's transaction-local overlay: the journal accumulated
/// so far, a mutable copy of its index set (for this transaction's own
/// reads), and the row ids this transaction itself has added/removed.
pub(crate) struct TxnTableState {
    pub(crate) journal: MasterTableJournal,
    pub(crate) index_set: IndexSet,
    pub(crate) own_added: Vec<RowId>,
    pub(crate) own_removed: HashSet<RowId>,
}

/// A snapshot view of the conglomerate plus the in-flight mutations one
/// caller is building up.
///
/// Not thread safe and not `Send`: a transaction's execution is
/// caller-driven and non-parallel.
pub struct Transaction<'c> {
    pub(crate) conglomerate: &'c Conglomerate,
    pub(crate) txn_id: u64,
    pub(crate) start_commit_id: CommitId,
    pub(crate) error_on_dirty_select: bool,
    pub(crate) tables: HashMap<TableId, TxnTableState>,
    pub(crate) selected_from_tables: HashSet<TableId>,
    pub(crate) touched_tables: HashSet<TableId>,
    pub(crate) created_database_objects: Vec<TableId>,
    pub(crate) created_names: Vec<String>,
    pub(crate) dropped_database_objects: Vec<TableId>,
    pub(crate) dropped_names: Vec<String>,
    pub(crate) constraint_altered: HashSet<TableId>,
    closed: bool,
}

impl<'c> Transaction<'c> {
    pub(crate) fn new(conglomerate: &'c Conglomerate, txn_id: u64, start_commit_id: CommitId, error_on_dirty_select: bool) -> Self {
        Self {
            conglomerate,
            txn_id,
            start_commit_id,
            error_on_dirty_select,
            tables: HashMap::new(),
            selected_from_tables: HashSet::new(),
            touched_tables: HashSet::new(),
            created_database_objects: Vec::new(),
            created_names: Vec::new(),
            dropped_database_objects: Vec::new(),
            dropped_names: Vec::new(),
            constraint_altered: HashSet::new(),
            closed: false,
        }
    }

    pub fn start_commit_id(&self) -> CommitId {
        self.start_commit_id
    }

    fn touch(&mut self, table: TableId) -> Result<&mut TxnTableState, Error> {
        if !self.tables.contains_key(&table) {
            let index_set = self.conglomerate.with_table(table, |mt| mt.create_index_set())?;
            self.tables.insert(
                table,
                TxnTableState {
                    journal: MasterTableJournal::new(),
                    index_set,
                    own_added: Vec::new(),
                    own_removed: HashSet::new(),
                },
            );
        }
        Ok(self.tables.get_mut(&table).expect("just inserted"))
    }

    /// Records a read-dependency on `table` for dirty-select detection.
    pub fn add_selected_from_table(&mut self, table: TableId) {
        self.selected_from_tables.insert(table);
    }

    /// Every row visible to this transaction: committed rows it can see at
    /// its snapshot, minus rows it has itself removed, plus rows it has
    /// itself added but not yet committed.
    pub fn row_enumeration(&mut self, table: TableId) -> Result<Vec<RowId>, Error> {
        self.add_selected_from_table(table);
        let mut rows = self.conglomerate.with_table(table, |mt| mt.row_enumeration(self.start_commit_id))??;
        if let Some(state) = self.tables.get(&table) {
            rows.retain(|r| !state.own_removed.contains(r));
            rows.extend(state.own_added.iter().copied());
        }
        Ok(rows)
    }

    pub fn get_cell(&self, table: TableId, col: ColId, row: RowId) -> Result<TObject, Error> {
        Ok(self.conglomerate.with_table(table, |mt| mt.get_cell(col, row))??)
    }

    /// Selects rows whose indexed column `col_index` (the column's
    /// position in the table's `indexed_columns()` list, not its
    /// `ColId`) equals `value`, merged with this transaction's own
    /// uncommitted adds/removes.
    pub fn select_equal(&mut self, table: TableId, col_index: usize, value: &TObject) -> Result<Vec<RowId>, Error> {
        self.add_selected_from_table(table);
        self.touch(table)?;
        let state = self.tables.get(&table).expect("touched above");
        Ok(state.index_set.select_equal(col_index, value))
    }

    /// Appends a new, uncommitted row. Runs immediate (not
    /// deferred) constraint checks before returning.
    pub fn insert_row(&mut self, table: TableId, cells: Vec<TObject>) -> Result<RowId, Error> {
        self.touched_tables.insert(table);
        let indexed_cols = self.conglomerate.with_table(table, |mt| mt.indexed_columns().to_vec())?;
        let row = self.conglomerate.with_table_mut(table, |mt| mt.add_row(&cells))?;
        let state = self.touch(table)?;
        state.journal.record_add(row);
        state.own_added.push(row);
        for (i, col) in indexed_cols.iter().enumerate() {
            state.index_set.insert(i, &cells[col.raw() as usize], row);
        }
        self.conglomerate.check_immediate_add(table, row, &cells)?;
        Ok(row)
    }

    /// Marks `row` removed. The row stays physically
    /// `CommittedAdded` until this transaction actually commits — see
    /// `rdbcore_table::master_table`'s row-state-machine doc comment.
    pub fn remove_row(&mut self, table: TableId, row: RowId) -> Result<(), Error> {
        self.touched_tables.insert(table);
        let cells = self.get_cell_row(table, row)?;
        let indexed_cols = self.conglomerate.with_table(table, |mt| mt.indexed_columns().to_vec())?;
        let state = self.touch(table)?;
        state.journal.record_remove(row);
        state.own_removed.insert(row);
        for (i, col) in indexed_cols.iter().enumerate() {
            state.index_set.remove(i, &cells[col.raw() as usize], row);
        }
        self.conglomerate.check_immediate_remove(table, row)?;
        Ok(())
    }

    fn get_cell_row(&self, table: TableId, row: RowId) -> Result<Vec<TObject>, Error> {
        let ncols = self.conglomerate.with_table(table, |mt| mt.schema().column_count())?;
        (0..ncols).map(|i| self.get_cell(table, ColId::new(i as u16), row)).collect()
    }

    /// Creates and registers a new, uncommitted table; sector sizes must
    /// fall within `[27, 4096]`.
    pub fn create_table(
        &mut self,
        schema: DataTableDef,
        indexed_columns: Vec<ColId>,
        data_sector_size: u32,
        index_sector_size: u32,
    ) -> Result<TableId, Error> {
        if !(MIN_SECTOR_SIZE..=crate::options::MAX_SECTOR_SIZE).contains(&data_sector_size) {
            return Err(Error::AssertionFailure(format!(
                "data_sector_size {data_sector_size} outside legal range"
            )));
        }
        let qualified = format!("{}.{}", schema.schema_name, schema.table_name);
        let name_already_dropped_by_us = self.dropped_names.iter().any(|n| n == &qualified);
        if self.conglomerate.table_name_to_id(&qualified).is_some() && !name_already_dropped_by_us {
            return Err(SchemaError::TableExists(qualified).into());
        }
        let table_id = self
            .conglomerate
            .create_table_unregistered(schema, indexed_columns, data_sector_size, index_sector_size)?;
        self.touched_tables.insert(table_id);
        self.created_database_objects.push(table_id);
        self.created_names.push(qualified.clone());
        let state = self.touch(table_id)?;
        state.journal.record_create(table_id);
        self.record_schema_catalog(table_id, &qualified)?;
        Ok(table_id)
    }

    /// Removes `table` from the visible namespace.
    /// The conglomerate only reclaims its storage once no transaction
    /// holds a root lock on it.
    pub fn drop_table(&mut self, table: TableId) -> Result<(), Error> {
        let qualified = self.conglomerate.with_table(table, |mt| format!("{}.{}", mt.schema().schema_name, mt.schema().table_name))?;
        self.touched_tables.insert(table);
        self.dropped_database_objects.push(table);
        self.dropped_names.push(qualified);
        self.erase_schema_catalog(table)?;
        let state = self.touch(table)?;
        state.journal.record_drop(table);
        Ok(())
    }

    /// Mirrors a freshly created user table's id, qualified name and
    /// column shape into `SYS_INFO.SchemaInfo`/`SchemaColumns`, so
    /// `Conglomerate::open` can rebuild its `DataTableDef` on a later
    /// restart without the table itself being open yet.
    fn record_schema_catalog(&mut self, table: TableId, qualified: &str) -> Result<(), Error> {
        let schema = self.conglomerate.schema_of(table)?;
        self.insert_row(
            system::SCHEMA_INFO,
            vec![
                TObject::I64(table.raw() as i64),
                TObject::String(qualified.to_owned()),
                TObject::String("TABLE".to_owned()),
                TObject::Null,
            ],
        )?;
        for (seq, col) in schema.columns().iter().enumerate() {
            let default_expression = match &col.default_expression {
                Some(bytes) => TObject::Binary(self.conglomerate.allocate_blob(bytes)?),
                None => TObject::Null,
            };
            self.insert_row(
                system::SCHEMA_COLUMNS,
                vec![
                    TObject::I64(table.raw() as i64),
                    TObject::I64(seq as i64),
                    TObject::String(col.name.clone()),
                    TObject::I64(col.col_type.wire_tag() as i64),
                    TObject::Boolean(col.nullable),
                    default_expression,
                ],
            )?;
        }
        Ok(())
    }

    /// Removes `table`'s rows from `SYS_INFO.SchemaInfo`/`SchemaColumns`,
    /// mirroring `record_schema_catalog`.
    fn erase_schema_catalog(&mut self, table: TableId) -> Result<(), Error> {
        for row in self.row_enumeration(system::SCHEMA_INFO)? {
            if self.get_cell(system::SCHEMA_INFO, ColId::new(0), row)? == TObject::I64(table.raw() as i64) {
                self.remove_row(system::SCHEMA_INFO, row)?;
                break;
            }
        }
        for row in self.row_enumeration(system::SCHEMA_COLUMNS)? {
            if self.get_cell(system::SCHEMA_COLUMNS, ColId::new(0), row)? == TObject::I64(table.raw() as i64) {
                self.remove_row(system::SCHEMA_COLUMNS, row)?;
            }
        }
        Ok(())
    }

    /// Makes a deep, independent copy of `src`'s currently-visible rows
    /// into a brand new table under `schema_name`/`table_name`, with its
    /// own indexes built from `indexed_columns` as the rows are copied in.
    /// `src`'s own schema is reused verbatim; only the qualified name and
    /// storage parameters differ.
    pub fn copy_table(
        &mut self,
        src: TableId,
        schema_name: impl Into<String>,
        table_name: impl Into<String>,
        indexed_columns: Vec<ColId>,
        data_sector_size: u32,
        index_sector_size: u32,
    ) -> Result<TableId, Error> {
        let src_schema = self.conglomerate.schema_of(src)?;
        let rows = self.row_enumeration(src)?;
        let mut copied_rows = Vec::with_capacity(rows.len());
        for row in rows {
            copied_rows.push(self.get_cell_row(src, row)?);
        }

        let new_schema = DataTableDef::new(schema_name, table_name, src_schema.columns().to_vec());
        let dest = self.create_table(new_schema, indexed_columns, data_sector_size, index_sector_size)?;
        for cells in copied_rows {
            self.insert_row(dest, cells)?;
        }
        Ok(dest)
    }

    /// Replaces `table`'s schema and index set: semantically drop the
    /// existing table and create a fresh one under the same qualified
    /// name, copying every currently-visible row forward by matching
    /// column name. A column present in `new_schema` but absent from the
    /// old schema is filled from its `default_expression` (evaluated
    /// against the row's other new-schema cells already copied in) when
    /// one is declared, else left `Null`. The new table's row ids start
    /// fresh at zero — this redesign has no notion of a user-visible
    /// "unique id counter" to carry across a schema change, since row ids
    /// are physical storage locations, not a sequence a caller ever reads.
    pub fn alter_table(
        &mut self,
        table: TableId,
        new_schema: DataTableDef,
        new_indexed_columns: Vec<ColId>,
        data_sector_size: u32,
        index_sector_size: u32,
    ) -> Result<TableId, Error> {
        let old_schema = self.conglomerate.schema_of(table)?;
        let rows = self.row_enumeration(table)?;
        let mut copied_rows = Vec::with_capacity(rows.len());
        for row in rows {
            let old_cells = self.get_cell_row(table, row)?;
            let mut new_cells = Vec::with_capacity(new_schema.column_count());
            for col in new_schema.columns() {
                let value = match old_schema.column_id(&col.name) {
                    Ok(old_id) => old_cells[old_id.raw() as usize].clone(),
                    Err(_) => match &col.default_expression {
                        Some(expr) => {
                            let resolver = RowVariableResolver { schema: &new_schema, cells: &new_cells };
                            self.conglomerate.evaluator().evaluate(expr, &resolver)
                        }
                        None => TObject::Null,
                    },
                };
                new_cells.push(value);
            }
            copied_rows.push(new_cells);
        }

        self.drop_table(table)?;
        let new_table = self.create_table(new_schema, new_indexed_columns, data_sector_size, index_sector_size)?;
        for cells in copied_rows {
            self.insert_row(new_table, cells)?;
        }
        Ok(new_table)
    }

    /// Records that this transaction altered `table`'s constraint set:
    /// the commit protocol runs a full add-constraint check against every
    /// row of a constraint-altered table, not just the rows this
    /// transaction itself touched.
    pub fn mark_constraint_altered(&mut self, table: TableId) {
        self.touched_tables.insert(table);
        self.constraint_altered.insert(table);
        if let Ok(state) = self.touch(table) {
            state.journal.record_constraint_alter(table);
        }
    }

    /// Terminal: commits this transaction via the conglomerate's commit
    /// protocol.
    pub fn close_and_commit(mut self) -> Result<CommitId, Error> {
        self.closed = true;
        self.conglomerate.process_commit(&mut self)
    }

    /// Terminal: discards every uncommitted change.
    pub fn close_and_rollback(mut self) -> Result<(), Error> {
        self.closed = true;
        self.conglomerate.process_rollback(&mut self)
    }
}

impl Drop for Transaction<'_> {
    /// A transaction dropped without an explicit close is an implicit
    /// rollback.
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            if let Err(e) = self.conglomerate.process_rollback_ref(self) {
                log::warn!("implicit rollback of transaction {} failed: {e}", self.txn_id);
            }
        }
    }
}
