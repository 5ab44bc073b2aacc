use std::sync::Arc;

use rdbcore_block_store::memory::Memory;
use rdbcore_block_store::Store;
use rdbcore_primitives::{ColId, CommitId, TableId};
use rdbcore_schema::{ColumnDef, ColumnType, DataTableDef};
use rdbcore_sats::TObject;

use crate::journal::MasterTableJournal;

use super::*;

fn sample_schema() -> DataTableDef {
    DataTableDef::new(
        "public",
        "widgets",
        vec![
            ColumnDef::new("id", ColumnType::I64, false),
            ColumnDef::new("name", ColumnType::String, true),
        ],
    )
}

fn new_table(store: &Arc<dyn Store>, schema: DataTableDef) -> MasterTable {
    let handles = MasterTable::create(store, &schema, 64).unwrap();
    let (table, dirty) = MasterTable::open(Arc::clone(store), TableId::new(16), schema, vec![], handles, 64).unwrap();
    assert!(!dirty);
    table
}

#[test]
fn uncommitted_row_is_invisible_to_row_enumeration() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let mut table = new_table(&store, sample_schema());

    table.add_row(&[TObject::I64(1), TObject::String("a".into())]).unwrap();

    assert!(table.row_enumeration(CommitId::new(0)).unwrap().is_empty());
}

#[test]
fn committed_row_is_visible_from_its_commit_id_onward() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let mut table = new_table(&store, sample_schema());
    let mut journal = MasterTableJournal::new();

    let row = table.add_row(&[TObject::I64(1), TObject::String("a".into())]).unwrap();
    journal.record_add(row);
    let commit_id = CommitId::new(1);
    let index_set = table.create_index_set();
    table.commit_transaction_change(commit_id, &journal, index_set).unwrap();

    assert_eq!(table.row_enumeration(CommitId::ZERO).unwrap(), Vec::new());
    assert_eq!(table.row_enumeration(commit_id).unwrap(), vec![row]);
    assert_eq!(table.get_cell(ColId::new(0), row).unwrap(), TObject::I64(1));
    assert_eq!(table.get_cell(ColId::new(1), row).unwrap(), TObject::String("a".into()));
}

#[test]
fn rollback_frees_the_row_slot_for_reuse() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let mut table = new_table(&store, sample_schema());
    let mut journal = MasterTableJournal::new();

    let row = table.add_row(&[TObject::I64(1), TObject::Null]).unwrap();
    journal.record_add(row);
    table.rollback_transaction_change(&journal).unwrap();

    let mut next_journal = MasterTableJournal::new();
    let reused = table.add_row(&[TObject::I64(2), TObject::Null]).unwrap();
    next_journal.record_add(reused);

    assert_eq!(row, reused, "a rolled-back slot should be recycled by the next add");
}

#[test]
fn removed_row_stays_visible_to_a_transaction_snapshotted_before_the_remove() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let mut table = new_table(&store, sample_schema());

    let mut add_journal = MasterTableJournal::new();
    let row = table.add_row(&[TObject::I64(1), TObject::Null]).unwrap();
    add_journal.record_add(row);
    let add_commit = CommitId::new(1);
    let index_set = table.create_index_set();
    table.commit_transaction_change(add_commit, &add_journal, index_set).unwrap();

    let mut remove_journal = MasterTableJournal::new();
    remove_journal.record_remove(row);
    let remove_commit = CommitId::new(2);
    let index_set = table.create_index_set();
    table.commit_transaction_change(remove_commit, &remove_journal, index_set).unwrap();

    // A transaction snapshotted right after the add, before the remove,
    // still sees the row under snapshot isolation.
    assert_eq!(table.row_enumeration(add_commit).unwrap(), vec![row]);
    // One snapshotted at or after the remove does not.
    assert!(table.row_enumeration(remove_commit).unwrap().is_empty());
}

#[test]
fn merge_journal_changes_reclaims_rows_removed_before_the_watermark() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let mut table = new_table(&store, sample_schema());

    let mut add_journal = MasterTableJournal::new();
    let row = table.add_row(&[TObject::I64(1), TObject::Null]).unwrap();
    add_journal.record_add(row);
    let add_commit = CommitId::new(1);
    let index_set = table.create_index_set();
    table.commit_transaction_change(add_commit, &add_journal, index_set).unwrap();

    let mut remove_journal = MasterTableJournal::new();
    remove_journal.record_remove(row);
    let remove_commit = CommitId::new(2);
    let index_set = table.create_index_set();
    table.commit_transaction_change(remove_commit, &remove_journal, index_set).unwrap();

    // No transaction can still need it once the watermark passes remove_commit.
    table.merge_journal_changes(CommitId::new(3)).unwrap();

    let mut next_journal = MasterTableJournal::new();
    let reused = table.add_row(&[TObject::I64(2), TObject::Null]).unwrap();
    next_journal.record_add(reused);
    assert_eq!(row, reused, "a reclaimed slot should be recycled");
}

#[test]
fn find_all_journals_since_excludes_already_observed_commits() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let mut table = new_table(&store, sample_schema());

    let mut first = MasterTableJournal::new();
    let row_a = table.add_row(&[TObject::I64(1), TObject::Null]).unwrap();
    first.record_add(row_a);
    let index_set = table.create_index_set();
    table.commit_transaction_change(CommitId::new(1), &first, index_set).unwrap();

    let mut second = MasterTableJournal::new();
    let row_b = table.add_row(&[TObject::I64(2), TObject::Null]).unwrap();
    second.record_add(row_b);
    let index_set = table.create_index_set();
    table.commit_transaction_change(CommitId::new(2), &second, index_set).unwrap();

    let since = table.find_all_journals_since(CommitId::new(1));
    assert_eq!(since.len(), 1);
    assert_eq!(since[0].commit_id, CommitId::new(2));
}

#[test]
fn dispose_refuses_while_root_locked() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let mut table = new_table(&store, sample_schema());
    table.lock_root();
    assert!(matches!(table.dispose(true), Err(Error::RootLocked { .. })));

    table.unlock_root();
    assert!(table.dispose(true).is_ok());
}
