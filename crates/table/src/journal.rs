//! The per-table journal a transaction accumulates as it mutates a
//! `MasterTable`, and its commit-time normalized form.

use rdbcore_primitives::{RowId, TableId};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum JournalEntry {
    Add(RowId),
    Remove(RowId),
    Touched(TableId),
    Create(TableId),
    Drop(TableId),
    ConstraintAlter(TableId),
}

/// The ordered log of row adds/removes/touches one table sees within a
/// single transaction.
#[derive(Clone, Debug, Default)]
pub struct MasterTableJournal {
    entries: Vec<JournalEntry>,
}

/// The commit-time normalization of a [`MasterTableJournal`]: rows both
/// added and removed within the same transaction cancel out.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NormalizedJournal {
    pub added_rows: Vec<RowId>,
    pub removed_rows: Vec<RowId>,
}

impl MasterTableJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn record_add(&mut self, row: RowId) {
        self.entries.push(JournalEntry::Add(row));
    }

    pub fn record_remove(&mut self, row: RowId) {
        self.entries.push(JournalEntry::Remove(row));
    }

    pub fn record_touched(&mut self, table: TableId) {
        self.entries.push(JournalEntry::Touched(table));
    }

    pub fn record_create(&mut self, table: TableId) {
        self.entries.push(JournalEntry::Create(table));
    }

    pub fn record_drop(&mut self, table: TableId) {
        self.entries.push(JournalEntry::Drop(table));
    }

    pub fn record_constraint_alter(&mut self, table: TableId) {
        self.entries.push(JournalEntry::ConstraintAlter(table));
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    /// Disjoint add/remove row sets: a row both added and removed in this
    /// transaction never happened as far as any other observer is
    /// concerned, so it appears in neither set.
    pub fn normalized(&self) -> NormalizedJournal {
        let mut added = Vec::new();
        let mut removed = Vec::new();
        for entry in &self.entries {
            match entry {
                JournalEntry::Add(row) => added.push(*row),
                JournalEntry::Remove(row) => removed.push(*row),
                _ => {}
            }
        }
        added.retain(|row| {
            if let Some(pos) = removed.iter().position(|r| r == row) {
                removed.remove(pos);
                false
            } else {
                true
            }
        });
        NormalizedJournal {
            added_rows: added,
            removed_rows: removed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_added_then_removed_in_the_same_transaction_cancel() {
        let mut journal = MasterTableJournal::new();
        journal.record_add(RowId::new(1));
        journal.record_add(RowId::new(2));
        journal.record_remove(RowId::new(1));

        let normalized = journal.normalized();
        assert_eq!(normalized.added_rows, vec![RowId::new(2)]);
        assert!(normalized.removed_rows.is_empty());
    }

    #[test]
    fn removes_of_rows_not_added_this_transaction_survive() {
        let mut journal = MasterTableJournal::new();
        journal.record_remove(RowId::new(42));

        let normalized = journal.normalized();
        assert_eq!(normalized.removed_rows, vec![RowId::new(42)]);
        assert!(normalized.added_rows.is_empty());
    }
}
