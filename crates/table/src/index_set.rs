//! A per-master-table snapshot of each indexed column's ordered row-id
//! list.
//!
//! Each column's index is a `BTreeMap` from an order-preserving value key
//! (`rdbcore_sats::index_key_bytes`) to the row ids holding that value,
//! wrapped in an `Arc` so taking a snapshot (`IndexSet::snapshot`) is a
//! cheap pointer clone; the first mutation after a snapshot is taken calls
//! `Arc::make_mut`, which clones the one column map being touched. This is
//! copy-on-write at whole-column granularity rather than block
//! granularity — see DESIGN.md for why that's an acceptable stand-in
//! here.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use rdbcore_primitives::RowId;
use rdbcore_sats::{index_key_bytes, TObject};
use smallvec::SmallVec;

type ColumnIndex = BTreeMap<Vec<u8>, SmallVec<[RowId; 2]>>;

/// A snapshot of every indexed column's ordered row-id list for one
/// `MasterTable`. Owned exclusively by whoever holds it (a `Transaction`
/// or the `MasterTable` itself as its authoritative committed set);
/// disposed on transaction close or on being installed as the new
/// committed set.
#[derive(Clone, Debug, Default)]
pub struct IndexSet {
    columns: Vec<Arc<ColumnIndex>>,
}

impl IndexSet {
    /// A fresh, empty index set over `column_count` indexed columns.
    pub fn empty(column_count: usize) -> Self {
        Self {
            columns: (0..column_count).map(|_| Arc::new(BTreeMap::new())).collect(),
        }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// A cheap (`Arc`-cloned) copy for a transaction to hold and mutate
    /// independently of the table's authoritative set.
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    /// Explicit disposal point; dropping an `IndexSet` value does the same
    /// thing, this just documents the call site a caller's lifecycle
    /// management expects.
    pub fn dispose(self) {}

    pub fn select_equal(&self, col: usize, value: &TObject) -> Vec<RowId> {
        let key = index_key_bytes(value);
        self.columns[col].get(&key).map(|ids| ids.to_vec()).unwrap_or_default()
    }

    pub fn select_range(&self, col: usize, lo: Bound<&TObject>, hi: Bound<&TObject>) -> Vec<RowId> {
        let lo = bound_key(lo);
        let hi = bound_key(hi);
        self.columns[col]
            .range((lo, hi))
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect()
    }

    pub fn select_last(&self, col: usize) -> Vec<RowId> {
        self.columns[col]
            .last_key_value()
            .map(|(_, ids)| ids.to_vec())
            .unwrap_or_default()
    }

    pub fn insert(&mut self, col: usize, value: &TObject, row: RowId) {
        let key = index_key_bytes(value);
        let column = Arc::make_mut(&mut self.columns[col]);
        column.entry(key).or_default().push(row);
    }

    pub fn remove(&mut self, col: usize, value: &TObject, row: RowId) {
        let key = index_key_bytes(value);
        let column = Arc::make_mut(&mut self.columns[col]);
        if let Some(ids) = column.get_mut(&key) {
            ids.retain(|id| *id != row);
            if ids.is_empty() {
                column.remove(&key);
            }
        }
    }
}

fn bound_key(bound: Bound<&TObject>) -> Bound<Vec<u8>> {
    match bound {
        Bound::Included(v) => Bound::Included(index_key_bytes(v)),
        Bound::Excluded(v) => Bound::Excluded(index_key_bytes(v)),
        Bound::Unbounded => Bound::Unbounded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_equal_finds_only_matching_rows() {
        let mut set = IndexSet::empty(1);
        set.insert(0, &TObject::I64(10), RowId::new(1));
        set.insert(0, &TObject::I64(20), RowId::new(2));
        set.insert(0, &TObject::I64(10), RowId::new(3));

        let mut found = set.select_equal(0, &TObject::I64(10));
        found.sort_by_key(|r| r.raw());
        assert_eq!(found, vec![RowId::new(1), RowId::new(3)]);
    }

    #[test]
    fn select_range_is_ordered_by_value() {
        let mut set = IndexSet::empty(1);
        for v in [5, 1, 9, 3] {
            set.insert(0, &TObject::I64(v), RowId::new(v as u64));
        }
        let rows = set.select_range(0, Bound::Included(&TObject::I64(2)), Bound::Included(&TObject::I64(8)));
        assert_eq!(rows, vec![RowId::new(3), RowId::new(5)]);
    }

    #[test]
    fn select_last_returns_the_maximum_key() {
        let mut set = IndexSet::empty(1);
        set.insert(0, &TObject::I64(1), RowId::new(1));
        set.insert(0, &TObject::I64(9), RowId::new(9));
        assert_eq!(set.select_last(0), vec![RowId::new(9)]);
    }

    #[test]
    fn snapshot_is_independent_of_the_original() {
        let mut original = IndexSet::empty(1);
        original.insert(0, &TObject::I64(1), RowId::new(1));
        let mut snap = original.snapshot();
        snap.insert(0, &TObject::I64(2), RowId::new(2));

        assert_eq!(original.select_equal(0, &TObject::I64(2)), Vec::<RowId>::new());
        assert_eq!(snap.select_equal(0, &TObject::I64(2)), vec![RowId::new(2)]);
    }

    #[test]
    fn remove_drops_the_row_and_prunes_empty_keys() {
        let mut set = IndexSet::empty(1);
        set.insert(0, &TObject::I64(1), RowId::new(1));
        set.remove(0, &TObject::I64(1), RowId::new(1));
        assert!(set.select_equal(0, &TObject::I64(1)).is_empty());
    }
}
