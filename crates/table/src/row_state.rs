//! The row state machine:
//!
//! ```text
//!    ALLOCATED -> UNCOMMITTED_ADDED -> COMMITTED_ADDED
//!                               \ (rollback) -> RECLAIMABLE
//!    COMMITTED_ADDED -> COMMITTED_REMOVED -> RECLAIMABLE (after min-commit-id passes)
//! ```
//!
//! `MasterTable::delete_row` is only ever invoked by
//! `commit_transaction_change` — a row transitions straight from
//! `CommittedAdded` to `CommittedRemoved`, there is no physical
//! `UncommittedRemoved` status. An in-flight remove exists only as an
//! entry in the transaction's own `MasterTableJournal`; the master row is
//! untouched until the removing transaction actually commits. This is what
//! makes `rollback_transaction_change`'s "leave removes untouched"
//! behavior sound: a rolled-back remove was never physically applied in
//! the first place, so there's nothing to undo.

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum RowStatus {
    /// Slot is on the free chain; not a real row.
    Reclaimable,
    /// Physically written by `add_row`, not yet installed by a commit.
    UncommittedAdded,
    /// Visible to any transaction with `start_commit_id >= added_at`.
    CommittedAdded,
    /// Visible only to transactions with `start_commit_id < removed_at`.
    CommittedRemoved,
}

impl RowStatus {
    pub(crate) fn to_tag(self) -> u8 {
        match self {
            RowStatus::Reclaimable => 0,
            RowStatus::UncommittedAdded => 1,
            RowStatus::CommittedAdded => 2,
            RowStatus::CommittedRemoved => 3,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Self {
        match tag {
            0 => RowStatus::Reclaimable,
            1 => RowStatus::UncommittedAdded,
            2 => RowStatus::CommittedAdded,
            3 => RowStatus::CommittedRemoved,
            other => panic!("invalid row status tag {other}"),
        }
    }
}
