//! The `TransactionModificationListener` collaborator: fires
//! inside the commit lock once a touched table's change has been
//! published, so implementations must be non-blocking and must never
//! re-enter the conglomerate.

use rdbcore_primitives::{RowId, TableId};

/// One touched table's published change, handed to every registered
/// listener during the commit point.
pub struct ModificationEvent<'a> {
    pub table_name: &'a str,
    pub table_id: TableId,
    pub added_row_ids: &'a [RowId],
    pub removed_row_ids: &'a [RowId],
}

/// A non-blocking, non-reentrant observer of committed table changes.
pub trait TransactionModificationListener: Send + Sync {
    fn table_commit_change(&self, event: &ModificationEvent<'_>);
}
