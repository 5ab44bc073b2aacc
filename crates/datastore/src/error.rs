//! The public error taxonomy. Every fallible operation in the
//! lower crates returns its own narrow error; this is the classification
//! boundary that composes them into the kinds a caller of `Conglomerate`/
//! `Transaction` actually needs to branch on.

use rdbcore_primitives::{RowId, TableId};

/// Errors raised only by the commit protocol; a
/// transaction that fails with one of these is always rolled back, never
/// left partially applied.
#[derive(Debug, thiserror::Error)]
pub enum CommitConflict {
    #[error("table {table}: row {row} was removed by this transaction and also by a transaction committed since")]
    RowRemoveClash { table: TableId, row: RowId },
    #[error("table {0} was dropped by a transaction committed since this one started")]
    TableDropped(TableId),
    #[error("table {0} was dropped by this transaction but has committed changes since it started")]
    TableRemoveClash(TableId),
    #[error("transaction read from table {0}, which has since been committed to by another transaction")]
    DirtyTableSelect(TableId),
    #[error("object name '{0}' was created or dropped by a transaction committed since this one started")]
    DuplicateTable(String),
}

/// Constraint violations. Raised immediately for
/// `initially-immediate`/`not-deferrable` constraints, or at commit for
/// `initially-deferred` ones; in both cases the offending row operation
/// (or the whole commit, for deferred violations) is rejected.
#[derive(Debug, thiserror::Error)]
pub enum ConstraintViolation {
    #[error("column {column} of table {table} is NULL but is part of primary key '{constraint}'")]
    NullableViolation {
        table: TableId,
        column: String,
        constraint: String,
    },
    #[error("value for primary key '{constraint}' on table {table} already exists")]
    PrimaryKeyViolation { table: TableId, constraint: String },
    #[error("value for unique constraint '{constraint}' on table {table} already exists")]
    UniqueViolation { table: TableId, constraint: String },
    #[error("foreign key '{constraint}' on table {table} has no matching row in the referenced table")]
    ForeignKeyViolation { table: TableId, constraint: String },
    #[error("foreign key '{constraint}': row in table {table} is still referenced by table {referencing}")]
    ForeignKeyRemoveViolation {
        table: TableId,
        referencing: TableId,
        constraint: String,
    },
    #[error("CHECK constraint '{constraint}' on table {table} evaluated to FALSE")]
    CheckViolation { table: TableId, constraint: String },
}

/// Schema (DDL) errors, synchronous to the operation that raised them.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("table '{0}' already exists")]
    TableExists(String),
    #[error("table '{0}' does not exist")]
    TableMissing(String),
    #[error("schema '{0}' already exists")]
    SchemaExists(String),
    #[error("schema '{0}' does not exist")]
    SchemaMissing(String),
    #[error("name '{0}' is ambiguous")]
    AmbiguousName(String),
}

/// The top-level error taxonomy every public `Conglomerate`/`Transaction`
/// operation returns. Format/I/O errors from the lower crates are
/// composed in via `#[from]`; everything below this boundary is opaque to
/// the caller except its classification.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Commit(#[from] CommitConflict),
    #[error(transparent)]
    Constraint(#[from] ConstraintViolation),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("internal invariant violated: {0}")]
    AssertionFailure(String),
    #[error("no such table id {0}")]
    NoSuchTable(TableId),
    #[error(transparent)]
    Lock(#[from] rdbcore_fs_utils::LockError),
    #[error(transparent)]
    Store(#[from] rdbcore_block_store::StoreError),
    #[error(transparent)]
    RecordList(#[from] rdbcore_record_list::Error),
    #[error(transparent)]
    Sector(#[from] rdbcore_sector_store::Error),
    #[error(transparent)]
    Blob(#[from] rdbcore_blob_store::Error),
    #[error(transparent)]
    Table(#[from] rdbcore_table::master_table::Error),
    #[error(transparent)]
    ConstraintDef(#[from] rdbcore_schema::constraint::Error),
    #[error(transparent)]
    StateStore(#[from] crate::state_store::Error),
}

impl Error {
    /// Whether retrying the same operation (typically: re-running the
    /// whole transaction from scratch against a fresh snapshot) could
    /// plausibly succeed. Commit conflicts are the only retryable kind —
    /// constraint violations and schema errors reflect a caller mistake
    /// that retrying the exact same transaction won't fix.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Commit(_))
    }
}
