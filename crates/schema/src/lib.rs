//! Table and column schema definitions, constraint metadata, and the
//! `SYS_INFO.*` system catalog layout.
//!
//! This crate owns the *shape* of a table (`DataTableDef`) and the
//! definitions of the constraints that may be declared over it; it does
//! not evaluate anything (`rdbcore-datastore`'s `ConstraintEngine` reads
//! these definitions out of the system tables at commit time).

pub mod column;
pub mod constraint;
pub mod encoding;
pub mod system;
pub mod table_def;

pub use column::{ColumnDef, ColumnType};
pub use constraint::{CheckDef, Deferrable, ForeignKeyAction, ForeignKeyDef, PrimaryKeyDef, UniqueDef};
pub use table_def::DataTableDef;
