//! The transactional commit protocol over the table and storage layers:
//! `Transaction`, `Conglomerate` and the `ConstraintEngine`.
//!
//! A `Conglomerate` is the single entry point — it owns every
//! [`rdbcore_table::MasterTable`], the `StateStore` catalog and the shared
//! `BlobStore`, and hands out [`Transaction`]s that snapshot its state at
//! `begin()` and either commit or roll back atomically at close.

pub mod catalog;
pub mod conglomerate;
pub mod constraint_engine;
pub mod error;
pub mod listener;
pub mod namespace;
pub mod options;
pub mod state_store;
pub mod transaction;

pub use conglomerate::Conglomerate;
pub use constraint_engine::{ExpressionEvaluator, NullEvaluator, RowVariableResolver};
pub use error::{CommitConflict, ConstraintViolation, Error, SchemaError};
pub use listener::{ModificationEvent, TransactionModificationListener};
pub use options::Options;
pub use transaction::Transaction;
