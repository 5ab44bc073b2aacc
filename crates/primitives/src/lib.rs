//! Identifiers shared by every layer of the storage core.
//!
//! These are plain newtypes over integers. None of them carry behavior
//! beyond display/ordering/hashing; the components that own the data they
//! index (`FixedRecordList`, `MasterTable`, `Conglomerate`, ...) are
//! responsible for validating that an id actually refers to something live.

use std::fmt;

mod collist;

pub use collist::ColList;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident($repr:ty)) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
        pub struct $name(pub $repr);

        impl $name {
            /// Constructs a new id from its raw representation.
            pub const fn new(raw: $repr) -> Self {
                Self(raw)
            }

            /// The raw representation of this id.
            pub const fn raw(self) -> $repr {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$repr> for $name {
            fn from(raw: $repr) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for $repr {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl nohash_hasher::IsEnabled for $name {}
    };
}

id_type! {
    /// Identifies a `MasterTable` within a `Conglomerate`.
    ///
    /// Table ids `0..SYSTEM_TABLE_ID_RANGE_END` are reserved for the
    /// `SYS_INFO.*` system tables (see [`crate::SYSTEM_TABLE_ID_RANGE_END`]).
    TableId(u32)
}

id_type! {
    /// Identifies a column within a single table's `DataTableDef`.
    ColId(u16)
}

id_type! {
    /// Identifies a single-or-multi-column index within a table's `IndexSet`.
    IndexId(u32)
}

id_type! {
    /// Identifies a PRIMARY KEY / UNIQUE / FOREIGN KEY / CHECK constraint row
    /// in the relevant `SYS_INFO.*` system table.
    ConstraintId(u32)
}

id_type! {
    /// Identifies a large object held by the `BlobStore`, referenced from a
    /// cell's `Binary`/`Object` value instead of inlining its bytes.
    BlobRef(u64)
}

/// Every table id below this value is reserved for a `SYS_INFO.*` system
/// table. A freshly created `Conglomerate` starts user table ids
/// at this value.
pub const SYSTEM_TABLE_ID_RANGE_END: u32 = 16;

/// A stable row identifier handed out by a `FixedRecordList`.
///
/// Record ids are never reused while the owning list is growing; once a
/// slot is released into the delete chain it may be reused, but only when
/// no live reference to it remains (see `MasterTable`'s row state machine).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct RowId(pub u64);

impl RowId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RowId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl nohash_hasher::IsEnabled for RowId {}

/// A monotonic commit sequence number owned by the `Conglomerate`.
///
/// `CommitId::ZERO` (also `CommitId::default()`) denotes "before any commit
/// has happened"; the first real commit is `CommitId::ZERO.next()`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct CommitId(u64);

impl CommitId {
    /// The commit id observed by a transaction opened before any commit has
    /// taken place.
    pub const ZERO: CommitId = CommitId(0);

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    /// The next commit id after this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_roundtrips_through_raw() {
        let t = TableId::new(7);
        assert_eq!(TableId::from(u32::from(t)), t);
    }

    #[test]
    fn commit_id_zero_is_before_any_commit() {
        assert_eq!(CommitId::default(), CommitId::ZERO);
        assert_eq!(CommitId::ZERO.next().raw(), 1);
    }
}
