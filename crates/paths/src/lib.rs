//! Typed wrappers around the conglomerate's on-disk layout.
//!
//! Every file the storage core opens is reached through one of these types
//! rather than an ad hoc `PathBuf::join`, so a path's purpose is visible at
//! the call site and can't be confused with a sibling file of a different
//! kind.

use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use rdbcore_primitives::TableId;

macro_rules! path_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Eq, PartialEq, Hash)]
        pub struct $name(PathBuf);

        impl $name {
            pub fn from_path(path: impl Into<PathBuf>) -> Self {
                Self(path.into())
            }
        }

        impl Deref for $name {
            type Target = Path;

            fn deref(&self) -> &Path {
                &self.0
            }
        }

        impl AsRef<Path> for $name {
            fn as_ref(&self) -> &Path {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0.display())
            }
        }
    };
}

path_type! {
    /// The directory a `Conglomerate` was opened against; every other path
    /// below is a child of this one.
    ConglomerateRoot
}

path_type! {
    /// The `StateStore`'s single file: the published commit-id and the root
    /// pointers for every live `MasterTable`.
    StateStoreFile
}

path_type! {
    /// The process-exclusive lock file taken at open time.
    LockFile
}

path_type! {
    /// One table's column-store sector chains.
    TableDataFile
}

path_type! {
    /// One table's row-status `FixedRecordList` and `IndexSet` sector chains.
    TableIndexFile
}

path_type! {
    /// The conglomerate-wide large object store.
    BlobStoreFile
}

impl ConglomerateRoot {
    pub fn state_store_file(&self) -> StateStoreFile {
        StateStoreFile::from_path(self.join("state_store"))
    }

    pub fn lock_file(&self) -> LockFile {
        LockFile::from_path(self.join("conglomerate.lock"))
    }

    pub fn table_data_file(&self, table: TableId) -> TableDataFile {
        TableDataFile::from_path(self.join(format!("{table}.data")))
    }

    pub fn table_index_file(&self, table: TableId) -> TableIndexFile {
        TableIndexFile::from_path(self.join(format!("{table}.index")))
    }

    pub fn blob_store_file(&self) -> BlobStoreFile {
        BlobStoreFile::from_path(self.join("blobs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_paths_nest_under_the_root() {
        let root = ConglomerateRoot::from_path("/var/lib/rdbcore/mydb");
        assert_eq!(
            root.table_data_file(TableId::new(42)).as_ref(),
            Path::new("/var/lib/rdbcore/mydb/42.data")
        );
        assert_eq!(
            root.state_store_file().as_ref(),
            Path::new("/var/lib/rdbcore/mydb/state_store")
        );
    }
}
