//! Small collection helpers shared by the storage core, kept separate from
//! any one layer so `table`, `schema` and `datastore` can all depend on
//! them without depending on each other.

pub mod unique_multi_map;

pub use unique_multi_map::UniqueMultiMap;
