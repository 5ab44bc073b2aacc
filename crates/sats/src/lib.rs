//! Cell values and their bit-exact on-disk wire format.
//!
//! Everything else in the workspace that needs to read or write a cell goes
//! through [`TObject`] and [`codec::encode_cell`]/[`codec::decode_cell`];
//! nothing above this crate hand-rolls byte layout.

pub mod buffer;
pub mod codec;
pub mod value;

pub use codec::{decode_cell, encode_cell, index_key_bytes};
pub use value::{Numeric, NumericState, TObject};
