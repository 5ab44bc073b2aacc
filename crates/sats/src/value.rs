//! The tagged union every cell in the storage core holds.

use rdbcore_primitives::BlobRef;

/// The state of a [`Numeric`] value, mirroring the special states a
/// `BigDecimal`-like column type needs beyond "a number": SQL `NaN` and the
/// two signed infinities used by some aggregate expressions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NumericState {
    #[default]
    Number,
    NaN,
    NegativeInfinity,
    PositiveInfinity,
}

impl NumericState {
    pub(crate) fn to_tag(self) -> u8 {
        match self {
            NumericState::Number => 0,
            NumericState::NaN => 1,
            NumericState::NegativeInfinity => 2,
            NumericState::PositiveInfinity => 3,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(NumericState::Number),
            1 => Some(NumericState::NaN),
            2 => Some(NumericState::NegativeInfinity),
            3 => Some(NumericState::PositiveInfinity),
            _ => None,
        }
    }
}

/// An arbitrary-precision decimal: `sign * magnitude * 10^-scale`, plus the
/// non-finite states `NumericState` above covers.
///
/// `magnitude` is the big-endian two's-complement encoding of the unscaled
/// value (so the sign is folded into the magnitude itself, matching the
/// on-disk payload format); it is empty for any non-`Number` state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Numeric {
    pub state: NumericState,
    pub scale: i16,
    pub magnitude: Vec<u8>,
}

impl Numeric {
    pub fn from_i64(value: i64) -> Self {
        Self {
            state: NumericState::Number,
            scale: 0,
            magnitude: value.to_be_bytes().to_vec(),
        }
    }

    pub fn nan() -> Self {
        Self {
            state: NumericState::NaN,
            scale: 0,
            magnitude: Vec::new(),
        }
    }
}

/// The dynamic cell value type: every column, whatever its declared SQL
/// type, ultimately holds one of these.
///
/// `Binary`/`Object` hold a reference into the `BlobStore` rather than the
/// bytes themselves; the row never carries large payloads inline (see
/// DESIGN.md for how this reconciles with the cell wire format's
/// length-prefixed `Binary`/`Object` payload, which describes how the blob
/// store itself persists the bytes a `BlobRef` points at).
#[derive(Clone, Debug, PartialEq)]
pub enum TObject {
    Null,
    Boolean(bool),
    I64(i64),
    Numeric(Numeric),
    String(String),
    Date(i64),
    Binary(BlobRef),
    Object(BlobRef, u32),
}

impl TObject {
    pub fn is_null(&self) -> bool {
        matches!(self, TObject::Null)
    }

    /// The payload type tag this value would be encoded with, carried in
    /// the low 12 bits of the cell flags word. `Null` has no payload of
    /// its own; callers that need a type tag for a `Null` cell take it from
    /// the column's declared type instead.
    pub fn type_tag(&self) -> Option<u16> {
        match self {
            TObject::Null => None,
            TObject::Boolean(_) => Some(crate::codec::TYPE_BOOLEAN),
            TObject::I64(_) => Some(crate::codec::TYPE_I64),
            TObject::Numeric(_) => Some(crate::codec::TYPE_NUMERIC),
            TObject::String(_) => Some(crate::codec::TYPE_STRING),
            TObject::Date(_) => Some(crate::codec::TYPE_DATE),
            TObject::Binary(_) => Some(crate::codec::TYPE_BINARY),
            TObject::Object(..) => Some(crate::codec::TYPE_OBJECT),
        }
    }
}

impl From<bool> for TObject {
    fn from(v: bool) -> Self {
        TObject::Boolean(v)
    }
}

impl From<i64> for TObject {
    fn from(v: i64) -> Self {
        TObject::I64(v)
    }
}

impl From<String> for TObject {
    fn from(v: String) -> Self {
        TObject::String(v)
    }
}

impl From<&str> for TObject {
    fn from(v: &str) -> Self {
        TObject::String(v.to_owned())
    }
}
