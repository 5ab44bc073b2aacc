//! A single column's declared type, nullability and default.

use rdbcore_sats::codec;

/// The payload type a column's cells are encoded with, carried as the low
/// 12 bits of the cell wire format's type tag.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ColumnType {
    Boolean,
    I64,
    Numeric,
    String,
    Date,
    Binary,
    Object,
}

impl ColumnType {
    /// The type tag this column's cells are encoded with on disk.
    pub fn wire_tag(self) -> u16 {
        match self {
            ColumnType::Boolean => codec::TYPE_BOOLEAN,
            ColumnType::I64 => codec::TYPE_I64,
            ColumnType::Numeric => codec::TYPE_NUMERIC,
            ColumnType::String => codec::TYPE_STRING,
            ColumnType::Date => codec::TYPE_DATE,
            ColumnType::Binary => codec::TYPE_BINARY,
            ColumnType::Object => codec::TYPE_OBJECT,
        }
    }

    /// Recovers a `ColumnType` from a persisted wire tag, e.g. when
    /// reconstructing a column's declared type from a catalog row.
    pub fn from_wire_tag(tag: u16) -> Option<Self> {
        match tag {
            codec::TYPE_BOOLEAN => Some(ColumnType::Boolean),
            codec::TYPE_I64 => Some(ColumnType::I64),
            codec::TYPE_NUMERIC => Some(ColumnType::Numeric),
            codec::TYPE_STRING => Some(ColumnType::String),
            codec::TYPE_DATE => Some(ColumnType::Date),
            codec::TYPE_BINARY => Some(ColumnType::Binary),
            codec::TYPE_OBJECT => Some(ColumnType::Object),
            _ => None,
        }
    }
}

/// One column of a [`crate::DataTableDef`].
///
/// `default_expression` is an opaque, already-serialized expression handed
/// to the `ExpressionEvaluator` collaborator when a row omits this column;
/// this crate never interprets it.
#[derive(Clone, Debug)]
pub struct ColumnDef {
    pub name: String,
    pub col_type: ColumnType,
    pub nullable: bool,
    pub default_expression: Option<Vec<u8>>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, col_type: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            col_type,
            nullable,
            default_expression: None,
        }
    }

    pub fn with_default(mut self, expression: Vec<u8>) -> Self {
        self.default_expression = Some(expression);
        self
    }
}
