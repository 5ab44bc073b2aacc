//! The `SYS_INFO.*` system table layouts that hold every
//! constraint, sequence and schema-change fact the core itself persists.
//!
//! Table ids `0..SYSTEM_TABLE_ID_RANGE_END` are reserved for these; a
//! freshly created `Conglomerate` installs exactly these tables before any
//! user table can be created.

use rdbcore_primitives::TableId;

use crate::column::{ColumnDef, ColumnType};
use crate::table_def::DataTableDef;

const SCHEMA: &str = "SYS_INFO";

fn col(name: &str, ty: ColumnType, nullable: bool) -> ColumnDef {
    ColumnDef::new(name, ty, nullable)
}

fn not_null(name: &str, ty: ColumnType) -> ColumnDef {
    col(name, ty, false)
}

fn nullable(name: &str, ty: ColumnType) -> ColumnDef {
    col(name, ty, true)
}

macro_rules! system_tables {
    ($($id:expr => $name:ident($table:expr) { $($col:expr),+ $(,)? }),+ $(,)?) => {
        $(
            pub const $name: TableId = TableId::new($id);
        )+

        /// Every system table's id and schema, in table-id order. Installed
        /// verbatim by a freshly created `Conglomerate`.
        pub fn system_table_defs() -> Vec<(TableId, DataTableDef)> {
            vec![
                $(
                    ($name, DataTableDef::new(SCHEMA, $table, vec![$($col),+])),
                )+
            ]
        }
    };
}

system_tables! {
    0 => SCHEMA_INFO("SchemaInfo") {
        not_null("id", ColumnType::I64),
        not_null("name", ColumnType::String),
        not_null("type", ColumnType::String),
        nullable("other", ColumnType::String),
    },
    1 => DATABASE_VARS("DatabaseVars") {
        not_null("variable", ColumnType::String),
        not_null("value", ColumnType::String),
    },
    2 => FOREIGN_COLUMNS("ForeignColumns") {
        not_null("fk_id", ColumnType::I64),
        not_null("fcolumn", ColumnType::String),
        not_null("pcolumn", ColumnType::String),
        not_null("seq_no", ColumnType::I64),
    },
    3 => UNIQUE_COLUMNS("UniqueColumns") {
        not_null("un_id", ColumnType::I64),
        not_null("column", ColumnType::String),
        not_null("seq_no", ColumnType::I64),
    },
    4 => PRIMARY_COLUMNS("PrimaryColumns") {
        not_null("pk_id", ColumnType::I64),
        not_null("column", ColumnType::String),
        not_null("seq_no", ColumnType::I64),
    },
    5 => CHECK_INFO("CheckInfo") {
        not_null("id", ColumnType::I64),
        not_null("name", ColumnType::String),
        not_null("schema", ColumnType::String),
        not_null("table", ColumnType::I64),
        not_null("expression", ColumnType::String),
        not_null("deferred", ColumnType::I64),
        not_null("serialized_expression", ColumnType::Binary),
    },
    6 => UNIQUE_INFO("UniqueInfo") {
        not_null("id", ColumnType::I64),
        not_null("name", ColumnType::String),
        not_null("schema", ColumnType::String),
        not_null("table", ColumnType::I64),
        not_null("deferred", ColumnType::I64),
    },
    7 => FKEY_INFO("FKeyInfo") {
        not_null("id", ColumnType::I64),
        not_null("name", ColumnType::String),
        not_null("schema", ColumnType::String),
        not_null("table", ColumnType::I64),
        not_null("ref_schema", ColumnType::String),
        not_null("ref_table", ColumnType::I64),
        not_null("update_rule", ColumnType::String),
        not_null("delete_rule", ColumnType::String),
        not_null("deferred", ColumnType::I64),
    },
    8 => PKEY_INFO("PKeyInfo") {
        not_null("id", ColumnType::I64),
        not_null("name", ColumnType::String),
        not_null("schema", ColumnType::String),
        not_null("table", ColumnType::I64),
        not_null("deferred", ColumnType::I64),
    },
    9 => SEQUENCE_INFO("SequenceInfo") {
        not_null("id", ColumnType::I64),
        not_null("schema", ColumnType::String),
        not_null("name", ColumnType::String),
        not_null("type", ColumnType::String),
    },
    10 => SEQUENCE("Sequence") {
        not_null("seq_id", ColumnType::I64),
        not_null("last_value", ColumnType::I64),
        not_null("increment", ColumnType::I64),
        not_null("minvalue", ColumnType::I64),
        not_null("maxvalue", ColumnType::I64),
        not_null("start", ColumnType::I64),
        not_null("cache", ColumnType::I64),
        not_null("cycle", ColumnType::Boolean),
    },
    11 => SCHEMA_COLUMNS("SchemaColumns") {
        not_null("table", ColumnType::I64),
        not_null("seq_no", ColumnType::I64),
        not_null("name", ColumnType::String),
        not_null("type", ColumnType::I64),
        not_null("nullable", ColumnType::Boolean),
        nullable("default_expression", ColumnType::Binary),
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_system_table_id_is_below_the_reserved_range() {
        for (id, _) in system_table_defs() {
            assert!(id.raw() < rdbcore_primitives::SYSTEM_TABLE_ID_RANGE_END);
        }
    }

    #[test]
    fn system_table_ids_are_distinct() {
        let defs = system_table_defs();
        let mut ids: Vec<_> = defs.iter().map(|(id, _)| id.raw()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), defs.len());
    }
}
