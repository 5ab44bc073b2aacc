//! A table's schema: its qualified name and ordered column list.

use rdbcore_primitives::ColId;

use crate::column::ColumnDef;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("column '{0}' does not exist")]
    NoSuchColumn(String),
}

/// A physical table's schema.
#[derive(Clone, Debug)]
pub struct DataTableDef {
    pub schema_name: String,
    pub table_name: String,
    columns: Vec<ColumnDef>,
}

impl DataTableDef {
    pub fn new(schema_name: impl Into<String>, table_name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            schema_name: schema_name.into(),
            table_name: table_name.into(),
            columns,
        }
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, col: ColId) -> &ColumnDef {
        &self.columns[col.raw() as usize]
    }

    pub fn column_id(&self, name: &str) -> Result<ColId, Error> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .map(|i| ColId::new(i as u16))
            .ok_or_else(|| Error::NoSuchColumn(name.to_owned()))
    }

    /// A new schema with `columns` appended — the additive half of
    /// `alter_table`'s drop+create+copy-by-column-name semantics.
    pub fn with_columns_added(&self, extra: Vec<ColumnDef>) -> Self {
        let mut columns = self.columns.clone();
        columns.extend(extra);
        Self {
            schema_name: self.schema_name.clone(),
            table_name: self.table_name.clone(),
            columns,
        }
    }
}
