//! Bit-exact on-disk encodings: a table's `DataIndexSetDef` and the
//! encoded table file name.

use rdbcore_primitives::ColId;
use rdbcore_sats::buffer::{BufReader, BufWriter, DecodeError};

/// One index over a table: a name and its (possibly multi-) column list.
/// The wire format doesn't name an index "kind" beyond this, so every
/// index here is an ordered column-list index (the only kind `IndexSet`
/// implements).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DataIndexDef {
    pub name: String,
    pub columns: Vec<ColId>,
}

/// The set of indices declared over one table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DataIndexSetDef {
    pub schema_name: String,
    pub table_name: String,
    pub indexes: Vec<DataIndexDef>,
}

const VERSION: i32 = 1;

fn put_str(out: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    out.put_i32(bytes.len() as i32);
    out.put_slice(bytes);
}

fn get_str<'a>(reader: &mut impl BufReader<'a>) -> Result<String, DecodeError> {
    let len = reader.get_i32()? as usize;
    let bytes = reader.get_slice(len)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidTag {
        what: "DataIndexSetDef string",
        tag: 0,
    })
}

impl DataIndexSetDef {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.put_i32(VERSION);
        put_str(out, &self.schema_name);
        put_str(out, &self.table_name);
        out.put_i32(self.indexes.len() as i32);
        for index in &self.indexes {
            put_str(out, &index.name);
            out.put_i32(index.columns.len() as i32);
            for col in &index.columns {
                out.put_i32(col.raw() as i32);
            }
        }
    }

    pub fn decode<'a>(reader: &mut impl BufReader<'a>) -> Result<Self, DecodeError> {
        let version = reader.get_i32()?;
        if version != VERSION {
            return Err(DecodeError::InvalidTag {
                what: "DataIndexSetDef version",
                tag: version as u32,
            });
        }
        let schema_name = get_str(reader)?;
        let table_name = get_str(reader)?;
        let count = reader.get_i32()? as usize;
        let mut indexes = Vec::with_capacity(count);
        for _ in 0..count {
            let name = get_str(reader)?;
            let col_count = reader.get_i32()? as usize;
            let mut columns = Vec::with_capacity(col_count);
            for _ in 0..col_count {
                columns.push(ColId::new(reader.get_i32()? as u16));
            }
            indexes.push(DataIndexDef { name, columns });
        }
        Ok(Self {
            schema_name,
            table_name,
            indexes,
        })
    }
}

/// The two on-disk table-file format versions a table file name may carry.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TableFileVersion {
    V1,
    V2,
}

impl TableFileVersion {
    fn as_char(self) -> char {
        match self {
            TableFileVersion::V1 => '1',
            TableFileVersion::V2 => '2',
        }
    }
}

/// Encodes a table's state-store file name: `':' + version_char +
/// source_ident`.
pub fn encode_table_file_name(version: TableFileVersion, source_ident: &str) -> String {
    format!(":{}{}", version.as_char(), source_ident)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_set_def_roundtrips() {
        let def = DataIndexSetDef {
            schema_name: "public".to_owned(),
            table_name: "customer".to_owned(),
            indexes: vec![
                DataIndexDef {
                    name: "customer_id_idx".to_owned(),
                    columns: vec![ColId::new(0)],
                },
                DataIndexDef {
                    name: "customer_name_city_idx".to_owned(),
                    columns: vec![ColId::new(1), ColId::new(2)],
                },
            ],
        };
        let mut buf = Vec::new();
        def.encode(&mut buf);
        let mut cur = rdbcore_sats::buffer::Cursor::new(&buf);
        let decoded = DataIndexSetDef::decode(&mut cur).unwrap();
        assert_eq!(decoded, def);
        assert_eq!(cur.remaining(), 0);
    }

    #[test]
    fn table_file_name_matches_the_pinned_format() {
        assert_eq!(encode_table_file_name(TableFileVersion::V1, "7-customer"), ":17-customer");
        assert_eq!(encode_table_file_name(TableFileVersion::V2, "7-customer"), ":27-customer");
    }
}
