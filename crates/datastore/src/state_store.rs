//! The durable root record of which master tables are visible and which
//! are pending deletion.
//!
//! Persisted as a single encoded area inside the conglomerate's shared
//! `Store`; its area id is rooted in the store's 64-byte fixed header area
//! so a reopen can find it.

use std::sync::Arc;

use rdbcore_block_store::{AreaId, Store, StoreError};
use rdbcore_primitives::{ColId, TableId};
use rdbcore_sats::buffer::{BufReader, BufWriter, Cursor, DecodeError};
use rdbcore_schema::encoding::{encode_table_file_name, TableFileVersion};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Everything needed to reopen one `MasterTable` plus its catalog
/// identity. The file-name encoding itself is cosmetic here (there is no
/// actual per-table file — every table's extents live in the one shared
/// `Store`) but is carried verbatim since it's the bit-exact encoded
/// table file name format.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TableCatalogEntry {
    pub table_id: TableId,
    pub schema_name: String,
    pub table_name: String,
    pub rows_header: AreaId,
    pub sector_area: AreaId,
    pub data_sector_size: u32,
    pub indexed_columns: Vec<ColId>,
}

impl TableCatalogEntry {
    /// The `':' + version_char + source_ident` file name, derived from
    /// this entry's qualified name.
    pub fn encoded_file_name(&self) -> String {
        let source_ident = format!("{}.{}", self.schema_name, self.table_name);
        encode_table_file_name(TableFileVersion::V2, &source_ident)
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.put_i32(self.table_id.raw() as i32);
        put_str(out, &self.schema_name);
        put_str(out, &self.table_name);
        out.put_i64(self.rows_header.0);
        out.put_i64(self.sector_area.0);
        out.put_i32(self.data_sector_size as i32);
        out.put_i32(self.indexed_columns.len() as i32);
        for col in &self.indexed_columns {
            out.put_i32(col.raw() as i32);
        }
    }

    fn decode<'a>(reader: &mut impl BufReader<'a>) -> Result<Self, DecodeError> {
        let table_id = TableId::new(reader.get_i32()? as u32);
        let schema_name = get_str(reader)?;
        let table_name = get_str(reader)?;
        let rows_header = AreaId(reader.get_i64()?);
        let sector_area = AreaId(reader.get_i64()?);
        let data_sector_size = reader.get_i32()? as u32;
        let n_indexed = reader.get_i32()? as usize;
        let mut indexed_columns = Vec::with_capacity(n_indexed);
        for _ in 0..n_indexed {
            indexed_columns.push(ColId::new(reader.get_i32()? as u16));
        }
        Ok(Self {
            table_id,
            schema_name,
            table_name,
            rows_header,
            sector_area,
            data_sector_size,
            indexed_columns,
        })
    }
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    out.put_i32(bytes.len() as i32);
    out.put_slice(bytes);
}

fn get_str<'a>(reader: &mut impl BufReader<'a>) -> Result<String, DecodeError> {
    let len = reader.get_i32()? as usize;
    let bytes = reader.get_slice(len)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidTag {
        what: "TableCatalogEntry string",
        tag: 0,
    })
}

const VERSION: i32 = 2;

/// The durable `{visible, deleted}` table lists, plus the high-water
/// commit id as of the last commit that touched this state store.
pub struct StateStore {
    store: Arc<dyn Store>,
    area: AreaId,
    visible: Vec<TableCatalogEntry>,
    deleted: Vec<TableCatalogEntry>,
    commit_id: u64,
}

impl StateStore {
    /// Allocates a fresh, empty state store area and returns its id (to be
    /// rooted in the conglomerate's fixed header area).
    pub fn create(store: &Arc<dyn Store>) -> Result<AreaId, Error> {
        let area = store.create_area(0)?;
        let this = Self {
            store: Arc::clone(store),
            area,
            visible: Vec::new(),
            deleted: Vec::new(),
            commit_id: 0,
        };
        this.persist()?;
        Ok(area)
    }

    /// Reopens an existing state store from its area id.
    pub fn open(store: Arc<dyn Store>, area: AreaId) -> Result<Self, Error> {
        let mut cursor = store.mutable_area(area)?;
        let mut bytes = vec![0u8; cursor.len() as usize];
        cursor.read(&mut bytes)?;
        let mut reader = Cursor::new(&bytes);
        let version = reader.get_i32()?;
        if version != VERSION {
            return Err(Error::Decode(DecodeError::InvalidTag {
                what: "StateStore version",
                tag: version as u32,
            }));
        }
        let visible = decode_list(&mut reader)?;
        let deleted = decode_list(&mut reader)?;
        let commit_id = reader.get_i64()? as u64;
        Ok(Self { store, area, visible, deleted, commit_id })
    }

    pub fn visible(&self) -> &[TableCatalogEntry] {
        &self.visible
    }

    pub fn deleted(&self) -> &[TableCatalogEntry] {
        &self.deleted
    }

    /// The durable high-water commit id, as of the last call to
    /// [`Self::commit`] before this state store was last persisted.
    pub fn commit_id(&self) -> u64 {
        self.commit_id
    }

    /// Atomically replaces both lists and the commit id with a single
    /// write. Callers hold the conglomerate's commit lock for the
    /// duration of this call.
    pub fn commit(&mut self, visible: Vec<TableCatalogEntry>, deleted: Vec<TableCatalogEntry>, commit_id: u64) -> Result<(), Error> {
        self.visible = visible;
        self.deleted = deleted;
        self.commit_id = commit_id;
        self.persist()
    }

    fn persist(&self) -> Result<(), Error> {
        let mut bytes = Vec::new();
        bytes.put_i32(VERSION);
        encode_list(&mut bytes, &self.visible);
        encode_list(&mut bytes, &self.deleted);
        bytes.put_i64(self.commit_id as i64);
        let mut cursor = self.store.mutable_area(self.area)?;
        cursor.truncate(bytes.len() as u64)?;
        cursor.set_position(0);
        cursor.write(&bytes)?;
        cursor.check_out()?;
        Ok(())
    }
}

fn encode_list(out: &mut Vec<u8>, entries: &[TableCatalogEntry]) {
    out.put_i32(entries.len() as i32);
    for entry in entries {
        entry.encode(out);
    }
}

fn decode_list<'a>(reader: &mut impl BufReader<'a>) -> Result<Vec<TableCatalogEntry>, DecodeError> {
    let count = reader.get_i32()? as usize;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        entries.push(TableCatalogEntry::decode(reader)?);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdbcore_block_store::memory::Memory;

    fn sample_entry(id: u32) -> TableCatalogEntry {
        TableCatalogEntry {
            table_id: TableId::new(id),
            schema_name: "public".to_owned(),
            table_name: format!("t{id}"),
            rows_header: AreaId(10 + id as i64),
            sector_area: AreaId(20 + id as i64),
            data_sector_size: 2048,
            indexed_columns: vec![ColId::new(0)],
        }
    }

    #[test]
    fn round_trips_through_reopen() {
        let store: Arc<dyn Store> = Arc::new(Memory::new());
        let area = StateStore::create(&store).unwrap();
        let mut state = StateStore::open(Arc::clone(&store), area).unwrap();
        state.commit(vec![sample_entry(16)], vec![sample_entry(17)], 42).unwrap();

        let reopened = StateStore::open(store, area).unwrap();
        assert_eq!(reopened.visible(), &[sample_entry(16)]);
        assert_eq!(reopened.deleted(), &[sample_entry(17)]);
        assert_eq!(reopened.commit_id(), 42);
    }

    #[test]
    fn encoded_file_name_matches_the_pinned_format() {
        let entry = sample_entry(16);
        assert_eq!(entry.encoded_file_name(), ":2public.t16");
    }
}
