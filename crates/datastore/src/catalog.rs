//! Loads PRIMARY KEY / UNIQUE / FOREIGN KEY / CHECK definitions out of the
//! `SYS_INFO.*` system tables.
//!
//! Definitions are read fresh on every call rather than cached: the system
//! tables are small, and reading live means a constraint created earlier in
//! the same transaction (not yet committed, but already physically present
//! as `UncommittedAdded` rows once its own DDL helper runs) is picked up the
//! moment that helper's row becomes visible — no separate cache-invalidation
//! path to keep in sync with the commit protocol.
//!
//! Every function here takes `&Inner` directly rather than `&Conglomerate`:
//! both call sites (`Conglomerate::check_immediate_add`/`_remove` and the
//! commit protocol) already hold `Conglomerate`'s one lock when they need
//! this, and `Mutex` isn't reentrant.

use rdbcore_primitives::{ColList, ConstraintId, TableId};
use rdbcore_sats::TObject;
use rdbcore_schema::constraint::Deferrable;
use rdbcore_schema::system;
use rdbcore_schema::{CheckDef, DataTableDef, ForeignKeyDef, PrimaryKeyDef, UniqueDef};

use crate::conglomerate::Inner;
use crate::constraint_engine::{AddConstraints, RemoveConstraints};
use crate::error::Error;

fn i64_of(v: &TObject) -> Result<i64, Error> {
    match v {
        TObject::I64(n) => Ok(*n),
        other => Err(Error::AssertionFailure(format!("SYS_INFO row held a non-I64 value where an I64 was expected: {other:?}"))),
    }
}

fn str_of(v: &TObject) -> Result<String, Error> {
    match v {
        TObject::String(s) => Ok(s.clone()),
        other => Err(Error::AssertionFailure(format!("SYS_INFO row held a non-String value where a String was expected: {other:?}"))),
    }
}

fn bin_of(inner: &Inner, v: &TObject) -> Result<Vec<u8>, Error> {
    match v {
        TObject::Binary(reference) => inner.blob_bytes(*reference),
        other => Err(Error::AssertionFailure(format!("SYS_INFO row held a non-Binary value where a Binary was expected: {other:?}"))),
    }
}

fn deferred_of(v: &TObject) -> Result<Deferrable, Error> {
    Ok(match i64_of(v)? {
        0 => Deferrable::NotDeferrable,
        1 => Deferrable::InitiallyImmediate,
        _ => Deferrable::InitiallyDeferred,
    })
}

fn scan(inner: &Inner, table: TableId) -> Result<Vec<Vec<TObject>>, Error> {
    Ok(inner.row_tuples(table, inner.current_commit_id())?.into_iter().map(|(_, cells)| cells).collect())
}

fn col_names_for(inner: &Inner, column_table: TableId, id_col: usize, name_col: usize, seq_col: usize, id: i64) -> Result<Vec<String>, Error> {
    let mut rows: Vec<Vec<TObject>> = Vec::new();
    for row in scan(inner, column_table)? {
        if i64_of(&row[id_col])? == id {
            rows.push(row);
        }
    }
    let mut keyed = Vec::with_capacity(rows.len());
    for row in rows {
        keyed.push((i64_of(&row[seq_col])?, row));
    }
    keyed.sort_by_key(|(seq, _)| *seq);
    keyed.into_iter().map(|(_, row)| str_of(&row[name_col])).collect()
}

fn col_list_from_names(schema: &DataTableDef, names: &[String]) -> Result<ColList, Error> {
    names
        .iter()
        .map(|n| {
            schema
                .column_id(n)
                .map_err(|_| Error::AssertionFailure(format!("SYS_INFO column name '{n}' refers to a column that no longer exists")))
        })
        .collect()
}

fn fk_column_names(inner: &Inner, fk_id: i64, referenced_side: bool) -> Result<Vec<String>, Error> {
    let mut rows: Vec<Vec<TObject>> = Vec::new();
    for row in scan(inner, system::FOREIGN_COLUMNS)? {
        if i64_of(&row[0])? == fk_id {
            rows.push(row);
        }
    }
    let mut keyed = Vec::with_capacity(rows.len());
    for row in rows {
        keyed.push((i64_of(&row[3])?, row));
    }
    keyed.sort_by_key(|(seq, _)| *seq);
    let idx = if referenced_side { 2 } else { 1 };
    keyed.into_iter().map(|(_, row)| str_of(&row[idx])).collect()
}

/// PK / UK / outbound-FK / CHECK definitions for `table`.
pub fn load_add_constraints(inner: &Inner, table: TableId, schema: &DataTableDef) -> Result<AddConstraints, Error> {
    let mut constraints = AddConstraints::default();

    for row in scan(inner, system::PKEY_INFO)? {
        if TableId::new(i64_of(&row[3])? as u32) != table {
            continue;
        }
        let id = i64_of(&row[0])?;
        let names = col_names_for(inner, system::PRIMARY_COLUMNS, 0, 1, 2, id)?;
        constraints.primary_key = Some(PrimaryKeyDef {
            id: ConstraintId::new(id as u32),
            name: str_of(&row[1])?,
            schema: str_of(&row[2])?,
            table,
            columns: col_list_from_names(schema, &names)?,
            deferred: deferred_of(&row[4])?,
        });
        break;
    }

    for row in scan(inner, system::UNIQUE_INFO)? {
        if TableId::new(i64_of(&row[3])? as u32) != table {
            continue;
        }
        let id = i64_of(&row[0])?;
        let names = col_names_for(inner, system::UNIQUE_COLUMNS, 0, 1, 2, id)?;
        constraints.uniques.push(UniqueDef {
            id: ConstraintId::new(id as u32),
            name: str_of(&row[1])?,
            schema: str_of(&row[2])?,
            table,
            columns: col_list_from_names(schema, &names)?,
            deferred: deferred_of(&row[4])?,
        });
    }

    for row in scan(inner, system::FKEY_INFO)? {
        if TableId::new(i64_of(&row[3])? as u32) != table {
            continue;
        }
        let id = i64_of(&row[0])?;
        let ref_table = TableId::new(i64_of(&row[5])? as u32);
        let fk_names = fk_column_names(inner, id, false)?;
        let ref_names = fk_column_names(inner, id, true)?;
        let ref_schema = inner.schema_of(ref_table)?;
        let fk = ForeignKeyDef::new(
            ConstraintId::new(id as u32),
            str_of(&row[1])?,
            str_of(&row[2])?,
            table,
            col_list_from_names(schema, &fk_names)?,
            str_of(&row[4])?,
            ref_table,
            col_list_from_names(&ref_schema, &ref_names)?,
            &str_of(&row[6])?,
            &str_of(&row[7])?,
            deferred_of(&row[8])?,
        )?;
        constraints.foreign_keys.push(fk);
    }

    for row in scan(inner, system::CHECK_INFO)? {
        if TableId::new(i64_of(&row[3])? as u32) != table {
            continue;
        }
        constraints.checks.push(CheckDef {
            id: ConstraintId::new(i64_of(&row[0])? as u32),
            name: str_of(&row[1])?,
            schema: str_of(&row[2])?,
            table,
            expression: str_of(&row[4])?,
            serialized_expression: bin_of(inner, &row[6])?,
            deferred: deferred_of(&row[5])?,
        });
    }

    Ok(constraints)
}

/// Every FOREIGN KEY naming `table` as its referenced table, consulted on
/// the remove side to block a delete with live referencing rows.
pub fn load_remove_constraints(inner: &Inner, table: TableId) -> Result<RemoveConstraints, Error> {
    let mut constraints = RemoveConstraints::default();
    for row in scan(inner, system::FKEY_INFO)? {
        let ref_table = TableId::new(i64_of(&row[5])? as u32);
        if ref_table != table {
            continue;
        }
        let id = i64_of(&row[0])?;
        let owner = TableId::new(i64_of(&row[3])? as u32);
        let owner_schema = inner.schema_of(owner)?;
        let ref_schema = inner.schema_of(table)?;
        let fk_names = fk_column_names(inner, id, false)?;
        let ref_names = fk_column_names(inner, id, true)?;
        let fk = ForeignKeyDef::new(
            ConstraintId::new(id as u32),
            str_of(&row[1])?,
            str_of(&row[2])?,
            owner,
            col_list_from_names(&owner_schema, &fk_names)?,
            str_of(&row[4])?,
            table,
            col_list_from_names(&ref_schema, &ref_names)?,
            &str_of(&row[6])?,
            &str_of(&row[7])?,
            deferred_of(&row[8])?,
        )?;
        constraints.inbound_foreign_keys.push(fk);
    }
    Ok(constraints)
}
