//! PK/UK/FK/CHECK evaluation against a "check view" handed to it by the
//! commit protocol.
//!
//! This module is deliberately decoupled from `Conglomerate`/`Transaction`:
//! every function here takes the constraint definitions and a small set of
//! closures for reading cells and resolving references, so it can be
//! tested without spinning up a whole conglomerate. `Conglomerate` is the
//! only caller; it owns loading the definitions out of the `SYS_INFO.*`
//! system tables and supplies the closures over its own table map.
//!
//! Multi-column PK/UK/FK groups are checked by reading the full column
//! tuple and scanning the table's check-view row set, rather than through
//! `IndexSet` (which only indexes one column at a time) — see DESIGN.md.

use rdbcore_primitives::{RowId, TableId};
use rdbcore_sats::TObject;
use rdbcore_schema::constraint::Deferrable;
use rdbcore_schema::{CheckDef, ForeignKeyDef, PrimaryKeyDef, UniqueDef};
use rdbcore_schema::table_def::DataTableDef;

use crate::error::{ConstraintViolation, Error};

/// The check-constraint collaborator: evaluates an opaque, pre-serialized
/// expression against a row. Neither this crate nor any crate below it
/// interprets the expression bytes.
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(&self, expression: &[u8], row: &RowVariableResolver<'_>) -> TObject;
}

/// Binds a CHECK expression's column references to one row's cells.
pub struct RowVariableResolver<'a> {
    pub schema: &'a DataTableDef,
    pub cells: &'a [TObject],
}

impl<'a> RowVariableResolver<'a> {
    pub fn column(&self, name: &str) -> Option<&TObject> {
        let col = self.schema.column_id(name).ok()?;
        self.cells.get(col.raw() as usize)
    }
}

/// An `ExpressionEvaluator` that never rejects a row: every expression
/// evaluates to `Null`, which the CHECK rule treats as a pass. Used where
/// no real expression evaluator collaborator has been wired in (e.g.
/// tests, or a conglomerate opened purely for schema/DDL work).
pub struct NullEvaluator;

impl ExpressionEvaluator for NullEvaluator {
    fn evaluate(&self, _expression: &[u8], _row: &RowVariableResolver<'_>) -> TObject {
        TObject::Null
    }
}

/// Constraint definitions relevant to one table's add-constraint check
/// (PK, UK, outbound FK, CHECK) — already filtered from the `SYS_INFO.*`
/// rows by the caller.
#[derive(Default)]
pub struct AddConstraints {
    pub primary_key: Option<PrimaryKeyDef>,
    pub uniques: Vec<UniqueDef>,
    pub foreign_keys: Vec<ForeignKeyDef>,
    pub checks: Vec<CheckDef>,
}

/// Every foreign key referencing this table, for the remove-constraint
/// check.
#[derive(Default)]
pub struct RemoveConstraints {
    pub inbound_foreign_keys: Vec<ForeignKeyDef>,
}

fn tuple_of(cells: &[TObject], columns: &[rdbcore_primitives::ColId]) -> Vec<TObject> {
    columns.iter().map(|c| cells[c.raw() as usize].clone()).collect()
}

fn tuple_has_null(tuple: &[TObject]) -> bool {
    tuple.iter().any(TObject::is_null)
}

fn tuples_equal(a: &[TObject], b: &[TObject]) -> bool {
    a == b
}

/// Runs PK / UK / FK-outbound / CHECK for one freshly added row set on one
/// table.
///
/// `deferred_only` restricts the check to constraints whose `Deferrable`
/// is `InitiallyDeferred` (used for the commit-time pass, which must check
/// deferred constraints that per-row immediate checks already skipped);
/// pass `false` during an immediate, single-row check to run only
/// non-deferred constraints.
#[allow(clippy::too_many_arguments)]
pub fn check_add(
    evaluator: &dyn ExpressionEvaluator,
    table: TableId,
    schema: &DataTableDef,
    constraints: &AddConstraints,
    added_rows: &[(RowId, Vec<TObject>)],
    view_rows: &[(RowId, Vec<TObject>)],
    fk_target_has_match: impl Fn(&ForeignKeyDef, &[TObject]) -> Result<bool, Error>,
    only_immediate: bool,
) -> Result<(), Error> {
    let wants = |d: Deferrable| if only_immediate { !d.is_deferred_by_default() } else { d.is_deferred_by_default() };

    if let Some(pk) = &constraints.primary_key {
        if wants(pk.deferred) {
            for (row, cells) in added_rows {
                let tuple = tuple_of(cells, pk.columns.as_slice());
                if tuple_has_null(&tuple) {
                    let col = pk
                        .columns
                        .as_slice()
                        .iter()
                        .find(|c| cells[c.raw() as usize].is_null())
                        .expect("tuple_has_null implies some column is null");
                    return Err(ConstraintViolation::NullableViolation {
                        table,
                        column: schema.column(*col).name.clone(),
                        constraint: pk.name.clone(),
                    }
                    .into());
                }
                let duplicate = view_rows.iter().any(|(other, other_cells)| {
                    other != row && tuples_equal(&tuple_of(other_cells, pk.columns.as_slice()), &tuple)
                });
                if duplicate {
                    return Err(ConstraintViolation::PrimaryKeyViolation {
                        table,
                        constraint: pk.name.clone(),
                    }
                    .into());
                }
            }
        }
    }

    for uk in &constraints.uniques {
        if !wants(uk.deferred) {
            continue;
        }
        for (row, cells) in added_rows {
            let tuple = tuple_of(cells, uk.columns.as_slice());
            if tuple_has_null(&tuple) {
                continue;
            }
            let duplicate = view_rows
                .iter()
                .any(|(other, other_cells)| other != row && tuples_equal(&tuple_of(other_cells, uk.columns.as_slice()), &tuple));
            if duplicate {
                return Err(ConstraintViolation::UniqueViolation {
                    table,
                    constraint: uk.name.clone(),
                }
                .into());
            }
        }
    }

    for fk in &constraints.foreign_keys {
        if !wants(fk.deferred) {
            continue;
        }
        for (_, cells) in added_rows {
            let tuple = tuple_of(cells, fk.columns.as_slice());
            if tuple_has_null(&tuple) {
                continue;
            }
            if !fk_target_has_match(fk, &tuple)? {
                return Err(ConstraintViolation::ForeignKeyViolation {
                    table,
                    constraint: fk.name.clone(),
                }
                .into());
            }
        }
    }

    for check in &constraints.checks {
        if !wants(check.deferred) {
            continue;
        }
        for (_, cells) in added_rows {
            let resolver = RowVariableResolver { schema, cells };
            match evaluator.evaluate(&check.serialized_expression, &resolver) {
                TObject::Boolean(false) => {
                    return Err(ConstraintViolation::CheckViolation {
                        table,
                        constraint: check.name.clone(),
                    }
                    .into())
                }
                TObject::Boolean(true) => {}
                _ => log::debug!(
                    "CHECK '{}' on table {table} evaluated to NULL/non-boolean, treated as pass",
                    check.name
                ),
            }
        }
    }

    Ok(())
}

/// Runs the inbound-FK remove check for one row set removed from one
/// table: any live row elsewhere still referencing a removed row is a
/// violation, since CASCADE/SET NULL/SET DEFAULT are out of scope — only
/// NO ACTION is implemented.
pub fn check_remove(
    table: TableId,
    removed_rows: &[(RowId, Vec<TObject>)],
    constraints: &RemoveConstraints,
    referencing_rows: impl Fn(&ForeignKeyDef) -> Result<Vec<Vec<TObject>>, Error>,
) -> Result<(), Error> {
    for fk in &constraints.inbound_foreign_keys {
        let referencing = referencing_rows(fk)?;
        for (_, cells) in removed_rows {
            let ref_tuple = tuple_of(cells, fk.ref_columns.as_slice());
            let still_referenced = referencing.iter().any(|r_cells| {
                let fk_tuple = tuple_of(r_cells, fk.columns.as_slice());
                !tuple_has_null(&fk_tuple) && tuples_equal(&fk_tuple, &ref_tuple)
            });
            if still_referenced {
                return Err(ConstraintViolation::ForeignKeyRemoveViolation {
                    table,
                    referencing: fk.table,
                    constraint: fk.name.clone(),
                }
                .into());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdbcore_primitives::{ColId, ColList, ConstraintId};
    use rdbcore_schema::column::{ColumnDef, ColumnType};

    fn customer_schema() -> DataTableDef {
        DataTableDef::new(
            "public",
            "customer",
            vec![ColumnDef::new("id", ColumnType::I64, false)],
        )
    }

    #[test]
    fn primary_key_rejects_duplicate_tuple_in_the_view() {
        let schema = customer_schema();
        let pk = PrimaryKeyDef {
            id: ConstraintId::new(1),
            name: "customer_pk".to_owned(),
            schema: "public".to_owned(),
            table: TableId::new(16),
            columns: ColList::single(ColId::new(0)),
            deferred: Deferrable::NotDeferrable,
        };
        let constraints = AddConstraints {
            primary_key: Some(pk),
            ..Default::default()
        };
        let existing = vec![(RowId::new(1), vec![TObject::I64(2)])];
        let added = vec![(RowId::new(2), vec![TObject::I64(2)])];
        let view: Vec<_> = existing.iter().cloned().chain(added.iter().cloned()).collect();

        let err = check_add(&NullEvaluator, TableId::new(16), &schema, &constraints, &added, &view, |_, _| Ok(true), false)
            .unwrap_err();
        assert!(matches!(err, Error::Constraint(ConstraintViolation::PrimaryKeyViolation { .. })));
    }

    #[test]
    fn primary_key_rejects_null() {
        let schema = customer_schema();
        let pk = PrimaryKeyDef {
            id: ConstraintId::new(1),
            name: "customer_pk".to_owned(),
            schema: "public".to_owned(),
            table: TableId::new(16),
            columns: ColList::single(ColId::new(0)),
            deferred: Deferrable::NotDeferrable,
        };
        let constraints = AddConstraints {
            primary_key: Some(pk),
            ..Default::default()
        };
        let added = vec![(RowId::new(1), vec![TObject::Null])];
        let err = check_add(&NullEvaluator, TableId::new(16), &schema, &constraints, &added, &added, |_, _| Ok(true), false)
            .unwrap_err();
        assert!(matches!(err, Error::Constraint(ConstraintViolation::NullableViolation { .. })));
    }

    #[test]
    fn unique_permits_multiple_nulls() {
        let schema = customer_schema();
        let uk = UniqueDef {
            id: ConstraintId::new(2),
            name: "customer_uk".to_owned(),
            schema: "public".to_owned(),
            table: TableId::new(16),
            columns: ColList::single(ColId::new(0)),
            deferred: Deferrable::NotDeferrable,
        };
        let constraints = AddConstraints {
            uniques: vec![uk],
            ..Default::default()
        };
        let added = vec![(RowId::new(1), vec![TObject::Null]), (RowId::new(2), vec![TObject::Null])];
        check_add(&NullEvaluator, TableId::new(16), &schema, &constraints, &added, &added, |_, _| Ok(true), false).unwrap();
    }
}
