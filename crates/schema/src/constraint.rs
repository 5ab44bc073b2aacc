//! PRIMARY KEY / UNIQUE / FOREIGN KEY / CHECK constraint definitions,
//! mirroring the `SYS_INFO.*` rows they're persisted as.

use rdbcore_primitives::{ConstraintId, TableId};

/// A constraint's enforcement timing.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Deferrable {
    InitiallyDeferred,
    InitiallyImmediate,
    NotDeferrable,
}

impl Deferrable {
    pub fn is_deferred_by_default(self) -> bool {
        matches!(self, Deferrable::InitiallyDeferred)
    }
}

/// The only referential action this core implements: `update_rule`/
/// `delete_rule` values other than `NO ACTION` are rejected at
/// constraint-creation time rather than silently accepted and ignored at
/// commit, so a schema can never claim behavior the commit protocol
/// doesn't actually provide.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ForeignKeyAction {
    NoAction,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("foreign key action '{0}' is not supported; only NO ACTION is implemented")]
    UnsupportedAction(String),
}

impl ForeignKeyAction {
    /// Parses the verbatim rule string a `FKeyInfo` row stores. Only
    /// `"NO ACTION"` (case-insensitively) is accepted; `CASCADE`,
    /// `SET NULL`, `SET DEFAULT` and `RESTRICT` are rejected here rather
    /// than stored and silently ignored at commit time.
    pub fn parse(rule: &str) -> Result<Self, Error> {
        if rule.eq_ignore_ascii_case("NO ACTION") {
            Ok(ForeignKeyAction::NoAction)
        } else {
            Err(Error::UnsupportedAction(rule.to_owned()))
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ForeignKeyAction::NoAction => "NO ACTION",
        }
    }
}

use rdbcore_primitives::ColList;

/// A PRIMARY KEY constraint (`SYS_INFO.PKeyInfo` + `PrimaryColumns`).
#[derive(Clone, Debug)]
pub struct PrimaryKeyDef {
    pub id: ConstraintId,
    pub name: String,
    pub schema: String,
    pub table: TableId,
    pub columns: ColList,
    pub deferred: Deferrable,
}

/// A UNIQUE constraint (`SYS_INFO.UniqueInfo` + `UniqueColumns`).
#[derive(Clone, Debug)]
pub struct UniqueDef {
    pub id: ConstraintId,
    pub name: String,
    pub schema: String,
    pub table: TableId,
    pub columns: ColList,
    pub deferred: Deferrable,
}

/// A FOREIGN KEY constraint (`SYS_INFO.FKeyInfo` + `ForeignColumns`).
#[derive(Clone, Debug)]
pub struct ForeignKeyDef {
    pub id: ConstraintId,
    pub name: String,
    pub schema: String,
    pub table: TableId,
    pub columns: ColList,
    pub ref_schema: String,
    pub ref_table: TableId,
    pub ref_columns: ColList,
    pub update_rule: ForeignKeyAction,
    pub delete_rule: ForeignKeyAction,
    pub deferred: Deferrable,
}

impl ForeignKeyDef {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ConstraintId,
        name: impl Into<String>,
        schema: impl Into<String>,
        table: TableId,
        columns: ColList,
        ref_schema: impl Into<String>,
        ref_table: TableId,
        ref_columns: ColList,
        update_rule: &str,
        delete_rule: &str,
        deferred: Deferrable,
    ) -> Result<Self, Error> {
        Ok(Self {
            id,
            name: name.into(),
            schema: schema.into(),
            table,
            columns,
            ref_schema: ref_schema.into(),
            ref_table,
            ref_columns,
            update_rule: ForeignKeyAction::parse(update_rule)?,
            delete_rule: ForeignKeyAction::parse(delete_rule)?,
            deferred,
        })
    }
}

/// A CHECK constraint (`SYS_INFO.CheckInfo`). `expression` is the
/// human-readable source text kept for display; `serialized_expression` is
/// the opaque, pre-compiled form handed to the `ExpressionEvaluator`
/// collaborator — this crate interprets neither.
#[derive(Clone, Debug)]
pub struct CheckDef {
    pub id: ConstraintId,
    pub name: String,
    pub schema: String,
    pub table: TableId,
    pub expression: String,
    pub serialized_expression: Vec<u8>,
    pub deferred: Deferrable,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdbcore_primitives::ColId;

    #[test]
    fn foreign_key_rejects_non_no_action_rules() {
        let err = ForeignKeyDef::new(
            ConstraintId::new(1),
            "fk_order_customer",
            "public",
            TableId::new(20),
            ColList::single(ColId::new(0)),
            "public",
            TableId::new(21),
            ColList::single(ColId::new(0)),
            "CASCADE",
            "NO ACTION",
            Deferrable::NotDeferrable,
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedAction(rule) if rule == "CASCADE"));
    }

    #[test]
    fn foreign_key_accepts_no_action_case_insensitively() {
        let fk = ForeignKeyDef::new(
            ConstraintId::new(1),
            "fk_order_customer",
            "public",
            TableId::new(20),
            ColList::single(ColId::new(0)),
            "public",
            TableId::new(21),
            ColList::single(ColId::new(0)),
            "no action",
            "NO ACTION",
            Deferrable::NotDeferrable,
        )
        .unwrap();
        assert_eq!(fk.update_rule, ForeignKeyAction::NoAction);
    }
}
