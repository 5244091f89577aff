//! Constraint checking
//!
//! The checker runs against a transaction's table views: during a
//! statement that is the running transaction itself, at commit it is the
//! synthetic read-only check-view the pipeline builds over the
//! post-commit state.
//!
//! Checked on **added** rows: NOT NULL, CHECK, UNIQUE, PRIMARY KEY, and
//! FOREIGN KEY (the parent must exist). Checked on **removed** rows:
//! FOREIGN KEY from the other side (no surviving child may still
//! reference the removed parent row). Named constraints are filtered by
//! deferrability, `InitiallyImmediate` after each statement and
//! `InitiallyDeferred` at commit; column NOT NULL has no deferral and is
//! checked whenever its row is. The first violation short-circuits.

use crate::indexset::IndexKey;
use crate::source::TableView;
use crate::transaction::Transaction;
use lattice_core::{
    Collation, ConstraintKind, Deferrability, Error, ObjectName, Result, RowId, TableInfo, Value,
    ViolationKind,
};
use smallvec::SmallVec;

/// Check added rows of `table` against the deferrability-filtered
/// constraint set.
pub fn check_add_violations(
    tx: &Transaction,
    table: &ObjectName,
    rows: &[u64],
    filter: Deferrability,
) -> Result<()> {
    check_added(tx, table, rows, Some(filter))
}

/// Check removed rows of `table`: no surviving row of any visible table
/// may still reference them through a foreign key.
pub fn check_remove_violations(
    tx: &Transaction,
    table: &ObjectName,
    rows: &[u64],
    filter: Deferrability,
) -> Result<()> {
    check_removed(tx, table, rows, Some(filter))
}

/// Validate every visible row of `table` against its full constraint
/// set, ignoring deferrability. Runs at commit for tables whose
/// constraints were altered.
pub fn check_full_table(tx: &Transaction, table: &ObjectName) -> Result<()> {
    let rows = tx.view(table)?.row_numbers();
    check_added(tx, table, &rows, None)
}

fn applies(deferrability: Deferrability, filter: Option<Deferrability>) -> bool {
    filter.map_or(true, |f| deferrability == f)
}

fn check_added(
    tx: &Transaction,
    table: &ObjectName,
    rows: &[u64],
    filter: Option<Deferrability>,
) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let view = tx.view(table)?;
    let info = view.info().clone();
    let table_id = tx
        .snapshot(table)
        .map(|s| s.source.table_id())
        .ok_or_else(|| Error::NotFound(format!("table '{table}'")))?;

    for &row_number in rows {
        let row_id = RowId::new(table_id, row_number);
        let data = view.row(row_number).ok_or_else(|| {
            Error::Corruption(format!("checked row {row_id} has no data"))
        })?;

        // Column NOT NULL is structural; no deferral applies.
        for (pos, col) in info.columns().iter().enumerate() {
            if !col.nullable && data.get(pos).map_or(true, Value::is_null) {
                return Err(Error::ConstraintViolation {
                    constraint: col.name.clone(),
                    kind: ViolationKind::NotNull,
                    row: row_id,
                });
            }
        }

        for constraint in info.constraints() {
            if !applies(constraint.deferrability, filter) {
                continue;
            }
            let violation = |kind: ViolationKind| Error::ConstraintViolation {
                constraint: constraint.name.clone(),
                kind,
                row: row_id,
            };
            match &constraint.kind {
                ConstraintKind::Check { expr } => {
                    if expr.eval_predicate(&data, &info)? == Some(false) {
                        return Err(violation(ViolationKind::Check));
                    }
                }
                ConstraintKind::PrimaryKey { columns } | ConstraintKind::Unique { columns } => {
                    let is_pk = matches!(constraint.kind, ConstraintKind::PrimaryKey { .. });
                    let positions = positions_of(&info, columns)?;
                    let key = IndexKey::from_row(&data, &positions, &info);
                    if key.has_null() {
                        if is_pk {
                            return Err(violation(ViolationKind::PrimaryKey));
                        }
                        continue; // null keys are exempt from UNIQUE
                    }
                    let matches = view.index_lookup(&positions, &key);
                    if matches.iter().any(|&m| m != row_number) {
                        return Err(violation(if is_pk {
                            ViolationKind::PrimaryKey
                        } else {
                            ViolationKind::Unique
                        }));
                    }
                }
                ConstraintKind::ForeignKey {
                    columns,
                    ref_table,
                    ref_columns,
                } => {
                    let child_positions = positions_of(&info, columns)?;
                    let values: SmallVec<[Value; 2]> = child_positions
                        .iter()
                        .map(|&p| data.get(p).cloned().unwrap_or(Value::Null))
                        .collect();
                    if values.iter().any(Value::is_null) {
                        continue; // a partially-null key references nothing
                    }
                    let parent = tx.view(ref_table)?;
                    let parent_info = parent.info().clone();
                    let parent_positions = positions_of(&parent_info, ref_columns)?;
                    let key = fold_key(values, &parent_positions, &parent_info);
                    if parent.index_lookup(&parent_positions, &key).is_empty() {
                        return Err(violation(ViolationKind::ForeignKey));
                    }
                }
            }
        }
    }
    Ok(())
}

fn check_removed(
    tx: &Transaction,
    table: &ObjectName,
    rows: &[u64],
    filter: Option<Deferrability>,
) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let parent_view = tx.view(table)?;
    let parent_info = parent_view.info().clone();
    let table_id = tx
        .snapshot(table)
        .map(|s| s.source.table_id())
        .ok_or_else(|| Error::NotFound(format!("table '{table}'")))?;

    // Every FK in any visible table that references `table`.
    for (child_name, child_info) in tx.visible_tables() {
        for constraint in child_info.constraints() {
            let ConstraintKind::ForeignKey {
                columns,
                ref_table,
                ref_columns,
            } = &constraint.kind
            else {
                continue;
            };
            if ref_table != table || !applies(constraint.deferrability, filter) {
                continue;
            }
            let child_view = tx.view(&child_name)?;
            let child_positions = positions_of(&child_info, columns)?;
            let parent_positions = positions_of(&parent_info, ref_columns)?;

            for &row_number in rows {
                let row_id = RowId::new(table_id, row_number);
                let data = parent_view.row(row_number).ok_or_else(|| {
                    Error::Corruption(format!("removed row {row_id} has no data"))
                })?;
                let values: SmallVec<[Value; 2]> = parent_positions
                    .iter()
                    .map(|&p| data.get(p).cloned().unwrap_or(Value::Null))
                    .collect();
                if values.iter().any(Value::is_null) {
                    continue;
                }
                let key = fold_key(values, &child_positions, &child_info);
                if !child_view.index_lookup(&child_positions, &key).is_empty() {
                    return Err(Error::ConstraintViolation {
                        constraint: constraint.name.clone(),
                        kind: ViolationKind::ForeignKey,
                        row: row_id,
                    });
                }
            }
        }
    }
    Ok(())
}

fn positions_of(info: &TableInfo, columns: &[String]) -> Result<Vec<usize>> {
    columns
        .iter()
        .map(|name| {
            info.column_index(name).ok_or_else(|| {
                Error::NotFound(format!("column '{}' in table '{}'", name, info.name()))
            })
        })
        .collect()
}

/// Fold raw key values through the collations of the columns they will
/// be looked up against.
fn fold_key(values: SmallVec<[Value; 2]>, positions: &[usize], info: &TableInfo) -> IndexKey {
    IndexKey(
        values
            .into_iter()
            .zip(positions)
            .map(|(v, &p)| {
                let collation: Option<&Collation> =
                    info.columns().get(p).and_then(|c| c.sql_type.collation());
                v.collation_key(collation)
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::EventRegistry;
    use crate::source::TableSource;
    use crate::transaction::{TableSnapshot, Transaction};
    use lattice_core::{
        BinaryOp, ColumnInfo, ConstraintInfo, Expr, SqlType, TableId, TableInfo,
    };
    use lattice_store::{AreaStore, MemoryStore};
    use std::sync::Arc;

    fn store() -> Arc<dyn AreaStore> {
        Arc::new(MemoryStore::new())
    }

    fn parent_source() -> Arc<TableSource> {
        let info = TableInfo::new(
            ObjectName::new("app", "parent"),
            vec![
                ColumnInfo::new("id", SqlType::Integer).not_null(),
                ColumnInfo::new("qty", SqlType::Integer),
            ],
            vec![
                ConstraintInfo::new(
                    "pk_parent",
                    ConstraintKind::PrimaryKey {
                        columns: vec!["id".into()],
                    },
                ),
                ConstraintInfo::new(
                    "chk_qty",
                    ConstraintKind::Check {
                        expr: Expr::bin(
                            BinaryOp::GtEq,
                            Expr::col("qty"),
                            Expr::lit(Value::Integer(0)),
                        ),
                    },
                ),
            ],
        )
        .unwrap();
        TableSource::create(store(), TableId(1), Arc::new(info)).unwrap()
    }

    fn child_source(deferred: bool) -> Arc<TableSource> {
        let fk = ConstraintInfo::new(
            "fk_child_parent",
            ConstraintKind::ForeignKey {
                columns: vec!["parent_id".into()],
                ref_table: ObjectName::new("app", "parent"),
                ref_columns: vec!["id".into()],
            },
        );
        let fk = if deferred { fk.deferred() } else { fk };
        let info = TableInfo::new(
            ObjectName::new("app", "child"),
            vec![
                ColumnInfo::new("id", SqlType::Integer).not_null(),
                ColumnInfo::new("parent_id", SqlType::Integer),
            ],
            vec![fk],
        )
        .unwrap();
        TableSource::create(store(), TableId(2), Arc::new(info)).unwrap()
    }

    fn tx_over(sources: &[&Arc<TableSource>]) -> Transaction {
        Transaction::new(
            1,
            0,
            sources
                .iter()
                .map(|s| (s.name(), TableSnapshot::capture(s))),
        )
    }

    #[test]
    fn not_null_violation() {
        let parent = parent_source();
        let name = parent.name();
        let mut tx = tx_over(&[&parent]);
        let r = {
            let t = tx.mutable_table(&name).unwrap();
            t.add_row(vec![Value::Null, Value::Integer(1)]).unwrap()
        };
        let err = check_add_violations(&tx, &name, &[r], Deferrability::InitiallyImmediate)
            .unwrap_err();
        match err {
            Error::ConstraintViolation { kind, .. } => assert_eq!(kind, ViolationKind::NotNull),
            other => panic!("expected violation, got {other}"),
        }
    }

    #[test]
    fn check_expression_violation() {
        let parent = parent_source();
        let name = parent.name();
        let mut tx = tx_over(&[&parent]);
        let r = {
            let t = tx.mutable_table(&name).unwrap();
            t.add_row(vec![Value::Integer(1), Value::Integer(-5)]).unwrap()
        };
        let err = check_add_violations(&tx, &name, &[r], Deferrability::InitiallyImmediate)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ConstraintViolation {
                kind: ViolationKind::Check,
                ..
            }
        ));
    }

    #[test]
    fn check_null_passes() {
        let parent = parent_source();
        let name = parent.name();
        let mut tx = tx_over(&[&parent]);
        let r = {
            let t = tx.mutable_table(&name).unwrap();
            t.add_row(vec![Value::Integer(1), Value::Null]).unwrap()
        };
        // qty NULL makes the CHECK unknown, which passes.
        check_add_violations(&tx, &name, &[r], Deferrability::InitiallyImmediate).unwrap();
    }

    #[test]
    fn primary_key_duplicate_and_null() {
        let parent = parent_source();
        let name = parent.name();
        let mut tx = tx_over(&[&parent]);
        let (a, b) = {
            let t = tx.mutable_table(&name).unwrap();
            let a = t.add_row(vec![Value::Integer(1), Value::Integer(0)]).unwrap();
            let b = t.add_row(vec![Value::Integer(1), Value::Integer(2)]).unwrap();
            (a, b)
        };
        let err = check_add_violations(&tx, &name, &[a, b], Deferrability::InitiallyImmediate)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ConstraintViolation {
                kind: ViolationKind::PrimaryKey,
                ..
            }
        ));
    }

    #[test]
    fn unique_key_ignores_nulls() {
        let info = TableInfo::new(
            ObjectName::new("app", "emails"),
            vec![ColumnInfo::new("email", SqlType::varchar())],
            vec![ConstraintInfo::new(
                "u_email",
                ConstraintKind::Unique {
                    columns: vec!["email".into()],
                },
            )],
        )
        .unwrap();
        let source = TableSource::create(store(), TableId(3), Arc::new(info)).unwrap();
        let name = source.name();
        let mut tx = tx_over(&[&source]);
        let rows = {
            let t = tx.mutable_table(&name).unwrap();
            vec![
                t.add_row(vec![Value::Null]).unwrap(),
                t.add_row(vec![Value::Null]).unwrap(),
            ]
        };
        check_add_violations(&tx, &name, &rows, Deferrability::InitiallyImmediate).unwrap();
    }

    #[test]
    fn foreign_key_parent_must_exist() {
        let parent = parent_source();
        let child = child_source(false);
        let (pn, cn) = (parent.name(), child.name());
        let mut tx = tx_over(&[&parent, &child]);

        let orphan = {
            let t = tx.mutable_table(&cn).unwrap();
            t.add_row(vec![Value::Integer(1), Value::Integer(42)]).unwrap()
        };
        let err = check_add_violations(&tx, &cn, &[orphan], Deferrability::InitiallyImmediate)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ConstraintViolation {
                kind: ViolationKind::ForeignKey,
                ..
            }
        ));

        // Insert the parent; the same child row now passes.
        {
            let t = tx.mutable_table(&pn).unwrap();
            t.add_row(vec![Value::Integer(42), Value::Integer(0)]).unwrap();
        }
        check_add_violations(&tx, &cn, &[orphan], Deferrability::InitiallyImmediate).unwrap();
    }

    #[test]
    fn deferred_fk_skipped_until_deferred_pass() {
        let parent = parent_source();
        let child = child_source(true);
        let cn = child.name();
        let mut tx = tx_over(&[&parent, &child]);
        let orphan = {
            let t = tx.mutable_table(&cn).unwrap();
            t.add_row(vec![Value::Integer(1), Value::Integer(42)]).unwrap()
        };
        // Immediate pass ignores the deferred constraint...
        check_add_violations(&tx, &cn, &[orphan], Deferrability::InitiallyImmediate).unwrap();
        // ...the deferred pass enforces it.
        assert!(
            check_add_violations(&tx, &cn, &[orphan], Deferrability::InitiallyDeferred).is_err()
        );
    }

    #[test]
    fn removed_parent_with_surviving_child_fails() {
        let parent = parent_source();
        let child = child_source(false);
        let (pn, cn) = (parent.name(), child.name());
        let mut tx = tx_over(&[&parent, &child]);

        let p = {
            let t = tx.mutable_table(&pn).unwrap();
            t.add_row(vec![Value::Integer(42), Value::Integer(0)]).unwrap()
        };
        {
            let t = tx.mutable_table(&cn).unwrap();
            t.add_row(vec![Value::Integer(1), Value::Integer(42)]).unwrap();
        }
        // Remove the parent row from the view, then check the removal.
        {
            let t = tx.mutable_table(&pn).unwrap();
            t.remove_row(p).unwrap();
        }
        let err = check_remove_violations(&tx, &pn, &[p], Deferrability::InitiallyImmediate)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ConstraintViolation {
                kind: ViolationKind::ForeignKey,
                ..
            }
        ));
    }

    #[test]
    fn removed_parent_without_children_passes() {
        let parent = parent_source();
        let child = child_source(false);
        let pn = parent.name();
        let mut tx = tx_over(&[&parent, &child]);
        let p = {
            let t = tx.mutable_table(&pn).unwrap();
            t.add_row(vec![Value::Integer(42), Value::Integer(0)]).unwrap()
        };
        {
            let t = tx.mutable_table(&pn).unwrap();
            t.remove_row(p).unwrap();
        }
        check_remove_violations(&tx, &pn, &[p], Deferrability::InitiallyImmediate).unwrap();
    }

    #[test]
    fn full_table_check_catches_existing_violations() {
        let parent = parent_source();
        let name = parent.name();
        let mut tx = tx_over(&[&parent]);
        {
            let t = tx.mutable_table(&name).unwrap();
            t.add_row(vec![Value::Integer(1), Value::Integer(5)]).unwrap();
            t.add_row(vec![Value::Integer(2), Value::Integer(7)]).unwrap();
        }
        check_full_table(&tx, &name).unwrap();

        // Tighten constraints: qty must exceed 6. One row violates.
        let altered = parent
            .table_info()
            .with_constraints(vec![ConstraintInfo::new(
                "chk_qty_big",
                ConstraintKind::Check {
                    expr: Expr::bin(
                        BinaryOp::Gt,
                        Expr::col("qty"),
                        Expr::lit(Value::Integer(6)),
                    ),
                },
            )])
            .unwrap();
        tx.mutable_table(&name)
            .unwrap()
            .set_info(Arc::new(altered));
        assert!(check_full_table(&tx, &name).is_err());
    }
}
