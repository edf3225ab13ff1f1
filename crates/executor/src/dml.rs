//! DDL/DML operators: `CreateTable`, `Insert`, `Update`, `Delete`, `CreateIndex`.
//! Each exposes a single `execute -> ExecResult` that consumes its input and
//! writes through `StorageAdapter` (spec section 4.8); none of these go through
//! the pull-based `Executor` tree since they are single-shot statements.

use catalog::ColumnDef;
use common::{DbError, DbResult, Row};
use log::warn;
use types::Value;

use crate::{eval_operator, ColumnTypeSpec, ExecResult, ExecutionContext, PlanNode, SetClause};

/// Dispatches the non-query plan kinds. Returns `None` for `Select`/`ExtendedSelect`
/// so the caller falls through to the `Executor` tree.
pub fn try_execute_ddl_dml(
    ctx: &mut ExecutionContext,
    plan: &PlanNode,
) -> DbResult<Option<ExecResult>> {
    match plan {
        PlanNode::CreateTable { table_name, columns } => {
            Ok(Some(create_table(ctx, table_name, columns)?))
        }
        PlanNode::Insert {
            table_name,
            columns,
            values,
        } => Ok(Some(insert(ctx, table_name, columns, values)?)),
        PlanNode::Update {
            table_name,
            set_clauses,
            where_,
        } => Ok(Some(update(ctx, table_name, set_clauses, where_.as_ref())?)),
        PlanNode::Delete { table_name, where_ } => {
            Ok(Some(delete(ctx, table_name, where_.as_ref())?))
        }
        PlanNode::CreateIndex {
            table_name,
            column,
            index_name,
        } => Ok(Some(create_index(ctx, table_name, column, index_name)?)),
        PlanNode::Select { .. } | PlanNode::ExtendedSelect { .. } => Ok(None),
    }
}

fn create_table(
    ctx: &mut ExecutionContext,
    table_name: &str,
    columns: &[ColumnTypeSpec],
) -> DbResult<ExecResult> {
    let columns: Vec<ColumnDef> = columns
        .iter()
        .map(|c| ColumnDef {
            name: c.name.clone(),
            ty: c.ty,
        })
        .collect();
    ctx.catalog.create_table(&mut ctx.adapter, table_name, columns)?;
    Ok(ExecResult::message(format!("table {table_name} created")))
}

fn coerce_row(
    columns: &[ColumnDef],
    value_columns: &[String],
    values: &[Value],
) -> DbResult<Vec<Value>> {
    let mut out = vec![Value::Null; columns.len()];
    for (name, value) in value_columns.iter().zip(values) {
        let Some(idx) = columns.iter().position(|c| &c.name == name) else {
            return Err(DbError::InvalidPlan(format!("unknown column {name}")));
        };
        out[idx] = value.coerce(columns[idx].ty);
    }
    Ok(out)
}

fn insert(
    ctx: &mut ExecutionContext,
    table_name: &str,
    value_columns: &[String],
    value_rows: &[Vec<Value>],
) -> DbResult<ExecResult> {
    let desc = ctx.catalog.get_table(table_name)?.clone();
    let path = ctx.catalog.table_path(table_name);
    let mut inserted = 0u64;
    for values in value_rows {
        let coerced = coerce_row(&desc.columns, value_columns, values)?;
        let row = Row::new(coerced.clone());
        ctx.adapter.insert_row(&path, &row)?;
        for idx in ctx.catalog.list_indexes(table_name) {
            let Some(col_pos) = desc.columns.iter().position(|c| c.name == idx.column) else {
                continue;
            };
            let key = coerced[col_pos].clone();
            let table = idx.table.clone();
            let name = idx.name.clone();
            ctx.indexes.insert(
                &mut ctx.adapter,
                &ctx.catalog,
                &table,
                &name,
                key,
                Row::new(coerced.clone()),
            )?;
        }
        inserted += 1;
    }
    Ok(ExecResult::message(format!("{inserted} row(s) inserted")))
}

/// Rebuilds every index on `table` from `rows` (post-DML state), clearing each
/// index heap table first. Per spec section 4.8: "Index rebuild failures are
/// logged but do not roll back the base table."
fn rebuild_indexes(ctx: &mut ExecutionContext, table: &str, columns: &[ColumnDef], rows: &[Row]) {
    let index_descs: Vec<_> = ctx
        .catalog
        .list_indexes(table)
        .into_iter()
        .cloned()
        .collect();
    for idx in index_descs {
        if let Err(e) = ctx.adapter.clear_table(&ctx.catalog.index_table_path(table, &idx.name)) {
            warn!("failed to clear index heap {}.{}: {e}", table, idx.name);
            continue;
        }
        if let Err(e) = ctx.catalog.reopen_index_table(&mut ctx.adapter, table, &idx.name) {
            warn!("failed to reopen index heap {}.{}: {e}", table, idx.name);
            continue;
        }
        ctx.indexes.mark_unloaded(table, &idx.name);
        let Some(col_pos) = columns.iter().position(|c| c.name == idx.column) else {
            continue;
        };
        for row in rows {
            let key = row.values[col_pos].clone();
            if let Err(e) = ctx.indexes.insert(
                &mut ctx.adapter,
                &ctx.catalog,
                table,
                &idx.name,
                key,
                row.clone(),
            ) {
                warn!("failed to rebuild index {}.{}: {e}", table, idx.name);
            }
        }
    }
}

fn row_matches(row: &Row, columns: &[ColumnDef], predicate: Option<&crate::Predicate>) -> DbResult<bool> {
    let Some(predicate) = predicate else {
        return Ok(true);
    };
    let Some(pos) = columns.iter().position(|c| c.name == predicate.column) else {
        return Err(DbError::InvalidPlan(format!(
            "unknown column {}",
            predicate.column
        )));
    };
    let lhs = &row.values[pos];
    let rhs = predicate.value.coerce(columns[pos].ty);
    eval_operator(&predicate.operator, lhs, &rhs)
}

fn update(
    ctx: &mut ExecutionContext,
    table_name: &str,
    set_clauses: &[SetClause],
    where_: Option<&crate::Predicate>,
) -> DbResult<ExecResult> {
    let desc = ctx.catalog.get_table(table_name)?.clone();
    let path = ctx.catalog.table_path(table_name);
    let rows = ctx.adapter.scan_rows(&path)?;

    let mut new_rows = Vec::with_capacity(rows.len());
    let mut updated = 0u64;
    for row in rows {
        if row_matches(&row, &desc.columns, where_)? {
            let mut values = row.values.clone();
            for set in set_clauses {
                let Some(pos) = desc.columns.iter().position(|c| c.name == set.column) else {
                    return Err(DbError::InvalidPlan(format!("unknown column {}", set.column)));
                };
                values[pos] = set.value.coerce(desc.columns[pos].ty);
            }
            new_rows.push(Row::new(values));
            updated += 1;
        } else {
            new_rows.push(Row::new(row.into_values()));
        }
    }

    ctx.adapter.clear_table(&path)?;
    ctx.catalog.reopen_table(&mut ctx.adapter, table_name)?;
    for row in &new_rows {
        ctx.adapter.insert_row(&path, row)?;
    }
    rebuild_indexes(ctx, table_name, &desc.columns, &new_rows);

    Ok(ExecResult::message(format!("{updated} row(s) updated")))
}

fn delete(
    ctx: &mut ExecutionContext,
    table_name: &str,
    where_: Option<&crate::Predicate>,
) -> DbResult<ExecResult> {
    let desc = ctx.catalog.get_table(table_name)?.clone();
    let path = ctx.catalog.table_path(table_name);

    if where_.is_none() {
        let rows = ctx.adapter.scan_rows(&path)?;
        let deleted = rows.len() as u64;
        ctx.adapter.clear_table(&path)?;
        ctx.catalog.reopen_table(&mut ctx.adapter, table_name)?;
        rebuild_indexes(ctx, table_name, &desc.columns, &[]);
        return Ok(ExecResult::message(format!("{deleted} row(s) deleted")));
    }

    let rows = ctx.adapter.scan_rows(&path)?;
    let mut kept = Vec::new();
    let mut deleted = 0u64;
    for row in rows {
        if row_matches(&row, &desc.columns, where_)? {
            deleted += 1;
        } else {
            kept.push(Row::new(row.into_values()));
        }
    }
    ctx.adapter.clear_table(&path)?;
    ctx.catalog.reopen_table(&mut ctx.adapter, table_name)?;
    for row in &kept {
        ctx.adapter.insert_row(&path, row)?;
    }
    rebuild_indexes(ctx, table_name, &desc.columns, &kept);

    Ok(ExecResult::message(format!("{deleted} row(s) deleted")))
}

fn create_index(
    ctx: &mut ExecutionContext,
    table_name: &str,
    column: &str,
    index_name: &str,
) -> DbResult<ExecResult> {
    let desc = ctx.catalog.get_table(table_name)?.clone();
    ctx.catalog
        .add_index(&mut ctx.adapter, table_name, index_name, column, false)?;
    let path = ctx.catalog.table_path(table_name);
    let rows = ctx.adapter.scan_rows(&path)?;
    let Some(col_pos) = desc.columns.iter().position(|c| c.name == column) else {
        return Err(DbError::InvalidPlan(format!("unknown column {column}")));
    };
    for row in &rows {
        let key = row.values[col_pos].clone();
        ctx.indexes.insert(
            &mut ctx.adapter,
            &ctx.catalog,
            table_name,
            index_name,
            key,
            Row::new(row.values.clone()),
        )?;
    }
    Ok(ExecResult::message(format!(
        "index {index_name} created on {table_name}.{column}"
    )))
}
