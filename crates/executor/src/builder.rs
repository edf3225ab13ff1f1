//! Turns a `Select`/`ExtendedSelect` [`PlanNode`] into an operator tree, per the
//! evaluation order resolved in spec section 4.8: base access (IndexScan when
//! applicable, else SeqScan) -> Join (cascading) -> Filter -> HashAggregate+HAVING
//! -> Project -> OrderBy -> Limit/Offset.

use common::{DbError, DbResult};

use crate::aggregate::HashAggregate;
use crate::filter::Filter;
use crate::join::Join;
use crate::limit::Limit;
use crate::project::Project;
use crate::scan::{IndexScan, SeqScan};
use crate::sort::OrderBy;
use crate::{ColumnSpec, Executor, ExecutionContext, JoinSpec, PlanNode, Predicate};

/// Builds the operator tree for a `Select`/`ExtendedSelect` plan node.
/// `CreateTable`/`Insert`/`Update`/`Delete`/`CreateIndex` are handled directly by
/// [`crate::dml::try_execute_ddl_dml`] and never reach this function.
pub fn build_executor(
    ctx: &ExecutionContext,
    plan: &PlanNode,
) -> DbResult<Box<dyn Executor>> {
    match plan {
        PlanNode::Select {
            table_name,
            columns,
            where_,
            joins,
            group_by,
            aggregates,
            order_by,
            limit,
            offset,
        }
        | PlanNode::ExtendedSelect {
            table_name,
            columns,
            where_,
            joins,
            group_by,
            aggregates,
            order_by,
            limit,
            offset,
        } => build_select(
            ctx, table_name, columns, where_.as_ref(), joins, group_by.as_ref(), aggregates,
            order_by, *limit, *offset,
        ),
        other => Err(DbError::UnsupportedOperator(format!(
            "{other:?} is not an executor-tree plan node"
        ))),
    }
}

#[allow(clippy::too_many_arguments)]
fn build_select(
    ctx: &ExecutionContext,
    table_name: &str,
    columns: &[String],
    where_: Option<&Predicate>,
    joins: &[JoinSpec],
    group_by: Option<&crate::GroupBy>,
    aggregates: &[crate::AggregateSpec],
    order_by: &[crate::OrderByKey],
    limit: Option<usize>,
    offset: Option<usize>,
) -> DbResult<Box<dyn Executor>> {
    // Base access: IndexScan when there's a usable single-column predicate, a
    // matching index, and no join (joins materialize the whole table anyway).
    let mut node: Box<dyn Executor> = match where_ {
        Some(pred) if joins.is_empty() => {
            match IndexScan::try_build(ctx, table_name, pred) {
                Some(scan) => Box::new(scan),
                None => Box::new(SeqScan::new(table_name)),
            }
        }
        _ => Box::new(SeqScan::new(table_name)),
    };
    for join in joins {
        node = Box::new(Join::new(
            node,
            join.table.clone(),
            join.join_type,
            join.on_condition.clone(),
        ));
    }

    // Applied post-join even when IndexScan already consulted the same predicate
    // for base access: re-filtering an already-matching row is a no-op, and this
    // keeps Filter's post-join semantics (it may reference either side) uniform.
    if let Some(pred) = where_ {
        node = Box::new(Filter::new(node, pred.clone()));
    }

    if let Some(group_by) = group_by {
        node = Box::new(HashAggregate::new(node, group_by.clone(), aggregates.to_vec()));
    }

    let projected_columns: Vec<ColumnSpec> = columns
        .iter()
        .map(|c| parse_column_spec(c))
        .collect();
    node = Box::new(Project::new(node, projected_columns));

    if !order_by.is_empty() {
        node = Box::new(OrderBy::new(node, order_by.to_vec()));
    }

    if limit.is_some() || offset.is_some() {
        node = Box::new(Limit::new(node, limit, offset));
    }

    Ok(node)
}

/// Parses `col`, `col AS alias`, or `table.col` into a [`ColumnSpec`].
fn parse_column_spec(raw: &str) -> ColumnSpec {
    let parts: Vec<&str> = raw.split_whitespace().collect();
    if parts.len() == 3 && parts[1].eq_ignore_ascii_case("AS") {
        return ColumnSpec {
            column: parts[0].to_string(),
            alias: Some(parts[2].to_string()),
        };
    }
    ColumnSpec {
        column: raw.to_string(),
        alias: None,
    }
}
