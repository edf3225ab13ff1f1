//! Plan execution: a pull-based (Volcano) iterator model over a deserialized plan
//! tree (spec section 6). Each operator implements [`Executor`]; [`build_executor`]
//! (in [`builder`]) turns a [`PlanNode`] into an operator tree per the evaluation
//! order resolved in spec section 4.8; [`execute_plan`] drives it to completion.
//!
//! Grounded on the teacher's `crates/executor` (the `Executor` trait shape,
//! `open`/`next`/`close`/`schema`, and `ExecutionStats`), generalized from its
//! positional `Row` to the name→value row shape spec section 4.8 requires.

mod aggregate;
mod builder;
mod dml;
mod filter;
mod join;
mod limit;
mod project;
mod scan;
mod sort;

pub use builder::build_executor;

use std::time::Instant;

use catalog::{IndexRegistry, SysCatalog};
use common::{Config, DbError, DbResult, ExecutionStats};
use serde::{Deserialize, Serialize};
use types::{SqlType, Value};

/// A single output tuple, column name to value, in a stable (insertion) order.
/// Spec section 4.8: "Rows are name→value maps."
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedRow(pub Vec<(String, Value)>);

impl NamedRow {
    pub fn new() -> Self {
        NamedRow(Vec::new())
    }

    pub fn get(&self, col: &str) -> Option<&Value> {
        self.0.iter().find(|(k, _)| k == col).map(|(_, v)| v)
    }

    /// Looks up `table.col` the way Project resolves qualified references: the
    /// unqualified name first, then the fully-qualified form, per spec section 4.8.
    pub fn get_qualified(&self, table: &str, col: &str) -> Option<&Value> {
        self.get(col)
            .or_else(|| self.get(&format!("{table}.{col}")))
    }

    pub fn set(&mut self, col: impl Into<String>, v: Value) {
        let col = col.into();
        if let Some(entry) = self.0.iter_mut().find(|(k, _)| *k == col) {
            entry.1 = v;
        } else {
            self.0.push((col, v));
        }
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }
}

/// A flat `{column, operator, value}` predicate (spec section 6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Predicate {
    pub column: String,
    pub operator: String,
    pub value: Value,
}

/// Join's `on_condition`: `{left_column, operator, right_column}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnCondition {
    pub left_column: String,
    pub operator: String,
    pub right_column: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JoinType {
    Inner,
    Left,
    Right,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinSpec {
    pub table: String,
    pub join_type: JoinType,
    pub on_condition: OnCondition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderByKey {
    pub column: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupBy {
    pub columns: Vec<String>,
    #[serde(default)]
    pub having: Option<Predicate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateSpec {
    /// `COUNT`, `SUM`, `MIN`, `MAX`, `AVG`.
    pub func: String,
    /// `None` for `COUNT(*)`.
    pub column: Option<String>,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub column: String,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnTypeSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: SqlType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetClause {
    pub column: String,
    pub value: Value,
}

/// A physical plan node, deserialized directly from the transport-agnostic plan
/// JSON of spec section 6 via `#[serde(tag = "type")]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlanNode {
    CreateTable {
        table_name: String,
        columns: Vec<ColumnTypeSpec>,
    },
    Insert {
        table_name: String,
        columns: Vec<String>,
        values: Vec<Vec<Value>>,
    },
    Select {
        table_name: String,
        columns: Vec<String>,
        #[serde(rename = "where", default)]
        where_: Option<Predicate>,
        #[serde(default)]
        joins: Vec<JoinSpec>,
        #[serde(default)]
        group_by: Option<GroupBy>,
        #[serde(default)]
        aggregates: Vec<AggregateSpec>,
        #[serde(default)]
        order_by: Vec<OrderByKey>,
        #[serde(default)]
        limit: Option<usize>,
        #[serde(default)]
        offset: Option<usize>,
    },
    ExtendedSelect {
        table_name: String,
        columns: Vec<String>,
        #[serde(rename = "where", default)]
        where_: Option<Predicate>,
        #[serde(default)]
        joins: Vec<JoinSpec>,
        #[serde(default)]
        group_by: Option<GroupBy>,
        #[serde(default)]
        aggregates: Vec<AggregateSpec>,
        #[serde(default)]
        order_by: Vec<OrderByKey>,
        #[serde(default)]
        limit: Option<usize>,
        #[serde(default)]
        offset: Option<usize>,
    },
    Update {
        table_name: String,
        set_clauses: Vec<SetClause>,
        #[serde(rename = "where", default)]
        where_: Option<Predicate>,
    },
    Delete {
        table_name: String,
        #[serde(rename = "where", default)]
        where_: Option<Predicate>,
    },
    CreateIndex {
        table_name: String,
        column: String,
        index_name: String,
    },
}

/// The Volcano iterator interface every operator implements (spec section 4.8):
/// `Created -> Opened -> (Producing)* -> Closed`. `next` after the stream has
/// ended returns `Ok(None)` forever.
pub trait Executor {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()>;
    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<NamedRow>>;
    fn close(&mut self, ctx: &mut ExecutionContext) -> DbResult<()>;
}

/// Shared state threaded through the operator tree: catalog, storage adapter, and
/// the lazily-loaded index registry.
pub struct ExecutionContext {
    pub config: Config,
    pub catalog: SysCatalog,
    pub adapter: adapter::StorageAdapter,
    pub indexes: IndexRegistry,
    pub stats: ExecutionStats,
}

impl ExecutionContext {
    pub fn open(config: Config) -> DbResult<Self> {
        let mut adapter = adapter::StorageAdapter::new();
        let catalog = SysCatalog::open(&mut adapter, &config)?;
        let indexes = IndexRegistry::new(config.bptree_order);
        Ok(ExecutionContext {
            config,
            catalog,
            adapter,
            indexes,
            stats: ExecutionStats::default(),
        })
    }
}

/// `{ok, rows?, message?, error?}` (spec section 6).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<NamedRow>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecResult {
    fn rows(rows: Vec<NamedRow>) -> Self {
        ExecResult {
            ok: true,
            rows: Some(rows),
            message: None,
            error: None,
        }
    }

    fn message(message: impl Into<String>) -> Self {
        ExecResult {
            ok: true,
            rows: None,
            message: Some(message.into()),
            error: None,
        }
    }

    fn error(err: DbError) -> Self {
        ExecResult {
            ok: false,
            rows: None,
            message: None,
            error: Some(err.to_string()),
        }
    }
}

/// Drives a plan node to completion: builds its operator tree, runs it through
/// `open`/`next*`/`close`, and collects the result (spec section 6).
pub fn execute_plan(ctx: &mut ExecutionContext, plan: PlanNode) -> ExecResult {
    match run(ctx, plan) {
        Ok(result) => result,
        Err(e) => ExecResult::error(e),
    }
}

fn run(ctx: &mut ExecutionContext, plan: PlanNode) -> DbResult<ExecResult> {
    if let Some(result) = dml::try_execute_ddl_dml(ctx, &plan)? {
        return Ok(result);
    }
    let open_start = Instant::now();
    let mut exec = build_executor(ctx, &plan)?;
    exec.open(ctx)?;
    ctx.stats.open_time += open_start.elapsed();

    let mut rows = Vec::new();
    loop {
        let next_start = Instant::now();
        let row = exec.next(ctx)?;
        ctx.stats.total_next_time += next_start.elapsed();
        match row {
            Some(row) => {
                ctx.stats.rows_produced += 1;
                rows.push(row);
            }
            None => break,
        }
    }

    let close_start = Instant::now();
    exec.close(ctx)?;
    ctx.stats.close_time += close_start.elapsed();

    Ok(ExecResult::rows(rows))
}

/// Coerces a predicate's RHS once against a column's declared type, numeric if
/// possible else string (spec section 4.8).
pub(crate) fn coerce_predicate_value(value: &Value, ty: Option<SqlType>) -> Value {
    match ty {
        Some(ty) => value.coerce(ty),
        None => value.clone(),
    }
}

/// `= != <> > < >= <=` against two already-coerced values. NULL compares false to
/// everything except via `IS`-style equality, which this engine does not expose
/// as a separate operator: NULL on either side makes every comparison false.
pub(crate) fn eval_operator(op: &str, lhs: &Value, rhs: &Value) -> DbResult<bool> {
    if lhs.is_null() || rhs.is_null() {
        return Ok(false);
    }
    let ord = match (lhs.as_f64(), rhs.as_f64()) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => Some(lhs.as_str_repr().cmp(&rhs.as_str_repr())),
    };
    let Some(ord) = ord else { return Ok(false) };
    use std::cmp::Ordering::*;
    Ok(match op {
        "=" => ord == Equal,
        "!=" | "<>" => ord != Equal,
        ">" => ord == Greater,
        "<" => ord == Less,
        ">=" => ord != Less,
        "<=" => ord != Greater,
        other => {
            return Err(DbError::UnsupportedOperator(other.to_string()));
        }
    })
}

pub(crate) fn group_key(row: &NamedRow, columns: &[String]) -> Vec<Value> {
    columns
        .iter()
        .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog::ColumnDef;
    use tempfile::tempdir;
    use types::SqlType;

    fn open_ctx(dir: &std::path::Path) -> ExecutionContext {
        let config = Config::builder().data_dir(dir.to_path_buf()).build();
        ExecutionContext::open(config).unwrap()
    }

    fn create_table(ctx: &mut ExecutionContext, name: &str, cols: &[(&str, SqlType)]) {
        ctx.catalog
            .create_table(
                &mut ctx.adapter,
                name,
                cols.iter()
                    .map(|(n, t)| ColumnDef {
                        name: n.to_string(),
                        ty: *t,
                    })
                    .collect(),
            )
            .unwrap();
    }

    fn insert(ctx: &mut ExecutionContext, name: &str, cols: Vec<&str>, values: Vec<Vec<Value>>) {
        let res = execute_plan(
            ctx,
            PlanNode::Insert {
                table_name: name.to_string(),
                columns: cols.into_iter().map(String::from).collect(),
                values,
            },
        );
        assert!(res.ok, "{:?}", res.error);
    }

    #[test]
    fn seq_scan_filter_project_pipeline() {
        let dir = tempdir().unwrap();
        let mut ctx = open_ctx(dir.path());
        create_table(&mut ctx, "users", &[("id", SqlType::Int), ("name", SqlType::Varchar)]);
        insert(
            &mut ctx,
            "users",
            vec!["id", "name"],
            vec![
                vec![Value::Int(1), Value::Text("alice".into())],
                vec![Value::Int(2), Value::Text("bob".into())],
            ],
        );

        let result = execute_plan(
            &mut ctx,
            PlanNode::Select {
                table_name: "users".into(),
                columns: vec!["name".into()],
                where_: Some(Predicate {
                    column: "id".into(),
                    operator: "=".into(),
                    value: Value::Int(2),
                }),
                joins: Vec::new(),
                group_by: None,
                aggregates: Vec::new(),
                order_by: Vec::new(),
                limit: None,
                offset: None,
            },
        );
        assert!(result.ok);
        let rows = result.rows.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&Value::Text("bob".into())));
    }

    #[test]
    fn index_scan_is_used_when_an_index_exists() {
        let dir = tempdir().unwrap();
        let mut ctx = open_ctx(dir.path());
        create_table(&mut ctx, "users", &[("id", SqlType::Int)]);
        insert(
            &mut ctx,
            "users",
            vec!["id"],
            vec![vec![Value::Int(1)], vec![Value::Int(2)], vec![Value::Int(3)]],
        );
        let create_index = execute_plan(
            &mut ctx,
            PlanNode::CreateIndex {
                table_name: "users".into(),
                column: "id".into(),
                index_name: "idx_id".into(),
            },
        );
        assert!(create_index.ok, "{:?}", create_index.error);

        let result = execute_plan(
            &mut ctx,
            PlanNode::Select {
                table_name: "users".into(),
                columns: vec!["id".into()],
                where_: Some(Predicate {
                    column: "id".into(),
                    operator: ">".into(),
                    value: Value::Int(1),
                }),
                joins: Vec::new(),
                group_by: None,
                aggregates: Vec::new(),
                order_by: Vec::new(),
                limit: None,
                offset: None,
            },
        );
        assert!(result.ok, "{:?}", result.error);
        assert_eq!(result.rows.unwrap().len(), 2);
    }

    #[test]
    fn join_inner_and_left_semantics() {
        let dir = tempdir().unwrap();
        let mut ctx = open_ctx(dir.path());
        create_table(&mut ctx, "a", &[("id", SqlType::Int)]);
        create_table(&mut ctx, "b", &[("a_id", SqlType::Int), ("label", SqlType::Varchar)]);
        insert(&mut ctx, "a", vec!["id"], vec![vec![Value::Int(1)], vec![Value::Int(2)]]);
        insert(
            &mut ctx,
            "b",
            vec!["a_id", "label"],
            vec![vec![Value::Int(1), Value::Text("x".into())]],
        );

        let inner = execute_plan(
            &mut ctx,
            PlanNode::Select {
                table_name: "a".into(),
                columns: vec!["*".into()],
                where_: None,
                joins: vec![JoinSpec {
                    table: "b".into(),
                    join_type: JoinType::Inner,
                    on_condition: OnCondition {
                        left_column: "id".into(),
                        operator: "=".into(),
                        right_column: "a_id".into(),
                    },
                }],
                group_by: None,
                aggregates: Vec::new(),
                order_by: Vec::new(),
                limit: None,
                offset: None,
            },
        );
        assert_eq!(inner.rows.unwrap().len(), 1);

        let left = execute_plan(
            &mut ctx,
            PlanNode::Select {
                table_name: "a".into(),
                columns: vec!["*".into()],
                where_: None,
                joins: vec![JoinSpec {
                    table: "b".into(),
                    join_type: JoinType::Left,
                    on_condition: OnCondition {
                        left_column: "id".into(),
                        operator: "=".into(),
                        right_column: "a_id".into(),
                    },
                }],
                group_by: None,
                aggregates: Vec::new(),
                order_by: Vec::new(),
                limit: None,
                offset: None,
            },
        );
        let rows = left.rows.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|r| r.get("label").map(Value::is_null).unwrap_or(true)));
    }

    #[test]
    fn equi_join_never_matches_a_null_join_key() {
        let dir = tempdir().unwrap();
        let mut ctx = open_ctx(dir.path());
        create_table(&mut ctx, "a", &[("x", SqlType::Int)]);
        create_table(&mut ctx, "b", &[("x", SqlType::Int)]);
        insert(&mut ctx, "a", vec!["x"], vec![vec![Value::Null]]);
        insert(&mut ctx, "b", vec!["x"], vec![vec![Value::Null]]);

        let result = execute_plan(
            &mut ctx,
            PlanNode::Select {
                table_name: "a".into(),
                columns: vec!["*".into()],
                where_: None,
                joins: vec![JoinSpec {
                    table: "b".into(),
                    join_type: JoinType::Inner,
                    on_condition: OnCondition {
                        left_column: "x".into(),
                        operator: "=".into(),
                        right_column: "x".into(),
                    },
                }],
                group_by: None,
                aggregates: Vec::new(),
                order_by: Vec::new(),
                limit: None,
                offset: None,
            },
        );
        assert!(result.ok, "{:?}", result.error);
        assert!(result.rows.unwrap().is_empty());
    }

    #[test]
    fn hash_aggregate_with_having() {
        let dir = tempdir().unwrap();
        let mut ctx = open_ctx(dir.path());
        create_table(&mut ctx, "sales", &[("region", SqlType::Varchar), ("amount", SqlType::Int)]);
        insert(
            &mut ctx,
            "sales",
            vec!["region", "amount"],
            vec![
                vec![Value::Text("east".into()), Value::Int(10)],
                vec![Value::Text("east".into()), Value::Int(5)],
                vec![Value::Text("west".into()), Value::Int(100)],
            ],
        );

        let result = execute_plan(
            &mut ctx,
            PlanNode::Select {
                table_name: "sales".into(),
                columns: vec!["region".into(), "SUM(amount)".into()],
                where_: None,
                joins: Vec::new(),
                group_by: Some(GroupBy {
                    columns: vec!["region".into()],
                    having: Some(Predicate {
                        column: "SUM(amount)".into(),
                        operator: ">".into(),
                        value: Value::Int(10),
                    }),
                }),
                aggregates: vec![AggregateSpec {
                    func: "SUM".into(),
                    column: Some("amount".into()),
                    alias: None,
                }],
                order_by: Vec::new(),
                limit: None,
                offset: None,
            },
        );
        assert!(result.ok, "{:?}", result.error);
        let rows = result.rows.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("region"), Some(&Value::Text("west".into())));
    }

    #[test]
    fn order_by_sorts_nulls_last_both_directions() {
        let dir = tempdir().unwrap();
        let mut ctx = open_ctx(dir.path());
        create_table(&mut ctx, "t", &[("n", SqlType::Int)]);
        insert(
            &mut ctx,
            "t",
            vec!["n"],
            vec![vec![Value::Int(2)], vec![Value::Null], vec![Value::Int(1)]],
        );

        let result = execute_plan(
            &mut ctx,
            PlanNode::Select {
                table_name: "t".into(),
                columns: vec!["n".into()],
                where_: None,
                joins: Vec::new(),
                group_by: None,
                aggregates: Vec::new(),
                order_by: vec![OrderByKey {
                    column: "n".into(),
                    direction: SortDirection::Desc,
                }],
                limit: None,
                offset: None,
            },
        );
        let rows = result.rows.unwrap();
        assert_eq!(rows[0].get("n"), Some(&Value::Int(2)));
        assert_eq!(rows[1].get("n"), Some(&Value::Int(1)));
        assert!(rows[2].get("n").unwrap().is_null());
    }

    #[test]
    fn limit_and_offset_page_through_ordered_rows() {
        let dir = tempdir().unwrap();
        let mut ctx = open_ctx(dir.path());
        create_table(&mut ctx, "t", &[("n", SqlType::Int)]);
        insert(
            &mut ctx,
            "t",
            vec!["n"],
            (0..10).map(|i| vec![Value::Int(i)]).collect(),
        );

        let result = execute_plan(
            &mut ctx,
            PlanNode::Select {
                table_name: "t".into(),
                columns: vec!["n".into()],
                where_: None,
                joins: Vec::new(),
                group_by: None,
                aggregates: Vec::new(),
                order_by: vec![OrderByKey {
                    column: "n".into(),
                    direction: SortDirection::Asc,
                }],
                limit: Some(3),
                offset: Some(2),
            },
        );
        let rows = result.rows.unwrap();
        let got: Vec<i64> = rows
            .iter()
            .map(|r| match r.get("n").unwrap() {
                Value::Int(i) => *i,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(got, vec![2, 3, 4]);
    }

    #[test]
    fn full_rewrite_update_and_delete() {
        let dir = tempdir().unwrap();
        let mut ctx = open_ctx(dir.path());
        create_table(&mut ctx, "t", &[("n", SqlType::Int)]);
        insert(
            &mut ctx,
            "t",
            vec!["n"],
            vec![vec![Value::Int(1)], vec![Value::Int(2)], vec![Value::Int(3)]],
        );

        let update = execute_plan(
            &mut ctx,
            PlanNode::Update {
                table_name: "t".into(),
                set_clauses: vec![SetClause {
                    column: "n".into(),
                    value: Value::Int(99),
                }],
                where_: Some(Predicate {
                    column: "n".into(),
                    operator: "=".into(),
                    value: Value::Int(1),
                }),
            },
        );
        assert!(update.ok);

        let delete = execute_plan(
            &mut ctx,
            PlanNode::Delete {
                table_name: "t".into(),
                where_: Some(Predicate {
                    column: "n".into(),
                    operator: "=".into(),
                    value: Value::Int(2),
                }),
            },
        );
        assert!(delete.ok);

        let select = execute_plan(
            &mut ctx,
            PlanNode::Select {
                table_name: "t".into(),
                columns: vec!["n".into()],
                where_: None,
                joins: Vec::new(),
                group_by: None,
                aggregates: Vec::new(),
                order_by: Vec::new(),
                limit: None,
                offset: None,
            },
        );
        let rows = select.rows.unwrap();
        let mut got: Vec<i64> = rows
            .iter()
            .map(|r| match r.get("n").unwrap() {
                Value::Int(i) => *i,
                _ => unreachable!(),
            })
            .collect();
        got.sort();
        assert_eq!(got, vec![3, 99]);
    }
}
