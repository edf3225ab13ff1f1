//! Project: `["*"]` passes rows through unchanged; otherwise emits the selected
//! columns under their alias, if any (spec section 4.8). Column lookups that
//! miss return null.

use common::DbResult;
use types::Value;

use crate::{ColumnSpec, Executor, ExecutionContext, NamedRow};

pub struct Project {
    input: Box<dyn Executor>,
    columns: Vec<ColumnSpec>,
    pass_through: bool,
}

impl Project {
    pub fn new(input: Box<dyn Executor>, columns: Vec<ColumnSpec>) -> Self {
        let pass_through = columns.len() == 1 && columns[0].column == "*";
        Project {
            input,
            columns,
            pass_through,
        }
    }
}

impl Executor for Project {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<NamedRow>> {
        let Some(row) = self.input.next(ctx)? else {
            return Ok(None);
        };
        if self.pass_through {
            return Ok(Some(row));
        }
        let mut out = NamedRow::new();
        for spec in &self.columns {
            let value = lookup(&row, &spec.column);
            let key = spec.alias.clone().unwrap_or_else(|| spec.column.clone());
            out.set(key, value);
        }
        Ok(Some(out))
    }

    fn close(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.input.close(ctx)
    }
}

/// Resolves `col`, then `table.col`, per spec section 4.8's lookup order.
fn lookup(row: &NamedRow, col: &str) -> Value {
    if let Some(v) = row.get(col) {
        return v.clone();
    }
    if let Some((_, unqualified)) = col.split_once('.') {
        if let Some(v) = row.get(unqualified) {
            return v.clone();
        }
    }
    Value::Null
}
