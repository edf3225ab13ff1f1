//! Filter: passes rows for which a `{column, operator, value}` predicate holds
//! (spec section 4.8), applied post-join so it may reference either side.

use common::DbResult;

use crate::{eval_operator, Executor, ExecutionContext, NamedRow, Predicate};

pub fn eval_predicate(row: &NamedRow, predicate: &Predicate) -> DbResult<bool> {
    let lhs = row.get(&predicate.column).cloned().unwrap_or(types::Value::Null);
    eval_operator(&predicate.operator, &lhs, &predicate.value)
}

pub struct Filter {
    input: Box<dyn Executor>,
    predicate: Predicate,
}

impl Filter {
    pub fn new(input: Box<dyn Executor>, predicate: Predicate) -> Self {
        Filter { input, predicate }
    }
}

impl Executor for Filter {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<NamedRow>> {
        while let Some(row) = self.input.next(ctx)? {
            if eval_predicate(&row, &self.predicate)? {
                return Ok(Some(row));
            }
            ctx.stats.rows_filtered += 1;
        }
        Ok(None)
    }

    fn close(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.input.close(ctx)
    }
}
