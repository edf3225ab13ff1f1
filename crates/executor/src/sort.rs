//! OrderBy: a stable sort applying keys in reverse so the leftmost key is the
//! primary (spec section 4.8). NULLs sort last regardless of direction.

use std::cmp::Ordering;

use common::DbResult;
use types::Value;

use crate::{Executor, ExecutionContext, NamedRow, OrderByKey, SortDirection};

fn cmp_values(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => a.as_str_repr().cmp(&b.as_str_repr()),
        },
    }
}

pub struct OrderBy {
    input: Box<dyn Executor>,
    keys: Vec<OrderByKey>,
    output: std::vec::IntoIter<NamedRow>,
}

impl OrderBy {
    pub fn new(input: Box<dyn Executor>, keys: Vec<OrderByKey>) -> Self {
        OrderBy {
            input,
            keys,
            output: Vec::new().into_iter(),
        }
    }
}

impl Executor for OrderBy {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.input.open(ctx)?;
        let mut rows = Vec::new();
        while let Some(row) = self.input.next(ctx)? {
            rows.push(row);
        }
        self.input.close(ctx)?;

        // Apply keys in reverse with a stable sort so the leftmost key wins ties.
        for key in self.keys.iter().rev() {
            rows.sort_by(|a, b| {
                let av = a.get(&key.column).cloned().unwrap_or(Value::Null);
                let bv = b.get(&key.column).cloned().unwrap_or(Value::Null);
                let ord = cmp_values(&av, &bv);
                match key.direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => {
                        if av.is_null() || bv.is_null() {
                            ord
                        } else {
                            ord.reverse()
                        }
                    }
                }
            });
        }
        self.output = rows.into_iter();
        Ok(())
    }

    fn next(&mut self, _ctx: &mut ExecutionContext) -> DbResult<Option<NamedRow>> {
        Ok(self.output.next())
    }

    fn close(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        Ok(())
    }
}
