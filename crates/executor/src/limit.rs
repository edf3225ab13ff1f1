//! Limit/Offset: skip `offset` rows, then pass at most `limit` (spec section 4.8).

use common::DbResult;

use crate::{Executor, ExecutionContext, NamedRow};

pub struct Limit {
    input: Box<dyn Executor>,
    limit: Option<usize>,
    offset: usize,
    skipped: usize,
    taken: usize,
}

impl Limit {
    pub fn new(input: Box<dyn Executor>, limit: Option<usize>, offset: Option<usize>) -> Self {
        Limit {
            input,
            limit,
            offset: offset.unwrap_or(0),
            skipped: 0,
            taken: 0,
        }
    }
}

impl Executor for Limit {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<NamedRow>> {
        if let Some(limit) = self.limit {
            if self.taken >= limit {
                return Ok(None);
            }
        }
        while self.skipped < self.offset {
            if self.input.next(ctx)?.is_none() {
                return Ok(None);
            }
            self.skipped += 1;
        }
        let row = self.input.next(ctx)?;
        if row.is_some() {
            self.taken += 1;
        }
        Ok(row)
    }

    fn close(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.input.close(ctx)
    }
}
