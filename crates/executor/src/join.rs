//! Join: INNER/LEFT/RIGHT over an equi-join or single comparison `on_condition`
//! (spec section 4.8). RIGHT is implemented by swapping sides and running as LEFT.
//! Column collisions are resolved by suffixing right-side duplicates with `_r`.
//! Equi-joins use a hash join (right side indexed by key); anything else falls
//! back to nested loop.

use std::collections::HashMap;

use common::DbResult;
use types::Value;

use crate::{eval_operator, Executor, ExecutionContext, JoinType, NamedRow, OnCondition};

fn merge_rows(left: &NamedRow, right: &NamedRow) -> NamedRow {
    let mut out = left.clone();
    for (k, v) in &right.0 {
        let key = if left.get(k).is_some() {
            format!("{k}_r")
        } else {
            k.clone()
        };
        out.set(key, v.clone());
    }
    out
}

fn right_nulls(right_columns: &[String]) -> NamedRow {
    let mut out = NamedRow::new();
    for col in right_columns {
        out.set(col.clone(), Value::Null);
    }
    out
}

pub struct Join {
    left: Box<dyn Executor>,
    right_table: String,
    join_type: JoinType,
    on: OnCondition,
    output: std::vec::IntoIter<NamedRow>,
}

impl Join {
    pub fn new(
        left: Box<dyn Executor>,
        right_table: impl Into<String>,
        join_type: JoinType,
        on: OnCondition,
    ) -> Self {
        Join {
            left,
            right_table: right_table.into(),
            join_type,
            on,
            output: Vec::new().into_iter(),
        }
    }
}

impl Executor for Join {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        // RIGHT: swap sides, run as LEFT, per spec section 4.8.
        let (probe_type, swap) = match self.join_type {
            JoinType::Right => (JoinType::Left, true),
            other => (other, false),
        };

        self.left.open(ctx)?;
        let mut left_buf = Vec::new();
        while let Some(r) = self.left.next(ctx)? {
            left_buf.push(r);
        }
        self.left.close(ctx)?;

        let mut right_scan = crate::scan::SeqScan::new(&self.right_table);
        right_scan.open(ctx)?;
        let mut right_buf = Vec::new();
        while let Some(r) = right_scan.next(ctx)? {
            right_buf.push(r);
        }
        right_scan.close(ctx)?;

        let (outer, inner) = if swap {
            (right_buf, left_buf)
        } else {
            (left_buf, right_buf)
        };
        let inner_columns: Vec<String> = inner
            .first()
            .map(|r| r.columns().map(|c| c.to_string()).collect())
            .unwrap_or_default();
        let (outer_key_col, inner_key_col) = if swap {
            (self.on.right_column.clone(), self.on.left_column.clone())
        } else {
            (self.on.left_column.clone(), self.on.right_column.clone())
        };

        // NULL never equals NULL for join purposes (three-valued SQL semantics), even
        // though `Value`'s `PartialEq`/`Hash` treat `Null == Null`, so NULL keys are
        // excluded from the index and never probed, matching `eval_operator` below.
        let is_equi = self.on.operator == "=";
        let mut index: HashMap<Value, Vec<usize>> = HashMap::new();
        if is_equi {
            for (i, row) in inner.iter().enumerate() {
                if let Some(v) = row.get(&inner_key_col) {
                    if !v.is_null() {
                        index.entry(v.clone()).or_default().push(i);
                    }
                }
            }
        }

        let mut out = Vec::new();
        for outer_row in &outer {
            let mut matched = false;
            let matches: Vec<&NamedRow> = if is_equi {
                match outer_row.get(&outer_key_col) {
                    Some(k) if !k.is_null() => index
                        .get(k)
                        .map(|idxs| idxs.iter().map(|&i| &inner[i]).collect())
                        .unwrap_or_default(),
                    _ => Vec::new(),
                }
            } else {
                inner
                    .iter()
                    .filter(|inner_row| {
                        let lhs = outer_row.get(&outer_key_col).cloned().unwrap_or(Value::Null);
                        let rhs = inner_row.get(&inner_key_col).cloned().unwrap_or(Value::Null);
                        eval_operator(&self.on.operator, &lhs, &rhs).unwrap_or(false)
                    })
                    .collect()
            };
            for inner_row in matches {
                matched = true;
                let merged = if swap {
                    merge_rows(inner_row, outer_row)
                } else {
                    merge_rows(outer_row, inner_row)
                };
                out.push(merged);
            }
            if !matched && probe_type == JoinType::Left {
                let nulls = right_nulls(&inner_columns);
                let merged = if swap {
                    merge_rows(&nulls, outer_row)
                } else {
                    merge_rows(outer_row, &nulls)
                };
                out.push(merged);
            }
        }

        self.output = out.into_iter();
        Ok(())
    }

    fn next(&mut self, _ctx: &mut ExecutionContext) -> DbResult<Option<NamedRow>> {
        Ok(self.output.next())
    }

    fn close(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        Ok(())
    }
}
