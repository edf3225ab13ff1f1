//! HashAggregate: groups by a tuple of column values and computes
//! COUNT/SUM/MIN/MAX/AVG per group, then applies HAVING (spec section 4.8).

use common::DbResult;
use types::Value;

use crate::filter::eval_predicate;
use crate::{group_key, AggregateSpec, Executor, ExecutionContext, GroupBy, NamedRow};

fn canonical_name(spec: &AggregateSpec) -> String {
    match &spec.column {
        Some(c) => format!("{}({c})", spec.func.to_ascii_uppercase()),
        None => format!("{}(*)", spec.func.to_ascii_uppercase()),
    }
}

fn apply_aggregate(spec: &AggregateSpec, rows: &[NamedRow]) -> Value {
    let func = spec.func.to_ascii_uppercase();
    if func == "COUNT" {
        return match &spec.column {
            None => Value::Int(rows.len() as i64),
            Some(col) => Value::Int(
                rows.iter()
                    .filter(|r| r.get(col).is_some_and(|v| !v.is_null()))
                    .count() as i64,
            ),
        };
    }

    let Some(col) = &spec.column else {
        return Value::Null;
    };
    let numeric: Vec<f64> = rows
        .iter()
        .filter_map(|r| r.get(col).and_then(Value::as_f64))
        .collect();

    match func.as_str() {
        "SUM" => {
            if numeric.is_empty() {
                Value::Int(0)
            } else {
                Value::Float(numeric.iter().sum())
            }
        }
        "AVG" => {
            if numeric.is_empty() {
                Value::Null
            } else {
                Value::Float(numeric.iter().sum::<f64>() / numeric.len() as f64)
            }
        }
        "MIN" | "MAX" => {
            let all_sampled_numeric = rows.iter().all(|r| {
                r.get(col)
                    .map(|v| v.is_null() || v.as_f64().is_some())
                    .unwrap_or(true)
            });
            if all_sampled_numeric && !numeric.is_empty() {
                let v = if func == "MIN" {
                    numeric.iter().cloned().fold(f64::INFINITY, f64::min)
                } else {
                    numeric.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
                };
                Value::Float(v)
            } else {
                let texts: Vec<String> = rows
                    .iter()
                    .filter_map(|r| r.get(col))
                    .filter(|v| !v.is_null())
                    .map(Value::as_str_repr)
                    .collect();
                match texts.into_iter().reduce(|a, b| {
                    let a_is_min = a < b;
                    if (func == "MIN") == a_is_min {
                        a
                    } else {
                        b
                    }
                }) {
                    Some(s) => Value::Text(s),
                    None => Value::Null,
                }
            }
        }
        _ => Value::Null,
    }
}

pub struct HashAggregate {
    input: Box<dyn Executor>,
    group_by: GroupBy,
    aggregates: Vec<AggregateSpec>,
    output: std::vec::IntoIter<NamedRow>,
}

impl HashAggregate {
    pub fn new(
        input: Box<dyn Executor>,
        group_by: GroupBy,
        aggregates: Vec<AggregateSpec>,
    ) -> Self {
        HashAggregate {
            input,
            group_by,
            aggregates,
            output: Vec::new().into_iter(),
        }
    }
}

impl Executor for HashAggregate {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.input.open(ctx)?;
        let mut groups: Vec<(Vec<Value>, Vec<NamedRow>)> = Vec::new();
        while let Some(row) = self.input.next(ctx)? {
            let key = group_key(&row, &self.group_by.columns);
            match groups.iter_mut().find(|(k, _)| k == &key) {
                Some((_, rows)) => rows.push(row),
                None => groups.push((key, vec![row])),
            }
        }
        self.input.close(ctx)?;

        let mut out = Vec::new();
        for (key, rows) in &groups {
            let mut result = NamedRow::new();
            for (col, val) in self.group_by.columns.iter().zip(key) {
                result.set(col.clone(), val.clone());
            }
            for spec in &self.aggregates {
                let value = apply_aggregate(spec, rows);
                result.set(canonical_name(spec), value.clone());
                if let Some(alias) = &spec.alias {
                    result.set(alias.clone(), value);
                }
            }
            let keep = match &self.group_by.having {
                Some(pred) => eval_predicate(&result, pred)?,
                None => true,
            };
            if keep {
                out.push(result);
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
