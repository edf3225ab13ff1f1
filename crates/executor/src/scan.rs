//! SeqScan and IndexScan: the two base-access operators (spec section 4.8).

use common::DbResult;
use types::Value;

use crate::{Executor, ExecutionContext, NamedRow, Predicate};

fn row_to_named(table: &str, columns: &[String], values: Vec<Value>) -> NamedRow {
    let mut row = NamedRow::new();
    for (name, value) in columns.iter().zip(values) {
        row.set(name.clone(), value.clone());
        row.set(format!("{table}.{name}"), value);
    }
    row
}

/// Yields every row from `StorageAdapter.scan_rows`, named by the table's
/// declared column order.
pub struct SeqScan {
    table: String,
    columns: Vec<String>,
    buffered: std::vec::IntoIter<NamedRow>,
}

impl SeqScan {
    pub fn new(table: impl Into<String>) -> Self {
        SeqScan {
            table: table.into(),
            columns: Vec::new(),
            buffered: Vec::new().into_iter(),
        }
    }
}

impl Executor for SeqScan {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        let desc = ctx.catalog.get_table(&self.table)?;
        self.columns = desc.columns.iter().map(|c| c.name.clone()).collect();
        let path = ctx.catalog.table_path(&self.table);
        let rows = ctx.adapter.scan_rows(&path)?;
        ctx.stats.pages_scanned += 1;
        let named: Vec<NamedRow> = rows
            .into_iter()
            .map(|r| row_to_named(&self.table, &self.columns, r.into_values()))
            .collect();
        self.buffered = named.into_iter();
        Ok(())
    }

    fn next(&mut self, _ctx: &mut ExecutionContext) -> DbResult<Option<NamedRow>> {
        Ok(self.buffered.next())
    }

    fn close(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        Ok(())
    }
}

/// Consulted when the predicate is a single-column comparison and an index
/// exists on that column (spec section 4.8). `try_build` returns `None` ("not
/// applicable") so the caller falls back to `SeqScan`.
pub struct IndexScan {
    table: String,
    columns: Vec<String>,
    index_name: String,
    predicate: Predicate,
    buffered: std::vec::IntoIter<NamedRow>,
}

impl IndexScan {
    /// Returns `Some(IndexScan)` only if a usable index exists on `predicate.column`.
    pub fn try_build(ctx: &ExecutionContext, table: &str, predicate: &Predicate) -> Option<Self> {
        if !matches!(predicate.operator.as_str(), "=" | ">" | ">=" | "<" | "<=") {
            return None;
        }
        let idx = ctx.catalog.find_index_by_column(table, &predicate.column)?;
        Some(IndexScan {
            table: table.to_string(),
            columns: Vec::new(),
            index_name: idx.name.clone(),
            predicate: predicate.clone(),
            buffered: Vec::new().into_iter(),
        })
    }
}

impl Executor for IndexScan {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        let desc = ctx.catalog.get_table(&self.table)?;
        self.columns = desc.columns.iter().map(|c| c.name.clone()).collect();
        let col_ty = desc
            .columns
            .iter()
            .find(|c| c.name == self.predicate.column)
            .map(|c| c.ty);
        let value = crate::coerce_predicate_value(&self.predicate.value, col_ty);

        let tree = ctx
            .indexes
            .ensure_loaded(&mut ctx.adapter, &ctx.catalog, &self.table, &self.index_name)?;
        let rows = match self.predicate.operator.as_str() {
            "=" => tree.search_eq(&value),
            ">" => tree
                .search_range(Some(&value), None, false, true)
                .into_iter()
                .map(|(_, r)| r)
                .collect(),
            ">=" => tree
                .search_range(Some(&value), None, true, true)
                .into_iter()
                .map(|(_, r)| r)
                .collect(),
            "<" => tree
                .search_range(None, Some(&value), true, false)
                .into_iter()
                .map(|(_, r)| r)
                .collect(),
            "<=" => tree
                .search_range(None, Some(&value), true, true)
                .into_iter()
                .map(|(_, r)| r)
                .collect(),
            op => return Err(common::DbError::UnsupportedOperator(op.to_string())),
        };
        ctx.stats.pages_scanned += 1;
        let named: Vec<NamedRow> = rows
            .into_iter()
            .map(|r| row_to_named(&self.table, &self.columns, r.into_values()))
            .collect();
        self.buffered = named.into_iter();
        Ok(())
    }

    fn next(&mut self, _ctx: &mut ExecutionContext) -> DbResult<Option<NamedRow>> {
        Ok(self.buffered.next())
    }

    fn close(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        Ok(())
    }
}
