//! The top-level facade: `Database::open(Config)` plus `Database::execute(PlanNode)`.
//! Trimmed of the teacher's Raft-cluster/`QueryResult` surface — transactions,
//! crash recovery, and consensus are explicit non-goals.

use common::{Config, DbResult};
use executor::{execute_plan, ExecResult, ExecutionContext, PlanNode};

/// A single open database instance: one catalog, one storage adapter, one index
/// registry, all scoped to `config.data_dir`.
pub struct Database {
    ctx: ExecutionContext,
}

impl Database {
    /// Opens (creating if absent) the database at `config.data_dir`.
    pub fn open(config: Config) -> DbResult<Self> {
        log::info!("opening database at {}", config.data_dir.display());
        let ctx = ExecutionContext::open(config)?;
        Ok(Database { ctx })
    }

    /// Executes one already-compiled plan node to completion (spec section 6).
    pub fn execute(&mut self, plan: PlanNode) -> ExecResult {
        execute_plan(&mut self.ctx, plan)
    }

    /// Per-statement execution counters accumulated since `open` (spec section 10).
    pub fn stats(&self) -> &common::ExecutionStats {
        &self.ctx.stats
    }
}
