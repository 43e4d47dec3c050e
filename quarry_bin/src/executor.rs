//! The pull-based execution layer: every operator implements [`Executor`]
//! and yields rows on demand. DML runs through `executor::dml`, catalog
//! statements through the system manager directly.

use std::cell::RefCell;

use crate::catalog::SystemManager;
use crate::errors::QueryError;
use crate::planner::{OutputCol, Plan};
use crate::value::Value;
use gneiss::lock::{LockId, LockManager, LockMode};
use gneiss::txn::{Context, Transaction};
use gneiss::wal::LogManager;
use gneiss::FileId;

pub mod agg;
pub mod dml;
pub mod join;
pub mod scan;
pub mod sort;

/// One result row.
pub type Row = Vec<Value>;

/// Everything an operator needs: catalog handles plus the transactional
/// machinery. The transaction sits in a `RefCell` so sibling operators can
/// share it; storage calls borrow it only for the duration of one call.
pub struct ExecCtx<'a> {
    pub sm: &'a SystemManager,
    pub lock_mgr: &'a LockManager,
    pub log_mgr: &'a LogManager,
    pub txn: RefCell<&'a mut Transaction>,
}

impl<'a> ExecCtx<'a> {
    /// Runs `f` with a storage-layer context borrowing the transaction.
    pub fn with_txn<R>(&self, f: impl FnOnce(&mut Context<'_>) -> R) -> R {
        let mut txn = self.txn.borrow_mut();
        let mut ctx = Context {
            lock_mgr: self.lock_mgr,
            log_mgr: self.log_mgr,
            txn: &mut txn,
        };
        f(&mut ctx)
    }

    /// Readers take a table-level shared lock; row locks are left to the
    /// write path.
    pub fn lock_table_shared(&self, file_id: FileId) -> Result<(), QueryError> {
        self.with_txn(|c| c.lock_mgr.lock(c.txn, LockId::table(file_id), LockMode::Shared))?;
        Ok(())
    }
}

/// The iterator contract every operator implements.
pub trait Executor {
    fn schema(&self) -> &[OutputCol];
    fn next(&mut self) -> Result<Option<Row>, QueryError>;
}

/// Builds the operator tree for a bound SELECT plan. The returned operators
/// borrow the catalog handles out of `ctx`, not `ctx` itself.
pub fn build_executor<'a>(
    plan: Plan,
    ctx: &ExecCtx<'a>,
) -> Result<Box<dyn Executor + 'a>, QueryError> {
    Ok(match plan {
        Plan::SeqScan {
            table,
            schema,
            conds,
        } => Box::new(scan::SeqScanExec::new(ctx, &table, schema, conds)?),
        Plan::IndexScan {
            table,
            schema,
            index,
            range,
            conds,
        } => Box::new(scan::IndexScanExec::new(
            ctx, &table, schema, index, range, conds,
        )?),
        Plan::Join {
            schema,
            left,
            right,
            conds,
        } => {
            let left = build_executor(*left, ctx)?;
            let right = build_executor(*right, ctx)?;
            Box::new(join::NestedLoopJoinExec::new(schema, left, right, conds)?)
        }
        Plan::Sort {
            schema,
            child,
            keys,
        } => Box::new(sort::SortExec::new(
            schema,
            build_executor(*child, ctx)?,
            keys,
        )),
        Plan::Agg {
            schema,
            child,
            aggs,
        } => Box::new(agg::AggExec::new(
            schema,
            build_executor(*child, ctx)?,
            aggs,
        )),
        Plan::Project {
            schema,
            child,
            cols,
        } => Box::new(ProjectExec {
            schema,
            child: build_executor(*child, ctx)?,
            cols,
        }),
        Plan::Limit { schema, child, n } => Box::new(LimitExec {
            schema,
            child: build_executor(*child, ctx)?,
            remaining: n,
        }),
    })
}

/// Pulls the whole pipeline into memory, for the session layer.
pub fn run_select<'a>(
    plan: Plan,
    ctx: &ExecCtx<'a>,
) -> Result<(Vec<OutputCol>, Vec<Row>), QueryError> {
    let schema = plan.schema().to_vec();
    let mut exec = build_executor(plan, ctx)?;
    let mut rows = Vec::new();
    while let Some(row) = exec.next()? {
        rows.push(row);
    }
    Ok((schema, rows))
}

struct ProjectExec<'a> {
    schema: Vec<OutputCol>,
    child: Box<dyn Executor + 'a>,
    cols: Vec<usize>,
}

impl Executor for ProjectExec<'_> {
    fn schema(&self) -> &[OutputCol] {
        &self.schema
    }

    fn next(&mut self) -> Result<Option<Row>, QueryError> {
        match self.child.next()? {
            Some(row) => Ok(Some(self.cols.iter().map(|&i| row[i].clone()).collect())),
            None => Ok(None),
        }
    }
}

struct LimitExec<'a> {
    schema: Vec<OutputCol>,
    child: Box<dyn Executor + 'a>,
    remaining: u64,
}

impl Executor for LimitExec<'_> {
    fn schema(&self) -> &[OutputCol] {
        &self.schema
    }

    fn next(&mut self) -> Result<Option<Row>, QueryError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        match self.child.next()? {
            Some(row) => {
                self.remaining -= 1;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }
}
