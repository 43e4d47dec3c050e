//! Sequential and index scans over one table.

use super::{ExecCtx, Executor, Row};
use crate::catalog::{decode_record, ColMeta, IndexMeta};
use crate::errors::QueryError;
use crate::planner::{BoundCond, IndexRange, OutputCol};
use gneiss::btree::BTreeIter;
use gneiss::heap::{HeapFile, HeapScan};

fn passes(conds: &[BoundCond], row: &[crate::value::Value]) -> Result<bool, QueryError> {
    for cond in conds {
        if !cond.eval(row)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Walks the heap in (page, slot) order, filtering as it goes.
pub struct SeqScanExec<'a> {
    schema: Vec<OutputCol>,
    conds: Vec<BoundCond>,
    cols: Vec<ColMeta>,
    heap: &'a HeapFile,
    scan: HeapScan<'a>,
}

impl<'a> SeqScanExec<'a> {
    pub fn new(
        ctx: &ExecCtx<'a>,
        table: &str,
        schema: Vec<OutputCol>,
        conds: Vec<BoundCond>,
    ) -> Result<Self, QueryError> {
        let heap = ctx.sm.heap(table)?;
        ctx.lock_table_shared(heap.file_id())?;
        Ok(Self {
            schema,
            conds,
            cols: ctx.sm.table_meta(table)?.cols.clone(),
            heap,
            scan: heap.scan(),
        })
    }
}

impl Executor for SeqScanExec<'_> {
    fn schema(&self) -> &[OutputCol] {
        &self.schema
    }

    fn next(&mut self) -> Result<Option<Row>, QueryError> {
        while let Some(rid) = self.scan.next()? {
            let record = self.heap.get(rid, None)?;
            let row = decode_record(&self.cols, &record);
            if passes(&self.conds, &row)? {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }
}

/// Walks one index range in key order, fetching matching records from the
/// heap. Conditions not folded into the range stay as residual filters.
pub struct IndexScanExec<'a> {
    schema: Vec<OutputCol>,
    conds: Vec<BoundCond>,
    cols: Vec<ColMeta>,
    heap: &'a HeapFile,
    iter: BTreeIter<'a>,
    end: Option<Vec<u8>>,
    end_inclusive: bool,
}

impl<'a> IndexScanExec<'a> {
    pub fn new(
        ctx: &ExecCtx<'a>,
        table: &str,
        schema: Vec<OutputCol>,
        index: IndexMeta,
        range: IndexRange,
        conds: Vec<BoundCond>,
    ) -> Result<Self, QueryError> {
        let heap = ctx.sm.heap(table)?;
        ctx.lock_table_shared(heap.file_id())?;
        let tree = ctx.sm.index(&index.name())?;
        let iter = match &range.start {
            Some(key) if range.start_strict => tree.upper_bound(key)?,
            Some(key) => tree.lower_bound(key)?,
            None => tree.leaf_begin(),
        };
        Ok(Self {
            schema,
            conds,
            cols: ctx.sm.table_meta(table)?.cols.clone(),
            heap,
            iter,
            end: range.end,
            end_inclusive: range.end_inclusive,
        })
    }
}

impl Executor for IndexScanExec<'_> {
    fn schema(&self) -> &[OutputCol] {
        &self.schema
    }

    fn next(&mut self) -> Result<Option<Row>, QueryError> {
        while let Some((key, rid)) = self.iter.next()? {
            if let Some(end) = &self.end {
                let past = if self.end_inclusive {
                    key > *end
                } else {
                    key >= *end
                };
                if past {
                    return Ok(None);
                }
            }
            let record = self.heap.get(rid, None)?;
            let row = decode_record(&self.cols, &record);
            if passes(&self.conds, &row)? {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }
}
