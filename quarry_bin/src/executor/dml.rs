//! Data-mutating statements. Each affected row takes its row lock through
//! the heap, emits physical page images there, and is then described by one
//! logical WAL record plus a write-set entry for abort-time undo.

use super::ExecCtx;
use crate::catalog::{decode_record, encode_record, index_key};
use crate::errors::QueryError;
use crate::planner::{BoundInsert, BoundMutationScan, BoundUpdate};
use gneiss::txn::WriteRecord;
use gneiss::wal::LogPayload;
use gneiss::{Rid, INVALID_LSN};

/// INSERT INTO: one new record plus an entry in every index. A unique
/// violation rolls the row back out before surfacing.
pub fn execute_insert(ctx: &ExecCtx<'_>, bound: &BoundInsert) -> Result<usize, QueryError> {
    let tab = ctx.sm.table_meta(&bound.table)?.clone();
    let heap = ctx.sm.heap(&bound.table)?;
    let record = encode_record(&tab, &bound.values);

    let rid = ctx.with_txn(|c| heap.insert(&record, Some(c)))?;

    let mut inserted: Vec<(String, Vec<u8>)> = Vec::new();
    for index in &tab.indexes {
        let key = index_key(index, &record);
        let tree = ctx.sm.index(&index.name())?;
        let landed = ctx.with_txn(|c| tree.insert(&key, rid, Some(c)))?;
        if landed.is_none() {
            // Duplicate key: take the already-inserted entries and the
            // record itself back out, then fail the statement.
            for (prev_index, prev_key) in inserted.iter().rev() {
                let prev_tree = ctx.sm.index(prev_index)?;
                ctx.with_txn(|c| prev_tree.delete(prev_key, Some(c)))?;
            }
            ctx.with_txn(|c| heap.delete(rid, Some(c)))?;
            return Err(QueryError::UniqueViolation(index.name()));
        }
        inserted.push((index.name(), key));
    }

    ctx.with_txn(|c| -> Result<(), QueryError> {
        let lsn = c.txn.log(
            c.log_mgr,
            LogPayload::Insert {
                table: bound.table.clone(),
                rid,
                record: record.clone(),
                undo_next: INVALID_LSN,
            },
        )?;
        c.txn.write_set.push(WriteRecord::Insert {
            table: bound.table.clone(),
            rid,
            lsn,
        });
        Ok(())
    })?;
    Ok(1)
}

/// Gathers `(rid, record)` for every row the WHERE clause selects, via the
/// chosen index range or a heap scan.
fn collect_targets(
    ctx: &ExecCtx<'_>,
    scan: &BoundMutationScan,
) -> Result<Vec<(Rid, Vec<u8>)>, QueryError> {
    let tab = ctx.sm.table_meta(&scan.table)?;
    let heap = ctx.sm.heap(&scan.table)?;
    let mut targets = Vec::new();

    let mut consider = |rid: Rid, record: Vec<u8>| -> Result<(), QueryError> {
        let row = decode_record(&tab.cols, &record);
        for cond in &scan.conds {
            if !cond.eval(&row)? {
                return Ok(());
            }
        }
        targets.push((rid, record));
        Ok(())
    };

    match &scan.index_scan {
        Some((index, range)) => {
            let tree = ctx.sm.index(&index.name())?;
            let mut iter = match &range.start {
                Some(key) if range.start_strict => tree.upper_bound(key)?,
                Some(key) => tree.lower_bound(key)?,
                None => tree.leaf_begin(),
            };
            while let Some((key, rid)) = iter.next()? {
                if let Some(end) = &range.end {
                    let past = if range.end_inclusive {
                        key > *end
                    } else {
                        key >= *end
                    };
                    if past {
                        break;
                    }
                }
                let record = heap.get(rid, None)?;
                consider(rid, record)?;
            }
        }
        None => {
            let mut heap_scan = heap.scan();
            while let Some(rid) = heap_scan.next()? {
                let record = heap.get(rid, None)?;
                consider(rid, record)?;
            }
        }
    }
    Ok(targets)
}

/// DELETE FROM: index entries first, then the record, then the logical log
/// record and write-set entry carrying the old bytes.
pub fn execute_delete(ctx: &ExecCtx<'_>, scan: &BoundMutationScan) -> Result<usize, QueryError> {
    let tab = ctx.sm.table_meta(&scan.table)?.clone();
    let heap = ctx.sm.heap(&scan.table)?;
    let targets = collect_targets(ctx, scan)?;

    for (rid, record) in &targets {
        for index in &tab.indexes {
            let key = index_key(index, record);
            let tree = ctx.sm.index(&index.name())?;
            let removed = ctx.with_txn(|c| tree.delete(&key, Some(c)))?;
            if !removed {
                return Err(QueryError::Internal(format!(
                    "index {} lost the entry for a live record",
                    index.name()
                )));
            }
        }
        ctx.with_txn(|c| heap.delete(*rid, Some(c)))?;

        ctx.with_txn(|c| -> Result<(), QueryError> {
            let lsn = c.txn.log(
                c.log_mgr,
                LogPayload::Delete {
                    table: scan.table.clone(),
                    rid: *rid,
                    record: record.clone(),
                    undo_next: INVALID_LSN,
                },
            )?;
            c.txn.write_set.push(WriteRecord::Delete {
                table: scan.table.clone(),
                rid: *rid,
                old: record.clone(),
                lsn,
            });
            Ok(())
        })?;
    }
    Ok(targets.len())
}

/// UPDATE ... SET: per row, swap any index entries whose key changed (new
/// key in first, so a unique violation shows up before anything else moved),
/// then overwrite the record and log it.
pub fn execute_update(ctx: &ExecCtx<'_>, bound: &BoundUpdate) -> Result<usize, QueryError> {
    let scan = &bound.scan;
    let tab = ctx.sm.table_meta(&scan.table)?.clone();
    let heap = ctx.sm.heap(&scan.table)?;
    let targets = collect_targets(ctx, scan)?;

    for (rid, old_record) in &targets {
        let mut new_record = old_record.clone();
        for (pos, value) in &bound.assignments {
            let col = &tab.cols[*pos];
            value.write_bytes(
                &mut new_record[col.offset as usize..(col.offset + col.len) as usize],
            );
        }

        // Index maintenance. Keys compare as fixed-length byte strings, so
        // embedded NULs in CHAR columns cannot fake an equality.
        let mut swapped: Vec<(String, Vec<u8>, Vec<u8>)> = Vec::new();
        for index in &tab.indexes {
            let old_key = index_key(index, old_record);
            let new_key = index_key(index, &new_record);
            if old_key == new_key {
                continue;
            }
            let tree = ctx.sm.index(&index.name())?;
            let landed = ctx.with_txn(|c| tree.insert(&new_key, *rid, Some(c)))?;
            if landed.is_none() {
                for (prev_index, prev_old, prev_new) in swapped.iter().rev() {
                    let prev_tree = ctx.sm.index(prev_index)?;
                    ctx.with_txn(|c| prev_tree.delete(prev_new, Some(c)))?;
                    ctx.with_txn(|c| prev_tree.insert(prev_old, *rid, Some(c)))?;
                }
                return Err(QueryError::UniqueViolation(index.name()));
            }
            ctx.with_txn(|c| tree.delete(&old_key, Some(c)))?;
            swapped.push((index.name(), old_key, new_key));
        }

        ctx.with_txn(|c| heap.update(*rid, &new_record, Some(c)))?;

        ctx.with_txn(|c| -> Result<(), QueryError> {
            let lsn = c.txn.log(
                c.log_mgr,
                LogPayload::Update {
                    table: scan.table.clone(),
                    rid: *rid,
                    old: old_record.clone(),
                    new: new_record.clone(),
                    undo_next: INVALID_LSN,
                },
            )?;
            c.txn.write_set.push(WriteRecord::Update {
                table: scan.table.clone(),
                rid: *rid,
                old: old_record.clone(),
                lsn,
            });
            Ok(())
        })?;
    }
    Ok(targets.len())
}
