//! Crash recovery: analyse, redo, undo over the write-ahead log. Runs once
//! at startup, before any session opens.

use std::collections::HashMap;

use crate::catalog::SystemManager;
use crate::errors::QueryError;
use gneiss::buffer_pool::BufferPool;
use gneiss::disk::DiskManager;
use gneiss::lock::LockManager;
use gneiss::txn::{Context, RollbackOps, Transaction};
use gneiss::wal::{LogManager, LogPayload, LogRecord};
use gneiss::{Lsn, PageNo, TxnId, INVALID_LSN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnStatus {
    UndoCandidate,
    Committed,
    Aborting,
}

#[derive(Debug, Clone, Copy)]
struct TxnInfo {
    last_lsn: Lsn,
    status: TxnStatus,
}

/// Outcome of the recovery pass: counters to seed the running system with.
pub struct RecoveryOutcome {
    pub next_txn_id: TxnId,
    pub next_lsn: Lsn,
}

/// Runs analyse → redo → undo, then flushes every data page and truncates
/// the now-redundant log.
pub fn recover(
    disk: &DiskManager,
    pool: &BufferPool,
    log_mgr: &LogManager,
    lock_mgr: &LockManager,
    sm: &mut SystemManager,
) -> Result<RecoveryOutcome, QueryError> {
    let len = disk.log_len()? as usize;
    let mut buf = vec![0u8; len];
    disk.read_log(&mut buf, 0)?;

    // Phase 1: analyse. Forward scan building the active-transaction table,
    // the dirty-page table, and an LSN-to-offset map for the later phases.
    let mut active: HashMap<TxnId, TxnInfo> = HashMap::new();
    let mut dirty: HashMap<(String, PageNo), Lsn> = HashMap::new();
    let mut lsn_offset: HashMap<Lsn, usize> = HashMap::new();
    let mut max_lsn = 0;
    let mut max_txn_id = 0;

    let mut offset = 0;
    while offset < len {
        let (record, total) = LogRecord::decode(&buf[offset..], offset as u64)?;
        lsn_offset.insert(record.lsn, offset);
        max_lsn = max_lsn.max(record.lsn);
        max_txn_id = max_txn_id.max(record.txn_id);

        let touch = |active: &mut HashMap<TxnId, TxnInfo>, status: Option<TxnStatus>| {
            let info = active.entry(record.txn_id).or_insert(TxnInfo {
                last_lsn: record.lsn,
                status: TxnStatus::UndoCandidate,
            });
            info.last_lsn = record.lsn;
            if let Some(status) = status {
                info.status = status;
            }
        };
        match &record.payload {
            LogPayload::Begin => touch(&mut active, Some(TxnStatus::UndoCandidate)),
            LogPayload::Commit => touch(&mut active, Some(TxnStatus::Committed)),
            LogPayload::Abort => touch(&mut active, Some(TxnStatus::Aborting)),
            LogPayload::End => {
                active.remove(&record.txn_id);
            }
            LogPayload::Insert { .. }
            | LogPayload::Delete { .. }
            | LogPayload::Update { .. }
            | LogPayload::UndoNext { .. }
            | LogPayload::CreateIndex { .. }
            | LogPayload::DropIndex { .. } => touch(&mut active, None),
            LogPayload::PageImage { table, page_no, .. } => {
                touch(&mut active, None);
                dirty.entry((table.clone(), *page_no)).or_insert(record.lsn);
            }
            LogPayload::IndexPages {
                index, page_nos, ..
            } => {
                touch(&mut active, None);
                for &page_no in page_nos {
                    dirty.entry((index.clone(), page_no)).or_insert(record.lsn);
                }
            }
        }
        offset += total;
    }
    log::debug!(
        "recovery analyse: {} live txns, {} dirty pages, max lsn {}",
        active.len(),
        dirty.len(),
        max_lsn
    );

    // Phase 2: redo from the oldest recovery LSN. Page images apply only
    // when the logged LSN beats the LSN already stamped on the page.
    if let Some(&redo_lsn) = dirty.values().min() {
        let mut offset = *lsn_offset
            .get(&redo_lsn)
            .ok_or(gneiss::error::StorageError::CorruptLog(0))?;
        while offset < len {
            let (record, total) = LogRecord::decode(&buf[offset..], offset as u64)?;
            match &record.payload {
                LogPayload::PageImage {
                    table,
                    page_no,
                    after,
                    ..
                } => {
                    // A dropped table's images have nothing to land on.
                    if let Ok(heap) = sm.heap(table) {
                        if *page_no == 0 {
                            heap.restore_header(after, record.lsn)?;
                        } else {
                            heap.apply_page_image(*page_no, after, record.lsn)?;
                        }
                    }
                }
                LogPayload::IndexPages {
                    index,
                    page_nos,
                    images,
                    file_header,
                } => {
                    if let Ok(tree) = sm.index(index) {
                        tree.apply_index_pages(page_nos, images, file_header, record.lsn)?;
                    }
                }
                _ => {}
            }
            offset += total;
        }
    }

    // Phase 3: undo, loser with the greatest last LSN first. Every undone
    // action goes through the shared rollback primitives and leaves a CLR
    // behind, so a crash during recovery is itself recoverable. The LSN
    // counter resumes past the scanned log first, so the CLRs appended here
    // get fresh LSNs.
    log_mgr.reset_next_lsn(if len == 0 { 0 } else { max_lsn + 1 });
    loop {
        let Some((&txn_id, &info)) = active.iter().max_by_key(|(_, info)| info.last_lsn) else {
            break;
        };
        active.remove(&txn_id);
        if info.status == TxnStatus::Committed {
            continue;
        }
        log::debug!("recovery undo: rolling back txn {txn_id}");

        let mut txn = Transaction::new(txn_id, info.last_lsn);
        let mut cursor = info.last_lsn;
        while cursor != INVALID_LSN {
            let Some(&offset) = lsn_offset.get(&cursor) else {
                break;
            };
            let (record, _) = LogRecord::decode(&buf[offset..], offset as u64)?;

            // A compensation record jumps the walk past work already undone.
            if let LogPayload::UndoNext { undo_next } = &record.payload {
                if *undo_next == INVALID_LSN {
                    break;
                }
                cursor = *undo_next;
                continue;
            }

            let undone = {
                let mut ctx = Context {
                    lock_mgr,
                    log_mgr,
                    txn: &mut txn,
                };
                match &record.payload {
                    LogPayload::Insert { table, rid, .. } => {
                        sm.undo_insert(table, *rid, &mut ctx)?;
                        true
                    }
                    LogPayload::Update {
                        table, rid, old, ..
                    } => {
                        sm.undo_update(table, *rid, old, &mut ctx)?;
                        true
                    }
                    LogPayload::Delete { table, record, .. } => {
                        sm.undo_delete(table, record, &mut ctx)?;
                        true
                    }
                    LogPayload::CreateIndex { table, cols } => {
                        sm.undo_create_index(table, cols, &mut ctx)?;
                        true
                    }
                    LogPayload::DropIndex { table, cols } => {
                        sm.undo_drop_index(table, cols, &mut ctx)?;
                        true
                    }
                    _ => false,
                }
            };
            if undone {
                txn.log(
                    log_mgr,
                    LogPayload::UndoNext {
                        undo_next: record.prev_lsn,
                    },
                )?;
            }
            cursor = record.prev_lsn;
        }
        txn.log(log_mgr, LogPayload::End)?;
        lock_mgr.release_all(&mut txn);
    }

    // The log is now fully applied: checkpoint by flushing every data page,
    // then start a fresh log. LSNs keep counting upward so page LSNs stay
    // comparable with future records.
    log_mgr.flush()?;
    pool.flush_everything()?;
    disk.truncate_log()?;
    Ok(RecoveryOutcome {
        next_txn_id: max_txn_id + 1,
        next_lsn: log_mgr.next_lsn(),
    })
}
