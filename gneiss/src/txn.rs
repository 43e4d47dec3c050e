//! Transaction lifecycle: begin/commit/abort, the per-transaction write set,
//! and the abort-time rollback driver.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::StorageError;
use crate::lock::{LockId, LockManager};
use crate::wal::{LogManager, LogPayload};
use crate::{Lsn, Rid, TxnId, INVALID_LSN};

/// Two-phase locking lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Default,
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// One entry of a transaction's write set. `lsn` is the LSN of the logical
/// log record describing the same change, which abort-time CLRs point at.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRecord {
    Insert {
        table: String,
        rid: Rid,
        lsn: Lsn,
    },
    Update {
        table: String,
        rid: Rid,
        old: Vec<u8>,
        lsn: Lsn,
    },
    Delete {
        table: String,
        rid: Rid,
        old: Vec<u8>,
        lsn: Lsn,
    },
    CreateIndex {
        table: String,
        cols: Vec<String>,
        lsn: Lsn,
    },
    DropIndex {
        table: String,
        cols: Vec<String>,
        lsn: Lsn,
    },
}

impl WriteRecord {
    pub fn lsn(&self) -> Lsn {
        match self {
            WriteRecord::Insert { lsn, .. }
            | WriteRecord::Update { lsn, .. }
            | WriteRecord::Delete { lsn, .. }
            | WriteRecord::CreateIndex { lsn, .. }
            | WriteRecord::DropIndex { lsn, .. } => *lsn,
        }
    }
}

/// A live transaction. `prev_lsn` threads the transaction's log records into
/// a backward chain; `write_set` is kept in program order.
#[derive(Debug)]
pub struct Transaction {
    pub id: TxnId,
    pub state: TxnState,
    pub prev_lsn: Lsn,
    pub write_set: Vec<WriteRecord>,
    pub lock_set: Vec<LockId>,
}

impl Transaction {
    pub fn new(id: TxnId, prev_lsn: Lsn) -> Self {
        Self {
            id,
            state: TxnState::Default,
            prev_lsn,
            write_set: Vec::new(),
            lock_set: Vec::new(),
        }
    }

    /// Appends `payload` to the log, chained onto this transaction.
    pub fn log(&mut self, log_mgr: &LogManager, payload: LogPayload) -> Result<Lsn, StorageError> {
        let lsn = log_mgr.append(self.id, self.prev_lsn, payload)?;
        self.prev_lsn = lsn;
        Ok(lsn)
    }
}

/// Everything a storage operation needs to participate in a transaction:
/// the lock table, the log, and the transaction itself.
pub struct Context<'a> {
    pub lock_mgr: &'a LockManager,
    pub log_mgr: &'a LogManager,
    pub txn: &'a mut Transaction,
}

/// The typed rollback primitives, owned by the catalog/storage layer above
/// this crate. Abort and crash recovery both drive undo through these, so
/// the inverse of every operation is defined in exactly one place.
pub trait RollbackOps {
    type Error: From<StorageError>;

    /// Undo an insert: delete the record at `rid` and its index entries.
    fn undo_insert(&mut self, table: &str, rid: Rid, ctx: &mut Context<'_>)
        -> Result<(), Self::Error>;

    /// Undo an update: restore `old` at `rid`, swapping index entries back.
    fn undo_update(
        &mut self,
        table: &str,
        rid: Rid,
        old: &[u8],
        ctx: &mut Context<'_>,
    ) -> Result<(), Self::Error>;

    /// Undo a delete: re-insert `old` and its index entries.
    fn undo_delete(
        &mut self,
        table: &str,
        old: &[u8],
        ctx: &mut Context<'_>,
    ) -> Result<(), Self::Error>;

    /// Undo a create-index: drop the index again.
    fn undo_create_index(
        &mut self,
        table: &str,
        cols: &[String],
        ctx: &mut Context<'_>,
    ) -> Result<(), Self::Error>;

    /// Undo a drop-index: recreate the index and repopulate it.
    fn undo_drop_index(
        &mut self,
        table: &str,
        cols: &[String],
        ctx: &mut Context<'_>,
    ) -> Result<(), Self::Error>;
}

/// Hands out transaction ids and runs the commit/abort protocols.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
}

impl TransactionManager {
    pub fn new(initial_txn_id: TxnId) -> Self {
        Self {
            next_txn_id: AtomicU32::new(initial_txn_id),
        }
    }

    /// Starts a transaction: fresh id, `Begin` in the log.
    pub fn begin(&self, log_mgr: &LogManager) -> Result<Transaction, StorageError> {
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let mut txn = Transaction::new(id, INVALID_LSN);
        txn.log(log_mgr, LogPayload::Begin)?;
        log::debug!("txn {id} began");
        Ok(txn)
    }

    /// Commits: `Commit` + `End` in the log, synchronous flush, locks
    /// released in reverse acquisition order.
    pub fn commit(
        &self,
        txn: &mut Transaction,
        log_mgr: &LogManager,
        lock_mgr: &LockManager,
    ) -> Result<(), StorageError> {
        txn.log(log_mgr, LogPayload::Commit)?;
        txn.log(log_mgr, LogPayload::End)?;
        log_mgr.flush()?;
        txn.write_set.clear();
        lock_mgr.release_all(txn);
        txn.state = TxnState::Committed;
        log::debug!("txn {} committed", txn.id);
        Ok(())
    }

    /// Aborts: `Abort` in the log, then the write set is undone newest to
    /// oldest through the rollback primitives, a CLR chaining each undone
    /// step to the next-older entry so a crash mid-rollback recovers, then
    /// `End`, flush, and lock release.
    pub fn abort<R: RollbackOps>(
        &self,
        txn: &mut Transaction,
        rollback: &mut R,
        log_mgr: &LogManager,
        lock_mgr: &LockManager,
    ) -> Result<(), R::Error> {
        txn.log(log_mgr, LogPayload::Abort)?;
        log_mgr.flush()?;

        let mut write_set = std::mem::take(&mut txn.write_set);
        while let Some(entry) = write_set.pop() {
            let undo_next = write_set.last().map(WriteRecord::lsn).unwrap_or(INVALID_LSN);
            let mut ctx = Context {
                lock_mgr,
                log_mgr,
                txn,
            };
            match &entry {
                WriteRecord::Insert { table, rid, .. } => {
                    rollback.undo_insert(table, *rid, &mut ctx)?;
                }
                WriteRecord::Update {
                    table, rid, old, ..
                } => {
                    rollback.undo_update(table, *rid, old, &mut ctx)?;
                }
                WriteRecord::Delete { table, old, .. } => {
                    rollback.undo_delete(table, old, &mut ctx)?;
                }
                WriteRecord::CreateIndex { table, cols, .. } => {
                    rollback.undo_create_index(table, cols, &mut ctx)?;
                }
                WriteRecord::DropIndex { table, cols, .. } => {
                    rollback.undo_drop_index(table, cols, &mut ctx)?;
                }
            }
            txn.log(log_mgr, LogPayload::UndoNext { undo_next })
                .map_err(R::Error::from)?;
        }

        txn.log(log_mgr, LogPayload::End)?;
        log_mgr.flush()?;
        // Rollback primitives may have appended fresh entries (index DDL
        // undo does); the transaction is finished either way.
        txn.write_set.clear();
        lock_mgr.release_all(txn);
        txn.state = TxnState::Aborted;
        log::debug!("txn {} aborted", txn.id);
        Ok(())
    }
}
