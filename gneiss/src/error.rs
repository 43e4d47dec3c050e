use crate::{FileId, PageNo, Rid, TxnId};
use std::io;
use thiserror::Error;

/// Why a transaction was forcibly aborted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// A lock could not be granted immediately; the requester is killed
    /// rather than left waiting.
    DeadlockPrevention,
    /// A lock was requested after the transaction already released one.
    LockOnShrinking,
    /// A lock upgrade conflicted with another holder.
    Upgrade,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::DeadlockPrevention => write!(f, "deadlock prevention"),
            AbortReason::LockOnShrinking => write!(f, "lock acquired on shrinking transaction"),
            AbortReason::Upgrade => write!(f, "conflicting lock upgrade"),
        }
    }
}

/// Signalled when the lock manager refuses a request. The statement layer
/// is expected to roll the transaction back on receipt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("transaction {txn_id} aborted: {reason}")]
pub struct TransactionAbort {
    pub txn_id: TxnId,
    pub reason: AbortReason,
}

/// Errors raised by the storage engine.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("file `{0}` already exists")]
    FileExists(String),

    #[error("file `{0}` not found")]
    FileNotFound(String),

    #[error("unknown file handle {0}")]
    BadFileId(FileId),

    #[error("page {page_no} does not exist in file {file_id}")]
    PageNotExist { file_id: FileId, page_no: PageNo },

    #[error("no record at page {} slot {}", rid.page_no, rid.slot_no)]
    RecordNotFound { rid: Rid },

    #[error("buffer pool exhausted: every frame is pinned")]
    PoolExhausted,

    #[error("page {page_no} of file {file_id} is not cached")]
    NotCached { file_id: FileId, page_no: PageNo },

    #[error("page {page_no} of file {file_id} is not pinned")]
    NotPinned { file_id: FileId, page_no: PageNo },

    #[error("log record corrupt at offset {0}")]
    CorruptLog(u64),

    #[error(transparent)]
    Abort(#[from] TransactionAbort),

    #[error("internal storage invariant violated: {0}")]
    Internal(String),
}

impl StorageError {
    /// True when the error carries a forced transaction abort.
    pub fn is_abort(&self) -> bool {
        matches!(self, StorageError::Abort(_))
    }
}
