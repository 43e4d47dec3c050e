//! # Gneiss Storage Engine
//! The storage engine for QuarryDB.
//! This crate owns the on-disk and in-memory representation of data: paged
//! files, the buffer pool, slotted record heaps, B+-tree indexes, the
//! write-ahead log, and the lock and transaction managers.

/// The B+-tree index implementation.
pub mod btree;
/// The buffer pool manager.
pub mod buffer_pool;
/// Page-indexed file I/O and the append-only log file.
pub mod disk;
/// Error types shared across the engine.
pub mod error;
/// The slotted record heap built on top of the buffer pool.
pub mod heap;
/// The lock manager for concurrency control.
pub mod lock;
/// The page layout and typed accessors.
pub mod page;
/// The transaction lifecycle and rollback driver.
pub mod txn;
/// The write-ahead log manager and record formats.
pub mod wal;

use serde::{Deserialize, Serialize};

/// The size of a single page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// A handle to an open paged file, vended by the disk manager.
pub type FileId = u32;

/// A page number within one file. Page 0 is the file header page.
pub type PageNo = u32;

/// Sentinel page number: "no such page". Terminates the heap free list and
/// marks a failed unique-index insertion.
pub const NO_PAGE: PageNo = u32::MAX;

/// A log sequence number.
pub type Lsn = u32;

/// Sentinel LSN terminating every per-transaction chain.
pub const INVALID_LSN: Lsn = u32::MAX;

/// A transaction identifier.
pub type TxnId = u32;

/// A page identity: which file, and which page within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId {
    pub file_id: FileId,
    pub page_no: PageNo,
}

impl PageId {
    pub fn new(file_id: FileId, page_no: PageNo) -> Self {
        Self { file_id, page_no }
    }
}

/// A record identifier: the page and slot a heap record lives in.
/// Stable for the lifetime of the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rid {
    pub page_no: PageNo,
    pub slot_no: u32,
}

impl Rid {
    pub fn new(page_no: PageNo, slot_no: u32) -> Self {
        Self { page_no, slot_no }
    }
}

pub use buffer_pool::{BufferPool, PageGuard};
pub use page::Page;
