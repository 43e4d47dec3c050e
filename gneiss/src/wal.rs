//! The write-ahead log: record formats and the buffered log manager.
//!
//! Every record is framed by a fixed 20-byte header
//! `{ type, lsn, total_len, txn_id, prev_lsn }` (five little-endian u32s)
//! followed by a bincode-encoded payload. LSNs are assigned from a monotonic
//! counter at the moment a record enters the in-memory buffer.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::disk::DiskManager;
use crate::error::StorageError;
use crate::{Lsn, PageNo, Rid, TxnId, INVALID_LSN, PAGE_SIZE};

/// Size of the fixed record header.
pub const LOG_HEADER_SIZE: usize = 20;

/// The in-memory buffer holds a few pages of log before spilling.
const LOG_BUFFER_SIZE: usize = 8 * PAGE_SIZE;

/// Discriminant stored in the record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LogRecordType {
    Update = 0,
    Insert,
    Delete,
    Begin,
    Commit,
    Abort,
    End,
    PageImage,
    UndoNext,
    IndexPages,
    CreateIndex,
    DropIndex,
}

impl LogRecordType {
    fn from_u32(v: u32) -> Option<Self> {
        use LogRecordType::*;
        Some(match v {
            0 => Update,
            1 => Insert,
            2 => Delete,
            3 => Begin,
            4 => Commit,
            5 => Abort,
            6 => End,
            7 => PageImage,
            8 => UndoNext,
            9 => IndexPages,
            10 => CreateIndex,
            11 => DropIndex,
            _ => return None,
        })
    }
}

/// Type-specific payload of a log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogPayload {
    Begin,
    Commit,
    Abort,
    End,
    /// A record landed at `rid`; `record` is the inserted bytes.
    Insert {
        table: String,
        rid: Rid,
        record: Vec<u8>,
        undo_next: Lsn,
    },
    /// A record vanished from `rid`; `record` is the deleted bytes.
    Delete {
        table: String,
        rid: Rid,
        record: Vec<u8>,
        undo_next: Lsn,
    },
    /// The record at `rid` changed from `old` to `new`.
    Update {
        table: String,
        rid: Rid,
        old: Vec<u8>,
        new: Vec<u8>,
        undo_next: Lsn,
    },
    /// Physical before/after images of one heap page, used for redo.
    PageImage {
        table: String,
        page_no: PageNo,
        before: Vec<u8>,
        after: Vec<u8>,
    },
    /// Compensation record: during undo, continue the walk at `undo_next`.
    UndoNext { undo_next: Lsn },
    /// After-images of every index page one tree operation touched, plus the
    /// serialized index file header.
    IndexPages {
        index: String,
        page_nos: Vec<PageNo>,
        images: Vec<Vec<u8>>,
        file_header: Vec<u8>,
    },
    CreateIndex {
        table: String,
        cols: Vec<String>,
    },
    DropIndex {
        table: String,
        cols: Vec<String>,
    },
}

impl LogPayload {
    pub fn record_type(&self) -> LogRecordType {
        match self {
            LogPayload::Update { .. } => LogRecordType::Update,
            LogPayload::Insert { .. } => LogRecordType::Insert,
            LogPayload::Delete { .. } => LogRecordType::Delete,
            LogPayload::Begin => LogRecordType::Begin,
            LogPayload::Commit => LogRecordType::Commit,
            LogPayload::Abort => LogRecordType::Abort,
            LogPayload::End => LogRecordType::End,
            LogPayload::PageImage { .. } => LogRecordType::PageImage,
            LogPayload::UndoNext { .. } => LogRecordType::UndoNext,
            LogPayload::IndexPages { .. } => LogRecordType::IndexPages,
            LogPayload::CreateIndex { .. } => LogRecordType::CreateIndex,
            LogPayload::DropIndex { .. } => LogRecordType::DropIndex,
        }
    }
}

/// A fully-assembled log record. `lsn` is stamped by the log manager.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub txn_id: TxnId,
    pub prev_lsn: Lsn,
    pub payload: LogPayload,
}

impl LogRecord {
    pub fn record_type(&self) -> LogRecordType {
        self.payload.record_type()
    }

    /// Serialises header + payload into `out`, returning the total length.
    pub fn encode(&self, out: &mut Vec<u8>) -> usize {
        let body = bincode::serialize(&self.payload).expect("log payload serialises");
        let total_len = (LOG_HEADER_SIZE + body.len()) as u32;
        out.extend_from_slice(&(self.record_type() as u32).to_le_bytes());
        out.extend_from_slice(&self.lsn.to_le_bytes());
        out.extend_from_slice(&total_len.to_le_bytes());
        out.extend_from_slice(&self.txn_id.to_le_bytes());
        out.extend_from_slice(&self.prev_lsn.to_le_bytes());
        out.extend_from_slice(&body);
        total_len as usize
    }

    /// Decodes one record from the front of `buf`, returning it and its
    /// total encoded length. `offset` is only used for error reporting.
    pub fn decode(buf: &[u8], offset: u64) -> Result<(LogRecord, usize), StorageError> {
        let header = decode_header(buf, offset)?;
        let total = header.total_len as usize;
        if buf.len() < total {
            return Err(StorageError::CorruptLog(offset));
        }
        let payload: LogPayload = bincode::deserialize(&buf[LOG_HEADER_SIZE..total])
            .map_err(|_| StorageError::CorruptLog(offset))?;
        if payload.record_type() != header.record_type {
            return Err(StorageError::CorruptLog(offset));
        }
        Ok((
            LogRecord {
                lsn: header.lsn,
                txn_id: header.txn_id,
                prev_lsn: header.prev_lsn,
                payload,
            },
            total,
        ))
    }
}

/// The fixed header fields, as read from disk.
#[derive(Debug, Clone, Copy)]
pub struct LogRecordHeader {
    pub record_type: LogRecordType,
    pub lsn: Lsn,
    pub total_len: u32,
    pub txn_id: TxnId,
    pub prev_lsn: Lsn,
}

/// Reads the 20-byte header at the front of `buf`.
pub fn decode_header(buf: &[u8], offset: u64) -> Result<LogRecordHeader, StorageError> {
    if buf.len() < LOG_HEADER_SIZE {
        return Err(StorageError::CorruptLog(offset));
    }
    let word = |i: usize| u32::from_le_bytes(buf[i * 4..i * 4 + 4].try_into().unwrap());
    let record_type =
        LogRecordType::from_u32(word(0)).ok_or(StorageError::CorruptLog(offset))?;
    let total_len = word(2);
    if (total_len as usize) < LOG_HEADER_SIZE {
        return Err(StorageError::CorruptLog(offset));
    }
    Ok(LogRecordHeader {
        record_type,
        lsn: word(1),
        total_len,
        txn_id: word(3),
        prev_lsn: word(4),
    })
}

struct LogBuffer {
    data: Vec<u8>,
    next_lsn: Lsn,
}

/// Buffers log records in memory and flushes them to the disk manager's
/// append-only log file. One mutex guards the buffer and the LSN counter.
pub struct LogManager {
    disk: Arc<DiskManager>,
    inner: Mutex<LogBuffer>,
}

impl LogManager {
    pub fn new(disk: Arc<DiskManager>) -> Self {
        Self {
            disk,
            inner: Mutex::new(LogBuffer {
                data: Vec::with_capacity(LOG_BUFFER_SIZE),
                next_lsn: 0,
            }),
        }
    }

    /// Stamps the next LSN onto the record and appends it to the buffer,
    /// flushing first if the record would overflow it.
    pub fn append(
        &self,
        txn_id: TxnId,
        prev_lsn: Lsn,
        payload: LogPayload,
    ) -> Result<Lsn, StorageError> {
        let mut inner = self.inner.lock().unwrap();
        let mut record = LogRecord {
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn,
            payload,
        };
        record.lsn = inner.next_lsn;
        inner.next_lsn += 1;

        let mut encoded = Vec::new();
        record.encode(&mut encoded);
        if !inner.data.is_empty() && inner.data.len() + encoded.len() > LOG_BUFFER_SIZE {
            self.flush_locked(&mut inner)?;
        }
        inner.data.extend_from_slice(&encoded);
        Ok(record.lsn)
    }

    /// Writes the buffer through to the log file and issues a durability
    /// barrier.
    pub fn flush(&self) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        self.flush_locked(&mut inner)
    }

    fn flush_locked(&self, inner: &mut LogBuffer) -> Result<(), StorageError> {
        if !inner.data.is_empty() {
            self.disk.append_log(&inner.data)?;
            inner.data.clear();
        }
        self.disk.sync_log()?;
        Ok(())
    }

    /// The LSN the next appended record will receive.
    pub fn next_lsn(&self) -> Lsn {
        self.inner.lock().unwrap().next_lsn
    }

    /// Re-seeds the LSN counter; called once after recovery has scanned the
    /// existing log.
    pub fn reset_next_lsn(&self, lsn: Lsn) {
        self.inner.lock().unwrap().next_lsn = lsn;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_records() -> Vec<LogPayload> {
        vec![
            LogPayload::Begin,
            LogPayload::Insert {
                table: "t".into(),
                rid: Rid::new(1, 3),
                record: vec![1, 2, 3, 4],
                undo_next: INVALID_LSN,
            },
            LogPayload::Update {
                table: "t".into(),
                rid: Rid::new(1, 3),
                old: vec![1, 2, 3, 4],
                new: vec![5, 6, 7, 8],
                undo_next: 7,
            },
            LogPayload::PageImage {
                table: "t".into(),
                page_no: 1,
                before: vec![0; 16],
                after: vec![9; 16],
            },
            LogPayload::IndexPages {
                index: "t_a".into(),
                page_nos: vec![1, 2],
                images: vec![vec![1; 8], vec![2; 8]],
                file_header: vec![3; 24],
            },
            LogPayload::UndoNext { undo_next: 42 },
            LogPayload::CreateIndex {
                table: "t".into(),
                cols: vec!["a".into(), "b".into()],
            },
            LogPayload::Commit,
            LogPayload::End,
        ]
    }

    #[test]
    fn encode_decode_round_trips_every_record_type() {
        for (i, payload) in sample_records().into_iter().enumerate() {
            let record = LogRecord {
                lsn: i as Lsn,
                txn_id: 9,
                prev_lsn: if i == 0 { INVALID_LSN } else { i as Lsn - 1 },
                payload,
            };
            let mut buf = Vec::new();
            let len = record.encode(&mut buf);
            assert_eq!(len, buf.len());
            let (decoded, consumed) = LogRecord::decode(&buf, 0).unwrap();
            assert_eq!(consumed, len);
            assert_eq!(decoded, record);
        }
    }

    #[test]
    fn header_is_exactly_twenty_bytes() {
        let record = LogRecord {
            lsn: 5,
            txn_id: 2,
            prev_lsn: 4,
            payload: LogPayload::Commit,
        };
        let mut buf = Vec::new();
        record.encode(&mut buf);
        let header = decode_header(&buf, 0).unwrap();
        assert_eq!(header.record_type, LogRecordType::Commit);
        assert_eq!(header.lsn, 5);
        assert_eq!(header.txn_id, 2);
        assert_eq!(header.prev_lsn, 4);
        assert_eq!(header.total_len as usize, buf.len());
        assert_eq!(LOG_HEADER_SIZE, 20);
    }

    #[test]
    fn append_assigns_monotonic_lsns_and_flush_persists() {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskManager::open(dir.path()).unwrap());
        let lm = LogManager::new(Arc::clone(&disk));

        let a = lm.append(1, INVALID_LSN, LogPayload::Begin).unwrap();
        let b = lm.append(1, a, LogPayload::Commit).unwrap();
        let c = lm.append(1, b, LogPayload::End).unwrap();
        assert_eq!((a, b, c), (0, 1, 2));

        // Nothing reaches disk until a flush.
        assert_eq!(disk.log_len().unwrap(), 0);
        lm.flush().unwrap();
        let len = disk.log_len().unwrap();
        assert!(len > 0);

        let mut buf = vec![0u8; len as usize];
        disk.read_log(&mut buf, 0).unwrap();
        let (first, n) = LogRecord::decode(&buf, 0).unwrap();
        assert_eq!(first.payload, LogPayload::Begin);
        assert_eq!(first.prev_lsn, INVALID_LSN);
        let (second, _) = LogRecord::decode(&buf[n..], n as u64).unwrap();
        assert_eq!(second.lsn, 1);
        assert_eq!(second.prev_lsn, 0);
    }

    #[test]
    fn corrupt_header_is_rejected() {
        let buf = [0xFFu8; LOG_HEADER_SIZE];
        assert!(matches!(
            decode_header(&buf, 7),
            Err(StorageError::CorruptLog(7))
        ));
    }
}
