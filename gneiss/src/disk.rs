//! Page-indexed file I/O for table and index files, plus the append-only
//! write-ahead log file. All paths are relative to one database directory.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::StorageError;
use crate::{FileId, PageId, PageNo, PAGE_SIZE};

/// Name of the write-ahead log file inside the database directory.
pub const LOG_FILE_NAME: &str = "wal.log";

struct OpenFile {
    file: File,
    name: String,
    num_pages: PageNo,
}

#[derive(Default)]
struct FileTable {
    next_id: FileId,
    by_name: HashMap<String, FileId>,
    open: HashMap<FileId, OpenFile>,
}

/// Owns every open file of one database directory and the log file.
pub struct DiskManager {
    root: PathBuf,
    files: Mutex<FileTable>,
    log: Mutex<File>,
}

impl DiskManager {
    /// Opens (creating if needed) the database directory and its log file.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        let log = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(root.join(LOG_FILE_NAME))?;
        Ok(Self {
            root,
            files: Mutex::new(FileTable::default()),
            log: Mutex::new(log),
        })
    }

    /// The database directory this manager is rooted at.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Creates a new, empty paged file. Fails if a file of that name exists.
    pub fn create_file(&self, name: &str) -> Result<(), StorageError> {
        let path = self.path_of(name);
        if path.exists() {
            return Err(StorageError::FileExists(name.to_string()));
        }
        File::create(path)?;
        Ok(())
    }

    /// Opens an existing file and returns a handle for page I/O.
    pub fn open_file(&self, name: &str) -> Result<FileId, StorageError> {
        let mut files = self.files.lock().unwrap();
        if let Some(&id) = files.by_name.get(name) {
            return Ok(id);
        }
        let path = self.path_of(name);
        if !path.exists() {
            return Err(StorageError::FileNotFound(name.to_string()));
        }
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let num_pages = (file.metadata()?.len() / PAGE_SIZE as u64) as PageNo;
        let id = files.next_id;
        files.next_id += 1;
        files.by_name.insert(name.to_string(), id);
        files.open.insert(
            id,
            OpenFile {
                file,
                name: name.to_string(),
                num_pages,
            },
        );
        Ok(id)
    }

    /// Closes an open file handle.
    pub fn close_file(&self, file_id: FileId) -> Result<(), StorageError> {
        let mut files = self.files.lock().unwrap();
        let open = files
            .open
            .remove(&file_id)
            .ok_or(StorageError::BadFileId(file_id))?;
        files.by_name.remove(&open.name);
        open.file.sync_all()?;
        Ok(())
    }

    /// Removes a file from disk. The file must be closed.
    pub fn destroy_file(&self, name: &str) -> Result<(), StorageError> {
        let files = self.files.lock().unwrap();
        if files.by_name.contains_key(name) {
            return Err(StorageError::Internal(format!(
                "cannot destroy open file `{name}`"
            )));
        }
        drop(files);
        let path = self.path_of(name);
        if !path.exists() {
            return Err(StorageError::FileNotFound(name.to_string()));
        }
        fs::remove_file(path)?;
        Ok(())
    }

    /// The name a file handle was opened under.
    pub fn file_name(&self, file_id: FileId) -> Result<String, StorageError> {
        let files = self.files.lock().unwrap();
        files
            .open
            .get(&file_id)
            .map(|f| f.name.clone())
            .ok_or(StorageError::BadFileId(file_id))
    }

    /// Number of pages currently allocated in the file.
    pub fn num_pages(&self, file_id: FileId) -> Result<PageNo, StorageError> {
        let files = self.files.lock().unwrap();
        files
            .open
            .get(&file_id)
            .map(|f| f.num_pages)
            .ok_or(StorageError::BadFileId(file_id))
    }

    /// Hands out the next page number of the file without touching disk;
    /// the page materialises when it is first written back.
    pub fn allocate_page_no(&self, file_id: FileId) -> Result<PageNo, StorageError> {
        let mut files = self.files.lock().unwrap();
        let open = files
            .open
            .get_mut(&file_id)
            .ok_or(StorageError::BadFileId(file_id))?;
        let page_no = open.num_pages;
        open.num_pages += 1;
        Ok(page_no)
    }

    /// Reads one page into `buf`. Pages past the end of the file read as
    /// zeroes (they have been allocated but never written back).
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<(), StorageError> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let mut files = self.files.lock().unwrap();
        let open = files
            .open
            .get_mut(&page_id.file_id)
            .ok_or(StorageError::BadFileId(page_id.file_id))?;
        if page_id.page_no >= open.num_pages {
            return Err(StorageError::PageNotExist {
                file_id: page_id.file_id,
                page_no: page_id.page_no,
            });
        }
        let offset = page_id.page_no as u64 * PAGE_SIZE as u64;
        let file_len = open.file.metadata()?.len();
        buf.fill(0);
        if offset >= file_len {
            return Ok(());
        }
        open.file.seek(SeekFrom::Start(offset))?;
        let mut read = 0;
        while read < buf.len() {
            let n = open.file.read(&mut buf[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        Ok(())
    }

    /// Writes one page and syncs it to stable storage.
    pub fn write_page(&self, page_id: PageId, buf: &[u8]) -> Result<(), StorageError> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let mut files = self.files.lock().unwrap();
        let open = files
            .open
            .get_mut(&page_id.file_id)
            .ok_or(StorageError::BadFileId(page_id.file_id))?;
        let offset = page_id.page_no as u64 * PAGE_SIZE as u64;
        open.file.seek(SeekFrom::Start(offset))?;
        open.file.write_all(buf)?;
        open.file.sync_all()?;
        if page_id.page_no >= open.num_pages {
            open.num_pages = page_id.page_no + 1;
        }
        Ok(())
    }

    /// Appends raw bytes to the log file. Durability is the caller's call;
    /// see [`sync_log`](Self::sync_log).
    pub fn append_log(&self, data: &[u8]) -> Result<(), StorageError> {
        let mut log = self.log.lock().unwrap();
        log.seek(SeekFrom::End(0))?;
        log.write_all(data)?;
        Ok(())
    }

    /// Durability barrier on the log file.
    pub fn sync_log(&self) -> Result<(), StorageError> {
        self.log.lock().unwrap().sync_all()?;
        Ok(())
    }

    /// Reads up to `buf.len()` bytes of the log file at `offset`.
    /// Returns the number of bytes read (0 at end of log).
    pub fn read_log(&self, buf: &mut [u8], offset: u64) -> Result<usize, StorageError> {
        let mut log = self.log.lock().unwrap();
        let len = log.metadata()?.len();
        if offset >= len {
            return Ok(0);
        }
        log.seek(SeekFrom::Start(offset))?;
        let mut read = 0;
        while read < buf.len() {
            let n = log.read(&mut buf[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        Ok(read)
    }

    /// Length of the log file in bytes.
    pub fn log_len(&self) -> Result<u64, StorageError> {
        Ok(self.log.lock().unwrap().metadata()?.len())
    }

    /// Discards the entire log. Used after recovery has flushed every data
    /// page, so nothing in the log is needed any longer.
    pub fn truncate_log(&self) -> Result<(), StorageError> {
        let log = self.log.lock().unwrap();
        log.set_len(0)?;
        log.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn page_round_trip_survives_reopen() {
        let dir = tempdir().unwrap();
        let dm = DiskManager::open(dir.path()).unwrap();
        dm.create_file("t").unwrap();
        let fd = dm.open_file("t").unwrap();

        let page_no = dm.allocate_page_no(fd).unwrap();
        assert_eq!(page_no, 0);
        let mut buf = vec![0u8; PAGE_SIZE];
        buf[0] = 0xAB;
        buf[PAGE_SIZE - 1] = 0xCD;
        dm.write_page(PageId::new(fd, page_no), &buf).unwrap();
        dm.close_file(fd).unwrap();

        let dm = DiskManager::open(dir.path()).unwrap();
        let fd = dm.open_file("t").unwrap();
        assert_eq!(dm.num_pages(fd).unwrap(), 1);
        let mut out = vec![0u8; PAGE_SIZE];
        dm.read_page(PageId::new(fd, 0), &mut out).unwrap();
        assert_eq!(out, buf);
    }

    #[test]
    fn allocated_but_unwritten_page_reads_as_zeroes() {
        let dir = tempdir().unwrap();
        let dm = DiskManager::open(dir.path()).unwrap();
        dm.create_file("t").unwrap();
        let fd = dm.open_file("t").unwrap();
        let page_no = dm.allocate_page_no(fd).unwrap();
        let mut out = vec![0xFFu8; PAGE_SIZE];
        dm.read_page(PageId::new(fd, page_no), &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn out_of_range_page_is_an_error() {
        let dir = tempdir().unwrap();
        let dm = DiskManager::open(dir.path()).unwrap();
        dm.create_file("t").unwrap();
        let fd = dm.open_file("t").unwrap();
        let mut out = vec![0u8; PAGE_SIZE];
        let err = dm.read_page(PageId::new(fd, 3), &mut out).unwrap_err();
        assert!(matches!(err, StorageError::PageNotExist { page_no: 3, .. }));
    }

    #[test]
    fn log_appends_and_reads_back() {
        let dir = tempdir().unwrap();
        let dm = DiskManager::open(dir.path()).unwrap();
        dm.append_log(b"hello ").unwrap();
        dm.append_log(b"wal").unwrap();
        dm.sync_log().unwrap();
        assert_eq!(dm.log_len().unwrap(), 9);

        let mut buf = [0u8; 3];
        let n = dm.read_log(&mut buf, 6).unwrap();
        assert_eq!(n, 3);
        assert_eq!(&buf, b"wal");
        assert_eq!(dm.read_log(&mut buf, 9).unwrap(), 0);

        dm.truncate_log().unwrap();
        assert_eq!(dm.log_len().unwrap(), 0);
    }

    #[test]
    fn destroy_requires_closed_file() {
        let dir = tempdir().unwrap();
        let dm = DiskManager::open(dir.path()).unwrap();
        dm.create_file("t").unwrap();
        let fd = dm.open_file("t").unwrap();
        assert!(dm.destroy_file("t").is_err());
        dm.close_file(fd).unwrap();
        dm.destroy_file("t").unwrap();
        assert!(dm.open_file("t").is_err());
    }
}
