//! The buffer pool: a fixed array of frames caching disk pages.
//!
//! One mutex guards the page table, free list, replacer, and per-frame
//! metadata. Page bytes live in a per-frame `RwLock` and are accessed while
//! the pool mutex is released; the caller's pin keeps the frame assignment
//! stable. Before any dirty page is written back, the log is flushed, which
//! is the write-ahead rule in its simplest correct form.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::disk::DiskManager;
use crate::error::StorageError;
use crate::wal::LogManager;
use crate::{FileId, Page, PageId};

/// Default number of frames.
pub const BUFFER_POOL_SIZE: usize = 256;

struct Frame {
    page: RwLock<Page>,
}

#[derive(Debug, Clone, Copy, Default)]
struct FrameMeta {
    page_id: Option<PageId>,
    pin_count: u32,
    dirty: bool,
}

struct PoolState {
    meta: Vec<FrameMeta>,
    page_table: HashMap<PageId, usize>,
    free_list: Vec<usize>,
    /// Unpinned frames, least-recently-unpinned first.
    replacer: VecDeque<usize>,
}

/// The buffer pool manager.
pub struct BufferPool {
    disk: Arc<DiskManager>,
    log: Arc<LogManager>,
    frames: Vec<Arc<Frame>>,
    state: Mutex<PoolState>,
}

/// An RAII pin on one cached page. Dropping the guard unpins it.
pub struct PageGuard<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    frame: Arc<Frame>,
}

impl std::fmt::Debug for PageGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard").field("page_id", &self.page_id).finish()
    }
}

impl PageGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.frame.page.read().unwrap()
    }

    /// Marks the frame dirty and hands out mutable access to the bytes.
    pub fn write(&self) -> RwLockWriteGuard<'_, Page> {
        self.pool.mark_dirty(self.page_id);
        self.frame.page.write().unwrap()
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        // A pin taken out through fetch/new_page always exists, so the only
        // failure mode here would be a pool-internal accounting bug.
        let _ = self.pool.unpin(self.page_id, false);
    }
}

impl BufferPool {
    pub fn new(disk: Arc<DiskManager>, log: Arc<LogManager>, size: usize) -> Self {
        let mut frames = Vec::with_capacity(size);
        let mut free_list = Vec::with_capacity(size);
        for i in 0..size {
            frames.push(Arc::new(Frame {
                page: RwLock::new(Page::new(PageId::new(0, 0))),
            }));
            free_list.push(i);
        }
        free_list.reverse();
        Self {
            disk,
            log,
            frames,
            state: Mutex::new(PoolState {
                meta: vec![FrameMeta::default(); size],
                page_table: HashMap::new(),
                free_list,
                replacer: VecDeque::new(),
            }),
        }
    }

    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    /// Pins the page, loading it from disk if it is not cached.
    pub fn fetch(&self, page_id: PageId) -> Result<PageGuard<'_>, StorageError> {
        let mut state = self.state.lock().unwrap();
        if let Some(&idx) = state.page_table.get(&page_id) {
            self.pin_existing(&mut state, idx);
            return Ok(self.guard(page_id, idx));
        }

        let idx = self.take_victim(&mut state)?;
        let mut page = Page::new(page_id);
        self.disk.read_page(page_id, &mut page.data[..])?;
        self.install(&mut state, idx, page_id, page, false);
        Ok(self.guard(page_id, idx))
    }

    /// Allocates a fresh page in `file_id`, pinned and zeroed.
    pub fn new_page(&self, file_id: FileId) -> Result<PageGuard<'_>, StorageError> {
        let mut state = self.state.lock().unwrap();
        let idx = self.take_victim(&mut state)?;
        let page_no = self.disk.allocate_page_no(file_id)?;
        let page_id = PageId::new(file_id, page_no);
        self.install(&mut state, idx, page_id, Page::new(page_id), true);
        Ok(self.guard(page_id, idx))
    }

    /// Drops one pin. `dirty_hint` is OR-ed into the frame's dirty flag.
    pub fn unpin(&self, page_id: PageId, dirty_hint: bool) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        let idx = *state
            .page_table
            .get(&page_id)
            .ok_or(StorageError::NotCached {
                file_id: page_id.file_id,
                page_no: page_id.page_no,
            })?;
        let meta = &mut state.meta[idx];
        if meta.pin_count == 0 {
            return Err(StorageError::NotPinned {
                file_id: page_id.file_id,
                page_no: page_id.page_no,
            });
        }
        meta.pin_count -= 1;
        meta.dirty |= dirty_hint;
        if meta.pin_count == 0 {
            state.replacer.push_back(idx);
        }
        Ok(())
    }

    /// Writes a cached page through to disk and clears its dirty flag.
    pub fn flush(&self, page_id: PageId) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        if let Some(&idx) = state.page_table.get(&page_id) {
            self.write_back(&mut state, idx)?;
        }
        Ok(())
    }

    /// Flushes every cached page of `file_id`; unpinned frames are evicted
    /// after writing.
    pub fn flush_all(&self, file_id: FileId) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        let targets: Vec<(PageId, usize)> = state
            .page_table
            .iter()
            .filter(|(pid, _)| pid.file_id == file_id)
            .map(|(pid, &idx)| (*pid, idx))
            .collect();
        for (page_id, idx) in targets {
            self.write_back(&mut state, idx)?;
            if state.meta[idx].pin_count == 0 {
                state.page_table.remove(&page_id);
                state.meta[idx] = FrameMeta::default();
                state.replacer.retain(|&i| i != idx);
                state.free_list.push(idx);
            }
        }
        Ok(())
    }

    /// Flushes every cached page of every file.
    pub fn flush_everything(&self) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        let targets: Vec<usize> = state.page_table.values().copied().collect();
        for idx in targets {
            self.write_back(&mut state, idx)?;
        }
        Ok(())
    }

    /// Drops all cached pages of `file_id` without writing them. Used when a
    /// file is destroyed.
    pub fn discard_all(&self, file_id: FileId) {
        let mut state = self.state.lock().unwrap();
        let targets: Vec<(PageId, usize)> = state
            .page_table
            .iter()
            .filter(|(pid, _)| pid.file_id == file_id)
            .map(|(pid, &idx)| (*pid, idx))
            .collect();
        for (page_id, idx) in targets {
            state.page_table.remove(&page_id);
            state.meta[idx] = FrameMeta::default();
            state.replacer.retain(|&i| i != idx);
            state.free_list.push(idx);
        }
    }

    fn guard(&self, page_id: PageId, idx: usize) -> PageGuard<'_> {
        PageGuard {
            pool: self,
            page_id,
            frame: Arc::clone(&self.frames[idx]),
        }
    }

    fn pin_existing(&self, state: &mut PoolState, idx: usize) {
        let was_unpinned = state.meta[idx].pin_count == 0;
        state.meta[idx].pin_count += 1;
        if was_unpinned {
            state.replacer.retain(|&i| i != idx);
        }
    }

    fn mark_dirty(&self, page_id: PageId) {
        let mut state = self.state.lock().unwrap();
        if let Some(&idx) = state.page_table.get(&page_id) {
            state.meta[idx].dirty = true;
        }
    }

    /// Picks a reusable frame: free list first, then the replacer. Dirty
    /// victims are written back (log first) before reuse.
    fn take_victim(&self, state: &mut PoolState) -> Result<usize, StorageError> {
        if let Some(idx) = state.free_list.pop() {
            return Ok(idx);
        }
        let idx = state
            .replacer
            .pop_front()
            .ok_or(StorageError::PoolExhausted)?;
        debug_assert_eq!(state.meta[idx].pin_count, 0);
        self.write_back(state, idx)?;
        if let Some(old_id) = state.meta[idx].page_id.take() {
            state.page_table.remove(&old_id);
        }
        state.meta[idx] = FrameMeta::default();
        Ok(idx)
    }

    fn install(
        &self,
        state: &mut PoolState,
        idx: usize,
        page_id: PageId,
        page: Page,
        dirty: bool,
    ) {
        *self.frames[idx].page.write().unwrap() = page;
        state.meta[idx] = FrameMeta {
            page_id: Some(page_id),
            pin_count: 1,
            dirty,
        };
        state.page_table.insert(page_id, idx);
    }

    fn write_back(&self, state: &mut PoolState, idx: usize) -> Result<(), StorageError> {
        if !state.meta[idx].dirty {
            return Ok(());
        }
        let Some(page_id) = state.meta[idx].page_id else {
            return Ok(());
        };
        // WAL rule: every log record up to this page's LSN must be durable
        // before the page bytes reach disk.
        self.log.flush()?;
        let page = self.frames[idx].page.read().unwrap();
        self.disk.write_page(page_id, &page.data[..])?;
        drop(page);
        state.meta[idx].dirty = false;
        Ok(())
    }

    #[cfg(test)]
    fn frame_state(&self, page_id: PageId) -> Option<(u32, bool, bool)> {
        let state = self.state.lock().unwrap();
        state.page_table.get(&page_id).map(|&idx| {
            (
                state.meta[idx].pin_count,
                state.meta[idx].dirty,
                state.replacer.contains(&idx),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pool_with(dir: &std::path::Path, size: usize) -> (Arc<DiskManager>, BufferPool) {
        let disk = Arc::new(DiskManager::open(dir).unwrap());
        let log = Arc::new(LogManager::new(Arc::clone(&disk)));
        let pool = BufferPool::new(Arc::clone(&disk), log, size);
        (disk, pool)
    }

    #[test]
    fn pin_tracking_and_replacer_membership() {
        let dir = tempdir().unwrap();
        let (disk, pool) = pool_with(dir.path(), 4);
        disk.create_file("t").unwrap();
        let fd = disk.open_file("t").unwrap();

        let guard = pool.new_page(fd).unwrap();
        let page_id = guard.page_id();
        assert_eq!(pool.frame_state(page_id), Some((1, true, false)));

        drop(guard);
        // Unpinned frames must sit in the replacer.
        assert_eq!(pool.frame_state(page_id), Some((0, true, true)));

        let guard = pool.fetch(page_id).unwrap();
        assert_eq!(pool.frame_state(page_id), Some((1, true, false)));
        drop(guard);
    }

    #[test]
    fn unpin_errors_are_typed() {
        let dir = tempdir().unwrap();
        let (disk, pool) = pool_with(dir.path(), 4);
        disk.create_file("t").unwrap();
        let fd = disk.open_file("t").unwrap();

        let missing = PageId::new(fd, 99);
        assert!(matches!(
            pool.unpin(missing, false),
            Err(StorageError::NotCached { .. })
        ));

        let guard = pool.new_page(fd).unwrap();
        let page_id = guard.page_id();
        drop(guard);
        assert!(matches!(
            pool.unpin(page_id, false),
            Err(StorageError::NotPinned { .. })
        ));
    }

    #[test]
    fn eviction_prefers_least_recently_unpinned() {
        let dir = tempdir().unwrap();
        let (disk, pool) = pool_with(dir.path(), 2);
        disk.create_file("t").unwrap();
        let fd = disk.open_file("t").unwrap();

        let a = pool.new_page(fd).unwrap();
        let a_id = a.page_id();
        let b = pool.new_page(fd).unwrap();
        let b_id = b.page_id();
        drop(a);
        drop(b);

        // Loading a third page must evict `a`, the least recently unpinned.
        let c = pool.new_page(fd).unwrap();
        assert!(pool.frame_state(a_id).is_none());
        assert!(pool.frame_state(b_id).is_some());
        drop(c);
    }

    #[test]
    fn every_frame_pinned_means_pool_exhausted() {
        let dir = tempdir().unwrap();
        let (disk, pool) = pool_with(dir.path(), 2);
        disk.create_file("t").unwrap();
        let fd = disk.open_file("t").unwrap();

        let _a = pool.new_page(fd).unwrap();
        let _b = pool.new_page(fd).unwrap();
        let result = pool.new_page(fd);
        match result {
            Err(StorageError::PoolExhausted) => {}
            other => panic!("expected PoolExhausted, got {other:?}"),
        }
    }

    #[test]
    fn dirty_page_survives_eviction_round_trip() {
        let dir = tempdir().unwrap();
        let (disk, pool) = pool_with(dir.path(), 2);
        disk.create_file("t").unwrap();
        let fd = disk.open_file("t").unwrap();

        let guard = pool.new_page(fd).unwrap();
        let page_id = guard.page_id();
        guard.write().data[100] = 0x5A;
        drop(guard);

        // Force eviction by cycling two more pages through the pool.
        let x = pool.new_page(fd).unwrap();
        let y = pool.new_page(fd).unwrap();
        drop(x);
        drop(y);
        let _z = pool.new_page(fd).unwrap();

        let guard = pool.fetch(page_id).unwrap();
        assert_eq!(guard.read().data[100], 0x5A);
    }

    #[test]
    fn flush_all_evicts_unpinned_frames() {
        let dir = tempdir().unwrap();
        let (disk, pool) = pool_with(dir.path(), 4);
        disk.create_file("t").unwrap();
        let fd = disk.open_file("t").unwrap();

        let guard = pool.new_page(fd).unwrap();
        let page_id = guard.page_id();
        guard.write().data[0] = 7;
        drop(guard);

        pool.flush_all(fd).unwrap();
        assert!(pool.frame_state(page_id).is_none());

        let mut buf = vec![0u8; crate::PAGE_SIZE];
        disk.read_page(page_id, &mut buf).unwrap();
        assert_eq!(buf[0], 7);
    }
}
