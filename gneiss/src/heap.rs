//! Fixed-size record heaps: one file per table, page 0 holding the file
//! header, pages 1+ holding slotted records. Partially-free pages are
//! chained through a free list headed in the file header.
//!
//! Mutations emit physical `PageImage` log records for redo; the logical
//! Insert/Update/Delete records are the caller's business.

use std::sync::{Arc, Mutex};

use crate::buffer_pool::BufferPool;
use crate::error::StorageError;
use crate::lock::{LockId, LockMode};
use crate::page::{bitmap, HeapPageLayout, Page};
use crate::txn::Context;
use crate::wal::LogPayload;
use crate::{FileId, PageId, PageNo, Rid, NO_PAGE, PAGE_SIZE};

const HDR_OFF_FIRST_FREE: usize = 4;
const HDR_OFF_RECORDS_PER_PAGE: usize = 8;
const HDR_OFF_RECORD_SIZE: usize = 12;
const HDR_OFF_NUM_PAGES: usize = 16;

/// In-memory copy of the heap file header (page 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapFileHeader {
    pub lsn: crate::Lsn,
    pub first_free_page_no: PageNo,
    pub records_per_page: u32,
    pub record_size: u32,
    pub num_pages: PageNo,
}

impl HeapFileHeader {
    pub fn layout(&self) -> HeapPageLayout {
        HeapPageLayout {
            record_size: self.record_size as usize,
            records_per_page: self.records_per_page as usize,
        }
    }

    fn decode(page: &Page) -> Self {
        Self {
            lsn: page.lsn(),
            first_free_page_no: page.read_u32(HDR_OFF_FIRST_FREE),
            records_per_page: page.read_u32(HDR_OFF_RECORDS_PER_PAGE),
            record_size: page.read_u32(HDR_OFF_RECORD_SIZE),
            num_pages: page.read_u32(HDR_OFF_NUM_PAGES),
        }
    }

    fn encode(&self, page: &mut Page) {
        page.set_lsn(self.lsn);
        page.write_u32(HDR_OFF_FIRST_FREE, self.first_free_page_no);
        page.write_u32(HDR_OFF_RECORDS_PER_PAGE, self.records_per_page);
        page.write_u32(HDR_OFF_RECORD_SIZE, self.record_size);
        page.write_u32(HDR_OFF_NUM_PAGES, self.num_pages);
    }

    /// A full page image of the header, for `PageImage` log records.
    fn page_image(&self) -> Vec<u8> {
        let mut page = Page::new(PageId::new(0, 0));
        self.encode(&mut page);
        page.data.to_vec()
    }
}

/// A handle to one table's record file.
pub struct HeapFile {
    name: String,
    file_id: FileId,
    pool: Arc<BufferPool>,
    hdr: Mutex<HeapFileHeader>,
}

impl HeapFile {
    /// Creates the file with an initialised header page and opens it.
    pub fn create(
        pool: Arc<BufferPool>,
        name: &str,
        record_size: usize,
    ) -> Result<Self, StorageError> {
        let layout = HeapPageLayout::for_record_size(record_size);
        pool.disk().create_file(name)?;
        let file_id = pool.disk().open_file(name)?;
        let hdr = HeapFileHeader {
            lsn: 0,
            first_free_page_no: NO_PAGE,
            records_per_page: layout.records_per_page as u32,
            record_size: record_size as u32,
            num_pages: 1,
        };
        {
            let guard = pool.new_page(file_id)?;
            debug_assert_eq!(guard.page_id().page_no, 0);
            hdr.encode(&mut guard.write());
        }
        // The header must be durable before the table is usable; create
        // table itself is not transactional.
        pool.flush(PageId::new(file_id, 0))?;
        Ok(Self {
            name: name.to_string(),
            file_id,
            pool,
            hdr: Mutex::new(hdr),
        })
    }

    /// Opens an existing heap file, reading its header from page 0.
    pub fn open(pool: Arc<BufferPool>, name: &str) -> Result<Self, StorageError> {
        let file_id = pool.disk().open_file(name)?;
        let hdr = {
            let guard = pool.fetch(PageId::new(file_id, 0))?;
            let decoded = HeapFileHeader::decode(&guard.read());
            decoded
        };
        // Pages recorded in the header may never have been written back
        // before a crash; re-extend the file so they are addressable (they
        // read as zeroes until redo fills them in).
        while pool.disk().num_pages(file_id)? < hdr.num_pages {
            pool.disk().allocate_page_no(file_id)?;
        }
        Ok(Self {
            name: name.to_string(),
            file_id,
            pool,
            hdr: Mutex::new(hdr),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn header(&self) -> HeapFileHeader {
        *self.hdr.lock().unwrap()
    }

    pub fn record_size(&self) -> usize {
        self.hdr.lock().unwrap().record_size as usize
    }

    /// Writes the in-memory header through to the cached page 0.
    fn store_header(&self, hdr: &HeapFileHeader) -> Result<(), StorageError> {
        let guard = self.pool.fetch(PageId::new(self.file_id, 0))?;
        hdr.encode(&mut guard.write());
        Ok(())
    }

    fn lock_row(
        &self,
        ctx: &mut Context<'_>,
        rid: Rid,
        mode: LockMode,
    ) -> Result<(), StorageError> {
        ctx.lock_mgr
            .lock(ctx.txn, LockId::row(self.file_id, rid), mode)?;
        Ok(())
    }

    fn lock_table_ix(&self, ctx: &mut Context<'_>) -> Result<(), StorageError> {
        ctx.lock_mgr.lock(
            ctx.txn,
            LockId::table(self.file_id),
            LockMode::IntentionExclusive,
        )?;
        Ok(())
    }

    /// Inserts a record into the first free slot, allocating a page when the
    /// free list is empty. Returns the new record's identifier.
    pub fn insert(&self, buf: &[u8], mut ctx: Option<&mut Context<'_>>) -> Result<Rid, StorageError> {
        let mut hdr = self.hdr.lock().unwrap();
        let layout = hdr.layout();
        if buf.len() != layout.record_size {
            return Err(StorageError::Internal(format!(
                "record of {} bytes inserted into heap `{}` of record size {}",
                buf.len(),
                self.name,
                layout.record_size
            )));
        }
        if let Some(ctx) = ctx.as_deref_mut() {
            self.lock_table_ix(ctx)?;
        }

        let guard = if hdr.first_free_page_no == NO_PAGE {
            let guard = self.pool.new_page(self.file_id)?;
            let page_no = guard.page_id().page_no;
            guard.write().heap_init();
            hdr.first_free_page_no = page_no;
            hdr.num_pages = page_no + 1;
            guard
        } else {
            self.pool
                .fetch(PageId::new(self.file_id, hdr.first_free_page_no))?
        };
        let page_no = guard.page_id().page_no;

        // Images are captured after page allocation but before the slot is
        // touched, exactly what redo needs to replay from.
        let before = ctx.is_some().then(|| guard.read().data.to_vec());
        let hdr_before = ctx.is_some().then(|| hdr.page_image());

        let slot_no = {
            let page = guard.read();
            bitmap::first_clear(page.heap_bitmap(&layout), layout.records_per_page).ok_or_else(
                || StorageError::Internal(format!("free-list page {page_no} has no free slot")),
            )? as u32
        };
        let rid = Rid::new(page_no, slot_no);
        if let Some(ctx) = ctx.as_deref_mut() {
            self.lock_row(ctx, rid, LockMode::Exclusive)?;
        }

        {
            let mut page = guard.write();
            page.slot_mut(&layout, slot_no).copy_from_slice(buf);
            bitmap::set(page.heap_bitmap_mut(&layout), slot_no as usize);
            let n = page.num_records() + 1;
            page.set_num_records(n);
            // A page that just filled up leaves the free list.
            if n == hdr.records_per_page {
                hdr.first_free_page_no = page.next_free_page();
            }
        }

        if let Some(ctx) = ctx.as_deref_mut() {
            let lsn = ctx.txn.log(
                ctx.log_mgr,
                LogPayload::PageImage {
                    table: self.name.clone(),
                    page_no,
                    before: before.unwrap(),
                    after: guard.read().data.to_vec(),
                },
            )?;
            guard.write().set_lsn(lsn);

            let hdr_lsn = ctx.txn.log(
                ctx.log_mgr,
                LogPayload::PageImage {
                    table: self.name.clone(),
                    page_no: 0,
                    before: hdr_before.unwrap(),
                    after: hdr.page_image(),
                },
            )?;
            hdr.lsn = hdr_lsn;
        }
        self.store_header(&hdr)?;
        Ok(rid)
    }

    /// Deletes the record at `rid`, returning the page to the free list if
    /// it was full.
    pub fn delete(&self, rid: Rid, mut ctx: Option<&mut Context<'_>>) -> Result<(), StorageError> {
        let mut hdr = self.hdr.lock().unwrap();
        let layout = hdr.layout();
        self.check_page_no(&hdr, rid.page_no)?;
        if let Some(ctx) = ctx.as_deref_mut() {
            self.lock_table_ix(ctx)?;
            self.lock_row(ctx, rid, LockMode::Exclusive)?;
        }

        let guard = self.pool.fetch(PageId::new(self.file_id, rid.page_no))?;
        let (before, was_full) = {
            let page = guard.read();
            if !page.slot_in_use(&layout, rid.slot_no) {
                return Err(StorageError::RecordNotFound { rid });
            }
            (
                ctx.is_some().then(|| page.data.to_vec()),
                page.num_records() == hdr.records_per_page,
            )
        };
        let hdr_before = (ctx.is_some() && was_full).then(|| hdr.page_image());

        {
            let mut page = guard.write();
            page.slot_mut(&layout, rid.slot_no).fill(0);
            bitmap::clear(page.heap_bitmap_mut(&layout), rid.slot_no as usize);
            let new_num_records = page.num_records() - 1;
            page.set_num_records(new_num_records);
            if was_full {
                page.set_next_free_page(hdr.first_free_page_no);
                hdr.first_free_page_no = rid.page_no;
            }
        }

        if let Some(ctx) = ctx.as_deref_mut() {
            let lsn = ctx.txn.log(
                ctx.log_mgr,
                LogPayload::PageImage {
                    table: self.name.clone(),
                    page_no: rid.page_no,
                    before: before.unwrap(),
                    after: guard.read().data.to_vec(),
                },
            )?;
            guard.write().set_lsn(lsn);

            if was_full {
                let hdr_lsn = ctx.txn.log(
                    ctx.log_mgr,
                    LogPayload::PageImage {
                        table: self.name.clone(),
                        page_no: 0,
                        before: hdr_before.unwrap(),
                        after: hdr.page_image(),
                    },
                )?;
                hdr.lsn = hdr_lsn;
            }
        }
        if was_full {
            self.store_header(&hdr)?;
        }
        Ok(())
    }

    /// Overwrites the record at `rid` in place.
    pub fn update(
        &self,
        rid: Rid,
        buf: &[u8],
        mut ctx: Option<&mut Context<'_>>,
    ) -> Result<(), StorageError> {
        let hdr = self.hdr.lock().unwrap();
        let layout = hdr.layout();
        self.check_page_no(&hdr, rid.page_no)?;
        if let Some(ctx) = ctx.as_deref_mut() {
            self.lock_table_ix(ctx)?;
            self.lock_row(ctx, rid, LockMode::Exclusive)?;
        }

        let guard = self.pool.fetch(PageId::new(self.file_id, rid.page_no))?;
        let before = {
            let page = guard.read();
            if !page.slot_in_use(&layout, rid.slot_no) {
                return Err(StorageError::RecordNotFound { rid });
            }
            ctx.is_some().then(|| page.data.to_vec())
        };

        guard.write().slot_mut(&layout, rid.slot_no).copy_from_slice(buf);

        if let Some(ctx) = ctx.as_deref_mut() {
            let lsn = ctx.txn.log(
                ctx.log_mgr,
                LogPayload::PageImage {
                    table: self.name.clone(),
                    page_no: rid.page_no,
                    before: before.unwrap(),
                    after: guard.read().data.to_vec(),
                },
            )?;
            guard.write().set_lsn(lsn);
        }
        Ok(())
    }

    /// Copies the record at `rid` out of its page.
    pub fn get(&self, rid: Rid, mut ctx: Option<&mut Context<'_>>) -> Result<Vec<u8>, StorageError> {
        let hdr = self.hdr.lock().unwrap();
        let layout = hdr.layout();
        self.check_page_no(&hdr, rid.page_no)?;
        if let Some(ctx) = ctx.as_deref_mut() {
            self.lock_row(ctx, rid, LockMode::Shared)?;
        }
        let guard = self.pool.fetch(PageId::new(self.file_id, rid.page_no))?;
        let page = guard.read();
        if !page.slot_in_use(&layout, rid.slot_no) {
            return Err(StorageError::RecordNotFound { rid });
        }
        Ok(page.slot(&layout, rid.slot_no).to_vec())
    }

    /// Iterator over the rids of every live record, in page/slot order.
    pub fn scan(&self) -> HeapScan<'_> {
        let hdr = self.hdr.lock().unwrap();
        HeapScan {
            heap: self,
            layout: hdr.layout(),
            num_pages: hdr.num_pages,
            page_no: 1,
            slot_no: 0,
        }
    }

    /// Writes every cached page of this file back to disk.
    pub fn flush(&self) -> Result<(), StorageError> {
        let hdr = self.hdr.lock().unwrap();
        self.store_header(&hdr)?;
        self.pool.flush_all(self.file_id)
    }

    /// Replaces the in-memory header from a logged image, used by redo when
    /// the image's LSN wins over the current header.
    pub fn restore_header(&self, image: &[u8], lsn: crate::Lsn) -> Result<bool, StorageError> {
        debug_assert_eq!(image.len(), PAGE_SIZE);
        let mut hdr = self.hdr.lock().unwrap();
        if hdr.lsn >= lsn {
            return Ok(false);
        }
        let mut page = Page::new(PageId::new(self.file_id, 0));
        page.data.copy_from_slice(image);
        let mut decoded = HeapFileHeader::decode(&page);
        decoded.lsn = lsn;
        *hdr = decoded;
        while self.pool.disk().num_pages(self.file_id)? < hdr.num_pages {
            self.pool.disk().allocate_page_no(self.file_id)?;
        }
        self.store_header(&hdr)?;
        Ok(true)
    }

    /// Applies a redo page image to a heap page if its LSN is newer than
    /// what the page currently carries.
    pub fn apply_page_image(&self, page_no: PageNo, image: &[u8], lsn: crate::Lsn) -> Result<bool, StorageError> {
        debug_assert_eq!(image.len(), PAGE_SIZE);
        while self.pool.disk().num_pages(self.file_id)? <= page_no {
            self.pool.disk().allocate_page_no(self.file_id)?;
        }
        {
            let mut hdr = self.hdr.lock().unwrap();
            if page_no >= hdr.num_pages {
                hdr.num_pages = page_no + 1;
            }
        }
        let guard = self.pool.fetch(PageId::new(self.file_id, page_no))?;
        if guard.read().lsn() >= lsn {
            return Ok(false);
        }
        let mut page = guard.write();
        page.data.copy_from_slice(image);
        page.set_lsn(lsn);
        Ok(true)
    }

    fn check_page_no(&self, hdr: &HeapFileHeader, page_no: PageNo) -> Result<(), StorageError> {
        if page_no == 0 || page_no >= hdr.num_pages {
            return Err(StorageError::PageNotExist {
                file_id: self.file_id,
                page_no,
            });
        }
        Ok(())
    }
}

/// Enumerates records existing at scan start; records inserted concurrently
/// may or may not be observed, but never half-written ones.
pub struct HeapScan<'a> {
    heap: &'a HeapFile,
    layout: HeapPageLayout,
    num_pages: PageNo,
    page_no: PageNo,
    slot_no: u32,
}

impl HeapScan<'_> {
    pub fn next(&mut self) -> Result<Option<Rid>, StorageError> {
        while self.page_no < self.num_pages {
            let guard = self
                .heap
                .pool
                .fetch(PageId::new(self.heap.file_id, self.page_no))?;
            let page = guard.read();
            while (self.slot_no as usize) < self.layout.records_per_page {
                let slot = self.slot_no;
                self.slot_no += 1;
                if page.slot_in_use(&self.layout, slot) {
                    return Ok(Some(Rid::new(self.page_no, slot)));
                }
            }
            self.page_no += 1;
            self.slot_no = 0;
        }
        Ok(None)
    }
}
