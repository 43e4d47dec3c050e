//! B+-tree index: a unique ordered mapping from fixed-size packed byte keys
//! to record identifiers.
//!
//! One file per index. Page 0 is the index header; every other page is a
//! leaf or internal node. Keys are compared as raw bytes, so callers must
//! hand in a memcmp-ordered encoding. Leaves form a doubly-linked list for
//! range iteration. A per-index latch (the header mutex) serialises
//! structural modification; the buffer pool's pins protect individual pages.

use std::sync::{Arc, Mutex};

use crate::buffer_pool::BufferPool;
use crate::error::StorageError;
use crate::page::Page;
use crate::txn::Context;
use crate::wal::LogPayload;
use crate::{FileId, Lsn, PageId, PageNo, Rid, NO_PAGE, PAGE_SIZE};

const HDR_OFF_ROOT: usize = 4;
const HDR_OFF_FIRST_LEAF: usize = 8;
const HDR_OFF_LAST_LEAF: usize = 12;
const HDR_OFF_KEY_LEN: usize = 16;
const HDR_OFF_NUM_PAGES: usize = 20;

const NODE_OFF_KIND: usize = 4;
const NODE_OFF_NUM_KEYS: usize = 8;
const NODE_OFF_PREV: usize = 12;
const NODE_OFF_NEXT: usize = 16;
const NODE_HDR_SIZE: usize = 20;

const KIND_LEAF: u8 = 1;
const KIND_INTERNAL: u8 = 2;

/// In-memory copy of the index file header (page 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexFileHeader {
    pub lsn: Lsn,
    pub root: PageNo,
    pub first_leaf: PageNo,
    pub last_leaf: PageNo,
    pub key_len: u32,
    pub num_pages: PageNo,
}

impl IndexFileHeader {
    fn decode(page: &Page) -> Self {
        Self {
            lsn: page.lsn(),
            root: page.read_u32(HDR_OFF_ROOT),
            first_leaf: page.read_u32(HDR_OFF_FIRST_LEAF),
            last_leaf: page.read_u32(HDR_OFF_LAST_LEAF),
            key_len: page.read_u32(HDR_OFF_KEY_LEN),
            num_pages: page.read_u32(HDR_OFF_NUM_PAGES),
        }
    }

    fn encode(&self, page: &mut Page) {
        page.set_lsn(self.lsn);
        page.write_u32(HDR_OFF_ROOT, self.root);
        page.write_u32(HDR_OFF_FIRST_LEAF, self.first_leaf);
        page.write_u32(HDR_OFF_LAST_LEAF, self.last_leaf);
        page.write_u32(HDR_OFF_KEY_LEN, self.key_len);
        page.write_u32(HDR_OFF_NUM_PAGES, self.num_pages);
    }

    fn page_image(&self) -> Vec<u8> {
        let mut page = Page::new(PageId::new(0, 0));
        self.encode(&mut page);
        page.data.to_vec()
    }
}

// Node accessors. Entries are laid out after the node header: leaves hold
// `(key, rid)` pairs; internal nodes hold the leftmost child followed by
// `(key, child)` pairs. The child right of key `i` bounds keys `>= key[i]`.

fn kind(page: &Page) -> u8 {
    page.data[NODE_OFF_KIND]
}

fn is_leaf(page: &Page) -> bool {
    kind(page) == KIND_LEAF
}

fn init_node(page: &mut Page, node_kind: u8) {
    page.data.fill(0);
    page.data[NODE_OFF_KIND] = node_kind;
    page.write_u32(NODE_OFF_PREV, NO_PAGE);
    page.write_u32(NODE_OFF_NEXT, NO_PAGE);
}

fn num_keys(page: &Page) -> usize {
    page.read_u32(NODE_OFF_NUM_KEYS) as usize
}

fn set_num_keys(page: &mut Page, n: usize) {
    page.write_u32(NODE_OFF_NUM_KEYS, n as u32);
}

fn prev_leaf(page: &Page) -> PageNo {
    page.read_u32(NODE_OFF_PREV)
}

fn next_leaf(page: &Page) -> PageNo {
    page.read_u32(NODE_OFF_NEXT)
}

fn set_prev_leaf(page: &mut Page, p: PageNo) {
    page.write_u32(NODE_OFF_PREV, p);
}

fn set_next_leaf(page: &mut Page, p: PageNo) {
    page.write_u32(NODE_OFF_NEXT, p);
}

fn leaf_entry_size(key_len: usize) -> usize {
    key_len + 8
}

fn internal_entry_size(key_len: usize) -> usize {
    key_len + 4
}

pub(crate) fn leaf_capacity(key_len: usize) -> usize {
    (PAGE_SIZE - NODE_HDR_SIZE) / leaf_entry_size(key_len)
}

pub(crate) fn internal_capacity(key_len: usize) -> usize {
    (PAGE_SIZE - NODE_HDR_SIZE - 4) / internal_entry_size(key_len)
}

fn leaf_key(page: &Page, key_len: usize, i: usize) -> &[u8] {
    let off = NODE_HDR_SIZE + i * leaf_entry_size(key_len);
    &page.data[off..off + key_len]
}

fn leaf_rid(page: &Page, key_len: usize, i: usize) -> Rid {
    let off = NODE_HDR_SIZE + i * leaf_entry_size(key_len) + key_len;
    Rid::new(page.read_u32(off), page.read_u32(off + 4))
}

fn leaf_set_entry(page: &mut Page, key_len: usize, i: usize, key: &[u8], rid: Rid) {
    let off = NODE_HDR_SIZE + i * leaf_entry_size(key_len);
    page.data[off..off + key_len].copy_from_slice(key);
    page.write_u32(off + key_len, rid.page_no);
    page.write_u32(off + key_len + 4, rid.slot_no);
}

fn leaf_entry_bytes(page: &Page, key_len: usize, i: usize) -> Vec<u8> {
    let size = leaf_entry_size(key_len);
    let off = NODE_HDR_SIZE + i * size;
    page.data[off..off + size].to_vec()
}

fn leaf_insert_at(page: &mut Page, key_len: usize, i: usize, key: &[u8], rid: Rid) {
    let size = leaf_entry_size(key_len);
    let n = num_keys(page);
    let start = NODE_HDR_SIZE + i * size;
    let end = NODE_HDR_SIZE + n * size;
    page.data.copy_within(start..end, start + size);
    leaf_set_entry(page, key_len, i, key, rid);
    set_num_keys(page, n + 1);
}

fn leaf_remove_at(page: &mut Page, key_len: usize, i: usize) {
    let size = leaf_entry_size(key_len);
    let n = num_keys(page);
    let start = NODE_HDR_SIZE + (i + 1) * size;
    let end = NODE_HDR_SIZE + n * size;
    page.data.copy_within(start..end, start - size);
    let tail = NODE_HDR_SIZE + (n - 1) * size;
    page.data[tail..tail + size].fill(0);
    set_num_keys(page, n - 1);
}

/// First index whose key is `>= key`, and whether it is an exact match.
fn leaf_lower_bound(page: &Page, key_len: usize, key: &[u8]) -> (usize, bool) {
    let n = num_keys(page);
    let mut low = 0;
    let mut high = n;
    while low < high {
        let mid = low + (high - low) / 2;
        if leaf_key(page, key_len, mid) < key {
            low = mid + 1;
        } else {
            high = mid;
        }
    }
    (low, low < n && leaf_key(page, key_len, low) == key)
}

fn child(page: &Page, key_len: usize, i: usize) -> PageNo {
    if i == 0 {
        page.read_u32(NODE_HDR_SIZE)
    } else {
        let off = NODE_HDR_SIZE + 4 + (i - 1) * internal_entry_size(key_len) + key_len;
        page.read_u32(off)
    }
}

fn set_child(page: &mut Page, key_len: usize, i: usize, c: PageNo) {
    if i == 0 {
        page.write_u32(NODE_HDR_SIZE, c);
    } else {
        let off = NODE_HDR_SIZE + 4 + (i - 1) * internal_entry_size(key_len) + key_len;
        page.write_u32(off, c);
    }
}

fn internal_key(page: &Page, key_len: usize, i: usize) -> &[u8] {
    let off = NODE_HDR_SIZE + 4 + i * internal_entry_size(key_len);
    &page.data[off..off + key_len]
}

fn set_internal_key(page: &mut Page, key_len: usize, i: usize, key: &[u8]) {
    let off = NODE_HDR_SIZE + 4 + i * internal_entry_size(key_len);
    page.data[off..off + key_len].copy_from_slice(key);
}

/// Inserts separator `key` at position `i` with `child_after` to its right.
fn internal_insert_at(page: &mut Page, key_len: usize, i: usize, key: &[u8], child_after: PageNo) {
    let size = internal_entry_size(key_len);
    let n = num_keys(page);
    let start = NODE_HDR_SIZE + 4 + i * size;
    let end = NODE_HDR_SIZE + 4 + n * size;
    page.data.copy_within(start..end, start + size);
    set_internal_key(page, key_len, i, key);
    set_child(page, key_len, i + 1, child_after);
    set_num_keys(page, n + 1);
}

/// Removes separator `i` and the child to its right.
fn internal_remove_at(page: &mut Page, key_len: usize, i: usize) {
    let size = internal_entry_size(key_len);
    let n = num_keys(page);
    let start = NODE_HDR_SIZE + 4 + (i + 1) * size;
    let end = NODE_HDR_SIZE + 4 + n * size;
    page.data.copy_within(start..end, start - size);
    let tail = NODE_HDR_SIZE + 4 + (n - 1) * size;
    page.data[tail..tail + size].fill(0);
    set_num_keys(page, n - 1);
}

/// Which child to descend into for `key`: the number of separators `<= key`.
fn internal_search(page: &Page, key_len: usize, key: &[u8]) -> usize {
    let n = num_keys(page);
    let mut low = 0;
    let mut high = n;
    while low < high {
        let mid = low + (high - low) / 2;
        if internal_key(page, key_len, mid) <= key {
            low = mid + 1;
        } else {
            high = mid;
        }
    }
    low
}

/// A handle to one index file.
pub struct BTreeIndex {
    name: String,
    file_id: FileId,
    pool: Arc<BufferPool>,
    hdr: Mutex<IndexFileHeader>,
}

impl BTreeIndex {
    /// Creates the index file with an empty root leaf and opens it.
    pub fn create(pool: Arc<BufferPool>, name: &str, key_len: usize) -> Result<Self, StorageError> {
        assert!(key_len > 0 && leaf_capacity(key_len) >= 4 && internal_capacity(key_len) >= 4);
        pool.disk().create_file(name)?;
        let file_id = pool.disk().open_file(name)?;
        let hdr = IndexFileHeader {
            lsn: 0,
            root: 1,
            first_leaf: 1,
            last_leaf: 1,
            key_len: key_len as u32,
            num_pages: 2,
        };
        {
            let hdr_guard = pool.new_page(file_id)?;
            debug_assert_eq!(hdr_guard.page_id().page_no, 0);
            hdr.encode(&mut hdr_guard.write());
            let root_guard = pool.new_page(file_id)?;
            debug_assert_eq!(root_guard.page_id().page_no, 1);
            init_node(&mut root_guard.write(), KIND_LEAF);
        }
        pool.flush_all(file_id)?;
        Ok(Self {
            name: name.to_string(),
            file_id,
            pool,
            hdr: Mutex::new(hdr),
        })
    }

    pub fn open(pool: Arc<BufferPool>, name: &str) -> Result<Self, StorageError> {
        let file_id = pool.disk().open_file(name)?;
        let hdr = {
            let guard = pool.fetch(PageId::new(file_id, 0))?;
            let decoded = IndexFileHeader::decode(&guard.read());
            decoded
        };
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

    pub fn key_len(&self) -> usize {
        self.hdr.lock().unwrap().key_len as usize
    }

    pub fn header(&self) -> IndexFileHeader {
        *self.hdr.lock().unwrap()
    }

    fn fetch(&self, page_no: PageNo) -> Result<crate::PageGuard<'_>, StorageError> {
        self.pool.fetch(PageId::new(self.file_id, page_no))
    }

    fn store_header(&self, hdr: &IndexFileHeader) -> Result<(), StorageError> {
        let guard = self.pool.fetch(PageId::new(self.file_id, 0))?;
        hdr.encode(&mut guard.write());
        Ok(())
    }

    /// Descends to the leaf for `key`, recording `(page_no, child_idx)` for
    /// every internal node on the way.
    fn descend(
        &self,
        hdr: &IndexFileHeader,
        key: &[u8],
    ) -> Result<(PageNo, Vec<(PageNo, usize)>), StorageError> {
        let key_len = hdr.key_len as usize;
        let mut path = Vec::new();
        let mut cur = hdr.root;
        loop {
            let guard = self.fetch(cur)?;
            let page = guard.read();
            if is_leaf(&page) {
                return Ok((cur, path));
            }
            let idx = internal_search(&page, key_len, key);
            let next = child(&page, key_len, idx);
            path.push((cur, idx));
            cur = next;
        }
    }

    /// Inserts `key -> rid`. Returns the leaf page the entry landed on, or
    /// `None` when the key already exists (the tree is left untouched).
    pub fn insert(
        &self,
        key: &[u8],
        rid: Rid,
        ctx: Option<&mut Context<'_>>,
    ) -> Result<Option<PageNo>, StorageError> {
        let mut hdr = self.hdr.lock().unwrap();
        let key_len = hdr.key_len as usize;
        debug_assert_eq!(key.len(), key_len);
        let mut touched = Vec::new();

        let (leaf_no, mut path) = self.descend(&hdr, key)?;
        let leaf_guard = self.fetch(leaf_no)?;
        let (pos, found) = leaf_lower_bound(&leaf_guard.read(), key_len, key);
        if found {
            return Ok(None);
        }

        let leaf_cap = leaf_capacity(key_len);
        if num_keys(&leaf_guard.read()) < leaf_cap {
            leaf_insert_at(&mut leaf_guard.write(), key_len, pos, key, rid);
            touched.push(leaf_no);
            self.finish_write(&mut hdr, touched, ctx)?;
            return Ok(Some(leaf_no));
        }

        // Leaf split: upper half moves to a fresh right sibling.
        let right_guard = self.pool.new_page(self.file_id)?;
        let right_no = right_guard.page_id().page_no;
        hdr.num_pages = right_no + 1;
        let mid = leaf_cap / 2 + 1;
        {
            let mut left = leaf_guard.write();
            let mut right = right_guard.write();
            init_node(&mut right, KIND_LEAF);
            for (dst, src) in (mid..leaf_cap).enumerate() {
                let k = leaf_key(&left, key_len, src).to_vec();
                let r = leaf_rid(&left, key_len, src);
                leaf_set_entry(&mut right, key_len, dst, &k, r);
            }
            set_num_keys(&mut right, leaf_cap - mid);
            let tail_start = NODE_HDR_SIZE + mid * leaf_entry_size(key_len);
            let tail_end = NODE_HDR_SIZE + leaf_cap * leaf_entry_size(key_len);
            left.data[tail_start..tail_end].fill(0);
            set_num_keys(&mut left, mid);

            let old_next = next_leaf(&left);
            set_next_leaf(&mut left, right_no);
            set_prev_leaf(&mut right, leaf_no);
            set_next_leaf(&mut right, old_next);
            if old_next == NO_PAGE {
                hdr.last_leaf = right_no;
            } else {
                let next_guard = self.fetch(old_next)?;
                set_prev_leaf(&mut next_guard.write(), right_no);
                touched.push(old_next);
            }
        }

        let split_key = leaf_key(&right_guard.read(), key_len, 0).to_vec();
        let landed = if key < split_key.as_slice() {
            leaf_insert_at(&mut leaf_guard.write(), key_len, pos, key, rid);
            leaf_no
        } else {
            let (rpos, _) = leaf_lower_bound(&right_guard.read(), key_len, key);
            leaf_insert_at(&mut right_guard.write(), key_len, rpos, key, rid);
            right_no
        };
        touched.push(leaf_no);
        touched.push(right_no);

        // Promote the split key, splitting internal nodes as needed.
        let mut promote_key = split_key;
        let mut promote_child = right_no;
        loop {
            let Some((parent_no, child_idx)) = path.pop() else {
                // The root itself split: grow the tree by one level.
                let old_root = hdr.root;
                let new_root_guard = self.pool.new_page(self.file_id)?;
                let new_root_no = new_root_guard.page_id().page_no;
                hdr.num_pages = new_root_no + 1;
                let mut new_root = new_root_guard.write();
                init_node(&mut new_root, KIND_INTERNAL);
                set_child(&mut new_root, key_len, 0, old_root);
                set_internal_key(&mut new_root, key_len, 0, &promote_key);
                set_child(&mut new_root, key_len, 1, promote_child);
                set_num_keys(&mut new_root, 1);
                hdr.root = new_root_no;
                touched.push(new_root_no);
                break;
            };

            let parent_guard = self.fetch(parent_no)?;
            let internal_cap = internal_capacity(key_len);
            if num_keys(&parent_guard.read()) < internal_cap {
                internal_insert_at(
                    &mut parent_guard.write(),
                    key_len,
                    child_idx,
                    &promote_key,
                    promote_child,
                );
                touched.push(parent_no);
                break;
            }

            // Internal split through scratch vectors: all separators and
            // children including the new one, middle separator moves up.
            let (mut keys, mut children) = {
                let page = parent_guard.read();
                let n = num_keys(&page);
                let keys: Vec<Vec<u8>> = (0..n)
                    .map(|i| internal_key(&page, key_len, i).to_vec())
                    .collect();
                let children: Vec<PageNo> = (0..=n).map(|i| child(&page, key_len, i)).collect();
                (keys, children)
            };
            keys.insert(child_idx, promote_key.clone());
            children.insert(child_idx + 1, promote_child);
            let mid = keys.len() / 2;
            promote_key = keys[mid].clone();

            let new_internal_guard = self.pool.new_page(self.file_id)?;
            let new_internal_no = new_internal_guard.page_id().page_no;
            hdr.num_pages = new_internal_no + 1;
            {
                let mut left = parent_guard.write();
                init_node(&mut left, KIND_INTERNAL);
                set_child(&mut left, key_len, 0, children[0]);
                for i in 0..mid {
                    set_internal_key(&mut left, key_len, i, &keys[i]);
                    set_child(&mut left, key_len, i + 1, children[i + 1]);
                }
                set_num_keys(&mut left, mid);
            }
            {
                let mut right = new_internal_guard.write();
                init_node(&mut right, KIND_INTERNAL);
                set_child(&mut right, key_len, 0, children[mid + 1]);
                for i in mid + 1..keys.len() {
                    set_internal_key(&mut right, key_len, i - mid - 1, &keys[i]);
                    set_child(&mut right, key_len, i - mid, children[i + 1]);
                }
                set_num_keys(&mut right, keys.len() - mid - 1);
            }
            touched.push(parent_no);
            touched.push(new_internal_no);
            promote_child = new_internal_no;
        }

        self.finish_write(&mut hdr, touched, ctx)?;
        Ok(Some(landed))
    }

    /// Removes `key`. Returns false when it was absent.
    pub fn delete(&self, key: &[u8], ctx: Option<&mut Context<'_>>) -> Result<bool, StorageError> {
        let mut hdr = self.hdr.lock().unwrap();
        let key_len = hdr.key_len as usize;
        debug_assert_eq!(key.len(), key_len);
        let mut touched = Vec::new();

        let (leaf_no, mut path) = self.descend(&hdr, key)?;
        let leaf_guard = self.fetch(leaf_no)?;
        let (pos, found) = leaf_lower_bound(&leaf_guard.read(), key_len, key);
        if !found {
            return Ok(false);
        }
        leaf_remove_at(&mut leaf_guard.write(), key_len, pos);
        touched.push(leaf_no);
        drop(leaf_guard);

        // Walk back up restoring the half-full invariant.
        let mut cur = leaf_no;
        loop {
            if cur == hdr.root {
                let root_guard = self.fetch(cur)?;
                let shrink = {
                    let page = root_guard.read();
                    !is_leaf(&page) && num_keys(&page) == 0
                };
                if shrink {
                    // The root lost its last separator: its only child takes
                    // over and the tree loses a level.
                    hdr.root = child(&root_guard.read(), key_len, 0);
                }
                break;
            }
            let (parent_no, child_idx) = *path.last().unwrap();
            let cur_guard = self.fetch(cur)?;
            let (cur_is_leaf, cur_keys) = {
                let page = cur_guard.read();
                (is_leaf(&page), num_keys(&page))
            };
            let min_fill = if cur_is_leaf {
                leaf_capacity(key_len) / 2
            } else {
                internal_capacity(key_len) / 2
            };
            if cur_keys >= min_fill {
                break;
            }

            let parent_guard = self.fetch(parent_no)?;
            let parent_keys = num_keys(&parent_guard.read());

            // Borrow from the left sibling when it has slack.
            if child_idx > 0 {
                let left_no = child(&parent_guard.read(), key_len, child_idx - 1);
                let left_guard = self.fetch(left_no)?;
                let left_n = num_keys(&left_guard.read());
                if left_n > min_fill {
                    if cur_is_leaf {
                        let k = leaf_key(&left_guard.read(), key_len, left_n - 1).to_vec();
                        let r = leaf_rid(&left_guard.read(), key_len, left_n - 1);
                        leaf_remove_at(&mut left_guard.write(), key_len, left_n - 1);
                        leaf_insert_at(&mut cur_guard.write(), key_len, 0, &k, r);
                        set_internal_key(&mut parent_guard.write(), key_len, child_idx - 1, &k);
                    } else {
                        let sep =
                            internal_key(&parent_guard.read(), key_len, child_idx - 1).to_vec();
                        let moved_child = child(&left_guard.read(), key_len, left_n);
                        let new_sep = internal_key(&left_guard.read(), key_len, left_n - 1).to_vec();
                        {
                            let mut cur_page = cur_guard.write();
                            let old_child0 = child(&cur_page, key_len, 0);
                            internal_insert_at(&mut cur_page, key_len, 0, &sep, old_child0);
                            set_child(&mut cur_page, key_len, 0, moved_child);
                            // The inserted separator sits left of the old
                            // child0, which internal_insert_at put at slot 1.
                        }
                        internal_remove_at(&mut left_guard.write(), key_len, left_n - 1);
                        set_internal_key(&mut parent_guard.write(), key_len, child_idx - 1, &new_sep);
                    }
                    touched.extend([left_no, cur, parent_no]);
                    break;
                }
            }

            // Borrow from the right sibling.
            if child_idx < parent_keys {
                let right_no = child(&parent_guard.read(), key_len, child_idx + 1);
                let right_guard = self.fetch(right_no)?;
                let right_n = num_keys(&right_guard.read());
                if right_n > min_fill {
                    if cur_is_leaf {
                        let k = leaf_key(&right_guard.read(), key_len, 0).to_vec();
                        let r = leaf_rid(&right_guard.read(), key_len, 0);
                        leaf_remove_at(&mut right_guard.write(), key_len, 0);
                        leaf_insert_at(&mut cur_guard.write(), key_len, cur_keys, &k, r);
                        let new_sep = leaf_key(&right_guard.read(), key_len, 0).to_vec();
                        set_internal_key(&mut parent_guard.write(), key_len, child_idx, &new_sep);
                    } else {
                        let sep = internal_key(&parent_guard.read(), key_len, child_idx).to_vec();
                        let moved_child = child(&right_guard.read(), key_len, 0);
                        let new_sep = internal_key(&right_guard.read(), key_len, 0).to_vec();
                        {
                            let mut cur_page = cur_guard.write();
                            internal_insert_at(&mut cur_page, key_len, cur_keys, &sep, moved_child);
                        }
                        {
                            let mut right_page = right_guard.write();
                            let second_child = child(&right_page, key_len, 1);
                            set_child(&mut right_page, key_len, 0, second_child);
                            internal_remove_at(&mut right_page, key_len, 0);
                        }
                        set_internal_key(&mut parent_guard.write(), key_len, child_idx, &new_sep);
                    }
                    touched.extend([right_no, cur, parent_no]);
                    break;
                }
            }

            // No slack anywhere: merge with a sibling and recurse upward.
            if child_idx > 0 {
                let left_no = child(&parent_guard.read(), key_len, child_idx - 1);
                self.merge_into_left(
                    &mut hdr,
                    key_len,
                    left_no,
                    cur,
                    &parent_guard,
                    child_idx - 1,
                    &mut touched,
                )?;
            } else {
                let right_no = child(&parent_guard.read(), key_len, child_idx + 1);
                self.merge_into_left(
                    &mut hdr,
                    key_len,
                    cur,
                    right_no,
                    &parent_guard,
                    child_idx,
                    &mut touched,
                )?;
            }
            path.pop();
            cur = parent_no;
        }

        self.finish_write(&mut hdr, touched, ctx)?;
        Ok(true)
    }

    /// Merges `right_no` into `left_no`; `sep_idx` is the parent separator
    /// between them, which disappears.
    #[allow(clippy::too_many_arguments)]
    fn merge_into_left(
        &self,
        hdr: &mut IndexFileHeader,
        key_len: usize,
        left_no: PageNo,
        right_no: PageNo,
        parent_guard: &crate::PageGuard<'_>,
        sep_idx: usize,
        touched: &mut Vec<PageNo>,
    ) -> Result<(), StorageError> {
        let left_guard = self.fetch(left_no)?;
        let right_guard = self.fetch(right_no)?;
        let leaf_merge = is_leaf(&left_guard.read());

        if leaf_merge {
            let right_n = num_keys(&right_guard.read());
            {
                let right_page = right_guard.read();
                let mut left_page = left_guard.write();
                let base = num_keys(&left_page);
                for i in 0..right_n {
                    let entry = leaf_entry_bytes(&right_page, key_len, i);
                    let size = leaf_entry_size(key_len);
                    let off = NODE_HDR_SIZE + (base + i) * size;
                    left_page.data[off..off + size].copy_from_slice(&entry);
                }
                set_num_keys(&mut left_page, base + right_n);
                let after = next_leaf(&right_page);
                set_next_leaf(&mut left_page, after);
                if after == NO_PAGE {
                    hdr.last_leaf = left_no;
                } else {
                    let after_guard = self.fetch(after)?;
                    set_prev_leaf(&mut after_guard.write(), left_no);
                    touched.push(after);
                }
            }
        } else {
            let sep = internal_key(&parent_guard.read(), key_len, sep_idx).to_vec();
            let right_page = right_guard.read();
            let mut left_page = left_guard.write();
            let base = num_keys(&left_page);
            let right_n = num_keys(&right_page);
            set_internal_key(&mut left_page, key_len, base, &sep);
            set_child(&mut left_page, key_len, base + 1, child(&right_page, key_len, 0));
            for i in 0..right_n {
                let k = internal_key(&right_page, key_len, i).to_vec();
                set_internal_key(&mut left_page, key_len, base + 1 + i, &k);
                set_child(
                    &mut left_page,
                    key_len,
                    base + 2 + i,
                    child(&right_page, key_len, i + 1),
                );
            }
            set_num_keys(&mut left_page, base + 1 + right_n);
        }

        // The right page is now orphaned; zero it so stale bytes never
        // resurface through redo.
        init_node(&mut right_guard.write(), KIND_LEAF);
        internal_remove_at(&mut parent_guard.write(), key_len, sep_idx);
        touched.extend([left_no, right_no]);
        touched.push(parent_guard.page_id().page_no);
        Ok(())
    }

    /// Stamps LSNs and emits one `IndexPages` record covering every page a
    /// mutation touched, plus the file header.
    fn finish_write(
        &self,
        hdr: &mut IndexFileHeader,
        mut touched: Vec<PageNo>,
        ctx: Option<&mut Context<'_>>,
    ) -> Result<(), StorageError> {
        touched.sort_unstable();
        touched.dedup();
        if let Some(ctx) = ctx {
            let mut images = Vec::with_capacity(touched.len());
            for &page_no in &touched {
                let guard = self.fetch(page_no)?;
                let data = guard.read().data.to_vec();
                images.push(data);
            }
            let lsn = ctx.txn.log(
                ctx.log_mgr,
                LogPayload::IndexPages {
                    index: self.name.clone(),
                    page_nos: touched.clone(),
                    images,
                    file_header: {
                        let mut h = *hdr;
                        h.lsn = 0;
                        h.page_image()
                    },
                },
            )?;
            for &page_no in &touched {
                let guard = self.fetch(page_no)?;
                guard.write().set_lsn(lsn);
            }
            hdr.lsn = lsn;
        }
        self.store_header(hdr)
    }

    /// Point lookup.
    pub fn get(&self, key: &[u8]) -> Result<Option<Rid>, StorageError> {
        let hdr = self.hdr.lock().unwrap();
        let key_len = hdr.key_len as usize;
        let (leaf_no, _) = self.descend(&hdr, key)?;
        let guard = self.fetch(leaf_no)?;
        let page = guard.read();
        let (pos, found) = leaf_lower_bound(&page, key_len, key);
        Ok(found.then(|| leaf_rid(&page, key_len, pos)))
    }

    /// Iterator from the least entry with key `>= key`.
    pub fn lower_bound(&self, key: &[u8]) -> Result<BTreeIter<'_>, StorageError> {
        self.bound(key, false)
    }

    /// Iterator from the least entry with key `> key`.
    pub fn upper_bound(&self, key: &[u8]) -> Result<BTreeIter<'_>, StorageError> {
        self.bound(key, true)
    }

    fn bound(&self, key: &[u8], strict: bool) -> Result<BTreeIter<'_>, StorageError> {
        let hdr = self.hdr.lock().unwrap();
        let key_len = hdr.key_len as usize;
        let (leaf_no, _) = self.descend(&hdr, key)?;
        let guard = self.fetch(leaf_no)?;
        let page = guard.read();
        let (mut pos, found) = leaf_lower_bound(&page, key_len, key);
        if strict && found {
            pos += 1;
        }
        Ok(BTreeIter {
            index: self,
            page_no: leaf_no,
            pos,
        })
    }

    /// Iterator over the whole index, in key order.
    pub fn leaf_begin(&self) -> BTreeIter<'_> {
        let hdr = self.hdr.lock().unwrap();
        BTreeIter {
            index: self,
            page_no: hdr.first_leaf,
            pos: 0,
        }
    }

    /// Writes every cached page of this index back to disk.
    pub fn flush(&self) -> Result<(), StorageError> {
        let hdr = self.hdr.lock().unwrap();
        self.store_header(&hdr)?;
        self.pool.flush_all(self.file_id)
    }

    /// Redo: applies logged after-images of index pages and header.
    pub fn apply_index_pages(
        &self,
        page_nos: &[PageNo],
        images: &[Vec<u8>],
        file_header: &[u8],
        lsn: Lsn,
    ) -> Result<(), StorageError> {
        for (&page_no, image) in page_nos.iter().zip(images) {
            while self.pool.disk().num_pages(self.file_id)? <= page_no {
                self.pool.disk().allocate_page_no(self.file_id)?;
            }
            let guard = self.fetch(page_no)?;
            if guard.read().lsn() < lsn {
                let mut page = guard.write();
                page.data.copy_from_slice(image);
                page.set_lsn(lsn);
            }
        }
        let mut hdr = self.hdr.lock().unwrap();
        if hdr.lsn < lsn {
            let mut page = Page::new(PageId::new(self.file_id, 0));
            page.data.copy_from_slice(file_header);
            let mut decoded = IndexFileHeader::decode(&page);
            decoded.lsn = lsn;
            *hdr = decoded;
            while self.pool.disk().num_pages(self.file_id)? < hdr.num_pages {
                self.pool.disk().allocate_page_no(self.file_id)?;
            }
            self.store_header(&hdr)?;
        }
        Ok(())
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        let hdr = self.hdr.lock().unwrap();
        let key_len = hdr.key_len as usize;
        self.check_node(key_len, hdr.root, None, None);
        // Leaves are a sorted doubly-linked chain from first to last.
        let mut prev = NO_PAGE;
        let mut cur = hdr.first_leaf;
        let mut last_key: Option<Vec<u8>> = None;
        while cur != NO_PAGE {
            let guard = self.fetch(cur).unwrap();
            let page = guard.read();
            assert!(is_leaf(&page));
            assert_eq!(prev_leaf(&page), prev);
            for i in 0..num_keys(&page) {
                let k = leaf_key(&page, key_len, i).to_vec();
                if let Some(last) = &last_key {
                    assert!(*last < k, "leaf chain out of order");
                }
                last_key = Some(k);
            }
            prev = cur;
            cur = next_leaf(&page);
        }
        assert_eq!(hdr.last_leaf, prev);
    }

    #[cfg(test)]
    fn check_node(&self, key_len: usize, page_no: PageNo, low: Option<&[u8]>, high: Option<&[u8]>) {
        let guard = self.fetch(page_no).unwrap();
        let page = guard.read();
        let n = num_keys(&page);
        for i in 0..n {
            let k = if is_leaf(&page) {
                leaf_key(&page, key_len, i)
            } else {
                internal_key(&page, key_len, i)
            };
            if let Some(low) = low {
                assert!(k >= low, "key below subtree bound");
            }
            if let Some(high) = high {
                assert!(k < high, "key above subtree bound");
            }
            if i + 1 < n {
                let next = if is_leaf(&page) {
                    leaf_key(&page, key_len, i + 1)
                } else {
                    internal_key(&page, key_len, i + 1)
                };
                assert!(k < next, "keys out of order in node {page_no}");
            }
        }
        if !is_leaf(&page) {
            for i in 0..=n {
                let child_low = if i == 0 {
                    low
                } else {
                    Some(internal_key(&page, key_len, i - 1))
                };
                let child_high = if i == n {
                    high
                } else {
                    Some(internal_key(&page, key_len, i))
                };
                self.check_node(key_len, child(&page, key_len, i), child_low, child_high);
            }
        }
    }
}

/// Forward iterator over leaf entries. Yields `(key, rid)` pairs.
pub struct BTreeIter<'a> {
    index: &'a BTreeIndex,
    page_no: PageNo,
    pos: usize,
}

impl BTreeIter<'_> {
    pub fn next(&mut self) -> Result<Option<(Vec<u8>, Rid)>, StorageError> {
        let key_len = self.index.key_len();
        loop {
            if self.page_no == NO_PAGE {
                return Ok(None);
            }
            let guard = self.index.fetch(self.page_no)?;
            let page = guard.read();
            if self.pos < num_keys(&page) {
                let key = leaf_key(&page, key_len, self.pos).to_vec();
                let rid = leaf_rid(&page, key_len, self.pos);
                self.pos += 1;
                return Ok(Some((key, rid)));
            }
            self.page_no = next_leaf(&page);
            self.pos = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskManager;
    use crate::wal::LogManager;
    use tempfile::tempdir;

    // A wide key forces small fanout so splits and merges kick in early.
    const TEST_KEY_LEN: usize = 500;

    fn key(v: u32) -> Vec<u8> {
        let mut k = vec![0u8; TEST_KEY_LEN];
        k[..4].copy_from_slice(&v.to_be_bytes());
        k
    }

    fn tree_fixture() -> (tempfile::TempDir, Arc<BufferPool>, BTreeIndex) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskManager::open(dir.path()).unwrap());
        let log = Arc::new(LogManager::new(Arc::clone(&disk)));
        let pool = Arc::new(BufferPool::new(disk, log, 128));
        let tree = BTreeIndex::create(Arc::clone(&pool), "t_a", TEST_KEY_LEN).unwrap();
        (dir, pool, tree)
    }

    #[test]
    fn insert_and_point_lookup() {
        let (_dir, _pool, tree) = tree_fixture();
        for v in [5u32, 1, 9, 3, 7] {
            assert!(tree.insert(&key(v), Rid::new(1, v), None).unwrap().is_some());
        }
        assert_eq!(tree.get(&key(3)).unwrap(), Some(Rid::new(1, 3)));
        assert_eq!(tree.get(&key(4)).unwrap(), None);
        tree.check_invariants();
    }

    #[test]
    fn duplicate_insert_returns_none_and_leaves_tree_unchanged() {
        let (_dir, _pool, tree) = tree_fixture();
        assert!(tree.insert(&key(1), Rid::new(1, 0), None).unwrap().is_some());
        assert!(tree.insert(&key(1), Rid::new(9, 9), None).unwrap().is_none());
        assert_eq!(tree.get(&key(1)).unwrap(), Some(Rid::new(1, 0)));

        let mut iter = tree.leaf_begin();
        let mut count = 0;
        while iter.next().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 1);
    }

    #[test]
    fn ordered_iteration_across_splits() {
        let (_dir, _pool, tree) = tree_fixture();
        // Enough keys for multiple leaf splits and a root split.
        let mut values: Vec<u32> = (0..64).collect();
        // Insert in a shuffled-but-deterministic order.
        values.sort_by_key(|v| (v * 37) % 64);
        for &v in &values {
            tree.insert(&key(v), Rid::new(1, v), None).unwrap();
        }
        tree.check_invariants();

        let mut iter = tree.leaf_begin();
        let mut seen = Vec::new();
        while let Some((k, rid)) = iter.next().unwrap() {
            seen.push((k, rid.slot_no));
        }
        let expected: Vec<_> = (0..64).map(|v| (key(v), v)).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn bounds_split_the_key_space() {
        let (_dir, _pool, tree) = tree_fixture();
        for v in (0..40).map(|v| v * 2) {
            tree.insert(&key(v), Rid::new(1, v), None).unwrap();
        }
        // lower_bound lands on the key itself, or the next even one.
        let mut it = tree.lower_bound(&key(10)).unwrap();
        assert_eq!(it.next().unwrap().unwrap().0, key(10));
        let mut it = tree.lower_bound(&key(11)).unwrap();
        assert_eq!(it.next().unwrap().unwrap().0, key(12));
        // upper_bound always strictly advances.
        let mut it = tree.upper_bound(&key(10)).unwrap();
        assert_eq!(it.next().unwrap().unwrap().0, key(12));
        // Bounds past the maximum are exhausted immediately.
        let mut it = tree.lower_bound(&key(100)).unwrap();
        assert!(it.next().unwrap().is_none());
    }

    #[test]
    fn delete_returns_whether_the_key_existed() {
        let (_dir, _pool, tree) = tree_fixture();
        tree.insert(&key(1), Rid::new(1, 1), None).unwrap();
        assert!(tree.delete(&key(1), None).unwrap());
        assert!(!tree.delete(&key(1), None).unwrap());
        assert_eq!(tree.get(&key(1)).unwrap(), None);
    }

    #[test]
    fn deleting_most_keys_keeps_the_tree_consistent() {
        let (_dir, _pool, tree) = tree_fixture();
        for v in 0..64 {
            tree.insert(&key(v), Rid::new(1, v), None).unwrap();
        }
        // Remove everything but the multiples of eight, forcing borrows,
        // merges, and root shrinkage along the way.
        for v in 0..64 {
            if v % 8 != 0 {
                assert!(tree.delete(&key(v), None).unwrap(), "delete {v}");
                tree.check_invariants();
            }
        }
        let mut iter = tree.leaf_begin();
        let mut seen = Vec::new();
        while let Some((_, rid)) = iter.next().unwrap() {
            seen.push(rid.slot_no);
        }
        assert_eq!(seen, vec![0, 8, 16, 24, 32, 40, 48, 56]);

        for v in (0..64).filter(|v| v % 8 == 0) {
            assert!(tree.delete(&key(v), None).unwrap());
        }
        let mut iter = tree.leaf_begin();
        assert!(iter.next().unwrap().is_none());
        tree.check_invariants();
    }

    #[test]
    fn index_survives_flush_and_reopen() {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskManager::open(dir.path()).unwrap());
        let log = Arc::new(LogManager::new(Arc::clone(&disk)));
        let pool = Arc::new(BufferPool::new(Arc::clone(&disk), log, 128));
        {
            let tree = BTreeIndex::create(Arc::clone(&pool), "t_a", TEST_KEY_LEN).unwrap();
            for v in 0..32 {
                tree.insert(&key(v), Rid::new(1, v), None).unwrap();
            }
            tree.flush().unwrap();
            disk.close_file(tree.file_id()).unwrap();
        }
        let tree = BTreeIndex::open(Arc::clone(&pool), "t_a").unwrap();
        assert_eq!(tree.key_len(), TEST_KEY_LEN);
        for v in 0..32 {
            assert_eq!(tree.get(&key(v)).unwrap(), Some(Rid::new(1, v)));
        }
        tree.check_invariants();
    }
}
