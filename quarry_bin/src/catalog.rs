//! Persistent catalog (tables, columns, indexes) and the system manager that
//! owns every open heap file and index handle. The five rollback primitives
//! live here too: abort and crash recovery both undo through them.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::QueryError;
use crate::value::{ColType, Value};
use gneiss::btree::BTreeIndex;
use gneiss::buffer_pool::BufferPool;
use gneiss::heap::HeapFile;
use gneiss::lock::{LockId, LockMode};
use gneiss::txn::{Context, RollbackOps, WriteRecord};
use gneiss::wal::LogPayload;
use gneiss::Rid;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the serialised catalog inside the database directory.
pub const DB_META_NAME: &str = "db.meta";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColMeta {
    pub tab_name: String,
    pub name: String,
    pub col_type: ColType,
    pub len: u32,
    pub offset: u32,
    pub index: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub tab_name: String,
    pub cols: Vec<ColMeta>,
    pub col_tot_len: u32,
}

impl IndexMeta {
    pub fn col_names(&self) -> Vec<String> {
        self.cols.iter().map(|c| c.name.clone()).collect()
    }

    pub fn name(&self) -> String {
        index_name(&self.tab_name, &self.col_names())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabMeta {
    pub name: String,
    pub cols: Vec<ColMeta>,
    pub indexes: Vec<IndexMeta>,
}

impl TabMeta {
    pub fn record_size(&self) -> usize {
        self.cols.iter().map(|c| c.len as usize).sum()
    }

    pub fn col(&self, name: &str) -> Option<&ColMeta> {
        self.cols.iter().find(|c| c.name == name)
    }

    pub fn index_meta(&self, col_names: &[String]) -> Option<&IndexMeta> {
        self.indexes.iter().find(|i| i.col_names() == col_names)
    }
}

/// Whole-database metadata. Tables are kept ordered by name so that the
/// serialised form round-trips in a stable order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DbMeta {
    pub name: String,
    pub tabs: BTreeMap<String, TabMeta>,
}

impl DbMeta {
    /// Serialises with a crc32 footer so a torn write is caught at load.
    pub fn store<P: AsRef<Path>>(&self, path: P) -> Result<(), QueryError> {
        let body = bincode::serialize(self)
            .map_err(|e| QueryError::Internal(format!("catalog serialise: {e}")))?;
        let crc = crc32fast::hash(&body);
        let mut out = body;
        out.extend_from_slice(&crc.to_le_bytes());
        fs::write(path, out).map_err(gneiss::error::StorageError::from)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, QueryError> {
        let raw = fs::read(path).map_err(gneiss::error::StorageError::from)?;
        if raw.len() < 4 {
            return Err(QueryError::Internal("catalog file truncated".into()));
        }
        let (body, footer) = raw.split_at(raw.len() - 4);
        let stored = u32::from_le_bytes(footer.try_into().unwrap());
        if crc32fast::hash(body) != stored {
            return Err(QueryError::Internal("catalog checksum mismatch".into()));
        }
        bincode::deserialize(body)
            .map_err(|e| QueryError::Internal(format!("catalog deserialise: {e}")))
    }
}

/// Deterministic index file name: `<table>_<col1>_<col2>...`.
pub fn index_name(table: &str, col_names: &[String]) -> String {
    let mut name = table.to_string();
    for col in col_names {
        name.push('_');
        name.push_str(col);
    }
    name
}

/// Builds the packed, memcmp-ordered index key for a record.
pub fn index_key(index: &IndexMeta, record: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(index.col_tot_len as usize);
    for col in &index.cols {
        let bytes = &record[col.offset as usize..(col.offset + col.len) as usize];
        Value::from_bytes(col.col_type, bytes).encode_key(&mut key, col.len as usize);
    }
    key
}

/// Packs coerced values into a record buffer.
pub fn encode_record(tab: &TabMeta, values: &[Value]) -> Vec<u8> {
    let mut record = vec![0u8; tab.record_size()];
    for (col, value) in tab.cols.iter().zip(values) {
        value.write_bytes(&mut record[col.offset as usize..(col.offset + col.len) as usize]);
    }
    record
}

/// Unpacks a record buffer into one value per column.
pub fn decode_record(cols: &[ColMeta], record: &[u8]) -> Vec<Value> {
    cols.iter()
        .map(|col| {
            Value::from_bytes(
                col.col_type,
                &record[col.offset as usize..(col.offset + col.len) as usize],
            )
        })
        .collect()
}

/// Tabular output of the catalog statements, handed to the printer.
pub struct MetaResult {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Owns the catalog and all open storage handles of one database.
pub struct SystemManager {
    pool: Arc<BufferPool>,
    db: DbMeta,
    heaps: HashMap<String, HeapFile>,
    indexes: HashMap<String, BTreeIndex>,
    meta_path: PathBuf,
    output_path: PathBuf,
}

impl SystemManager {
    /// Loads (or initialises) the catalog and opens every table and index
    /// file it mentions.
    pub fn open(pool: Arc<BufferPool>, db_name: &str) -> Result<Self, QueryError> {
        let root = pool.disk().root().to_path_buf();
        let meta_path = root.join(DB_META_NAME);
        let db = if meta_path.exists() {
            DbMeta::load(&meta_path)?
        } else {
            let db = DbMeta {
                name: db_name.to_string(),
                tabs: BTreeMap::new(),
            };
            db.store(&meta_path)?;
            db
        };

        let mut heaps = HashMap::new();
        let mut indexes = HashMap::new();
        for tab in db.tabs.values() {
            heaps.insert(tab.name.clone(), HeapFile::open(Arc::clone(&pool), &tab.name)?);
            for index in &tab.indexes {
                let name = index.name();
                indexes.insert(name.clone(), BTreeIndex::open(Arc::clone(&pool), &name)?);
            }
        }
        Ok(Self {
            pool,
            db,
            heaps,
            indexes,
            meta_path,
            output_path: PathBuf::from("output.txt"),
        })
    }

    /// Redirects the `output.txt` appends (the default is the working
    /// directory).
    pub fn set_output_path<P: Into<PathBuf>>(&mut self, path: P) {
        self.output_path = path.into();
    }

    pub fn meta(&self) -> &DbMeta {
        &self.db
    }

    pub fn table_meta(&self, name: &str) -> Result<&TabMeta, QueryError> {
        self.db
            .tabs
            .get(name)
            .ok_or_else(|| QueryError::TableNotFound(name.to_string()))
    }

    pub fn heap(&self, name: &str) -> Result<&HeapFile, QueryError> {
        self.heaps
            .get(name)
            .ok_or_else(|| QueryError::TableNotFound(name.to_string()))
    }

    pub fn index(&self, name: &str) -> Result<&BTreeIndex, QueryError> {
        self.indexes
            .get(name)
            .ok_or_else(|| QueryError::Internal(format!("index handle `{name}` not open")))
    }

    fn flush_meta(&self) -> Result<(), QueryError> {
        self.db.store(&self.meta_path)
    }

    fn lock_table_exclusive(&self, table: &str, ctx: &mut Context<'_>) -> Result<(), QueryError> {
        let file_id = self.heap(table)?.file_id();
        ctx.lock_mgr
            .lock(ctx.txn, LockId::table(file_id), LockMode::Exclusive)?;
        Ok(())
    }

    /// Creates a table and its heap file. DDL on tables is not undoable, so
    /// no write-set entry is recorded.
    pub fn create_table(
        &mut self,
        name: &str,
        col_defs: &[(String, ColType, usize)],
    ) -> Result<(), QueryError> {
        if self.db.tabs.contains_key(name) {
            return Err(QueryError::TableExists(name.to_string()));
        }
        let mut cols = Vec::with_capacity(col_defs.len());
        let mut offset = 0u32;
        for (col_name, col_type, declared_len) in col_defs {
            let len = col_type.width(*declared_len) as u32;
            cols.push(ColMeta {
                tab_name: name.to_string(),
                name: col_name.clone(),
                col_type: *col_type,
                len,
                offset,
                index: false,
            });
            offset += len;
        }
        let tab = TabMeta {
            name: name.to_string(),
            cols,
            indexes: Vec::new(),
        };
        let heap = HeapFile::create(Arc::clone(&self.pool), name, tab.record_size())?;
        self.heaps.insert(name.to_string(), heap);
        self.db.tabs.insert(name.to_string(), tab);
        self.flush_meta()
    }

    /// Drops a table, its heap file, and every index on it.
    pub fn drop_table(
        &mut self,
        name: &str,
        mut ctx: Option<&mut Context<'_>>,
    ) -> Result<(), QueryError> {
        let tab = self.table_meta(name)?.clone();
        if let Some(ctx) = ctx.as_deref_mut() {
            self.lock_table_exclusive(name, ctx)?;
        }

        for index in &tab.indexes {
            let idx_name = index.name();
            if let Some(handle) = self.indexes.remove(&idx_name) {
                self.pool.discard_all(handle.file_id());
                self.pool.disk().close_file(handle.file_id())?;
            }
            self.pool.disk().destroy_file(&idx_name)?;
        }
        if let Some(heap) = self.heaps.remove(name) {
            self.pool.discard_all(heap.file_id());
            self.pool.disk().close_file(heap.file_id())?;
        }
        self.pool.disk().destroy_file(name)?;
        self.db.tabs.remove(name);
        self.flush_meta()
    }

    /// Creates a unique index over `col_names` and backfills it from the
    /// heap. Logged and recorded in the write set, so it undoes on abort.
    pub fn create_index(
        &mut self,
        table: &str,
        col_names: &[String],
        mut ctx: Option<&mut Context<'_>>,
    ) -> Result<(), QueryError> {
        let tab = self.table_meta(table)?.clone();
        if let Some(ctx) = ctx.as_deref_mut() {
            self.lock_table_exclusive(table, ctx)?;
        }
        if tab.index_meta(col_names).is_some() {
            return Err(QueryError::IndexExists(
                table.to_string(),
                col_names.join(","),
            ));
        }

        let mut cols = Vec::with_capacity(col_names.len());
        let mut col_tot_len = 0u32;
        for col_name in col_names {
            let col = tab
                .col(col_name)
                .ok_or_else(|| QueryError::ColumnNotFound(col_name.clone()))?;
            col_tot_len += col.len;
            cols.push(col.clone());
        }
        let index_meta = IndexMeta {
            tab_name: table.to_string(),
            cols,
            col_tot_len,
        };
        let idx_name = index_meta.name();
        let tree = BTreeIndex::create(Arc::clone(&self.pool), &idx_name, col_tot_len as usize)?;

        // Backfill from a full heap scan. Existing duplicates make the
        // unique index impossible, which fails the DDL.
        let heap = self.heap(table)?;
        let mut scan = heap.scan();
        while let Some(rid) = scan.next().map_err(QueryError::from)? {
            let record = heap.get(rid, ctx.as_deref_mut())?;
            let key = index_key(&index_meta, &record);
            if tree.insert(&key, rid, ctx.as_deref_mut())?.is_none() {
                drop(scan);
                self.pool.discard_all(tree.file_id());
                self.pool.disk().close_file(tree.file_id())?;
                self.pool.disk().destroy_file(&idx_name)?;
                return Err(QueryError::UniqueViolation(idx_name));
            }
        }
        drop(scan);
        tree.flush()?;

        let tab = self.db.tabs.get_mut(table).expect("checked above");
        if col_names.len() == 1 {
            if let Some(col) = tab.cols.iter_mut().find(|c| c.name == col_names[0]) {
                col.index = true;
            }
        }
        tab.indexes.push(index_meta);
        self.indexes.insert(idx_name, tree);
        self.flush_meta()?;

        if let Some(ctx) = ctx {
            let lsn = ctx.txn.log(
                ctx.log_mgr,
                LogPayload::CreateIndex {
                    table: table.to_string(),
                    cols: col_names.to_vec(),
                },
            )?;
            ctx.txn.write_set.push(WriteRecord::CreateIndex {
                table: table.to_string(),
                cols: col_names.to_vec(),
                lsn,
            });
        }
        Ok(())
    }

    /// Drops an index. Logged and recorded in the write set.
    pub fn drop_index(
        &mut self,
        table: &str,
        col_names: &[String],
        mut ctx: Option<&mut Context<'_>>,
    ) -> Result<(), QueryError> {
        let tab = self.table_meta(table)?.clone();
        if let Some(ctx) = ctx.as_deref_mut() {
            self.lock_table_exclusive(table, ctx)?;
        }
        if tab.index_meta(col_names).is_none() {
            return Err(QueryError::IndexNotFound(
                table.to_string(),
                col_names.join(","),
            ));
        }

        let idx_name = index_name(table, col_names);
        if let Some(handle) = self.indexes.remove(&idx_name) {
            self.pool.discard_all(handle.file_id());
            self.pool.disk().close_file(handle.file_id())?;
        }
        self.pool.disk().destroy_file(&idx_name)?;

        let tab = self.db.tabs.get_mut(table).expect("checked above");
        tab.indexes.retain(|i| i.col_names() != col_names);
        if col_names.len() == 1 {
            if let Some(col) = tab.cols.iter_mut().find(|c| c.name == col_names[0]) {
                col.index = false;
            }
        }
        self.flush_meta()?;

        if let Some(ctx) = ctx {
            let lsn = ctx.txn.log(
                ctx.log_mgr,
                LogPayload::DropIndex {
                    table: table.to_string(),
                    cols: col_names.to_vec(),
                },
            )?;
            ctx.txn.write_set.push(WriteRecord::DropIndex {
                table: table.to_string(),
                cols: col_names.to_vec(),
                lsn,
            });
        }
        Ok(())
    }

    /// `SHOW TABLES`: one row per table, also appended to `output.txt`.
    pub fn show_tables(&self) -> Result<MetaResult, QueryError> {
        let mut out = self.open_output()?;
        writeln!(out, "| Tables |").map_err(gneiss::error::StorageError::from)?;
        let mut rows = Vec::new();
        for tab in self.db.tabs.values() {
            writeln!(out, "| {} |", tab.name).map_err(gneiss::error::StorageError::from)?;
            rows.push(vec![tab.name.clone()]);
        }
        Ok(MetaResult {
            headers: vec!["Tables".to_string()],
            rows,
        })
    }

    /// `SHOW INDEX FROM t`: one row per index, also appended to
    /// `output.txt`.
    pub fn show_index(&self, table: &str) -> Result<MetaResult, QueryError> {
        let tab = self.table_meta(table)?;
        let mut out = self.open_output()?;
        let mut rows = Vec::new();
        for index in &tab.indexes {
            let cols = format!("({})", index.col_names().join(","));
            writeln!(out, "| {} | unique | {} |", table, cols)
                .map_err(gneiss::error::StorageError::from)?;
            rows.push(vec![table.to_string(), "unique".to_string(), cols]);
        }
        Ok(MetaResult {
            headers: vec!["Table".into(), "Type".into(), "Index".into()],
            rows,
        })
    }

    /// `DESC t`: field, type, and whether a single-column index covers it.
    pub fn desc_table(&self, table: &str) -> Result<MetaResult, QueryError> {
        let tab = self.table_meta(table)?;
        let rows = tab
            .cols
            .iter()
            .map(|col| {
                let ty = match col.col_type {
                    ColType::Char => format!("CHAR({})", col.len),
                    other => other.to_string(),
                };
                vec![
                    col.name.clone(),
                    ty,
                    if col.index { "YES" } else { "NO" }.to_string(),
                ]
            })
            .collect();
        Ok(MetaResult {
            headers: vec!["Field".into(), "Type".into(), "Index".into()],
            rows,
        })
    }

    fn open_output(&self) -> Result<fs::File, QueryError> {
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output_path)
            .map_err(|e| QueryError::Storage(e.into()))
    }

    /// Removes every index entry for `record`, then the record itself.
    fn delete_record_and_entries(
        &self,
        table: &str,
        rid: Rid,
        record: &[u8],
        mut ctx: Option<&mut Context<'_>>,
    ) -> Result<(), QueryError> {
        let tab = self.table_meta(table)?;
        for index in &tab.indexes {
            let key = index_key(index, record);
            self.index(&index.name())?.delete(&key, ctx.as_deref_mut())?;
        }
        self.heap(table)?.delete(rid, ctx)?;
        Ok(())
    }
}

impl RollbackOps for SystemManager {
    type Error = QueryError;

    fn undo_insert(
        &mut self,
        table: &str,
        rid: Rid,
        ctx: &mut Context<'_>,
    ) -> Result<(), QueryError> {
        let record = self.heap(table)?.get(rid, Some(ctx))?;
        self.delete_record_and_entries(table, rid, &record, Some(ctx))
    }

    fn undo_update(
        &mut self,
        table: &str,
        rid: Rid,
        old: &[u8],
        ctx: &mut Context<'_>,
    ) -> Result<(), QueryError> {
        let tab = self.table_meta(table)?;
        let current = self.heap(table)?.get(rid, Some(ctx))?;
        for index in &tab.indexes {
            let current_key = index_key(index, &current);
            let restored_key = index_key(index, old);
            if current_key == restored_key {
                continue;
            }
            let tree = self.index(&index.name())?;
            tree.delete(&current_key, Some(ctx))?;
            if tree.insert(&restored_key, rid, Some(ctx))?.is_none() {
                return Err(QueryError::UniqueViolation(index.name()));
            }
        }
        self.heap(table)?.update(rid, old, Some(ctx))?;
        Ok(())
    }

    fn undo_delete(
        &mut self,
        table: &str,
        old: &[u8],
        ctx: &mut Context<'_>,
    ) -> Result<(), QueryError> {
        let tab = self.table_meta(table)?;
        let rid = self.heap(table)?.insert(old, Some(ctx))?;
        for index in &tab.indexes {
            let key = index_key(index, old);
            if self.index(&index.name())?.insert(&key, rid, Some(ctx))?.is_none() {
                return Err(QueryError::UniqueViolation(index.name()));
            }
        }
        Ok(())
    }

    fn undo_create_index(
        &mut self,
        table: &str,
        cols: &[String],
        ctx: &mut Context<'_>,
    ) -> Result<(), QueryError> {
        self.drop_index(table, cols, Some(ctx))
    }

    fn undo_drop_index(
        &mut self,
        table: &str,
        cols: &[String],
        ctx: &mut Context<'_>,
    ) -> Result<(), QueryError> {
        self.create_index(table, cols, Some(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gneiss::disk::DiskManager;
    use gneiss::wal::LogManager;
    use tempfile::tempdir;

    fn sm_fixture(dir: &Path) -> SystemManager {
        let disk = Arc::new(DiskManager::open(dir).unwrap());
        let log = Arc::new(LogManager::new(Arc::clone(&disk)));
        let pool = Arc::new(BufferPool::new(disk, log, 128));
        let mut sm = SystemManager::open(pool, "testdb").unwrap();
        sm.set_output_path(dir.join("output.txt"));
        sm
    }

    fn int_col(name: &str) -> (String, ColType, usize) {
        (name.to_string(), ColType::Int, 0)
    }

    #[test]
    fn catalog_round_trips_with_checksum() {
        let dir = tempdir().unwrap();
        let mut sm = sm_fixture(dir.path());
        sm.create_table(
            "t",
            &[
                int_col("a"),
                ("b".to_string(), ColType::Char, 8),
                ("c".to_string(), ColType::Datetime, 0),
            ],
        )
        .unwrap();
        sm.create_table("s", &[int_col("x")]).unwrap();

        let reloaded = DbMeta::load(dir.path().join(DB_META_NAME)).unwrap();
        assert_eq!(&reloaded, sm.meta());
        let names: Vec<_> = reloaded.tabs.keys().cloned().collect();
        assert_eq!(names, ["s", "t"]);
        let t = &reloaded.tabs["t"];
        assert_eq!(t.record_size(), 4 + 8 + 19);
        assert_eq!(t.col("b").unwrap().offset, 4);
    }

    #[test]
    fn corrupted_catalog_is_rejected() {
        let dir = tempdir().unwrap();
        let sm = sm_fixture(dir.path());
        drop(sm);
        let path = dir.path().join(DB_META_NAME);
        let mut raw = fs::read(&path).unwrap();
        let mid = raw.len() / 2;
        raw[mid] ^= 0xFF;
        fs::write(&path, raw).unwrap();
        assert!(DbMeta::load(&path).is_err());
    }

    #[test]
    fn duplicate_table_and_missing_table_errors() {
        let dir = tempdir().unwrap();
        let mut sm = sm_fixture(dir.path());
        sm.create_table("t", &[int_col("a")]).unwrap();
        assert!(matches!(
            sm.create_table("t", &[int_col("a")]),
            Err(QueryError::TableExists(_))
        ));
        assert!(matches!(
            sm.table_meta("missing"),
            Err(QueryError::TableNotFound(_))
        ));
    }

    #[test]
    fn create_index_backfills_existing_records() {
        let dir = tempdir().unwrap();
        let mut sm = sm_fixture(dir.path());
        sm.create_table("t", &[int_col("a"), ("b".to_string(), ColType::Char, 4)])
            .unwrap();
        let tab = sm.table_meta("t").unwrap().clone();
        for v in [3i32, 1, 2] {
            let record = encode_record(&tab, &[Value::Int(v), Value::Str("x".into())]);
            sm.heap("t").unwrap().insert(&record, None).unwrap();
        }

        sm.create_index("t", &["a".to_string()], None).unwrap();
        assert!(sm.table_meta("t").unwrap().col("a").unwrap().index);

        let tree = sm.index("t_a").unwrap();
        let mut iter = tree.leaf_begin();
        let mut keys = Vec::new();
        while let Some((key, _)) = iter.next().unwrap() {
            keys.push(key);
        }
        assert_eq!(keys.len(), 3);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn create_index_on_duplicate_data_fails() {
        let dir = tempdir().unwrap();
        let mut sm = sm_fixture(dir.path());
        sm.create_table("t", &[int_col("a")]).unwrap();
        let tab = sm.table_meta("t").unwrap().clone();
        for v in [1i32, 1] {
            let record = encode_record(&tab, &[Value::Int(v)]);
            sm.heap("t").unwrap().insert(&record, None).unwrap();
        }
        assert!(matches!(
            sm.create_index("t", &["a".to_string()], None),
            Err(QueryError::UniqueViolation(_))
        ));
        // The failed index left no trace behind.
        assert!(sm.table_meta("t").unwrap().indexes.is_empty());
        assert!(sm.index("t_a").is_err());
    }

    #[test]
    fn drop_table_removes_files_and_indexes() {
        let dir = tempdir().unwrap();
        let mut sm = sm_fixture(dir.path());
        sm.create_table("t", &[int_col("a")]).unwrap();
        sm.create_index("t", &["a".to_string()], None).unwrap();
        assert!(dir.path().join("t").exists());
        assert!(dir.path().join("t_a").exists());

        sm.drop_table("t", None).unwrap();
        assert!(!dir.path().join("t").exists());
        assert!(!dir.path().join("t_a").exists());
        assert!(sm.table_meta("t").is_err());
    }

    #[test]
    fn show_statements_append_to_output_file() {
        let dir = tempdir().unwrap();
        let mut sm = sm_fixture(dir.path());
        sm.create_table("t", &[int_col("a")]).unwrap();
        sm.create_index("t", &["a".to_string()], None).unwrap();

        let tables = sm.show_tables().unwrap();
        assert_eq!(tables.rows, [["t"]]);
        let index = sm.show_index("t").unwrap();
        assert_eq!(index.rows, [["t", "unique", "(a)"]]);

        let contents = fs::read_to_string(dir.path().join("output.txt")).unwrap();
        assert_eq!(contents, "| Tables |\n| t |\n| t | unique | (a) |\n");
    }

    #[test]
    fn desc_reports_types_and_index_flags() {
        let dir = tempdir().unwrap();
        let mut sm = sm_fixture(dir.path());
        sm.create_table("t", &[int_col("a"), ("b".to_string(), ColType::Char, 8)])
            .unwrap();
        sm.create_index("t", &["a".to_string()], None).unwrap();

        let desc = sm.desc_table("t").unwrap();
        assert_eq!(desc.headers, ["Field", "Type", "Index"]);
        assert_eq!(
            desc.rows,
            [["a", "INT", "YES"], ["b", "CHAR(8)", "NO"]]
        );
    }

    #[test]
    fn index_key_orders_multi_column_keys() {
        let cols = vec![
            ColMeta {
                tab_name: "t".into(),
                name: "a".into(),
                col_type: ColType::Int,
                len: 4,
                offset: 0,
                index: false,
            },
            ColMeta {
                tab_name: "t".into(),
                name: "b".into(),
                col_type: ColType::Char,
                len: 4,
                offset: 4,
                index: false,
            },
        ];
        let tab = TabMeta {
            name: "t".into(),
            cols: cols.clone(),
            indexes: vec![],
        };
        let index = IndexMeta {
            tab_name: "t".into(),
            cols,
            col_tot_len: 8,
        };
        let k1 = index_key(
            &index,
            &encode_record(&tab, &[Value::Int(-1), Value::Str("zz".into())]),
        );
        let k2 = index_key(
            &index,
            &encode_record(&tab, &[Value::Int(2), Value::Str("aa".into())]),
        );
        let k3 = index_key(
            &index,
            &encode_record(&tab, &[Value::Int(2), Value::Str("ab".into())]),
        );
        assert!(k1 < k2 && k2 < k3);
        assert_eq!(k1.len(), 8);
    }
}
