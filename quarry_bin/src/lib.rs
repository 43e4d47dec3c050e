//! QuarryDB: a small disk-resident relational engine. This crate wires the
//! gneiss storage engine to a SQL front end and exposes a [`Database`] /
//! [`Session`] API plus the interactive shell the binary wraps.

use std::cell::RefCell;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::{Arc, RwLock};

pub mod catalog;
pub mod errors;
pub mod executor;
pub mod parser;
pub mod planner;
pub mod printer;
pub mod recovery;
pub mod value;

use catalog::SystemManager;
use errors::QueryError;
use executor::ExecCtx;
use gneiss::buffer_pool::{BufferPool, BUFFER_POOL_SIZE};
use gneiss::disk::DiskManager;
use gneiss::lock::LockManager;
use gneiss::txn::{Context, Transaction, TransactionManager};
use gneiss::wal::LogManager;
use parser::Statement;

/// What a statement produced, for the shell to render.
#[derive(Debug, PartialEq)]
pub enum ExecuteResult {
    ResultSet {
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    Inserted(usize),
    Deleted(usize),
    Updated(usize),
    Ddl,
    Begun,
    Committed,
    RolledBack,
    Help,
    Exit,
}

/// One database: storage services plus the system manager, shared by every
/// session. Opening runs crash recovery before anything else.
pub struct Database {
    disk: Arc<DiskManager>,
    pool: Arc<BufferPool>,
    log_mgr: Arc<LogManager>,
    lock_mgr: Arc<LockManager>,
    txn_mgr: Arc<TransactionManager>,
    sm: RwLock<SystemManager>,
}

impl Database {
    /// Opens (creating if absent) the database stored in `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Arc<Self>, QueryError> {
        let dir = dir.as_ref();
        let db_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "quarry".to_string());
        let disk = Arc::new(DiskManager::open(dir)?);
        let log_mgr = Arc::new(LogManager::new(Arc::clone(&disk)));
        let pool = Arc::new(BufferPool::new(
            Arc::clone(&disk),
            Arc::clone(&log_mgr),
            BUFFER_POOL_SIZE,
        ));
        let lock_mgr = Arc::new(LockManager::new());
        let mut sm = SystemManager::open(Arc::clone(&pool), &db_name)?;

        let outcome = recovery::recover(&disk, &pool, &log_mgr, &lock_mgr, &mut sm)?;
        log::info!(
            "database `{db_name}` open; next txn id {}, next lsn {}",
            outcome.next_txn_id,
            outcome.next_lsn
        );

        Ok(Arc::new(Self {
            disk,
            pool,
            log_mgr,
            lock_mgr,
            txn_mgr: Arc::new(TransactionManager::new(outcome.next_txn_id)),
            sm: RwLock::new(sm),
        }))
    }

    /// Starts a client session. Each session runs its statements on its own
    /// thread of control and owns at most one explicit transaction.
    pub fn session(self: &Arc<Self>) -> Session {
        Session {
            db: Arc::clone(self),
            txn: None,
        }
    }

    /// Test hook: where `SHOW TABLES` / `SHOW INDEX` append their lines.
    pub fn set_output_path<P: Into<std::path::PathBuf>>(&self, path: P) {
        self.sm.write().unwrap().set_output_path(path);
    }

    /// Flushes every cached page. The WAL makes this optional; shutdown
    /// paths use it to leave a clean image behind.
    pub fn flush_all(&self) -> Result<(), QueryError> {
        self.log_mgr.flush()?;
        self.pool.flush_everything()?;
        Ok(())
    }
}

/// One client's statement loop state.
pub struct Session {
    db: Arc<Database>,
    txn: Option<Transaction>,
}

impl Session {
    /// Parses and executes everything in `sql`, statement by statement.
    /// On an abort-class error the active transaction has already been
    /// rolled back when this returns.
    pub fn execute(&mut self, sql: &str) -> Result<Vec<ExecuteResult>, QueryError> {
        let statements = parser::sql_parser(sql).map_err(|errs| {
            QueryError::Parse(
                errs.into_iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        })?;
        let mut results = Vec::with_capacity(statements.len());
        for statement in statements {
            results.push(self.execute_statement(statement)?);
        }
        Ok(results)
    }

    pub fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    fn execute_statement(&mut self, stmt: Statement) -> Result<ExecuteResult, QueryError> {
        match stmt {
            Statement::Begin => {
                if self.txn.is_none() {
                    self.txn = Some(self.db.txn_mgr.begin(&self.db.log_mgr)?);
                }
                Ok(ExecuteResult::Begun)
            }
            Statement::Commit => {
                if let Some(mut txn) = self.txn.take() {
                    self.db
                        .txn_mgr
                        .commit(&mut txn, &self.db.log_mgr, &self.db.lock_mgr)?;
                }
                Ok(ExecuteResult::Committed)
            }
            Statement::Rollback => {
                self.rollback_active()?;
                Ok(ExecuteResult::RolledBack)
            }
            Statement::Exit => Ok(ExecuteResult::Exit),
            Statement::Help => Ok(ExecuteResult::Help),

            Statement::ShowTables => {
                let sm = self.db.sm.read().unwrap();
                let meta = sm.show_tables()?;
                Ok(ExecuteResult::ResultSet {
                    headers: meta.headers,
                    rows: meta.rows,
                })
            }
            Statement::ShowIndex { table } => {
                let sm = self.db.sm.read().unwrap();
                let meta = sm.show_index(&table)?;
                Ok(ExecuteResult::ResultSet {
                    headers: meta.headers,
                    rows: meta.rows,
                })
            }
            Statement::Desc { table } => {
                let sm = self.db.sm.read().unwrap();
                let meta = sm.desc_table(&table)?;
                Ok(ExecuteResult::ResultSet {
                    headers: meta.headers,
                    rows: meta.rows,
                })
            }

            Statement::CreateTable { table, columns } => {
                let col_defs: Vec<_> = columns
                    .iter()
                    .map(|def| {
                        let (ty, len) = match def.ty {
                            parser::TypeName::Int => (value::ColType::Int, 0),
                            parser::TypeName::Bigint => (value::ColType::Bigint, 0),
                            parser::TypeName::Float => (value::ColType::Float, 0),
                            parser::TypeName::Char(n) => (value::ColType::Char, n),
                            parser::TypeName::Datetime => (value::ColType::Datetime, 0),
                        };
                        (def.name.clone(), ty, len)
                    })
                    .collect();
                self.db.sm.write().unwrap().create_table(&table, &col_defs)?;
                Ok(ExecuteResult::Ddl)
            }
            Statement::DropTable { table } => self.run_in_txn(|txn, db| {
                let mut sm = db.sm.write().unwrap();
                let mut ctx = Context {
                    lock_mgr: &db.lock_mgr,
                    log_mgr: &db.log_mgr,
                    txn,
                };
                sm.drop_table(&table, Some(&mut ctx))?;
                Ok(ExecuteResult::Ddl)
            }),
            Statement::CreateIndex { table, columns } => self.run_in_txn(|txn, db| {
                let mut sm = db.sm.write().unwrap();
                let mut ctx = Context {
                    lock_mgr: &db.lock_mgr,
                    log_mgr: &db.log_mgr,
                    txn,
                };
                sm.create_index(&table, &columns, Some(&mut ctx))?;
                Ok(ExecuteResult::Ddl)
            }),
            Statement::DropIndex { table, columns } => self.run_in_txn(|txn, db| {
                let mut sm = db.sm.write().unwrap();
                let mut ctx = Context {
                    lock_mgr: &db.lock_mgr,
                    log_mgr: &db.log_mgr,
                    txn,
                };
                sm.drop_index(&table, &columns, Some(&mut ctx))?;
                Ok(ExecuteResult::Ddl)
            }),

            Statement::Insert { table, values } => self.run_in_txn(|txn, db| {
                let sm = db.sm.read().unwrap();
                let bound = planner::bind_insert(&sm, &table, &values)?;
                let ctx = ExecCtx {
                    sm: &sm,
                    lock_mgr: &db.lock_mgr,
                    log_mgr: &db.log_mgr,
                    txn: RefCell::new(txn),
                };
                let n = executor::dml::execute_insert(&ctx, &bound)?;
                Ok(ExecuteResult::Inserted(n))
            }),
            Statement::Delete { table, selection } => self.run_in_txn(|txn, db| {
                let sm = db.sm.read().unwrap();
                let bound = planner::bind_mutation_scan(&sm, &table, &selection)?;
                let ctx = ExecCtx {
                    sm: &sm,
                    lock_mgr: &db.lock_mgr,
                    log_mgr: &db.log_mgr,
                    txn: RefCell::new(txn),
                };
                let n = executor::dml::execute_delete(&ctx, &bound)?;
                Ok(ExecuteResult::Deleted(n))
            }),
            Statement::Update {
                table,
                assignments,
                selection,
            } => self.run_in_txn(|txn, db| {
                let sm = db.sm.read().unwrap();
                let bound = planner::bind_update(&sm, &table, &assignments, &selection)?;
                let ctx = ExecCtx {
                    sm: &sm,
                    lock_mgr: &db.lock_mgr,
                    log_mgr: &db.log_mgr,
                    txn: RefCell::new(txn),
                };
                let n = executor::dml::execute_update(&ctx, &bound)?;
                Ok(ExecuteResult::Updated(n))
            }),
            Statement::Select(select) => self.run_in_txn(|txn, db| {
                let sm = db.sm.read().unwrap();
                let plan = planner::plan_select(&sm, &select)?;
                let ctx = ExecCtx {
                    sm: &sm,
                    lock_mgr: &db.lock_mgr,
                    log_mgr: &db.log_mgr,
                    txn: RefCell::new(txn),
                };
                let (schema, rows) = executor::run_select(plan, &ctx)?;
                let headers = schema.iter().map(|c| c.name.clone()).collect();
                let rows = rows
                    .into_iter()
                    .map(|row| row.into_iter().map(|v| v.to_string()).collect())
                    .collect();
                Ok(ExecuteResult::ResultSet { headers, rows })
            }),
        }
    }

    /// Runs `f` inside the session's transaction, starting (and committing)
    /// an implicit one when no explicit transaction is open. Abort-class
    /// failures roll the transaction back before propagating; other errors
    /// only terminate the implicit transaction.
    fn run_in_txn<R>(
        &mut self,
        f: impl FnOnce(&mut Transaction, &Database) -> Result<R, QueryError>,
    ) -> Result<R, QueryError> {
        let implicit = self.txn.is_none();
        if implicit {
            self.txn = Some(self.db.txn_mgr.begin(&self.db.log_mgr)?);
        }
        let txn = self.txn.as_mut().expect("just ensured");

        match f(txn, &self.db) {
            Ok(result) => {
                if implicit {
                    let mut txn = self.txn.take().expect("still ours");
                    self.db
                        .txn_mgr
                        .commit(&mut txn, &self.db.log_mgr, &self.db.lock_mgr)?;
                }
                Ok(result)
            }
            Err(err) => {
                if implicit || err.is_abort() {
                    if let Err(rollback_err) = self.rollback_active() {
                        log::warn!("rollback after failed statement also failed: {rollback_err}");
                    }
                }
                Err(err)
            }
        }
    }

    fn rollback_active(&mut self) -> Result<(), QueryError> {
        if let Some(mut txn) = self.txn.take() {
            let mut sm = self.db.sm.write().unwrap();
            self.db
                .txn_mgr
                .abort(&mut txn, &mut *sm, &self.db.log_mgr, &self.db.lock_mgr)?;
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.txn.is_some() {
            if let Err(e) = self.rollback_active() {
                log::warn!("rollback on session close failed: {e}");
            }
        }
    }
}

const HELP_TEXT: &str = "\
Statements (terminate with `;`):
  SHOW TABLES | SHOW INDEX FROM <tbl> | DESC <tbl>
  CREATE TABLE <tbl> (<col> <type>, ...)        types: INT BIGINT FLOAT CHAR(n) DATETIME
  DROP TABLE <tbl>
  CREATE INDEX <tbl> (<col>, ...) | DROP INDEX <tbl> (<col>, ...)
  INSERT INTO <tbl> VALUES (<val>, ...)
  DELETE FROM <tbl> [WHERE <pred>]
  UPDATE <tbl> SET <col>=<val>, ... [WHERE <pred>]
  SELECT <cols|*|aggregates> FROM <tbl>, ... [WHERE <pred>]
         [ORDER BY <col> [ASC|DESC], ...] [LIMIT <n>]
  BEGIN | COMMIT | ABORT | ROLLBACK
  EXIT | HELP
";

/// The interactive shell: reads `;`-terminated statements from stdin and
/// prints result tables to stdout.
pub fn run_repl(db: &Arc<Database>) -> io::Result<()> {
    let mut session = db.session();
    let stdin = io::stdin();
    let mut out = io::stdout();
    let mut buffer = String::new();

    write!(out, "quarry> ")?;
    out.flush()?;
    for line in stdin.lock().lines() {
        let line = line?;
        buffer.push_str(&line);
        buffer.push('\n');
        if !line.trim_end().ends_with(';') {
            write!(out, "     -> ")?;
            out.flush()?;
            continue;
        }

        let sql = std::mem::take(&mut buffer);
        match session.execute(&sql) {
            Ok(results) => {
                for result in results {
                    match result {
                        ExecuteResult::ResultSet { headers, rows } => {
                            write!(out, "{}", printer::render_table(&headers, &rows))?;
                        }
                        ExecuteResult::Inserted(n) => writeln!(out, "INSERT {n}")?,
                        ExecuteResult::Deleted(n) => writeln!(out, "DELETE {n}")?,
                        ExecuteResult::Updated(n) => writeln!(out, "UPDATE {n}")?,
                        ExecuteResult::Ddl => writeln!(out, "OK")?,
                        ExecuteResult::Begun => writeln!(out, "BEGIN")?,
                        ExecuteResult::Committed => writeln!(out, "COMMIT")?,
                        ExecuteResult::RolledBack => writeln!(out, "ROLLBACK")?,
                        ExecuteResult::Help => write!(out, "{HELP_TEXT}")?,
                        ExecuteResult::Exit => {
                            if let Err(e) = db.flush_all() {
                                eprintln!("flush on exit failed: {e}");
                            }
                            return Ok(());
                        }
                    }
                }
            }
            Err(e) => {
                eprintln!("error: {e}");
            }
        }
        write!(out, "quarry> ")?;
        out.flush()?;
    }
    Ok(())
}

// The disk manager handle is deliberately kept alive on Database for the
// lifetime of the process.
impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("root", &self.disk.root())
            .finish_non_exhaustive()
    }
}
