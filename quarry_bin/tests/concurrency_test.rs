//! Two-session locking behaviour: conflicting access aborts the requester
//! immediately (no-wait deadlock prevention), and released locks free the
//! resource for others.

use quarry_bin::errors::QueryError;
use quarry_bin::{Database, ExecuteResult};
use std::thread;
use tempfile::tempdir;

fn rows(result: &ExecuteResult) -> &Vec<Vec<String>> {
    match result {
        ExecuteResult::ResultSet { rows, .. } => rows,
        other => panic!("expected a result set, got {other:?}"),
    }
}

#[test]
fn writer_blocks_reader_until_commit() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("db")).unwrap();

    let mut writer = db.session();
    writer.execute("CREATE TABLE t (a INT)").unwrap();
    writer.execute("INSERT INTO t VALUES (1)").unwrap();
    writer
        .execute("BEGIN; INSERT INTO t VALUES (2);")
        .unwrap();

    // The writer holds IX on the table; a reader's S request is refused.
    let mut reader = db.session();
    let err = reader.execute("SELECT * FROM t").unwrap_err();
    assert!(err.is_abort(), "got {err:?}");

    writer.execute("COMMIT;").unwrap();
    let mut results = reader.execute("SELECT COUNT(*) AS c FROM t").unwrap();
    assert_eq!(rows(&results.remove(0)), &[["2"]]);
}

#[test]
fn two_readers_share_then_writer_is_refused() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("db")).unwrap();

    let mut setup = db.session();
    setup.execute("CREATE TABLE t (a INT)").unwrap();
    setup.execute("INSERT INTO t VALUES (1)").unwrap();

    let mut r1 = db.session();
    let mut r2 = db.session();
    r1.execute("BEGIN; SELECT * FROM t;").unwrap();
    r2.execute("BEGIN; SELECT * FROM t;").unwrap();

    // Both readers hold S; a writer cannot take IX and aborts.
    let mut writer = db.session();
    let err = writer
        .execute("BEGIN; INSERT INTO t VALUES (2);")
        .unwrap_err();
    assert!(err.is_abort());
    assert!(!writer.in_transaction(), "aborted txn must be gone");

    r1.execute("COMMIT;").unwrap();
    r2.execute("COMMIT;").unwrap();
    writer.execute("INSERT INTO t VALUES (2)").unwrap();
}

#[test]
fn aborted_transaction_leaves_no_trace() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("db")).unwrap();

    let mut holder = db.session();
    holder.execute("CREATE TABLE t (a INT)").unwrap();
    holder.execute("BEGIN; INSERT INTO t VALUES (1);").unwrap();

    let mut rival = db.session();
    let err = rival.execute("SELECT * FROM t").unwrap_err();
    assert!(matches!(err, QueryError::Storage(_) | QueryError::Abort(_)));

    // The refused session rolled back automatically; the holder continues
    // and aborts explicitly, leaving the table empty.
    holder.execute("ROLLBACK;").unwrap();
    let mut results = rival.execute("SELECT COUNT(*) AS c FROM t").unwrap();
    assert_eq!(rows(&results.remove(0)), &[["0"]]);
}

#[test]
fn sessions_on_threads_make_progress() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("db")).unwrap();
    let mut setup = db.session();
    setup.execute("CREATE TABLE t (a INT, b INT)").unwrap();

    // Each thread retries on lock-abort, so all rows land eventually.
    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let db = db.clone();
            thread::spawn(move || {
                let mut session = db.session();
                for i in 0..25 {
                    let stmt = format!("INSERT INTO t VALUES ({}, {})", worker * 100 + i, worker);
                    loop {
                        match session.execute(&stmt) {
                            Ok(_) => break,
                            Err(e) if e.is_abort() => thread::yield_now(),
                            Err(e) => panic!("unexpected error: {e:?}"),
                        }
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut session = db.session();
    let mut results = session.execute("SELECT COUNT(*) AS c FROM t").unwrap();
    assert_eq!(rows(&results.remove(0)), &[["100"]]);
}
