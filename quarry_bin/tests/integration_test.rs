//! End-to-end statement scenarios through the public Database/Session API.

use quarry_bin::{Database, ExecuteResult};
use tempfile::tempdir;

fn rows(result: &ExecuteResult) -> &Vec<Vec<String>> {
    match result {
        ExecuteResult::ResultSet { rows, .. } => rows,
        other => panic!("expected a result set, got {other:?}"),
    }
}

fn one_result(session: &mut quarry_bin::Session, sql: &str) -> ExecuteResult {
    let mut results = session.execute(sql).expect(sql);
    assert_eq!(results.len(), 1, "one statement in: {sql}");
    results.remove(0)
}

#[test]
fn ddl_and_round_trip_dml() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("db")).unwrap();
    let mut session = db.session();

    assert_eq!(
        one_result(&mut session, "CREATE TABLE t (a INT, b CHAR(8))"),
        ExecuteResult::Ddl
    );
    assert_eq!(
        one_result(&mut session, "INSERT INTO t VALUES (1, 'hello')"),
        ExecuteResult::Inserted(1)
    );
    assert_eq!(
        one_result(&mut session, "INSERT INTO t VALUES (2, 'world')"),
        ExecuteResult::Inserted(1)
    );

    let result = one_result(&mut session, "SELECT * FROM t");
    assert_eq!(rows(&result), &[["1", "hello"], ["2", "world"]]);
}

#[test]
fn index_driven_range_scan() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("db")).unwrap();
    let mut session = db.session();

    session
        .execute("CREATE TABLE t (a INT, b CHAR(8))")
        .unwrap();
    session.execute("INSERT INTO t VALUES (1, 'hello')").unwrap();
    session.execute("INSERT INTO t VALUES (2, 'world')").unwrap();
    session.execute("CREATE INDEX t (a)").unwrap();

    let result = one_result(&mut session, "SELECT * FROM t WHERE a >= 2");
    assert_eq!(rows(&result), &[["2", "world"]]);

    let result = one_result(&mut session, "SELECT b FROM t WHERE a = 1");
    assert_eq!(rows(&result), &[["hello"]]);
}

#[test]
fn unique_violation_leaves_table_intact() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("db")).unwrap();
    let mut session = db.session();

    session
        .execute("CREATE TABLE t (a INT, b CHAR(8))")
        .unwrap();
    session.execute("CREATE INDEX t (a)").unwrap();
    session.execute("INSERT INTO t VALUES (1, 'hello')").unwrap();
    session.execute("INSERT INTO t VALUES (2, 'world')").unwrap();

    let err = session
        .execute("INSERT INTO t VALUES (2, 'dupe')")
        .unwrap_err();
    assert!(
        matches!(err, quarry_bin::errors::QueryError::UniqueViolation(_)),
        "got {err:?}"
    );

    let result = one_result(&mut session, "SELECT COUNT(*) AS c FROM t");
    assert_eq!(rows(&result), &[["2"]]);
    // The rolled-back row must not be index-reachable either.
    let result = one_result(&mut session, "SELECT b FROM t WHERE a = 2");
    assert_eq!(rows(&result), &[["world"]]);
}

#[test]
fn transaction_rollback_restores_rows() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("db")).unwrap();
    let mut session = db.session();

    session
        .execute("CREATE TABLE t (a INT, b CHAR(8))")
        .unwrap();
    session.execute("INSERT INTO t VALUES (1, 'hello')").unwrap();

    session
        .execute("BEGIN; UPDATE t SET b='XXXXXXXX' WHERE a=1; ABORT;")
        .unwrap();

    let result = one_result(&mut session, "SELECT b FROM t WHERE a = 1");
    assert_eq!(rows(&result), &[["hello"]]);
}

#[test]
fn rollback_undoes_inserts_deletes_and_index_changes() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("db")).unwrap();
    let mut session = db.session();

    session
        .execute("CREATE TABLE t (a INT, b CHAR(8))")
        .unwrap();
    session.execute("CREATE INDEX t (a)").unwrap();
    session.execute("INSERT INTO t VALUES (1, 'one')").unwrap();
    session.execute("INSERT INTO t VALUES (2, 'two')").unwrap();

    session
        .execute(
            "BEGIN; \
             INSERT INTO t VALUES (3, 'three'); \
             DELETE FROM t WHERE a = 1; \
             UPDATE t SET a = 9 WHERE a = 2; \
             ROLLBACK;",
        )
        .unwrap();

    let result = one_result(&mut session, "SELECT a, b FROM t ORDER BY a");
    assert_eq!(rows(&result), &[["1", "one"], ["2", "two"]]);
    // Index probes agree with the heap after undo.
    let result = one_result(&mut session, "SELECT b FROM t WHERE a = 2");
    assert_eq!(rows(&result), &[["two"]]);
    let result = one_result(&mut session, "SELECT b FROM t WHERE a = 9");
    assert!(rows(&result).is_empty());
}

#[test]
fn aggregates_order_and_limit() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("db")).unwrap();
    let mut session = db.session();

    session
        .execute("CREATE TABLE t (a INT, b CHAR(8))")
        .unwrap();
    for (a, b) in [(1, "hello"), (2, "world"), (3, "three")] {
        session
            .execute(&format!("INSERT INTO t VALUES ({a}, '{b}')"))
            .unwrap();
    }

    let result = one_result(&mut session, "SELECT COUNT(*) AS c FROM t");
    assert_eq!(rows(&result), &[["3"]]);

    let result = one_result(&mut session, "SELECT a FROM t ORDER BY a DESC LIMIT 2");
    assert_eq!(rows(&result), &[["3"], ["2"]]);

    let result = one_result(
        &mut session,
        "SELECT MIN(a) AS lo, MAX(a) AS hi, SUM(a) AS s FROM t",
    );
    assert_eq!(rows(&result), &[["1", "3", "6"]]);
}

#[test]
fn joins_filter_across_both_sides() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("db")).unwrap();
    let mut session = db.session();

    session.execute("CREATE TABLE u (id INT, name CHAR(8))").unwrap();
    session
        .execute("CREATE TABLE o (uid INT, amount INT)")
        .unwrap();
    for stmt in [
        "INSERT INTO u VALUES (1, 'ann')",
        "INSERT INTO u VALUES (2, 'bob')",
        "INSERT INTO o VALUES (1, 10)",
        "INSERT INTO o VALUES (1, 20)",
        "INSERT INTO o VALUES (2, 30)",
    ] {
        session.execute(stmt).unwrap();
    }

    let result = one_result(
        &mut session,
        "SELECT name, amount FROM u, o WHERE u.id = o.uid AND amount > 15 ORDER BY amount",
    );
    assert_eq!(rows(&result), &[["ann", "20"], ["bob", "30"]]);
}

#[test]
fn typed_columns_round_trip_and_coerce() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("db")).unwrap();
    let mut session = db.session();

    session
        .execute("CREATE TABLE m (i INT, big BIGINT, f FLOAT, s CHAR(4), d DATETIME)")
        .unwrap();
    // INT literals widen into BIGINT; strings validate into DATETIME.
    session
        .execute("INSERT INTO m VALUES (7, 5000000000, 2.5, 'ab', '2024-01-02 03:04:05')")
        .unwrap();

    let result = one_result(&mut session, "SELECT * FROM m");
    assert_eq!(
        rows(&result),
        &[["7", "5000000000", "2.5", "ab", "2024-01-02 03:04:05"]]
    );

    let err = session
        .execute("INSERT INTO m VALUES (1, 1, 1.0, 'ab', 'not a datetime 0000')")
        .unwrap_err();
    assert!(matches!(
        err,
        quarry_bin::errors::QueryError::InvalidDatetime(_)
    ));

    let err = session
        .execute("INSERT INTO m VALUES (1, 1, 1.0, 'toolong', '2024-01-02 03:04:05')")
        .unwrap_err();
    assert!(matches!(
        err,
        quarry_bin::errors::QueryError::StringOverflow { .. }
    ));
}

#[test]
fn show_desc_and_drop_statements() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("db")).unwrap();
    db.set_output_path(dir.path().join("output.txt"));
    let mut session = db.session();

    session
        .execute("CREATE TABLE t (a INT, b CHAR(8))")
        .unwrap();
    session.execute("CREATE INDEX t (a)").unwrap();

    let result = one_result(&mut session, "SHOW TABLES");
    assert_eq!(rows(&result), &[["t"]]);

    let result = one_result(&mut session, "SHOW INDEX FROM t");
    assert_eq!(rows(&result), &[["t", "unique", "(a)"]]);

    let result = one_result(&mut session, "DESC t");
    assert_eq!(
        rows(&result),
        &[["a", "INT", "YES"], ["b", "CHAR(8)", "NO"]]
    );

    let output = std::fs::read_to_string(dir.path().join("output.txt")).unwrap();
    assert!(output.contains("| Tables |"));
    assert!(output.contains("| t | unique | (a) |"));

    session.execute("DROP INDEX t (a)").unwrap();
    let result = one_result(&mut session, "SHOW INDEX FROM t");
    assert!(rows(&result).is_empty());

    session.execute("DROP TABLE t").unwrap();
    let err = session.execute("SELECT * FROM t").unwrap_err();
    assert!(matches!(
        err,
        quarry_bin::errors::QueryError::TableNotFound(_)
    ));
}

#[test]
fn delete_with_predicate_and_full_delete() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("db")).unwrap();
    let mut session = db.session();

    session.execute("CREATE TABLE t (a INT)").unwrap();
    for v in 0..10 {
        session
            .execute(&format!("INSERT INTO t VALUES ({v})"))
            .unwrap();
    }

    assert_eq!(
        one_result(&mut session, "DELETE FROM t WHERE a >= 5"),
        ExecuteResult::Deleted(5)
    );
    let result = one_result(&mut session, "SELECT COUNT(*) AS c FROM t");
    assert_eq!(rows(&result), &[["5"]]);

    assert_eq!(
        one_result(&mut session, "DELETE FROM t"),
        ExecuteResult::Deleted(5)
    );
    let result = one_result(&mut session, "SELECT COUNT(*) AS c FROM t");
    assert_eq!(rows(&result), &[["0"]]);
}

#[test]
fn update_moves_index_entries() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("db")).unwrap();
    let mut session = db.session();

    session
        .execute("CREATE TABLE t (a INT, b CHAR(8))")
        .unwrap();
    session.execute("CREATE INDEX t (a)").unwrap();
    session.execute("INSERT INTO t VALUES (1, 'one')").unwrap();
    session.execute("INSERT INTO t VALUES (2, 'two')").unwrap();

    assert_eq!(
        one_result(&mut session, "UPDATE t SET a = 10 WHERE a = 1"),
        ExecuteResult::Updated(1)
    );
    let result = one_result(&mut session, "SELECT b FROM t WHERE a = 10");
    assert_eq!(rows(&result), &[["one"]]);
    let result = one_result(&mut session, "SELECT b FROM t WHERE a = 1");
    assert!(rows(&result).is_empty());

    // Updating onto an existing key is a unique violation.
    let err = session
        .execute("UPDATE t SET a = 2 WHERE a = 10")
        .unwrap_err();
    assert!(matches!(
        err,
        quarry_bin::errors::QueryError::UniqueViolation(_)
    ));
    let result = one_result(&mut session, "SELECT b FROM t WHERE a = 10");
    assert_eq!(rows(&result), &[["one"]]);
}
