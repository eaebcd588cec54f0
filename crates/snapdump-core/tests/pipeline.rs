//! End-to-end pipeline tests: dump a seeded database through the identity
//! compressor, re-import, and check the pipeline guarantees (round trip,
//! snapshot isolation, schema gate, atomic import, cleanup on failure).

use rusqlite::types::ValueRef;
use rusqlite::Connection;
use snapdump_core::{
    create_dump, import_all, import_archive, locate_archives, Compressor, DumpError, DumpOptions,
    DumpType, SCHEMA_VERSION,
};
use std::fs;
use std::path::{Path, PathBuf};

fn schema(conn: &Connection) {
    conn.execute_batch(
        r#"
        CREATE TABLE users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            created TEXT NOT NULL,
            handle TEXT NOT NULL,
            auth_token TEXT,
            last_login TEXT,
            latest_import TEXT
        );
        CREATE TABLE api_tokens (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            token TEXT NOT NULL,
            api_key TEXT,
            issued_at TEXT
        );
        CREATE TABLE api_sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            session_key TEXT NOT NULL,
            api_key TEXT,
            issued_at TEXT
        );
        CREATE TABLE stats_user (
            user_id INTEGER PRIMARY KEY,
            event_count INTEGER NOT NULL,
            source_count INTEGER NOT NULL,
            last_updated TEXT
        );
        CREATE TABLE stats_daily (
            day TEXT PRIMARY KEY,
            user_count INTEGER NOT NULL,
            event_count INTEGER NOT NULL,
            last_updated TEXT
        );
        CREATE TABLE data_dump (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            created TEXT NOT NULL
        );
        "#,
    )
    .unwrap();
}

fn seed(conn: &Connection) {
    conn.execute_batch(
        "INSERT INTO users (created, handle, auth_token, last_login, latest_import) VALUES
            ('2025-11-02 09:00:00', 'alice', 'tok-alice', '2025-12-01 08:00:00', '2025-12-02 08:00:00'),
            ('2025-11-03 10:30:00', 'bob', 'tok-bob', NULL, NULL),
            ('2025-11-04 11:45:00', 'carol\twith tab', 'tok-carol', '2026-01-05 23:59:59', NULL);
         INSERT INTO api_tokens (user_id, token, api_key, issued_at) VALUES
            (1, 't-1', 'key-1', '2025-12-01 08:00:00'),
            (2, 't-2', NULL, '2025-12-02 09:00:00');
         INSERT INTO api_sessions (user_id, session_key, api_key, issued_at) VALUES
            (1, 's-1', 'key-1', '2025-12-01 08:05:00');
         INSERT INTO stats_user (user_id, event_count, source_count, last_updated) VALUES
            (1, 120, 4, '2026-01-01 00:00:00'),
            (2, 7, 1, '2026-01-01 00:00:00');
         INSERT INTO stats_daily (day, user_count, event_count, last_updated) VALUES
            ('2026-01-01', 2, 127, '2026-01-02 00:00:00');",
    )
    .unwrap();
}

fn identity_options() -> DumpOptions {
    DumpOptions {
        compressor: Compressor::identity(),
        threads: None,
    }
}

fn rows_of(conn: &Connection, sql: &str) -> Vec<Vec<Option<String>>> {
    let mut stmt = conn.prepare(sql).unwrap();
    let ncols = stmt.column_count();
    let mapped = stmt
        .query_map([], |row| {
            let mut fields = Vec::with_capacity(ncols);
            for i in 0..ncols {
                fields.push(match row.get_ref(i)? {
                    ValueRef::Null => None,
                    ValueRef::Integer(v) => Some(v.to_string()),
                    ValueRef::Real(v) => Some(v.to_string()),
                    ValueRef::Text(t) => Some(String::from_utf8_lossy(t).into_owned()),
                    ValueRef::Blob(_) => Some("<blob>".to_string()),
                });
            }
            Ok(fields)
        })
        .unwrap();
    mapped.collect::<Result<_, _>>().unwrap()
}

fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| row.get(0))
        .unwrap()
}

/// Write a hand-crafted plain-tar archive into `dir`.
fn craft_archive(dir: &Path, name: &str, entries: &[(&str, &[u8])]) -> PathBuf {
    let mut buf = Vec::new();
    {
        let mut tar = tar::Builder::new(&mut buf);
        for (path, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_path(path).unwrap();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            tar.append(&header, *data).unwrap();
        }
        tar.finish().unwrap();
    }
    let path = dir.join(name);
    fs::write(&path, &buf).unwrap();
    path
}

#[test]
fn restricted_round_trip_preserves_rows() {
    let mut source = Connection::open_in_memory().unwrap();
    schema(&source);
    seed(&source);
    let out = tempfile::tempdir().unwrap();

    let dump_path = create_dump(&mut source, out.path(), &identity_options()).unwrap();
    let found = locate_archives(&dump_path).unwrap();
    let restricted = found.restricted.expect("restricted archive present");

    let mut target = Connection::open_in_memory().unwrap();
    schema(&target);
    let summary = import_archive(
        &mut target,
        &restricted,
        DumpType::Restricted,
        &Compressor::identity(),
    )
    .unwrap();
    assert_eq!(summary.schema_sequence, SCHEMA_VERSION);
    assert_eq!(summary.tables.get("users"), Some(&3));
    assert_eq!(summary.tables.get("api_tokens"), Some(&2));
    assert_eq!(summary.tables.get("api_sessions"), Some(&1));

    for sql in [
        "SELECT id, created, handle, auth_token, last_login, latest_import FROM users ORDER BY id",
        "SELECT id, user_id, token, api_key, issued_at FROM api_tokens ORDER BY id",
        "SELECT id, user_id, session_key, api_key, issued_at FROM api_sessions ORDER BY id",
    ] {
        assert_eq!(rows_of(&source, sql), rows_of(&target, sql));
    }

    assert_eq!(count(&source, "data_dump"), 1, "dump registered exactly once");
}

#[test]
fn aggregate_dump_applies_placeholders() {
    let mut source = Connection::open_in_memory().unwrap();
    schema(&source);
    seed(&source);
    let out = tempfile::tempdir().unwrap();

    let dump_path = create_dump(&mut source, out.path(), &identity_options()).unwrap();
    let aggregate = locate_archives(&dump_path)
        .unwrap()
        .aggregate
        .expect("aggregate archive present");

    let mut target = Connection::open_in_memory().unwrap();
    schema(&target);
    import_archive(
        &mut target,
        &aggregate,
        DumpType::Aggregate,
        &Compressor::identity(),
    )
    .unwrap();

    let imported = rows_of(
        &target,
        "SELECT id, created, handle, auth_token, last_login, latest_import FROM users ORDER BY id",
    );
    let original = rows_of(&source, "SELECT id, created, handle FROM users ORDER BY id");
    assert_eq!(imported.len(), 3);
    for (got, want) in imported.iter().zip(&original) {
        assert_eq!(&got[..3], &want[..], "real columns survive unchanged");
        assert_eq!(got[3].as_deref(), Some("REDACTED"));
        assert_eq!(got[4].as_deref(), Some("1970-01-01 00:00:00"));
        assert_eq!(got[5].as_deref(), Some("1970-01-01 00:00:00"));
    }

    for sql in [
        "SELECT user_id, event_count, source_count, last_updated FROM stats_user ORDER BY user_id",
        "SELECT day, user_count, event_count, last_updated FROM stats_daily ORDER BY day",
    ] {
        assert_eq!(rows_of(&source, sql), rows_of(&target, sql));
    }
}

#[test]
fn dump_leaves_source_untouched() {
    let mut source = Connection::open_in_memory().unwrap();
    schema(&source);
    seed(&source);

    let tables = ["users", "api_tokens", "api_sessions", "stats_user", "stats_daily"];
    let counts_before: Vec<i64> = tables.iter().map(|t| count(&source, t)).collect();
    let seq_before: i64 = source
        .query_row("SELECT seq FROM sqlite_sequence WHERE name = 'users'", [], |r| r.get(0))
        .unwrap();

    let out = tempfile::tempdir().unwrap();
    create_dump(&mut source, out.path(), &identity_options()).unwrap();

    let counts_after: Vec<i64> = tables.iter().map(|t| count(&source, t)).collect();
    let seq_after: i64 = source
        .query_row("SELECT seq FROM sqlite_sequence WHERE name = 'users'", [], |r| r.get(0))
        .unwrap();
    assert_eq!(counts_before, counts_after);
    assert_eq!(seq_before, seq_after, "auto-increment counter untouched");
}

#[test]
fn schema_gate_rejects_incompatible_archive() {
    let dir = tempfile::tempdir().unwrap();
    let wrong = (SCHEMA_VERSION + 1).to_string();
    let archive = craft_archive(
        dir.path(),
        "restricted-dump-20260101-000000.tar",
        &[
            ("d/SCHEMA_SEQUENCE", wrong.as_bytes()),
            (
                "d/tables/users",
                b"1\t2025-01-01 00:00:00\tmallory\ttok\t\\N\t\\N\n",
            ),
        ],
    );

    let mut target = Connection::open_in_memory().unwrap();
    schema(&target);
    let err = import_archive(
        &mut target,
        &archive,
        DumpType::Restricted,
        &Compressor::identity(),
    )
    .unwrap_err();
    assert!(err.is_schema_mismatch(), "unexpected error: {err}");
    assert_eq!(count(&target, "users"), 0, "no rows written past the gate");
}

#[test]
fn import_rolls_back_on_corrupt_payload() {
    let dir = tempfile::tempdir().unwrap();
    let seq = SCHEMA_VERSION.to_string();
    let archive = craft_archive(
        dir.path(),
        "restricted-dump-20260101-000000.tar",
        &[
            ("d/SCHEMA_SEQUENCE", seq.as_bytes()),
            (
                "d/tables/users",
                b"1\t2025-01-01 00:00:00\talice\ttok\t\\N\t\\N\n\
                  2\t2025-01-02 00:00:00\tbob\ttok\t\\N\t\\N\n",
            ),
            ("d/tables/api_tokens", b"garbage line without any tabs\n"),
        ],
    );

    let mut target = Connection::open_in_memory().unwrap();
    schema(&target);
    let err = import_archive(
        &mut target,
        &archive,
        DumpType::Restricted,
        &Compressor::identity(),
    )
    .unwrap_err();
    assert!(!err.is_schema_mismatch());
    assert_eq!(count(&target, "users"), 0, "earlier table loads rolled back");
    assert_eq!(count(&target, "api_tokens"), 0);
}

#[test]
fn failed_compressor_leaves_no_partial_output() {
    let mut source = Connection::open_in_memory().unwrap();
    schema(&source);
    seed(&source);
    let out = tempfile::tempdir().unwrap();

    // Compressor that consumes nothing and exits non-zero.
    let broken = DumpOptions {
        compressor: Compressor {
            program: "false".to_string(),
            compress_args: Vec::new(),
            decompress_args: Vec::new(),
            suffix: "tar.xz".to_string(),
            threads_flag: None,
        },
        threads: None,
    };
    let err = create_dump(&mut source, out.path(), &broken).unwrap_err();
    assert!(err.is_process(), "unexpected error: {err}");
    assert_eq!(
        fs::read_dir(out.path()).unwrap().count(),
        0,
        "no orphaned files after a failed dump"
    );

    // Compressor that cannot even be spawned.
    let missing = DumpOptions {
        compressor: Compressor {
            program: "snapdump-no-such-compressor".to_string(),
            compress_args: Vec::new(),
            decompress_args: Vec::new(),
            suffix: "tar.xz".to_string(),
            threads_flag: None,
        },
        threads: None,
    };
    let err = create_dump(&mut source, out.path(), &missing).unwrap_err();
    assert!(err.is_process(), "unexpected error: {err}");
    assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
}

#[test]
fn import_all_reports_archives_independently() {
    let mut source = Connection::open_in_memory().unwrap();
    schema(&source);
    seed(&source);
    let out = tempfile::tempdir().unwrap();
    let dump_path = create_dump(&mut source, out.path(), &identity_options()).unwrap();
    let restricted = locate_archives(&dump_path).unwrap().restricted.unwrap();

    // A directory holding a good restricted archive and an aggregate
    // archive that fails the schema gate.
    let dir = tempfile::tempdir().unwrap();
    fs::copy(&restricted, dir.path().join(restricted.file_name().unwrap())).unwrap();
    let wrong = (SCHEMA_VERSION + 1).to_string();
    craft_archive(
        dir.path(),
        "aggregate-dump-20260101-000000.tar",
        &[("d/SCHEMA_SEQUENCE", wrong.as_bytes())],
    );

    let mut target = Connection::open_in_memory().unwrap();
    schema(&target);
    let report = import_all(&mut target, dir.path(), &Compressor::identity()).unwrap();

    let restricted_import = report.restricted.expect("restricted slot filled");
    assert!(restricted_import.result.is_ok());
    let aggregate_import = report.aggregate.expect("aggregate slot filled");
    assert!(aggregate_import.result.unwrap_err().is_schema_mismatch());

    assert_eq!(count(&target, "users"), 3, "sibling failure did not roll back this archive");
}

#[test]
fn registry_failure_keeps_finished_archives() {
    let mut source = Connection::open_in_memory().unwrap();
    schema(&source);
    seed(&source);
    source.execute_batch("DROP TABLE data_dump").unwrap();
    let out = tempfile::tempdir().unwrap();

    let err = create_dump(&mut source, out.path(), &identity_options()).unwrap_err();
    assert!(matches!(err, DumpError::Registry { .. }), "unexpected error: {err}");

    // Both archives are complete and stay on disk, just unrecorded.
    let dump_dirs: Vec<_> = fs::read_dir(out.path()).unwrap().collect();
    assert_eq!(dump_dirs.len(), 1);
    let dump_path = dump_dirs[0].as_ref().unwrap().path();
    let found = locate_archives(&dump_path).unwrap();
    assert!(found.restricted.is_some());
    assert!(found.aggregate.is_some());
}
