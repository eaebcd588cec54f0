//! Archive builder: one dump set, one container stream, one compressor.
//!
//! Container layout (inside the compressed stream):
//!
//! ```text
//! <dump_type>-dump-<timestamp>/
//!   SCHEMA_SEQUENCE
//!   TIMESTAMP
//!   COPYING
//!   tables/
//!     <table-name>
//! ```
//!
//! Metadata entries come first, then every table of the set in declared
//! order, all read from a single snapshot transaction. The tar stream is
//! written into the compressor subprocess's stdin as it is produced; the
//! subprocess's stdout is the archive file.

use crate::compress::{wait_child, Compressor};
use crate::error::{DumpError, Result};
use crate::snapshot::Snapshot;
use crate::tables::{DumpType, SCHEMA_VERSION};
use chrono::NaiveDateTime;
use rusqlite::Connection;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::ChildStdin;
use tar::{Builder, Header, HeaderMode};
use tracing::{error, info};

/// License text embedded in every archive, copied byte-for-byte.
pub const LICENSE_TEXT: &str = include_str!("../data/COPYING");

/// Archive subdirectory holding the table payloads.
pub const TABLES_DIR: &str = "tables";

/// Reserved metadata entry names.
pub const SCHEMA_SEQUENCE_ENTRY: &str = "SCHEMA_SEQUENCE";
pub const TIMESTAMP_ENTRY: &str = "TIMESTAMP";
pub const COPYING_ENTRY: &str = "COPYING";

/// Root directory label of one dump-set archive.
pub(crate) fn archive_root(dump_type: DumpType, timestamp: &NaiveDateTime) -> String {
    format!("{}-dump-{}", dump_type, timestamp.format("%Y%m%d-%H%M%S"))
}

/// Build one dump-set archive under `out_dir` and return its path.
///
/// On any failure the compressor is reaped and the partial archive file is
/// removed before the error is returned; a half-written archive is never
/// left on disk.
pub fn build_archive(
    conn: &mut Connection,
    dump_type: DumpType,
    timestamp: &NaiveDateTime,
    out_dir: &Path,
    compressor: &Compressor,
    threads: Option<u32>,
) -> Result<PathBuf> {
    let root = archive_root(dump_type, timestamp);
    let archive_path = out_dir.join(format!("{root}.{}", compressor.suffix));
    info!(archive = %archive_path.display(), %dump_type, "building archive");

    let archive_file = File::create(&archive_path).map_err(|e| {
        DumpError::io(format!("creating archive file {}", archive_path.display()), e)
    })?;
    let mut child = match compressor.spawn_compress(archive_file, threads) {
        Ok(child) => child,
        Err(e) => {
            let _ = fs::remove_file(&archive_path);
            return Err(e);
        }
    };
    let stdin = match child.stdin.take() {
        Some(stdin) => stdin,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            let _ = fs::remove_file(&archive_path);
            return Err(DumpError::process(&compressor.program, "no stdin pipe"));
        }
    };

    match write_container(conn, dump_type, &root, timestamp, stdin) {
        Ok(row_total) => match wait_child(&compressor.program, child) {
            Ok(()) => {
                info!(archive = %archive_path.display(), rows = row_total, "archive finished");
                Ok(archive_path)
            }
            Err(e) => {
                let _ = fs::remove_file(&archive_path);
                Err(e)
            }
        },
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            let _ = fs::remove_file(&archive_path);
            // A compressor that died mid-stream surfaces here as EPIPE.
            let e = match e {
                DumpError::Io { ref source, .. } if source.kind() == ErrorKind::BrokenPipe => {
                    DumpError::process(&compressor.program, "broken pipe while writing container")
                }
                other => other,
            };
            error!(archive = %archive_path.display(), error = %e, "archive build failed, partial output removed");
            Err(e)
        }
    }
}

/// Write the whole container into the compressor pipe. Returns the total
/// row count across tables. The sink is dropped before returning, which
/// closes the pipe and lets the compressor finish the archive file.
fn write_container(
    conn: &mut Connection,
    dump_type: DumpType,
    root: &str,
    timestamp: &NaiveDateTime,
    sink: ChildStdin,
) -> Result<u64> {
    let mut tar = Builder::new(sink);
    tar.mode(HeaderMode::Deterministic);

    append_entry(
        &mut tar,
        &format!("{root}/{SCHEMA_SEQUENCE_ENTRY}"),
        SCHEMA_VERSION.to_string().as_bytes(),
    )?;
    append_entry(
        &mut tar,
        &format!("{root}/{TIMESTAMP_ENTRY}"),
        timestamp.format("%Y-%m-%d %H:%M:%S").to_string().as_bytes(),
    )?;
    append_entry(&mut tar, &format!("{root}/{COPYING_ENTRY}"), LICENSE_TEXT.as_bytes())?;

    // Table payloads are spooled to disk so arbitrarily large tables never
    // sit in memory; tar headers need the payload size up front.
    let spool = tempfile::tempdir().map_err(|e| DumpError::io("creating spool directory", e))?;

    let snapshot = Snapshot::begin(conn)?;
    let mut row_total = 0u64;
    for spec in dump_type.table_specs() {
        let payload_path = spool.path().join(spec.name);
        let payload = File::create(&payload_path)
            .map_err(|e| DumpError::io(format!("spooling table {}", spec.name), e))?;
        let mut writer = BufWriter::new(payload);
        row_total += snapshot.export_table(spec, &mut writer)?;
        writer
            .flush()
            .map_err(|e| DumpError::io(format!("spooling table {}", spec.name), e))?;
        drop(writer);

        tar.append_path_with_name(&payload_path, format!("{root}/{TABLES_DIR}/{}", spec.name))
            .map_err(|e| DumpError::io(format!("appending table {}", spec.name), e))?;
    }
    snapshot.finish()?;

    let sink = tar
        .into_inner()
        .map_err(|e| DumpError::io("finalizing container", e))?;
    drop(sink);
    Ok(row_total)
}

fn append_entry(tar: &mut Builder<ChildStdin>, path: &str, data: &[u8]) -> Result<()> {
    let mut header = Header::new_gnu();
    header
        .set_path(path)
        .map_err(|e| DumpError::io(format!("naming entry {path}"), e))?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header.set_cksum();
    tar.append(&header, data)
        .map_err(|e| DumpError::io(format!("appending entry {path}"), e))
}
