//! Archive importer: decompress, demultiplex, gate on schema, bulk-load.
//!
//! The all-or-nothing unit is one archive: every table payload loads inside
//! a single transaction committed only after the whole container has been
//! consumed. The schema-sequence gate runs before any write; the restricted
//! and aggregate archives are fully independent of each other.

use crate::archive::{COPYING_ENTRY, SCHEMA_SEQUENCE_ENTRY, TIMESTAMP_ENTRY};
use crate::compress::{wait_child, Compressor};
use crate::error::{DumpError, Result};
use crate::rows;
use crate::tables::{DumpType, TableSpec, SCHEMA_VERSION};
use rusqlite::{Connection, Transaction};
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::ChildStdout;
use tracing::{debug, error, info};

/// Candidate archive files found in an import directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveCandidates {
    pub restricted: Option<PathBuf>,
    pub aggregate: Option<PathBuf>,
}

/// What one archive import loaded.
#[derive(Debug, Clone, Default)]
pub struct ImportSummary {
    /// Schema sequence the archive carried (always the expected one).
    pub schema_sequence: u32,
    /// Rows loaded per table.
    pub tables: BTreeMap<String, u64>,
}

/// Per-archive result of [`import_all`].
#[derive(Debug)]
pub struct ArchiveImport {
    pub archive: PathBuf,
    pub result: Result<ImportSummary>,
}

/// Results of importing a dump directory, one slot per archive type.
#[derive(Debug, Default)]
pub struct ImportReport {
    pub restricted: Option<ArchiveImport>,
    pub aggregate: Option<ArchiveImport>,
}

/// Select candidate archives from `dir` by the naming convention; when
/// several of one type are present the newest timestamp wins. Unrelated
/// files are ignored.
pub fn locate_archives(dir: &Path) -> Result<ArchiveCandidates> {
    let mut restricted: Vec<PathBuf> = Vec::new();
    let mut aggregate: Vec<PathBuf> = Vec::new();
    let entries =
        fs::read_dir(dir).map_err(|e| DumpError::io(format!("reading {}", dir.display()), e))?;
    for entry in entries {
        let entry = entry.map_err(|e| DumpError::io(format!("reading {}", dir.display()), e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(OsStr::to_str) else {
            continue;
        };
        if name.starts_with("restricted-dump-") {
            restricted.push(path);
        } else if name.starts_with("aggregate-dump-") {
            aggregate.push(path);
        }
    }
    restricted.sort();
    aggregate.sort();
    Ok(ArchiveCandidates {
        restricted: restricted.pop(),
        aggregate: aggregate.pop(),
    })
}

/// Import one archive into the database.
///
/// State machine: Located → ValidatingSchema → LoadingTables → Committed,
/// with Aborted on a schema mismatch or any load failure. An abort rolls
/// the transaction back; no partial table update ever persists.
pub fn import_archive(
    conn: &mut Connection,
    archive: &Path,
    dump_type: DumpType,
    compressor: &Compressor,
) -> Result<ImportSummary> {
    info!(archive = %archive.display(), %dump_type, "importing archive");
    let mut child = compressor.spawn_decompress(archive)?;
    let stdout = match child.stdout.take() {
        Some(stdout) => stdout,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(DumpError::process(&compressor.program, "no stdout pipe"));
        }
    };

    let tx = conn.transaction()?;
    match load_entries(&tx, stdout, dump_type) {
        Ok(summary) => {
            // Require a clean decompressor exit before making anything
            // durable; trailing stream corruption aborts like any other
            // failure.
            wait_child(&compressor.program, child)?;
            tx.commit()?;
            info!(archive = %archive.display(), tables = summary.tables.len(), "archive imported");
            Ok(summary)
        }
        Err(e) => {
            drop(tx);
            let e = match child.try_wait() {
                Ok(Some(status)) if !status.success() => DumpError::process(
                    &compressor.program,
                    format!("exited with {status}: {e}"),
                ),
                _ => {
                    let _ = child.kill();
                    let _ = child.wait();
                    e
                }
            };
            error!(archive = %archive.display(), error = %e, "import failed, rolled back");
            Err(e)
        }
    }
}

/// Locate and import both archive types found in `dir`, reporting
/// success/failure independently per archive. One archive's failure never
/// rolls back or aborts the other.
pub fn import_all(conn: &mut Connection, dir: &Path, compressor: &Compressor) -> Result<ImportReport> {
    let candidates = locate_archives(dir)?;
    let mut report = ImportReport::default();

    if let Some(path) = candidates.restricted {
        let result = import_archive(conn, &path, DumpType::Restricted, compressor);
        report.restricted = Some(ArchiveImport {
            archive: path,
            result,
        });
    }
    if let Some(path) = candidates.aggregate {
        let result = import_archive(conn, &path, DumpType::Aggregate, compressor);
        report.aggregate = Some(ArchiveImport {
            archive: path,
            result,
        });
    }
    Ok(report)
}

fn load_entries(
    tx: &Transaction<'_>,
    stdout: ChildStdout,
    dump_type: DumpType,
) -> Result<ImportSummary> {
    let mut container = tar::Archive::new(stdout);
    let mut summary = ImportSummary::default();
    let mut schema_checked = false;

    let entries = container
        .entries()
        .map_err(|e| DumpError::io("reading container stream", e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| DumpError::io("reading container stream", e))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = {
            let path = entry
                .path()
                .map_err(|e| DumpError::Corrupt(format!("unreadable entry name: {e}")))?;
            match path.file_name().and_then(OsStr::to_str) {
                Some(name) => name.to_string(),
                None => return Err(DumpError::Corrupt("entry without a name".to_string())),
            }
        };

        if !schema_checked {
            // The schema gate must pass before any table bytes are even
            // looked at.
            if name != SCHEMA_SEQUENCE_ENTRY {
                return Err(DumpError::Corrupt(format!(
                    "first entry is {name}, expected {SCHEMA_SEQUENCE_ENTRY}"
                )));
            }
            summary.schema_sequence = check_schema_sequence(&mut entry)?;
            schema_checked = true;
            debug!(sequence = summary.schema_sequence, "schema sequence verified");
            continue;
        }

        if name == TIMESTAMP_ENTRY || name == COPYING_ENTRY {
            continue;
        }
        let Some(spec) = dump_type.table_specs().iter().find(|s| s.name == name) else {
            debug!(entry = %name, "skipping unknown entry");
            continue;
        };
        info!(table = spec.name, "loading table");
        let loaded = load_table(tx, spec, &mut entry)?;
        summary.tables.insert(spec.name.to_string(), loaded);
    }

    if !schema_checked {
        return Err(DumpError::Corrupt(format!(
            "archive has no {SCHEMA_SEQUENCE_ENTRY} entry"
        )));
    }
    Ok(summary)
}

fn check_schema_sequence(entry: &mut impl Read) -> Result<u32> {
    let mut text = String::new();
    entry
        .read_to_string(&mut text)
        .map_err(|e| DumpError::io("reading schema sequence", e))?;
    let found: u32 = text
        .trim()
        .parse()
        .map_err(|_| DumpError::Corrupt(format!("invalid schema sequence {text:?}")))?;
    if found != SCHEMA_VERSION {
        return Err(DumpError::SchemaMismatch {
            expected: SCHEMA_VERSION,
            found,
        });
    }
    Ok(found)
}

fn load_table(tx: &Transaction<'_>, spec: &TableSpec, payload: &mut impl Read) -> Result<u64> {
    let mut stmt = tx
        .prepare(&spec.insert_sql())
        .map_err(|e| DumpError::TableLoad {
            table: spec.name.to_string(),
            source: e,
        })?;
    let reader = BufReader::new(payload);
    let mut count = 0u64;
    for (index, line) in reader.lines().enumerate() {
        let line = line
            .map_err(|e| DumpError::io(format!("reading payload of table {}", spec.name), e))?;
        if line.is_empty() {
            continue;
        }
        let fields = rows::parse_row(&line).map_err(|reason| {
            DumpError::Corrupt(format!("table {} row {}: {reason}", spec.name, index + 1))
        })?;
        if fields.len() != spec.columns.len() {
            return Err(DumpError::Corrupt(format!(
                "table {} row {}: expected {} columns, got {}",
                spec.name,
                index + 1,
                spec.columns.len(),
                fields.len()
            )));
        }
        stmt.execute(rusqlite::params_from_iter(fields.iter()))
            .map_err(|e| DumpError::TableLoad {
                table: spec.name.to_string(),
                source: e,
            })?;
        count += 1;
    }
    Ok(count)
}
