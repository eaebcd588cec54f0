//! Dump orchestration: produce both dump sets and register the result.

use crate::archive::build_archive;
use crate::compress::Compressor;
use crate::error::{DumpError, Result};
use crate::registry::record_dump;
use crate::tables::DumpType;
use chrono::Utc;
use rusqlite::Connection;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Tuning options for [`create_dump`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DumpOptions {
    /// External compressor the archives are piped through.
    #[serde(default)]
    pub compressor: Compressor,
    /// Thread count handed to the compressor, when it takes one.
    #[serde(default)]
    pub threads: Option<u32>,
}

/// Produce a full dump (both dump sets) under `location` and register it.
///
/// Returns the created `dump-<timestamp>` directory. Each set is exported
/// under its own snapshot transaction; a failure while producing either
/// archive removes the whole dump directory before the error is returned.
/// A registry failure after both archives exist keeps them on disk (they
/// are complete, just unrecorded) and is still reported as an error.
pub fn create_dump(conn: &mut Connection, location: &Path, options: &DumpOptions) -> Result<PathBuf> {
    let now = Utc::now().naive_utc();
    let dump_path = location.join(format!("dump-{}", now.format("%Y%m%d-%H%M%S")));
    fs::create_dir_all(&dump_path)
        .map_err(|e| DumpError::io(format!("creating {}", dump_path.display()), e))?;
    info!(path = %dump_path.display(), "beginning database dump");

    for dump_type in [DumpType::Restricted, DumpType::Aggregate] {
        match build_archive(
            conn,
            dump_type,
            &now,
            &dump_path,
            &options.compressor,
            options.threads,
        ) {
            Ok(archive) => {
                info!(archive = %archive.display(), %dump_type, "dump set created");
            }
            Err(e) => {
                error!(%dump_type, error = %e, "dump set failed, removing created files");
                let _ = fs::remove_dir_all(&dump_path);
                return Err(e);
            }
        }
    }

    let id = record_dump(conn)?;
    info!(id, path = %dump_path.display(), "database dump finished");
    Ok(dump_path)
}
