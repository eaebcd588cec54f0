//! Error types for the dump/restore pipeline.

use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, DumpError>;

/// Errors that can occur while producing or importing a dump.
#[derive(Debug, Error)]
pub enum DumpError {
    /// Filesystem or pipe failure.
    #[error("I/O failure while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Compressor/decompressor subprocess failed to spawn, exited
    /// non-zero, or broke the pipe.
    #[error("{program}: {message}")]
    Process { program: String, message: String },

    /// Archive schema sequence does not match the importing system.
    #[error("schema mismatch: archive has sequence {found}, expected {expected}")]
    SchemaMismatch { expected: u32, found: u32 },

    /// Malformed container or payload.
    #[error("malformed archive: {0}")]
    Corrupt(String),

    /// Bulk load into one table failed (constraint violation or other
    /// engine rejection of a row).
    #[error("failed to load table {table}: {source}")]
    TableLoad {
        table: String,
        #[source]
        source: rusqlite::Error,
    },

    /// Any other database error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Dump registry insert kept failing past the retry budget.
    #[error("dump registry insert failed after {attempts} attempts: {last_error}")]
    Registry { attempts: u32, last_error: String },
}

impl DumpError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        DumpError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn process(program: &str, message: impl Into<String>) -> Self {
        DumpError::Process {
            program: program.to_string(),
            message: message.into(),
        }
    }

    /// Returns true if this error is the schema-version gate rejecting an
    /// incompatible archive.
    pub fn is_schema_mismatch(&self) -> bool {
        matches!(self, Self::SchemaMismatch { .. })
    }

    /// Returns true if the compressor/decompressor subprocess failed.
    pub fn is_process(&self) -> bool {
        matches!(self, Self::Process { .. })
    }
}
