//! snapdump-core: consistent snapshot dump/restore pipeline.
//!
//! Exports the fixed dump sets of the service database into versioned,
//! compressed, portable archives and re-imports them into a
//! schema-compatible database. All tables of one set are read from a single
//! read-only transaction snapshot; import is all-or-nothing per archive and
//! gated on the embedded schema sequence.
//!
//! The orchestration layer drives this crate through [`create_dump`] and
//! [`import_all`]; the finer-grained pieces (snapshot, archive builder,
//! importer, registry) are public for callers that need them separately.

pub mod archive;
pub mod compress;
pub mod dump;
pub mod error;
pub mod import;
pub mod registry;
mod rows;
pub mod snapshot;
pub mod tables;

pub use compress::Compressor;
pub use dump::{create_dump, DumpOptions};
pub use error::{DumpError, Result};
pub use import::{
    import_all, import_archive, locate_archives, ArchiveCandidates, ArchiveImport, ImportReport,
    ImportSummary,
};
pub use registry::record_dump;
pub use snapshot::Snapshot;
pub use tables::{DumpType, TableSpec, SCHEMA_VERSION};
