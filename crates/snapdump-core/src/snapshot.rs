//! Snapshot transaction manager and table streamer.

use crate::error::{DumpError, Result};
use crate::rows;
use crate::tables::TableSpec;
use rusqlite::{Connection, Transaction};
use std::io::Write;
use tracing::debug;

/// One read-only snapshot of the database.
///
/// Every table of a dump set is exported from the same snapshot, so the set
/// is mutually consistent. The transaction is never committed: [`finish`]
/// rolls it back, and dropping the snapshot without calling it rolls back
/// too, so the export is observably read-only on every path.
///
/// [`finish`]: Snapshot::finish
pub struct Snapshot<'conn> {
    tx: Transaction<'conn>,
}

impl<'conn> Snapshot<'conn> {
    /// Open the snapshot transaction. The connection is owned by the
    /// snapshot until [`finish`](Snapshot::finish).
    pub fn begin(conn: &'conn mut Connection) -> Result<Self> {
        let tx = conn.transaction()?;
        Ok(Self { tx })
    }

    /// Stream one table through the bulk-row codec into `sink`, columns
    /// selected and redacted per its [`TableSpec`]. Rows are pulled from
    /// the statement one at a time; the table is never buffered whole.
    ///
    /// Returns the number of rows written.
    pub fn export_table(&self, spec: &TableSpec, sink: &mut dyn Write) -> Result<u64> {
        debug!(table = spec.name, "exporting table");
        let mut stmt = self.tx.prepare(&spec.select_sql())?;
        let ncols = spec.columns.len();
        let mut fields: Vec<Option<String>> = Vec::with_capacity(ncols);
        let mut result_rows = stmt.query([])?;
        let mut count = 0u64;
        while let Some(row) = result_rows.next()? {
            fields.clear();
            for i in 0..ncols {
                fields.push(rows::value_to_field(row.get_ref(i)?));
            }
            rows::write_row(sink, &fields)
                .map_err(|e| DumpError::io(format!("writing rows of table {}", spec.name), e))?;
            count += 1;
        }
        Ok(count)
    }

    /// Close the snapshot. Always a rollback.
    pub fn finish(self) -> Result<()> {
        self.tx.rollback()?;
        Ok(())
    }
}
