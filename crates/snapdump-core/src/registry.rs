//! Dump registry: immutable audit rows for completed dumps.
//!
//! One row per successful full dump, inserted after both dump sets exist.
//! Rows are append-only; nothing in this core updates or deletes them.

use crate::error::{DumpError, Result};
use rusqlite::Connection;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

const MAX_ATTEMPTS: u32 = 5;
const BASE_BACKOFF: Duration = Duration::from_millis(100);

/// Record a completed dump. Returns the id of the new registry row.
///
/// The insert is retried with doubling backoff up to a fixed attempt
/// budget; exhaustion is reported as [`DumpError::Registry`] rather than
/// retrying forever.
pub fn record_dump(conn: &Connection) -> Result<i64> {
    record_dump_with(conn, MAX_ATTEMPTS, BASE_BACKOFF)
}

/// [`record_dump`] with an explicit retry budget.
pub fn record_dump_with(
    conn: &Connection,
    max_attempts: u32,
    base_backoff: Duration,
) -> Result<i64> {
    let mut last_error = String::new();
    for attempt in 1..=max_attempts {
        match insert_record(conn) {
            Ok(id) => {
                info!(id, "dump recorded in registry");
                return Ok(id);
            }
            Err(e) => {
                warn!(attempt, max_attempts, error = %e, "dump registry insert failed");
                last_error = e.to_string();
                if attempt < max_attempts {
                    thread::sleep(base_backoff * 2u32.pow(attempt - 1));
                }
            }
        }
    }
    Err(DumpError::Registry {
        attempts: max_attempts,
        last_error,
    })
}

fn insert_record(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row(
        "INSERT INTO data_dump (created) VALUES (datetime('now')) RETURNING id",
        [],
        |row| row.get(0),
    )
}
