//! Fixed dump sets and their exported column shapes.
//!
//! Set membership and column lists are frozen at the schema version that
//! produced them; an archive carries that version and the importer refuses
//! anything else.

use std::fmt;

/// Database schema version embedded in every archive.
pub const SCHEMA_VERSION: u32 = 5;

/// One exported column: the real column name plus an optional SQL
/// expression that replaces the value on export.
///
/// Redacted columns keep their position in the row so both dump sets share
/// a fixed row shape per table; import always targets the real name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub export_expr: Option<&'static str>,
}

impl ColumnSpec {
    pub const fn real(name: &'static str) -> Self {
        Self {
            name,
            export_expr: None,
        }
    }

    pub const fn redacted(name: &'static str, expr: &'static str) -> Self {
        Self {
            name,
            export_expr: Some(expr),
        }
    }

    /// Expression used in the export SELECT list.
    pub fn select_expr(&self) -> &'static str {
        self.export_expr.unwrap_or(self.name)
    }
}

/// One table of a dump set: name plus ordered column list.
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: &'static [ColumnSpec],
}

impl TableSpec {
    /// SELECT statement producing the exported row shape.
    pub fn select_sql(&self) -> String {
        let exprs: Vec<&str> = self.columns.iter().map(ColumnSpec::select_expr).collect();
        format!("SELECT {} FROM \"{}\"", exprs.join(", "), self.name)
    }

    /// Positional INSERT statement targeting the real column names.
    pub fn insert_sql(&self) -> String {
        let names: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("\"{}\"", c.name))
            .collect();
        let marks: Vec<&str> = self.columns.iter().map(|_| "?").collect();
        format!(
            "INSERT INTO \"{}\" ({}) VALUES ({})",
            self.name,
            names.join(", "),
            marks.join(", ")
        )
    }
}

use self::ColumnSpec as C;

/// Tables of the restricted dump set: account and auth data, dumped with
/// real values.
pub const RESTRICTED_TABLES: &[TableSpec] = &[
    TableSpec {
        name: "users",
        columns: &[
            C::real("id"),
            C::real("created"),
            C::real("handle"),
            C::real("auth_token"),
            C::real("last_login"),
            C::real("latest_import"),
        ],
    },
    TableSpec {
        name: "api_tokens",
        columns: &[
            C::real("id"),
            C::real("user_id"),
            C::real("token"),
            C::real("api_key"),
            C::real("issued_at"),
        ],
    },
    TableSpec {
        name: "api_sessions",
        columns: &[
            C::real("id"),
            C::real("user_id"),
            C::real("session_key"),
            C::real("api_key"),
            C::real("issued_at"),
        ],
    },
];

/// Tables of the aggregate dump set: derived statistics plus the user
/// roster with dummy values for the columns this set must not expose.
pub const AGGREGATE_TABLES: &[TableSpec] = &[
    TableSpec {
        name: "users",
        columns: &[
            C::real("id"),
            C::real("created"),
            C::real("handle"),
            C::redacted("auth_token", "'REDACTED'"),
            C::redacted("last_login", "datetime(0, 'unixepoch')"),
            C::redacted("latest_import", "datetime(0, 'unixepoch')"),
        ],
    },
    TableSpec {
        name: "stats_user",
        columns: &[
            C::real("user_id"),
            C::real("event_count"),
            C::real("source_count"),
            C::real("last_updated"),
        ],
    },
    TableSpec {
        name: "stats_daily",
        columns: &[
            C::real("day"),
            C::real("user_count"),
            C::real("event_count"),
            C::real("last_updated"),
        ],
    },
];

/// The two dump sets produced by a full dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpType {
    /// Account/auth data.
    Restricted,
    /// Derived statistics.
    Aggregate,
}

impl DumpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DumpType::Restricted => "restricted",
            DumpType::Aggregate => "aggregate",
        }
    }

    /// Table specs of this set, in archive iteration order.
    pub fn table_specs(&self) -> &'static [TableSpec] {
        match self {
            DumpType::Restricted => RESTRICTED_TABLES,
            DumpType::Aggregate => AGGREGATE_TABLES,
        }
    }
}

impl fmt::Display for DumpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
