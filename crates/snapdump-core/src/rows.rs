//! Bulk-row text codec.
//!
//! Table payloads travel as newline-delimited records with tab-separated
//! fields: `\N` marks NULL, and backslash escapes cover the delimiter
//! characters so a raw tab or newline never appears inside a field.

use rusqlite::types::ValueRef;
use std::borrow::Cow;
use std::io::{self, Write};

const NULL_FIELD: &str = "\\N";

/// Encode one row into `sink`.
pub(crate) fn write_row(sink: &mut dyn Write, fields: &[Option<String>]) -> io::Result<()> {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            sink.write_all(b"\t")?;
        }
        match field {
            None => sink.write_all(NULL_FIELD.as_bytes())?,
            Some(value) => sink.write_all(escape_field(value).as_bytes())?,
        }
    }
    sink.write_all(b"\n")
}

/// Decode one payload line into fields. The line must not include the
/// trailing newline.
pub(crate) fn parse_row(line: &str) -> Result<Vec<Option<String>>, String> {
    line.split('\t').map(parse_field).collect()
}

/// Render one SQLite value as a payload field.
pub(crate) fn value_to_field(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) => Some(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Some(format!("\\x{}", hex::encode(b))),
    }
}

fn escape_field(raw: &str) -> Cow<'_, str> {
    if !raw
        .bytes()
        .any(|b| matches!(b, b'\\' | b'\t' | b'\n' | b'\r'))
    {
        return Cow::Borrowed(raw);
    }
    let mut out = String::with_capacity(raw.len() + 8);
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    Cow::Owned(out)
}

fn parse_field(field: &str) -> Result<Option<String>, String> {
    if field == NULL_FIELD {
        return Ok(None);
    }
    if !field.contains('\\') {
        return Ok(Some(field.to_string()));
    }
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => return Err(format!("unknown escape \\{other}")),
            None => return Err("trailing backslash".to_string()),
        }
    }
    Ok(Some(out))
}
