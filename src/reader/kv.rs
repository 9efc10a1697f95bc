//! Read-only access to the key/value tables editors keep in SQLite
//!
//! Cursor (and the VS Code family generally) stores UI state in `state.vscdb`
//! files holding `(key TEXT, value BLOB)` tables. Values are JSON but may be
//! stored as either TEXT or BLOB depending on the writer's version.

use anyhow::{Context, Result};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::Path;

/// Open an editor database in read-only mode
pub fn open_read_only(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("Failed to open {}", path.display()))?;
    conn.busy_timeout(std::time::Duration::from_millis(1000))?;
    Ok(conn)
}

fn value_to_string(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
        _ => None,
    }
}

/// True when `table` exists in the database
pub fn has_table(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        params![table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Value stored under `key`, decoded as UTF-8
pub fn get_value(conn: &Connection, table: &str, key: &str) -> Result<Option<String>> {
    let sql = format!("SELECT value FROM {} WHERE key = ?", table);
    let value = conn
        .query_row(&sql, params![key], |row| Ok(value_to_string(row.get_ref(0)?)))
        .optional()?;
    Ok(value.flatten())
}

/// Every key starting with `prefix`
pub fn keys_with_prefix(conn: &Connection, table: &str, prefix: &str) -> Result<Vec<String>> {
    // substr comparison instead of LIKE: keys may contain '_' and '%'
    let sql = format!(
        "SELECT key FROM {} WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
        table
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![prefix], |row| row.get::<_, String>(0))?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

/// Probe `candidates` in order and return the first key that holds a value
pub fn first_present(
    conn: &Connection,
    table: &str,
    candidates: &[&str],
) -> Result<Option<(String, String)>> {
    for key in candidates {
        if let Some(value) = get_value(conn, table, key)? {
            return Ok(Some((key.to_string(), value)));
        }
    }
    Ok(None)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Create a key/value table and fill it; values are written as BLOBs
    /// for odd positions to exercise both storage classes.
    pub fn write_kv(path: &Path, table: &str, entries: &[(&str, String)]) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (key TEXT UNIQUE ON CONFLICT REPLACE, value BLOB)",
            table
        ))
        .unwrap();
        for (i, (key, value)) in entries.iter().enumerate() {
            let sql = format!("INSERT INTO {} (key, value) VALUES (?, ?)", table);
            if i % 2 == 0 {
                conn.execute(&sql, params![key, value]).unwrap();
            } else {
                conn.execute(&sql, params![key, value.as_bytes()]).unwrap();
            }
        }
    }
}
