//! Connection handling for the target store.
//!
//! The connection is opened once per invocation and passed explicitly down
//! the pipeline; transaction scope is owned by the writer, one per file.

use std::time::Duration;

use rusqlite::Connection;

use crate::{config::DatabaseConfig, error::LoadError};

pub fn open(config: &DatabaseConfig) -> Result<Connection, LoadError> {
    let conn = Connection::open(&config.path)?;
    // Bounds a write stalled on a locked database instead of blocking forever.
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection, LoadError> {
    Ok(Connection::open_in_memory()?)
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool, LoadError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Double-quotes an identifier, escaping embedded quotes. Identifiers come
/// from sanitized file names or config, but quoting keeps the DDL safe.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_exists_reflects_create_and_drop() {
        let conn = open_in_memory().expect("open");
        assert!(!table_exists(&conn, "t").unwrap());
        conn.execute("CREATE TABLE t (a INTEGER)", []).unwrap();
        assert!(table_exists(&conn, "t").unwrap());
        conn.execute("DROP TABLE t", []).unwrap();
        assert!(!table_exists(&conn, "t").unwrap());
    }

    #[test]
    fn quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
