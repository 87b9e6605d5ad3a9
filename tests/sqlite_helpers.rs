#![allow(dead_code)]

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use std::path::PathBuf;
use tempfile::TempDir;

pub fn db_path(home: &TempDir) -> PathBuf {
    home.path().join(".pitax").join("data.db")
}

pub fn open_conn(home: &TempDir) -> Result<Connection> {
    let path = db_path(home);
    Connection::open(path).context("failed to open test database")
}

pub fn count_orders(conn: &Connection, user_id: &str) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM orders WHERE user_id = ?1",
        [user_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Raw `(cost, proceeds, gain)` text of a stored report
pub fn report_row(
    conn: &Connection,
    table: &str,
    user_id: &str,
    tax_year: i32,
) -> Result<Option<(String, String, String)>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT cost, proceeds, gain FROM {} WHERE user_id = ?1 AND tax_year = ?2",
                table
            ),
            rusqlite::params![user_id, tax_year],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    Ok(row)
}

pub fn count_rows(conn: &Connection, table: &str) -> Result<i64> {
    let count = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
        row.get(0)
    })?;
    Ok(count)
}
