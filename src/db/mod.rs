// Database module - storage traits, SQLite connection and models

pub mod memory;
pub mod models;
pub mod rates;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

use crate::error::TaxError;

pub use memory::MemoryStore;
pub use models::{
    NewOrder, OrderInput, OrderSide, OrderSnapshot, ReportKind, ReportTotals, StoredOrder,
    TaxReport,
};
pub use rates::SqliteRateCache;

/// Source of every known order for a user, in any status and any year.
/// Filtering is the caller's job.
pub trait OrdersProvider {
    fn orders_for_user(&self, user_id: &str) -> Result<Vec<OrderSnapshot>>;
}

/// Deduplicating order persistence keyed by `(user_id, external_id)`
pub trait OrderStore: OrdersProvider {
    fn contains(&self, user_id: &str, external_id: &str) -> Result<bool>;

    /// Insert unless the key already exists; returns whether a row was written.
    fn insert(&self, user_id: &str, order: &NewOrder) -> Result<bool>;

    /// Stored orders, newest first
    fn list(&self, user_id: &str) -> Result<Vec<StoredOrder>>;
}

/// Capital-gains and PIT report persistence, unique per `(user_id, tax_year)` and kind
pub trait ReportStore {
    fn find(&self, kind: ReportKind, user_id: &str, tax_year: i32) -> Result<Option<TaxReport>>;

    /// Atomically create or overwrite the row for `(user_id, tax_year)`.
    fn upsert(
        &self,
        kind: ReportKind,
        user_id: &str,
        tax_year: i32,
        totals: &ReportTotals,
    ) -> Result<TaxReport>;

    /// All reports of a kind for a user, ascending by tax year
    fn list(&self, kind: ReportKind, user_id: &str) -> Result<Vec<TaxReport>>;
}

/// Get the default database path (~/.pitax/data.db)
pub fn get_default_db_path() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let pitax_dir = PathBuf::from(home).join(".pitax");

    std::fs::create_dir_all(&pitax_dir).context("Failed to create .pitax directory")?;

    Ok(pitax_dir.join("data.db"))
}

/// Open database connection
pub fn open_db(db_path: Option<PathBuf>) -> Result<Connection> {
    let path = match db_path {
        Some(p) => p,
        None => get_default_db_path()?,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {:?}", parent))?;
        }
    }
    let conn =
        Connection::open(&path).with_context(|| format!("Failed to open database at {:?}", path))?;

    // Concurrent workers may hold their own connection to the same file
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .context("Failed to set busy timeout")?;

    Ok(conn)
}

/// Apply the schema to an open connection (idempotent)
pub fn apply_schema(conn: &Connection) -> Result<()> {
    let schema_sql = include_str!("schema.sql");
    conn.execute_batch(schema_sql)
        .map_err(|e| TaxError::Database(format!("failed to apply schema: {}", e)))?;
    Ok(())
}

/// SQLite-backed order and report store
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Wrap a connection, making sure the schema exists
    pub fn new(conn: Connection) -> Result<Self> {
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open(path: &Path) -> Result<Self> {
        Self::new(open_db(Some(path.to_path_buf()))?)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::new(conn)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn count_orders(&self, user_id: &str) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM orders WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

const ORDER_COLUMNS: &str = "id, user_id, external_id, product_id, side, status, occurred_at,
     quantity, price, fee, total, created_at";

fn order_from_row(row: &rusqlite::Row) -> Result<StoredOrder, rusqlite::Error> {
    Ok(StoredOrder {
        id: Some(row.get(0)?),
        user_id: row.get(1)?,
        external_id: row.get(2)?,
        product_id: row.get(3)?,
        side: row.get(4)?,
        status: row.get(5)?,
        occurred_at: row.get(6)?,
        quantity: get_optional_decimal_value(row, 7)?,
        price: get_optional_decimal_value(row, 8)?,
        fee: get_optional_decimal_value(row, 9)?,
        total: get_optional_decimal_value(row, 10)?,
        created_at: row.get(11)?,
    })
}

const REPORT_COLUMNS: &str = "id, user_id, tax_year, cost, proceeds, gain, created_at, updated_at";

fn report_from_row(kind: ReportKind, row: &rusqlite::Row) -> Result<TaxReport, rusqlite::Error> {
    Ok(TaxReport {
        id: Some(row.get(0)?),
        kind,
        user_id: row.get(1)?,
        tax_year: row.get(2)?,
        cost: get_decimal_value(row, 3)?,
        proceeds: get_decimal_value(row, 4)?,
        gain: get_decimal_value(row, 5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

impl OrdersProvider for SqliteStore {
    fn orders_for_user(&self, user_id: &str) -> Result<Vec<OrderSnapshot>> {
        Ok(OrderStore::list(self, user_id)?
            .iter()
            .map(StoredOrder::snapshot)
            .collect())
    }
}

impl OrderStore for SqliteStore {
    fn contains(&self, user_id: &str, external_id: &str) -> Result<bool> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM orders WHERE user_id = ?1 AND external_id = ?2",
                params![user_id, external_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(existing.is_some())
    }

    fn insert(&self, user_id: &str, order: &NewOrder) -> Result<bool> {
        // The UNIQUE constraint makes a racing duplicate a no-op instead of a second row
        let changed = self
            .conn
            .execute(
                "INSERT INTO orders (
                    user_id, external_id, product_id, side, status, occurred_at,
                    quantity, price, fee, total, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT (user_id, external_id) DO NOTHING",
                params![
                    user_id,
                    order.external_id,
                    order.product_id,
                    order.side,
                    order.status,
                    order.occurred_at,
                    order.quantity.map(|d| d.to_string()),
                    order.price.map(|d| d.to_string()),
                    order.fee.map(|d| d.to_string()),
                    order.total.map(|d| d.to_string()),
                    Utc::now(),
                ],
            )
            .with_context(|| format!("Failed to insert order {}", order.external_id))?;

        Ok(changed > 0)
    }

    fn list(&self, user_id: &str) -> Result<Vec<StoredOrder>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM orders WHERE user_id = ?1 ORDER BY occurred_at DESC, id DESC",
            ORDER_COLUMNS
        ))?;

        let orders = stmt
            .query_map([user_id], order_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(orders)
    }
}

impl ReportStore for SqliteStore {
    fn find(&self, kind: ReportKind, user_id: &str, tax_year: i32) -> Result<Option<TaxReport>> {
        let report = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE user_id = ?1 AND tax_year = ?2",
                    REPORT_COLUMNS,
                    kind.table()
                ),
                params![user_id, tax_year],
                |row| report_from_row(kind, row),
            )
            .optional()?;
        Ok(report)
    }

    fn upsert(
        &self,
        kind: ReportKind,
        user_id: &str,
        tax_year: i32,
        totals: &ReportTotals,
    ) -> Result<TaxReport> {
        let now = Utc::now();
        let report = self
            .conn
            .query_row(
                &format!(
                    "INSERT INTO {} (user_id, tax_year, cost, proceeds, gain, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                     ON CONFLICT (user_id, tax_year) DO UPDATE SET
                        cost = excluded.cost,
                        proceeds = excluded.proceeds,
                        gain = excluded.gain,
                        updated_at = excluded.updated_at
                     RETURNING {}",
                    kind.table(),
                    REPORT_COLUMNS
                ),
                params![
                    user_id,
                    tax_year,
                    totals.cost_or_zero().to_string(),
                    totals.proceeds_or_zero().to_string(),
                    totals.gain_or_zero().to_string(),
                    now,
                ],
                |row| report_from_row(kind, row),
            )
            .with_context(|| {
                format!(
                    "Failed to upsert {} report for {} / {}",
                    kind.as_str(),
                    user_id,
                    tax_year
                )
            })?;

        debug!(
            "Upserted {} report {:?} for {} / {}",
            kind.as_str(),
            report.id,
            user_id,
            tax_year
        );
        Ok(report)
    }

    fn list(&self, kind: ReportKind, user_id: &str) -> Result<Vec<TaxReport>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM {} WHERE user_id = ?1 ORDER BY tax_year ASC",
            REPORT_COLUMNS,
            kind.table()
        ))?;

        let reports = stmt
            .query_map([user_id], |row| report_from_row(kind, row))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(reports)
    }
}

/// Helper to read Decimal from SQLite (handles both INTEGER, REAL and TEXT)
pub fn get_decimal_value(row: &rusqlite::Row, idx: usize) -> Result<Decimal, rusqlite::Error> {
    use rusqlite::types::ValueRef;

    match row.get_ref(idx)? {
        ValueRef::Text(bytes) => {
            let s = std::str::from_utf8(bytes)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
            Decimal::from_str(s).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
        }
        ValueRef::Integer(i) => Ok(Decimal::from(i)),
        ValueRef::Real(f) => {
            Decimal::try_from(f).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
        }
        _ => Err(rusqlite::Error::InvalidColumnType(
            idx,
            "decimal".to_string(),
            rusqlite::types::Type::Null,
        )),
    }
}

/// Helper to read optional Decimal from SQLite
fn get_optional_decimal_value(
    row: &rusqlite::Row,
    idx: usize,
) -> Result<Option<Decimal>, rusqlite::Error> {
    use rusqlite::types::ValueRef;

    match row.get_ref(idx)? {
        ValueRef::Null => Ok(None),
        _ => get_decimal_value(row, idx).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn order(external_id: &str) -> NewOrder {
        NewOrder {
            external_id: external_id.to_string(),
            product_id: "ETH-EUR".to_string(),
            side: "BUY".to_string(),
            status: "FILLED".to_string(),
            occurred_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            quantity: Some(dec!(0.123456789012345678)),
            price: Some(dec!(3100.5)),
            fee: None,
            total: Some(dec!(382.77)),
        }
    }

    #[test]
    fn test_schema_failure_is_database_error() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA query_only = ON").unwrap();

        let err = SqliteStore::new(conn).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<TaxError>(),
            Some(TaxError::Database(_))
        ));
    }

    #[test]
    fn test_insert_is_idempotent_per_user() {
        let store = SqliteStore::in_memory().unwrap();

        assert!(store.insert("u1", &order("ext-1")).unwrap());
        assert!(!store.insert("u1", &order("ext-1")).unwrap());
        assert!(store.insert("u2", &order("ext-1")).unwrap());

        assert_eq!(store.count_orders("u1").unwrap(), 1);
        assert!(store.contains("u1", "ext-1").unwrap());
        assert!(!store.contains("u1", "ext-2").unwrap());
    }

    #[test]
    fn test_decimals_keep_full_precision() {
        let store = SqliteStore::in_memory().unwrap();
        store.insert("u1", &order("ext-1")).unwrap();

        let stored = OrderStore::list(&store, "u1").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].quantity, Some(dec!(0.123456789012345678)));
        assert_eq!(stored[0].fee, None);
    }

    #[test]
    fn test_orders_listed_newest_first() {
        let store = SqliteStore::in_memory().unwrap();
        let mut older = order("old");
        older.occurred_at = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        store.insert("u1", &older).unwrap();
        store.insert("u1", &order("new")).unwrap();

        let ids: Vec<String> = OrderStore::list(&store, "u1")
            .unwrap()
            .into_iter()
            .map(|o| o.external_id)
            .collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[test]
    fn test_upsert_overwrites_in_place() {
        let store = SqliteStore::in_memory().unwrap();
        let first = store
            .upsert(
                ReportKind::CapitalGains,
                "u1",
                2024,
                &ReportTotals::new(dec!(10.00), dec!(15.00), dec!(5.00)),
            )
            .unwrap();
        let second = store
            .upsert(
                ReportKind::CapitalGains,
                "u1",
                2024,
                &ReportTotals::new(dec!(20.00), dec!(21.00), dec!(1.00)),
            )
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.cost, dec!(20.00));
        assert_eq!(ReportStore::list(&store, ReportKind::CapitalGains, "u1").unwrap().len(), 1);
    }

    #[test]
    fn test_upsert_treats_missing_totals_as_zero() {
        let store = SqliteStore::in_memory().unwrap();
        let report = store
            .upsert(ReportKind::Pit, "u1", 2023, &ReportTotals::default())
            .unwrap();
        assert_eq!(report.cost, Decimal::ZERO);
        assert_eq!(report.proceeds, Decimal::ZERO);
        assert_eq!(report.gain, Decimal::ZERO);
    }

    #[test]
    fn test_report_kinds_are_separate_tables() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .upsert(
                ReportKind::CapitalGains,
                "u1",
                2024,
                &ReportTotals::new(dec!(1), dec!(2), dec!(1)),
            )
            .unwrap();

        assert!(store.find(ReportKind::CapitalGains, "u1", 2024).unwrap().is_some());
        assert!(store.find(ReportKind::Pit, "u1", 2024).unwrap().is_none());
    }
}
