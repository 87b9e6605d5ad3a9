use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use tracing::debug;

use super::{apply_schema, get_decimal_value};
use crate::fx::ExchangeRateProvider;

/// Persistent exchange-rate cache in front of an upstream provider.
///
/// Published historical rates never change, so a stored rate is reused
/// forever; days without a rate are not stored and get asked again.
pub struct SqliteRateCache {
    conn: Connection,
    upstream: Box<dyn ExchangeRateProvider + Send>,
    source: String,
}

impl SqliteRateCache {
    pub fn new(
        conn: Connection,
        upstream: Box<dyn ExchangeRateProvider + Send>,
        source: &str,
    ) -> Result<Self> {
        apply_schema(&conn)?;
        Ok(Self {
            conn,
            upstream,
            source: source.to_string(),
        })
    }

    pub fn stored_rate(&self, currency: &str, date: NaiveDate) -> Result<Option<Decimal>> {
        let rate = self
            .conn
            .query_row(
                "SELECT rate FROM exchange_rates WHERE currency = ?1 AND rate_date = ?2",
                params![currency.to_ascii_uppercase(), date],
                |row| get_decimal_value(row, 0),
            )
            .optional()?;
        Ok(rate)
    }

    pub fn store_rate(&self, currency: &str, date: NaiveDate, rate: Decimal) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO exchange_rates (currency, rate_date, rate, source)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    currency.to_ascii_uppercase(),
                    date,
                    rate.to_string(),
                    self.source
                ],
            )
            .with_context(|| format!("Failed to store {} rate for {}", currency, date))?;
        Ok(())
    }

    fn has_stored_currency(&self, currency: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM exchange_rates WHERE currency = ?1 LIMIT 1",
                [currency.to_ascii_uppercase()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn stored_count(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM exchange_rates", [], |row| row.get(0))?;
        Ok(count)
    }
}

impl ExchangeRateProvider for SqliteRateCache {
    fn rate(&self, currency: &str, date: NaiveDate) -> Result<Option<Decimal>> {
        if let Some(rate) = self.stored_rate(currency, date)? {
            debug!("Using stored {} rate for {}: {}", currency, date, rate);
            return Ok(Some(rate));
        }

        let fetched = self.upstream.rate(currency, date)?;
        if let Some(rate) = fetched {
            self.store_rate(currency, date, rate)?;
        }
        Ok(fetched)
    }

    fn supports(&self, currency: &str) -> bool {
        self.upstream.supports(currency) || self.has_stored_currency(currency).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fx::StaticRates;
    use rust_decimal_macros::dec;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn test_fetched_rates_are_persisted() {
        let upstream = StaticRates::new().with_rate("USD", date(2), dec!(3.9432));
        let cache = SqliteRateCache::new(
            Connection::open_in_memory().unwrap(),
            Box::new(upstream),
            "TEST",
        )
        .unwrap();

        assert_eq!(cache.rate("USD", date(2)).unwrap(), Some(dec!(3.9432)));
        assert_eq!(cache.stored_rate("usd", date(2)).unwrap(), Some(dec!(3.9432)));
        assert_eq!(cache.stored_count().unwrap(), 1);

        // Missing days are not remembered
        assert_eq!(cache.rate("USD", date(6)).unwrap(), None);
        assert_eq!(cache.stored_count().unwrap(), 1);
    }

    #[test]
    fn test_stored_rate_wins_over_upstream() {
        let cache = SqliteRateCache::new(
            Connection::open_in_memory().unwrap(),
            Box::new(StaticRates::new().with_rate("EUR", date(3), dec!(9.9))),
            "TEST",
        )
        .unwrap();
        cache.store_rate("EUR", date(3), dec!(4.3)).unwrap();

        assert_eq!(cache.rate("EUR", date(3)).unwrap(), Some(dec!(4.3)));
    }

    #[test]
    fn test_stored_currencies_stay_supported_offline() {
        let cache = SqliteRateCache::new(
            Connection::open_in_memory().unwrap(),
            Box::new(StaticRates::new()),
            "TEST",
        )
        .unwrap();
        assert!(!cache.supports("CHF"));

        cache.store_rate("chf", date(4), dec!(4.6)).unwrap();
        assert!(cache.supports("CHF"));
        assert_eq!(cache.rate("CHF", date(4)).unwrap(), Some(dec!(4.6)));
    }
}
