// FX module - historical conversion of order amounts into PLN

pub mod nbp;

use anyhow::Result;
use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::utils::{round_money, REPORTING_CURRENCY};

/// Default number of days to look back for a published rate
pub const DEFAULT_LOOKBACK_DAYS: u32 = 7;

/// Currency assumed when an asset pair carries no usable quote suffix
pub const FALLBACK_QUOTE_CURRENCY: &str = "USD";

/// Source of historical daily rates (1 unit of `currency` in PLN)
pub trait ExchangeRateProvider {
    /// Rate published for exactly `date`, `None` when that day has no rate
    fn rate(&self, currency: &str, date: NaiveDate) -> Result<Option<Decimal>>;

    fn supports(&self, currency: &str) -> bool;
}

impl<T: ExchangeRateProvider + ?Sized> ExchangeRateProvider for Box<T> {
    fn rate(&self, currency: &str, date: NaiveDate) -> Result<Option<Decimal>> {
        (**self).rate(currency, date)
    }

    fn supports(&self, currency: &str) -> bool {
        (**self).supports(currency)
    }
}

/// Quote currency of an asset pair like `"BTC-USD"`.
///
/// Stablecoin quotes count as USD, and a missing suffix falls back to USD.
///
/// # Examples
/// ```
/// use pitax::fx::quote_currency;
///
/// assert_eq!(quote_currency("BTC-USD"), "USD");
/// assert_eq!(quote_currency("ONDO-USDC"), "USD");
/// assert_eq!(quote_currency("ETH-EUR"), "EUR");
/// assert_eq!(quote_currency("BTC"), "USD");
/// ```
pub fn quote_currency(product_id: &str) -> String {
    let quote = product_id
        .split('-')
        .nth(1)
        .map(|s| s.trim().to_ascii_uppercase())
        .unwrap_or_default();

    match quote.as_str() {
        "" => FALLBACK_QUOTE_CURRENCY.to_string(),
        "USDC" | "USDT" => "USD".to_string(),
        _ => quote,
    }
}

/// A rate together with the day it was actually published for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveRate {
    pub rate: Decimal,
    pub published_on: NaiveDate,
}

/// Converts amounts to PLN using historical rates with a lookback window.
///
/// Rate sources skip weekends and holidays, so a missing day falls back to
/// the closest earlier day within `lookback_days`. Found rates are cached per
/// `(currency, requested date)`.
pub struct CurrencyConverter {
    provider: Box<dyn ExchangeRateProvider + Send>,
    lookback_days: u32,
    cache: Mutex<HashMap<(String, NaiveDate), EffectiveRate>>,
}

impl CurrencyConverter {
    pub fn new(provider: Box<dyn ExchangeRateProvider + Send>) -> Self {
        Self::with_lookback(provider, DEFAULT_LOOKBACK_DAYS)
    }

    pub fn with_lookback(
        provider: Box<dyn ExchangeRateProvider + Send>,
        lookback_days: u32,
    ) -> Self {
        Self {
            provider,
            lookback_days,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Convert `amount` in `currency` into PLN as of `date`.
    ///
    /// Zero and PLN amounts pass through. An unsupported currency or a
    /// missing rate also returns the original amount: this is logged, not
    /// surfaced to the caller. Provider transport errors propagate.
    pub fn convert_to_pln(
        &self,
        amount: Decimal,
        currency: &str,
        date: NaiveDate,
    ) -> Result<Decimal> {
        if amount.is_zero() || currency.trim().eq_ignore_ascii_case(REPORTING_CURRENCY) {
            return Ok(amount);
        }

        let currency = currency.trim().to_ascii_uppercase();
        if !self.provider.supports(&currency) {
            warn!(
                "Currency {} not supported by exchange rate provider, returning original amount",
                currency
            );
            return Ok(amount);
        }

        let Some(effective) = self.effective_rate(&currency, date)? else {
            warn!(
                "Exchange rate not available for {} on {}, returning original amount",
                currency, date
            );
            return Ok(amount);
        };

        let converted = round_money(amount * effective.rate);
        debug!(
            "Converted {} {} to {} PLN (rate: {}, date: {})",
            amount, currency, converted, effective.rate, effective.published_on
        );
        Ok(converted)
    }

    /// Rate used for `date`: that day or the closest earlier day in the window.
    pub fn effective_rate(&self, currency: &str, date: NaiveDate) -> Result<Option<EffectiveRate>> {
        let currency = currency.trim().to_ascii_uppercase();
        let key = (currency.clone(), date);

        if let Some(hit) = self.cache_lock().get(&key) {
            return Ok(Some(*hit));
        }

        for days_back in 0..=self.lookback_days {
            let Some(try_date) = date.checked_sub_days(Days::new(u64::from(days_back))) else {
                break;
            };
            let rate = self.provider.rate(&currency, try_date)?;

            if let Some(rate) = rate.filter(|r| *r > Decimal::ZERO) {
                if days_back > 0 {
                    info!(
                        "Rate for {} on {} not published, using rate from {}: {} PLN",
                        currency, date, try_date, rate
                    );
                }
                let effective = EffectiveRate {
                    rate,
                    published_on: try_date,
                };
                self.cache_lock().insert(key, effective);
                return Ok(Some(effective));
            }
        }

        warn!(
            "Could not find exchange rate for {} around {} (tried {} days back)",
            currency, date, self.lookback_days
        );
        Ok(None)
    }

    pub fn supports(&self, currency: &str) -> bool {
        currency.trim().eq_ignore_ascii_case(REPORTING_CURRENCY)
            || self.provider.supports(&currency.trim().to_ascii_uppercase())
    }

    pub fn lookback_days(&self) -> u32 {
        self.lookback_days
    }

    pub fn cache_size(&self) -> usize {
        self.cache_lock().len()
    }

    pub fn clear_cache(&self) {
        self.cache_lock().clear();
        info!("Exchange rate cache cleared");
    }

    fn cache_lock(&self) -> std::sync::MutexGuard<'_, HashMap<(String, NaiveDate), EffectiveRate>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fixed rate table, used offline and in tests
#[derive(Debug, Clone, Default)]
pub struct StaticRates {
    rates: HashMap<(String, NaiveDate), Decimal>,
    currencies: HashSet<String>,
}

impl StaticRates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a currency as supported even if it has no rates yet
    pub fn with_currency(mut self, currency: &str) -> Self {
        self.currencies.insert(currency.to_ascii_uppercase());
        self
    }

    pub fn with_rate(mut self, currency: &str, date: NaiveDate, rate: Decimal) -> Self {
        self.insert(currency, date, rate);
        self
    }

    pub fn insert(&mut self, currency: &str, date: NaiveDate, rate: Decimal) {
        let currency = currency.to_ascii_uppercase();
        self.currencies.insert(currency.clone());
        self.rates.insert((currency, date), rate);
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

impl ExchangeRateProvider for StaticRates {
    fn rate(&self, currency: &str, date: NaiveDate) -> Result<Option<Decimal>> {
        Ok(self
            .rates
            .get(&(currency.to_ascii_uppercase(), date))
            .copied())
    }

    fn supports(&self, currency: &str) -> bool {
        self.currencies.contains(&currency.to_ascii_uppercase())
    }
}

/// Asks each provider in order; the first one with a rate for the day wins.
///
/// Transport errors from one provider are logged and the next one is tried;
/// when nobody has a rate the last error is returned.
pub struct ChainedRates {
    providers: Vec<Box<dyn ExchangeRateProvider + Send>>,
}

impl ChainedRates {
    pub fn new(providers: Vec<Box<dyn ExchangeRateProvider + Send>>) -> Self {
        Self { providers }
    }
}

impl ExchangeRateProvider for ChainedRates {
    fn rate(&self, currency: &str, date: NaiveDate) -> Result<Option<Decimal>> {
        let mut last_error = None;

        for provider in self.providers.iter().filter(|p| p.supports(currency)) {
            match provider.rate(currency, date) {
                Ok(Some(rate)) => return Ok(Some(rate)),
                Ok(None) => {}
                Err(e) => {
                    warn!("Rate lookup for {} on {} failed: {:#}", currency, date, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    fn supports(&self, currency: &str) -> bool {
        self.providers.iter().any(|p| p.supports(currency))
    }
}
