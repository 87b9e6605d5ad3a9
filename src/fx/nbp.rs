//! National Bank of Poland (NBP) table A mid rates.
//!
//! One request per (currency, day). NBP answers 404 for days without a
//! published table (weekends, holidays), which maps to "no rate" so the
//! converter's lookback can move to the previous day.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

use super::ExchangeRateProvider;

pub const NBP_API_URL: &str = "https://api.nbp.pl/api/exchangerates/rates/a";

static SUPPORTED_CURRENCIES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "USD", "EUR", "GBP", "CHF", "JPY", "CAD", "AUD", "NOK", "SEK", "DKK", "CZK", "HUF", "RON",
        "BGN",
    ]
    .into_iter()
    .collect()
});

/// Whether NBP table A publishes this currency
pub fn is_supported(currency: &str) -> bool {
    SUPPORTED_CURRENCIES.contains(currency.trim().to_ascii_uppercase().as_str())
}

#[derive(Debug, Deserialize)]
struct NbpRatesResponse {
    rates: Vec<NbpRate>,
}

#[derive(Debug, Deserialize)]
struct NbpRate {
    mid: Decimal,
}

pub struct NbpClient {
    client: Client,
    base_url: String,
}

impl NbpClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent("pitax/0.1 (+https://api.nbp.pl)")
            .timeout(timeout)
            .build()
            .context("Failed to build NBP HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn rate_url(&self, currency: &str, date: NaiveDate) -> String {
        format!(
            "{}/{}/{}/?format=json",
            self.base_url,
            currency.to_ascii_lowercase(),
            date.format("%Y-%m-%d")
        )
    }
}

impl ExchangeRateProvider for NbpClient {
    fn rate(&self, currency: &str, date: NaiveDate) -> Result<Option<Decimal>> {
        let url = self.rate_url(currency, date);
        debug!("Fetching NBP exchange rate for {} on {}", currency, date);

        let response = self
            .client
            .get(&url)
            .send()
            .with_context(|| {
                format!("Failed to send request to NBP for {} on {}", currency, date)
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(anyhow!("NBP returned error status: {}", response.status()));
        }

        let body = response.text().context("Failed to read NBP response")?;
        parse_mid_rate(&body)
    }

    fn supports(&self, currency: &str) -> bool {
        is_supported(currency)
    }
}

/// Extract the first `mid` rate from an NBP JSON body
pub fn parse_mid_rate(body: &str) -> Result<Option<Decimal>> {
    let data: NbpRatesResponse =
        serde_json::from_str(body).context("Failed to parse NBP response")?;
    Ok(data
        .rates
        .first()
        .map(|r| r.mid)
        .filter(|mid| *mid > Decimal::ZERO))
}
