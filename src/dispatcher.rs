//! Command dispatcher that routes parsed CLI commands to their handlers.
//!
//! Every handler opens what it needs from the loaded [`Config`]: the SQLite
//! store, and for anything that converts amounts, a currency converter backed
//! by the persistent rate cache.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

use pitax::config::Config;
use pitax::db::{
    self, OrderStore, ReportKind, ReportStore, SqliteRateCache, SqliteStore, TaxReport,
};
use pitax::error::{require_user_id, TaxError};
use pitax::fx::nbp::NbpClient;
use pitax::fx::{ChainedRates, CurrencyConverter, EffectiveRate, ExchangeRateProvider, StaticRates};
use pitax::orders::{sync_orders, JsonFileSource};
use pitax::pipeline::{worker, Pipeline, StageFailure};
use pitax::tax::{capital_gains, pit};
use pitax::utils::REPORTING_CURRENCY;

use crate::cli::formatters;
use crate::cli::Commands;

/// Route a parsed command to its handler
pub fn dispatch_command(command: Commands, config: &Config, json_output: bool) -> Result<()> {
    match command {
        Commands::Import { file, user } => dispatch_import(&file, &user, config, json_output),
        Commands::Orders { user } => dispatch_orders(&user, config, json_output),
        Commands::Recompute { user, years } => {
            dispatch_recompute(&user, &years, config, json_output)
        }
        Commands::Preview { user, year, pit } => {
            dispatch_preview(&user, year, pit, config, json_output)
        }
        Commands::Reports { user, pit } => dispatch_reports(&user, pit, config, json_output),
        Commands::Rate { currency, date } => dispatch_rate(&currency, &date, config, json_output),
    }
}

fn db_path(config: &Config) -> Result<PathBuf> {
    match &config.database_path {
        Some(path) => Ok(path.clone()),
        None => db::get_default_db_path(),
    }
}

fn open_store(config: &Config) -> Result<SqliteStore> {
    SqliteStore::open(&db_path(config)?)
}

/// Converter over configured fixed rates first, then rates stored in the
/// database, then NBP unless offline.
///
/// Only NBP answers are persisted, so a corrected fixed rate in the config
/// takes effect on the next run. Builds a blocking HTTP client, so it must
/// run outside the async runtime.
fn build_converter(config: &Config) -> Result<CurrencyConverter> {
    let upstream: Box<dyn ExchangeRateProvider + Send> = if config.offline {
        info!("Offline mode: using stored and configured rates only");
        Box::new(StaticRates::new())
    } else {
        Box::new(NbpClient::new(&config.nbp_base_url, config.http_timeout())?)
    };
    let cache = SqliteRateCache::new(db::open_db(Some(db_path(config)?))?, upstream, "NBP")?;

    let providers: Vec<Box<dyn ExchangeRateProvider + Send>> =
        vec![Box::new(config.static_rates()), Box::new(cache)];
    Ok(CurrencyConverter::with_lookback(
        Box::new(ChainedRates::new(providers)),
        config.rate_lookback_days,
    ))
}

fn failures_error(failures: &[StageFailure]) -> Result<()> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("{} pipeline stage(s) failed", failures.len()))
    }
}

fn dispatch_import(file: &str, user: &str, config: &Config, json_output: bool) -> Result<()> {
    let source = JsonFileSource::new(file);
    let event = sync_orders(&source, user)?;

    let pipeline = Pipeline::new(open_store(config)?, build_converter(config)?);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let summary = runtime.block_on(async {
        let (handle, join) = worker::spawn(pipeline, config.channel_capacity);
        handle.submit(event).await?;
        drop(handle);
        join.await.context("Pipeline worker panicked")
    })?;

    if json_output {
        println!("{}", formatters::to_json(&summary));
    } else {
        print!("{}", formatters::format_import_summary(&summary));
    }
    failures_error(&summary.failures)
}

fn dispatch_orders(user: &str, config: &Config, json_output: bool) -> Result<()> {
    require_user_id(user)?;
    let store = open_store(config)?;
    let orders = OrderStore::list(&store, user)?;

    if json_output {
        println!("{}", formatters::to_json(&orders));
    } else {
        print!("{}", formatters::format_orders_table(&orders));
    }
    Ok(())
}

fn dispatch_recompute(user: &str, years: &[i32], config: &Config, json_output: bool) -> Result<()> {
    require_user_id(user)?;
    let pipeline = Pipeline::new(open_store(config)?, build_converter(config)?);
    let outcome = pipeline.recompute(user, years);

    if json_output {
        #[derive(Serialize)]
        struct JsonRecompute<'a> {
            capital_gains_reports: &'a [TaxReport],
            pit_reports: &'a [TaxReport],
            failures: &'a [StageFailure],
        }

        println!(
            "{}",
            formatters::to_json(&JsonRecompute {
                capital_gains_reports: &outcome.capital_gains_reports,
                pit_reports: &outcome.pit_reports,
                failures: &outcome.failures,
            })
        );
    } else {
        print!(
            "{}",
            formatters::format_reports_table("Capital gains", &outcome.capital_gains_reports)
        );
        print!("{}", formatters::format_reports_table("PIT", &outcome.pit_reports));
        print!("{}", formatters::format_failures(&outcome.failures));
    }
    failures_error(&outcome.failures)
}

fn dispatch_preview(
    user: &str,
    year: i32,
    as_pit: bool,
    config: &Config,
    json_output: bool,
) -> Result<()> {
    require_user_id(user)?;
    let store = open_store(config)?;
    let converter = build_converter(config)?;

    if as_pit {
        let preview = pit::calculate_preview(&store, &converter, user, year)?;
        if json_output {
            println!("{}", formatters::to_json(&preview));
        } else {
            print!(
                "{}",
                formatters::format_preview(
                    "PIT",
                    preview.tax_year,
                    preview.cost,
                    preview.proceeds,
                    preview.gain,
                    &preview.warnings
                )
            );
        }
    } else {
        let preview = capital_gains::calculate_preview(&store, &converter, user, year)?;
        if json_output {
            println!("{}", formatters::to_json(&preview));
        } else {
            print!(
                "{}",
                formatters::format_preview(
                    "Capital gains",
                    preview.tax_year,
                    preview.cost,
                    preview.proceeds,
                    preview.gain,
                    &preview.warnings
                )
            );
        }
    }
    Ok(())
}

fn dispatch_reports(user: &str, as_pit: bool, config: &Config, json_output: bool) -> Result<()> {
    require_user_id(user)?;
    let store = open_store(config)?;
    let (kind, title) = if as_pit {
        (ReportKind::Pit, "PIT")
    } else {
        (ReportKind::CapitalGains, "Capital gains")
    };
    let reports = ReportStore::list(&store, kind, user)?;

    if json_output {
        println!("{}", formatters::to_json(&reports));
    } else {
        print!("{}", formatters::format_reports_table(title, &reports));
    }
    Ok(())
}

fn dispatch_rate(currency: &str, date: &str, config: &Config, json_output: bool) -> Result<()> {
    let currency = currency.trim().to_ascii_uppercase();
    let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|e| TaxError::Parse(format!("invalid date '{}': {}", date, e)))?;

    let mut lookback_days = config.rate_lookback_days;
    let effective = if currency == REPORTING_CURRENCY {
        Some(EffectiveRate {
            rate: Decimal::ONE,
            published_on: date,
        })
    } else {
        let converter = build_converter(config)?;
        if !converter.supports(&currency) {
            return Err(
                TaxError::ExchangeRate(format!("currency {} is not supported", currency)).into(),
            );
        }
        lookback_days = converter.lookback_days();
        converter.effective_rate(&currency, date)?
    };

    if json_output {
        #[derive(Serialize)]
        struct JsonRate<'a> {
            currency: &'a str,
            date: NaiveDate,
            rate: Option<Decimal>,
            published_on: Option<NaiveDate>,
        }

        println!(
            "{}",
            formatters::to_json(&JsonRate {
                currency: &currency,
                date,
                rate: effective.map(|e| e.rate),
                published_on: effective.map(|e| e.published_on),
            })
        );
    } else {
        print!(
            "{}",
            formatters::format_rate(&currency, date, effective, lookback_days)
        );
    }
    Ok(())
}
