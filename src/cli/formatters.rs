//! Output formatting module for CLI display
//!
//! Tables and summaries for the terminal, and pretty JSON for `--json`.

use colored::Colorize;
use rust_decimal::Decimal;
use serde::Serialize;
use tabled::{
    settings::{object::Columns, Alignment, Style},
    Table, Tabled,
};

use pitax::db::{StoredOrder, TaxReport};
use pitax::fx::EffectiveRate;
use pitax::pipeline::WorkerSummary;
use pitax::utils::format_pln;

pub fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!(r#"{{"error": "JSON serialization failed: {}"}}"#, e))
}

fn colored_pln(value: Decimal) -> String {
    if value >= Decimal::ZERO {
        format_pln(value).green().to_string()
    } else {
        format_pln(value).red().to_string()
    }
}

fn optional_decimal(value: Option<Decimal>) -> String {
    value.map(|v| v.normalize().to_string()).unwrap_or_else(|| "-".to_string())
}

pub fn format_orders_table(orders: &[StoredOrder]) -> String {
    if orders.is_empty() {
        return format!(
            "{} No orders found\nImport orders first using: {} import <file> --user <id>\n",
            "ℹ".blue().bold(),
            "pitax".bold()
        );
    }

    #[derive(Tabled)]
    struct OrderRow {
        #[tabled(rename = "Time (UTC)")]
        occurred_at: String,
        #[tabled(rename = "External ID")]
        external_id: String,
        #[tabled(rename = "Product")]
        product_id: String,
        #[tabled(rename = "Side")]
        side: String,
        #[tabled(rename = "Status")]
        status: String,
        #[tabled(rename = "Quantity")]
        quantity: String,
        #[tabled(rename = "Price")]
        price: String,
        #[tabled(rename = "Fee")]
        fee: String,
        #[tabled(rename = "Total")]
        total: String,
    }

    let rows: Vec<OrderRow> = orders
        .iter()
        .map(|o| OrderRow {
            occurred_at: o.occurred_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            external_id: o.external_id.clone(),
            product_id: o.product_id.clone(),
            side: o.side.clone(),
            status: o.status.clone(),
            quantity: optional_decimal(o.quantity),
            price: optional_decimal(o.price),
            fee: optional_decimal(o.fee),
            total: optional_decimal(o.total),
        })
        .collect();

    let mut table = Table::new(&rows);
    table.with(Style::modern());
    table.modify(Columns::new(5..), Alignment::right());

    format!("{}\n{} orders\n", table, orders.len())
}

pub fn format_reports_table(title: &str, reports: &[TaxReport]) -> String {
    if reports.is_empty() {
        return format!("{} No {} reports stored yet\n", "ℹ".blue().bold(), title);
    }

    #[derive(Tabled)]
    struct ReportRow {
        #[tabled(rename = "Year")]
        year: i32,
        #[tabled(rename = "Cost")]
        cost: String,
        #[tabled(rename = "Proceeds")]
        proceeds: String,
        #[tabled(rename = "Gain")]
        gain: String,
        #[tabled(rename = "Updated")]
        updated_at: String,
    }

    let rows: Vec<ReportRow> = reports
        .iter()
        .map(|r| ReportRow {
            year: r.tax_year,
            cost: format_pln(r.cost),
            proceeds: format_pln(r.proceeds),
            gain: colored_pln(r.gain),
            updated_at: r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
        })
        .collect();

    let mut table = Table::new(&rows);
    table.with(Style::modern());
    table.modify(Columns::new(1..4), Alignment::right());

    format!("\n{} {} reports\n\n{}\n", "📄".cyan().bold(), title, table)
}

/// Preview totals plus any data-quality warnings
pub fn format_preview(
    title: &str,
    tax_year: i32,
    cost: Decimal,
    proceeds: Decimal,
    gain: Decimal,
    warnings: &[String],
) -> String {
    let mut output = format!("\n{} {} preview for {}\n", "📊".cyan().bold(), title, tax_year);
    output.push_str(&format!("\n{:<12} {}", "Cost:".bold(), format_pln(cost)));
    output.push_str(&format!("\n{:<12} {}", "Proceeds:".bold(), format_pln(proceeds)));
    output.push_str(&format!("\n{:<12} {}\n", "Gain:".bold(), colored_pln(gain)));

    if !warnings.is_empty() {
        output.push_str(&format!("\n{} Warnings:\n", "⚠".yellow().bold()));
        for warning in warnings {
            output.push_str(&format!("  - {}\n", warning));
        }
    }
    output
}

pub fn format_import_summary(summary: &WorkerSummary) -> String {
    let duplicates: usize = summary.ingested.iter().map(|i| i.duplicates).sum();
    let invalid: usize = summary.ingested.iter().map(|i| i.invalid).sum();
    let mut years: Vec<i32> = summary
        .ingested
        .iter()
        .flat_map(|i| i.tax_years.iter().copied())
        .collect();
    years.sort_unstable();
    years.dedup();

    let mut output = format!("\n{} Import complete!\n", "✓".green().bold());
    output.push_str(&format!(
        "  Imported: {}\n",
        summary.orders_inserted.to_string().green()
    ));
    if duplicates > 0 {
        output.push_str(&format!(
            "  Skipped (duplicates): {}\n",
            duplicates.to_string().yellow()
        ));
    }
    if invalid > 0 {
        output.push_str(&format!(
            "  Skipped (incomplete): {}\n",
            invalid.to_string().yellow()
        ));
    }
    if years.is_empty() {
        output.push_str("  No tax years changed\n");
    } else {
        let years: Vec<String> = years.iter().map(i32::to_string).collect();
        output.push_str(&format!("  Recomputed years: {}\n", years.join(", ")));
        output.push_str(&format!(
            "  Reports written: {} capital gains, {} PIT\n",
            summary.capital_gains_reports, summary.pit_reports
        ));
    }
    output.push_str(&format_failures(&summary.failures));
    output
}

pub fn format_failures(failures: &[pitax::pipeline::StageFailure]) -> String {
    let mut output = String::new();
    for failure in failures {
        output.push_str(&format!(
            "  {} {} for {}: {}\n",
            "✗".red().bold(),
            failure.event.name(),
            failure.event.user_id(),
            failure.error
        ));
    }
    output
}

pub fn format_rate(
    currency: &str,
    date: chrono::NaiveDate,
    rate: Option<EffectiveRate>,
    lookback_days: u32,
) -> String {
    match rate {
        Some(effective) if effective.published_on == date => {
            format!("1 {} = {} PLN on {}\n", currency, effective.rate, date)
        }
        Some(effective) => format!(
            "1 {} = {} PLN on {} {}\n",
            currency,
            effective.rate,
            date,
            format!("(published {})", effective.published_on).bright_black()
        ),
        None => format!(
            "{} No {} rate found for {} or the {} days before it\n",
            "⚠".yellow().bold(),
            currency,
            date,
            lookback_days
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use pitax::db::ReportKind;
    use pitax::orders::IngestOutcome;
    use rust_decimal_macros::dec;

    fn plain() {
        colored::control::set_override(false);
    }

    #[test]
    fn test_empty_tables() {
        plain();
        assert!(format_orders_table(&[]).contains("No orders found"));
        assert!(format_reports_table("PIT", &[]).contains("No PIT reports"));
    }

    #[test]
    fn test_reports_table_shows_pln_amounts() {
        plain();
        let report = TaxReport {
            id: Some(1),
            kind: ReportKind::CapitalGains,
            user_id: "u1".to_string(),
            tax_year: 2024,
            cost: dec!(1234.5),
            proceeds: dec!(2000),
            gain: dec!(765.5),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let table = format_reports_table("Capital gains", &[report]);
        assert!(table.contains("2024"));
        assert!(table.contains("1 234,50 zł"));
        assert!(table.contains("765,50 zł"));
    }

    #[test]
    fn test_preview_lists_warnings() {
        plain();
        let output = format_preview(
            "PIT",
            2024,
            dec!(10),
            dec!(60),
            dec!(50),
            &["Missing buy lots for product AAA-PLN (remaining 2)".to_string()],
        );
        assert!(output.contains("Warnings"));
        assert!(output.contains("remaining 2"));
    }

    #[test]
    fn test_import_summary_counts() {
        plain();
        let summary = WorkerSummary {
            cascades: 1,
            events_handled: 4,
            orders_inserted: 2,
            capital_gains_reports: 1,
            pit_reports: 1,
            ingested: vec![IngestOutcome {
                inserted: 2,
                duplicates: 1,
                invalid: 0,
                tax_years: vec![2024],
            }],
            failures: Vec::new(),
        };
        let output = format_import_summary(&summary);
        assert!(output.contains("Imported: 2"));
        assert!(output.contains("Skipped (duplicates): 1"));
        assert!(output.contains("Recomputed years: 2024"));
    }

    #[test]
    fn test_rate_mentions_fallback_day() {
        plain();
        let day = NaiveDate::from_ymd_opt(2024, 1, 6).unwrap();
        let friday = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let output = format_rate(
            "USD",
            day,
            Some(EffectiveRate {
                rate: dec!(3.98),
                published_on: friday,
            }),
            7,
        );
        assert!(output.contains("published 2024-01-05"));

        let missing = format_rate("USD", day, None, 7);
        assert!(missing.contains("No USD rate"));
        assert!(missing.contains("the 7 days before it"));
    }
}
