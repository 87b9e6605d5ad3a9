// PIT projection of the capital-gains figures

use anyhow::Result;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::capital_gains::{self, CapitalGainsPreview};
use crate::db::{OrdersProvider, ReportKind, ReportStore, ReportTotals, TaxReport};
use crate::fx::CurrencyConverter;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PitPreview {
    pub tax_year: i32,
    pub cost: Decimal,
    pub proceeds: Decimal,
    pub gain: Decimal,
    pub warnings: Vec<String>,
}

impl From<CapitalGainsPreview> for PitPreview {
    fn from(preview: CapitalGainsPreview) -> Self {
        Self {
            tax_year: preview.tax_year,
            cost: preview.cost,
            proceeds: preview.proceeds,
            gain: preview.gain,
            warnings: preview.warnings,
        }
    }
}

impl From<&PitPreview> for ReportTotals {
    fn from(preview: &PitPreview) -> Self {
        ReportTotals::new(preview.cost, preview.proceeds, preview.gain)
    }
}

pub fn calculate_preview<P>(
    orders: &P,
    converter: &CurrencyConverter,
    user_id: &str,
    tax_year: i32,
) -> Result<PitPreview>
where
    P: OrdersProvider + ?Sized,
{
    capital_gains::calculate_preview(orders, converter, user_id, tax_year).map(PitPreview::from)
}

/// Recompute the PIT preview and overwrite the stored PIT report
pub fn generate_report<S>(
    store: &S,
    converter: &CurrencyConverter,
    user_id: &str,
    tax_year: i32,
) -> Result<TaxReport>
where
    S: OrdersProvider + ReportStore + ?Sized,
{
    let preview = calculate_preview(store, converter, user_id, tax_year)?;
    let report = store.upsert(ReportKind::Pit, user_id, tax_year, &ReportTotals::from(&preview))?;

    info!(
        "PIT report for {} / {}: gain {}",
        user_id, tax_year, report.gain
    );
    Ok(report)
}
