use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::cost_basis::FifoMatcher;
use crate::db::{
    OrderSide, OrderSnapshot, OrdersProvider, ReportKind, ReportStore, ReportTotals, TaxReport,
};
use crate::fx::{quote_currency, CurrencyConverter};
use crate::utils::{reporting_date, round_internal, round_money, tax_year as reporting_year};

/// Capital gains for one user and tax year, PLN rounded to 2 decimals
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapitalGainsPreview {
    pub tax_year: i32,
    pub cost: Decimal,
    pub proceeds: Decimal,
    pub gain: Decimal,
    pub warnings: Vec<String>,
}

impl From<&CapitalGainsPreview> for ReportTotals {
    fn from(preview: &CapitalGainsPreview) -> Self {
        ReportTotals::new(preview.cost, preview.proceeds, preview.gain)
    }
}

/// Compute FIFO capital gains for `tax_year` without persisting anything.
///
/// Only FILLED orders whose Warsaw-local year equals `tax_year` take part;
/// lots from earlier years are not carried in. Incomplete orders degrade to
/// zero amounts and a sale without enough lots adds a warning.
pub fn calculate_preview<P>(
    orders: &P,
    converter: &CurrencyConverter,
    user_id: &str,
    tax_year: i32,
) -> Result<CapitalGainsPreview>
where
    P: OrdersProvider + ?Sized,
{
    let all = orders
        .orders_for_user(user_id)
        .with_context(|| format!("Failed to load orders for user {}", user_id))?;

    let mut in_year: Vec<OrderSnapshot> = all
        .into_iter()
        .filter(|o| o.is_filled() && reporting_year(o.occurred_at) == tax_year)
        .collect();
    // Stable: orders sharing an instant keep provider order
    in_year.sort_by_key(|o| o.occurred_at);

    debug!(
        "Calculating capital gains for {} / {} from {} orders",
        user_id,
        tax_year,
        in_year.len()
    );

    let mut matcher = FifoMatcher::new();
    let mut total_cost = Decimal::ZERO;
    let mut total_proceeds = Decimal::ZERO;
    let mut warnings = Vec::new();

    for order in &in_year {
        let Some(side) = order.order_side() else {
            continue;
        };
        let quantity = order.quantity.unwrap_or(Decimal::ZERO);
        if quantity <= Decimal::ZERO {
            continue;
        }

        let currency = quote_currency(&order.product_id);
        let date = reporting_date(order.occurred_at);

        match side {
            OrderSide::Buy => {
                let unit_cost = converter.convert_to_pln(buy_unit_cost(order), &currency, date)?;
                matcher.add_lot(&order.product_id, quantity, unit_cost);
            }
            OrderSide::Sell => {
                let proceeds = converter.convert_to_pln(sell_proceeds(order), &currency, date)?;
                total_proceeds += proceeds;

                let matched = matcher.match_sale(&order.product_id, quantity);
                if !matched.is_fully_matched() {
                    let message = format!(
                        "Missing buy lots for product {} (remaining {})",
                        order.product_id, matched.unmatched_quantity
                    );
                    warn!("{} / {}: {}", user_id, tax_year, message);
                    warnings.push(message);
                }
                total_cost += matched.cost;
            }
        }
    }

    // Gain comes from the rounded totals so that gain == proceeds - cost holds exactly
    let cost = round_money(total_cost.max(Decimal::ZERO));
    let proceeds = round_money(total_proceeds.max(Decimal::ZERO));
    let gain = round_money(proceeds - cost);

    Ok(CapitalGainsPreview {
        tax_year,
        cost,
        proceeds,
        gain,
        warnings,
    })
}

/// Recompute the capital-gains preview and overwrite the stored report
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
    let report = store.upsert(
        ReportKind::CapitalGains,
        user_id,
        tax_year,
        &ReportTotals::from(&preview),
    )?;

    info!(
        "Capital gains report for {} / {}: cost {} proceeds {} gain {}",
        user_id, tax_year, report.cost, report.proceeds, report.gain
    );
    Ok(report)
}

/// Unit cost of a buy in quote currency: (total + fee) / quantity when
/// either is positive, otherwise the price, otherwise zero.
pub fn buy_unit_cost(order: &OrderSnapshot) -> Decimal {
    let quantity = order.quantity.unwrap_or(Decimal::ZERO);
    let total = order.total.unwrap_or(Decimal::ZERO);
    let fee = order.fee.unwrap_or(Decimal::ZERO);

    if quantity > Decimal::ZERO && (total > Decimal::ZERO || fee > Decimal::ZERO) {
        if let Some(unit) = (total + fee).checked_div(quantity) {
            return round_internal(unit);
        }
    }

    match order.price {
        Some(price) if price > Decimal::ZERO => price,
        _ => Decimal::ZERO,
    }
}

/// Net proceeds of a sell in quote currency: total - fee when a total is
/// present, otherwise quantity * price - fee, otherwise zero.
pub fn sell_proceeds(order: &OrderSnapshot) -> Decimal {
    let total = order.total.unwrap_or(Decimal::ZERO);
    let fee = order.fee.unwrap_or(Decimal::ZERO);
    if total > Decimal::ZERO {
        return total - fee;
    }

    let quantity = order.quantity.unwrap_or(Decimal::ZERO);
    let price = order.price.unwrap_or(Decimal::ZERO);
    if quantity > Decimal::ZERO && price > Decimal::ZERO {
        return quantity
            .checked_mul(price)
            .map_or(Decimal::ZERO, |gross| gross - fee);
    }

    Decimal::ZERO
}
