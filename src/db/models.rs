use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl FromStr for OrderSide {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            _ => Err(()),
        }
    }
}

/// Status value of an order that actually executed
pub const FILLED_STATUS: &str = "FILLED";

/// Incoming order payload as delivered by a broker adapter.
///
/// Every field is optional because broker exports are not trusted; the
/// ingestor decides what is complete enough to persist.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OrderInput {
    pub external_id: Option<String>,
    pub product_id: Option<String>,
    pub side: Option<String>,
    pub status: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub quantity: Option<Decimal>,
    pub price: Option<Decimal>,
    pub fee: Option<Decimal>,
    pub total: Option<Decimal>,
}

impl OrderInput {
    /// Promote to a [`NewOrder`] when every required field is present and non-blank.
    pub fn validated(&self) -> Option<NewOrder> {
        fn present(v: &Option<String>) -> Option<String> {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        }

        Some(NewOrder {
            external_id: present(&self.external_id)?,
            product_id: present(&self.product_id)?,
            side: present(&self.side)?,
            status: present(&self.status)?,
            occurred_at: self.occurred_at?,
            quantity: self.quantity,
            price: self.price,
            fee: self.fee,
            total: self.total,
        })
    }
}

/// Order that passed required-field validation and is ready to persist
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub external_id: String,
    pub product_id: String,
    pub side: String,
    pub status: String,
    pub occurred_at: DateTime<Utc>,
    pub quantity: Option<Decimal>,
    pub price: Option<Decimal>,
    pub fee: Option<Decimal>,
    pub total: Option<Decimal>,
}

/// Persisted, deduplicated order row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredOrder {
    pub id: Option<i64>,
    pub user_id: String,
    pub external_id: String,
    pub product_id: String,
    pub side: String,
    pub status: String,
    pub occurred_at: DateTime<Utc>,
    pub quantity: Option<Decimal>,
    pub price: Option<Decimal>,
    pub fee: Option<Decimal>,
    pub total: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

impl StoredOrder {
    pub fn snapshot(&self) -> OrderSnapshot {
        OrderSnapshot {
            product_id: self.product_id.clone(),
            side: self.side.clone(),
            status: self.status.clone(),
            occurred_at: self.occurred_at,
            quantity: self.quantity,
            price: self.price,
            fee: self.fee,
            total: self.total,
        }
    }
}

/// Immutable view of an order used by the tax calculations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderSnapshot {
    pub product_id: String,
    pub side: String,
    pub status: String,
    pub occurred_at: DateTime<Utc>,
    pub quantity: Option<Decimal>,
    pub price: Option<Decimal>,
    pub fee: Option<Decimal>,
    pub total: Option<Decimal>,
}

impl OrderSnapshot {
    pub fn is_filled(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case(FILLED_STATUS)
    }

    pub fn order_side(&self) -> Option<OrderSide> {
        self.side.parse().ok()
    }
}

/// Which stored report projection a row belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ReportKind {
    CapitalGains,
    Pit,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::CapitalGains => "CAPITAL_GAINS",
            ReportKind::Pit => "PIT",
        }
    }

    pub(crate) fn table(&self) -> &'static str {
        match self {
            ReportKind::CapitalGains => "capital_gains_reports",
            ReportKind::Pit => "pit_reports",
        }
    }
}

impl FromStr for ReportKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CAPITAL_GAINS" | "CAPITAL-GAINS" | "CG" => Ok(ReportKind::CapitalGains),
            "PIT" => Ok(ReportKind::Pit),
            _ => Err(()),
        }
    }
}

/// Totals written by a report upsert; missing values are stored as zero
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportTotals {
    pub cost: Option<Decimal>,
    pub proceeds: Option<Decimal>,
    pub gain: Option<Decimal>,
}

impl ReportTotals {
    pub fn new(cost: Decimal, proceeds: Decimal, gain: Decimal) -> Self {
        Self {
            cost: Some(cost),
            proceeds: Some(proceeds),
            gain: Some(gain),
        }
    }

    pub fn cost_or_zero(&self) -> Decimal {
        self.cost.unwrap_or(Decimal::ZERO)
    }

    pub fn proceeds_or_zero(&self) -> Decimal {
        self.proceeds.unwrap_or(Decimal::ZERO)
    }

    pub fn gain_or_zero(&self) -> Decimal {
        self.gain.unwrap_or(Decimal::ZERO)
    }
}

/// Stored capital-gains or PIT report, one per (user, tax year) per kind
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaxReport {
    pub id: Option<i64>,
    pub kind: ReportKind,
    pub user_id: String,
    pub tax_year: i32,
    pub cost: Decimal,
    pub proceeds: Decimal,
    pub gain: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn complete_input() -> OrderInput {
        OrderInput {
            external_id: Some("ext-1".to_string()),
            product_id: Some("BTC-USD".to_string()),
            side: Some("BUY".to_string()),
            status: Some("FILLED".to_string()),
            occurred_at: Some(Utc.with_ymd_and_hms(2024, 5, 18, 7, 26, 14).unwrap()),
            quantity: Some(dec!(1.23)),
            price: Some(dec!(0.50)),
            fee: Some(dec!(0.01)),
            total: Some(dec!(0.61)),
        }
    }

    #[test]
    fn test_side_parsing_is_case_insensitive() {
        assert_eq!("buy".parse::<OrderSide>(), Ok(OrderSide::Buy));
        assert_eq!(" SELL ".parse::<OrderSide>(), Ok(OrderSide::Sell));
        assert!("HOLD".parse::<OrderSide>().is_err());
    }

    #[test]
    fn test_complete_input_validates() {
        let order = complete_input().validated().unwrap();
        assert_eq!(order.external_id, "ext-1");
        assert_eq!(order.quantity, Some(dec!(1.23)));
    }

    #[test]
    fn test_missing_required_fields_rejected() {
        let mut input = complete_input();
        input.external_id = None;
        assert!(input.validated().is_none());

        let mut input = complete_input();
        input.status = Some("  ".to_string());
        assert!(input.validated().is_none());

        let mut input = complete_input();
        input.occurred_at = None;
        assert!(input.validated().is_none());
    }

    #[test]
    fn test_optional_amounts_may_be_missing() {
        let mut input = complete_input();
        input.price = None;
        input.fee = None;
        input.total = None;
        assert!(input.validated().is_some());
    }

    #[test]
    fn test_report_kind_round_trips_through_str() {
        for kind in [ReportKind::CapitalGains, ReportKind::Pit] {
            assert_eq!(kind.as_str().parse::<ReportKind>(), Ok(kind));
        }
    }
}
