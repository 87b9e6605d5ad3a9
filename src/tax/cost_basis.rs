use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};

/// An open purchase lot, quantities and costs already in PLN
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lot {
    pub quantity: Decimal,
    pub unit_cost: Decimal,
}

/// Cost basis result for a sale
#[derive(Debug, Clone, PartialEq)]
pub struct SaleMatch {
    /// Cost of the quantity that was covered by open lots
    pub cost: Decimal,
    pub matched_quantity: Decimal,
    /// Quantity sold with no lot behind it; carries zero cost
    pub unmatched_quantity: Decimal,
}

impl SaleMatch {
    pub fn is_fully_matched(&self) -> bool {
        self.unmatched_quantity.is_zero()
    }
}

/// FIFO matcher: one queue of open lots per product, oldest lot consumed first
#[derive(Debug, Default)]
pub struct FifoMatcher {
    lots: HashMap<String, VecDeque<Lot>>,
}

impl FifoMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a purchase lot at the back of the product's queue
    pub fn add_lot(&mut self, product_id: &str, quantity: Decimal, unit_cost: Decimal) {
        if quantity <= Decimal::ZERO {
            return;
        }

        self.lots
            .entry(product_id.to_string())
            .or_default()
            .push_back(Lot {
                quantity,
                unit_cost,
            });
    }

    /// Consume lots oldest-first for a sale of `quantity`.
    ///
    /// Lots that reach zero are removed. Running out of lots is not an
    /// error: the remainder is reported as unmatched.
    pub fn match_sale(&mut self, product_id: &str, quantity: Decimal) -> SaleMatch {
        let mut remaining = quantity.max(Decimal::ZERO);
        let mut cost = Decimal::ZERO;

        if let Some(queue) = self.lots.get_mut(product_id) {
            while remaining > Decimal::ZERO {
                let Some(lot) = queue.front_mut() else {
                    break;
                };

                let taken = remaining.min(lot.quantity);
                cost += taken * lot.unit_cost;
                lot.quantity -= taken;
                remaining -= taken;

                if lot.quantity <= Decimal::ZERO {
                    queue.pop_front();
                }
            }
        }

        SaleMatch {
            cost,
            matched_quantity: quantity.max(Decimal::ZERO) - remaining,
            unmatched_quantity: remaining,
        }
    }

    pub fn remaining_quantity(&self, product_id: &str) -> Decimal {
        self.lots
            .get(product_id)
            .map(|queue| queue.iter().map(|lot| lot.quantity).sum())
            .unwrap_or(Decimal::ZERO)
    }

    pub fn open_lots(&self, product_id: &str) -> usize {
        self.lots.get(product_id).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fifo_consumes_oldest_lot_first() {
        let mut matcher = FifoMatcher::new();
        matcher.add_lot("AAA-PLN", dec!(2), dec!(10));
        matcher.add_lot("AAA-PLN", dec!(1), dec!(12));

        let result = matcher.match_sale("AAA-PLN", dec!(2.5));

        // 2 * 10 + 0.5 * 12
        assert_eq!(result.cost, dec!(26));
        assert!(result.is_fully_matched());
        assert_eq!(matcher.remaining_quantity("AAA-PLN"), dec!(0.5));
        assert_eq!(matcher.open_lots("AAA-PLN"), 1);
    }

    #[test]
    fn test_exhausted_lot_is_removed() {
        let mut matcher = FifoMatcher::new();
        matcher.add_lot("BTC-USD", dec!(1), dec!(100));

        let result = matcher.match_sale("BTC-USD", dec!(1));
        assert_eq!(result.cost, dec!(100));
        assert_eq!(matcher.open_lots("BTC-USD"), 0);
    }

    #[test]
    fn test_oversell_reports_unmatched_remainder() {
        let mut matcher = FifoMatcher::new();
        matcher.add_lot("BTC-USD", dec!(1), dec!(100));

        let result = matcher.match_sale("BTC-USD", dec!(3));
        assert_eq!(result.cost, dec!(100));
        assert_eq!(result.matched_quantity, dec!(1));
        assert_eq!(result.unmatched_quantity, dec!(2));
        assert!(!result.is_fully_matched());
    }

    #[test]
    fn test_products_have_separate_queues() {
        let mut matcher = FifoMatcher::new();
        matcher.add_lot("BTC-USD", dec!(1), dec!(100));

        let result = matcher.match_sale("ETH-USD", dec!(1));
        assert_eq!(result.cost, Decimal::ZERO);
        assert_eq!(result.unmatched_quantity, dec!(1));
        assert_eq!(matcher.remaining_quantity("BTC-USD"), dec!(1));
    }

    #[test]
    fn test_non_positive_lot_ignored() {
        let mut matcher = FifoMatcher::new();
        matcher.add_lot("BTC-USD", dec!(0), dec!(100));
        matcher.add_lot("BTC-USD", dec!(-1), dec!(100));
        assert_eq!(matcher.open_lots("BTC-USD"), 0);
    }
}
