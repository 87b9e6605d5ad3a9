//! In-process store for embedding and tests.
//!
//! Same contracts as the SQLite store: orders unique per `(user_id, external_id)`,
//! reports unique per `(user_id, tax_year)` and overwritten atomically under one lock.

use anyhow::Result;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::models::{
    NewOrder, OrderSnapshot, ReportKind, ReportTotals, StoredOrder, TaxReport,
};
use super::{OrderStore, OrdersProvider, ReportStore};

#[derive(Default)]
struct Inner {
    orders: Vec<StoredOrder>,
    reports: HashMap<ReportKind, BTreeMap<(String, i32), TaxReport>>,
    next_order_id: i64,
    next_report_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn order_count(&self) -> usize {
        self.lock().orders.len()
    }
}

impl OrdersProvider for MemoryStore {
    fn orders_for_user(&self, user_id: &str) -> Result<Vec<OrderSnapshot>> {
        Ok(OrderStore::list(self, user_id)?
            .iter()
            .map(StoredOrder::snapshot)
            .collect())
    }
}

impl OrderStore for MemoryStore {
    fn contains(&self, user_id: &str, external_id: &str) -> Result<bool> {
        Ok(self
            .lock()
            .orders
            .iter()
            .any(|o| o.user_id == user_id && o.external_id == external_id))
    }

    fn insert(&self, user_id: &str, order: &NewOrder) -> Result<bool> {
        let mut inner = self.lock();
        if inner
            .orders
            .iter()
            .any(|o| o.user_id == user_id && o.external_id == order.external_id)
        {
            return Ok(false);
        }

        inner.next_order_id += 1;
        let id = inner.next_order_id;
        inner.orders.push(StoredOrder {
            id: Some(id),
            user_id: user_id.to_string(),
            external_id: order.external_id.clone(),
            product_id: order.product_id.clone(),
            side: order.side.clone(),
            status: order.status.clone(),
            occurred_at: order.occurred_at,
            quantity: order.quantity,
            price: order.price,
            fee: order.fee,
            total: order.total,
            created_at: Utc::now(),
        });
        Ok(true)
    }

    fn list(&self, user_id: &str) -> Result<Vec<StoredOrder>> {
        let mut orders: Vec<StoredOrder> = self
            .lock()
            .orders
            .iter()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at).then(b.id.cmp(&a.id)));
        Ok(orders)
    }
}

impl ReportStore for MemoryStore {
    fn find(&self, kind: ReportKind, user_id: &str, tax_year: i32) -> Result<Option<TaxReport>> {
        Ok(self
            .lock()
            .reports
            .get(&kind)
            .and_then(|by_key| by_key.get(&(user_id.to_string(), tax_year)))
            .cloned())
    }

    fn upsert(
        &self,
        kind: ReportKind,
        user_id: &str,
        tax_year: i32,
        totals: &ReportTotals,
    ) -> Result<TaxReport> {
        let mut inner = self.lock();
        let now = Utc::now();
        let next_id = inner.next_report_id + 1;

        let by_key = inner.reports.entry(kind).or_default();
        let created = !by_key.contains_key(&(user_id.to_string(), tax_year));
        let report = by_key
            .entry((user_id.to_string(), tax_year))
            .or_insert_with(|| TaxReport {
                id: Some(next_id),
                kind,
                user_id: user_id.to_string(),
                tax_year,
                cost: totals.cost_or_zero(),
                proceeds: totals.proceeds_or_zero(),
                gain: totals.gain_or_zero(),
                created_at: now,
                updated_at: now,
            });

        report.cost = totals.cost_or_zero();
        report.proceeds = totals.proceeds_or_zero();
        report.gain = totals.gain_or_zero();
        report.updated_at = now;
        let stored = report.clone();

        if created {
            inner.next_report_id = next_id;
        }
        Ok(stored)
    }

    fn list(&self, kind: ReportKind, user_id: &str) -> Result<Vec<TaxReport>> {
        Ok(self
            .lock()
            .reports
            .get(&kind)
            .map(|by_key| {
                by_key
                    .values()
                    .filter(|r| r.user_id == user_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_duplicate_external_id_ignored() {
        let store = MemoryStore::new();
        let order = NewOrder {
            external_id: "ext-1".to_string(),
            product_id: "BTC-USD".to_string(),
            side: "BUY".to_string(),
            status: "FILLED".to_string(),
            occurred_at: Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
            quantity: Some(dec!(1)),
            price: None,
            fee: None,
            total: None,
        };

        assert!(store.insert("u1", &order).unwrap());
        assert!(!store.insert("u1", &order).unwrap());
        assert_eq!(store.order_count(), 1);
    }

    #[test]
    fn test_upsert_keeps_identity() {
        let store = MemoryStore::new();
        let a = store
            .upsert(ReportKind::Pit, "u1", 2024, &ReportTotals::new(dec!(1), dec!(2), dec!(1)))
            .unwrap();
        let b = store
            .upsert(ReportKind::Pit, "u1", 2024, &ReportTotals::new(dec!(3), dec!(3), dec!(0)))
            .unwrap();
        let c = store
            .upsert(ReportKind::Pit, "u1", 2025, &ReportTotals::default())
            .unwrap();

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.created_at, b.created_at);
        assert_eq!(b.cost, dec!(3));
        assert_eq!(ReportStore::list(&store, ReportKind::Pit, "u1").unwrap().len(), 2);
    }
}
