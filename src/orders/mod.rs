// Orders module - deduplicating ingestion of broker order payloads

pub mod sync;

use anyhow::Result;
use itertools::Itertools;
use serde::Serialize;
use tracing::{debug, info};

use crate::db::{OrderInput, OrderStore};
use crate::error::require_user_id;
use crate::utils::tax_year;

pub use sync::{sync_orders, JsonFileSource, OrderSource};

/// Result of one ingestion batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    pub inserted: usize,
    pub duplicates: usize,
    pub invalid: usize,
    /// Distinct tax years of the newly stored orders, ascending
    pub tax_years: Vec<i32>,
}

impl IngestOutcome {
    pub fn has_changes(&self) -> bool {
        self.inserted > 0
    }
}

pub struct OrderIngestor<'a, S: OrderStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: OrderStore + ?Sized> OrderIngestor<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Persist every complete, not-yet-known order of `user_id`.
    ///
    /// Incomplete payloads and already stored external ids are skipped.
    /// A blank user id is rejected before anything is written.
    pub fn ingest(&self, user_id: &str, orders: &[OrderInput]) -> Result<IngestOutcome> {
        require_user_id(user_id)?;

        let mut outcome = IngestOutcome::default();
        let mut years = Vec::new();

        for input in orders {
            let Some(order) = input.validated() else {
                debug!("Skipping incomplete order payload {:?}", input.external_id);
                outcome.invalid += 1;
                continue;
            };

            if self.store.contains(user_id, &order.external_id)? {
                outcome.duplicates += 1;
                continue;
            }

            // A concurrent ingest may have won the race since the check above
            if self.store.insert(user_id, &order)? {
                outcome.inserted += 1;
                years.push(tax_year(order.occurred_at));
            } else {
                outcome.duplicates += 1;
            }
        }

        outcome.tax_years = years.into_iter().sorted().dedup().collect();

        info!(
            "Ingested orders for {}: {} new, {} duplicate, {} invalid, years {:?}",
            user_id, outcome.inserted, outcome.duplicates, outcome.invalid, outcome.tax_years
        );
        Ok(outcome)
    }
}
