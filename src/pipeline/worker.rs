use anyhow::{anyhow, Result};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{CascadeOutcome, Event, Pipeline, StageFailure};
use crate::db::{OrderStore, ReportStore};
use crate::orders::IngestOutcome;

/// Front door of a running pipeline worker.
///
/// The channel is bounded: `submit` waits while the worker is busy and the
/// queue is full. Dropping every handle lets the worker drain and stop.
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<Event>,
}

impl PipelineHandle {
    pub async fn submit(&self, event: Event) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| anyhow!("Pipeline worker has stopped"))
    }

    /// Submit from synchronous code. Must not be called from an async task.
    pub fn blocking_submit(&self, event: Event) -> Result<()> {
        self.tx
            .blocking_send(event)
            .map_err(|_| anyhow!("Pipeline worker has stopped"))
    }
}

/// Totals over every cascade a worker processed
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerSummary {
    pub cascades: usize,
    pub events_handled: usize,
    pub orders_inserted: usize,
    pub capital_gains_reports: usize,
    pub pit_reports: usize,
    pub ingested: Vec<IngestOutcome>,
    pub failures: Vec<StageFailure>,
}

impl WorkerSummary {
    fn record(&mut self, outcome: CascadeOutcome) {
        self.cascades += 1;
        self.events_handled += outcome.events_handled;
        if let Some(ingested) = outcome.ingested {
            self.orders_inserted += ingested.inserted;
            self.ingested.push(ingested);
        }
        self.capital_gains_reports += outcome.capital_gains_reports.len();
        self.pit_reports += outcome.pit_reports.len();
        self.failures.extend(outcome.failures);
    }
}

/// Run `pipeline` on a blocking task fed by a channel of `capacity` events.
///
/// Submitted events are processed one cascade at a time, in order.
pub fn spawn<S>(
    pipeline: Pipeline<S>,
    capacity: usize,
) -> (PipelineHandle, JoinHandle<WorkerSummary>)
where
    S: OrderStore + ReportStore + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Event>(capacity.max(1));

    let worker = tokio::task::spawn_blocking(move || {
        let mut summary = WorkerSummary::default();
        while let Some(event) = rx.blocking_recv() {
            summary.record(pipeline.process(event));
        }

        if summary.failures.is_empty() {
            info!(
                "Pipeline worker stopped after {} cascades ({} events)",
                summary.cascades, summary.events_handled
            );
        } else {
            warn!(
                "Pipeline worker stopped after {} cascades with {} failed stages",
                summary.cascades,
                summary.failures.len()
            );
        }
        summary
    });

    (PipelineHandle { tx }, worker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, OrderInput};
    use crate::fx::{CurrencyConverter, StaticRates};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn buy(id: &str, year: i32) -> OrderInput {
        OrderInput {
            external_id: Some(id.to_string()),
            product_id: Some("AAA-PLN".to_string()),
            side: Some("BUY".to_string()),
            status: Some("FILLED".to_string()),
            occurred_at: Some(Utc.with_ymd_and_hms(year, 2, 1, 0, 0, 0).unwrap()),
            quantity: Some(dec!(1)),
            price: Some(dec!(10)),
            fee: None,
            total: None,
        }
    }

    fn pipeline() -> Pipeline<MemoryStore> {
        Pipeline::new(
            MemoryStore::new(),
            CurrencyConverter::new(Box::new(StaticRates::new())),
        )
    }

    #[tokio::test]
    async fn test_worker_drains_queue_then_stops() {
        let (handle, worker) = spawn(pipeline(), 1);

        handle
            .submit(Event::NewOrders {
                user_id: "u1".to_string(),
                orders: vec![buy("a", 2023), buy("b", 2024)],
            })
            .await
            .unwrap();
        handle
            .submit(Event::NewOrders {
                user_id: "u1".to_string(),
                orders: vec![buy("a", 2023)],
            })
            .await
            .unwrap();
        drop(handle);

        let summary = worker.await.unwrap();
        assert_eq!(summary.cascades, 2);
        assert_eq!(summary.orders_inserted, 2);
        assert_eq!(summary.capital_gains_reports, 2);
        assert_eq!(summary.pit_reports, 2);
        assert!(summary.failures.is_empty());
    }

    #[test]
    fn test_blocking_submit_from_sync_code() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (handle, worker) = {
            let _guard = runtime.enter();
            spawn(pipeline(), 1)
        };

        handle
            .blocking_submit(Event::NewOrders {
                user_id: "u1".to_string(),
                orders: vec![buy("a", 2024)],
            })
            .unwrap();
        drop(handle);

        let summary = runtime.block_on(worker).unwrap();
        assert_eq!(summary.orders_inserted, 1);
        assert_eq!(summary.pit_reports, 1);
    }

    #[tokio::test]
    async fn test_failed_stage_is_reported_in_summary() {
        let (handle, worker) = spawn(pipeline(), 4);

        handle
            .submit(Event::RecomputeCapitalGains {
                user_id: " ".to_string(),
                tax_year: 2024,
            })
            .await
            .unwrap();
        handle
            .submit(Event::NewOrders {
                user_id: "u2".to_string(),
                orders: vec![buy("a", 2024)],
            })
            .await
            .unwrap();
        drop(handle);

        let summary = worker.await.unwrap();
        assert_eq!(summary.cascades, 2);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].event.name(), "RecomputeCapitalGains");
        assert_eq!(summary.pit_reports, 1);
    }
}
