//! Recompute cascade
//!
//! New orders flow through typed events:
//! `NewOrders` → `OrdersChanged` → `RecomputeCapitalGains` (one per year)
//! → `CapitalGainsReportUpdated` → PIT report.
//!
//! Each handler returns its follow-up events instead of publishing them.
//! [`Pipeline::process`] drains them from a local FIFO queue, so one failing
//! stage never stops the other queued events.

pub mod locks;
pub mod worker;

use anyhow::Result;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, error, info};

use crate::db::{OrderInput, OrderStore, ReportStore, TaxReport};
use crate::error::require_user_id;
use crate::fx::CurrencyConverter;
use crate::orders::{IngestOutcome, OrderIngestor};
use crate::tax::{capital_gains, pit};

pub use locks::RecomputeLocks;
pub use worker::{PipelineHandle, WorkerSummary};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    NewOrders {
        user_id: String,
        orders: Vec<OrderInput>,
    },
    OrdersChanged {
        user_id: String,
        tax_years: Vec<i32>,
    },
    RecomputeCapitalGains {
        user_id: String,
        tax_year: i32,
    },
    CapitalGainsReportUpdated {
        user_id: String,
        tax_year: i32,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::NewOrders { .. } => "NewOrders",
            Event::OrdersChanged { .. } => "OrdersChanged",
            Event::RecomputeCapitalGains { .. } => "RecomputeCapitalGains",
            Event::CapitalGainsReportUpdated { .. } => "CapitalGainsReportUpdated",
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            Event::NewOrders { user_id, .. }
            | Event::OrdersChanged { user_id, .. }
            | Event::RecomputeCapitalGains { user_id, .. }
            | Event::CapitalGainsReportUpdated { user_id, .. } => user_id,
        }
    }
}

/// What a single stage did
#[derive(Debug, Clone, PartialEq)]
pub enum StageEffect {
    Ingested(IngestOutcome),
    FannedOut(usize),
    CapitalGainsReport(TaxReport),
    PitReport(TaxReport),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageResult {
    pub effect: StageEffect,
    pub follow_ups: Vec<Event>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageFailure {
    pub event: Event,
    pub error: String,
}

/// Everything that happened while draining one submitted event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CascadeOutcome {
    pub ingested: Option<IngestOutcome>,
    pub capital_gains_reports: Vec<TaxReport>,
    pub pit_reports: Vec<TaxReport>,
    pub failures: Vec<StageFailure>,
    pub events_handled: usize,
}

impl CascadeOutcome {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, effect: StageEffect) {
        match effect {
            StageEffect::Ingested(outcome) => self.ingested = Some(outcome),
            StageEffect::FannedOut(_) => {}
            StageEffect::CapitalGainsReport(report) => self.capital_gains_reports.push(report),
            StageEffect::PitReport(report) => self.pit_reports.push(report),
        }
    }
}

/// Stage handlers over one store and one currency converter
pub struct Pipeline<S> {
    store: S,
    converter: CurrencyConverter,
    locks: RecomputeLocks,
}

impl<S> Pipeline<S>
where
    S: OrderStore + ReportStore,
{
    pub fn new(store: S, converter: CurrencyConverter) -> Self {
        Self::with_locks(store, converter, RecomputeLocks::new())
    }

    /// Share per-key locks with other pipelines running on other threads
    pub fn with_locks(store: S, converter: CurrencyConverter, locks: RecomputeLocks) -> Self {
        Self {
            store,
            converter,
            locks,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn converter(&self) -> &CurrencyConverter {
        &self.converter
    }

    pub fn locks(&self) -> &RecomputeLocks {
        &self.locks
    }

    /// Handle a single event, returning its effect and follow-up events
    pub fn handle(&self, event: &Event) -> Result<StageResult> {
        require_user_id(event.user_id())?;

        match event {
            Event::NewOrders { user_id, orders } => {
                let outcome = OrderIngestor::new(&self.store).ingest(user_id, orders)?;
                let follow_ups = if outcome.tax_years.is_empty() {
                    Vec::new()
                } else {
                    vec![Event::OrdersChanged {
                        user_id: user_id.clone(),
                        tax_years: outcome.tax_years.clone(),
                    }]
                };
                Ok(StageResult {
                    effect: StageEffect::Ingested(outcome),
                    follow_ups,
                })
            }
            Event::OrdersChanged { user_id, tax_years } => {
                let mut years = tax_years.clone();
                years.sort_unstable();
                years.dedup();

                let follow_ups: Vec<Event> = years
                    .into_iter()
                    .map(|tax_year| Event::RecomputeCapitalGains {
                        user_id: user_id.clone(),
                        tax_year,
                    })
                    .collect();
                Ok(StageResult {
                    effect: StageEffect::FannedOut(follow_ups.len()),
                    follow_ups,
                })
            }
            Event::RecomputeCapitalGains { user_id, tax_year } => {
                let report = self.locks.with_key(user_id, *tax_year, || {
                    capital_gains::generate_report(&self.store, &self.converter, user_id, *tax_year)
                })?;
                Ok(StageResult {
                    effect: StageEffect::CapitalGainsReport(report),
                    follow_ups: vec![Event::CapitalGainsReportUpdated {
                        user_id: user_id.clone(),
                        tax_year: *tax_year,
                    }],
                })
            }
            Event::CapitalGainsReportUpdated { user_id, tax_year } => {
                let report = self.locks.with_key(user_id, *tax_year, || {
                    pit::generate_report(&self.store, &self.converter, user_id, *tax_year)
                })?;
                Ok(StageResult {
                    effect: StageEffect::PitReport(report),
                    follow_ups: Vec::new(),
                })
            }
        }
    }

    /// Run `event` and every follow-up it causes to completion.
    ///
    /// Failures are logged and collected; they never abort the queue.
    pub fn process(&self, event: Event) -> CascadeOutcome {
        let mut outcome = CascadeOutcome::default();
        let mut queue = VecDeque::from([event]);

        while let Some(event) = queue.pop_front() {
            outcome.events_handled += 1;
            debug!("Handling {} for {}", event.name(), event.user_id());

            match self.handle(&event) {
                Ok(result) => {
                    outcome.record(result.effect);
                    queue.extend(result.follow_ups);
                }
                Err(e) => {
                    error!("{} for {} failed: {:#}", event.name(), event.user_id(), e);
                    outcome.failures.push(StageFailure {
                        event,
                        error: format!("{:#}", e),
                    });
                }
            }
        }

        info!(
            "Cascade finished: {} events, {} capital gains reports, {} PIT reports, {} failures",
            outcome.events_handled,
            outcome.capital_gains_reports.len(),
            outcome.pit_reports.len(),
            outcome.failures.len()
        );
        outcome
    }

    /// Re-run the capital-gains and PIT stages for `tax_years`
    pub fn recompute(&self, user_id: &str, tax_years: &[i32]) -> CascadeOutcome {
        self.process(Event::OrdersChanged {
            user_id: user_id.to_string(),
            tax_years: tax_years.to_vec(),
        })
    }
}
