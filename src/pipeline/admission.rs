//! Resource-budget admission: how many engine workers a run may use.
//!
//! Admission is a pure function of the request. Under
//! [`AdmissionPolicy::Budgeted`] the worker count is
//! `max(1, min(concurrency, total_budget / per_worker_cost))` and the run is
//! rejected when the budget cannot fund one worker. Under
//! [`AdmissionPolicy::Unbudgeted`] the requested concurrency is used as-is.

use crate::config::{AdmissionPolicy, PipelineConfig};
use crate::error::AdmissionError;
use tracing::debug;

/// The quantities admission is decided from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceBudget {
    /// Total accelerator memory granted to the run, in MB.
    pub total_budget: u64,
    /// Cost of one engine worker, in MB.
    pub per_worker_cost: u64,
    /// Pages the caller would like in flight.
    pub requested_concurrency: usize,
}

impl ResourceBudget {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            total_budget: config.total_budget_mb,
            per_worker_cost: config.per_worker_mb,
            requested_concurrency: config.concurrency,
        }
    }
}

/// Decide the admitted worker count, or reject the run.
pub fn admit(budget: &ResourceBudget, policy: AdmissionPolicy) -> Result<usize, AdmissionError> {
    if budget.requested_concurrency == 0 {
        return Err(AdmissionError::InvalidBudget(
            "requested concurrency must be at least 1".into(),
        ));
    }

    let allowed = match policy {
        AdmissionPolicy::Unbudgeted => budget.requested_concurrency,
        AdmissionPolicy::Budgeted => {
            if budget.per_worker_cost == 0 {
                return Err(AdmissionError::InvalidBudget(
                    "per-worker cost must be at least 1".into(),
                ));
            }
            let funded = budget.total_budget / budget.per_worker_cost;
            if funded < 1 {
                return Err(AdmissionError::InsufficientBudget {
                    total_budget: budget.total_budget,
                    per_worker_cost: budget.per_worker_cost,
                });
            }
            usize::try_from(funded).unwrap_or(usize::MAX)
        }
    };

    let workers = budget.requested_concurrency.min(allowed).max(1);
    debug!(
        "Admitted {} worker(s) (policy {:?}, budget {} / cost {}, requested {})",
        workers, policy, budget.total_budget, budget.per_worker_cost, budget.requested_concurrency
    );
    Ok(workers)
}
