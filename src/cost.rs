use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, VideogenError};

/// One recorded charge against an external service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEntry {
    pub service: String,
    pub operation: String,
    pub amount_usd: f64,
    pub metadata: Value,
    pub timestamp: DateTime<Utc>,
}

/// Subtotal for one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCost {
    pub service: String,
    pub amount_usd: f64,
}

/// Snapshot of the tracker for reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub total_usd: f64,
    pub budget_usd: f64,
    pub over_budget: bool,
    pub by_service: Vec<ServiceCost>,
}

/// Append-only ledger of spend with a soft ceiling.
///
/// Going over the ceiling only logs a warning. Entries are never removed;
/// a correction is a compensating (negative) entry.
#[derive(Debug, Clone)]
pub struct CostTracker {
    budget_usd: f64,
    entries: Vec<CostEntry>,
}

impl CostTracker {
    pub fn new(budget_usd: f64) -> Self {
        Self {
            budget_usd,
            entries: Vec::new(),
        }
    }

    pub fn budget(&self) -> f64 {
        self.budget_usd
    }

    /// Record a charge. Rejects NaN and infinite amounts.
    pub fn add_call(
        &mut self,
        service: &str,
        operation: &str,
        amount_usd: f64,
        metadata: Value,
    ) -> Result<()> {
        if !amount_usd.is_finite() {
            return Err(VideogenError::InvalidCost {
                service: service.to_string(),
                operation: operation.to_string(),
                amount: amount_usd,
            });
        }

        self.entries.push(CostEntry {
            service: service.to_string(),
            operation: operation.to_string(),
            amount_usd,
            metadata,
            timestamp: Utc::now(),
        });

        let total = self.total();
        debug!(service, operation, amount_usd, total_usd = total, "cost recorded");
        if total > self.budget_usd {
            warn!(
                total_usd = %format!("{total:.2}"),
                budget_usd = %format!("{:.2}", self.budget_usd),
                service,
                operation,
                "cost over budget"
            );
        }
        Ok(())
    }

    pub fn total(&self) -> f64 {
        self.entries.iter().map(|e| e.amount_usd).sum()
    }

    pub fn is_over_budget(&self) -> bool {
        self.total() > self.budget_usd
    }

    /// Subtotals per service, in order of each service's first entry.
    pub fn by_service(&self) -> Vec<ServiceCost> {
        let mut subtotals: Vec<ServiceCost> = Vec::new();
        for entry in &self.entries {
            match subtotals.iter_mut().find(|s| s.service == entry.service) {
                Some(subtotal) => subtotal.amount_usd += entry.amount_usd,
                None => subtotals.push(ServiceCost {
                    service: entry.service.clone(),
                    amount_usd: entry.amount_usd,
                }),
            }
        }
        subtotals
    }

    pub fn entries(&self) -> &[CostEntry] {
        &self.entries
    }

    pub fn summary(&self) -> CostSummary {
        CostSummary {
            total_usd: self.total(),
            budget_usd: self.budget_usd,
            over_budget: self.is_over_budget(),
            by_service: self.by_service(),
        }
    }
}
