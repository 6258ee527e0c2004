//! Retry sweep
//!
//! Re-runs the orchestrator for `failed` orders created inside the trailing
//! window, and for orders whose `provisioning` claim outlived the engine's
//! claim lease. Each order carries its own attempt bookkeeping in
//! `service_data.provisioning`; the sweep honours it so a persistently broken
//! order is retried a bounded number of times with growing gaps.
//!
//! Orders only reach `failed` when the engine runs with
//! `mark_failed_orders`; without it the sweep sees abandoned claims alone.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::RetryPolicy;
use crate::engine::ProvisioningEngine;
use crate::error::{ErrorKind, Result};
use crate::model::{ACTOR_SYSTEM_ID, OrderRecord};
use crate::traits::BackofficeStore;

/// Counters from one retry sweep run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryReport {
    /// Failed orders inside the window plus abandoned claims
    pub considered: usize,
    pub retried: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_exhausted: usize,
    pub skipped_non_retryable: usize,
    pub skipped_backoff: usize,
    pub skipped_no_invoice: usize,
}

/// Why an order was left alone this run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Skip {
    Exhausted,
    NonRetryable,
    Backoff,
    NoInvoice,
}

/// Re-attempts provisioning of recently failed orders
pub struct RetrySweep<S: BackofficeStore> {
    engine: Arc<ProvisioningEngine<S>>,
    policy: RetryPolicy,
}

impl<S: BackofficeStore> RetrySweep<S> {
    /// Create a retry sweep
    ///
    /// # Parameters
    ///
    /// - `engine`: Orchestrator used for each retry
    /// - `policy`: Window, attempt cap and backoff
    pub fn new(engine: Arc<ProvisioningEngine<S>>, policy: RetryPolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self { engine, policy })
    }

    /// Run the sweep against the current time
    pub async fn run(&self) -> Result<RetryReport> {
        self.run_at(Utc::now()).await
    }

    /// Run the sweep as if the current time were `now`
    ///
    /// Orders are retried one after another, oldest first. A failed retry is
    /// counted and the sweep moves on.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<RetryReport> {
        let cutoff = now
            .checked_sub_signed(Duration::days(i64::from(self.policy.window_days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let lease = Duration::seconds(
            i64::try_from(self.engine.config().claim_lease_secs).unwrap_or(i64::from(u32::MAX)),
        );
        let mut orders = self.engine.store().failed_orders_since(cutoff).await?;
        orders.extend(self.engine.store().stale_claims(now - lease).await?);
        let mut report = RetryReport {
            considered: orders.len(),
            ..Default::default()
        };

        for order in &orders {
            let invoice_id = match self.eligibility(order, now) {
                Ok(invoice_id) => invoice_id,
                Err(skip) => {
                    debug!("Skipping order {}: {:?}", order.id, skip);
                    match skip {
                        Skip::Exhausted => report.skipped_exhausted += 1,
                        Skip::NonRetryable => report.skipped_non_retryable += 1,
                        Skip::Backoff => report.skipped_backoff += 1,
                        Skip::NoInvoice => report.skipped_no_invoice += 1,
                    }
                    continue;
                }
            };

            report.retried += 1;
            match self
                .engine
                .provision_service(invoice_id, ACTOR_SYSTEM_ID)
                .await
            {
                Ok(outcome) => {
                    info!(
                        "Retry of order {} succeeded ({})",
                        order.id, outcome.service_name
                    );
                    report.succeeded += 1;
                }
                Err(e) => {
                    warn!("Retry of order {} failed: {}", order.id, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Retry sweep: {} considered, {} retried, {} succeeded, {} failed",
            report.considered, report.retried, report.succeeded, report.failed
        );
        Ok(report)
    }

    fn eligibility(&self, order: &OrderRecord, now: DateTime<Utc>) -> std::result::Result<i64, Skip> {
        let state = order.service_data.provisioning.clone().unwrap_or_default();

        if state.attempts >= self.policy.max_attempts {
            return Err(Skip::Exhausted);
        }

        // Kinds written by other versions are not known here; retry them.
        if let Some(kind) = state.last_error_kind.as_deref().and_then(ErrorKind::parse)
            && !kind.is_retryable()
        {
            return Err(Skip::NonRetryable);
        }

        if let Some(last) = state.last_attempt_at {
            let wait = Duration::seconds(
                i64::try_from(self.policy.backoff_secs(state.attempts)).unwrap_or(i64::from(u32::MAX)),
            );
            if last + wait > now {
                return Err(Skip::Backoff);
            }
        }

        order.invoice_id.ok_or(Skip::NoInvoice)
    }
}
