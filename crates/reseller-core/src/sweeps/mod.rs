//! Reconciliation sweeps
//!
//! Two independent batch jobs meant to run from a scheduler:
//! - [`RenewalSweep`]: reminders, renewal orders and expiry for services
//! - [`RetrySweep`]: re-attempts provisioning of recently failed orders
//!
//! Both can run concurrently with each other and with the orchestrator; every
//! write they make is a single guarded store operation.

mod hooks;
mod renewal;
mod retry;

pub use hooks::{LogExpiryHook, LogNotifier, ParkingNameservers};
pub use renewal::{RenewalReport, RenewalSweep};
pub use retry::{RetryReport, RetrySweep};

use chrono::{DateTime, Utc};

/// Whole days from `now` until `expires_at`, negative once passed
///
/// Partial days are truncated toward zero.
pub fn days_until(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (expires_at - now).num_days()
}
