//! Renewal sweep
//!
//! For each service with an expiry date and status `active` or `expired`:
//!
//! | days to expiry | action |
//! |---|---|
//! | in `reminder_days` | expiry reminder through the [`Notifier`] |
//! | `renewal_order_days` | pending renewal order, unless one already references the service |
//! | `grace_hook_days` (domains) | [`ExpiryHook::on_grace_period`] |
//! | below `-expire_after_days` and still `active` | status → `expired` |
//!
//! Running the sweep twice in a row creates no second renewal order and no
//! second expiry event.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::days_until;
use crate::config::RenewalConfig;
use crate::directory::RegistryDirectory;
use crate::error::Result;
use crate::model::{
    ACTOR_SYSTEM_ID, NewOrder, OrderStatus, ServiceData, ServiceLogEntry, ServiceRecord, ServiceStatus, events,
};
use crate::traits::{BackofficeStore, ExpiryHook, Notifier};

/// Counters from one renewal sweep run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenewalReport {
    pub scanned: usize,
    pub reminders_sent: usize,
    pub renewal_orders_created: usize,
    pub grace_hooks_run: usize,
    pub expired: usize,
    pub errors: usize,
}

/// Scans expiring services and raises reminders, renewal orders and expiry
pub struct RenewalSweep<S: BackofficeStore> {
    store: Arc<S>,
    notifier: Arc<dyn Notifier>,
    hook: Arc<dyn ExpiryHook>,
    config: RenewalConfig,
}

impl<S: BackofficeStore> RenewalSweep<S> {
    /// Create a renewal sweep
    ///
    /// # Parameters
    ///
    /// - `store`: Back-office store
    /// - `notifier`: Delivers expiry reminders
    /// - `hook`: Policy applied to domains on the grace-period day
    /// - `config`: Thresholds and renewal order defaults
    pub fn new(
        store: Arc<S>,
        notifier: Arc<dyn Notifier>,
        hook: Arc<dyn ExpiryHook>,
        config: RenewalConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            notifier,
            hook,
            config,
        })
    }

    /// Run the sweep against the current time
    pub async fn run(&self) -> Result<RenewalReport> {
        self.run_at(Utc::now()).await
    }

    /// Run the sweep as if the current time were `now`
    ///
    /// # Returns
    ///
    /// - `Ok(RenewalReport)`: Counters; per-service failures are counted, not raised
    /// - `Err(Error)`: If the service scan itself failed
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<RenewalReport> {
        let services = self.store.services_with_expiry().await?;
        let mut report = RenewalReport {
            scanned: services.len(),
            ..Default::default()
        };

        for service in &services {
            let Some(expires_at) = service.expires_at else {
                continue;
            };
            let days = days_until(expires_at, now);
            debug!("Service {} expires in {} day(s)", service.id, days);

            if self.config.reminder_days.contains(&days) {
                match self.notifier.expiry_reminder(service, days).await {
                    Ok(()) => report.reminders_sent += 1,
                    Err(e) => {
                        warn!("Reminder for service {} failed: {}", service.id, e);
                        report.errors += 1;
                    }
                }
            }

            if days == self.config.renewal_order_days {
                match self.raise_renewal_order(service, now).await {
                    Ok(true) => report.renewal_orders_created += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Renewal order for service {} failed: {}", service.id, e);
                        report.errors += 1;
                    }
                }
            }

            if service.service_type == "domain" && days == self.config.grace_hook_days {
                match self.hook.on_grace_period(service).await {
                    Ok(()) => report.grace_hooks_run += 1,
                    Err(e) => {
                        warn!("Expiry hook for service {} failed: {}", service.id, e);
                        report.errors += 1;
                    }
                }
            }

            if days < -self.config.expire_after_days && service.status == ServiceStatus::Active {
                match self.expire(service, now).await {
                    Ok(true) => report.expired += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Expiring service {} failed: {}", service.id, e);
                        report.errors += 1;
                    }
                }
            }
        }

        info!(
            "Renewal sweep: {} scanned, {} reminders, {} renewal orders, {} expired, {} errors",
            report.scanned,
            report.reminders_sent,
            report.renewal_orders_created,
            report.expired,
            report.errors
        );
        Ok(report)
    }

    async fn raise_renewal_order(&self, service: &ServiceRecord, now: DateTime<Utc>) -> Result<bool> {
        let years = self.config.renewal_term_years;
        let amount = match self.renewal_price(service, years).await {
            Some(amount) => amount,
            None => self.config.fallback_price()?,
        };

        let mut service_data = ServiceData {
            service_id: Some(service.id),
            years: Some(years),
            ..Default::default()
        };
        if service.service_type == "domain" {
            service_data.domain = Some(service.name().to_string());
        } else {
            service_data.server = Some(service.name().to_string());
        }

        let order = NewOrder {
            user_id: service.user_id,
            service_type: format!("{}.renew", service.service_type),
            service_data,
            status: OrderStatus::Pending,
            amount_due: amount,
            currency: self.config.fallback_currency.clone(),
            invoice_id: None,
            created_at: now,
        };

        let Some(order_id) = self
            .store
            .create_renewal_order_if_absent(service.id, order)
            .await?
        else {
            debug!("Service {} already has a pending renewal order", service.id);
            return Ok(false);
        };

        info!(
            "Created renewal order {} for service {} ({})",
            order_id,
            service.id,
            service.name()
        );
        self.log(
            service.id,
            events::RENEWAL_ORDER_CREATED,
            format!("Renewal order {} created", order_id),
        )
        .await;
        Ok(true)
    }

    /// Provider renewal price for the service's suffix, if the provider lists one
    async fn renewal_price(&self, service: &ServiceRecord, years: u32) -> Option<Decimal> {
        let provider_id = service.provider_id?;
        let mut tx = self.store.begin().await.ok()?;
        let provider = self.store.provider(&mut tx, provider_id).await;
        if let Err(e) = self.store.rollback(tx).await {
            warn!("Rollback of read transaction failed: {}", e);
        }

        let provider = provider.ok().flatten()?;
        RegistryDirectory::from_providers(vec![provider]).price_for(service.name(), "renew", years)
    }

    async fn expire(&self, service: &ServiceRecord, now: DateTime<Utc>) -> Result<bool> {
        if !self.store.expire_service(service.id, now).await? {
            return Ok(false);
        }
        info!("Service {} ({}) marked as expired", service.id, service.name());
        self.log(service.id, events::SERVICE_EXPIRED, "Service expired".to_string())
            .await;
        Ok(true)
    }

    async fn log(&self, service_id: i64, event: &str, details: String) {
        let entry = ServiceLogEntry::system(service_id, event, ACTOR_SYSTEM_ID, details);
        if let Err(e) = self.store.append_service_log(entry).await {
            warn!("Failed to append {} log entry: {}", event, e);
        }
    }
}
