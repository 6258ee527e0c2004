//! Default sweep hooks
//!
//! Log-only notifier and expiry hook, plus an expiry hook that moves lapsed
//! domains onto parking nameservers through the provisioning engine.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::engine::{DomainUpdate, ProvisioningEngine};
use crate::model::{ACTOR_SYSTEM_ID, ServiceRecord};
use crate::traits::{BackofficeStore, ExpiryHook, Notifier};

/// Notifier that only writes reminders to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn expiry_reminder(&self, service: &ServiceRecord, days_left: i64) -> crate::Result<()> {
        info!(
            "Reminder: service {} ({}) of user {} expires in {} day(s)",
            service.id,
            service.name(),
            service.user_id,
            days_left
        );
        Ok(())
    }
}

/// Expiry hook that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct LogExpiryHook;

#[async_trait]
impl ExpiryHook for LogExpiryHook {
    async fn on_grace_period(&self, service: &ServiceRecord) -> crate::Result<()> {
        info!(
            "Grace period reached for domain service {} ({})",
            service.id,
            service.name()
        );
        Ok(())
    }
}

/// Expiry hook pointing lapsed domains at parking nameservers
pub struct ParkingNameservers<S: BackofficeStore> {
    engine: Arc<ProvisioningEngine<S>>,
    nameservers: Vec<String>,
}

impl<S: BackofficeStore> ParkingNameservers<S> {
    pub fn new(engine: Arc<ProvisioningEngine<S>>, nameservers: Vec<String>) -> Self {
        Self {
            engine,
            nameservers,
        }
    }
}

#[async_trait]
impl<S: BackofficeStore> ExpiryHook for ParkingNameservers<S> {
    async fn on_grace_period(&self, service: &ServiceRecord) -> crate::Result<()> {
        info!(
            "Parking {} on {}",
            service.name(),
            self.nameservers.join(", ")
        );
        self.engine
            .apply_domain_update(
                service.id,
                DomainUpdate::Nameservers(self.nameservers.clone()),
                ACTOR_SYSTEM_ID,
            )
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ServiceData, ServiceStatus};
    use chrono::Utc;

    fn service() -> ServiceRecord {
        ServiceRecord {
            id: 7,
            user_id: 3,
            provider_id: Some(1),
            order_id: Some(11),
            service_type: "domain".into(),
            status: ServiceStatus::Active,
            config: ServiceData {
                domain: Some("lapsed.test".into()),
                ..ServiceData::default()
            },
            service_name: None,
            registered_at: None,
            expires_at: Some(Utc::now()),
            updated_at: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn log_hooks_never_fail() {
        let service = service();
        assert_eq!(service.name(), "lapsed.test");
        assert!(LogNotifier.expiry_reminder(&service, 3).await.is_ok());
        assert!(LogExpiryHook.on_grace_period(&service).await.is_ok());
    }
}
