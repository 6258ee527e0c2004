// # Sweep Side-effect Traits
//
// Customer notification and expiry policy are delegated to these seams so
// the renewal sweep itself only decides *when* something happens.

use async_trait::async_trait;

use crate::model::ServiceRecord;

/// Delivers expiry reminders to customers
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Remind the service owner of an upcoming or passed expiry
    ///
    /// # Parameters
    ///
    /// - `service`: The expiring service
    /// - `days_left`: Whole days until expiry, negative once expired
    async fn expiry_reminder(&self, service: &ServiceRecord, days_left: i64) -> crate::Result<()>;
}

/// Registry-side policy applied once a domain passes its expiry date
#[async_trait]
pub trait ExpiryHook: Send + Sync {
    /// Called for a domain service on the grace-period day
    async fn on_grace_period(&self, service: &ServiceRecord) -> crate::Result<()>;
}
