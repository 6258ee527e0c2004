// # Back-office Store Trait
//
// Defines the persistence interface used by the orchestrator and the sweeps.
//
// ## Transactions
//
// Transactions obtained from `begin` are short. The orchestrator commits its
// order claim in one, talks to the registry with none open, and writes the
// outcome in a second one. Methods taking `&mut Self::Tx` operate inside a
// transaction; nothing they write is visible before `commit` and all of it is
// discarded by `rollback`. Methods without a transaction argument are
// self-contained writes (service-log appends, sweep transitions) and must not
// be called while the same task holds an open transaction.
//
// ## Claims
//
// A claimed order sits in `provisioning` with a claim time. A claim older
// than the caller's lease is abandoned and may be claimed again.
//
// ## Implementations
//
// - In-memory: `store::MemoryStore` (tests, embedding)
// - SQLite: `reseller-store-sqlite` crate

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{
    InvoiceRecord, NewOrder, NewService, OrderRecord, OrderStatus, ProviderRecord, ServiceData,
    ServiceLogEntry, ServiceRecord,
};

/// An order claimed for provisioning inside a transaction
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedOrder {
    /// The order row, already in `provisioning` status
    pub order: OrderRecord,
    /// Status the order had before the claim
    ///
    /// `Provisioning` when an abandoned claim was taken over.
    pub previous_status: OrderStatus,
}

impl ClaimedOrder {
    /// Whether this claim took over from an attempt that never finished
    pub fn recovered(&self) -> bool {
        self.previous_status == OrderStatus::Provisioning
    }
}

/// Persistence backend for orders, invoices, services, providers and logs
#[async_trait]
pub trait BackofficeStore: Send + Sync + 'static {
    /// Open transaction handle
    type Tx: Send;

    /// Begin a transaction
    async fn begin(&self) -> crate::Result<Self::Tx>;

    /// Make every write of the transaction durable
    async fn commit(&self, tx: Self::Tx) -> crate::Result<()>;

    /// Discard every write of the transaction
    async fn rollback(&self, tx: Self::Tx) -> crate::Result<()>;

    /// Claim the order funded by `invoice_id` for provisioning
    ///
    /// Performs the guarded transition `pending|failed → provisioning`,
    /// stamps the claim time and returns the claimed row. An order already in
    /// `provisioning` is eligible only when its claim time is before
    /// `stale_before`. At most one concurrent caller can win the claim for a
    /// given invoice.
    ///
    /// # Parameters
    ///
    /// - `tx`: Transaction the claim is made in
    /// - `invoice_id`: Funding invoice
    /// - `claimed_at`: Claim time to record
    /// - `stale_before`: Claims older than this are abandoned
    ///
    /// # Returns
    ///
    /// - `Ok(Some(ClaimedOrder))`: The order is claimed once `tx` commits
    /// - `Ok(None)`: No order for the invoice is eligible
    async fn claim_order_for_invoice(
        &self,
        tx: &mut Self::Tx,
        invoice_id: i64,
        claimed_at: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> crate::Result<Option<ClaimedOrder>>;

    /// Read an order for update
    async fn lock_order(&self, tx: &mut Self::Tx, order_id: i64)
    -> crate::Result<Option<OrderRecord>>;

    /// Read an invoice
    async fn invoice(
        &self,
        tx: &mut Self::Tx,
        invoice_id: i64,
    ) -> crate::Result<Option<InvoiceRecord>>;

    /// Active providers of a kind, in id order
    async fn active_providers(
        &self,
        tx: &mut Self::Tx,
        kind: &str,
    ) -> crate::Result<Vec<ProviderRecord>>;

    /// Read a provider by id
    async fn provider(
        &self,
        tx: &mut Self::Tx,
        provider_id: i64,
    ) -> crate::Result<Option<ProviderRecord>>;

    /// Service created from an order, if any
    async fn service_for_order(
        &self,
        tx: &mut Self::Tx,
        order_id: i64,
    ) -> crate::Result<Option<ServiceRecord>>;

    /// Read a service by id
    async fn service(
        &self,
        tx: &mut Self::Tx,
        service_id: i64,
    ) -> crate::Result<Option<ServiceRecord>>;

    /// Read a service by resource kind and name
    async fn service_by_name(
        &self,
        tx: &mut Self::Tx,
        service_type: &str,
        service_name: &str,
    ) -> crate::Result<Option<ServiceRecord>>;

    /// Overwrite an order's status and service data
    ///
    /// Leaving `provisioning` clears the claim time.
    async fn update_order(
        &self,
        tx: &mut Self::Tx,
        order_id: i64,
        status: OrderStatus,
        service_data: &ServiceData,
    ) -> crate::Result<()>;

    /// Insert a service row
    ///
    /// # Returns
    ///
    /// The new service id. Fails with `Error::Consistency` when the order
    /// already has a service.
    async fn insert_service(&self, tx: &mut Self::Tx, service: NewService) -> crate::Result<i64>;

    /// Set a service's expiry date
    async fn update_service_expiry(
        &self,
        tx: &mut Self::Tx,
        service_id: i64,
        expires_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> crate::Result<()>;

    /// Overwrite a service's config document
    async fn update_service_config(
        &self,
        tx: &mut Self::Tx,
        service_id: i64,
        config: &ServiceData,
        updated_at: DateTime<Utc>,
    ) -> crate::Result<()>;

    /// Append a service-log entry
    async fn append_service_log(&self, entry: ServiceLogEntry) -> crate::Result<()>;

    /// Services with an expiry date whose status is `active` or `expired`
    async fn services_with_expiry(&self) -> crate::Result<Vec<ServiceRecord>>;

    /// Move an `active` service to `expired`
    ///
    /// # Returns
    ///
    /// `true` if the service changed, `false` if it was not `active`
    async fn expire_service(&self, service_id: i64, now: DateTime<Utc>) -> crate::Result<bool>;

    /// Insert a renewal order unless a pending order already references the service
    ///
    /// # Returns
    ///
    /// - `Ok(Some(order_id))`: The renewal order was created
    /// - `Ok(None)`: A pending order for the service already exists
    async fn create_renewal_order_if_absent(
        &self,
        service_id: i64,
        order: NewOrder,
    ) -> crate::Result<Option<i64>>;

    /// Failed orders created at or after `cutoff`, oldest first
    async fn failed_orders_since(&self, cutoff: DateTime<Utc>) -> crate::Result<Vec<OrderRecord>>;

    /// Orders left in `provisioning` by a claim made before `stale_before`, oldest first
    async fn stale_claims(&self, stale_before: DateTime<Utc>) -> crate::Result<Vec<OrderRecord>>;
}
