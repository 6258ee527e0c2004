// # Memory Back-office Store
//
// In-memory implementation of BackofficeStore.
//
// ## Purpose
//
// Keeps orders, invoices, services, providers and service logs in plain maps.
// Useful for tests and for embedding the engine where another system owns
// the real tables.
//
// ## Transactions
//
// A transaction holds the table lock for its whole lifetime and works on a
// copy of the tables. Commit writes the copy back, rollback drops it. Open
// transactions run one at a time; the orchestrator keeps them short, so
// registry calls of concurrent attempts still overlap.
//
// Claim times live beside the orders, keyed by order id.
//
// Nothing survives a restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{Error, Result};
use crate::model::{
    InvoiceRecord, NewOrder, NewService, OrderRecord, OrderStatus, PaymentStatus, ProviderRecord,
    ServiceData, ServiceLogEntry, ServiceRecord, ServiceStatus,
};
use crate::traits::{BackofficeStore, ClaimedOrder};

#[derive(Debug, Clone, Default)]
struct Tables {
    invoices: BTreeMap<i64, InvoiceRecord>,
    orders: BTreeMap<i64, OrderRecord>,
    services: BTreeMap<i64, ServiceRecord>,
    providers: BTreeMap<i64, ProviderRecord>,
    logs: Vec<ServiceLogEntry>,
    claims: BTreeMap<i64, DateTime<Utc>>,
}

impl Tables {
    fn next_order_id(&self) -> i64 {
        self.orders.keys().next_back().map_or(1, |id| id + 1)
    }

    fn next_service_id(&self) -> i64 {
        self.services.keys().next_back().map_or(1, |id| id + 1)
    }

    fn order_mut(&mut self, order_id: i64) -> Result<&mut OrderRecord> {
        self.orders
            .get_mut(&order_id)
            .ok_or_else(|| Error::consistency(format!("Order {} not found", order_id)))
    }

    /// Whether a `provisioning` order's claim is older than `stale_before`
    ///
    /// A claim without a recorded time counts as abandoned.
    fn claim_is_stale(&self, order_id: i64, stale_before: DateTime<Utc>) -> bool {
        self.claims
            .get(&order_id)
            .is_none_or(|claimed_at| *claimed_at < stale_before)
    }

    fn service_mut(&mut self, service_id: i64) -> Result<&mut ServiceRecord> {
        self.services
            .get_mut(&service_id)
            .ok_or_else(|| Error::consistency(format!("Service {} not found", service_id)))
    }
}

/// Open transaction on a [`MemoryStore`]
pub struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

/// In-memory back-office store
///
/// # Example
///
/// ```rust,no_run
/// use reseller_core::store::MemoryStore;
/// use reseller_core::traits::BackofficeStore;
///
/// #[tokio::main]
/// async fn main() -> reseller_core::Result<()> {
///     let store = MemoryStore::new();
///     let mut tx = store.begin().await?;
///     let providers = store.active_providers(&mut tx, "domain").await?;
///     assert!(providers.is_empty());
///     store.rollback(tx).await
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an invoice row
    pub async fn seed_invoice(&self, invoice: InvoiceRecord) {
        self.inner.lock().await.invoices.insert(invoice.id, invoice);
    }

    pub async fn seed_order(&self, order: OrderRecord) {
        self.inner.lock().await.orders.insert(order.id, order);
    }

    pub async fn seed_provider(&self, provider: ProviderRecord) {
        self.inner.lock().await.providers.insert(provider.id, provider);
    }

    pub async fn seed_service(&self, service: ServiceRecord) {
        self.inner.lock().await.services.insert(service.id, service);
    }

    /// Change an invoice's payment status
    pub async fn set_payment_status(&self, invoice_id: i64, status: PaymentStatus) {
        if let Some(invoice) = self.inner.lock().await.invoices.get_mut(&invoice_id) {
            invoice.payment_status = status;
        }
    }

    /// Claim time of an order in `provisioning`
    pub async fn claimed_at(&self, order_id: i64) -> Option<DateTime<Utc>> {
        self.inner.lock().await.claims.get(&order_id).copied()
    }

    /// Record a claim time, as a crashed attempt would have left it
    pub async fn seed_claim(&self, order_id: i64, claimed_at: DateTime<Utc>) {
        self.inner.lock().await.claims.insert(order_id, claimed_at);
    }

    pub async fn order(&self, order_id: i64) -> Option<OrderRecord> {
        self.inner.lock().await.orders.get(&order_id).cloned()
    }

    /// All orders in id order
    pub async fn orders(&self) -> Vec<OrderRecord> {
        self.inner.lock().await.orders.values().cloned().collect()
    }

    /// All services in id order
    pub async fn services(&self) -> Vec<ServiceRecord> {
        self.inner.lock().await.services.values().cloned().collect()
    }

    /// Service log in append order
    pub async fn logs(&self) -> Vec<ServiceLogEntry> {
        self.inner.lock().await.logs.clone()
    }
}

#[async_trait]
impl BackofficeStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx> {
        let guard = Arc::clone(&self.inner).lock_owned().await;
        let working = guard.clone();
        Ok(MemoryTx { guard, working })
    }

    async fn commit(&self, tx: MemoryTx) -> Result<()> {
        let MemoryTx { mut guard, working } = tx;
        *guard = working;
        Ok(())
    }

    async fn rollback(&self, tx: MemoryTx) -> Result<()> {
        drop(tx);
        Ok(())
    }

    async fn claim_order_for_invoice(
        &self,
        tx: &mut MemoryTx,
        invoice_id: i64,
        claimed_at: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<ClaimedOrder>> {
        let tables = &mut tx.working;
        let Some(order_id) = tables
            .orders
            .values()
            .find(|o| {
                o.invoice_id == Some(invoice_id)
                    && match o.status {
                        OrderStatus::Pending | OrderStatus::Failed => true,
                        OrderStatus::Provisioning => tables.claim_is_stale(o.id, stale_before),
                        _ => false,
                    }
            })
            .map(|o| o.id)
        else {
            return Ok(None);
        };

        tables.claims.insert(order_id, claimed_at);
        let order = tables.order_mut(order_id)?;
        let previous_status = order.status;
        order.status = OrderStatus::Provisioning;
        Ok(Some(ClaimedOrder {
            order: order.clone(),
            previous_status,
        }))
    }

    async fn lock_order(&self, tx: &mut MemoryTx, order_id: i64) -> Result<Option<OrderRecord>> {
        Ok(tx.working.orders.get(&order_id).cloned())
    }

    async fn invoice(&self, tx: &mut MemoryTx, invoice_id: i64) -> Result<Option<InvoiceRecord>> {
        Ok(tx.working.invoices.get(&invoice_id).cloned())
    }

    async fn active_providers(&self, tx: &mut MemoryTx, kind: &str) -> Result<Vec<ProviderRecord>> {
        Ok(tx
            .working
            .providers
            .values()
            .filter(|p| p.kind == kind && p.status == "active")
            .cloned()
            .collect())
    }

    async fn provider(&self, tx: &mut MemoryTx, provider_id: i64) -> Result<Option<ProviderRecord>> {
        Ok(tx.working.providers.get(&provider_id).cloned())
    }

    async fn service_for_order(
        &self,
        tx: &mut MemoryTx,
        order_id: i64,
    ) -> Result<Option<ServiceRecord>> {
        Ok(tx
            .working
            .services
            .values()
            .find(|s| s.order_id == Some(order_id))
            .cloned())
    }

    async fn service(&self, tx: &mut MemoryTx, service_id: i64) -> Result<Option<ServiceRecord>> {
        Ok(tx.working.services.get(&service_id).cloned())
    }

    async fn service_by_name(
        &self,
        tx: &mut MemoryTx,
        service_type: &str,
        service_name: &str,
    ) -> Result<Option<ServiceRecord>> {
        Ok(tx
            .working
            .services
            .values()
            .find(|s| s.service_type == service_type && s.name().eq_ignore_ascii_case(service_name))
            .cloned())
    }

    async fn update_order(
        &self,
        tx: &mut MemoryTx,
        order_id: i64,
        status: OrderStatus,
        service_data: &ServiceData,
    ) -> Result<()> {
        let order = tx.working.order_mut(order_id)?;
        order.status = status;
        order.service_data = service_data.clone();
        if status != OrderStatus::Provisioning {
            tx.working.claims.remove(&order_id);
        }
        Ok(())
    }

    async fn insert_service(&self, tx: &mut MemoryTx, service: NewService) -> Result<i64> {
        if let Some(order_id) = service.order_id
            && tx
                .working
                .services
                .values()
                .any(|s| s.order_id == Some(order_id))
        {
            return Err(Error::consistency(format!(
                "Order {} already has a service",
                order_id
            )));
        }

        let id = tx.working.next_service_id();
        tx.working.services.insert(
            id,
            ServiceRecord {
                id,
                user_id: service.user_id,
                provider_id: service.provider_id,
                order_id: service.order_id,
                service_type: service.service_type,
                status: service.status,
                config: service.config,
                service_name: service.service_name,
                registered_at: service.registered_at,
                expires_at: service.expires_at,
                updated_at: service.updated_at,
                created_at: service.created_at,
            },
        );
        Ok(id)
    }

    async fn update_service_expiry(
        &self,
        tx: &mut MemoryTx,
        service_id: i64,
        expires_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let service = tx.working.service_mut(service_id)?;
        service.expires_at = Some(expires_at);
        service.updated_at = Some(updated_at);
        if service.status == ServiceStatus::Expired {
            service.status = ServiceStatus::Active;
        }
        Ok(())
    }

    async fn update_service_config(
        &self,
        tx: &mut MemoryTx,
        service_id: i64,
        config: &ServiceData,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let service = tx.working.service_mut(service_id)?;
        service.config = config.clone();
        service.updated_at = Some(updated_at);
        Ok(())
    }

    async fn append_service_log(&self, entry: ServiceLogEntry) -> Result<()> {
        self.inner.lock().await.logs.push(entry);
        Ok(())
    }

    async fn services_with_expiry(&self) -> Result<Vec<ServiceRecord>> {
        Ok(self
            .inner
            .lock()
            .await
            .services
            .values()
            .filter(|s| {
                s.expires_at.is_some()
                    && matches!(s.status, ServiceStatus::Active | ServiceStatus::Expired)
            })
            .cloned()
            .collect())
    }

    async fn expire_service(&self, service_id: i64, now: DateTime<Utc>) -> Result<bool> {
        let mut tables = self.inner.lock().await;
        match tables.services.get_mut(&service_id) {
            Some(service) if service.status == ServiceStatus::Active => {
                service.status = ServiceStatus::Expired;
                service.updated_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn create_renewal_order_if_absent(
        &self,
        service_id: i64,
        order: NewOrder,
    ) -> Result<Option<i64>> {
        let mut tables = self.inner.lock().await;
        let exists = tables.orders.values().any(|o| {
            o.status == OrderStatus::Pending && o.service_data.service_id == Some(service_id)
        });
        if exists {
            return Ok(None);
        }

        let id = tables.next_order_id();
        tables.orders.insert(
            id,
            OrderRecord {
                id,
                user_id: order.user_id,
                service_type: order.service_type,
                service_data: order.service_data,
                status: order.status,
                amount_due: order.amount_due,
                currency: order.currency,
                invoice_id: order.invoice_id,
                created_at: order.created_at,
                paid_at: None,
            },
        );
        Ok(Some(id))
    }

    async fn failed_orders_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<OrderRecord>> {
        let tables = self.inner.lock().await;
        let mut orders: Vec<OrderRecord> = tables
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Failed && o.created_at >= cutoff)
            .cloned()
            .collect();
        orders.sort_by_key(|o| (o.created_at, o.id));
        Ok(orders)
    }

    async fn stale_claims(&self, stale_before: DateTime<Utc>) -> Result<Vec<OrderRecord>> {
        let tables = self.inner.lock().await;
        let mut orders: Vec<OrderRecord> = tables
            .orders
            .values()
            .filter(|o| {
                o.status == OrderStatus::Provisioning && tables.claim_is_stale(o.id, stale_before)
            })
            .cloned()
            .collect();
        orders.sort_by_key(|o| (o.created_at, o.id));
        Ok(orders)
    }
}
