//! Test doubles and common utilities for provisioning contract tests
//!
//! The scripted connector answers registry commands from a shared
//! [`Behaviour`] and counts every command it sees, so tests can assert on
//! exactly what reached the registry. [`CommitFaultStore`] wraps the memory
//! store and refuses a chosen commit.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use reseller_core::config::EngineConfig;
use reseller_core::directory::SessionParams;
use reseller_core::error::{Error, Result};
use reseller_core::model::{
    ContactRecord, InvoiceRecord, NewOrder, NewService, OrderRecord, OrderStatus, PaymentStatus,
    ProviderRecord, Role, ServiceData, ServiceLogEntry, ServiceRecord, ServiceStatus,
};
use reseller_core::registry::ConnectorRegistry;
use reseller_core::store::{MemoryStore, MemoryTx};
use reseller_core::traits::{
    BackofficeStore, ClaimedOrder, CommandParams, ContactCreated, DomainCreated, DomainInfo,
    DomainRenewed, RegistryConnector, RegistrySession,
};
use reseller_core::ProvisioningEngine;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// How the scripted registry answers
#[derive(Debug, Clone, Default)]
pub struct Behaviour {
    /// Refuse the login
    pub fail_connect: bool,
    /// Refuse contact-create once this many contacts were created
    pub fail_contact_after: Option<usize>,
    /// Refuse domain-create with this registry message
    pub fail_domain_create: Option<String>,
    /// Never answer domain-create
    pub hang_domain_create: bool,
    /// Answer domain-create for this domain only after the delay
    pub slow_create: Option<(String, std::time::Duration)>,
    /// Answer for domain-info; `None` means the domain is unknown
    pub domain_info: Option<DomainInfo>,
    /// Expiry date reported by domain-create and domain-renew
    pub ex_date: Option<DateTime<Utc>>,
    /// Refuse every domain-update command with this message
    pub fail_update: Option<String>,
}

/// Counters and recorded payloads shared by all sessions of a connector
#[derive(Debug, Default)]
struct Calls {
    connects: AtomicUsize,
    contact_creates: AtomicUsize,
    domain_creates: AtomicUsize,
    domain_renews: AtomicUsize,
    domain_updates: AtomicUsize,
    domain_infos: AtomicUsize,
    logouts: AtomicUsize,
    payloads: Mutex<Vec<(String, CommandParams)>>,
}

/// Registry connector driven by a [`Behaviour`]
pub struct ScriptedConnector {
    calls: Arc<Calls>,
    behaviour: Arc<Mutex<Behaviour>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Calls::default()),
            behaviour: Arc::new(Mutex::new(Behaviour::default())),
        }
    }

    pub fn with_behaviour(behaviour: Behaviour) -> Self {
        let connector = Self::new();
        connector.set_behaviour(behaviour);
        connector
    }

    /// Create a connector that shares counters and behaviour with an existing one
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            calls: Arc::clone(&other.calls),
            behaviour: Arc::clone(&other.behaviour),
        }
    }

    pub fn set_behaviour(&self, behaviour: Behaviour) {
        *self.behaviour.lock().unwrap() = behaviour;
    }

    pub fn update_behaviour(&self, f: impl FnOnce(&mut Behaviour)) {
        f(&mut self.behaviour.lock().unwrap());
    }

    pub fn connect_count(&self) -> usize {
        self.calls.connects.load(Ordering::SeqCst)
    }

    pub fn contact_create_count(&self) -> usize {
        self.calls.contact_creates.load(Ordering::SeqCst)
    }

    pub fn domain_create_count(&self) -> usize {
        self.calls.domain_creates.load(Ordering::SeqCst)
    }

    pub fn domain_renew_count(&self) -> usize {
        self.calls.domain_renews.load(Ordering::SeqCst)
    }

    pub fn domain_update_count(&self) -> usize {
        self.calls.domain_updates.load(Ordering::SeqCst)
    }

    pub fn domain_info_count(&self) -> usize {
        self.calls.domain_infos.load(Ordering::SeqCst)
    }

    pub fn logout_count(&self) -> usize {
        self.calls.logouts.load(Ordering::SeqCst)
    }

    /// Payloads of every command with the given name, in send order
    pub fn payloads(&self, command: &str) -> Vec<CommandParams> {
        self.calls
            .payloads
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == command)
            .map(|(_, params)| params.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl RegistryConnector for ScriptedConnector {
    async fn connect(&self, _params: &SessionParams) -> Result<Box<dyn RegistrySession>> {
        self.calls.connects.fetch_add(1, Ordering::SeqCst);
        if self.behaviour.lock().unwrap().fail_connect {
            return Err(Error::connection("registry unreachable"));
        }
        Ok(Box::new(ScriptedSession {
            calls: Arc::clone(&self.calls),
            behaviour: Arc::clone(&self.behaviour),
        }))
    }

    fn connector_name(&self) -> &'static str {
        "scripted"
    }
}

struct ScriptedSession {
    calls: Arc<Calls>,
    behaviour: Arc<Mutex<Behaviour>>,
}

impl ScriptedSession {
    fn record(&self, command: &str, params: &CommandParams) {
        self.calls
            .payloads
            .lock()
            .unwrap()
            .push((command.to_string(), params.clone()));
    }

    fn behaviour(&self) -> Behaviour {
        self.behaviour.lock().unwrap().clone()
    }

    fn update(&self, command: &str, params: &CommandParams) -> Result<()> {
        self.record(command, params);
        self.calls.domain_updates.fetch_add(1, Ordering::SeqCst);
        match self.behaviour().fail_update {
            Some(message) => Err(Error::registry(command, message)),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl RegistrySession for ScriptedSession {
    async fn create_contact(&mut self, params: &CommandParams) -> Result<ContactCreated> {
        self.record("ContactCreate", params);
        let created = self.calls.contact_creates.load(Ordering::SeqCst);
        if let Some(limit) = self.behaviour().fail_contact_after
            && created >= limit
        {
            return Err(Error::registry("ContactCreate", "Object exists"));
        }
        let n = self.calls.contact_creates.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ContactCreated {
            id: format!("REG-C{}", n),
        })
    }

    async fn create_domain(&mut self, params: &CommandParams) -> Result<DomainCreated> {
        self.record("DomainCreate", params);
        self.calls.domain_creates.fetch_add(1, Ordering::SeqCst);
        let behaviour = self.behaviour();
        if behaviour.hang_domain_create {
            std::future::pending::<()>().await;
        }
        if let Some((domain, delay)) = &behaviour.slow_create
            && params.get("domainname").and_then(|v| v.as_str()) == Some(domain.as_str())
        {
            tokio::time::sleep(*delay).await;
        }
        if let Some(message) = behaviour.fail_domain_create {
            return Err(Error::registry("DomainCreate", message));
        }
        Ok(DomainCreated {
            cr_date: None,
            ex_date: behaviour.ex_date,
        })
    }

    async fn renew_domain(&mut self, params: &CommandParams) -> Result<DomainRenewed> {
        self.record("DomainRenew", params);
        self.calls.domain_renews.fetch_add(1, Ordering::SeqCst);
        Ok(DomainRenewed {
            ex_date: self.behaviour().ex_date,
        })
    }

    async fn update_domain_contacts(&mut self, params: &CommandParams) -> Result<()> {
        self.update("DomainUpdateContacts", params)
    }

    async fn update_domain_nameservers(&mut self, params: &CommandParams) -> Result<()> {
        self.update("DomainUpdateNS", params)
    }

    async fn update_domain_status(&mut self, params: &CommandParams) -> Result<()> {
        self.update("DomainUpdateStatus", params)
    }

    async fn update_domain_dnssec(&mut self, params: &CommandParams) -> Result<()> {
        self.update("DomainUpdateDNSSEC", params)
    }

    async fn update_domain_auth_info(&mut self, params: &CommandParams) -> Result<()> {
        self.update("DomainUpdateAuthinfo", params)
    }

    async fn domain_info(&mut self, params: &CommandParams) -> Result<Option<DomainInfo>> {
        self.record("DomainInfo", params);
        self.calls.domain_infos.fetch_add(1, Ordering::SeqCst);
        Ok(self.behaviour().domain_info)
    }

    async fn logout(&mut self) -> Result<()> {
        self.calls.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Engine over `store` with `connector` serving every family
pub fn engine(store: &MemoryStore, connector: &ScriptedConnector) -> ProvisioningEngine<MemoryStore> {
    engine_with(store, connector, EngineConfig::default())
}

pub fn engine_with(
    store: &MemoryStore,
    connector: &ScriptedConnector,
    config: EngineConfig,
) -> ProvisioningEngine<MemoryStore> {
    engine_over(Arc::new(store.clone()), connector, config)
}

/// Engine over any store with `connector` serving every family
pub fn engine_over<S: BackofficeStore>(
    store: Arc<S>,
    connector: &ScriptedConnector,
    config: EngineConfig,
) -> ProvisioningEngine<S> {
    let connectors = ConnectorRegistry::new();
    connectors.register_connector(
        "generic",
        Arc::new(ScriptedConnector::sharing_counters_with(connector)),
    );
    ProvisioningEngine::new(store, Arc::new(connectors), config)
        .expect("engine construction succeeds")
}

/// Domain-info answer for a domain sponsored by `client_id`
pub fn sponsored_info(domain: &str, client_id: &str, ex_date: DateTime<Utc>) -> DomainInfo {
    DomainInfo {
        name: domain.into(),
        status: vec!["ok".into()],
        cr_date: None,
        ex_date: Some(ex_date),
        extra: json!({"clID": client_id, "registrant": "REG-C1"})
            .as_object()
            .cloned()
            .unwrap(),
    }
}

/// Memory store that fails one chosen commit with a storage error
///
/// The failed transaction is rolled back, as a lost write would be.
pub struct CommitFaultStore {
    inner: MemoryStore,
    commits: AtomicUsize,
    fail_at: AtomicUsize,
}

impl CommitFaultStore {
    /// Fail the `n`th commit (1-based); 0 never fails
    pub fn failing_commit(inner: MemoryStore, n: usize) -> Self {
        Self {
            inner,
            commits: AtomicUsize::new(0),
            fail_at: AtomicUsize::new(n),
        }
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl BackofficeStore for CommitFaultStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx> {
        self.inner.begin().await
    }

    async fn commit(&self, tx: MemoryTx) -> Result<()> {
        let n = self.commits.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_at.load(Ordering::SeqCst) {
            self.inner.rollback(tx).await?;
            return Err(Error::storage("disk I/O error"));
        }
        self.inner.commit(tx).await
    }

    async fn rollback(&self, tx: MemoryTx) -> Result<()> {
        self.inner.rollback(tx).await
    }

    async fn claim_order_for_invoice(
        &self,
        tx: &mut MemoryTx,
        invoice_id: i64,
        claimed_at: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<ClaimedOrder>> {
        self.inner
            .claim_order_for_invoice(tx, invoice_id, claimed_at, stale_before)
            .await
    }

    async fn lock_order(&self, tx: &mut MemoryTx, order_id: i64) -> Result<Option<OrderRecord>> {
        self.inner.lock_order(tx, order_id).await
    }

    async fn invoice(&self, tx: &mut MemoryTx, invoice_id: i64) -> Result<Option<InvoiceRecord>> {
        self.inner.invoice(tx, invoice_id).await
    }

    async fn active_providers(&self, tx: &mut MemoryTx, kind: &str) -> Result<Vec<ProviderRecord>> {
        self.inner.active_providers(tx, kind).await
    }

    async fn provider(&self, tx: &mut MemoryTx, provider_id: i64) -> Result<Option<ProviderRecord>> {
        self.inner.provider(tx, provider_id).await
    }

    async fn service_for_order(
        &self,
        tx: &mut MemoryTx,
        order_id: i64,
    ) -> Result<Option<ServiceRecord>> {
        self.inner.service_for_order(tx, order_id).await
    }

    async fn service(&self, tx: &mut MemoryTx, service_id: i64) -> Result<Option<ServiceRecord>> {
        self.inner.service(tx, service_id).await
    }

    async fn service_by_name(
        &self,
        tx: &mut MemoryTx,
        service_type: &str,
        service_name: &str,
    ) -> Result<Option<ServiceRecord>> {
        self.inner.service_by_name(tx, service_type, service_name).await
    }

    async fn update_order(
        &self,
        tx: &mut MemoryTx,
        order_id: i64,
        status: OrderStatus,
        service_data: &ServiceData,
    ) -> Result<()> {
        self.inner.update_order(tx, order_id, status, service_data).await
    }

    async fn insert_service(&self, tx: &mut MemoryTx, service: NewService) -> Result<i64> {
        self.inner.insert_service(tx, service).await
    }

    async fn update_service_expiry(
        &self,
        tx: &mut MemoryTx,
        service_id: i64,
        expires_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.inner
            .update_service_expiry(tx, service_id, expires_at, updated_at)
            .await
    }

    async fn update_service_config(
        &self,
        tx: &mut MemoryTx,
        service_id: i64,
        config: &ServiceData,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.inner
            .update_service_config(tx, service_id, config, updated_at)
            .await
    }

    async fn append_service_log(&self, entry: ServiceLogEntry) -> Result<()> {
        self.inner.append_service_log(entry).await
    }

    async fn services_with_expiry(&self) -> Result<Vec<ServiceRecord>> {
        self.inner.services_with_expiry().await
    }

    async fn expire_service(&self, service_id: i64, now: DateTime<Utc>) -> Result<bool> {
        self.inner.expire_service(service_id, now).await
    }

    async fn create_renewal_order_if_absent(
        &self,
        service_id: i64,
        order: NewOrder,
    ) -> Result<Option<i64>> {
        self.inner.create_renewal_order_if_absent(service_id, order).await
    }

    async fn failed_orders_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<OrderRecord>> {
        self.inner.failed_orders_since(cutoff).await
    }

    async fn stale_claims(&self, stale_before: DateTime<Utc>) -> Result<Vec<OrderRecord>> {
        self.inner.stale_claims(stale_before).await
    }
}

/// Active domain provider selling `.test`
pub fn test_provider(id: i64) -> ProviderRecord {
    ProviderRecord {
        id,
        name: "Test Registry".into(),
        kind: "domain".into(),
        api_endpoint: "epp.registry.test:700".into(),
        credentials: json!({"auth": {"username": "reseller", "password": "secret"}}),
        pricing: json!({".test": {"register": {"1": "12.00"}, "renew": {"1": "9.50"}}}),
        status: "active".into(),
    }
}

pub fn invoice(id: i64, amount: Decimal, status: PaymentStatus) -> InvoiceRecord {
    InvoiceRecord {
        id,
        user_id: 42,
        billing_contact_id: None,
        total_amount: amount,
        currency: "USD".into(),
        payment_status: status,
        due_date: None,
        created_at: Utc::now(),
    }
}

pub fn contact(name: &str, email: &str) -> ContactRecord {
    ContactRecord {
        name: name.into(),
        street1: "1 Main Street".into(),
        city: "Springfield".into(),
        pc: "12345".into(),
        cc: "us".into(),
        voice: "+1.5555550100".into(),
        email: email.into(),
        ..Default::default()
    }
}

/// The same contact in every role slot
pub fn everywhere(contact: &ContactRecord) -> BTreeMap<String, ContactRecord> {
    Role::ALL
        .iter()
        .map(|role| (role.as_str().to_string(), contact.clone()))
        .collect()
}

pub fn register_data(domain: &str, contacts: BTreeMap<String, ContactRecord>) -> ServiceData {
    ServiceData {
        domain: Some(domain.into()),
        contacts,
        nameservers: vec!["ns1.host.test".into(), "ns2.host.test".into()],
        ..Default::default()
    }
}

pub fn order(id: i64, invoice_id: i64, service_type: &str, data: ServiceData) -> OrderRecord {
    OrderRecord {
        id,
        user_id: 42,
        service_type: service_type.into(),
        service_data: data,
        status: OrderStatus::Pending,
        amount_due: Decimal::new(1200, 2),
        currency: "USD".into(),
        invoice_id: Some(invoice_id),
        created_at: Utc::now(),
        paid_at: None,
    }
}

/// Empty store with the `.test` provider
pub async fn store_with_provider() -> MemoryStore {
    let store = MemoryStore::new();
    store.seed_provider(test_provider(1)).await;
    store
}

/// Seed a paid $12 invoice and the pending order it funds
pub async fn seed_paid_order(
    store: &MemoryStore,
    order_id: i64,
    invoice_id: i64,
    service_type: &str,
    data: ServiceData,
) {
    store
        .seed_invoice(invoice(invoice_id, Decimal::new(1200, 2), PaymentStatus::Paid))
        .await;
    store
        .seed_order(order(order_id, invoice_id, service_type, data))
        .await;
}

/// Store seeded with the `.test` provider and one paid register order (id 1)
pub async fn seeded_store(invoice_id: i64, domain: &str) -> MemoryStore {
    let store = store_with_provider().await;
    let data = register_data(domain, everywhere(&contact("Jane Roe", "jane@example.test")));
    seed_paid_order(&store, 1, invoice_id, "domain.register", data).await;
    store
}

pub fn domain_service(id: i64, domain: &str, expires_at: DateTime<Utc>) -> ServiceRecord {
    ServiceRecord {
        id,
        user_id: 42,
        provider_id: Some(1),
        order_id: None,
        service_type: "domain".into(),
        status: ServiceStatus::Active,
        config: ServiceData {
            domain: Some(domain.into()),
            ..Default::default()
        },
        service_name: Some(domain.into()),
        registered_at: None,
        expires_at: Some(expires_at),
        updated_at: None,
        created_at: Utc::now(),
    }
}
