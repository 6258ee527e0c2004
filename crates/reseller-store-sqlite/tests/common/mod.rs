//! Common utilities for SQLite store contract tests
//!
//! [`PacedRegistry`] accepts every command and can hold domain-create for a
//! chosen domain, so tests can overlap provisioning attempts against a real
//! database file.

#![allow(dead_code)]

use chrono::Utc;
use reseller_core::config::EngineConfig;
use reseller_core::directory::SessionParams;
use reseller_core::error::Result;
use reseller_core::model::{
    InvoiceRecord, NewOrder, OrderStatus, PaymentStatus, ProviderRecord, ServiceData,
};
use reseller_core::registry::ConnectorRegistry;
use reseller_core::traits::{
    CommandParams, ContactCreated, DomainCreated, DomainInfo, DomainRenewed, RegistryConnector,
    RegistrySession,
};
use reseller_core::ProvisioningEngine;
use reseller_store_sqlite::SqliteStore;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Registry double that delays domain-create per domain
#[derive(Default)]
pub struct PacedRegistry {
    delays: HashMap<String, Duration>,
    domain_creates: Arc<AtomicUsize>,
}

impl PacedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold domain-create for `domain` for `delay`
    pub fn with_delay(mut self, domain: &str, delay: Duration) -> Self {
        self.delays.insert(domain.to_string(), delay);
        self
    }

    pub fn domain_create_count(&self) -> usize {
        self.domain_creates.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl RegistryConnector for PacedRegistry {
    async fn connect(&self, _params: &SessionParams) -> Result<Box<dyn RegistrySession>> {
        Ok(Box::new(PacedSession {
            delays: self.delays.clone(),
            domain_creates: Arc::clone(&self.domain_creates),
        }))
    }

    fn connector_name(&self) -> &'static str {
        "paced"
    }
}

struct PacedSession {
    delays: HashMap<String, Duration>,
    domain_creates: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl RegistrySession for PacedSession {
    async fn create_contact(&mut self, _params: &CommandParams) -> Result<ContactCreated> {
        Ok(ContactCreated { id: "REG-C1".into() })
    }

    async fn create_domain(&mut self, params: &CommandParams) -> Result<DomainCreated> {
        let domain = params
            .get("domainname")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if let Some(delay) = self.delays.get(domain) {
            tokio::time::sleep(*delay).await;
        }
        self.domain_creates.fetch_add(1, Ordering::SeqCst);
        Ok(DomainCreated {
            cr_date: None,
            ex_date: None,
        })
    }

    async fn renew_domain(&mut self, _params: &CommandParams) -> Result<DomainRenewed> {
        Ok(DomainRenewed { ex_date: None })
    }

    async fn update_domain_contacts(&mut self, _params: &CommandParams) -> Result<()> {
        Ok(())
    }

    async fn update_domain_nameservers(&mut self, _params: &CommandParams) -> Result<()> {
        Ok(())
    }

    async fn update_domain_status(&mut self, _params: &CommandParams) -> Result<()> {
        Ok(())
    }

    async fn update_domain_dnssec(&mut self, _params: &CommandParams) -> Result<()> {
        Ok(())
    }

    async fn update_domain_auth_info(&mut self, _params: &CommandParams) -> Result<()> {
        Ok(())
    }

    async fn domain_info(&mut self, _params: &CommandParams) -> Result<Option<DomainInfo>> {
        Ok(None)
    }

    async fn logout(&mut self) -> Result<()> {
        Ok(())
    }
}

/// File-backed store under `dir` with the `.test` provider
pub async fn file_store(dir: &Path) -> SqliteStore {
    let store = SqliteStore::open(&dir.join("backoffice.sqlite"))
        .await
        .expect("database opens");
    store
        .add_provider(&ProviderRecord {
            id: 1,
            name: "Test Registry".into(),
            kind: "domain".into(),
            api_endpoint: "epp.registry.test:700".into(),
            credentials: json!({"auth": {"username": "reseller", "password": "secret"}}),
            pricing: json!({".test": {"register": {"1": "12.00"}}}),
            status: "active".into(),
        })
        .await
        .expect("provider row");
    store
}

/// Paid invoice plus the pending register order it funds
pub async fn paid_register_order(store: &SqliteStore, invoice_id: i64, domain: &str) -> i64 {
    store
        .add_invoice(&InvoiceRecord {
            id: invoice_id,
            user_id: 42,
            billing_contact_id: None,
            total_amount: Decimal::new(1200, 2),
            currency: "USD".into(),
            payment_status: PaymentStatus::Paid,
            due_date: None,
            created_at: Utc::now(),
        })
        .await
        .expect("invoice row");
    store
        .add_order(&NewOrder {
            user_id: 42,
            service_type: "domain.register".into(),
            service_data: ServiceData {
                domain: Some(domain.into()),
                ..Default::default()
            },
            status: OrderStatus::Pending,
            amount_due: Decimal::new(1200, 2),
            currency: "USD".into(),
            invoice_id: Some(invoice_id),
            created_at: Utc::now(),
        })
        .await
        .expect("order row")
}

pub fn engine(store: &SqliteStore, registry: Arc<PacedRegistry>) -> ProvisioningEngine<SqliteStore> {
    let connectors = ConnectorRegistry::new();
    connectors.register_connector("generic", registry);
    ProvisioningEngine::new(
        Arc::new(store.clone()),
        Arc::new(connectors),
        EngineConfig::default(),
    )
    .expect("engine construction succeeds")
}
