//! Provisioning Orchestrator
//!
//! The ProvisioningEngine turns a paid invoice into a provisioned service
//! in three steps, none of which holds a store transaction across registry
//! I/O:
//!
//! 1. Claim: one short transaction moves the funded order to `provisioning`,
//!    checks the invoice and resolves provider and registry family.
//! 2. Registry: a timed session resolves contacts and issues the domain
//!    command, with no transaction open.
//! 3. Finish: a second short transaction confirms the claim still holds and
//!    writes the service and order rows.
//!
//! ## Failure handling
//!
//! Any error aborts the attempt. An open transaction is rolled back, an
//! `order_activation_failed` service-log entry is appended, and the attempt
//! is recorded in the order's service data. The bookkeeping returns a
//! claimed order to the status it had before the claim, or to `failed` when
//! [`EngineConfig::mark_failed_orders`] is set.
//!
//! A retried registration first asks the registry whether the domain already
//! exists under our login, and adopts it if so. That covers commands whose
//! outcome was never seen as well as a finish step that failed after the
//! registry accepted the create.
//!
//! ```text
//! invoice ─▶ claim + directory ─▶ commit ─▶ session ─▶ [info] ─▶ contacts ─▶ domain command
//!                                                                                  │
//!                                log + bookkeeping ◀── error ──┬── ok ──▶ finish: service row + commit
//! ```

mod payload;
mod session;
mod update;

pub use payload::add_years;
pub use session::TimedSession;
pub use update::DomainUpdate;

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{EngineConfig, MAX_CLAIM_LEASE_SECS};
use crate::contacts::{ContactResolver, ResolvedContacts, generate_auth_info};
use crate::directory::{RegistryDirectory, ResolvedProvider};
use crate::error::{Error, ErrorKind, Result};
use crate::extension::{ExtensionTable, ObjectType};
use crate::model::{
    NewService, OrderRecord, OrderStatus, PaymentStatus, ProvisioningState, ServiceData,
    ServiceLogEntry, ServiceRecord, ServiceStatus, ServiceType, events,
};
use crate::registry::ConnectorRegistry;
use crate::traits::{BackofficeStore, DomainInfo, RegistrySession};

/// What a successful provisioning attempt did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionedAction {
    /// Domain created at the registry
    Registered,
    /// Domain found already registered by an earlier attempt, and adopted
    Adopted,
    /// Existing domain renewed
    Renewed,
}

/// Result of [`ProvisioningEngine::provision_service`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningOutcome {
    pub order_id: i64,
    pub service_id: i64,
    pub service_name: String,
    pub action: ProvisionedAction,
    pub expires_at: DateTime<Utc>,
    /// Registry contact ids per role (registrations only)
    pub contacts: ResolvedContacts,
}

/// Identifiers learned during an attempt, used for failure reporting
#[derive(Debug, Default)]
struct Attempt {
    order_id: Option<i64>,
    service_id: Option<i64>,
    /// Set once the claim is committed
    restore_status: Option<OrderStatus>,
}

/// A committed claim and what the registry step needs from it
struct Claim {
    order: OrderRecord,
    previous_status: OrderStatus,
    recovered: bool,
    years: u32,
    domain: String,
    resolved: ResolvedProvider,
    work: Work,
}

enum Work {
    Register,
    Renew(ServiceRecord),
}

/// Result of the registry-side part of a registration
struct Registration {
    contacts: ResolvedContacts,
    cr_date: Option<DateTime<Utc>>,
    ex_date: Option<DateTime<Utc>>,
    status: Vec<String>,
    adopted: bool,
}

/// Provisioning Orchestrator over a back-office store
pub struct ProvisioningEngine<S: BackofficeStore> {
    store: Arc<S>,
    connectors: Arc<ConnectorRegistry>,
    extensions: Arc<ExtensionTable>,
    config: EngineConfig,
}

impl<S: BackofficeStore> ProvisioningEngine<S> {
    /// Create a new provisioning engine
    ///
    /// # Parameters
    ///
    /// - `store`: Back-office store
    /// - `connectors`: Registry connectors per family
    /// - `config`: Engine configuration
    ///
    /// # Returns
    ///
    /// The engine, or a configuration error
    pub fn new(
        store: Arc<S>,
        connectors: Arc<ConnectorRegistry>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            connectors,
            extensions: Arc::new(ExtensionTable::builtin()),
            config,
        })
    }

    /// Replace the protocol extension table
    pub fn with_extensions(mut self, extensions: Arc<ExtensionTable>) -> Self {
        self.extensions = extensions;
        self
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Provision the order funded by a paid invoice
    ///
    /// # Parameters
    ///
    /// - `invoice_id`: Invoice whose order should be provisioned
    /// - `acting_user_id`: User on whose behalf this runs (payment callback,
    ///   administrator, or 0 for the system)
    ///
    /// # Returns
    ///
    /// - `Ok(ProvisioningOutcome)`: The order is `active` and its service recorded
    /// - `Err(Error)`: No service was written; the failure log entry and the
    ///   attempt bookkeeping were
    pub async fn provision_service(
        &self,
        invoice_id: i64,
        acting_user_id: i64,
    ) -> Result<ProvisioningOutcome> {
        info!(
            "Provisioning invoice {} (acting user {})",
            invoice_id, acting_user_id
        );

        let mut attempt = Attempt::default();
        match self.run_attempt(invoice_id, &mut attempt).await {
            Ok(outcome) => {
                info!(
                    "Provisioned {} for invoice {} (order {}, service {}, {:?})",
                    outcome.service_name,
                    invoice_id,
                    outcome.order_id,
                    outcome.service_id,
                    outcome.action
                );
                Ok(outcome)
            }
            Err(e) => {
                error!("Provisioning failed for invoice {}: {}", invoice_id, e);
                self.record_failure(&attempt, acting_user_id, &e).await;
                Err(e)
            }
        }
    }

    async fn run_attempt(
        &self,
        invoice_id: i64,
        attempt: &mut Attempt,
    ) -> Result<ProvisioningOutcome> {
        let mut tx = self.store.begin().await?;
        let result = self.claim_in(&mut tx, invoice_id, attempt).await;
        let claim = self.settle(tx, result).await?;
        attempt.restore_status = Some(if claim.recovered {
            OrderStatus::Pending
        } else {
            claim.previous_status
        });

        match &claim.work {
            Work::Register => self.register_domain(&claim, attempt).await,
            Work::Renew(service) => self.renew_domain(&claim, service).await,
        }
    }

    /// Claim the order and read everything the registry step needs
    async fn claim_in(
        &self,
        tx: &mut S::Tx,
        invoice_id: i64,
        attempt: &mut Attempt,
    ) -> Result<Claim> {
        let now = Utc::now();
        let stale_before = now - self.lease();
        let claimed = self
            .store
            .claim_order_for_invoice(tx, invoice_id, now, stale_before)
            .await?
            .ok_or_else(|| {
                Error::consistency(format!(
                    "No pending or failed order for invoice {}",
                    invoice_id
                ))
            })?;
        attempt.order_id = Some(claimed.order.id);
        if claimed.recovered() {
            warn!(
                "Taking over order {}, abandoned in provisioning",
                claimed.order.id
            );
        } else {
            debug!(
                "Claimed order {} (was {})",
                claimed.order.id, claimed.previous_status
            );
        }

        let invoice = self
            .store
            .invoice(tx, invoice_id)
            .await?
            .ok_or_else(|| Error::consistency(format!("Invoice {} not found", invoice_id)))?;
        if invoice.payment_status != PaymentStatus::Paid {
            return Err(Error::InvoiceNotPaid {
                invoice_id,
                status: invoice.payment_status.to_string(),
            });
        }

        let recovered = claimed.recovered();
        let previous_status = claimed.previous_status;
        let order = claimed.order;
        let service_type = ServiceType::parse(&order.service_type)?;
        let years = order
            .service_data
            .term_years(self.config.default_term_years);

        let (domain, work) = match (service_type.resource.as_str(), service_type.action.as_str()) {
            ("domain", "register") => {
                let domain = required_domain(&order.service_data)?;
                if let Some(existing) = self.store.service_for_order(tx, order.id).await? {
                    attempt.service_id = Some(existing.id);
                    return Err(Error::consistency(format!(
                        "Order {} already has service {}",
                        order.id, existing.id
                    )));
                }
                (domain, Work::Register)
            }
            ("domain", "renew") => {
                let service = self.renewal_target(tx, &order).await?;
                attempt.service_id = Some(service.id);
                let domain = match order
                    .service_data
                    .domain
                    .clone()
                    .filter(|d| !d.trim().is_empty())
                {
                    Some(domain) => domain,
                    None => service.name().to_string(),
                };
                (domain, Work::Renew(service))
            }
            _ => return Err(Error::unsupported(order.service_type.clone())),
        };

        let resolved = self.resolve(tx, &domain).await?;
        Ok(Claim {
            order,
            previous_status,
            recovered,
            years,
            domain,
            resolved,
            work,
        })
    }

    async fn renewal_target(&self, tx: &mut S::Tx, order: &OrderRecord) -> Result<ServiceRecord> {
        let data = &order.service_data;
        match data.service_id {
            Some(service_id) => self.store.service(tx, service_id).await?,
            None => match data.domain.as_deref() {
                Some(name) => self.store.service_by_name(tx, "domain", name).await?,
                None => None,
            },
        }
        .ok_or_else(|| {
            Error::consistency(format!("Order {} refers to no existing service", order.id))
        })
    }

    async fn register_domain(
        &self,
        claim: &Claim,
        attempt: &mut Attempt,
    ) -> Result<ProvisioningOutcome> {
        let order = &claim.order;
        let mut data = order.service_data.clone();
        let domain = &claim.domain;
        let auth_info = data
            .auth_info
            .clone()
            .filter(|code| !code.trim().is_empty())
            .unwrap_or_else(generate_auth_info);

        // A previous attempt may have reached the registry
        let lookup_first = claim.recovered
            || data
                .provisioning
                .as_ref()
                .is_some_and(|state| state.attempts > 0);

        let mut session = self.open_session(&claim.resolved).await?;
        let registration = self
            .register_with_session(&mut session, claim, &data, &auth_info, lookup_first)
            .await;
        session.close().await;
        let registration = registration?;

        for (role, id) in &registration.contacts {
            data.set_registry_id(*role, id);
        }
        data.authcode = Some(auth_info);
        if data.status.is_none() {
            data.status = Some(if registration.status.is_empty() {
                vec!["ok".to_string()]
            } else {
                registration.status.clone()
            });
        }
        clear_failure(&mut data);

        let now = Utc::now();
        let expires_at = registration
            .ex_date
            .unwrap_or_else(|| add_years(now, claim.years));
        let service = NewService {
            user_id: order.user_id,
            provider_id: Some(claim.resolved.provider.id),
            order_id: Some(order.id),
            service_type: "domain".to_string(),
            status: ServiceStatus::Active,
            config: data.clone(),
            service_name: Some(domain.clone()),
            registered_at: Some(now),
            expires_at: Some(expires_at),
            updated_at: Some(now),
            created_at: registration.cr_date.unwrap_or(now),
        };

        let mut tx = self.store.begin().await?;
        let result = self.finish_registration(&mut tx, order.id, &data, service).await;
        let service_id = self.settle(tx, result).await?;
        attempt.service_id = Some(service_id);

        Ok(ProvisioningOutcome {
            order_id: order.id,
            service_id,
            service_name: domain.clone(),
            action: if registration.adopted {
                ProvisionedAction::Adopted
            } else {
                ProvisionedAction::Registered
            },
            expires_at,
            contacts: registration.contacts,
        })
    }

    async fn finish_registration(
        &self,
        tx: &mut S::Tx,
        order_id: i64,
        data: &ServiceData,
        service: NewService,
    ) -> Result<i64> {
        self.confirm_claim(tx, order_id).await?;
        self.store
            .update_order(tx, order_id, OrderStatus::Active, data)
            .await?;
        self.store.insert_service(tx, service).await
    }

    async fn register_with_session(
        &self,
        session: &mut TimedSession,
        claim: &Claim,
        data: &ServiceData,
        auth_info: &str,
        lookup_first: bool,
    ) -> Result<Registration> {
        let (resolved, domain, years) = (&claim.resolved, claim.domain.as_str(), claim.years);
        if lookup_first {
            debug!("Looking up {} before registering it again", domain);
            if let Some(info) = session.domain_info(&payload::domain_name(domain)).await?
                && sponsored_by_us(&info, resolved)
            {
                info!("{} is already registered, adopting it", domain);
                return Ok(Registration {
                    contacts: payload::contacts_from_info(&info),
                    cr_date: info.cr_date,
                    ex_date: info.ex_date,
                    status: info.status,
                    adopted: true,
                });
            }
        }

        let contacts = ContactResolver::new(
            &mut *session,
            &resolved.family,
            &self.extensions,
            data,
            auth_info,
        )
        .resolve(&resolved.contact_roles, &data.contacts)
        .await?;

        let params = payload::domain_create(
            domain,
            years,
            auth_info,
            &data.filtered_nameservers(),
            &contacts,
        );
        let params = self
            .extensions
            .extend(ObjectType::Domain, params, &resolved.family, data);

        let created = session.create_domain(&params).await?;
        info!("Registered {} for {} year(s)", domain, years);

        Ok(Registration {
            contacts,
            cr_date: created.cr_date,
            ex_date: created.ex_date,
            status: Vec::new(),
            adopted: false,
        })
    }

    async fn renew_domain(
        &self,
        claim: &Claim,
        service: &ServiceRecord,
    ) -> Result<ProvisioningOutcome> {
        let order = &claim.order;
        let domain = &claim.domain;
        let years = claim.years;

        let mut session = self.open_session(&claim.resolved).await?;
        let renewed = session
            .renew_domain(&payload::domain_renew(domain, years, service.expires_at))
            .await;
        session.close().await;
        let renewed = renewed?;
        info!("Renewed {} for {} year(s)", domain, years);

        let mut data = order.service_data.clone();
        clear_failure(&mut data);
        let now = Utc::now();
        let expires_at = renewed.ex_date.unwrap_or_else(|| add_years(now, years));

        let mut tx = self.store.begin().await?;
        let result = self
            .finish_renewal(&mut tx, order.id, &data, service.id, expires_at, now)
            .await;
        self.settle(tx, result).await?;

        Ok(ProvisioningOutcome {
            order_id: order.id,
            service_id: service.id,
            service_name: domain.clone(),
            action: ProvisionedAction::Renewed,
            expires_at,
            contacts: ResolvedContacts::new(),
        })
    }

    async fn finish_renewal(
        &self,
        tx: &mut S::Tx,
        order_id: i64,
        data: &ServiceData,
        service_id: i64,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.confirm_claim(tx, order_id).await?;
        self.store
            .update_order(tx, order_id, OrderStatus::Active, data)
            .await?;
        self.store
            .update_service_expiry(tx, service_id, expires_at, now)
            .await
    }

    /// Check that the order is still in `provisioning` before writing the outcome
    async fn confirm_claim(&self, tx: &mut S::Tx, order_id: i64) -> Result<()> {
        let order = self
            .store
            .lock_order(tx, order_id)
            .await?
            .ok_or_else(|| Error::consistency(format!("Order {} not found", order_id)))?;
        if order.status != OrderStatus::Provisioning {
            return Err(Error::consistency(format!(
                "Order {} left provisioning during the attempt (now {})",
                order_id, order.status
            )));
        }
        Ok(())
    }

    /// Commit on success, roll back on error
    pub(crate) async fn settle<T>(&self, tx: S::Tx, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.store.commit(tx).await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = self.store.rollback(tx).await {
                    error!("Rollback failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    fn lease(&self) -> Duration {
        let secs = self.config.claim_lease_secs.min(MAX_CLAIM_LEASE_SECS);
        Duration::seconds(secs as i64)
    }

    /// Resolve provider, family and session parameters for a domain
    async fn resolve(&self, tx: &mut S::Tx, domain: &str) -> Result<ResolvedProvider> {
        let providers = self.store.active_providers(tx, "domain").await?;
        RegistryDirectory::from_providers(providers)
            .with_session_defaults(self.config.session.clone())
            .resolve_domain(domain)
    }

    async fn open_session(&self, resolved: &ResolvedProvider) -> Result<TimedSession> {
        let connector = self.connectors.connector_for(&resolved.family)?;
        TimedSession::connect(
            connector.as_ref(),
            &resolved.session,
            self.config.connect_timeout_secs,
            self.config.command_timeout_secs,
        )
        .await
    }

    /// Failure log entry plus attempt bookkeeping
    async fn record_failure(&self, attempt: &Attempt, acting_user_id: i64, err: &Error) {
        let entry = ServiceLogEntry::system(
            attempt.service_id.unwrap_or(0),
            events::ORDER_ACTIVATION_FAILED,
            acting_user_id,
            err.to_string(),
        );
        if let Err(log_err) = self.store.append_service_log(entry).await {
            error!("Failed to append failure log entry: {}", log_err);
        }

        if let Some(order_id) = attempt.order_id
            && let Err(book_err) = self
                .record_attempt(order_id, attempt.restore_status, err)
                .await
        {
            warn!(
                "Failed to record attempt bookkeeping for order {}: {}",
                order_id, book_err
            );
        }
    }

    /// Count the failed attempt on the order and release its claim
    ///
    /// `restore_status` is the status to return a still-claimed order to; it
    /// is `None` when this attempt never committed a claim, and such an order
    /// in `provisioning` belongs to someone else.
    async fn record_attempt(
        &self,
        order_id: i64,
        restore_status: Option<OrderStatus>,
        err: &Error,
    ) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let result = self
            .record_attempt_in(&mut tx, order_id, restore_status, err)
            .await;
        self.settle(tx, result).await
    }

    async fn record_attempt_in(
        &self,
        tx: &mut S::Tx,
        order_id: i64,
        restore_status: Option<OrderStatus>,
        err: &Error,
    ) -> Result<()> {
        let Some(order) = self.store.lock_order(tx, order_id).await? else {
            return Ok(());
        };

        let status = match (order.status, restore_status) {
            (OrderStatus::Provisioning, None) => return Ok(()),
            (OrderStatus::Provisioning, Some(_))
            | (OrderStatus::Pending | OrderStatus::Failed, _)
                if self.config.mark_failed_orders =>
            {
                OrderStatus::Failed
            }
            (OrderStatus::Provisioning, Some(restore)) => restore,
            (current, _) => current,
        };

        let mut data = order.service_data;
        let state = data.provisioning.get_or_insert_with(ProvisioningState::default);
        state.attempts = state.attempts.saturating_add(1);
        state.last_attempt_at = Some(Utc::now());
        state.last_error_kind = Some(err.kind().as_str().to_string());
        data.last_error = Some(err.to_string());

        self.store.update_order(tx, order_id, status, &data).await
    }
}

fn required_domain(data: &ServiceData) -> Result<String> {
    data.domain
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_lowercase)
        .ok_or_else(|| Error::invalid_input("Order service data has no domain name"))
}

fn clear_failure(data: &mut ServiceData) {
    data.last_error = None;
    if let Some(state) = data.provisioning.as_mut() {
        state.last_error_kind = None;
    }
}

/// Whether a domain-info answer shows the domain under our own login
///
/// Answers without a sponsoring client id are taken as ours.
fn sponsored_by_us(info: &DomainInfo, resolved: &ResolvedProvider) -> bool {
    let Some(sponsor) = info.extra.get("clID").and_then(|v| v.as_str()) else {
        return true;
    };
    sponsor == resolved.session.username
        || resolved.session.client_id.as_deref() == Some(sponsor)
}
