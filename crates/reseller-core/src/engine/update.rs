//! Registry-side changes to an already provisioned domain

use chrono::Utc;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::{error, info};

use super::{ProvisioningEngine, payload};
use crate::error::{Error, Result};
use crate::directory::ResolvedProvider;
use crate::extension::ObjectType;
use crate::model::{Role, ServiceData, ServiceLogEntry, ServiceRecord, events};
use crate::traits::{BackofficeStore, CommandParams, RegistrySession};

/// A change to apply to a registered domain
#[derive(Debug, Clone, PartialEq)]
pub enum DomainUpdate {
    /// Reassign roles to existing registry contact ids
    Contacts(BTreeMap<Role, String>),
    /// Replace the delegated nameservers
    Nameservers(Vec<String>),
    /// Add and remove client status codes
    Status { add: Vec<String>, remove: Vec<String> },
    /// Replace DNSSEC delegation data
    Dnssec(Value),
    /// Set a new authorization code
    AuthInfo(String),
}

impl DomainUpdate {
    /// Short name for logs
    pub fn label(&self) -> &'static str {
        match self {
            DomainUpdate::Contacts(_) => "contacts",
            DomainUpdate::Nameservers(_) => "nameservers",
            DomainUpdate::Status { .. } => "status",
            DomainUpdate::Dnssec(_) => "dnssec",
            DomainUpdate::AuthInfo(_) => "auth_info",
        }
    }

    fn params(&self, domain: &str) -> CommandParams {
        let mut params = payload::domain_name(domain);
        match self {
            DomainUpdate::Contacts(roles) => {
                if let Some(registrant) = roles.get(&Role::Registrant) {
                    params.insert("registrant".into(), json!(registrant));
                }
                let slots: serde_json::Map<String, Value> = roles
                    .iter()
                    .filter(|(role, _)| **role != Role::Registrant)
                    .map(|(role, id)| (role.as_str().to_string(), json!(id)))
                    .collect();
                if !slots.is_empty() {
                    params.insert("contacts".into(), Value::Object(slots));
                }
            }
            DomainUpdate::Nameservers(hosts) => {
                params.insert("nss".into(), json!(clean(hosts)));
            }
            DomainUpdate::Status { add, remove } => {
                params.insert("add".into(), json!(add));
                params.insert("remove".into(), json!(remove));
            }
            DomainUpdate::Dnssec(records) => {
                params.insert("dnssec".into(), records.clone());
            }
            DomainUpdate::AuthInfo(code) => {
                params.insert("authInfoPw".into(), json!(code));
            }
        }
        params
    }

    fn apply_to(&self, config: &mut ServiceData) {
        match self {
            DomainUpdate::Contacts(roles) => {
                for (role, id) in roles {
                    config.set_registry_id(*role, id);
                }
            }
            DomainUpdate::Nameservers(hosts) => {
                config.nameservers = clean(hosts);
            }
            DomainUpdate::Status { add, remove } => {
                let mut status = config.status.take().unwrap_or_default();
                status.retain(|code| !remove.contains(code));
                for code in add {
                    if !status.contains(code) {
                        status.push(code.clone());
                    }
                }
                config.status = Some(status);
            }
            DomainUpdate::Dnssec(records) => {
                config.dnssec = Some(records.clone());
            }
            DomainUpdate::AuthInfo(code) => {
                config.authcode = Some(code.clone());
            }
        }
    }
}

fn clean(hosts: &[String]) -> Vec<String> {
    hosts
        .iter()
        .map(|h| h.trim().to_lowercase())
        .filter(|h| !h.is_empty())
        .collect()
}

impl<S: BackofficeStore> ProvisioningEngine<S> {
    /// Apply a registry-side change to a provisioned domain
    ///
    /// The command goes through the family's domain extension, and on success
    /// the service config is updated and a `domain_updated` log entry appended.
    ///
    /// # Parameters
    ///
    /// - `service_id`: Domain service to change
    /// - `update`: The change
    /// - `acting_user_id`: User on whose behalf this runs
    pub async fn apply_domain_update(
        &self,
        service_id: i64,
        update: DomainUpdate,
        acting_user_id: i64,
    ) -> Result<ServiceRecord> {
        match self.update_domain(service_id, &update).await {
            Ok(service) => {
                info!(
                    "Applied {} update to {} (service {})",
                    update.label(),
                    service.name(),
                    service_id
                );
                let entry = ServiceLogEntry::system(
                    service_id,
                    events::DOMAIN_UPDATED,
                    acting_user_id,
                    format!("{} updated", update.label()),
                );
                if let Err(e) = self.store.append_service_log(entry).await {
                    error!("Failed to append update log entry: {}", e);
                }
                Ok(service)
            }
            Err(e) => {
                error!(
                    "{} update failed for service {}: {}",
                    update.label(),
                    service_id,
                    e
                );
                Err(e)
            }
        }
    }

    async fn update_domain(&self, service_id: i64, update: &DomainUpdate) -> Result<ServiceRecord> {
        let mut tx = self.store.begin().await?;
        let result = self.update_target(&mut tx, service_id).await;
        let (service, resolved) = self.settle(tx, result).await?;

        let domain = service.name().to_string();
        let params = self.extensions.extend(
            ObjectType::Domain,
            update.params(&domain),
            &resolved.family,
            &service.config,
        );

        let mut session = self.open_session(&resolved).await?;
        let result = match update {
            DomainUpdate::Contacts(_) => session.update_domain_contacts(&params).await,
            DomainUpdate::Nameservers(_) => session.update_domain_nameservers(&params).await,
            DomainUpdate::Status { .. } => session.update_domain_status(&params).await,
            DomainUpdate::Dnssec(_) => session.update_domain_dnssec(&params).await,
            DomainUpdate::AuthInfo(_) => session.update_domain_auth_info(&params).await,
        };
        session.close().await;
        result?;

        let mut tx = self.store.begin().await?;
        let result = self.record_update(&mut tx, service_id, update).await;
        self.settle(tx, result).await
    }

    async fn update_target(
        &self,
        tx: &mut S::Tx,
        service_id: i64,
    ) -> Result<(ServiceRecord, ResolvedProvider)> {
        let service = self.domain_service(tx, service_id).await?;
        let resolved = self.resolve(tx, service.name()).await?;
        Ok((service, resolved))
    }

    /// Apply the change to the service config as it is now
    async fn record_update(
        &self,
        tx: &mut S::Tx,
        service_id: i64,
        update: &DomainUpdate,
    ) -> Result<ServiceRecord> {
        let mut service = self.domain_service(tx, service_id).await?;
        let now = Utc::now();
        update.apply_to(&mut service.config);
        self.store
            .update_service_config(tx, service_id, &service.config, now)
            .await?;
        service.updated_at = Some(now);
        Ok(service)
    }

    async fn domain_service(&self, tx: &mut S::Tx, service_id: i64) -> Result<ServiceRecord> {
        let service = self
            .store
            .service(tx, service_id)
            .await?
            .ok_or_else(|| Error::consistency(format!("Service {} not found", service_id)))?;
        if service.service_type != "domain" {
            return Err(Error::unsupported(format!(
                "{}.update",
                service.service_type
            )));
        }
        Ok(service)
    }
}
