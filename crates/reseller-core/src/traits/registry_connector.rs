// # Registry Connector Trait
//
// Defines the interface for opening authenticated sessions to a registry.
//
// ## Implementations
//
// - JSON gateway: `reseller-registry-gateway` crate
// - Scripted doubles: `tests/common` in this crate
//
// ## Usage
//
// ```rust,ignore
// use reseller_core::traits::RegistryConnector;
//
// let mut session = connector.connect(&resolved.session).await?;
// let contact = session.create_contact(&params).await?;
// session.logout().await?;
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::directory::SessionParams;

/// Command payload in the registry's own key naming
pub type CommandParams = Map<String, Value>;

/// Result of a contact-create command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactCreated {
    /// Registry-assigned contact id
    pub id: String,
}

/// Result of a domain-create command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainCreated {
    /// Creation date reported by the registry
    pub cr_date: Option<DateTime<Utc>>,
    /// Expiry date reported by the registry
    pub ex_date: Option<DateTime<Utc>>,
}

/// Result of a domain-renew command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainRenewed {
    /// New expiry date reported by the registry
    pub ex_date: Option<DateTime<Utc>>,
}

/// Result of a domain-info query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DomainInfo {
    pub name: String,
    /// Registry status codes (e.g. "ok", "clientHold")
    pub status: Vec<String>,
    pub cr_date: Option<DateTime<Utc>>,
    pub ex_date: Option<DateTime<Utc>>,
    /// Any further fields the registry returned
    pub extra: Map<String, Value>,
}

/// One authenticated, single-use registry session
///
/// A session is opened for one provisioning attempt and dropped after it.
/// Sessions are never pooled or shared between orders.
///
/// Every command either returns its typed result or an error. An explicit
/// registry refusal is `Error::RegistryProtocol` carrying the registry text
/// verbatim; transport failures are `Error::Connection`.
#[async_trait]
pub trait RegistrySession: Send {
    /// Create a contact object
    ///
    /// # Parameters
    ///
    /// - `params`: Contact payload (id, names, address, phone, email, authInfoPw)
    ///
    /// # Returns
    ///
    /// - `Ok(ContactCreated)`: The registry id of the new contact
    /// - `Err(Error)`: If the registry refused or the transport failed
    async fn create_contact(&mut self, params: &CommandParams) -> crate::Result<ContactCreated>;

    /// Create a domain object
    ///
    /// # Parameters
    ///
    /// - `params`: Domain payload (domainname, period, authInfoPw, nss, contact ids)
    ///
    /// # Returns
    ///
    /// - `Ok(DomainCreated)`: Registry dates, when reported
    /// - `Err(Error)`: If the registry refused or the transport failed
    async fn create_domain(&mut self, params: &CommandParams) -> crate::Result<DomainCreated>;

    /// Renew a domain object
    ///
    /// # Parameters
    ///
    /// - `params`: Renewal payload (domainname, regperiod)
    async fn renew_domain(&mut self, params: &CommandParams) -> crate::Result<DomainRenewed>;

    /// Replace contact assignments of a domain
    async fn update_domain_contacts(&mut self, params: &CommandParams) -> crate::Result<()>;

    /// Replace the delegated nameservers of a domain
    async fn update_domain_nameservers(&mut self, params: &CommandParams) -> crate::Result<()>;

    /// Add or remove client status codes
    async fn update_domain_status(&mut self, params: &CommandParams) -> crate::Result<()>;

    /// Replace DNSSEC delegation data
    async fn update_domain_dnssec(&mut self, params: &CommandParams) -> crate::Result<()>;

    /// Change the authorization code
    async fn update_domain_auth_info(&mut self, params: &CommandParams) -> crate::Result<()>;

    /// Query a domain object
    ///
    /// # Returns
    ///
    /// - `Ok(Some(DomainInfo))`: The domain exists at the registry
    /// - `Ok(None)`: The registry does not know the domain
    /// - `Err(Error)`: If the query itself failed
    async fn domain_info(&mut self, params: &CommandParams) -> crate::Result<Option<DomainInfo>>;

    /// End the session
    async fn logout(&mut self) -> crate::Result<()>;
}

/// Factory for registry sessions of one connector implementation
#[async_trait]
pub trait RegistryConnector: Send + Sync {
    /// Open and authenticate a session
    ///
    /// # Parameters
    ///
    /// - `params`: Endpoint, TLS options and login credentials for one provider
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn RegistrySession>)`: A logged-in session
    /// - `Err(Error::Connection)`: If the registry is unreachable or login fails
    /// - `Err(Error::Configuration)`: If the parameters cannot be used
    async fn connect(&self, params: &SessionParams) -> crate::Result<Box<dyn RegistrySession>>;

    /// Get the connector name (for logging/debugging)
    fn connector_name(&self) -> &'static str;
}
