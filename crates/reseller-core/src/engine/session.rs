//! Deadline-enforcing wrapper around a registry session
//!
//! Registry commands cannot be cancelled once sent. When a mutating command
//! misses its deadline the registry may still have executed it, so the
//! wrapper reports `Error::UnknownOutcome` rather than a plain failure.
//! Read-only commands and session management report `Error::Connection`.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::directory::SessionParams;
use crate::error::{Error, Result};
use crate::traits::{
    CommandParams, ContactCreated, DomainCreated, DomainInfo, DomainRenewed, RegistryConnector,
    RegistrySession,
};

async fn deadline<T>(
    command: &'static str,
    secs: u64,
    mutating: bool,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(Duration::from_secs(secs), fut).await {
        Ok(result) => result,
        Err(_) if mutating => {
            warn!(command, timeout_secs = secs, "Registry command timed out, outcome unknown");
            Err(Error::unknown_outcome(command, secs))
        }
        Err(_) => Err(Error::connection(format!(
            "{} timed out after {}s",
            command, secs
        ))),
    }
}

/// Registry session with a hard per-command timeout
pub struct TimedSession {
    inner: Box<dyn RegistrySession>,
    command_timeout_secs: u64,
}

impl TimedSession {
    /// Open a session through `connector` within `connect_timeout_secs`
    ///
    /// The provider's own `timeout_secs` overrides `command_timeout_secs`.
    pub async fn connect(
        connector: &dyn RegistryConnector,
        params: &SessionParams,
        connect_timeout_secs: u64,
        command_timeout_secs: u64,
    ) -> Result<Self> {
        debug!(
            connector = connector.connector_name(),
            host = %params.host,
            port = params.port,
            family = %params.family,
            "Opening registry session"
        );
        let inner = deadline(
            "Login",
            connect_timeout_secs,
            false,
            connector.connect(params),
        )
        .await?;
        Ok(Self {
            inner,
            command_timeout_secs: params.timeout_secs.unwrap_or(command_timeout_secs),
        })
    }

    /// Wrap an already open session
    pub fn new(inner: Box<dyn RegistrySession>, command_timeout_secs: u64) -> Self {
        Self {
            inner,
            command_timeout_secs,
        }
    }

    /// Log out, ignoring failures
    pub async fn close(mut self) {
        if let Err(e) = self.logout().await {
            warn!(error = %e, "Registry logout failed");
        }
    }
}

#[async_trait]
impl RegistrySession for TimedSession {
    async fn create_contact(&mut self, params: &CommandParams) -> Result<ContactCreated> {
        let secs = self.command_timeout_secs;
        deadline("ContactCreate", secs, true, self.inner.create_contact(params)).await
    }

    async fn create_domain(&mut self, params: &CommandParams) -> Result<DomainCreated> {
        let secs = self.command_timeout_secs;
        deadline("DomainCreate", secs, true, self.inner.create_domain(params)).await
    }

    async fn renew_domain(&mut self, params: &CommandParams) -> Result<DomainRenewed> {
        let secs = self.command_timeout_secs;
        deadline("DomainRenew", secs, true, self.inner.renew_domain(params)).await
    }

    async fn update_domain_contacts(&mut self, params: &CommandParams) -> Result<()> {
        let secs = self.command_timeout_secs;
        deadline(
            "DomainUpdateContacts",
            secs,
            true,
            self.inner.update_domain_contacts(params),
        )
        .await
    }

    async fn update_domain_nameservers(&mut self, params: &CommandParams) -> Result<()> {
        let secs = self.command_timeout_secs;
        deadline(
            "DomainUpdateNS",
            secs,
            true,
            self.inner.update_domain_nameservers(params),
        )
        .await
    }

    async fn update_domain_status(&mut self, params: &CommandParams) -> Result<()> {
        let secs = self.command_timeout_secs;
        deadline(
            "DomainUpdateStatus",
            secs,
            true,
            self.inner.update_domain_status(params),
        )
        .await
    }

    async fn update_domain_dnssec(&mut self, params: &CommandParams) -> Result<()> {
        let secs = self.command_timeout_secs;
        deadline(
            "DomainUpdateDNSSEC",
            secs,
            true,
            self.inner.update_domain_dnssec(params),
        )
        .await
    }

    async fn update_domain_auth_info(&mut self, params: &CommandParams) -> Result<()> {
        let secs = self.command_timeout_secs;
        deadline(
            "DomainUpdateAuthinfo",
            secs,
            true,
            self.inner.update_domain_auth_info(params),
        )
        .await
    }

    async fn domain_info(&mut self, params: &CommandParams) -> Result<Option<DomainInfo>> {
        let secs = self.command_timeout_secs;
        deadline("DomainInfo", secs, false, self.inner.domain_info(params)).await
    }

    async fn logout(&mut self) -> Result<()> {
        let secs = self.command_timeout_secs;
        deadline("Logout", secs, false, self.inner.logout()).await
    }
}
