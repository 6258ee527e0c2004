// # Registry Gateway Connector
//
// `RegistryConnector` implementation that talks to an EPP gateway over
// HTTP(S) with JSON bodies. The gateway holds the EPP connection and
// translates each request into one EPP command.
//
// ## Protocol
//
// - `POST /v1/login` with `clID`, `pw`, `clientId` and `extensions`;
//   answers `{"session": "<token>"}`
// - `POST /v1/command/<Command>` with the command payload as body, the session
//   token in `X-Session` and a client transaction id in `X-Client-Transaction`
// - `POST /v1/logout`
//
// Command answers carry the EPP result: `{"code": 1000, "msg": "...", "data": {...}}`.
// Codes below 2000 are success. Any other code is a registry refusal and the
// message is passed through verbatim.
//
// ## Error Mapping
//
// - Transport failure, HTTP 401/403/429/5xx: `Error::Connection`
// - Transport timeout on a mutating command: `Error::UnknownOutcome`
// - EPP code >= 2000: `Error::RegistryProtocol`
// - EPP 2303 on `DomainInfo`: `Ok(None)`
//
// ## Security
//
// Passwords and key passphrases never appear in logs or `Debug` output.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use reseller_core::directory::SessionParams;
use reseller_core::error::{Error, Result};
use reseller_core::traits::{
    CommandParams, ContactCreated, DomainCreated, DomainInfo, DomainRenewed, RegistryConnector,
    RegistrySession,
};

/// Default HTTP timeout when the provider does not set one
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// EPP "object does not exist"
const EPP_OBJECT_DOES_NOT_EXIST: u64 = 2303;

/// Header carrying the session token
const SESSION_HEADER: &str = "X-Session";

/// Header carrying the client transaction id
const TRANSACTION_HEADER: &str = "X-Client-Transaction";

/// Connector for the JSON registry gateway
pub struct GatewayConnector {
    client_prefix: String,
    counter: AtomicU64,
}

impl std::fmt::Debug for GatewayConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConnector")
            .field("client_prefix", &self.client_prefix)
            .finish()
    }
}

impl GatewayConnector {
    /// Create a gateway connector
    ///
    /// # Parameters
    ///
    /// - `client_prefix`: Prefix of the client transaction ids sent with every command
    pub fn new(client_prefix: impl Into<String>) -> Self {
        Self {
            client_prefix: client_prefix.into(),
            counter: AtomicU64::new(0),
        }
    }

    fn next_transaction_prefix(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{}", self.client_prefix, Utc::now().timestamp(), n)
    }

    fn build_client(params: &SessionParams) -> Result<reqwest::Client> {
        let timeout = params.timeout_secs.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(timeout));

        if let Some(bind_ip) = params.bind_ip.as_deref() {
            let addr: IpAddr = bind_ip.parse().map_err(|_| {
                Error::config(format!("Invalid bind_ip for {}: {}", params.provider_name, bind_ip))
            })?;
            builder = builder.local_address(addr);
        }

        let tls = &params.tls;
        if tls.enabled {
            if !tls.verify_peer || tls.allow_self_signed {
                warn!(
                    "TLS certificate verification disabled for provider {}",
                    params.provider_name
                );
                builder = builder.danger_accept_invalid_certs(true);
            }
            if !tls.verify_peer_name {
                builder = builder.danger_accept_invalid_hostnames(true);
            }

            if let Some(ca_file) = &tls.ca_file {
                let pem = read_file(ca_file)?;
                let cert = reqwest::Certificate::from_pem(&pem)
                    .map_err(|e| Error::config(format!("Invalid CA file {}: {}", ca_file.display(), e)))?;
                builder = builder.add_root_certificate(cert);
            }

            match (&tls.cert_file, &tls.key_file) {
                (Some(cert_file), Some(key_file)) => {
                    if tls.passphrase.is_some() {
                        return Err(Error::config(format!(
                            "Encrypted client keys are not supported (provider {})",
                            params.provider_name
                        )));
                    }
                    let cert = read_file(cert_file)?;
                    let key = read_file(key_file)?;
                    let identity = reqwest::Identity::from_pkcs8_pem(&cert, &key).map_err(|e| {
                        Error::config(format!("Invalid client certificate: {}", e))
                    })?;
                    builder = builder.identity(identity);
                }
                (None, None) => {}
                _ => {
                    return Err(Error::config(format!(
                        "Client certificate needs both cert_file and key_file (provider {})",
                        params.provider_name
                    )));
                }
            }
        }

        builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))
    }
}

impl Default for GatewayConnector {
    fn default() -> Self {
        Self::new("rsl")
    }
}

fn read_file(path: &std::path::Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| Error::config(format!("Failed to read {}: {}", path.display(), e)))
}

/// `scheme://host:port` of the gateway for one provider
fn base_url(params: &SessionParams) -> String {
    let scheme = if params.tls.enabled { "https" } else { "http" };
    format!("{}://{}:{}", scheme, params.host, params.port)
}

/// Map a non-success HTTP status to an error
fn status_error(command: &str, status: reqwest::StatusCode, body: &str) -> Error {
    match status.as_u16() {
        401 | 403 => Error::connection(format!(
            "{}: gateway rejected the session. Status: {}",
            command, status
        )),
        429 => Error::connection(format!(
            "{}: gateway rate limit exceeded. Status: {}",
            command, status
        )),
        500..=599 => Error::connection(format!(
            "{}: gateway server error (transient): {} - {}",
            command, status, body
        )),
        _ => Error::connection(format!("{}: gateway request failed: {} - {}", command, status, body)),
    }
}

/// EPP result envelope returned for every command
#[derive(Debug, Deserialize)]
struct Envelope {
    code: u64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Map<String, Value>,
}

impl Envelope {
    fn is_success(&self) -> bool {
        self.code < 2000
    }

    fn into_data(self, command: &str) -> Result<Map<String, Value>> {
        if self.is_success() {
            Ok(self.data)
        } else {
            Err(Error::registry(command, self.msg))
        }
    }
}

fn date_field(data: &Map<String, Value>, key: &str) -> Option<DateTime<Utc>> {
    let raw = data.get(key)?.as_str()?;
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(e) => {
            warn!("Ignoring unparseable {} '{}': {}", key, raw, e);
            None
        }
    }
}

#[async_trait]
impl RegistryConnector for GatewayConnector {
    async fn connect(&self, params: &SessionParams) -> Result<Box<dyn RegistrySession>> {
        let client = Self::build_client(params)?;
        let base = base_url(params);

        let login = json!({
            "clID": params.username,
            "pw": params.password,
            "clientId": params.client_id,
            "extensions": params.login_extensions,
        });

        debug!("Logging in to gateway {} as {}", base, params.username);
        let response = client
            .post(format!("{}/v1/login", base))
            .json(&login)
            .send()
            .await
            .map_err(|e| Error::connection(format!("Login: HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(status_error("Login", status, &body));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::connection(format!("Login: failed to parse response: {}", e)))?;

        if let Some(code) = body.get("code").and_then(Value::as_u64)
            && code >= 2000
        {
            let msg = body.get("msg").and_then(Value::as_str).unwrap_or_default();
            return Err(Error::connection(format!("Login refused ({}): {}", code, msg)));
        }

        let token = body
            .get("session")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::connection("Login: response carries no session token"))?
            .to_string();

        info!(
            "Gateway session opened for provider {} ({})",
            params.provider_name, params.family
        );
        Ok(Box::new(GatewaySession {
            client,
            base,
            token,
            transaction_prefix: self.next_transaction_prefix(),
            sequence: 0,
            timeout_secs: params.timeout_secs.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
        }))
    }

    fn connector_name(&self) -> &'static str {
        "gateway"
    }
}

/// One logged-in gateway session
pub struct GatewaySession {
    client: reqwest::Client,
    base: String,
    token: String,
    transaction_prefix: String,
    sequence: u64,
    timeout_secs: u64,
}

impl std::fmt::Debug for GatewaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySession")
            .field("base", &self.base)
            .field("token", &"<REDACTED>")
            .field("transaction_prefix", &self.transaction_prefix)
            .finish()
    }
}

impl GatewaySession {
    fn next_transaction_id(&mut self) -> String {
        self.sequence += 1;
        format!("{}-{}", self.transaction_prefix, self.sequence)
    }

    /// Send one command and return the raw envelope
    ///
    /// `mutating` decides how a transport timeout is reported: a write that
    /// timed out may have been applied, a read has not changed anything.
    async fn call(&mut self, command: &str, params: &CommandParams, mutating: bool) -> Result<Envelope> {
        let transaction_id = self.next_transaction_id();
        debug!("{} [{}]", command, transaction_id);

        let response = self
            .client
            .post(format!("{}/v1/command/{}", self.base, command))
            .header(SESSION_HEADER, &self.token)
            .header(TRANSACTION_HEADER, &transaction_id)
            .json(params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() && mutating {
                    warn!("{} [{}] timed out, outcome unknown", command, transaction_id);
                    Error::unknown_outcome(command, self.timeout_secs)
                } else {
                    Error::connection(format!("{}: HTTP request failed: {}", command, e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(status_error(command, status, &body));
        }

        response
            .json::<Envelope>()
            .await
            .map_err(|e| Error::connection(format!("{}: failed to parse response: {}", command, e)))
    }

    async fn command(&mut self, command: &str, params: &CommandParams) -> Result<Map<String, Value>> {
        self.call(command, params, true).await?.into_data(command)
    }
}

#[async_trait]
impl RegistrySession for GatewaySession {
    async fn create_contact(&mut self, params: &CommandParams) -> Result<ContactCreated> {
        let data = self.command("ContactCreate", params).await?;
        let id = data
            .get("id")
            .and_then(Value::as_str)
            .or_else(|| params.get("id").and_then(Value::as_str))
            .ok_or_else(|| Error::registry("ContactCreate", "response carries no contact id"))?;
        Ok(ContactCreated { id: id.to_string() })
    }

    async fn create_domain(&mut self, params: &CommandParams) -> Result<DomainCreated> {
        let data = self.command("DomainCreate", params).await?;
        Ok(DomainCreated {
            cr_date: date_field(&data, "crDate"),
            ex_date: date_field(&data, "exDate"),
        })
    }

    async fn renew_domain(&mut self, params: &CommandParams) -> Result<DomainRenewed> {
        let data = self.command("DomainRenew", params).await?;
        Ok(DomainRenewed {
            ex_date: date_field(&data, "exDate"),
        })
    }

    async fn update_domain_contacts(&mut self, params: &CommandParams) -> Result<()> {
        self.command("DomainUpdateContacts", params).await.map(|_| ())
    }

    async fn update_domain_nameservers(&mut self, params: &CommandParams) -> Result<()> {
        self.command("DomainUpdateNS", params).await.map(|_| ())
    }

    async fn update_domain_status(&mut self, params: &CommandParams) -> Result<()> {
        self.command("DomainUpdateStatus", params).await.map(|_| ())
    }

    async fn update_domain_dnssec(&mut self, params: &CommandParams) -> Result<()> {
        self.command("DomainUpdateDNSSEC", params).await.map(|_| ())
    }

    async fn update_domain_auth_info(&mut self, params: &CommandParams) -> Result<()> {
        self.command("DomainUpdateAuthinfo", params).await.map(|_| ())
    }

    async fn domain_info(&mut self, params: &CommandParams) -> Result<Option<DomainInfo>> {
        let envelope = self.call("DomainInfo", params, false).await?;
        if envelope.code == EPP_OBJECT_DOES_NOT_EXIST {
            return Ok(None);
        }
        let mut data = envelope.into_data("DomainInfo")?;

        let name = data
            .remove("name")
            .and_then(|v| v.as_str().map(str::to_string))
            .or_else(|| params.get("domainname").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_default();
        let status = match data.remove("status") {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(single)) => vec![single],
            _ => Vec::new(),
        };
        let cr_date = date_field(&data, "crDate");
        let ex_date = date_field(&data, "exDate");
        data.remove("crDate");
        data.remove("exDate");

        Ok(Some(DomainInfo {
            name,
            status,
            cr_date,
            ex_date,
            extra: data,
        }))
    }

    async fn logout(&mut self) -> Result<()> {
        let transaction_id = self.next_transaction_id();
        let response = self
            .client
            .post(format!("{}/v1/logout", self.base))
            .header(SESSION_HEADER, &self.token)
            .header(TRANSACTION_HEADER, &transaction_id)
            .send()
            .await
            .map_err(|e| Error::connection(format!("Logout: HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(status_error("Logout", status, ""));
        }
        debug!("Gateway session closed");
        Ok(())
    }
}
