//! Registry Directory
//!
//! Maps a domain suffix to the active provider that sells it and to the
//! registry family whose protocol extensions apply. Pure lookup over a
//! snapshot of provider rows; the directory never touches storage itself.
//!
//! ## Matching rules
//!
//! - Only providers with `type = 'domain'` and `status = 'active'` take part.
//! - A provider sells a suffix when its pricing table has the suffix as a key
//!   (a leading `.` on the key is ignored).
//! - Providers are tried in the order they were loaded and the first match
//!   wins. Overlapping suffixes across providers are a configuration mistake.
//! - For a full domain name, candidate suffixes are tried longest first, so
//!   `shop.example.co.uk` tries `example.co.uk`, `co.uk`, then `uk`.

mod family;

pub use family::{RegistryFamily, normalize_suffix, resolve_registry_family};

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::SessionDefaults;
use crate::error::{Error, Result};
use crate::model::{ProviderRecord, Role};

/// Login extensions announced to generic-family registries
pub const GENERIC_LOGIN_EXTENSIONS: [&str; 2] = [
    "urn:ietf:params:xml:ns:secDNS-1.1",
    "urn:ietf:params:xml:ns:rgp-1.0",
];

/// TLS options for a registry session
#[derive(Clone, PartialEq, Eq)]
pub struct TlsOptions {
    /// Use TLS at all
    pub enabled: bool,
    pub verify_peer: bool,
    pub verify_peer_name: bool,
    pub allow_self_signed: bool,
    /// Client certificate (PEM)
    pub cert_file: Option<PathBuf>,
    /// Client private key (PEM)
    pub key_file: Option<PathBuf>,
    /// CA bundle used to verify the registry
    pub ca_file: Option<PathBuf>,
    /// Passphrase protecting the client key
    pub passphrase: Option<String>,
}

impl fmt::Debug for TlsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsOptions")
            .field("enabled", &self.enabled)
            .field("verify_peer", &self.verify_peer)
            .field("verify_peer_name", &self.verify_peer_name)
            .field("allow_self_signed", &self.allow_self_signed)
            .field("cert_file", &self.cert_file)
            .field("key_file", &self.key_file)
            .field("ca_file", &self.ca_file)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Everything a connector needs to open one authenticated session
#[derive(Clone, PartialEq, Eq)]
pub struct SessionParams {
    pub provider_id: i64,
    pub provider_name: String,
    pub family: RegistryFamily,
    pub host: String,
    pub port: u16,
    /// Login identifier (`clID`)
    pub username: String,
    pub password: String,
    /// Registrar client id, when the registry distinguishes it from the login
    pub client_id: Option<String>,
    pub tls: TlsOptions,
    /// Local address to bind before connecting
    pub bind_ip: Option<String>,
    /// Per-provider override of the command timeout
    pub timeout_secs: Option<u64>,
    pub login_extensions: Vec<String>,
}

impl fmt::Debug for SessionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionParams")
            .field("provider_id", &self.provider_id)
            .field("provider_name", &self.provider_name)
            .field("family", &self.family)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("client_id", &self.client_id)
            .field("tls", &self.tls)
            .field("bind_ip", &self.bind_ip)
            .field("timeout_secs", &self.timeout_secs)
            .field("login_extensions", &self.login_extensions)
            .finish()
    }
}

/// Outcome of a successful directory lookup
#[derive(Debug, Clone)]
pub struct ResolvedProvider {
    pub provider: ProviderRecord,
    /// The pricing key that matched, normalized
    pub suffix: String,
    pub family: RegistryFamily,
    pub session: SessionParams,
    /// Contact roles this registry expects, in order
    pub contact_roles: Vec<Role>,
}

impl ResolvedProvider {
    /// Price for `action` over `years` from the provider's pricing table
    pub fn price(&self, action: &str, years: u32) -> Option<Decimal> {
        price_in(&self.provider.pricing, &self.suffix, action, years)
    }
}

#[derive(Debug, Default, Deserialize)]
struct AuthDoc {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CredentialsDoc {
    #[serde(default)]
    auth: Option<AuthDoc>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    ssl: Option<bool>,
    #[serde(default)]
    cert_file: Option<String>,
    #[serde(default)]
    key_file: Option<String>,
    #[serde(default)]
    cafile: Option<String>,
    #[serde(default)]
    passphrase: Option<String>,
    #[serde(default)]
    verify_peer: Option<bool>,
    #[serde(default)]
    verify_peer_name: Option<bool>,
    #[serde(default)]
    allow_self_signed: Option<bool>,
    #[serde(default)]
    bind_ip: Option<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(rename = "contactRoles", default)]
    contact_roles: Option<Vec<String>>,
    #[serde(default)]
    login_extensions: Option<Vec<String>>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Registry Directory over a snapshot of provider rows
#[derive(Debug, Clone, Default)]
pub struct RegistryDirectory {
    providers: Vec<ProviderRecord>,
    defaults: SessionDefaults,
}

impl RegistryDirectory {
    /// Build a directory; inactive and non-domain providers are ignored
    pub fn from_providers(providers: Vec<ProviderRecord>) -> Self {
        Self {
            providers: providers
                .into_iter()
                .filter(ProviderRecord::is_active_domain_provider)
                .collect(),
            defaults: SessionDefaults::default(),
        }
    }

    /// Replace the TLS defaults used when a provider leaves them unset
    pub fn with_session_defaults(mut self, defaults: SessionDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Number of candidate providers
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// First provider whose pricing table declares `suffix`
    ///
    /// # Returns
    ///
    /// - `Ok(&ProviderRecord)`: The matching provider
    /// - `Err(Error::Configuration)`: If no active provider sells the suffix
    pub fn resolve_provider(&self, suffix: &str) -> Result<&ProviderRecord> {
        let wanted = normalize_suffix(suffix);
        self.find(&wanted).ok_or_else(|| {
            Error::config(format!("No active provider configured for .{}", wanted))
        })
    }

    /// Registry family for a suffix
    pub fn resolve_registry_family(&self, suffix: &str) -> RegistryFamily {
        resolve_registry_family(suffix)
    }

    /// Resolve the provider, family and session parameters for a domain name
    ///
    /// # Parameters
    ///
    /// - `domain`: Fully qualified domain name (e.g., "shop.example.co.uk")
    ///
    /// # Returns
    ///
    /// - `Ok(ResolvedProvider)`: Provider plus parsed session parameters
    /// - `Err(Error)`: If the name is malformed, no provider matches, or the
    ///   matching provider's endpoint or credentials are incomplete
    pub fn resolve_domain(&self, domain: &str) -> Result<ResolvedProvider> {
        let name = normalize_suffix(domain);
        let labels: Vec<&str> = name.split('.').collect();
        if labels.len() < 2 || labels.iter().any(|label| label.is_empty()) {
            return Err(Error::invalid_input(format!(
                "Invalid domain name: '{}'",
                domain
            )));
        }

        let (provider, suffix) = self.match_domain(&labels).ok_or_else(|| {
            Error::config(format!("No active provider configured for {}", name))
        })?;
        let family = resolve_registry_family(&suffix);
        let (session, contact_roles) = session_params(provider, family.clone(), &self.defaults)?;
        Ok(ResolvedProvider {
            provider: provider.clone(),
            suffix,
            family,
            session,
            contact_roles,
        })
    }

    /// Price the matching provider lists for `action` over `years` on a domain
    ///
    /// Unlike [`resolve_domain`](Self::resolve_domain) this needs no usable
    /// credentials on the provider.
    pub fn price_for(&self, domain: &str, action: &str, years: u32) -> Option<Decimal> {
        let name = normalize_suffix(domain);
        let labels: Vec<&str> = name.split('.').collect();
        let (provider, suffix) = self.match_domain(&labels)?;
        price_in(&provider.pricing, &suffix, action, years)
    }

    /// Longest suffix of `labels` (excluding the full name) that a provider sells
    fn match_domain(&self, labels: &[&str]) -> Option<(&ProviderRecord, String)> {
        (1..labels.len()).find_map(|start| {
            let candidate = labels[start..].join(".");
            self.find(&candidate).map(|provider| (provider, candidate))
        })
    }

    fn find(&self, suffix: &str) -> Option<&ProviderRecord> {
        self.providers.iter().find(|provider| {
            provider
                .pricing
                .as_object()
                .is_some_and(|table| table.keys().any(|key| normalize_suffix(key) == suffix))
        })
    }
}

fn pricing_entry<'a>(pricing: &'a Value, suffix: &str) -> Option<&'a Value> {
    pricing
        .as_object()?
        .iter()
        .find(|(key, _)| normalize_suffix(key) == suffix)
        .map(|(_, entry)| entry)
}

fn price_in(pricing: &Value, suffix: &str, action: &str, years: u32) -> Option<Decimal> {
    pricing_entry(pricing, suffix)
        .and_then(|entry| entry.get(action))
        .and_then(|table| table.get(years.to_string()))
        .and_then(decimal_from_value)
}

fn decimal_from_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

fn parse_endpoint(endpoint: &str, default_port: u16) -> Result<(String, u16)> {
    let endpoint = endpoint.trim();
    let (host, port) = match endpoint.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.trim().parse::<u16>().map_err(|_| {
                Error::config(format!("Invalid port in registry endpoint '{}'", endpoint))
            })?;
            (host.trim(), port)
        }
        None => (endpoint, default_port),
    };
    if host.is_empty() {
        return Err(Error::config(format!(
            "Registry endpoint '{}' has no host",
            endpoint
        )));
    }
    Ok((host.to_string(), port))
}

fn session_params(
    provider: &ProviderRecord,
    family: RegistryFamily,
    defaults: &SessionDefaults,
) -> Result<(SessionParams, Vec<Role>)> {
    let (host, port) = parse_endpoint(&provider.api_endpoint, defaults.port)?;

    let credentials: CredentialsDoc = match &provider.credentials {
        Value::Null => CredentialsDoc::default(),
        value => serde_json::from_value(value.clone()).map_err(|e| {
            Error::config(format!(
                "Provider '{}' has malformed credentials: {}",
                provider.name, e
            ))
        })?,
    };

    let auth = credentials.auth.unwrap_or_default();
    let (Some(username), Some(password)) = (non_blank(auth.username), auth.password) else {
        return Err(Error::config(format!(
            "Provider '{}' credentials lack auth.username/auth.password",
            provider.name
        )));
    };

    let contact_roles = match credentials.contact_roles {
        Some(roles) => roles
            .iter()
            .map(|role| {
                role.parse::<Role>().map_err(|_| {
                    Error::config(format!(
                        "Provider '{}' declares unknown contact role '{}'",
                        provider.name, role
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?,
        None => Role::ALL.to_vec(),
    };

    let login_extensions = match credentials.login_extensions {
        Some(list) if !list.is_empty() => list,
        _ if family.is_generic() => GENERIC_LOGIN_EXTENSIONS
            .iter()
            .map(|ext| ext.to_string())
            .collect(),
        _ => Vec::new(),
    };

    let tls = TlsOptions {
        enabled: credentials.ssl.unwrap_or(true),
        verify_peer: credentials.verify_peer.unwrap_or(defaults.verify_peer),
        verify_peer_name: credentials
            .verify_peer_name
            .unwrap_or(defaults.verify_peer_name),
        allow_self_signed: credentials
            .allow_self_signed
            .unwrap_or(defaults.allow_self_signed),
        cert_file: non_blank(credentials.cert_file).map(PathBuf::from),
        key_file: non_blank(credentials.key_file).map(PathBuf::from),
        ca_file: non_blank(credentials.cafile).map(PathBuf::from),
        passphrase: non_blank(credentials.passphrase),
    };

    let session = SessionParams {
        provider_id: provider.id,
        provider_name: provider.name.clone(),
        family,
        host,
        port,
        username,
        password,
        client_id: non_blank(credentials.client_id),
        tls,
        bind_ip: non_blank(credentials.bind_ip),
        timeout_secs: credentials.timeout_secs.filter(|secs| *secs > 0),
        login_extensions,
    };

    Ok((session, contact_roles))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider(id: i64, name: &str, pricing: Value) -> ProviderRecord {
        ProviderRecord {
            id,
            name: name.to_string(),
            kind: "domain".to_string(),
            api_endpoint: "epp.registry.test".to_string(),
            credentials: json!({"auth": {"username": "reseller", "password": "s3cret"}}),
            pricing,
            status: "active".to_string(),
        }
    }

    #[test]
    fn first_declaring_provider_wins() {
        let directory = RegistryDirectory::from_providers(vec![
            provider(1, "alpha", json!({".test": {}})),
            provider(2, "beta", json!({"test": {}, ".example": {}})),
        ]);

        assert_eq!(directory.resolve_provider("test").unwrap().name, "alpha");
        assert_eq!(directory.resolve_provider(".example").unwrap().name, "beta");
    }

    #[test]
    fn inactive_and_non_domain_providers_are_ignored() {
        let mut inactive = provider(1, "inactive", json!({".test": {}}));
        inactive.status = "disabled".to_string();
        let mut hosting = provider(2, "hosting", json!({".test": {}}));
        hosting.kind = "hosting".to_string();

        let directory = RegistryDirectory::from_providers(vec![inactive, hosting]);
        assert!(directory.is_empty());
        let err = directory.resolve_provider("test").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn longest_suffix_wins_for_full_names() {
        let directory = RegistryDirectory::from_providers(vec![
            provider(1, "uk-cc", json!({".uk": {}})),
            provider(2, "uk-sld", json!({".co.uk": {}})),
        ]);

        let resolved = directory.resolve_domain("Shop.Example.CO.UK").unwrap();
        assert_eq!(resolved.provider.name, "uk-sld");
        assert_eq!(resolved.suffix, "co.uk");
        assert!(resolved.family.is_generic());
    }

    #[test]
    fn endpoint_port_defaults_to_700() {
        let mut explicit = provider(1, "alpha", json!({".test": {}}));
        explicit.api_endpoint = "epp.alpha.test:7000".to_string();
        let directory = RegistryDirectory::from_providers(vec![explicit]);
        assert_eq!(directory.resolve_domain("a.test").unwrap().session.port, 7000);

        let directory =
            RegistryDirectory::from_providers(vec![provider(1, "beta", json!({".test": {}}))]);
        let session = directory.resolve_domain("a.test").unwrap().session;
        assert_eq!(session.host, "epp.registry.test");
        assert_eq!(session.port, 700);
    }

    #[test]
    fn generic_family_gets_default_login_extensions() {
        let directory = RegistryDirectory::from_providers(vec![provider(
            1,
            "alpha",
            json!({".test": {}, ".fi": {}}),
        )]);

        let generic = directory.resolve_domain("a.test").unwrap();
        assert_eq!(generic.session.login_extensions.len(), 2);
        assert_eq!(generic.contact_roles, Role::ALL.to_vec());

        let fi = directory.resolve_domain("a.fi").unwrap();
        assert_eq!(fi.family.as_str(), "fi");
        assert!(fi.session.login_extensions.is_empty());
    }

    #[test]
    fn missing_login_credentials_are_a_configuration_error() {
        let mut record = provider(1, "alpha", json!({".test": {}}));
        record.credentials = json!({"auth": {"username": "reseller"}});
        let directory = RegistryDirectory::from_providers(vec![record]);

        let err = directory.resolve_domain("a.test").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn declared_contact_roles_are_honoured() {
        let mut record = provider(1, "alpha", json!({".test": {}}));
        record.credentials = json!({
            "auth": {"username": "reseller", "password": "pw"},
            "contactRoles": ["registrant", "tech"]
        });
        let directory = RegistryDirectory::from_providers(vec![record]);
        let resolved = directory.resolve_domain("a.test").unwrap();
        assert_eq!(resolved.contact_roles, vec![Role::Registrant, Role::Tech]);
    }

    #[test]
    fn debug_output_hides_secrets() {
        let mut record = provider(1, "alpha", json!({".test": {}}));
        record.credentials = json!({
            "auth": {"username": "reseller", "password": "hunter2"},
            "passphrase": "keypass"
        });
        let directory = RegistryDirectory::from_providers(vec![record]);
        let rendered = format!("{:?}", directory.resolve_domain("a.test").unwrap().session);
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("keypass"));
    }

    #[test]
    fn renewal_price_reads_pricing_table() {
        let directory = RegistryDirectory::from_providers(vec![provider(
            1,
            "alpha",
            json!({".test": {"register": {"1": 12}, "renew": {"1": "11.50", "2": 22.0}}}),
        )]);
        let resolved = directory.resolve_domain("a.test").unwrap();
        assert_eq!(resolved.price("renew", 1), Some(Decimal::new(1150, 2)));
        assert_eq!(resolved.price("renew", 2), Some(Decimal::new(22, 0)));
        assert_eq!(resolved.price("renew", 3), None);
        assert_eq!(resolved.price("register", 1), Some(Decimal::new(12, 0)));
    }

    #[test]
    fn price_lookup_does_not_need_credentials() {
        let mut record = provider(1, "alpha", json!({".test": {"renew": {"1": "9.99"}}}));
        record.credentials = Value::Null;
        let directory = RegistryDirectory::from_providers(vec![record]);

        assert!(directory.resolve_domain("a.test").is_err());
        assert_eq!(
            directory.price_for("a.test", "renew", 1),
            Some(Decimal::new(999, 2))
        );
        assert_eq!(directory.price_for("a.other", "renew", 1), None);
    }
}
