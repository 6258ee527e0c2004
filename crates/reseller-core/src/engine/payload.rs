//! Generic domain command payloads

use chrono::{DateTime, Months, Utc};
use serde_json::{Map, Value, json};

use crate::contacts::ResolvedContacts;
use crate::model::Role;
use crate::traits::{CommandParams, DomainInfo};

/// Domain-create payload before registry-specific shaping
///
/// Nameservers are included only when non-empty; contact slots only for roles
/// that resolved to a registry id.
pub fn domain_create(
    domain: &str,
    years: u32,
    auth_info: &str,
    nameservers: &[String],
    contacts: &ResolvedContacts,
) -> CommandParams {
    let mut params = CommandParams::new();
    params.insert("domainname".into(), json!(domain));
    params.insert("period".into(), json!(years));
    params.insert("authInfoPw".into(), json!(auth_info));

    if !nameservers.is_empty() {
        params.insert("nss".into(), json!(nameservers));
    }

    if let Some(registrant) = contacts.get(&Role::Registrant) {
        params.insert("registrant".into(), json!(registrant));
    }

    let slots: Map<String, Value> = [Role::Admin, Role::Tech, Role::Billing]
        .iter()
        .filter_map(|role| {
            contacts
                .get(role)
                .map(|id| (role.as_str().to_string(), json!(id)))
        })
        .collect();
    if !slots.is_empty() {
        params.insert("contacts".into(), Value::Object(slots));
    }

    params
}

/// Domain-renew payload
pub fn domain_renew(domain: &str, years: u32, current_expiry: Option<DateTime<Utc>>) -> CommandParams {
    let mut params = CommandParams::new();
    params.insert("domainname".into(), json!(domain));
    params.insert("regperiod".into(), json!(years));
    if let Some(expiry) = current_expiry {
        params.insert(
            "curExpDate".into(),
            json!(expiry.format("%Y-%m-%d").to_string()),
        );
    }
    params
}

/// Payload naming only the domain
pub fn domain_name(domain: &str) -> CommandParams {
    let mut params = CommandParams::new();
    params.insert("domainname".into(), json!(domain));
    params
}

/// `from` plus `years` calendar years
pub fn add_years(from: DateTime<Utc>, years: u32) -> DateTime<Utc> {
    from.checked_add_months(Months::new(years.saturating_mul(12)))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Contact ids reported by a domain-info answer
pub fn contacts_from_info(info: &DomainInfo) -> ResolvedContacts {
    let mut contacts = ResolvedContacts::new();
    if let Some(registrant) = info.extra.get("registrant").and_then(Value::as_str) {
        contacts.insert(Role::Registrant, registrant.to_string());
    }
    if let Some(slots) = info.extra.get("contacts").and_then(Value::as_object) {
        for role in [Role::Admin, Role::Tech, Role::Billing] {
            if let Some(id) = slots.get(role.as_str()).and_then(Value::as_str) {
                contacts.insert(role, id.to_string());
            }
        }
    }
    contacts
}
