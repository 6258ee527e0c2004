//! Persistent records read and written by the provisioning engine
//!
//! Orders, invoices, services, providers and service-log entries mirror the
//! back-office tables. `service_data` and `config` are JSON documents; their
//! known keys are typed here and anything else is carried through untouched.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Service-log event names written by this crate
pub mod events {
    /// Provisioning attempt rolled back
    pub const ORDER_ACTIVATION_FAILED: &str = "order_activation_failed";
    /// Renewal order raised by the renewal sweep
    pub const RENEWAL_ORDER_CREATED: &str = "renewal_order_created";
    /// Service moved to `expired` by the renewal sweep
    pub const SERVICE_EXPIRED: &str = "service_expired";
    /// Registry-side domain update applied
    pub const DOMAIN_UPDATED: &str = "domain_updated";
}

/// Actor type recorded for engine-originated log entries
pub const ACTOR_SYSTEM: &str = "system";

/// Actor id used when no user triggered the work (sweeps, hooks)
pub const ACTOR_SYSTEM_ID: i64 = 0;

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Column value for this status
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::invalid_input(format!(
                        "Unknown {} value: {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

string_enum!(
    /// Order lifecycle status
    ///
    /// `Provisioning` only exists inside an open provisioning transaction.
    OrderStatus {
        Pending => "pending",
        Provisioning => "provisioning",
        Active => "active",
        Failed => "failed",
        Cancelled => "cancelled",
        Inactive => "inactive",
    }
);

string_enum!(
    /// Invoice payment status
    PaymentStatus {
        Unpaid => "unpaid",
        Paid => "paid",
        Overdue => "overdue",
        Cancelled => "cancelled",
    }
);

string_enum!(
    /// Service lifecycle status
    ServiceStatus {
        Active => "active",
        Expired => "expired",
        Suspended => "suspended",
    }
);

string_enum!(
    /// Contact role attached to a domain object
    Role {
        Registrant => "registrant",
        Admin => "admin",
        Tech => "tech",
        Billing => "billing",
    }
);

impl Role {
    /// The four canonical roles, in registry order
    pub const ALL: [Role; 4] = [Role::Registrant, Role::Admin, Role::Tech, Role::Billing];
}

/// `<resource>.<action>` split of an order's service type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceType {
    /// Resource kind, e.g. "domain"
    pub resource: String,
    /// Requested action, e.g. "register"
    pub action: String,
}

impl ServiceType {
    /// Split a service type such as `domain.register`
    pub fn parse(raw: &str) -> Result<Self> {
        let mut parts = raw.splitn(2, '.');
        let resource = parts.next().unwrap_or_default().trim();
        let action = parts.next().unwrap_or_default().trim();
        if resource.is_empty() {
            return Err(Error::invalid_input(format!("Invalid service type: '{}'", raw)));
        }
        Ok(Self {
            resource: resource.to_string(),
            action: action.to_string(),
        })
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.action)
    }
}

/// Contact details for one role, as captured on the order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactRecord {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub org: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub street1: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub street2: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub street3: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub city: String,
    /// State or province
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sp: String,
    /// Postal code
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pc: String,
    /// ISO country code
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cc: String,
    /// Phone number
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub voice: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    /// Registry-assigned contact id, once provisioned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContactRecord {
    /// True when no identifying field carries data
    pub fn is_empty(&self) -> bool {
        [
            &self.name,
            &self.org,
            &self.street1,
            &self.street2,
            &self.street3,
            &self.city,
            &self.sp,
            &self.pc,
            &self.cc,
            &self.voice,
            &self.email,
        ]
        .iter()
        .all(|field| field.trim().is_empty())
    }

    /// Registry id, ignoring blank values
    pub fn registry_id(&self) -> Option<&str> {
        self.registry_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// Attempt bookkeeping kept alongside the order's service data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningState {
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_kind: Option<String>,
}

/// Structured payload of an order (`orders.service_data`) and of a
/// provisioned service (`services.config`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// Requested term in years
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_years"
    )]
    pub years: Option<u32>,
    /// Contact role assignments keyed by role name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub contacts: BTreeMap<String, ContactRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dnssec: Option<Value>,
    /// Provider name chosen by the customer, informational
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Authorization code requested by the customer
    #[serde(rename = "authInfo", default, skip_serializing_if = "Option::is_none")]
    pub auth_info: Option<String>,
    /// Authorization code in effect at the registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authcode: Option<String>,
    /// Registry status codes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Vec<String>>,
    /// Registry-specific fields consumed by protocol extensions
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub custom: Map<String, Value>,
    /// Service a renewal order refers to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning: Option<ProvisioningState>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ServiceData {
    /// Parse a JSON document; an empty or null document yields defaults
    pub fn from_json(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(trimmed)?)
    }

    /// Serialize to the stored JSON form
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Name of the resource this order is about
    pub fn resource_name(&self) -> &str {
        self.domain
            .as_deref()
            .or(self.server.as_deref())
            .unwrap_or("unnamed-service")
    }

    /// Requested term, or `default_years` when absent or zero
    pub fn term_years(&self, default_years: u32) -> u32 {
        match self.years {
            Some(years) if years > 0 => years,
            _ => default_years,
        }
    }

    /// Contact captured for a role
    pub fn contact(&self, role: Role) -> Option<&ContactRecord> {
        self.contacts.get(role.as_str())
    }

    /// Record the registry id assigned to a role
    pub fn set_registry_id(&mut self, role: Role, registry_id: &str) {
        self.contacts
            .entry(role.as_str().to_string())
            .or_default()
            .registry_id = Some(registry_id.to_string());
    }

    /// Nameservers with blank entries removed
    pub fn filtered_nameservers(&self) -> Vec<String> {
        self.nameservers
            .iter()
            .map(|ns| ns.trim())
            .filter(|ns| !ns.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Free-form string from `custom`
    pub fn custom_str(&self, key: &str) -> Option<&str> {
        self.custom
            .get(key)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    }
}

fn lenient_years<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Row of the `orders` table
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRecord {
    pub id: i64,
    pub user_id: i64,
    pub service_type: String,
    pub service_data: ServiceData,
    pub status: OrderStatus,
    pub amount_due: Decimal,
    pub currency: String,
    pub invoice_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Values for inserting an order
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub user_id: i64,
    pub service_type: String,
    pub service_data: ServiceData,
    pub status: OrderStatus,
    pub amount_due: Decimal,
    pub currency: String,
    pub invoice_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Row of the `invoices` table, as far as this crate reads it
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceRecord {
    pub id: i64,
    pub user_id: i64,
    pub billing_contact_id: Option<i64>,
    pub total_amount: Decimal,
    pub currency: String,
    pub payment_status: PaymentStatus,
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Row of the `services` table
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRecord {
    pub id: i64,
    pub user_id: i64,
    pub provider_id: Option<i64>,
    pub order_id: Option<i64>,
    /// Resource kind (`services.type`)
    pub service_type: String,
    pub status: ServiceStatus,
    pub config: ServiceData,
    pub service_name: Option<String>,
    pub registered_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ServiceRecord {
    /// Name of the provisioned resource
    pub fn name(&self) -> &str {
        self.service_name
            .as_deref()
            .unwrap_or_else(|| self.config.resource_name())
    }
}

/// Values for inserting a service
#[derive(Debug, Clone, PartialEq)]
pub struct NewService {
    pub user_id: i64,
    pub provider_id: Option<i64>,
    pub order_id: Option<i64>,
    pub service_type: String,
    pub status: ServiceStatus,
    pub config: ServiceData,
    pub service_name: Option<String>,
    pub registered_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Row of the `providers` table
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRecord {
    pub id: i64,
    pub name: String,
    /// Provider kind (`providers.type`), e.g. "domain"
    pub kind: String,
    /// `host[:port]` of the registry endpoint
    pub api_endpoint: String,
    pub credentials: Value,
    /// Suffix → pricing/metadata table
    pub pricing: Value,
    pub status: String,
}

impl ProviderRecord {
    /// Whether this provider takes part in suffix resolution
    pub fn is_active_domain_provider(&self) -> bool {
        self.kind == "domain" && self.status == "active"
    }
}

/// Append-only audit entry (`service_logs`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceLogEntry {
    /// Service id, 0 when no service exists yet
    pub service_id: i64,
    pub event: String,
    pub actor_type: String,
    pub actor_id: i64,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

impl ServiceLogEntry {
    /// Entry attributed to the system actor
    pub fn system(
        service_id: i64,
        event: impl Into<String>,
        actor_id: i64,
        details: impl Into<String>,
    ) -> Self {
        Self {
            service_id,
            event: event.into(),
            actor_type: ACTOR_SYSTEM.to_string(),
            actor_id,
            details: details.into(),
            created_at: Utc::now(),
        }
    }
}
