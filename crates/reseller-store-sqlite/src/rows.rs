//! Raw table rows and their conversion into engine records

use chrono::{DateTime, NaiveDateTime, Utc};
use reseller_core::error::{Error, Result};
use reseller_core::model::{
    InvoiceRecord, OrderRecord, ProviderRecord, ServiceData, ServiceLogEntry, ServiceRecord,
};
use rust_decimal::Decimal;
use std::str::FromStr;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Fixed-width text form of a timestamp; sorts the same as the instant
pub fn ts(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT) {
        return Ok(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::storage(format!("Invalid timestamp '{}': {}", raw, e)))
}

fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

fn parse_amount(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw.trim())
        .map_err(|e| Error::storage(format!("Invalid amount '{}': {}", raw, e)))
}

fn parse_document(raw: &str) -> Result<serde_json::Value> {
    if raw.trim().is_empty() {
        return Ok(serde_json::Value::Null);
    }
    Ok(serde_json::from_str(raw)?)
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OrderRow {
    pub id: i64,
    pub user_id: i64,
    pub service_type: String,
    pub service_data: String,
    pub status: String,
    pub amount_due: String,
    pub currency: String,
    pub invoice_id: Option<i64>,
    pub created_at: String,
    pub paid_at: Option<String>,
}

impl TryFrom<OrderRow> for OrderRecord {
    type Error = Error;

    fn try_from(row: OrderRow) -> Result<Self> {
        Ok(OrderRecord {
            id: row.id,
            user_id: row.user_id,
            service_type: row.service_type,
            service_data: ServiceData::from_json(&row.service_data)?,
            status: row.status.parse()?,
            amount_due: parse_amount(&row.amount_due)?,
            currency: row.currency,
            invoice_id: row.invoice_id,
            created_at: parse_ts(&row.created_at)?,
            paid_at: parse_opt_ts(row.paid_at)?,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InvoiceRow {
    pub id: i64,
    pub user_id: i64,
    pub billing_contact_id: Option<i64>,
    pub total_amount: String,
    pub currency: String,
    pub payment_status: String,
    pub due_date: Option<String>,
    pub created_at: String,
}

impl TryFrom<InvoiceRow> for InvoiceRecord {
    type Error = Error;

    fn try_from(row: InvoiceRow) -> Result<Self> {
        Ok(InvoiceRecord {
            id: row.id,
            user_id: row.user_id,
            billing_contact_id: row.billing_contact_id,
            total_amount: parse_amount(&row.total_amount)?,
            currency: row.currency,
            payment_status: row.payment_status.parse()?,
            due_date: parse_opt_ts(row.due_date)?,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ServiceRow {
    pub id: i64,
    pub user_id: i64,
    pub provider_id: Option<i64>,
    pub order_id: Option<i64>,
    #[sqlx(rename = "type")]
    pub service_type: String,
    pub status: String,
    pub config: String,
    pub service_name: Option<String>,
    pub registered_at: Option<String>,
    pub expires_at: Option<String>,
    pub updated_at: Option<String>,
    pub created_at: String,
}

impl TryFrom<ServiceRow> for ServiceRecord {
    type Error = Error;

    fn try_from(row: ServiceRow) -> Result<Self> {
        Ok(ServiceRecord {
            id: row.id,
            user_id: row.user_id,
            provider_id: row.provider_id,
            order_id: row.order_id,
            service_type: row.service_type,
            status: row.status.parse()?,
            config: ServiceData::from_json(&row.config)?,
            service_name: row.service_name,
            registered_at: parse_opt_ts(row.registered_at)?,
            expires_at: parse_opt_ts(row.expires_at)?,
            updated_at: parse_opt_ts(row.updated_at)?,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProviderRow {
    pub id: i64,
    pub name: String,
    #[sqlx(rename = "type")]
    pub kind: String,
    pub api_endpoint: String,
    pub credentials: String,
    pub pricing: String,
    pub status: String,
}

impl TryFrom<ProviderRow> for ProviderRecord {
    type Error = Error;

    fn try_from(row: ProviderRow) -> Result<Self> {
        Ok(ProviderRecord {
            id: row.id,
            name: row.name,
            kind: row.kind,
            api_endpoint: row.api_endpoint,
            credentials: parse_document(&row.credentials)?,
            pricing: parse_document(&row.pricing)?,
            status: row.status,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ServiceLogRow {
    pub service_id: i64,
    pub event: String,
    pub actor_type: String,
    pub actor_id: i64,
    pub details: String,
    pub created_at: String,
}

impl TryFrom<ServiceLogRow> for ServiceLogEntry {
    type Error = Error;

    fn try_from(row: ServiceLogRow) -> Result<Self> {
        Ok(ServiceLogEntry {
            service_id: row.service_id,
            event: row.event,
            actor_type: row.actor_type,
            actor_id: row.actor_id,
            details: row.details,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

/// Convert a batch of rows, failing on the first bad one
pub fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = Error>,
{
    rows.into_iter().map(T::try_from).collect()
}
