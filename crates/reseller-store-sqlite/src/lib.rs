// # SQLite Back-office Store
//
// BackofficeStore implementation over a SQLite database.
//
// ## Transactions
//
// `Tx` is a sqlx transaction on one pooled connection, opened with
// `BEGIN IMMEDIATE` so it holds the write lock from its first statement and
// never has to upgrade a stale read snapshot. Other writers wait up to the
// busy timeout, which the orchestrator's short transactions stay well inside.
//
// The order claim is a guarded `UPDATE ... WHERE status = ?` that also
// stamps `claimed_at`; a concurrent attempt that loses the race sees zero
// affected rows and reports no eligible order.
//
// ## Errors
//
// Driver failures become `Error::Storage`. A unique-constraint violation
// (second service for an order) becomes `Error::Consistency`.

mod rows;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use reseller_core::error::{Error, Result};
use reseller_core::model::{
    InvoiceRecord, NewOrder, NewService, OrderRecord, OrderStatus, ProviderRecord, ServiceData,
    ServiceLogEntry, ServiceRecord, ServiceStatus,
};
use reseller_core::traits::{BackofficeStore, ClaimedOrder};
use rows::{
    InvoiceRow, OrderRow, ProviderRow, ServiceLogRow, ServiceRow, convert_all, parse_ts, ts,
};

const ORDER_COLUMNS: &str = "id, user_id, service_type, service_data, status, amount_due, \
     currency, invoice_id, created_at, paid_at";

const SERVICE_COLUMNS: &str = "id, user_id, provider_id, order_id, type, status, config, \
     service_name, registered_at, expires_at, updated_at, created_at";

const PROVIDER_COLUMNS: &str = "id, name, type, api_endpoint, credentials, pricing, status";

/// Map a driver error into the engine's taxonomy
fn db_err(e: sqlx::Error) -> Error {
    if let Some(db) = e.as_database_error()
        && db.is_unique_violation()
    {
        return Error::consistency(format!("Constraint violation: {}", db.message()));
    }
    Error::storage(e.to_string())
}

/// SQLite-backed back-office store
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if needed) a database file and apply the schema
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::storage(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))
            .map_err(db_err)?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        info!("Back-office database opened at {}", path.display());
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Private in-memory database, for tests
    ///
    /// Uses a single connection; do not call non-transactional methods while
    /// a transaction is open.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(db_err)?
            .foreign_keys(true);

        // The database lives as long as its only connection
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::storage(format!("Migration failed: {}", e)))?;
        debug!("Back-office schema is up to date");
        Ok(())
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Insert a provider row with an explicit id
    pub async fn add_provider(&self, provider: &ProviderRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO providers (id, name, type, api_endpoint, credentials, pricing, status) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(provider.id)
        .bind(&provider.name)
        .bind(&provider.kind)
        .bind(&provider.api_endpoint)
        .bind(provider.credentials.to_string())
        .bind(provider.pricing.to_string())
        .bind(&provider.status)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Insert an invoice row with an explicit id
    pub async fn add_invoice(&self, invoice: &InvoiceRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO invoices (id, user_id, billing_contact_id, total_amount, currency, \
             payment_status, due_date, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(invoice.id)
        .bind(invoice.user_id)
        .bind(invoice.billing_contact_id)
        .bind(invoice.total_amount.to_string())
        .bind(&invoice.currency)
        .bind(invoice.payment_status.as_str())
        .bind(invoice.due_date.map(ts))
        .bind(ts(invoice.created_at))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Insert an order row
    ///
    /// # Returns
    ///
    /// The new order id
    pub async fn add_order(&self, order: &NewOrder) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO orders (user_id, service_type, service_data, status, amount_due, \
             currency, invoice_id, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(order.user_id)
        .bind(&order.service_type)
        .bind(order.service_data.to_json()?)
        .bind(order.status.as_str())
        .bind(order.amount_due.to_string())
        .bind(&order.currency)
        .bind(order.invoice_id)
        .bind(ts(order.created_at))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.last_insert_rowid())
    }

    /// Read an order outside any transaction
    pub async fn find_order(&self, order_id: i64) -> Result<Option<OrderRecord>> {
        sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE id = ?",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .map(OrderRecord::try_from)
        .transpose()
    }

    /// Orders in id order
    pub async fn list_orders(&self) -> Result<Vec<OrderRecord>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders ORDER BY id",
            ORDER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        convert_all(rows)
    }

    /// Services in id order
    pub async fn list_services(&self) -> Result<Vec<ServiceRecord>> {
        let rows = sqlx::query_as::<_, ServiceRow>(&format!(
            "SELECT {} FROM services ORDER BY id",
            SERVICE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        convert_all(rows)
    }

    /// Claim time of an order, set while it is in `provisioning`
    pub async fn claimed_at(&self, order_id: i64) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<Option<String>> =
            sqlx::query_scalar("SELECT claimed_at FROM orders WHERE id = ?")
                .bind(order_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        raw.flatten().as_deref().map(parse_ts).transpose()
    }

    /// Log entries of one service, oldest first
    pub async fn service_logs(&self, service_id: i64) -> Result<Vec<ServiceLogEntry>> {
        let rows = sqlx::query_as::<_, ServiceLogRow>(
            "SELECT service_id, event, actor_type, actor_id, details, created_at \
             FROM service_logs WHERE service_id = ? ORDER BY id",
        )
        .bind(service_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        convert_all(rows)
    }
}

type SqliteTx = Transaction<'static, Sqlite>;

#[async_trait]
impl BackofficeStore for SqliteStore {
    type Tx = SqliteTx;

    async fn begin(&self) -> Result<SqliteTx> {
        self.pool.begin_with("BEGIN IMMEDIATE").await.map_err(db_err)
    }

    async fn commit(&self, tx: SqliteTx) -> Result<()> {
        tx.commit().await.map_err(db_err)
    }

    async fn rollback(&self, tx: SqliteTx) -> Result<()> {
        tx.rollback().await.map_err(db_err)
    }

    async fn claim_order_for_invoice(
        &self,
        tx: &mut SqliteTx,
        invoice_id: i64,
        claimed_at: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<ClaimedOrder>> {
        let candidate: Option<(i64, String)> = sqlx::query_as(
            "SELECT id, status FROM orders WHERE invoice_id = ? \
             AND (status IN ('pending', 'failed') OR (status = 'provisioning' \
             AND (claimed_at IS NULL OR claimed_at < ?))) ORDER BY id LIMIT 1",
        )
        .bind(invoice_id)
        .bind(ts(stale_before))
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_err)?;

        let Some((order_id, status)) = candidate else {
            return Ok(None);
        };
        let previous_status: OrderStatus = status.parse()?;

        let claimed = sqlx::query(
            "UPDATE orders SET status = 'provisioning', claimed_at = ? \
             WHERE id = ? AND status = ? \
             AND (status != 'provisioning' OR claimed_at IS NULL OR claimed_at < ?)",
        )
        .bind(ts(claimed_at))
        .bind(order_id)
        .bind(previous_status.as_str())
        .bind(ts(stale_before))
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
        if claimed.rows_affected() != 1 {
            debug!("Order {} was claimed concurrently", order_id);
            return Ok(None);
        }

        let order = self
            .lock_order(tx, order_id)
            .await?
            .ok_or_else(|| Error::consistency(format!("Order {} vanished after claim", order_id)))?;
        Ok(Some(ClaimedOrder {
            order,
            previous_status,
        }))
    }

    async fn lock_order(&self, tx: &mut SqliteTx, order_id: i64) -> Result<Option<OrderRecord>> {
        sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE id = ?",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_err)?
        .map(OrderRecord::try_from)
        .transpose()
    }

    async fn invoice(&self, tx: &mut SqliteTx, invoice_id: i64) -> Result<Option<InvoiceRecord>> {
        sqlx::query_as::<_, InvoiceRow>(
            "SELECT id, user_id, billing_contact_id, total_amount, currency, payment_status, \
             due_date, created_at FROM invoices WHERE id = ?",
        )
        .bind(invoice_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_err)?
        .map(InvoiceRecord::try_from)
        .transpose()
    }

    async fn active_providers(&self, tx: &mut SqliteTx, kind: &str) -> Result<Vec<ProviderRecord>> {
        let rows = sqlx::query_as::<_, ProviderRow>(&format!(
            "SELECT {} FROM providers WHERE type = ? AND status = 'active' ORDER BY id",
            PROVIDER_COLUMNS
        ))
        .bind(kind)
        .fetch_all(&mut **tx)
        .await
        .map_err(db_err)?;
        convert_all(rows)
    }

    async fn provider(&self, tx: &mut SqliteTx, provider_id: i64) -> Result<Option<ProviderRecord>> {
        sqlx::query_as::<_, ProviderRow>(&format!(
            "SELECT {} FROM providers WHERE id = ?",
            PROVIDER_COLUMNS
        ))
        .bind(provider_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_err)?
        .map(ProviderRecord::try_from)
        .transpose()
    }

    async fn service_for_order(&self, tx: &mut SqliteTx, order_id: i64) -> Result<Option<ServiceRecord>> {
        sqlx::query_as::<_, ServiceRow>(&format!(
            "SELECT {} FROM services WHERE order_id = ?",
            SERVICE_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_err)?
        .map(ServiceRecord::try_from)
        .transpose()
    }

    async fn service(&self, tx: &mut SqliteTx, service_id: i64) -> Result<Option<ServiceRecord>> {
        sqlx::query_as::<_, ServiceRow>(&format!(
            "SELECT {} FROM services WHERE id = ?",
            SERVICE_COLUMNS
        ))
        .bind(service_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_err)?
        .map(ServiceRecord::try_from)
        .transpose()
    }

    async fn service_by_name(
        &self,
        tx: &mut SqliteTx,
        service_type: &str,
        service_name: &str,
    ) -> Result<Option<ServiceRecord>> {
        sqlx::query_as::<_, ServiceRow>(&format!(
            "SELECT {} FROM services WHERE type = ? AND service_name = ? COLLATE NOCASE \
             ORDER BY id DESC LIMIT 1",
            SERVICE_COLUMNS
        ))
        .bind(service_type)
        .bind(service_name)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_err)?
        .map(ServiceRecord::try_from)
        .transpose()
    }

    async fn update_order(
        &self,
        tx: &mut SqliteTx,
        order_id: i64,
        status: OrderStatus,
        service_data: &ServiceData,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE orders SET status = ?, service_data = ?, \
             claimed_at = CASE WHEN ? = 'provisioning' THEN claimed_at END WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(service_data.to_json()?)
        .bind(status.as_str())
        .bind(order_id)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(Error::consistency(format!("Order {} not found", order_id)));
        }
        Ok(())
    }

    async fn insert_service(&self, tx: &mut SqliteTx, service: NewService) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO services (user_id, provider_id, order_id, type, status, config, \
             service_name, registered_at, expires_at, updated_at, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(service.user_id)
        .bind(service.provider_id)
        .bind(service.order_id)
        .bind(&service.service_type)
        .bind(service.status.as_str())
        .bind(service.config.to_json()?)
        .bind(&service.service_name)
        .bind(service.registered_at.map(ts))
        .bind(service.expires_at.map(ts))
        .bind(service.updated_at.map(ts))
        .bind(ts(service.created_at))
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
        Ok(result.last_insert_rowid())
    }

    async fn update_service_expiry(
        &self,
        tx: &mut SqliteTx,
        service_id: i64,
        expires_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE services SET expires_at = ?, updated_at = ?, \
             status = CASE WHEN status = 'expired' THEN 'active' ELSE status END \
             WHERE id = ?",
        )
        .bind(ts(expires_at))
        .bind(ts(updated_at))
        .bind(service_id)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(Error::consistency(format!("Service {} not found", service_id)));
        }
        Ok(())
    }

    async fn update_service_config(
        &self,
        tx: &mut SqliteTx,
        service_id: i64,
        config: &ServiceData,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE services SET config = ?, updated_at = ? WHERE id = ?")
            .bind(config.to_json()?)
            .bind(ts(updated_at))
            .bind(service_id)
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(Error::consistency(format!("Service {} not found", service_id)));
        }
        Ok(())
    }

    async fn append_service_log(&self, entry: ServiceLogEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO service_logs (service_id, event, actor_type, actor_id, details, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.service_id)
        .bind(&entry.event)
        .bind(&entry.actor_type)
        .bind(entry.actor_id)
        .bind(&entry.details)
        .bind(ts(entry.created_at))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn services_with_expiry(&self) -> Result<Vec<ServiceRecord>> {
        let rows = sqlx::query_as::<_, ServiceRow>(&format!(
            "SELECT {} FROM services WHERE expires_at IS NOT NULL \
             AND status IN ('active', 'expired') ORDER BY expires_at, id",
            SERVICE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        convert_all(rows)
    }

    async fn expire_service(&self, service_id: i64, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE services SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(ServiceStatus::Expired.as_str())
        .bind(ts(now))
        .bind(service_id)
        .bind(ServiceStatus::Active.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_renewal_order_if_absent(
        &self,
        service_id: i64,
        order: NewOrder,
    ) -> Result<Option<i64>> {
        // Single statement, so two sweeps cannot both pass the existence check
        let result = sqlx::query(
            "INSERT INTO orders (user_id, service_type, service_data, status, amount_due, \
             currency, invoice_id, created_at) \
             SELECT ?, ?, ?, ?, ?, ?, ?, ? \
             WHERE NOT EXISTS (SELECT 1 FROM orders WHERE status = 'pending' \
             AND json_extract(service_data, '$.service_id') = ?)",
        )
        .bind(order.user_id)
        .bind(&order.service_type)
        .bind(order.service_data.to_json()?)
        .bind(order.status.as_str())
        .bind(order.amount_due.to_string())
        .bind(&order.currency)
        .bind(order.invoice_id)
        .bind(ts(order.created_at))
        .bind(service_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(result.last_insert_rowid()))
    }

    async fn failed_orders_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<OrderRecord>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE status = 'failed' AND created_at >= ? \
             ORDER BY created_at, id",
            ORDER_COLUMNS
        ))
        .bind(ts(cutoff))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        convert_all(rows)
    }

    async fn stale_claims(&self, stale_before: DateTime<Utc>) -> Result<Vec<OrderRecord>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE status = 'provisioning' \
             AND (claimed_at IS NULL OR claimed_at < ?) ORDER BY created_at, id",
            ORDER_COLUMNS
        ))
        .bind(ts(stale_before))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        convert_all(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use reseller_core::model::PaymentStatus;
    use rust_decimal::Decimal;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn new_order(invoice_id: Option<i64>, status: OrderStatus) -> NewOrder {
        NewOrder {
            user_id: 42,
            service_type: "domain.register".into(),
            service_data: ServiceData {
                domain: Some("example.test".into()),
                ..Default::default()
            },
            status,
            amount_due: Decimal::new(1200, 2),
            currency: "USD".into(),
            invoice_id,
            created_at: now(),
        }
    }

    fn invoice(id: i64) -> InvoiceRecord {
        InvoiceRecord {
            id,
            user_id: 42,
            billing_contact_id: None,
            total_amount: Decimal::new(1200, 2),
            currency: "USD".into(),
            payment_status: PaymentStatus::Paid,
            due_date: None,
            created_at: now(),
        }
    }

    fn new_service(order_id: i64) -> NewService {
        NewService {
            user_id: 42,
            provider_id: None,
            order_id: Some(order_id),
            service_type: "domain".into(),
            status: ServiceStatus::Active,
            config: ServiceData::default(),
            service_name: Some("example.test".into()),
            registered_at: Some(now()),
            expires_at: Some(now() + ChronoDuration::days(365)),
            updated_at: Some(now()),
            created_at: now(),
        }
    }

    #[tokio::test]
    async fn test_claim_and_rollback() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.add_invoice(&invoice(501)).await.unwrap();
        let order_id = store
            .add_order(&new_order(Some(501), OrderStatus::Pending))
            .await
            .unwrap();

        let lease_start = now() - ChronoDuration::minutes(15);
        let mut tx = store.begin().await.unwrap();
        let claimed = store
            .claim_order_for_invoice(&mut tx, 501, now(), lease_start)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.order.id, order_id);
        assert_eq!(claimed.order.status, OrderStatus::Provisioning);
        assert_eq!(claimed.previous_status, OrderStatus::Pending);
        assert!(store
            .claim_order_for_invoice(&mut tx, 501, now(), lease_start)
            .await
            .unwrap()
            .is_none());
        store.rollback(tx).await.unwrap();

        let order = store.find_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(store.claimed_at(order_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_abandoned_claim_is_taken_over() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.add_invoice(&invoice(502)).await.unwrap();
        let order_id = store
            .add_order(&new_order(Some(502), OrderStatus::Pending))
            .await
            .unwrap();

        let first_claim = now() - ChronoDuration::minutes(20);
        let mut tx = store.begin().await.unwrap();
        store
            .claim_order_for_invoice(&mut tx, 502, first_claim, first_claim)
            .await
            .unwrap()
            .unwrap();
        store.commit(tx).await.unwrap();
        assert_eq!(
            store.claimed_at(order_id).await.unwrap().map(ts),
            Some(ts(first_claim))
        );

        // Still within the lease
        let mut tx = store.begin().await.unwrap();
        assert!(store
            .claim_order_for_invoice(&mut tx, 502, now(), first_claim)
            .await
            .unwrap()
            .is_none());
        store.rollback(tx).await.unwrap();

        let lease_start = now() - ChronoDuration::minutes(15);
        let stale = store.stale_claims(lease_start).await.unwrap();
        assert_eq!(stale.iter().map(|o| o.id).collect::<Vec<_>>(), vec![order_id]);

        let mut tx = store.begin().await.unwrap();
        let claimed = store
            .claim_order_for_invoice(&mut tx, 502, now(), lease_start)
            .await
            .unwrap()
            .unwrap();
        assert!(claimed.recovered());
        store
            .update_order(&mut tx, order_id, OrderStatus::Active, &ServiceData::default())
            .await
            .unwrap();
        store.commit(tx).await.unwrap();

        assert_eq!(store.claimed_at(order_id).await.unwrap(), None);
        assert!(store.stale_claims(now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_writes_service_and_order_together() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let order_id = store
            .add_order(&new_order(None, OrderStatus::Pending))
            .await
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        store
            .update_order(&mut tx, order_id, OrderStatus::Active, &ServiceData::default())
            .await
            .unwrap();
        let service_id = store.insert_service(&mut tx, new_service(order_id)).await.unwrap();
        store.commit(tx).await.unwrap();

        let services = store.list_services().await.unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].id, service_id);
        assert_eq!(services[0].name(), "example.test");
        assert_eq!(
            store.find_order(order_id).await.unwrap().unwrap().status,
            OrderStatus::Active
        );
    }

    #[tokio::test]
    async fn test_second_service_for_order_is_a_consistency_error() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let order_id = store
            .add_order(&new_order(None, OrderStatus::Pending))
            .await
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        store.insert_service(&mut tx, new_service(order_id)).await.unwrap();
        let err = store
            .insert_service(&mut tx, new_service(order_id))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Consistency(_)));
        store.rollback(tx).await.unwrap();
    }

    #[tokio::test]
    async fn test_provider_documents_round_trip() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let provider = ProviderRecord {
            id: 3,
            name: "Registry".into(),
            kind: "domain".into(),
            api_endpoint: "epp.registry.test:700".into(),
            credentials: json!({"auth": {"username": "u", "password": "p"}}),
            pricing: json!({".test": {"renew": {"1": "9.50"}}}),
            status: "active".into(),
        };
        store.add_provider(&provider).await.unwrap();
        let mut inactive = provider.clone();
        inactive.id = 4;
        inactive.status = "disabled".into();
        store.add_provider(&inactive).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let active = store.active_providers(&mut tx, "domain").await.unwrap();
        store.rollback(tx).await.unwrap();
        assert_eq!(active, vec![provider]);
    }

    #[tokio::test]
    async fn test_renewal_order_guard() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let renewal = NewOrder {
            service_type: "domain.renew".into(),
            service_data: ServiceData {
                service_id: Some(9),
                ..Default::default()
            },
            ..new_order(None, OrderStatus::Pending)
        };

        let first = store
            .create_renewal_order_if_absent(9, renewal.clone())
            .await
            .unwrap();
        let second = store
            .create_renewal_order_if_absent(9, renewal.clone())
            .await
            .unwrap();
        let other = store
            .create_renewal_order_if_absent(10, renewal)
            .await
            .unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        // The guard looks at the stored service id, not the argument alone
        assert!(other.is_some());
    }

    #[tokio::test]
    async fn test_expire_only_active() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let order_id = store
            .add_order(&new_order(None, OrderStatus::Active))
            .await
            .unwrap();
        let mut tx = store.begin().await.unwrap();
        let service_id = store.insert_service(&mut tx, new_service(order_id)).await.unwrap();
        store.commit(tx).await.unwrap();

        assert!(store.expire_service(service_id, now()).await.unwrap());
        assert!(!store.expire_service(service_id, now()).await.unwrap());
        assert_eq!(store.services_with_expiry().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_orders_window() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let mut old = new_order(None, OrderStatus::Failed);
        old.created_at = now() - ChronoDuration::days(45);
        store.add_order(&old).await.unwrap();
        let recent = store
            .add_order(&new_order(None, OrderStatus::Failed))
            .await
            .unwrap();
        store
            .add_order(&new_order(None, OrderStatus::Pending))
            .await
            .unwrap();

        let failed = store
            .failed_orders_since(now() - ChronoDuration::days(30))
            .await
            .unwrap();
        assert_eq!(failed.iter().map(|o| o.id).collect::<Vec<_>>(), vec![recent]);
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("backoffice.sqlite");

        {
            let store = SqliteStore::open(&path).await.unwrap();
            store.add_invoice(&invoice(7)).await.unwrap();
        }

        let store = SqliteStore::open(&path).await.unwrap();
        let mut tx = store.begin().await.unwrap();
        let invoice = store.invoice(&mut tx, 7).await.unwrap().unwrap();
        store.rollback(tx).await.unwrap();
        assert_eq!(invoice.total_amount, Decimal::new(1200, 2));
    }
}
