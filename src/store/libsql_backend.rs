//! libsql backend — async `Store` implementation.
//!
//! Supports local-file and in-memory databases. Transient connection
//! failures are retried a bounded number of times before surfacing a
//! `StoreError`, matching the behavior of the upstream deployment.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database, Value, params_from_iter};
use tracing::{info, warn};

use crate::error::StoreError;
use crate::model::{MessageRecord, Mute, MuteStatus, Tenant};
use crate::store::migrations;
use crate::store::traits::Store;

/// How often a transiently failing statement is attempted in total.
const RETRY_ATTEMPTS: usize = 3;

/// libsql store backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<Database>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&store.conn).await?;
        info!(path = %path.display(), "Store opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to create in-memory db: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&store.conn).await?;
        Ok(store)
    }

    /// Execute a statement, retrying transient connection failures.
    async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<u64, StoreError> {
        let mut attempt = 0;
        loop {
            match self.conn.execute(sql, params_from_iter(params.clone())).await {
                Ok(n) => return Ok(n),
                Err(e) if is_transient(&e) && attempt + 1 < RETRY_ATTEMPTS => {
                    attempt += 1;
                    warn!(error = %e, attempt, "Transient store failure, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(50 * attempt as u64))
                        .await;
                }
                Err(e) => return Err(StoreError::Query(e.to_string())),
            }
        }
    }

    /// Run a query, retrying transient connection failures.
    async fn query(&self, sql: &str, params: Vec<Value>) -> Result<libsql::Rows, StoreError> {
        let mut attempt = 0;
        loop {
            match self.conn.query(sql, params_from_iter(params.clone())).await {
                Ok(rows) => return Ok(rows),
                Err(e) if is_transient(&e) && attempt + 1 < RETRY_ATTEMPTS => {
                    attempt += 1;
                    warn!(error = %e, attempt, "Transient store failure, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(50 * attempt as u64))
                        .await;
                }
                Err(e) => return Err(StoreError::Query(e.to_string())),
            }
        }
    }

    async fn last_insert_id(&self) -> i64 {
        self.conn.last_insert_rowid()
    }
}

/// Failures worth retrying: the connection dropped, not the statement.
fn is_transient(e: &libsql::Error) -> bool {
    let text = e.to_string().to_lowercase();
    text.contains("connection") || text.contains("busy") || text.contains("locked")
}

// ── Row mapping helpers ─────────────────────────────────────────────

/// Parse an RFC 3339 datetime string written by this backend.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn status_to_str(status: MuteStatus) -> &'static str {
    match status {
        MuteStatus::Active => "active",
        MuteStatus::Canceled => "canceled",
    }
}

fn str_to_status(s: &str) -> MuteStatus {
    match s {
        "canceled" => MuteStatus::Canceled,
        _ => MuteStatus::Active,
    }
}

/// Column order: id, user, issuer, reason, message, created_at, expires_at,
/// status, tenant_id, unmute_issuer, unmute_tenant_id.
fn row_to_mute(row: &libsql::Row) -> Result<Mute, libsql::Error> {
    let expires: Option<String> = row.get::<Option<String>>(6)?;
    Ok(Mute {
        id: row.get(0)?,
        user: row.get(1)?,
        issuer: row.get(2)?,
        reason: row.get(3)?,
        message: row.get(4)?,
        created_at: parse_datetime(&row.get::<String>(5)?),
        expires_at: expires.as_deref().map(parse_datetime),
        status: str_to_status(&row.get::<String>(7)?),
        tenant_id: row.get(8)?,
        unmute_issuer: row.get::<Option<String>>(9)?,
        unmute_tenant_id: row.get::<Option<i64>>(10)?,
    })
}

const MUTE_COLUMNS: &str = "id, user, issuer, reason, message, created_at, expires_at, \
                            status, tenant_id, unmute_issuer, unmute_tenant_id";

fn row_to_message(row: &libsql::Row) -> Result<MessageRecord, libsql::Error> {
    Ok(MessageRecord {
        tenant_id: row.get(0)?,
        sender: row.get(1)?,
        body: row.get(2)?,
        timestamp: parse_datetime(&row.get::<String>(3)?),
    })
}

fn row_to_tenant(row: &libsql::Row) -> Result<Tenant, libsql::Error> {
    Ok(Tenant {
        id: row.get(0)?,
        name: row.get(1)?,
        credential: row.get(2)?,
        quota: row.get(3)?,
        webhook_url: row.get::<Option<String>>(4)?,
        webhook_auth: row.get::<Option<String>>(5)?,
    })
}

fn opt_text(value: &Option<String>) -> Value {
    match value {
        Some(s) => Value::Text(s.clone()),
        None => Value::Null,
    }
}

async fn collect<T>(
    mut rows: libsql::Rows,
    map: fn(&libsql::Row) -> Result<T, libsql::Error>,
) -> Result<Vec<T>, StoreError> {
    let mut out = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?
    {
        out.push(map(&row).map_err(|e| StoreError::Query(e.to_string()))?);
    }
    Ok(out)
}

// ── Store impl ──────────────────────────────────────────────────────

#[async_trait]
impl Store for LibSqlStore {
    async fn insert_message(&self, record: &MessageRecord) -> Result<(), StoreError> {
        self.execute(
            "INSERT INTO messages (tenant_id, sender, body, timestamp) VALUES (?1, ?2, ?3, ?4)",
            vec![
                Value::Integer(record.tenant_id),
                Value::Text(record.sender.clone()),
                Value::Text(record.body.clone()),
                Value::Text(record.timestamp.to_rfc3339()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn messages_by_sender(&self, sender: &str) -> Result<Vec<MessageRecord>, StoreError> {
        let rows = self
            .query(
                "SELECT tenant_id, sender, body, timestamp FROM messages \
                 WHERE sender = ?1 ORDER BY id ASC",
                vec![Value::Text(sender.to_string())],
            )
            .await?;
        collect(rows, row_to_message).await
    }

    async fn insert_mute(&self, mute: &Mute) -> Result<Mute, StoreError> {
        self.execute(
            "INSERT INTO mutes (user, issuer, reason, message, created_at, expires_at, \
             status, tenant_id) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            vec![
                Value::Text(mute.user.clone()),
                Value::Text(mute.issuer.clone()),
                Value::Text(mute.reason.clone()),
                Value::Text(mute.message.clone()),
                Value::Text(mute.created_at.to_rfc3339()),
                opt_text(&mute.expires_at.map(|e| e.to_rfc3339())),
                Value::Text(status_to_str(mute.status).to_string()),
                Value::Integer(mute.tenant_id),
            ],
        )
        .await?;
        let mut stored = mute.clone();
        stored.id = self.last_insert_id().await;
        Ok(stored)
    }

    async fn active_mutes(&self) -> Result<Vec<Mute>, StoreError> {
        let rows = self
            .query(
                &format!(
                    "SELECT {MUTE_COLUMNS} FROM mutes \
                     WHERE status != 'canceled' AND expires_at > ?1"
                ),
                vec![Value::Text(Utc::now().to_rfc3339())],
            )
            .await?;
        collect(rows, row_to_mute).await
    }

    async fn mutes_by_issuer(
        &self,
        issuer: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Mute>, StoreError> {
        let rows = self
            .query(
                &format!(
                    "SELECT {MUTE_COLUMNS} FROM mutes \
                     WHERE issuer = ?1 AND status != 'canceled' AND created_at > ?2"
                ),
                vec![
                    Value::Text(issuer.to_string()),
                    Value::Text(since.to_rfc3339()),
                ],
            )
            .await?;
        collect(rows, row_to_mute).await
    }

    async fn mutes_for_user(&self, user: &str) -> Result<Vec<Mute>, StoreError> {
        let rows = self
            .query(
                &format!(
                    "SELECT {MUTE_COLUMNS} FROM mutes \
                     WHERE user = ?1 AND status != 'canceled'"
                ),
                vec![Value::Text(user.to_string())],
            )
            .await?;
        collect(rows, row_to_mute).await
    }

    async fn cancel_mute(
        &self,
        id: i64,
        unmute_issuer: &str,
        unmute_tenant_id: i64,
    ) -> Result<(), StoreError> {
        let changed = self
            .execute(
                "UPDATE mutes SET status = 'canceled', unmute_issuer = ?2, \
                 unmute_tenant_id = ?3 WHERE id = ?1",
                vec![
                    Value::Integer(id),
                    Value::Text(unmute_issuer.to_string()),
                    Value::Integer(unmute_tenant_id),
                ],
            )
            .await?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "mute".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn tenants(&self) -> Result<Vec<Tenant>, StoreError> {
        let rows = self
            .query(
                "SELECT id, name, credential, quota, webhook_url, webhook_auth FROM tenants",
                vec![],
            )
            .await?;
        collect(rows, row_to_tenant).await
    }

    async fn insert_tenant(&self, tenant: &Tenant) -> Result<Tenant, StoreError> {
        self.execute(
            "INSERT INTO tenants (name, credential, quota, webhook_url, webhook_auth) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            vec![
                Value::Text(tenant.name.clone()),
                Value::Text(tenant.credential.clone()),
                Value::Integer(tenant.quota),
                opt_text(&tenant.webhook_url),
                opt_text(&tenant.webhook_auth),
            ],
        )
        .await?;
        let mut stored = tenant.clone();
        stored.id = self.last_insert_id().await;
        Ok(stored)
    }

    async fn tenant_exists(&self, name: &str) -> Result<bool, StoreError> {
        let mut rows = self
            .query(
                "SELECT COUNT(*) FROM tenants WHERE name = ?1",
                vec![Value::Text(name.to_string())],
            )
            .await?;
        let row = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        match row {
            Some(row) => {
                let count: i64 = row.get(0).map_err(|e| StoreError::Query(e.to_string()))?;
                Ok(count > 0)
            }
            None => Ok(false),
        }
    }
}
