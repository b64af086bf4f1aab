//! `Store` trait — the narrow interface the relay consumes the durable
//! store through. The store is the single writer of record for message and
//! mute durability; every in-process cache is a projection of it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::{MessageRecord, Mute, Tenant};

/// Backend-agnostic store trait covering messages, mutes, and tenants.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Messages ────────────────────────────────────────────────────

    /// Persist one message record (accepted or rejected submissions alike).
    async fn insert_message(&self, record: &MessageRecord) -> Result<(), StoreError>;

    /// All message records for a sender, oldest first.
    async fn messages_by_sender(&self, sender: &str) -> Result<Vec<MessageRecord>, StoreError>;

    // ── Mutes ───────────────────────────────────────────────────────

    /// Persist a new mute. Returns the stored row including its id.
    async fn insert_mute(&self, mute: &Mute) -> Result<Mute, StoreError>;

    /// All mutes with a future expiry that have not been canceled.
    async fn active_mutes(&self) -> Result<Vec<Mute>, StoreError>;

    /// Non-canceled mutes created by `issuer` since the given instant.
    async fn mutes_by_issuer(
        &self,
        issuer: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Mute>, StoreError>;

    /// Non-canceled mutes for a user, including expired ones. Feeds the
    /// escalation history.
    async fn mutes_for_user(&self, user: &str) -> Result<Vec<Mute>, StoreError>;

    /// Mark a mute canceled, recording who lifted it. Canceled is terminal.
    async fn cancel_mute(
        &self,
        id: i64,
        unmute_issuer: &str,
        unmute_tenant_id: i64,
    ) -> Result<(), StoreError>;

    // ── Tenants ─────────────────────────────────────────────────────

    /// Full tenant set, used for the periodic registry snapshot.
    async fn tenants(&self) -> Result<Vec<Tenant>, StoreError>;

    /// Persist a new tenant. Returns the stored row including its id.
    async fn insert_tenant(&self, tenant: &Tenant) -> Result<Tenant, StoreError>;

    /// Whether a tenant with this name already exists.
    async fn tenant_exists(&self, name: &str) -> Result<bool, StoreError>;
}
