//! In-memory `Store` backend for tests and local development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::model::{MessageRecord, Mute, MuteStatus, Tenant};
use crate::store::traits::Store;

#[derive(Default)]
struct Inner {
    messages: Vec<MessageRecord>,
    mutes: Vec<Mute>,
    tenants: Vec<Tenant>,
    next_mute_id: i64,
    next_tenant_id: i64,
}

/// Volatile store. Same semantics as the libsql backend, no durability.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a tenant directly, bypassing key generation (test helper).
    pub async fn seed_tenant(&self, tenant: Tenant) -> Tenant {
        let mut inner = self.inner.lock().await;
        inner.next_tenant_id += 1;
        let mut stored = tenant;
        if stored.id == 0 {
            stored.id = inner.next_tenant_id;
        }
        inner.tenants.push(stored.clone());
        stored
    }

    /// Number of persisted message records (test helper).
    pub async fn message_count(&self) -> usize {
        self.inner.lock().await.messages.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_message(&self, record: &MessageRecord) -> Result<(), StoreError> {
        self.inner.lock().await.messages.push(record.clone());
        Ok(())
    }

    async fn messages_by_sender(&self, sender: &str) -> Result<Vec<MessageRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .messages
            .iter()
            .filter(|m| m.sender == sender)
            .cloned()
            .collect())
    }

    async fn insert_mute(&self, mute: &Mute) -> Result<Mute, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.next_mute_id += 1;
        let mut stored = mute.clone();
        stored.id = inner.next_mute_id;
        inner.mutes.push(stored.clone());
        Ok(stored)
    }

    async fn active_mutes(&self) -> Result<Vec<Mute>, StoreError> {
        let now = Utc::now();
        Ok(self
            .inner
            .lock()
            .await
            .mutes
            .iter()
            .filter(|m| m.status != MuteStatus::Canceled && m.expires_at.is_some_and(|e| e > now))
            .cloned()
            .collect())
    }

    async fn mutes_by_issuer(
        &self,
        issuer: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Mute>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .mutes
            .iter()
            .filter(|m| {
                m.issuer == issuer && m.status != MuteStatus::Canceled && m.created_at > since
            })
            .cloned()
            .collect())
    }

    async fn mutes_for_user(&self, user: &str) -> Result<Vec<Mute>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .mutes
            .iter()
            .filter(|m| m.user == user && m.status != MuteStatus::Canceled)
            .cloned()
            .collect())
    }

    async fn cancel_mute(
        &self,
        id: i64,
        unmute_issuer: &str,
        unmute_tenant_id: i64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.mutes.iter_mut().find(|m| m.id == id) {
            Some(mute) => {
                mute.status = MuteStatus::Canceled;
                mute.unmute_issuer = Some(unmute_issuer.to_string());
                mute.unmute_tenant_id = Some(unmute_tenant_id);
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "mute".into(),
                id: id.to_string(),
            }),
        }
    }

    async fn tenants(&self) -> Result<Vec<Tenant>, StoreError> {
        Ok(self.inner.lock().await.tenants.clone())
    }

    async fn insert_tenant(&self, tenant: &Tenant) -> Result<Tenant, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.next_tenant_id += 1;
        let mut stored = tenant.clone();
        stored.id = inner.next_tenant_id;
        inner.tenants.push(stored.clone());
        Ok(stored)
    }

    async fn tenant_exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.inner.lock().await.tenants.iter().any(|t| t.name == name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn memory_store_matches_trait_semantics() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let mute = store
            .insert_mute(&Mute {
                id: 0,
                user: "u1".into(),
                issuer: "mod".into(),
                reason: String::new(),
                message: String::new(),
                created_at: now,
                expires_at: Some(now + Duration::hours(1)),
                status: MuteStatus::Active,
                tenant_id: 1,
                unmute_issuer: None,
                unmute_tenant_id: None,
            })
            .await
            .unwrap();
        assert_eq!(mute.id, 1);
        assert_eq!(store.active_mutes().await.unwrap().len(), 1);

        store.cancel_mute(mute.id, "admin", 1).await.unwrap();
        assert!(store.active_mutes().await.unwrap().is_empty());
        assert!(store.mutes_for_user("u1").await.unwrap().is_empty());
    }
}
