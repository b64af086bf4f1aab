//! In-memory projection of "who is muted and until when".
//!
//! Never the source of truth — a read-through accelerator over the store.
//! Rebuilds happen into a fresh map that is swapped in atomically, so
//! readers never observe a partially rebuilt cache.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StoreError;
use crate::model::Mute;
use crate::store::Store;

/// Cache of the effective mute per user.
pub struct MuteCache {
    store: Arc<dyn Store>,
    entries: RwLock<HashMap<String, Mute>>,
}

impl MuteCache {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// The effective mute for a user, if any.
    ///
    /// A cold (empty) cache triggers a full rebuild. A hit whose entry has
    /// since expired or been canceled is treated as absent and evicted
    /// without a rebuild.
    pub async fn get(&self, user: &str) -> Result<Option<Mute>, StoreError> {
        if self.entries.read().await.is_empty() {
            self.refresh().await?;
        }

        let now = Utc::now();
        let hit = self.entries.read().await.get(user).cloned();
        match hit {
            Some(mute) if mute.is_effective(now) => Ok(Some(mute)),
            Some(_) => {
                // stale entry, evict opportunistically
                self.entries.write().await.remove(user);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Forget everything; the next `get` rebuilds from the store.
    /// Called after every successful mute/unmute write.
    pub async fn invalidate(&self) {
        self.entries.write().await.clear();
        debug!("Mute cache invalidated");
    }

    /// Current effective mutes (one per user).
    pub async fn snapshot(&self) -> Result<Vec<Mute>, StoreError> {
        if self.entries.read().await.is_empty() {
            self.refresh().await?;
        }
        Ok(self.entries.read().await.values().cloned().collect())
    }

    /// Rebuild from the store: load all active rows, keep the longest mute
    /// per user, swap the map in wholesale.
    async fn refresh(&self) -> Result<(), StoreError> {
        let active = self.store.active_mutes().await?;
        let mut next: HashMap<String, Mute> = HashMap::new();
        for mute in active {
            match next.get(&mute.user) {
                Some(current) if current.expires_at >= mute.expires_at => {}
                _ => {
                    next.insert(mute.user.clone(), mute);
                }
            }
        }
        debug!(entries = next.len(), "Mute cache rebuilt");
        *self.entries.write().await = next;
        Ok(())
    }
}
