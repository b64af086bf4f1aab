//! Tenant registry — periodically refreshed snapshot of known tenants.
//!
//! The snapshot is replaced wholesale under a single swap; readers never
//! observe a partially rebuilt registry. Between refreshes the delivery
//! fan-out may prune tenants whose webhook endpoint is gone, the next
//! refresh restores them if still present upstream.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::model::Tenant;
use crate::store::Store;

#[derive(Default)]
struct Snapshot {
    by_credential: HashMap<String, Arc<Tenant>>,
    by_name: HashMap<String, Arc<Tenant>>,
}

impl Snapshot {
    fn build(tenants: impl IntoIterator<Item = Tenant>) -> Self {
        let mut snapshot = Self::default();
        for tenant in tenants {
            let tenant = Arc::new(tenant);
            snapshot
                .by_name
                .insert(tenant.name.clone(), Arc::clone(&tenant));
            snapshot.by_credential.insert(tenant.credential.clone(), tenant);
        }
        snapshot
    }
}

/// Holds the currently known tenant set, keyed by credential and by name.
pub struct TenantRegistry {
    snapshot: RwLock<Arc<Snapshot>>,
}

impl TenantRegistry {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    /// Resolve a submitted credential to a tenant.
    pub async fn resolve(&self, credential: &str) -> Option<Arc<Tenant>> {
        self.snapshot
            .read()
            .await
            .by_credential
            .get(credential)
            .cloned()
    }

    /// Secondary lookup by tenant name.
    pub async fn by_name(&self, name: &str) -> Option<Arc<Tenant>> {
        self.snapshot.read().await.by_name.get(name).cloned()
    }

    /// Every currently registered tenant.
    pub async fn all(&self) -> Vec<Arc<Tenant>> {
        self.snapshot
            .read()
            .await
            .by_credential
            .values()
            .cloned()
            .collect()
    }

    /// The registry has seen at least one refresh with tenants.
    pub async fn is_ready(&self) -> bool {
        !self.snapshot.read().await.by_credential.is_empty()
    }

    /// Replace the whole tenant set atomically.
    pub async fn replace_all(&self, tenants: Vec<Tenant>) {
        let next = Arc::new(Snapshot::build(tenants));
        *self.snapshot.write().await = next;
    }

    /// Drop one tenant from the in-memory set (webhook self-healing).
    /// The tenant returns on the next periodic refresh if still upstream.
    pub async fn remove(&self, tenant_id: i64) {
        let mut guard = self.snapshot.write().await;
        let remaining: Vec<Tenant> = guard
            .by_credential
            .values()
            .filter(|t| t.id != tenant_id)
            .map(|t| t.as_ref().clone())
            .collect();
        *guard = Arc::new(Snapshot::build(remaining));
    }

    /// Rebuild the snapshot from the durable store.
    pub async fn refresh_from(&self, store: &dyn Store) -> Result<(), crate::error::StoreError> {
        let tenants = store.tenants().await?;
        let count = tenants.len();
        self.replace_all(tenants).await;
        info!(tenants = count, "Tenant registry refreshed");
        Ok(())
    }
}

impl Default for TenantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the background refresh loop. Stops promptly when the shutdown
/// signal flips to `true`. Refresh failures are logged and retried on the
/// next tick, never fatal.
pub fn spawn_refresh_task(
    registry: Arc<TenantRegistry>,
    store: Arc<dyn Store>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = registry.refresh_from(store.as_ref()).await {
                        error!(error = %e, "Tenant registry refresh failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Tenant refresh loop stopping");
                        break;
                    }
                }
            }
        }
    })
}
