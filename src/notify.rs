//! Side-channel notification producer for staff-facing alerts.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::bus::EventBus;
use crate::error::BusError;

/// Producer for staff notifications. Topic creation is idempotent: the
/// first `produce` on a topic creates it, later calls reuse it.
#[async_trait]
pub trait NotificationProducer: Send + Sync {
    async fn produce(&self, topic: &str, payload: &str) -> Result<(), BusError>;
}

/// Notification producer that rides on the shared event bus.
pub struct BusNotifier {
    bus: Arc<dyn EventBus>,
    created_topics: Mutex<HashSet<String>>,
}

impl BusNotifier {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self {
            bus,
            created_topics: Mutex::new(HashSet::new()),
        }
    }
}

#[async_trait]
impl NotificationProducer for BusNotifier {
    async fn produce(&self, topic: &str, payload: &str) -> Result<(), BusError> {
        {
            let mut created = self.created_topics.lock().await;
            if created.insert(topic.to_string()) {
                info!(topic, "Created notification topic");
            }
        }
        self.bus.publish(topic, payload).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BroadcastBus;

    #[tokio::test]
    async fn produce_publishes_on_bus() {
        let bus = Arc::new(BroadcastBus::new());
        let mut rx = bus.subscribe("staff").await;
        let notifier = BusNotifier::new(bus.clone());

        notifier.produce("staff", "user muted").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "user muted");

        // Second produce on the same topic reuses it.
        notifier.produce("staff", "user unmuted").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "user unmuted");
    }
}
