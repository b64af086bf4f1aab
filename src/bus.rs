//! Event bus seam — the shared pub/sub channel messages fan out on.
//!
//! The transport itself is an external collaborator; the relay only needs
//! `publish`. `BroadcastBus` is the in-process implementation used for
//! local deployments and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};
use tracing::debug;

use crate::error::BusError;

/// Broadcast channel capacity per topic.
const TOPIC_CAPACITY: usize = 256;

/// Publish-only view of the event bus.
///
/// The returned subscriber count is informational; zero subscribers is not
/// an error.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> Result<usize, BusError>;
}

/// In-process bus backed by one tokio broadcast channel per topic.
pub struct BroadcastBus {
    topics: RwLock<HashMap<String, broadcast::Sender<String>>>,
}

impl BroadcastBus {
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe to a topic, creating it on first use.
    pub async fn subscribe(&self, topic: &str) -> broadcast::Receiver<String> {
        let mut topics = self.topics.write().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for BroadcastBus {
    async fn publish(&self, topic: &str, payload: &str) -> Result<usize, BusError> {
        let topics = self.topics.read().await;
        let count = match topics.get(topic) {
            // send() fails only when no receiver exists, which is fine here
            Some(tx) => tx.send(payload.to_string()).unwrap_or(0),
            None => 0,
        };
        debug!(topic, subscribers = count, "Published event");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_reports_zero() {
        let bus = BroadcastBus::new();
        assert_eq!(bus.publish("chat", "hello").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let bus = BroadcastBus::new();
        let mut rx1 = bus.subscribe("chat").await;
        let mut rx2 = bus.subscribe("chat").await;

        let count = bus.publish("chat", "hello").await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(rx1.recv().await.unwrap(), "hello");
        assert_eq!(rx2.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = BroadcastBus::new();
        let mut chat = bus.subscribe("chat").await;
        let _staff = bus.subscribe("staff").await;

        bus.publish("staff", "mute issued").await.unwrap();
        bus.publish("chat", "hi").await.unwrap();
        assert_eq!(chat.recv().await.unwrap(), "hi");
    }
}
