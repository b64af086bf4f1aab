//! Distribution fan-out: bus publish plus concurrent webhook delivery
//! with per-tenant payload shaping and dead-endpoint pruning.

use std::sync::Arc;
use std::sync::LazyLock;

use futures::future::join_all;
use regex::Regex;
use tracing::{debug, warn};

use crate::bus::EventBus;
use crate::distribution::webhook::WebhookTransport;
use crate::model::{ChatMessage, Tenant};
use crate::registry::TenantRegistry;

/// In-game formatting control sequences (`§` plus one code character) are
/// stripped before anything leaves the relay.
static FORMAT_CODES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("§.").unwrap());

/// Tokens the partner relay must never receive, matched against the
/// leet-decoded, letters-only form of the body.
const SUPPRESSED_TOKENS: &[&str] = &["kys", "fag", "retard"];

/// Per-target result of one distribution round, for observability and
/// tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Target deliberately not contacted (echo or slur suppression).
    Skipped,
    /// Delivery failed; failure logged and swallowed.
    Ignored,
}

pub struct DistributionFanout {
    bus: Arc<dyn EventBus>,
    registry: Arc<TenantRegistry>,
    transport: Arc<dyn WebhookTransport>,
    chat_topic: String,
    partner_marker: String,
}

impl DistributionFanout {
    pub fn new(
        bus: Arc<dyn EventBus>,
        registry: Arc<TenantRegistry>,
        transport: Arc<dyn WebhookTransport>,
        chat_topic: String,
        partner_marker: String,
    ) -> Self {
        Self {
            bus,
            registry,
            transport,
            chat_topic,
            partner_marker,
        }
    }

    /// Publish an admitted message on the bus and mirror it to every
    /// tenant webhook. Individual failures never block sibling targets;
    /// the outcome list exists for callers that want to inspect them.
    pub async fn distribute(&self, message: &ChatMessage) -> Vec<(String, DeliveryOutcome)> {
        let mut outgoing = message.clone();
        outgoing.body = FORMAT_CODES.replace_all(&message.body, "").into_owned();

        match serde_json::to_string(&outgoing) {
            Ok(payload) => match self.bus.publish(&self.chat_topic, &payload).await {
                Ok(subscribers) => {
                    debug!(topic = %self.chat_topic, subscribers, "Message published")
                }
                Err(e) => warn!(topic = %self.chat_topic, error = %e, "Bus publish failed"),
            },
            Err(e) => warn!(error = %e, "Could not serialize message for the bus"),
        }

        let targets: Vec<_> = self
            .registry
            .all()
            .await
            .into_iter()
            .filter(|t| t.webhook_url.as_deref().is_some_and(|u| !u.is_empty()))
            .collect();

        let deliveries = targets
            .into_iter()
            .map(|tenant| self.deliver_to(tenant, &outgoing));
        join_all(deliveries).await
    }

    async fn deliver_to(
        &self,
        tenant: Arc<Tenant>,
        message: &ChatMessage,
    ) -> (String, DeliveryOutcome) {
        let partner = tenant.is_partner_relay(&self.partner_marker);

        if partner {
            // Never echo a partner-originated message back to the partner.
            if message
                .tenant
                .as_deref()
                .is_some_and(|t| t.contains(&self.partner_marker))
            {
                return (tenant.name.clone(), DeliveryOutcome::Skipped);
            }
            let decoded = leet_decode(&message.body);
            if SUPPRESSED_TOKENS.iter().any(|t| decoded.contains(t)) {
                debug!(tenant = %tenant.name, "Message suppressed for partner delivery");
                return (tenant.name.clone(), DeliveryOutcome::Skipped);
            }
        }

        let auth = tenant.webhook_auth.clone().unwrap_or_default();
        let payload = if partner {
            serde_json::json!({
                "uuid": message.sender,
                "isPremium": true,
                "message": message.body,
                "apiKey": auth,
            })
        } else {
            match serde_json::to_value(message) {
                Ok(v) => v,
                Err(e) => {
                    warn!(tenant = %tenant.name, error = %e, "Payload serialization failed");
                    return (tenant.name.clone(), DeliveryOutcome::Ignored);
                }
            }
        };

        let url = tenant.webhook_url.as_deref().unwrap_or_default();
        match self.transport.deliver(url, &auth, &payload).await {
            Ok(()) => (tenant.name.clone(), DeliveryOutcome::Delivered),
            Err(e) => {
                warn!(tenant = %tenant.name, error = %e, "Webhook delivery failed");
                if e.is_gateway_unavailable() {
                    // Dead endpoint: stop delivering until the next
                    // registry refresh restores it if still upstream.
                    warn!(tenant = %tenant.name, "Deregistering unreachable webhook target");
                    self.registry.remove(tenant.id).await;
                }
                (tenant.name.clone(), DeliveryOutcome::Ignored)
            }
        }
    }
}

/// Lowercase, decode common digit/symbol substitutions, and keep ASCII
/// letters only, so "r3t@rd!" and "retard" normalize identically.
fn leet_decode(body: &str) -> String {
    body.to_lowercase()
        .chars()
        .filter_map(|c| match c {
            '0' => Some('o'),
            '1' => Some('i'),
            '3' => Some('e'),
            '4' | '@' => Some('a'),
            '5' | '$' => Some('s'),
            '7' => Some('t'),
            c if c.is_ascii_lowercase() => Some(c),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BroadcastBus;
    use crate::error::DeliveryError;
    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::Mutex;

    /// Transport that records deliveries and fails for configured URLs.
    struct RecordingTransport {
        delivered: Mutex<Vec<(String, serde_json::Value)>>,
        fail_with: Mutex<std::collections::HashMap<String, u16>>,
    }

    impl RecordingTransport {
        fn new() -> Self {
            Self {
                delivered: Mutex::new(Vec::new()),
                fail_with: Mutex::new(std::collections::HashMap::new()),
            }
        }

        async fn fail(&self, url: &str, status: u16) {
            self.fail_with.lock().await.insert(url.to_string(), status);
        }
    }

    #[async_trait]
    impl WebhookTransport for RecordingTransport {
        async fn deliver(
            &self,
            url: &str,
            _auth: &str,
            payload: &serde_json::Value,
        ) -> Result<(), DeliveryError> {
            if let Some(status) = self.fail_with.lock().await.get(url) {
                return Err(DeliveryError::BadStatus {
                    url: url.to_string(),
                    status: *status,
                });
            }
            self.delivered
                .lock()
                .await
                .push((url.to_string(), payload.clone()));
            Ok(())
        }
    }

    fn tenant(id: i64, name: &str, url: &str) -> Tenant {
        Tenant {
            id,
            name: name.into(),
            credential: format!("key-{id}"),
            quota: 0,
            webhook_url: Some(url.into()),
            webhook_auth: Some(format!("auth-{id}")),
        }
    }

    fn message(sender: &str, tenant: Option<&str>, body: &str) -> ChatMessage {
        ChatMessage {
            sender: sender.into(),
            tenant: tenant.map(String::from),
            display_name: Some("Steve".into()),
            body: body.into(),
            timestamp: Utc::now(),
        }
    }

    struct Fixture {
        fanout: DistributionFanout,
        transport: Arc<RecordingTransport>,
        registry: Arc<TenantRegistry>,
        bus: Arc<BroadcastBus>,
    }

    async fn fixture() -> Fixture {
        let bus = Arc::new(BroadcastBus::new());
        let registry = Arc::new(TenantRegistry::new());
        registry
            .replace_all(vec![
                tenant(1, "game", "http://game/hook"),
                tenant(2, "partner-mirror", "http://partner/hook"),
            ])
            .await;
        let transport = Arc::new(RecordingTransport::new());
        let fanout = DistributionFanout::new(
            bus.clone(),
            registry.clone(),
            Arc::clone(&transport) as Arc<dyn WebhookTransport>,
            "chat".into(),
            "partner".into(),
        );
        Fixture {
            fanout,
            transport,
            registry,
            bus,
        }
    }

    fn outcome(outcomes: &[(String, DeliveryOutcome)], name: &str) -> DeliveryOutcome {
        outcomes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, o)| *o)
            .unwrap()
    }

    #[tokio::test]
    async fn publishes_with_format_codes_stripped() {
        let f = fixture().await;
        let mut rx = f.bus.subscribe("chat").await;

        f.fanout
            .distribute(&message("u1", Some("game"), "§6hello §rworld"))
            .await;

        let published: ChatMessage = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(published.body, "hello world");
    }

    #[tokio::test]
    async fn partner_receives_reduced_payload() {
        let f = fixture().await;
        f.fanout
            .distribute(&message("u1", Some("game"), "hello"))
            .await;

        let delivered = f.transport.delivered.lock().await;
        let (_, payload) = delivered
            .iter()
            .find(|(url, _)| url == "http://partner/hook")
            .unwrap();
        assert_eq!(payload["uuid"], "u1");
        assert_eq!(payload["isPremium"], true);
        assert_eq!(payload["message"], "hello");
        assert_eq!(payload["apiKey"], "auth-2");

        // The normal tenant gets the full message shape.
        let (_, full) = delivered
            .iter()
            .find(|(url, _)| url == "http://game/hook")
            .unwrap();
        assert_eq!(full["sender"], "u1");
        assert_eq!(full["body"], "hello");
    }

    #[tokio::test]
    async fn partner_origin_is_not_echoed_back() {
        let f = fixture().await;
        let outcomes = f
            .fanout
            .distribute(&message("u1", Some("partner-mirror"), "hello"))
            .await;

        assert_eq!(outcome(&outcomes, "partner-mirror"), DeliveryOutcome::Skipped);
        assert_eq!(outcome(&outcomes, "game"), DeliveryOutcome::Delivered);
    }

    #[tokio::test]
    async fn leet_encoded_insult_is_suppressed_for_partner_only() {
        let f = fixture().await;
        let outcomes = f
            .fanout
            .distribute(&message("u1", Some("game"), "you are a r3t@rd"))
            .await;

        assert_eq!(outcome(&outcomes, "partner-mirror"), DeliveryOutcome::Skipped);
        assert_eq!(outcome(&outcomes, "game"), DeliveryOutcome::Delivered);
    }

    #[tokio::test]
    async fn gateway_unavailable_deregisters_until_refresh() {
        let f = fixture().await;
        f.transport.fail("http://game/hook", 502).await;

        let outcomes = f
            .fanout
            .distribute(&message("u1", Some("game"), "hello"))
            .await;
        assert_eq!(outcome(&outcomes, "game"), DeliveryOutcome::Ignored);

        // Next round no longer attempts the dead target.
        let outcomes = f
            .fanout
            .distribute(&message("u1", Some("game"), "hello again"))
            .await;
        assert!(!outcomes.iter().any(|(n, _)| n == "game"));

        // A registry refresh restores it.
        f.registry
            .replace_all(vec![
                tenant(1, "game", "http://game/hook"),
                tenant(2, "partner-mirror", "http://partner/hook"),
            ])
            .await;
        let outcomes = f
            .fanout
            .distribute(&message("u1", Some("game"), "third time"))
            .await;
        assert!(outcomes.iter().any(|(n, _)| n == "game"));
    }

    #[tokio::test]
    async fn ordinary_failure_does_not_deregister() {
        let f = fixture().await;
        f.transport.fail("http://game/hook", 500).await;

        f.fanout
            .distribute(&message("u1", Some("game"), "hello"))
            .await;
        let outcomes = f
            .fanout
            .distribute(&message("u1", Some("game"), "hello again"))
            .await;
        assert!(outcomes.iter().any(|(n, _)| n == "game"));
    }

    #[test]
    fn leet_decoding_examples() {
        assert_eq!(leet_decode("r3t@rd!"), "retard");
        assert_eq!(leet_decode("K Y 5"), "kys");
        assert_eq!(leet_decode("hello world"), "helloworld");
    }
}
