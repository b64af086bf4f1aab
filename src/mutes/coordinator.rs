//! Mute coordination — fans mute/unmute requests out to every registered
//! back-end.
//!
//! The store-backed back-end is authoritative: its result is the call
//! result and it must succeed. The partner relay and the staff
//! notification relay are best-effort; their failures are logged, never
//! surfaced. All back-ends run concurrently and one back-end's failure
//! never prevents the others from being attempted.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::config::RelayConfig;
use crate::distribution::webhook::WebhookTransport;
use crate::error::{
    AuthError, ConflictError, RateLimitError, Result, ValidationError,
};
use crate::model::{Mute, MuteStatus, UnmuteRequest};
use crate::mutes::cache::MuteCache;
use crate::mutes::escalation;
use crate::names::{self, NameResolver};
use crate::notify::NotificationProducer;
use crate::registry::TenantRegistry;
use crate::store::Store;

/// Tag partner relays put on mutes they mirror back to us. Re-writing them
/// would loop the mute between the services.
const AUTOMUTE_TAG: &str = "AUTOMUTE";

/// Outcome of one best-effort back-end invocation. Lets tests assert on
/// degradation without scraping logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendOutcome {
    Delivered,
    /// The back-end decided not to act (e.g. no partner tenant known).
    Skipped,
    /// The back-end failed; the failure was swallowed.
    Ignored(String),
}

/// Best-effort mute back-end: partner relays, notification producers.
#[async_trait]
pub trait MuteBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn mute(&self, mute: &Mute, credential: &str) -> BackendOutcome;

    async fn unmute(&self, unmute: &UnmuteRequest, credential: &str) -> BackendOutcome;
}

// ── Authoritative back-end ──────────────────────────────────────────

/// Store-backed mute back-end. Owns validation, rate limiting, escalation,
/// the authoritative write, and cache invalidation.
pub struct StoreMuteBackend {
    store: Arc<dyn Store>,
    registry: Arc<TenantRegistry>,
    cache: Arc<MuteCache>,
    config: Arc<RelayConfig>,
}

impl StoreMuteBackend {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<TenantRegistry>,
        cache: Arc<MuteCache>,
        config: Arc<RelayConfig>,
    ) -> Self {
        Self {
            store,
            registry,
            cache,
            config,
        }
    }

    pub async fn mute(&self, mut mute: Mute, credential: &str) -> Result<Mute> {
        if mute.user.is_empty() {
            return Err(ValidationError::InvalidMute.into());
        }
        let tenant = self
            .registry
            .resolve(credential)
            .await
            .ok_or(AuthError::UnknownCredential)?;

        // Partner relays mirror our own auto-mutes back at us; writing
        // those would loop. No-op passthrough.
        if tenant.is_partner_relay(&self.config.partner_marker)
            && mute.message.contains(AUTOMUTE_TAG)
        {
            return Ok(mute);
        }
        mute.tenant_id = tenant.id;

        let since = Utc::now() - Duration::from_std(self.config.mute_rate_window).unwrap_or_default();
        let recent = self.store.mutes_by_issuer(&mute.issuer, since).await?;
        if recent.len() > self.config.max_recent_mutes
            && mute.issuer != self.config.privileged_issuer
        {
            return Err(RateLimitError::TooManyMutes.into());
        }

        // Rule violations (or mutes without an explicit expiry) get an
        // escalated duration based on the user's history.
        let text = mute.combined_text();
        if text.contains("rule ") || mute.expires_at.is_none() {
            let history = self.store.mutes_for_user(&mute.user).await?;
            let messages = self.store.messages_by_sender(&mute.user).await?;
            let first = messages
                .first()
                .ok_or(ValidationError::NoPriorActivity)?;
            let hours = escalation::next_duration_hours(
                &history,
                first.timestamp,
                &self.config.partner_marker,
            );
            mute.expires_at = Some(Utc::now() + Duration::hours(hours));
        }

        let stored = self.store.insert_mute(&mute).await?;
        self.cache.invalidate().await;
        info!(
            user = %stored.user,
            issuer = %stored.issuer,
            expires_at = ?stored.expires_at,
            "Mute written"
        );
        Ok(stored)
    }

    pub async fn unmute(&self, unmute: &UnmuteRequest, credential: &str) -> Result<Mute> {
        let tenant = self
            .registry
            .resolve(credential)
            .await
            .ok_or(AuthError::UnknownCredential)?;

        let effective = self
            .cache
            .get(&unmute.user)
            .await?
            .ok_or_else(|| ConflictError::NoActiveMute(unmute.user.clone()))?;

        self.store
            .cancel_mute(effective.id, &unmute.issuer, tenant.id)
            .await?;
        self.cache.invalidate().await;
        info!(user = %unmute.user, issuer = %unmute.issuer, "Mute canceled");

        let mut canceled = effective;
        canceled.status = MuteStatus::Canceled;
        canceled.unmute_issuer = Some(unmute.issuer.clone());
        canceled.unmute_tenant_id = Some(tenant.id);
        Ok(canceled)
    }
}

// ── Best-effort back-ends ───────────────────────────────────────────

/// Mirrors mute state changes to partner-relay tenants over their webhook.
pub struct PartnerRelayBackend {
    registry: Arc<TenantRegistry>,
    transport: Arc<dyn WebhookTransport>,
    partner_marker: String,
}

impl PartnerRelayBackend {
    pub fn new(
        registry: Arc<TenantRegistry>,
        transport: Arc<dyn WebhookTransport>,
        partner_marker: String,
    ) -> Self {
        Self {
            registry,
            transport,
            partner_marker,
        }
    }

    async fn send(&self, payload: serde_json::Value) -> BackendOutcome {
        let partners: Vec<_> = self
            .registry
            .all()
            .await
            .into_iter()
            .filter(|t| t.is_partner_relay(&self.partner_marker))
            .filter(|t| t.webhook_url.as_deref().is_some_and(|u| !u.is_empty()))
            .collect();
        if partners.is_empty() {
            return BackendOutcome::Skipped;
        }

        let mut failures = Vec::new();
        for partner in partners {
            let url = partner.webhook_url.as_deref().unwrap_or_default();
            let auth = partner.webhook_auth.as_deref().unwrap_or_default();
            if let Err(e) = self.transport.deliver(url, auth, &payload).await {
                warn!(tenant = %partner.name, error = %e, "Partner relay notification failed");
                failures.push(e.to_string());
            }
        }
        if failures.is_empty() {
            BackendOutcome::Delivered
        } else {
            BackendOutcome::Ignored(failures.join("; "))
        }
    }
}

#[async_trait]
impl MuteBackend for PartnerRelayBackend {
    fn name(&self) -> &str {
        "partner-relay"
    }

    async fn mute(&self, mute: &Mute, _credential: &str) -> BackendOutcome {
        self.send(serde_json::json!({
            "action": "mute",
            "uuid": mute.user,
            "reason": mute.reason,
            "expires": mute.expires_at.map(|e| e.to_rfc3339()),
        }))
        .await
    }

    async fn unmute(&self, unmute: &UnmuteRequest, _credential: &str) -> BackendOutcome {
        self.send(serde_json::json!({
            "action": "unmute",
            "uuid": unmute.user,
            "reason": unmute.reason,
        }))
        .await
    }
}

/// Produces human-readable mute/unmute alerts on the staff topic.
pub struct NotificationRelayBackend {
    producer: Arc<dyn NotificationProducer>,
    resolver: Arc<dyn NameResolver>,
    topic: String,
}

impl NotificationRelayBackend {
    pub fn new(
        producer: Arc<dyn NotificationProducer>,
        resolver: Arc<dyn NameResolver>,
        topic: String,
    ) -> Self {
        Self {
            producer,
            resolver,
            topic,
        }
    }

    async fn produce(&self, text: String) -> BackendOutcome {
        let payload = serde_json::json!({ "message": text, "channel": "mutes" }).to_string();
        match self.producer.produce(&self.topic, &payload).await {
            Ok(()) => BackendOutcome::Delivered,
            Err(e) => {
                warn!(error = %e, "Staff notification failed");
                BackendOutcome::Ignored(e.to_string())
            }
        }
    }
}

#[async_trait]
impl MuteBackend for NotificationRelayBackend {
    fn name(&self) -> &str {
        "notification-relay"
    }

    async fn mute(&self, mute: &Mute, _credential: &str) -> BackendOutcome {
        let user = names::resolve_or_id(self.resolver.as_ref(), &mute.user).await;
        let issuer = names::resolve_or_id(self.resolver.as_ref(), &mute.issuer).await;
        let until = mute
            .expires_at
            .map(|e| format!(" until <t:{}>", e.timestamp()))
            .unwrap_or_default();
        self.produce(format!(
            "\u{1F507} User {user} was muted by {issuer} for `{}`{until} message: {}",
            mute.reason, mute.message
        ))
        .await
    }

    async fn unmute(&self, unmute: &UnmuteRequest, _credential: &str) -> BackendOutcome {
        let user = names::resolve_or_id(self.resolver.as_ref(), &unmute.user).await;
        let issuer = names::resolve_or_id(self.resolver.as_ref(), &unmute.issuer).await;
        self.produce(format!(
            "\u{1F508} User {user} was unmuted by {issuer} for `{}`",
            unmute.reason
        ))
        .await
    }
}

// ── Coordinator ─────────────────────────────────────────────────────

/// Fan-out over the authoritative back-end plus all best-effort ones.
pub struct MuteCoordinator {
    authority: Arc<StoreMuteBackend>,
    best_effort: Vec<Arc<dyn MuteBackend>>,
}

impl MuteCoordinator {
    pub fn new(authority: Arc<StoreMuteBackend>, best_effort: Vec<Arc<dyn MuteBackend>>) -> Self {
        Self {
            authority,
            best_effort,
        }
    }

    /// Create a mute. The authoritative write decides the result; the
    /// best-effort back-ends run alongside and cannot fail the call.
    pub async fn mute(&self, mute: Mute, credential: &str) -> Result<Mute> {
        let side = futures::future::join_all(self.best_effort.iter().map(|backend| async {
            (backend.name().to_string(), backend.mute(&mute, credential).await)
        }));
        let (result, outcomes) = tokio::join!(self.authority.mute(mute.clone(), credential), side);
        log_outcomes("mute", &outcomes);
        result
    }

    /// Cancel a user's effective mute across all back-ends.
    pub async fn unmute(&self, unmute: UnmuteRequest, credential: &str) -> Result<Mute> {
        let side = futures::future::join_all(self.best_effort.iter().map(|backend| async {
            (
                backend.name().to_string(),
                backend.unmute(&unmute, credential).await,
            )
        }));
        let (result, outcomes) = tokio::join!(self.authority.unmute(&unmute, credential), side);
        log_outcomes("unmute", &outcomes);
        result
    }
}

fn log_outcomes(operation: &str, outcomes: &[(String, BackendOutcome)]) {
    for (backend, outcome) in outcomes {
        match outcome {
            BackendOutcome::Delivered => {}
            BackendOutcome::Skipped => {
                info!(backend = %backend, operation, "Back-end skipped")
            }
            BackendOutcome::Ignored(reason) => {
                warn!(backend = %backend, operation, reason = %reason, "Back-end failed, ignored")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::model::{MessageRecord, Tenant};
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const KEY: &str = "key-1";
    const PARTNER_KEY: &str = "key-partner";

    struct Fixture {
        store: Arc<MemoryStore>,
        coordinator: MuteCoordinator,
        counting: Arc<CountingBackend>,
    }

    /// Back-end that counts calls and optionally always fails.
    struct CountingBackend {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl MuteBackend for CountingBackend {
        fn name(&self) -> &str {
            "counting"
        }

        async fn mute(&self, _mute: &Mute, _credential: &str) -> BackendOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                BackendOutcome::Ignored("boom".into())
            } else {
                BackendOutcome::Delivered
            }
        }

        async fn unmute(&self, _unmute: &UnmuteRequest, _credential: &str) -> BackendOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            BackendOutcome::Delivered
        }
    }

    async fn fixture(best_effort_fails: bool) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store
            .seed_tenant(Tenant {
                id: 0,
                name: "game".into(),
                credential: KEY.into(),
                quota: 0,
                webhook_url: None,
                webhook_auth: None,
            })
            .await;
        store
            .seed_tenant(Tenant {
                id: 0,
                name: "partner-mirror".into(),
                credential: PARTNER_KEY.into(),
                quota: 0,
                webhook_url: None,
                webhook_auth: None,
            })
            .await;

        let registry = Arc::new(TenantRegistry::new());
        registry
            .refresh_from(store.as_ref() as &dyn Store)
            .await
            .unwrap();

        let cache = Arc::new(MuteCache::new(Arc::clone(&store) as Arc<dyn Store>));
        let config = Arc::new(RelayConfig::default());
        let authority = Arc::new(StoreMuteBackend::new(
            Arc::clone(&store) as Arc<dyn Store>,
            registry,
            cache,
            config,
        ));
        let counting = Arc::new(CountingBackend {
            calls: AtomicUsize::new(0),
            fail: best_effort_fails,
        });
        let coordinator = MuteCoordinator::new(
            authority,
            vec![Arc::clone(&counting) as Arc<dyn MuteBackend>],
        );
        Fixture {
            store,
            coordinator,
            counting,
        }
    }

    fn request(user: &str, reason: &str, expires_hours: Option<i64>) -> Mute {
        Mute {
            id: 0,
            user: user.into(),
            issuer: "mod-1".into(),
            reason: reason.into(),
            message: String::new(),
            created_at: Utc::now(),
            expires_at: expires_hours.map(|h| Utc::now() + Duration::hours(h)),
            status: MuteStatus::Active,
            tenant_id: 0,
            unmute_issuer: None,
            unmute_tenant_id: None,
        }
    }

    async fn seed_message(store: &MemoryStore, sender: &str) {
        store
            .insert_message(&MessageRecord {
                tenant_id: 1,
                sender: sender.into(),
                body: "hello".into(),
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn explicit_expiry_is_used_verbatim() {
        let f = fixture(false).await;
        let result = f
            .coordinator
            .mute(request("u1", "spamming", Some(12)), KEY)
            .await
            .unwrap();
        assert!(result.id > 0);
        let remaining = result.expires_at.unwrap() - Utc::now();
        assert!(remaining > Duration::hours(11));
        assert_eq!(f.counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rule_violation_escalates_from_history() {
        let f = fixture(false).await;
        seed_message(&f.store, "u1").await;

        let first = f
            .coordinator
            .mute(request("u1", "rule 1", None), KEY)
            .await
            .unwrap();
        // No prior rule mutes: 1 hour.
        assert!(first.expires_at.unwrap() - Utc::now() <= Duration::hours(1));

        let second = f
            .coordinator
            .mute(request("u1", "rule 1 again", None), KEY)
            .await
            .unwrap();
        // One prior rule-1 mute: 10 hours.
        let remaining = second.expires_at.unwrap() - Utc::now();
        assert!(remaining > Duration::hours(9));
        assert!(remaining <= Duration::hours(10));
    }

    #[tokio::test]
    async fn mute_without_prior_activity_fails() {
        let f = fixture(false).await;
        let err = f
            .coordinator
            .mute(request("ghost", "rule 1", None), KEY)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::NoPriorActivity)
        ));
    }

    #[tokio::test]
    async fn empty_user_is_invalid() {
        let f = fixture(false).await;
        let err = f
            .coordinator
            .mute(request("", "rule 1", Some(1)), KEY)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_mute");
    }

    #[tokio::test]
    async fn unknown_credential_is_unauthorized() {
        let f = fixture(false).await;
        let err = f
            .coordinator
            .mute(request("u1", "x", Some(1)), "bogus")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[tokio::test]
    async fn partner_automute_is_a_passthrough() {
        let f = fixture(false).await;
        let mut mute = request("u1", "x", Some(1));
        mute.message = "AUTOMUTE: filter evasion".into();

        let result = f.coordinator.mute(mute, PARTNER_KEY).await.unwrap();
        // Not persisted: id stays zero and no store row exists.
        assert_eq!(result.id, 0);
        assert!(f.store.mutes_for_user("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rate_limit_after_five_recent_mutes() {
        let f = fixture(false).await;
        for i in 0..6 {
            f.coordinator
                .mute(request(&format!("u{i}"), "spam", Some(1)), KEY)
                .await
                .unwrap();
        }
        let err = f
            .coordinator
            .mute(request("u7", "spam", Some(1)), KEY)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RateLimited(_)));
    }

    #[tokio::test]
    async fn privileged_issuer_bypasses_rate_limit() {
        let f = fixture(false).await;
        let privileged = RelayConfig::default().privileged_issuer;
        for i in 0..8 {
            let mut mute = request(&format!("u{i}"), "spam", Some(1));
            mute.issuer = privileged.clone();
            f.coordinator.mute(mute, KEY).await.unwrap();
        }
    }

    #[tokio::test]
    async fn best_effort_failure_does_not_fail_the_call() {
        let f = fixture(true).await;
        let result = f
            .coordinator
            .mute(request("u1", "spam", Some(1)), KEY)
            .await;
        assert!(result.is_ok());
        assert_eq!(f.counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unmute_without_active_mute_conflicts() {
        let f = fixture(false).await;
        let err = f
            .coordinator
            .unmute(
                UnmuteRequest {
                    user: "u1".into(),
                    issuer: "mod-1".into(),
                    reason: "appeal".into(),
                },
                KEY,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "no_mute_found");
    }

    #[tokio::test]
    async fn unmute_cancels_and_records_canceler() {
        let f = fixture(false).await;
        f.coordinator
            .mute(request("u1", "spam", Some(4)), KEY)
            .await
            .unwrap();

        let canceled = f
            .coordinator
            .unmute(
                UnmuteRequest {
                    user: "u1".into(),
                    issuer: "admin-9".into(),
                    reason: "appeal accepted".into(),
                },
                KEY,
            )
            .await
            .unwrap();
        assert_eq!(canceled.status, MuteStatus::Canceled);
        assert_eq!(canceled.unmute_issuer.as_deref(), Some("admin-9"));
        assert!(f.store.active_mutes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn notification_backend_renders_names() {
        use crate::bus::BroadcastBus;
        use crate::error::NameError;
        use crate::notify::BusNotifier;

        struct FixedResolver;
        #[async_trait]
        impl NameResolver for FixedResolver {
            async fn resolve(&self, user_id: &str) -> std::result::Result<Option<String>, NameError> {
                Ok(Some(format!("name-of-{user_id}")))
            }
        }

        let bus = Arc::new(BroadcastBus::new());
        let mut rx = bus.subscribe("staff").await;
        let backend = NotificationRelayBackend::new(
            Arc::new(BusNotifier::new(bus.clone())),
            Arc::new(FixedResolver),
            "staff".into(),
        );

        let outcome = backend.mute(&request("u1", "rule 1", Some(1)), KEY).await;
        assert_eq!(outcome, BackendOutcome::Delivered);

        let payload = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        let text = value["message"].as_str().unwrap();
        assert!(text.contains("name-of-u1"));
        assert!(text.contains("name-of-mod-1"));
        assert!(text.contains("rule 1"));
        assert_eq!(value["channel"], "mutes");
    }
}
