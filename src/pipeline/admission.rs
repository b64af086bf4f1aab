//! The admission pipeline: decides the fate of one inbound message and
//! produces its side effects.
//!
//! Every submit call that passes the duplicate check writes exactly one
//! message record, accepted or rejected. Rejections never reach
//! distribution; acceptance hands off to the fan-out without awaiting it.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::config::RelayConfig;
use crate::distribution::DistributionFanout;
use crate::error::{AuthError, RejectReason, Rejection, Result, ValidationError};
use crate::model::{ChatMessage, MessageRecord, Mute, MuteStatus, Tenant};
use crate::mutes::{MuteCache, MuteCoordinator};
use crate::names::{self, NameResolver};
use crate::pipeline::filter::{ModerationFilter, Verdict};
use crate::pipeline::window::{FilterSkipCounter, RecentMessageWindow};
use crate::registry::TenantRegistry;
use crate::store::Store;

/// Issuer identity stamped on automatic filter-evasion mutes.
const AUTO_MUTE_ISSUER: &str = "chat-relay";
const AUTO_MUTE_MESSAGE: &str = "You violated the chat rules";
const NAME_LOOKUP_ATTEMPTS: usize = 4;

pub struct AdmissionPipeline {
    store: Arc<dyn Store>,
    registry: Arc<TenantRegistry>,
    cache: Arc<MuteCache>,
    names: Arc<dyn NameResolver>,
    coordinator: Arc<MuteCoordinator>,
    fanout: Arc<DistributionFanout>,
    filter: ModerationFilter,
    window: RecentMessageWindow,
    counters: FilterSkipCounter,
    config: Arc<RelayConfig>,
}

impl AdmissionPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<TenantRegistry>,
        cache: Arc<MuteCache>,
        names: Arc<dyn NameResolver>,
        coordinator: Arc<MuteCoordinator>,
        fanout: Arc<DistributionFanout>,
        config: Arc<RelayConfig>,
    ) -> Self {
        Self {
            store,
            registry,
            cache,
            names,
            coordinator,
            fanout,
            filter: ModerationFilter::new(&config),
            window: RecentMessageWindow::new(
                config.window_capacity,
                config.short_message_threshold,
            ),
            counters: FilterSkipCounter::new(),
            config,
        }
    }

    /// Classify one message and apply its side effects. Returns the
    /// (possibly name-enriched) message on acceptance.
    pub async fn submit(&self, mut message: ChatMessage, credential: &str) -> Result<ChatMessage> {
        let tenant = self
            .registry
            .resolve(credential)
            .await
            .ok_or(AuthError::UnknownCredential)?;

        if message.sender.is_empty() {
            return Err(ValidationError::InvalidSender.into());
        }
        match &message.tenant {
            None => message.tenant = Some(tenant.name.clone()),
            Some(name) if *name != tenant.name => {
                return Err(ValidationError::TenantMismatch.into());
            }
            Some(_) => {}
        }

        // Exact-replay check. Duplicates are dropped before any record is
        // written; everything past this point writes exactly one record.
        if self
            .window
            .check_and_record(&message.sender, &message.body)
            .await
        {
            return Err(Rejection::new(
                RejectReason::DuplicateMessage,
                "You already sent this message",
            )
            .into());
        }

        if let Some(mute) = self.cache.get(&message.sender).await? {
            self.persist(&tenant, &message).await?;
            let expires_at = mute.expires_at.unwrap_or_else(Utc::now);
            return Err(Rejection::new(
                RejectReason::UserMuted {
                    expires_at,
                    reason: mute.reason.clone(),
                },
                mute_rejection_text(&mute, Utc::now()),
            )
            .into());
        }

        match self.filter.classify(&message.body) {
            Verdict::Allow => {}
            Verdict::Reject(rejection) => {
                self.persist(&tenant, &message).await?;
                return Err(rejection.into());
            }
            Verdict::RejectWithStrike(rejection) => {
                let strikes = self.counters.increment(&message.sender).await;
                if strikes > self.config.filter_strike_limit {
                    self.auto_mute(&message.sender, credential).await;
                    self.counters.reset(&message.sender).await;
                    // Historical behavior: the whole table resets, not
                    // just the offender.
                    self.counters.clear_all().await;
                }
                self.persist(&tenant, &message).await?;
                return Err(rejection.into());
            }
        }

        if message.display_name.as_deref().is_none_or(str::is_empty) {
            message.display_name = Some(
                names::resolve_with_retries(
                    self.names.as_ref(),
                    &message.sender,
                    NAME_LOOKUP_ATTEMPTS,
                )
                .await,
            );
        }
        self.persist(&tenant, &message).await?;

        let fanout = Arc::clone(&self.fanout);
        let outgoing = message.clone();
        tokio::spawn(async move {
            fanout.distribute(&outgoing).await;
        });
        info!(sender = %message.sender, tenant = %tenant.name, "Message admitted");
        Ok(message)
    }

    async fn persist(&self, tenant: &Tenant, message: &ChatMessage) -> Result<()> {
        self.store
            .insert_message(&MessageRecord {
                tenant_id: tenant.id,
                sender: message.sender.clone(),
                body: message.body.clone(),
                timestamp: message.timestamp,
            })
            .await?;
        Ok(())
    }

    async fn auto_mute(&self, user: &str, credential: &str) {
        let mute = Mute {
            id: 0,
            user: user.to_string(),
            issuer: AUTO_MUTE_ISSUER.to_string(),
            reason: "spam".to_string(),
            message: AUTO_MUTE_MESSAGE.to_string(),
            created_at: Utc::now(),
            expires_at: Some(
                Utc::now()
                    + Duration::from_std(self.config.auto_mute_duration).unwrap_or_default(),
            ),
            status: MuteStatus::Active,
            tenant_id: 0,
            unmute_issuer: None,
            unmute_tenant_id: None,
        };
        match self.coordinator.mute(mute, credential).await {
            Ok(_) => info!(user, "Auto-muted for repeated filter violations"),
            Err(e) => warn!(user, error = %e, "Auto-mute failed"),
        }
    }
}

/// Display text shown to a muted sender.
fn mute_rejection_text(mute: &Mute, now: DateTime<Utc>) -> String {
    let reason = if mute.reason.is_empty() {
        "you violated a rule"
    } else {
        mute.reason.as_str()
    };
    match mute.expires_at {
        Some(expires) => format!(
            "You are muted until {} ({}) because {reason}",
            expires.format("%Y-%m-%d %H:%M UTC"),
            format_remaining(expires - now),
        ),
        None => format!("You are muted because {reason}"),
    }
}

fn format_remaining(remaining: Duration) -> String {
    let minutes = remaining.num_minutes().max(0);
    if minutes >= 60 {
        format!("{}h {}m", minutes / 60, minutes % 60)
    } else {
        format!("{minutes}m")
    }
}
