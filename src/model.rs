//! Core data model: messages, mutes, and tenants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Messages ────────────────────────────────────────────────────────

/// An inbound chat message as submitted by a tenant on behalf of a user.
///
/// `display_name` is filled in lazily (best-effort) before distribution;
/// everything else is immutable after receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Opaque identifier of the sending end user.
    pub sender: String,
    /// Name of the submitting tenant. Filled from the resolved credential
    /// when absent; rejected when present but mismatched.
    #[serde(default)]
    pub tenant: Option<String>,
    /// Resolved human-readable sender name.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Raw message text.
    pub body: String,
    /// When the message was received.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// A persisted message row. Every `submit` call that passes the duplicate
/// check writes exactly one of these, accepted or rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Id of the submitting tenant.
    pub tenant_id: i64,
    pub sender: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

// ── Mutes ───────────────────────────────────────────────────────────

/// Lifecycle status of a mute row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MuteStatus {
    Active,
    Canceled,
}

/// A mute record. Multiple historical rows may exist per user; at most one
/// is *effective* (Active and not yet expired) for enforcement purposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mute {
    /// Store-assigned row id (0 until persisted).
    #[serde(default)]
    pub id: i64,
    /// The muted end user.
    pub user: String,
    /// Who or what created the mute (user id or service name).
    pub issuer: String,
    /// Short reason, e.g. "rule 1".
    #[serde(default)]
    pub reason: String,
    /// Free-text message shown to the user.
    #[serde(default)]
    pub message: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Explicit expiry. `None` on input means "compute via escalation".
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "MuteStatus::active")]
    pub status: MuteStatus,
    /// Tenant that submitted the mute.
    #[serde(default)]
    pub tenant_id: i64,
    /// Set only once the mute has been canceled.
    #[serde(default)]
    pub unmute_issuer: Option<String>,
    #[serde(default)]
    pub unmute_tenant_id: Option<i64>,
}

impl MuteStatus {
    fn active() -> Self {
        Self::Active
    }
}

impl Mute {
    /// Whether this mute is currently enforced.
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.status == MuteStatus::Active && self.expires_at.is_some_and(|e| e > now)
    }

    /// Combined reason + message text, lowercased, used by the escalation
    /// and rule-violation checks.
    pub fn combined_text(&self) -> String {
        format!("{}{}", self.reason, self.message).to_lowercase()
    }
}

/// Request to cancel a user's effective mute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnmuteRequest {
    pub user: String,
    /// Who is lifting the mute.
    pub issuer: String,
    #[serde(default)]
    pub reason: String,
}

// ── Tenants ─────────────────────────────────────────────────────────

/// A registered client application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    /// API key presented in the authorization header. Generated at
    /// registration, never updated.
    #[serde(default)]
    pub credential: String,
    #[serde(default)]
    pub quota: i64,
    /// Webhook target; empty means no delivery.
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Credential passed back to the tenant's webhook.
    #[serde(default)]
    pub webhook_auth: Option<String>,
}

impl Tenant {
    /// Partner-relay tenants get a reduced webhook payload and bespoke
    /// echo/slur suppression.
    pub fn is_partner_relay(&self, marker: &str) -> bool {
        self.name.contains(marker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn mute(status: MuteStatus, expires_at: Option<DateTime<Utc>>) -> Mute {
        Mute {
            id: 1,
            user: "u1".into(),
            issuer: "mod".into(),
            reason: "rule 1".into(),
            message: "spamming".into(),
            created_at: Utc::now(),
            expires_at,
            status,
            tenant_id: 1,
            unmute_issuer: None,
            unmute_tenant_id: None,
        }
    }

    #[test]
    fn effective_requires_active_and_future_expiry() {
        let now = Utc::now();
        assert!(mute(MuteStatus::Active, Some(now + Duration::hours(1))).is_effective(now));
        assert!(!mute(MuteStatus::Active, Some(now - Duration::hours(1))).is_effective(now));
        assert!(!mute(MuteStatus::Canceled, Some(now + Duration::hours(1))).is_effective(now));
        assert!(!mute(MuteStatus::Active, None).is_effective(now));
    }

    #[test]
    fn combined_text_lowercases_reason_and_message() {
        let m = mute(MuteStatus::Active, None);
        assert_eq!(m.combined_text(), "rule 1spamming");
    }

    #[test]
    fn partner_relay_detection_by_name_marker() {
        let t = Tenant {
            id: 1,
            name: "partner-mirror".into(),
            credential: "k".into(),
            quota: 0,
            webhook_url: None,
            webhook_auth: None,
        };
        assert!(t.is_partner_relay("partner"));
        assert!(!t.is_partner_relay("other"));
    }
}
