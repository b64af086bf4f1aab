//! Error types for chat-relay.

use chrono::{DateTime, Utc};

/// Top-level error type for the relay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Rejected(#[from] Rejection),

    #[error("Rate limited: {0}")]
    RateLimited(#[from] RateLimitError),

    #[error("Conflict: {0}")]
    Conflict(#[from] ConflictError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Name resolution error: {0}")]
    Name(#[from] NameError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),
}

impl Error {
    /// Stable machine-readable code, suitable for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized(e) => e.code(),
            Self::Validation(e) => e.code(),
            Self::Rejected(r) => r.reason.code(),
            Self::RateLimited(_) => "too_many_mutes",
            Self::Conflict(e) => e.code(),
            Self::Store(_) => "store_error",
            Self::Bus(_) => "bus_error",
            Self::Name(_) => "name_error",
            Self::Delivery(_) => "delivery_error",
        }
    }
}

/// Credential errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("The required authorization header wasn't passed. Set it to your tenant API key.")]
    MissingAuthorization,

    #[error("Invalid credential/unknown tenant")]
    UnknownCredential,
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingAuthorization => "missing_authorization",
            Self::UnknownCredential => "invalid_token",
        }
    }
}

/// Malformed-input errors.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("The sender of the message has to be set")]
    InvalidSender,

    #[error("Tenant name does not match the provided credential")]
    TenantMismatch,

    #[error("The mute target user has to be set")]
    InvalidMute,

    #[error("The user has no previous messages")]
    NoPriorActivity,
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidSender => "invalid_sender",
            Self::TenantMismatch => "token_mismatch",
            Self::InvalidMute => "invalid_mute",
            Self::NoPriorActivity => "invalid_mute",
        }
    }
}

/// Policy rejection reasons for message admission.
///
/// Every variant maps to a stable short code plus a human message usable
/// for direct display to the end user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    DuplicateMessage,
    UserMuted {
        expires_at: DateTime<Utc>,
        reason: String,
    },
    Advertisement,
    BadWords,
    Link,
    AuthLeak,
    BannedTool,
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateMessage => "message_spam",
            Self::UserMuted { .. } => "user_muted",
            Self::Advertisement => "advertisement",
            Self::BadWords => "bad_words",
            Self::Link => "link_found",
            Self::AuthLeak => "auth_found",
            Self::BannedTool => "illegal_tool",
        }
    }
}

/// A policy rejection: machine-readable reason plus display message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct Rejection {
    pub reason: RejectReason,
    pub message: String,
}

impl Rejection {
    pub fn new(reason: RejectReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

/// Mute-issuance rate limiting.
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("You have muted too many people recently")]
    TooManyMutes,
}

/// State conflicts.
#[derive(Debug, thiserror::Error)]
pub enum ConflictError {
    #[error("A tenant with the name {0} already exists")]
    TenantExists(String),

    #[error("There was no active mute for the user {0}")]
    NoActiveMute(String),
}

impl ConflictError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::TenantExists(_) => "tenant_exists",
            Self::NoActiveMute(_) => "no_mute_found",
        }
    }
}

/// Durable-store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Event-bus errors.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Publish to topic {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Name-resolution errors.
#[derive(Debug, thiserror::Error)]
pub enum NameError {
    #[error("Name service request failed: {0}")]
    RequestFailed(String),

    #[error("Name service returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Webhook delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Webhook request to {url} failed: {reason}")]
    RequestFailed { url: String, reason: String },

    #[error("Webhook at {url} answered {status}")]
    BadStatus { url: String, status: u16 },

    #[error("Webhook at {url} timed out")]
    Timeout { url: String },
}

impl DeliveryError {
    /// Gateway-unavailable class of failure — the target should be
    /// deregistered until the next tenant refresh.
    pub fn is_gateway_unavailable(&self) -> bool {
        matches!(self, Self::BadStatus { status, .. } if matches!(status, 502 | 503 | 504))
    }
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;
