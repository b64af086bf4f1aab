//! Mute lifecycle: escalation policy, cache, and multi-backend coordination.

pub mod cache;
pub mod coordinator;
pub mod escalation;

pub use cache::MuteCache;
pub use coordinator::{
    BackendOutcome, MuteBackend, MuteCoordinator, NotificationRelayBackend, PartnerRelayBackend,
    StoreMuteBackend,
};
