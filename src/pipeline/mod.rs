//! Message admission — the decision path every inbound message walks
//! before it is distributed.

pub mod admission;
pub mod filter;
pub mod window;

pub use admission::AdmissionPipeline;
pub use filter::{ModerationFilter, Verdict};
pub use window::{FilterSkipCounter, RecentMessageWindow};
