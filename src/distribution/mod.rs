//! Post-admission distribution: bus publish plus per-tenant webhook
//! delivery.

pub mod fanout;
pub mod webhook;

pub use fanout::{DeliveryOutcome, DistributionFanout};
pub use webhook::{HttpWebhookTransport, WebhookTransport};
