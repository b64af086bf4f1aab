//! Content policy — pure classification of a message body.
//!
//! The filter is substring and rule based. Checks run in a fixed order and
//! the first match wins; only the denylist check carries a strike, which
//! the pipeline turns into an auto-mute after repeated violations.

use std::sync::Arc;

use crate::config::RelayConfig;
use crate::error::{RejectReason, Rejection};

/// Phrases that count as moderation-evading insults and earn a strike.
const DENYLIST: &[&str] = &["kys", "fag", "retard", "stfu"];

/// Self-advertisement phrase for off-platform auction houses. Matched as
/// a plain substring so surrounding punctuation cannot hide it.
const AD_PHRASE: &str = "my ah";

const LINK_SUFFIXES: &[&str] = &[".com", ".net", ".gg", ".de", ".io"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Reject(Rejection),
    /// Rejected and the sender earns a violation strike.
    RejectWithStrike(Rejection),
}

pub struct ModerationFilter {
    self_domain: String,
    auth_link: String,
    banned_tools: Vec<String>,
    denylist: Vec<String>,
}

impl ModerationFilter {
    pub fn new(config: &Arc<RelayConfig>) -> Self {
        Self {
            self_domain: config.self_domain.to_lowercase(),
            auth_link: config.auth_link.to_lowercase(),
            banned_tools: config.banned_tools.iter().map(|t| t.to_lowercase()).collect(),
            denylist: DENYLIST.iter().map(|w| (*w).to_string()).collect(),
        }
    }

    pub fn classify(&self, body: &str) -> Verdict {
        let lowered = body.to_lowercase();
        // Separator stripping defeats f.o.o / f-o-o style evasion; the
        // space padding gives the word checks boundaries at both ends.
        let normalized = format!(" {} ", lowered.replace(['_', '-', '.'], ""));

        if normalized.contains(AD_PHRASE) {
            return Verdict::Reject(Rejection::new(
                RejectReason::Advertisement,
                "Advertising is not allowed here",
            ));
        }

        for word in &self.denylist {
            if normalized.contains(&format!(" {word} ")) {
                return Verdict::RejectWithStrike(Rejection::new(
                    RejectReason::BadWords,
                    "This message violates the chat rules",
                ));
            }
        }

        // Link checks run on the raw lowercased text, dots intact.
        for suffix in LINK_SUFFIXES {
            if lowered.contains(suffix) {
                if *suffix == ".com" && lowered.contains(&self.self_domain) {
                    continue;
                }
                return Verdict::Reject(Rejection::new(
                    RejectReason::Link,
                    "Links are not allowed in chat",
                ));
            }
        }

        if lowered.contains(&self.auth_link) {
            return Verdict::Reject(Rejection::new(
                RejectReason::AuthLeak,
                "Never share your authentication link",
            ));
        }

        for tool in &self.banned_tools {
            if normalized.contains(tool.as_str()) {
                return Verdict::Reject(Rejection::new(
                    RejectReason::BannedTool,
                    "This tool may not be discussed here",
                ));
            }
        }

        Verdict::Allow
    }
}
