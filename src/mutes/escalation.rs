//! Escalating mute-duration policy.
//!
//! Pure function over a user's mute history. Repeat rule violations
//! compound multiplicatively: every prior "rule 1" mute multiplies the
//! duration by 10, every "rule 2" mute by 3.

use chrono::{DateTime, Duration, Utc};

use crate::model::Mute;

/// Only mutes whose expiry falls inside this lookback count toward
/// escalation.
const LOOKBACK_DAYS: i64 = 400;

/// Compute the duration in hours of a new rule-violation mute.
///
/// Mutes whose combined reason+message text starts with the partner-relay
/// marker are excluded from the walk; so are mutes that expired more than
/// 400 days ago. The caller must have verified the user has prior message
/// activity (`first_message_at`); the timestamp itself does not currently
/// feed the formula.
pub fn next_duration_hours(
    history: &[Mute],
    _first_message_at: DateTime<Utc>,
    partner_marker: &str,
) -> i64 {
    let cutoff = Utc::now() - Duration::days(LOOKBACK_DAYS);
    let mut multiplier: i64 = 1;
    for mute in history
        .iter()
        .filter(|m| m.expires_at.is_some_and(|e| e > cutoff))
    {
        let text = mute.combined_text();
        if text.starts_with(partner_marker) {
            continue;
        }
        if text.contains("rule 1") {
            multiplier *= 10;
        } else if text.contains("rule 2") {
            multiplier *= 3;
        }
    }
    multiplier.max(1)
}
