//! Relay configuration.

use std::time::Duration;

/// Configuration for the relay service.
///
/// Policy constants default to production values; deployments override
/// through the environment (see [`RelayConfig::from_env`]).
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// HTTP listen port for the public surface.
    pub listen_port: u16,
    /// Path of the local libsql database file.
    pub db_path: String,
    /// Base URL of the external name-resolution service.
    pub name_service_url: String,
    /// Pub/sub topic messages are published under.
    pub chat_topic: String,
    /// Topic for staff-facing mute/unmute notifications.
    pub notify_topic: String,
    /// Tenant-name marker identifying partner-relay tenants.
    pub partner_marker: String,
    /// Own domain; `.com` links mentioning it are not treated as external.
    pub self_domain: String,
    /// URL literal whose presence means the user leaked their own auth link.
    pub auth_link: String,
    /// Keywords for banned third-party tools.
    pub banned_tools: Vec<String>,
    /// Issuer identity exempt from the mute rate limit.
    pub privileged_issuer: String,
    /// Tenant-registry refresh interval.
    pub refresh_interval: Duration,
    /// Per-target webhook delivery timeout.
    pub webhook_timeout: Duration,
    /// Capacity of the recent-message window.
    pub window_capacity: usize,
    /// Bodies longer than this are duplicate-checked against the whole
    /// window, not just the most recent entry.
    pub short_message_threshold: usize,
    /// Content-policy strikes after which a user is auto-muted.
    pub filter_strike_limit: u32,
    /// Duration of the automatic filter-evasion mute.
    pub auto_mute_duration: Duration,
    /// Max non-canceled mutes an issuer may create per rate-limit window.
    pub max_recent_mutes: usize,
    /// Trailing window for the mute rate limit.
    pub mute_rate_window: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_port: 8080,
            db_path: "./data/chat-relay.db".to_string(),
            name_service_url: "http://localhost:8085".to_string(),
            chat_topic: "chat".to_string(),
            notify_topic: "staff-notifications".to_string(),
            partner_marker: "partner".to_string(),
            self_domain: "chatrelay".to_string(),
            auth_link: "https://chatrelay.example/authmod".to_string(),
            banned_tools: vec!["binmaster".to_string()],
            privileged_issuer: "384a029294fc445e863f2c42fe9709cb".to_string(),
            refresh_interval: Duration::from_secs(600),
            webhook_timeout: Duration::from_secs(5),
            window_capacity: 10,
            short_message_threshold: 6,
            filter_strike_limit: 3,
            auto_mute_duration: Duration::from_secs(15 * 60),
            max_recent_mutes: 5,
            mute_rate_window: Duration::from_secs(6 * 3600),
        }
    }
}

impl RelayConfig {
    /// Build a config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            listen_port: env_parse("CHAT_RELAY_PORT", defaults.listen_port),
            db_path: env_or("CHAT_RELAY_DB_PATH", defaults.db_path),
            name_service_url: env_or("CHAT_RELAY_NAME_SERVICE_URL", defaults.name_service_url),
            chat_topic: env_or("CHAT_RELAY_TOPIC", defaults.chat_topic),
            notify_topic: env_or("CHAT_RELAY_NOTIFY_TOPIC", defaults.notify_topic),
            partner_marker: env_or("CHAT_RELAY_PARTNER_MARKER", defaults.partner_marker),
            self_domain: env_or("CHAT_RELAY_SELF_DOMAIN", defaults.self_domain),
            auth_link: env_or("CHAT_RELAY_AUTH_LINK", defaults.auth_link),
            banned_tools: std::env::var("CHAT_RELAY_BANNED_TOOLS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_lowercase())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.banned_tools),
            privileged_issuer: env_or("CHAT_RELAY_PRIVILEGED_ISSUER", defaults.privileged_issuer),
            refresh_interval: Duration::from_secs(env_parse(
                "CHAT_RELAY_REFRESH_SECS",
                defaults.refresh_interval.as_secs(),
            )),
            webhook_timeout: Duration::from_secs(env_parse(
                "CHAT_RELAY_WEBHOOK_TIMEOUT_SECS",
                defaults.webhook_timeout.as_secs(),
            )),
            window_capacity: defaults.window_capacity,
            short_message_threshold: defaults.short_message_threshold,
            filter_strike_limit: defaults.filter_strike_limit,
            auto_mute_duration: defaults.auto_mute_duration,
            max_recent_mutes: defaults.max_recent_mutes,
            mute_rate_window: defaults.mute_rate_window,
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
