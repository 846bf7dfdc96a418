use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::Identity;

/// Application-level constants
pub const APP_NAME: &str = "preauth-sync";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Case service REST root.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";

/// Case service push root; topics live under `/ws/{topic}`.
pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8000";

/// Fixed delay between a dropped subscription and the next connect attempt.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3_000;

/// Cap for exponential backoff.
pub const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 30_000;

/// Role assumed when `PREAUTH_USER_ROLE` is not set.
pub const DEFAULT_USER_ROLE: &str = "insurer";

/// Per-request timeout for the REST collaborators.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "preauth_sync=info,warn"
}

// ═══════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?} ({reason})")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
}

// ═══════════════════════════════════════════════════════════
// Reconnection policy
// ═══════════════════════════════════════════════════════════

/// How the retry delay evolves across consecutive failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay every time.
    Fixed,
    /// `initial * 2^(attempt-1)`, capped at `max_delay_ms`.
    Exponential,
}

/// Delay schedule for re-opening a dropped subscription.
///
/// The attempt counter resets once a connection opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff: Backoff,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            max_delay_ms: DEFAULT_RECONNECT_MAX_DELAY_MS,
            backoff: Backoff::Fixed,
        }
    }
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        Self {
            initial_delay_ms: ms,
            max_delay_ms: ms,
            backoff: Backoff::Fixed,
        }
    }

    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            initial_delay_ms: u64::try_from(initial.as_millis()).unwrap_or(u64::MAX),
            max_delay_ms: u64::try_from(max.as_millis()).unwrap_or(u64::MAX),
            backoff: Backoff::Exponential,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ms = match self.backoff {
            Backoff::Fixed => self.initial_delay_ms,
            Backoff::Exponential => {
                let exponent = attempt.saturating_sub(1).min(16);
                self.initial_delay_ms
                    .saturating_mul(1_u64 << exponent)
                    .min(self.max_delay_ms.max(self.initial_delay_ms))
            }
        };
        Duration::from_millis(ms)
    }
}

// ═══════════════════════════════════════════════════════════
// SyncConfig
// ═══════════════════════════════════════════════════════════

/// Endpoints and tunables for the sync client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub api_url: String,
    pub ws_url: String,
    pub http_timeout_secs: u64,
    pub reconnect: ReconnectPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `PREAUTH_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`SyncConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(url) = get("PREAUTH_API_URL") {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidValue {
                    var: "PREAUTH_API_URL",
                    value: url,
                    reason: "expected an http(s) URL".into(),
                });
            }
            config.api_url = url;
        }

        if let Some(url) = get("PREAUTH_WS_URL") {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(ConfigError::InvalidValue {
                    var: "PREAUTH_WS_URL",
                    value: url,
                    reason: "expected a ws(s) URL".into(),
                });
            }
            config.ws_url = url;
        }

        if let Some(raw) = get("PREAUTH_HTTP_TIMEOUT_SECS") {
            config.http_timeout_secs = parse_positive("PREAUTH_HTTP_TIMEOUT_SECS", raw)?;
        }

        if let Some(raw) = get("PREAUTH_RECONNECT_DELAY_MS") {
            config.reconnect.initial_delay_ms = parse_positive("PREAUTH_RECONNECT_DELAY_MS", raw)?;
        }

        if let Some(raw) = get("PREAUTH_RECONNECT_MAX_DELAY_MS") {
            config.reconnect.max_delay_ms = parse_positive("PREAUTH_RECONNECT_MAX_DELAY_MS", raw)?;
        }

        if let Some(raw) = get("PREAUTH_RECONNECT_BACKOFF") {
            config.reconnect.backoff = match raw.to_ascii_lowercase().as_str() {
                "fixed" => Backoff::Fixed,
                "exponential" => Backoff::Exponential,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        var: "PREAUTH_RECONNECT_BACKOFF",
                        value: raw,
                        reason: "expected `fixed` or `exponential`".into(),
                    })
                }
            };
        }

        Ok(config)
    }
}

/// Signed-in identity from `PREAUTH_USER_ID` and `PREAUTH_USER_ROLE`.
pub fn identity_from_env() -> Result<Identity, ConfigError> {
    identity_from_lookup(|var| std::env::var(var).ok())
}

/// Same as [`identity_from_env`] with an injectable variable source.
/// The role defaults to the reviewing side.
pub fn identity_from_lookup<F>(lookup: F) -> Result<Identity, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    let user_id = get("PREAUTH_USER_ID").ok_or(ConfigError::Missing("PREAUTH_USER_ID"))?;
    let role = get("PREAUTH_USER_ROLE").unwrap_or_else(|| DEFAULT_USER_ROLE.to_string());
    Ok(Identity::new(user_id, role))
}

fn parse_positive(var: &'static str, raw: String) -> Result<u64, ConfigError> {
    match raw.parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidValue {
            var,
            value: raw,
            reason: "must be greater than zero".into(),
        }),
        Ok(value) => Ok(value),
        Err(e) => Err(ConfigError::InvalidValue {
            var,
            value: raw,
            reason: e.to_string(),
        }),
    }
}
