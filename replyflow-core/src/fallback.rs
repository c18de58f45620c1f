//! Last-resort replies. This stage cannot fail: every reason maps to a
//! non-empty message, and blank configured messages fall back to the
//! built-in copy.

use serde::Serialize;

use crate::config::FallbackConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    Timeout,
    Connection,
    Unauthorized,
    RateLimited,
    Unavailable,
    InvalidInput,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackReason::Timeout => "timeout",
            FallbackReason::Connection => "connection",
            FallbackReason::Unauthorized => "unauthorized",
            FallbackReason::RateLimited => "rate_limited",
            FallbackReason::Unavailable => "unavailable",
            FallbackReason::InvalidInput => "invalid_input",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FallbackMessages {
    messages: FallbackConfig,
}

impl FallbackMessages {
    pub fn from_config(config: &FallbackConfig) -> Self {
        let defaults = FallbackConfig::default();
        let pick = |configured: &str, default: String| {
            let trimmed = configured.trim();
            if trimmed.is_empty() {
                default
            } else {
                trimmed.to_string()
            }
        };

        Self {
            messages: FallbackConfig {
                timeout: pick(&config.timeout, defaults.timeout),
                connection: pick(&config.connection, defaults.connection),
                unauthorized: pick(&config.unauthorized, defaults.unauthorized),
                rate_limited: pick(&config.rate_limited, defaults.rate_limited),
                unavailable: pick(&config.unavailable, defaults.unavailable),
                invalid_input: pick(&config.invalid_input, defaults.invalid_input),
            },
        }
    }

    pub fn message(&self, reason: FallbackReason) -> &str {
        match reason {
            FallbackReason::Timeout => &self.messages.timeout,
            FallbackReason::Connection => &self.messages.connection,
            FallbackReason::Unauthorized => &self.messages.unauthorized,
            FallbackReason::RateLimited => &self.messages.rate_limited,
            FallbackReason::Unavailable => &self.messages.unavailable,
            FallbackReason::InvalidInput => &self.messages.invalid_input,
        }
    }
}

impl Default for FallbackMessages {
    fn default() -> Self {
        Self::from_config(&FallbackConfig::default())
    }
}
