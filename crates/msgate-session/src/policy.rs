//! Reconnection policy.

use std::time::Duration;

use msgate_core::{CloseClass, CloseReason, ReconnectSettings};

/// What to do after a connection closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Credentials are no longer valid: purge them and stay down
    Purge,
    /// Reconnect after the delay
    RetryAfter(Duration),
}

/// Maps close reasons to reconnection decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    short_delay: Duration,
    long_delay: Duration,
}

impl ReconnectPolicy {
    /// Create a policy with explicit delays.
    pub fn new(short_delay: Duration, long_delay: Duration) -> Self {
        Self {
            short_delay,
            long_delay,
        }
    }

    /// Delay after an ordinary transient close.
    pub fn short_delay(&self) -> Duration {
        self.short_delay
    }

    /// Delay after a conflict or restart-required close.
    pub fn long_delay(&self) -> Duration {
        self.long_delay
    }

    /// Decide how to react to `reason`.
    pub fn decide(&self, reason: &CloseReason) -> ReconnectDecision {
        match reason.classify() {
            CloseClass::Terminal => ReconnectDecision::Purge,
            CloseClass::Backoff => ReconnectDecision::RetryAfter(self.long_delay),
            CloseClass::Transient => ReconnectDecision::RetryAfter(self.short_delay),
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectSettings::default())
    }
}

impl From<&ReconnectSettings> for ReconnectPolicy {
    fn from(settings: &ReconnectSettings) -> Self {
        Self::new(settings.short_delay(), settings.long_delay())
    }
}
