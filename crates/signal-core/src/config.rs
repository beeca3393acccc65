//! Orchestration timing configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SignalError};

/// Timer settings for the orchestration layer.
///
/// Values are kept in milliseconds so they can be loaded from config files
/// as plain integers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// How long an unanswered invite rings, and the keepalive staleness window
    pub call_timeout_ms: u64,
    /// Grace period after the authoritative connection drops mid-call
    pub disconnect_grace_ms: u64,
    /// Grace period before an identity with no connections is evicted
    pub dispose_grace_ms: u64,
    /// Wait for the push-notification ack, capped by the call timeout
    pub notification_confirm_ms: u64,
    /// Keepalive watchdog on the authoritative connection; disabled when unset
    pub keepalive_watchdog_ms: Option<u64>,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 30_000,
            disconnect_grace_ms: 0,
            dispose_grace_ms: 120_000,
            notification_confirm_ms: 30_000,
            keepalive_watchdog_ms: None,
        }
    }
}

impl SignalConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }

    pub fn dispose_grace(&self) -> Duration {
        Duration::from_millis(self.dispose_grace_ms)
    }

    /// Confirmation wait, never longer than the call timeout
    pub fn notification_confirm(&self) -> Duration {
        Duration::from_millis(self.notification_confirm_ms.min(self.call_timeout_ms))
    }

    pub fn keepalive_watchdog(&self) -> Option<Duration> {
        self.keepalive_watchdog_ms.map(Duration::from_millis)
    }

    /// Reject settings that would make calls unusable
    pub fn validate(&self) -> Result<()> {
        if self.call_timeout_ms == 0 {
            return Err(SignalError::config("call_timeout_ms must be greater than zero"));
        }
        if matches!(self.keepalive_watchdog_ms, Some(0)) {
            return Err(SignalError::config(
                "keepalive_watchdog_ms must be greater than zero when set",
            ));
        }
        Ok(())
    }
}
