//! Monitor cache configuration.

use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, MonitorResult};

/// Number of buffer slots allocated per downstream user when not configured.
pub const DEFAULT_QUEUE_SIZE: usize = 4;

/// Default capacity of a session notification channel.
pub const DEFAULT_SESSION_CAPACITY: usize = 1024;

/// Tunables for a channel's monitor fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Buffer slots per downstream user, fixed at the user's first start.
    pub queue_size: usize,
    /// Max queued notifications per session adapter before they are dropped.
    pub session_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            queue_size: DEFAULT_QUEUE_SIZE,
            session_capacity: DEFAULT_SESSION_CAPACITY,
        }
    }
}

impl MonitorConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(input: &str) -> MonitorResult<Self> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| MonitorError::InvalidConfig {
            reason: format!("invalid monitor config: {e}"),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings that would leave a user without any buffer.
    pub fn validate(&self) -> MonitorResult<()> {
        if self.queue_size == 0 {
            return Err(MonitorError::InvalidConfig {
                reason: "queue_size must be at least 1".to_string(),
            });
        }
        if self.session_capacity == 0 {
            return Err(MonitorError::InvalidConfig {
                reason: "session_capacity must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn effective_queue_size(&self) -> usize {
        self.queue_size.max(1)
    }
}
