//! Error types for the monitor fan-out cache.
//!
//! All errors are strongly typed using thiserror. Errors are `Clone` because a
//! single upstream failure is recorded once and handed verbatim to every
//! downstream user that asks for it, now or later.

use thiserror::Error;

/// Errors produced by the monitor cache.
#[allow(missing_docs)]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MonitorError {
    /// The upstream subscription could not be established.
    #[error("Upstream monitor for '{channel}' failed to connect: {message}")]
    ConnectFailure {
        channel: String,
        message: String,
    },

    /// The upstream subscription connected but refused to start.
    #[error("Upstream monitor start failed: {message}")]
    StartFailure {
        message: String,
    },

    /// The downstream session that owns a user has already been torn down.
    #[error("Downstream requester is already gone")]
    RequesterGone,

    /// `start()` was called before the upstream connect completed.
    #[error("Upstream monitor is not connected yet")]
    NotConnected,

    /// A consumer released a buffer it does not currently hold.
    #[error("Monitor element (slot {slot}) is not in use by this subscription")]
    InvalidRelease {
        slot: usize,
    },

    /// Configuration failed validation.
    #[error("Invalid monitor configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },

    /// The other end of a channel is gone.
    #[error("Channel disconnected: {path}")]
    Disconnected {
        path: String,
    },

    /// A bounded wait expired.
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },
}

impl MonitorError {
    /// Creates a connect failure for the named channel.
    #[must_use]
    pub fn connect_failure(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectFailure {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// Creates a start failure.
    #[must_use]
    pub fn start_failure(message: impl Into<String>) -> Self {
        Self::StartFailure {
            message: message.into(),
        }
    }

    /// Returns true if the subscription can never deliver data after this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailure { .. } | Self::StartFailure { .. } | Self::RequesterGone
        )
    }

    /// Returns true if the error reports a caller mistake rather than a fault.
    #[must_use]
    pub const fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRelease { .. } | Self::NotConnected | Self::InvalidConfig { .. }
        )
    }

    /// Returns true if retrying the same call may succeed.
    ///
    /// Connect failures are terminal for the cache entry that recorded them;
    /// the owning layer decides whether to allocate a fresh entry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::NotConnected | Self::Timeout { .. })
    }
}

/// Result type alias for monitor cache operations.
pub type MonitorResult<T> = Result<T, MonitorError>;

/// Success or failure status handed between upstream, cache and downstream.
pub type Status = MonitorResult<()>;
