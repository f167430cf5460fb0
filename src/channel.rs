//! Channel cache entry: the per-channel handle the gateway keeps for a
//! connected upstream channel.
//!
//! It owns nothing but the upstream channel interface and a weak slot for the
//! channel's current [`MonitorCacheEntry`]. Users keep the monitor entry
//! alive; once the last user is gone the entry (and its upstream
//! subscription) is destroyed and the next subscriber gets a fresh one.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::debug;

use crate::config::MonitorConfig;
use crate::monitor::{MonitorCacheEntry, MonitorRequester, MonitorUser, UpstreamChannel};

/// Per-channel cache handle.
pub struct ChannelCacheEntry {
    upstream: Arc<dyn UpstreamChannel>,
    config: MonitorConfig,
    weak_self: Weak<ChannelCacheEntry>,
    monitor: Mutex<Weak<MonitorCacheEntry>>,
}

impl ChannelCacheEntry {
    /// Wrap a connected upstream channel.
    #[must_use]
    pub fn new(upstream: Arc<dyn UpstreamChannel>, config: MonitorConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            upstream,
            config,
            weak_self: weak_self.clone(),
            monitor: Mutex::new(Weak::new()),
        })
    }

    fn lock_monitor(&self) -> MutexGuard<'_, Weak<MonitorCacheEntry>> {
        self.monitor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Upstream channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.upstream.name()
    }

    /// Configuration handed to every monitor entry of this channel.
    #[must_use]
    pub const fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub(crate) const fn upstream(&self) -> &Arc<dyn UpstreamChannel> {
        &self.upstream
    }

    /// The channel's monitor entry, creating a fresh one if none is alive or
    /// the current one has ended.
    #[must_use]
    pub fn monitor_entry(&self) -> Arc<MonitorCacheEntry> {
        let mut slot = self.lock_monitor();
        let current = slot.upgrade();
        if let Some(entry) = current.as_ref().filter(|e| !e.is_ended()) {
            return Arc::clone(entry);
        }

        let entry = MonitorCacheEntry::new(self.weak_self.clone(), self.name().to_string(), self.config.clone());
        *slot = Arc::downgrade(&entry);
        drop(slot);

        debug!(channel = %self.name(), replaced = current.is_some(), "allocated monitor cache entry");
        entry
    }

    /// The live monitor entry, if any, without creating one.
    #[must_use]
    pub fn live_entry(&self) -> Option<Arc<MonitorCacheEntry>> {
        self.lock_monitor().upgrade()
    }

    /// Subscribe a downstream requester to this channel.
    pub fn subscribe(&self, requester: Weak<dyn MonitorRequester>) -> Arc<MonitorUser> {
        self.monitor_entry().subscribe(requester)
    }

    /// The channel connection was torn down.
    ///
    /// Destroys the current upstream subscription and propagates `unlisten`
    /// to every interested user. Later subscribers get a fresh entry.
    pub fn teardown(&self) {
        let entry = std::mem::take(&mut *self.lock_monitor()).upgrade();
        if let Some(entry) = entry {
            debug!(channel = %self.name(), "channel torn down");
            entry.close();
        }
    }
}

impl fmt::Debug for ChannelCacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelCacheEntry")
            .field("name", &self.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
