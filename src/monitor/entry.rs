//! Monitor cache entry: the single upstream subscription of one channel and
//! its fan-out to interested downstream users.
//!
//! Locking: all mutable entry state sits behind one mutex. The mutex is never
//! held while a requester callback or an upstream call runs; handlers copy
//! out what they need, release the lock, then notify.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use crate::channel::ChannelCacheEntry;
use crate::config::MonitorConfig;
use crate::error::{MonitorError, Status};
use crate::value::{StructValue, ValueType};

use super::traits::{MessageSeverity, MonitorRequester, UpstreamMonitor, UpstreamRequester};
use super::user::MonitorUser;

/// Diagnostic counters for one cache entry.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryStats {
    pub channel: String,
    pub wakeups: u64,
    pub events: u64,
    pub interested: usize,
    pub connected: bool,
    pub ended: bool,
    pub last_event_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct EntryState {
    upstream: Option<Arc<dyn UpstreamMonitor>>,
    upstream_requested: bool,
    value_type: Option<Arc<ValueType>>,
    last_value: Option<Arc<StructValue>>,
    start_status: Option<Status>,
    interested: Vec<Weak<MonitorUser>>,
    ended: bool,
    last_event_at: Option<DateTime<Utc>>,
}

impl EntryState {
    /// Strong handles to every live interested user; dead ones are pruned.
    fn snapshot_interested(&mut self) -> Vec<Arc<MonitorUser>> {
        let mut live = Vec::with_capacity(self.interested.len());
        self.interested.retain(|weak| match weak.upgrade() {
            Some(user) => {
                live.push(user);
                true
            }
            None => false,
        });
        live
    }
}

/// What a starting user needs to know about its entry.
pub(crate) struct StartSnapshot {
    pub status: Option<Status>,
    pub value_type: Option<Arc<ValueType>>,
    pub last_value: Option<Arc<StructValue>>,
}

/// One upstream subscription shared by every downstream user of a channel.
///
/// Created through [`ChannelCacheEntry::monitor_entry`]. The upstream
/// subscription is requested lazily on the first [`subscribe`](Self::subscribe)
/// and exists at most once for the lifetime of the entry; after it ends a
/// fresh entry must be allocated.
pub struct MonitorCacheEntry {
    channel: Weak<ChannelCacheEntry>,
    channel_name: String,
    config: MonitorConfig,
    weak_self: Weak<MonitorCacheEntry>,
    state: Mutex<EntryState>,
    wakeups: AtomicU64,
    events: AtomicU64,
}

impl MonitorCacheEntry {
    pub(crate) fn new(channel: Weak<ChannelCacheEntry>, channel_name: String, config: MonitorConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            channel,
            channel_name,
            config,
            weak_self: weak_self.clone(),
            state: Mutex::new(EntryState::default()),
            wakeups: AtomicU64::new(0),
            events: AtomicU64::new(0),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Name of the channel this entry monitors.
    #[must_use]
    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    /// Configuration inherited from the channel.
    #[must_use]
    pub const fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Structure type of the monitored value, once connected.
    #[must_use]
    pub fn value_type(&self) -> Option<Arc<ValueType>> {
        self.lock_state().value_type.clone()
    }

    /// Result of the upstream start, once known.
    #[must_use]
    pub fn start_status(&self) -> Option<Status> {
        self.lock_state().start_status.clone()
    }

    /// Most recent value delivered by upstream.
    #[must_use]
    pub fn last_value(&self) -> Option<Arc<StructValue>> {
        self.lock_state().last_value.clone()
    }

    /// True once upstream signalled end-of-data or the channel was torn down.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.lock_state().ended
    }

    /// True while an upstream subscription handle is held.
    #[must_use]
    pub fn has_upstream(&self) -> bool {
        self.lock_state().upstream.is_some()
    }

    /// Snapshot of the entry's counters and state.
    #[must_use]
    pub fn stats(&self) -> EntryStats {
        let state = self.lock_state();
        EntryStats {
            channel: self.channel_name.clone(),
            wakeups: self.wakeups.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            interested: state.interested.iter().filter(|w| w.strong_count() > 0).count(),
            connected: matches!(state.start_status, Some(Ok(()))),
            ended: state.ended,
            last_event_at: state.last_event_at,
        }
    }

    pub(crate) fn start_snapshot(&self) -> StartSnapshot {
        let state = self.lock_state();
        StartSnapshot {
            status: state.start_status.clone(),
            value_type: state.value_type.clone(),
            last_value: state.last_value.clone(),
        }
    }

    /// Register a new downstream user for this channel.
    ///
    /// The entry keeps only a weak reference to the user; dropping the
    /// returned handle is enough to unregister. If the upstream connect has
    /// already completed, `requester` is told immediately with the recorded
    /// status; if the entry already ended, it receives `unlisten`.
    pub fn subscribe(self: &Arc<Self>, requester: Weak<dyn MonitorRequester>) -> Arc<MonitorUser> {
        let user = MonitorUser::new(Arc::clone(self), requester, self.config.effective_queue_size());

        let (connected, ended, request_upstream) = {
            let mut state = self.lock_state();
            if state.ended {
                (None, true, false)
            } else {
                state.interested.push(Arc::downgrade(&user));
                let request = !state.upstream_requested;
                state.upstream_requested = true;
                let connected = state
                    .start_status
                    .clone()
                    .map(|status| (status, state.value_type.clone()));
                (connected, false, request)
            }
        };

        debug!(channel = %self.channel_name, user = %user.id(), "monitor user subscribed");

        if ended {
            if let Some(req) = self.requester_of(&user, "unlisten") {
                req.unlisten(&user);
            }
        } else if let Some((status, value_type)) = connected {
            if let Some(req) = self.requester_of(&user, "monitor_connect") {
                req.monitor_connect(&status, &user, value_type.as_ref());
            }
        }

        if request_upstream {
            self.request_upstream();
        }

        user
    }

    /// The channel connection is gone: destroy the upstream subscription and
    /// tell every interested user that no more data will arrive.
    pub fn close(&self) {
        self.finish("close");
    }

    fn request_upstream(&self) {
        let Some(channel) = self.channel.upgrade() else {
            self.fail_connect(MonitorError::Disconnected {
                path: format!("channel '{}'", self.channel_name),
            });
            return;
        };

        debug!(channel = %self.channel_name, "creating upstream monitor");
        let requester: Weak<dyn UpstreamRequester> = self.weak_self.clone();
        if let Err(err) = channel.upstream().create_monitor(requester) {
            self.fail_connect(err);
        }
    }

    /// Record a connect failure that happened before any upstream handle existed.
    fn fail_connect(&self, err: MonitorError) {
        let _hold = self.weak_self.upgrade();

        let status: Status = Err(err);
        let tonotify = {
            let mut state = self.lock_state();
            if state.start_status.is_some() {
                return;
            }
            state.start_status = Some(status.clone());
            state.snapshot_interested()
        };

        warn!(channel = %self.channel_name, status = ?status, "upstream monitor failed to connect");

        for user in &tonotify {
            if let Some(req) = self.requester_of(user, "monitor_connect") {
                req.monitor_connect(&status, user, None);
            }
        }
    }

    fn finish(&self, context: &'static str) {
        let _hold = self.weak_self.upgrade();

        let (upstream, tonotify) = {
            let mut state = self.lock_state();
            let upstream = state.upstream.take();
            if state.ended {
                (upstream, Vec::new())
            } else {
                state.ended = true;
                (upstream, state.snapshot_interested())
            }
        };

        if let Some(monitor) = upstream {
            monitor.destroy();
            debug!(channel = %self.channel_name, context, "destroyed upstream monitor");
        }

        for user in &tonotify {
            if let Some(req) = self.requester_of(user, "unlisten") {
                req.unlisten(user);
            }
        }
    }

    fn requester_of(&self, user: &MonitorUser, callback: &'static str) -> Option<Arc<dyn MonitorRequester>> {
        let req = user.requester();
        if req.is_none() {
            debug!(channel = %self.channel_name, user = %user.id(), callback, "dead requester, notification skipped");
        }
        req
    }
}

impl UpstreamRequester for MonitorCacheEntry {
    fn connect(&self, status: Status, monitor: Arc<dyn UpstreamMonitor>, value_type: Arc<ValueType>) {
        let _hold = self.weak_self.upgrade();

        {
            let mut state = self.lock_state();
            if state.ended {
                drop(state);
                debug!(channel = %self.channel_name, "upstream connected after close, destroying it");
                monitor.destroy();
                return;
            }
            if state.upstream.is_some() || state.start_status.is_some() {
                drop(state);
                warn!(channel = %self.channel_name, "duplicate upstream connect ignored");
                return;
            }
            state.value_type = Some(Arc::clone(&value_type));
            state.upstream = Some(Arc::clone(&monitor));
        }

        let start_status = match status {
            Ok(()) => monitor.start(),
            Err(err) => Err(err),
        };
        if let Err(err) = &start_status {
            warn!(channel = %self.channel_name, error = %err, "upstream monitor start() fails");
        }

        let tonotify = {
            let mut state = self.lock_state();
            if state.ended {
                // Closed while starting: users already got unlisten.
                state.start_status = Some(Err(MonitorError::Disconnected {
                    path: format!("channel '{}'", self.channel_name),
                }));
                None
            } else {
                state.start_status = Some(start_status.clone());
                Some(state.snapshot_interested())
            }
        };
        let Some(tonotify) = tonotify else {
            debug!(channel = %self.channel_name, "entry closed during upstream start, connect not propagated");
            return;
        };

        for user in &tonotify {
            if let Some(req) = self.requester_of(user, "monitor_connect") {
                req.monitor_connect(&start_status, user, Some(&value_type));
            }
        }
    }

    fn event(&self, monitor: &dyn UpstreamMonitor) {
        let _hold = self.weak_self.upgrade();
        self.wakeups.fetch_add(1, Ordering::Relaxed);

        // Drain to exhaustion: upstream will not call again until its queue empties.
        while let Some(update) = monitor.poll() {
            self.events.fetch_add(1, Ordering::Relaxed);

            let tonotify = {
                let mut state = self.lock_state();
                state.last_value = Some(Arc::clone(&update.value));
                state.last_event_at = Some(Utc::now());
                state.snapshot_interested()
            };

            for user in &tonotify {
                if user.push(&update) {
                    trace!(channel = %self.channel_name, user = %user.id(), "queue became non-empty");
                    user.wake();
                }
            }

            monitor.release(update);
        }
    }

    fn unlisten(&self, _monitor: &dyn UpstreamMonitor) {
        self.finish("unlisten");
    }

    fn message(&self, message: &str, severity: MessageSeverity) {
        match severity {
            MessageSeverity::Info => info!(channel = %self.channel_name, "{message}"),
            MessageSeverity::Warning => warn!(channel = %self.channel_name, "{message}"),
            MessageSeverity::Error | MessageSeverity::Fatal => {
                error!(channel = %self.channel_name, ?severity, "{message}");
            }
        }
    }

    fn requester_name(&self) -> &str {
        "MonitorCacheEntry"
    }
}

impl Drop for MonitorCacheEntry {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(monitor) = state.upstream.take() {
            monitor.destroy();
        }
    }
}

impl fmt::Debug for MonitorCacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorCacheEntry")
            .field("channel", &self.channel_name)
            .field("wakeups", &self.wakeups.load(Ordering::Relaxed))
            .field("events", &self.events.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
