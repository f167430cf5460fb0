//! Session adapter: turns requester callbacks into messages.
//!
//! A downstream session usually runs on its own thread. [`session_channel`]
//! gives it a [`ChannelRequester`] to subscribe with and a [`SessionReceiver`]
//! to wait on. Callbacks run on the upstream I/O thread and must never block
//! it, so notifications are enqueued with `try_send`.
//!
//! Wakeups are edge-triggered, so a lost `DataReady` would strand a user's
//! queue forever. When the bounded channel is full, notifications go to an
//! unbounded backlog instead, in order, and a second `DataReady` for a user
//! that already has one waiting is folded into it. The backlog holds at most
//! one wakeup plus the two lifecycle events per user. Notifications are only
//! discarded once the receiver is gone.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};

use tracing::trace;

use crate::config::MonitorConfig;
use crate::error::{MonitorError, MonitorResult, Status};
use crate::monitor::{MonitorRequester, MonitorUser};
use crate::value::ValueType;

/// A requester callback, as delivered to the session thread.
pub enum SessionEvent {
    /// Upstream connect completed for `user`.
    #[allow(missing_docs)]
    Connected {
        user: Arc<MonitorUser>,
        status: Status,
        value_type: Option<Arc<ValueType>>,
    },
    /// The user's queue became non-empty; drain it with `poll()` until `None`.
    DataReady {
        #[allow(missing_docs)]
        user: Arc<MonitorUser>,
    },
    /// No more updates will arrive for `user`.
    Unlisten {
        #[allow(missing_docs)]
        user: Arc<MonitorUser>,
    },
}

impl SessionEvent {
    /// The user this event is about.
    #[must_use]
    pub const fn user(&self) -> &Arc<MonitorUser> {
        match self {
            Self::Connected { user, .. } | Self::DataReady { user } | Self::Unlisten { user } => user,
        }
    }

    fn is_data_ready_for(&self, other: &MonitorUser) -> bool {
        matches!(self, Self::DataReady { user } if user.id() == other.id())
    }
}

impl fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected { user, status, .. } => f
                .debug_struct("Connected")
                .field("user", &user.id())
                .field("status", status)
                .finish(),
            Self::DataReady { user } => f.debug_struct("DataReady").field("user", &user.id()).finish(),
            Self::Unlisten { user } => f.debug_struct("Unlisten").field("user", &user.id()).finish(),
        }
    }
}

/// Overflow shared by both ends of a session channel.
///
/// Everything in the backlog is newer than everything in the channel: once
/// the backlog is non-empty all new notifications are appended to it.
#[derive(Debug, Default)]
struct Backlog {
    events: Mutex<VecDeque<SessionEvent>>,
    closed: AtomicBool,
}

impl Backlog {
    fn lock(&self) -> MutexGuard<'_, VecDeque<SessionEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// [`MonitorRequester`] that forwards callbacks into a bounded channel.
#[derive(Debug)]
pub struct ChannelRequester {
    tx: Sender<SessionEvent>,
    backlog: Arc<Backlog>,
    deferred: AtomicU64,
    coalesced: AtomicU64,
    dropped: AtomicU64,
}

impl ChannelRequester {
    /// Notifications discarded because the receiver was gone.
    #[must_use]
    pub fn dropped_notifications(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Notifications parked in the backlog because the channel was full.
    #[must_use]
    pub fn deferred_notifications(&self) -> u64 {
        self.deferred.load(Ordering::Relaxed)
    }

    /// `DataReady` notifications folded into one already waiting for the same user.
    #[must_use]
    pub fn coalesced_notifications(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    fn forward(&self, event: SessionEvent) {
        if self.backlog.closed.load(Ordering::Acquire) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let mut backlog = self.backlog.lock();
        if !backlog.is_empty() {
            if let SessionEvent::DataReady { user } = &event {
                if backlog.iter().any(|queued| queued.is_data_ready_for(user)) {
                    self.coalesced.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
            backlog.push_back(event);
            self.deferred.fetch_add(1, Ordering::Relaxed);
            return;
        }

        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                trace!(user = %event.user().id(), "session channel full, deferring notification");
                backlog.push_back(event);
                self.deferred.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl MonitorRequester for ChannelRequester {
    fn monitor_connect(&self, status: &Status, user: &Arc<MonitorUser>, value_type: Option<&Arc<ValueType>>) {
        self.forward(SessionEvent::Connected {
            user: Arc::clone(user),
            status: status.clone(),
            value_type: value_type.cloned(),
        });
    }

    fn monitor_event(&self, user: &Arc<MonitorUser>) {
        self.forward(SessionEvent::DataReady { user: Arc::clone(user) });
    }

    fn unlisten(&self, user: &Arc<MonitorUser>) {
        self.forward(SessionEvent::Unlisten { user: Arc::clone(user) });
    }
}

fn disconnected() -> MonitorError {
    MonitorError::Disconnected {
        path: "session_channel".to_string(),
    }
}

/// Receiving side of a session channel.
#[derive(Debug)]
pub struct SessionReceiver {
    rx: Receiver<SessionEvent>,
    backlog: Arc<Backlog>,
}

impl SessionReceiver {
    /// Oldest pending notification: the channel first, then the backlog.
    fn take_ready(&self) -> MonitorResult<Option<SessionEvent>> {
        let mut backlog = self.backlog.lock();
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(err) => match backlog.pop_front() {
                Some(event) => Ok(Some(event)),
                None if err == TryRecvError::Disconnected => Err(disconnected()),
                None => Ok(None),
            },
        }
    }

    /// Receive the next notification (blocking).
    pub fn recv(&self) -> MonitorResult<SessionEvent> {
        loop {
            if let Some(event) = self.take_ready()? {
                return Ok(event);
            }
            // Both queues were empty, so the next notification goes to the channel.
            if let Ok(event) = self.rx.recv() {
                return Ok(event);
            }
        }
    }

    /// Receive the next notification with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> MonitorResult<SessionEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = self.take_ready()? {
                return Ok(event);
            }
            match self.rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                Ok(event) => return Ok(event),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(MonitorError::Timeout {
                        duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {}
            }
        }
    }

    /// Take a pending notification without waiting.
    pub fn try_recv(&self) -> MonitorResult<Option<SessionEvent>> {
        self.take_ready()
    }

    /// Notifications currently queued, backlog included.
    #[must_use]
    pub fn len(&self) -> usize {
        let backlog = self.backlog.lock();
        self.rx.len() + backlog.len()
    }

    /// True if no notification is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for SessionReceiver {
    fn drop(&mut self) {
        self.backlog.closed.store(true, Ordering::Release);
        let pending = std::mem::take(&mut *self.backlog.lock());
        drop(pending);
    }
}

/// Create a requester / receiver pair with room for `capacity` notifications
/// in the channel before the backlog takes over.
#[must_use]
pub fn session_channel(capacity: usize) -> (Arc<ChannelRequester>, SessionReceiver) {
    let (tx, rx) = bounded::<SessionEvent>(capacity.max(1));
    let backlog = Arc::new(Backlog::default());
    let requester = Arc::new(ChannelRequester {
        tx,
        backlog: Arc::clone(&backlog),
        deferred: AtomicU64::new(0),
        coalesced: AtomicU64::new(0),
        dropped: AtomicU64::new(0),
    });
    (requester, SessionReceiver { rx, backlog })
}

/// [`session_channel`] sized from configuration.
#[must_use]
pub fn session_channel_from_config(cfg: &MonitorConfig) -> (Arc<ChannelRequester>, SessionReceiver) {
    session_channel(cfg.session_capacity)
}
