//! Per-downstream-subscription delivery queue.
//!
//! Each user owns a closed pool of [`MonitorElement`] slots partitioned into
//! free, filled and in-use. The cache entry pushes into it (dropping when no
//! slot is free), the owning session pulls from it at its own pace.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{MonitorError, MonitorResult, Status};

use super::element::{MonitorElement, UpstreamUpdate};
use super::entry::MonitorCacheEntry;
use super::traits::MonitorRequester;

/// Unique identifier for a downstream monitor user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    /// Create a new random user id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Slot distribution of a user's buffer pool.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub free: usize,
    pub filled: usize,
    pub in_use: usize,
}

impl QueueCounts {
    /// Total slots; constant once the pool has been allocated.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.free + self.filled + self.in_use
    }
}

/// Diagnostic counters for one user.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserStats {
    pub id: UserId,
    pub running: bool,
    pub events: u64,
    pub dropped: u64,
    pub wakeups: u64,
    pub queue: QueueCounts,
}

#[derive(Default)]
struct UserQueue {
    running: bool,
    destroyed: bool,
    allocated: bool,
    free: VecDeque<MonitorElement>,
    filled: VecDeque<MonitorElement>,
    in_use: HashSet<usize>,
}

/// One downstream subscription multiplexed from a [`MonitorCacheEntry`].
///
/// Lifecycle: created → started → {running ⇄ stopped} → destroyed.
/// `destroy()` is reachable from any state and idempotent.
pub struct MonitorUser {
    id: UserId,
    entry: Arc<MonitorCacheEntry>,
    requester: Weak<dyn MonitorRequester>,
    weak_self: Weak<MonitorUser>,
    queue_size: usize,
    queue: Mutex<UserQueue>,
    events: AtomicU64,
    dropped: AtomicU64,
    wakeups: AtomicU64,
}

impl MonitorUser {
    pub(crate) fn new(
        entry: Arc<MonitorCacheEntry>,
        requester: Weak<dyn MonitorRequester>,
        queue_size: usize,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            id: UserId::new(),
            entry,
            requester,
            weak_self: weak_self.clone(),
            queue_size,
            queue: Mutex::new(UserQueue::default()),
            events: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            wakeups: AtomicU64::new(0),
        })
    }

    fn lock_queue(&self) -> MutexGuard<'_, UserQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Unique id of this user.
    #[must_use]
    pub const fn id(&self) -> UserId {
        self.id
    }

    /// The cache entry this user receives from.
    #[must_use]
    pub const fn entry(&self) -> &Arc<MonitorCacheEntry> {
        &self.entry
    }

    /// Slot count of the pool allocated at first start.
    #[must_use]
    pub const fn queue_size(&self) -> usize {
        self.queue_size
    }

    pub(crate) fn requester(&self) -> Option<Arc<dyn MonitorRequester>> {
        self.requester.upgrade()
    }

    /// Begin (or resume) receiving updates.
    ///
    /// The first successful start allocates the buffer pool and, if the
    /// channel already delivered a value, queues it as a fully-changed
    /// catch-up element and notifies the requester once. Restarting after
    /// `stop()` reuses the pool and only affects later updates.
    pub fn start(&self) -> Status {
        let Some(requester) = self.requester.upgrade() else {
            return Err(MonitorError::RequesterGone);
        };

        let snapshot = self.entry.start_snapshot();
        match snapshot.status {
            None => return Err(MonitorError::NotConnected),
            Some(Err(err)) => return Err(err),
            Some(Ok(())) => {}
        }
        let Some(value_type) = snapshot.value_type else {
            return Err(MonitorError::NotConnected);
        };

        // Updates fanned out between the snapshot and `running = true` are
        // dropped; the catch-up carries the snapshot value.
        let catch_up = {
            let mut queue = self.lock_queue();
            if queue.destroyed {
                return Ok(());
            }

            let mut catch_up = false;
            if !queue.allocated {
                queue.allocated = true;
                for slot in 0..self.queue_size {
                    queue.free.push_back(MonitorElement::new(
                        self.id,
                        slot,
                        value_type.create_value(),
                        value_type.bit_count(),
                    ));
                }

                if let Some(last) = &snapshot.last_value {
                    if let Some(mut elem) = queue.free.pop_front() {
                        elem.fill_whole(last);
                        queue.filled.push_back(elem);
                        catch_up = true;
                    }
                }
            }
            queue.running = true;
            catch_up
        };

        if catch_up {
            self.wakeups.fetch_add(1, Ordering::Relaxed);
            if let Some(this) = self.weak_self.upgrade() {
                requester.monitor_event(&this);
            }
        }
        Ok(())
    }

    /// Stop accepting updates. Always succeeds.
    pub fn stop(&self) -> Status {
        self.lock_queue().running = false;
        Ok(())
    }

    /// Take the oldest filled element, if any. Never blocks.
    pub fn poll(&self) -> Option<MonitorElement> {
        let mut queue = self.lock_queue();
        let elem = queue.filled.pop_front()?;
        queue.in_use.insert(elem.slot());
        Some(elem)
    }

    /// Hand a polled element back to the free pool.
    ///
    /// Fails with `InvalidRelease` if the element is not currently held from
    /// this user; queue state is left untouched in that case.
    pub fn release(&self, elem: MonitorElement) -> Status {
        let mut queue = self.lock_queue();
        if elem.owner() != self.id || !queue.in_use.remove(&elem.slot()) {
            drop(queue);
            warn!(user = %self.id, slot = elem.slot(), owner = %elem.owner(), "release of element not in use");
            return Err(MonitorError::InvalidRelease { slot: elem.slot() });
        }
        queue.free.push_back(elem);
        Ok(())
    }

    /// Poll until empty, handing each element to `f` and releasing it.
    ///
    /// Returns the number of elements consumed.
    pub fn drain<F>(&self, mut f: F) -> MonitorResult<usize>
    where
        F: FnMut(&MonitorElement),
    {
        let mut consumed = 0;
        while let Some(elem) = self.poll() {
            f(&elem);
            self.release(elem)?;
            consumed += 1;
        }
        Ok(consumed)
    }

    /// Downstream closed this subscription. Safe from any thread, idempotent.
    ///
    /// Buffers are reclaimed when the user itself is dropped.
    pub fn destroy(&self) {
        let mut queue = self.lock_queue();
        if !queue.destroyed {
            debug!(user = %self.id, channel = %self.entry.channel_name(), "monitor user destroyed");
        }
        queue.running = false;
        queue.destroyed = true;
    }

    /// True between a successful `start()` and the next `stop()` or `destroy()`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock_queue().running
    }

    /// Current free / filled / in-use slot counts.
    #[must_use]
    pub fn queue_counts(&self) -> QueueCounts {
        let queue = self.lock_queue();
        QueueCounts {
            free: queue.free.len(),
            filled: queue.filled.len(),
            in_use: queue.in_use.len(),
        }
    }

    /// Delivery counters plus queue counts.
    #[must_use]
    pub fn stats(&self) -> UserStats {
        let (running, queue) = {
            let q = self.lock_queue();
            (
                q.running,
                QueueCounts {
                    free: q.free.len(),
                    filled: q.filled.len(),
                    in_use: q.in_use.len(),
                },
            )
        };
        UserStats {
            id: self.id,
            running,
            events: self.events.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            wakeups: self.wakeups.load(Ordering::Relaxed),
            queue,
        }
    }

    /// Copy an update into a free slot.
    ///
    /// Returns true when the filled queue was empty before the push, i.e. the
    /// requester must be woken. A stopped user or an exhausted pool drops the
    /// update and counts it.
    pub(crate) fn push(&self, update: &UpstreamUpdate) -> bool {
        let mut queue = self.lock_queue();
        if !queue.running {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let Some(mut elem) = queue.free.pop_front() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        let notify = queue.filled.is_empty();
        elem.fill_from(update);
        queue.filled.push_back(elem);
        self.events.fetch_add(1, Ordering::Relaxed);
        notify
    }

    /// Notify the requester that data is ready. Must be called without locks held.
    pub(crate) fn wake(&self) {
        self.wakeups.fetch_add(1, Ordering::Relaxed);
        let (Some(req), Some(this)) = (self.requester.upgrade(), self.weak_self.upgrade()) else {
            debug!(user = %self.id, "dead requester in monitor_event");
            return;
        };
        req.monitor_event(&this);
    }
}

impl fmt::Debug for MonitorUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorUser")
            .field("id", &self.id)
            .field("channel", &self.entry.channel_name())
            .field("queue_size", &self.queue_size)
            .finish_non_exhaustive()
    }
}
