//! Test doubles for the upstream transport and downstream sessions.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::channel::ChannelCacheEntry;
use crate::config::MonitorConfig;
use crate::error::{MonitorError, Status};
use crate::monitor::{
    MonitorCacheEntry, MonitorElement, MonitorRequester, MonitorUser, UpstreamChannel, UpstreamMonitor,
    UpstreamRequester, UpstreamUpdate, UserId,
};
use crate::value::{FieldKind, FieldValue, StructValue, ValueType};

pub(crate) fn scalar_type() -> Arc<ValueType> {
    Arc::new(
        ValueType::builder("scalar")
            .field("value", FieldKind::Int)
            .build(),
    )
}

pub(crate) fn update(v: i64) -> UpstreamUpdate {
    let mut u = UpstreamUpdate::whole(StructValue::new(vec![FieldValue::Int(v)]));
    u.changed.set(1);
    u
}

pub(crate) fn int_of(elem: &MonitorElement) -> i64 {
    elem.value().get(0).and_then(FieldValue::as_int).unwrap_or(i64::MIN)
}

type StartHook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
pub(crate) struct ScriptedUpstream {
    queue: Mutex<VecDeque<UpstreamUpdate>>,
    start_result: Mutex<Option<MonitorError>>,
    on_start: Mutex<Option<StartHook>>,
    started: AtomicUsize,
    released: AtomicUsize,
    destroyed: AtomicUsize,
}

impl ScriptedUpstream {
    pub(crate) fn push(&self, update: UpstreamUpdate) {
        self.queue.lock().unwrap().push_back(update);
    }

    pub(crate) fn fail_start(&self, err: MonitorError) {
        *self.start_result.lock().unwrap() = Some(err);
    }

    /// Run `hook` once, inside the next `start()`.
    pub(crate) fn on_start(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_start.lock().unwrap() = Some(Box::new(hook));
    }

    pub(crate) fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub(crate) fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub(crate) fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl UpstreamMonitor for ScriptedUpstream {
    fn start(&self) -> Status {
        self.started.fetch_add(1, Ordering::SeqCst);
        let hook = self.on_start.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        match self.start_result.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn poll(&self) -> Option<UpstreamUpdate> {
        self.queue.lock().unwrap().pop_front()
    }

    fn release(&self, _update: UpstreamUpdate) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    fn destroy(&self) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) struct MockChannel {
    requester: Mutex<Option<Weak<dyn UpstreamRequester>>>,
    create_error: Option<MonitorError>,
    created: AtomicUsize,
}

impl MockChannel {
    pub(crate) fn new(create_error: Option<MonitorError>) -> Self {
        Self {
            requester: Mutex::new(None),
            create_error,
            created: AtomicUsize::new(0),
        }
    }

    pub(crate) fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub(crate) fn upstream_requester(&self) -> Option<Arc<dyn UpstreamRequester>> {
        self.requester.lock().unwrap().as_ref().and_then(Weak::upgrade)
    }
}

impl UpstreamChannel for MockChannel {
    fn name(&self) -> &str {
        "test:channel"
    }

    fn create_monitor(&self, requester: Weak<dyn UpstreamRequester>) -> Status {
        self.created.fetch_add(1, Ordering::SeqCst);
        *self.requester.lock().unwrap() = Some(requester);
        match &self.create_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Record {
    Connect(UserId, Status),
    Event(UserId),
    Unlisten(UserId),
}

#[derive(Default)]
pub(crate) struct RecordingRequester {
    records: Mutex<Vec<Record>>,
}

impl RecordingRequester {
    pub(crate) fn count(&self, pred: impl Fn(&Record) -> bool) -> usize {
        self.records.lock().unwrap().iter().filter(|r| pred(r)).count()
    }

    pub(crate) fn events_for(&self, id: UserId) -> usize {
        self.count(|r| matches!(r, Record::Event(u) if *u == id))
    }

    pub(crate) fn connects_for(&self, id: UserId) -> Vec<Status> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| match r {
                Record::Connect(u, status) if *u == id => Some(status.clone()),
                _ => None,
            })
            .collect()
    }
}

impl MonitorRequester for RecordingRequester {
    fn monitor_connect(&self, status: &Status, user: &Arc<MonitorUser>, _value_type: Option<&Arc<ValueType>>) {
        self.records.lock().unwrap().push(Record::Connect(user.id(), status.clone()));
    }

    fn monitor_event(&self, user: &Arc<MonitorUser>) {
        self.records.lock().unwrap().push(Record::Event(user.id()));
    }

    fn unlisten(&self, user: &Arc<MonitorUser>) {
        self.records.lock().unwrap().push(Record::Unlisten(user.id()));
    }
}

/// Requester that calls back into its users from inside every callback:
/// starts on connect, drains on event, destroys on unlisten.
#[derive(Default)]
pub(crate) struct ReentrantRequester {
    held: Mutex<Vec<Arc<MonitorUser>>>,
    starts: Mutex<Vec<Status>>,
    seen: Mutex<Vec<i64>>,
    unlistened: AtomicUsize,
    /// Let go of the user's last handle after draining it.
    pub(crate) drop_after_event: AtomicBool,
}

impl ReentrantRequester {
    pub(crate) fn starts(&self) -> Vec<Status> {
        self.starts.lock().unwrap().clone()
    }

    pub(crate) fn seen(&self) -> Vec<i64> {
        self.seen.lock().unwrap().clone()
    }

    pub(crate) fn unlistened(&self) -> usize {
        self.unlistened.load(Ordering::SeqCst)
    }

    pub(crate) fn held(&self) -> usize {
        self.held.lock().unwrap().len()
    }
}

impl MonitorRequester for ReentrantRequester {
    fn monitor_connect(&self, status: &Status, user: &Arc<MonitorUser>, _value_type: Option<&Arc<ValueType>>) {
        if status.is_ok() {
            let started = user.start();
            self.starts.lock().unwrap().push(started);
        }
        self.held.lock().unwrap().push(Arc::clone(user));
    }

    fn monitor_event(&self, user: &Arc<MonitorUser>) {
        let mut seen = Vec::new();
        user.drain(|elem| seen.push(int_of(elem))).unwrap();
        self.seen.lock().unwrap().extend(seen);
        if self.drop_after_event.load(Ordering::SeqCst) {
            let released = {
                let mut held = self.held.lock().unwrap();
                let (gone, kept): (Vec<_>, Vec<_>) = held.drain(..).partition(|u| u.id() == user.id());
                *held = kept;
                gone
            };
            drop(released);
        }
    }

    fn unlisten(&self, user: &Arc<MonitorUser>) {
        user.destroy();
        self.unlistened.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) fn weak_requester<R: MonitorRequester + 'static>(requester: &Arc<R>) -> Weak<dyn MonitorRequester> {
    let strong: Arc<dyn MonitorRequester> = Arc::clone(requester) as Arc<dyn MonitorRequester>;
    Arc::downgrade(&strong)
}

/// A channel, its scripted upstream and one shared recording requester.
pub(crate) struct Fixture {
    pub(crate) channel: Arc<MockChannel>,
    pub(crate) cache: Arc<ChannelCacheEntry>,
    pub(crate) upstream: Arc<ScriptedUpstream>,
    pub(crate) requester: Arc<RecordingRequester>,
    // Holds the entry alive for `connected()` fixtures.
    _anchor: Option<Arc<MonitorUser>>,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        Self::build(None, MonitorConfig::default())
    }

    pub(crate) fn with_queue_size(queue_size: usize) -> Self {
        Self::build(
            None,
            MonitorConfig {
                queue_size,
                ..MonitorConfig::default()
            },
        )
    }

    /// A connected fixture kept alive by an idle, never-started user.
    pub(crate) fn connected() -> Self {
        Self::connected_with_queue_size(MonitorConfig::default().queue_size)
    }

    pub(crate) fn connected_with_queue_size(queue_size: usize) -> Self {
        let mut fx = Self::with_queue_size(queue_size);
        fx._anchor = Some(fx.subscribe());
        fx.connect_ok();
        fx
    }

    pub(crate) fn failing_create(err: MonitorError) -> Self {
        Self::build(Some(err), MonitorConfig::default())
    }

    fn build(create_error: Option<MonitorError>, config: MonitorConfig) -> Self {
        let channel = Arc::new(MockChannel::new(create_error));
        let cache = ChannelCacheEntry::new(Arc::clone(&channel) as Arc<dyn UpstreamChannel>, config);
        Self {
            channel,
            cache,
            upstream: Arc::new(ScriptedUpstream::default()),
            requester: Arc::new(RecordingRequester::default()),
            _anchor: None,
        }
    }

    pub(crate) fn requester_weak(&self) -> Weak<dyn MonitorRequester> {
        let strong: Arc<dyn MonitorRequester> = Arc::clone(&self.requester) as Arc<dyn MonitorRequester>;
        Arc::downgrade(&strong)
    }

    pub(crate) fn subscribe(&self) -> Arc<MonitorUser> {
        self.cache.subscribe(self.requester_weak())
    }

    /// Subscribe with a requester that is dropped right away.
    pub(crate) fn subscribe_orphan(&self) -> Arc<MonitorUser> {
        let requester: Arc<dyn MonitorRequester> = Arc::new(RecordingRequester::default());
        let user = self.cache.subscribe(Arc::downgrade(&requester));
        drop(requester);
        user
    }

    pub(crate) fn entry(&self) -> Arc<MonitorCacheEntry> {
        self.cache.live_entry().expect("entry is alive")
    }

    fn upstream_requester(&self) -> Arc<dyn UpstreamRequester> {
        self.channel.upstream_requester().expect("upstream requested")
    }

    pub(crate) fn connect_ok(&self) {
        self.connect(Ok(()));
    }

    pub(crate) fn connect_err(&self, err: MonitorError) {
        self.connect(Err(err));
    }

    fn connect(&self, status: Status) {
        let monitor: Arc<dyn UpstreamMonitor> = Arc::clone(&self.upstream) as Arc<dyn UpstreamMonitor>;
        self.upstream_requester().connect(status, monitor, scalar_type());
    }

    pub(crate) fn fire(&self) {
        self.upstream_requester().event(self.upstream.as_ref());
    }

    pub(crate) fn unlisten(&self) {
        self.upstream_requester().unlisten(self.upstream.as_ref());
    }
}
