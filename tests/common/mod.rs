#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once, Weak};

use chanmon::{
    ChannelCacheEntry, ChannelRequester, FieldKind, FieldValue, MonitorConfig, MonitorElement, MonitorRequester,
    Status, StructValue, UpstreamChannel, UpstreamMonitor, UpstreamRequester, UpstreamUpdate, ValueType,
};

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn counter_type() -> Arc<ValueType> {
    Arc::new(
        ValueType::builder("counter")
            .field("seq", FieldKind::Int)
            .field("label", FieldKind::String)
            .build(),
    )
}

pub fn counter(seq: i64) -> UpstreamUpdate {
    let mut update = UpstreamUpdate::whole(StructValue::new(vec![
        FieldValue::Int(seq),
        FieldValue::String(format!("n{seq}")),
    ]));
    update.changed.set(1);
    update
}

pub fn seq_of(elem: &MonitorElement) -> i64 {
    elem.value().get(0).and_then(FieldValue::as_int).expect("seq field")
}

type PollHook = Box<dyn FnMut(usize) + Send>;

/// Upstream subscription fed by the test.
#[derive(Default)]
pub struct QueueUpstream {
    queue: Mutex<VecDeque<UpstreamUpdate>>,
    hook: Mutex<Option<PollHook>>,
    polls: AtomicUsize,
    released: AtomicUsize,
    destroyed: AtomicUsize,
}

impl QueueUpstream {
    pub fn push(&self, update: UpstreamUpdate) {
        self.queue.lock().unwrap().push_back(update);
    }

    /// Run `hook(n)` right before the n-th successful poll hands out its update.
    pub fn on_poll(&self, hook: impl FnMut(usize) + Send + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl UpstreamMonitor for QueueUpstream {
    fn start(&self) -> Status {
        Ok(())
    }

    fn poll(&self) -> Option<UpstreamUpdate> {
        let update = self.queue.lock().unwrap().pop_front()?;
        let n = self.polls.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = self.hook.lock().unwrap().as_mut() {
            hook(n);
        }
        Some(update)
    }

    fn release(&self, _update: UpstreamUpdate) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    fn destroy(&self) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Channel connection layer that hands every monitor request to the test.
pub struct LoopbackChannel {
    name: String,
    requester: Mutex<Option<Weak<dyn UpstreamRequester>>>,
    pub upstream: Arc<QueueUpstream>,
}

impl LoopbackChannel {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            requester: Mutex::new(None),
            upstream: Arc::new(QueueUpstream::default()),
        })
    }

    fn requester(&self) -> Arc<dyn UpstreamRequester> {
        self.requester
            .lock()
            .unwrap()
            .as_ref()
            .and_then(Weak::upgrade)
            .expect("monitor requested and alive")
    }

    pub fn connect(&self, status: Status) {
        let monitor: Arc<dyn UpstreamMonitor> = Arc::clone(&self.upstream) as Arc<dyn UpstreamMonitor>;
        self.requester().connect(status, monitor, counter_type());
    }

    /// Queue `seqs` upstream and signal a single edge-triggered event.
    pub fn publish(&self, seqs: impl IntoIterator<Item = i64>) {
        for seq in seqs {
            self.upstream.push(counter(seq));
        }
        self.requester().event(self.upstream.as_ref());
    }

    pub fn end_of_data(&self) {
        self.requester().unlisten(self.upstream.as_ref());
    }
}

impl UpstreamChannel for LoopbackChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_monitor(&self, requester: Weak<dyn UpstreamRequester>) -> Status {
        *self.requester.lock().unwrap() = Some(requester);
        Ok(())
    }
}

pub fn cache_for(channel: &Arc<LoopbackChannel>, queue_size: usize) -> Arc<ChannelCacheEntry> {
    let cfg = MonitorConfig {
        queue_size,
        ..MonitorConfig::default()
    };
    ChannelCacheEntry::new(Arc::clone(channel) as Arc<dyn UpstreamChannel>, cfg)
}

pub fn weak(requester: &Arc<ChannelRequester>) -> Weak<dyn MonitorRequester> {
    let strong: Arc<dyn MonitorRequester> = Arc::clone(requester) as Arc<dyn MonitorRequester>;
    Arc::downgrade(&strong)
}
