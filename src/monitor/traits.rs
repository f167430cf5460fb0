//! Interfaces between the fan-out cache and its collaborators.
//!
//! Upstream: the channel connection layer (`UpstreamChannel`) creates the
//! single subscription (`UpstreamMonitor`) and reports back to the cache entry
//! through `UpstreamRequester`. Downstream: each client session implements
//! `MonitorRequester`. Both callback targets are held weakly.

use std::sync::{Arc, Weak};

use crate::error::Status;
use crate::value::ValueType;

use super::element::UpstreamUpdate;
use super::user::MonitorUser;

/// Severity of a free-form message from the upstream layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageSeverity {
    /// Informational.
    Info,
    /// Something degraded but still working.
    Warning,
    /// An operation failed.
    Error,
    /// The subscription cannot continue.
    Fatal,
}

/// Outbound calls the cache makes on the single upstream subscription.
pub trait UpstreamMonitor: Send + Sync {
    /// Begin delivering updates.
    fn start(&self) -> Status;

    /// Take the next pending update, if any.
    fn poll(&self) -> Option<UpstreamUpdate>;

    /// Return an update's slot after it has been fanned out.
    fn release(&self, update: UpstreamUpdate);

    /// Tear the subscription down. Called at most once by the cache.
    fn destroy(&self);
}

/// Callbacks the upstream transport invokes on its subscriber.
///
/// `event` is edge-triggered: it fires when the upstream queue goes from empty
/// to non-empty and will not fire again until the handler drained the queue.
pub trait UpstreamRequester: Send + Sync {
    /// The subscription was established (or failed).
    fn connect(&self, status: Status, monitor: Arc<dyn UpstreamMonitor>, value_type: Arc<ValueType>);

    /// Updates are pending on `monitor`.
    fn event(&self, monitor: &dyn UpstreamMonitor);

    /// No more updates will ever arrive from `monitor`.
    fn unlisten(&self, monitor: &dyn UpstreamMonitor);

    /// Free-form diagnostic message from the transport.
    fn message(&self, _message: &str, _severity: MessageSeverity) {}

    /// Name used in upstream diagnostics.
    fn requester_name(&self) -> &str;
}

/// The channel connection layer, as seen by the cache.
pub trait UpstreamChannel: Send + Sync {
    /// Channel name, for diagnostics.
    fn name(&self) -> &str;

    /// Ask for a new upstream subscription reporting to `requester`.
    ///
    /// The subscription handle arrives later through
    /// `UpstreamRequester::connect`, possibly before this call returns.
    fn create_monitor(&self, requester: Weak<dyn UpstreamRequester>) -> Status;
}

/// Callbacks a downstream session implements for each of its users.
pub trait MonitorRequester: Send + Sync {
    /// Upstream connect completed with `status`. `value_type` is known on success.
    fn monitor_connect(&self, status: &Status, user: &Arc<MonitorUser>, value_type: Option<&Arc<ValueType>>);

    /// `user`'s filled queue went from empty to non-empty. Drain with `poll()`.
    fn monitor_event(&self, user: &Arc<MonitorUser>);

    /// The channel will produce no further updates for `user`.
    fn unlisten(&self, user: &Arc<MonitorUser>);
}
