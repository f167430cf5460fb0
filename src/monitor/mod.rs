//! Monitor fan-out core.
//!
//! One [`MonitorCacheEntry`] per upstream channel subscription broadcasts every
//! update to its interested [`MonitorUser`]s, each consuming at its own pace
//! through a bounded pool of [`MonitorElement`] slots.

/// Buffer slots and upstream update snapshots.
pub mod element;
/// Upstream subscription owner and fan-out.
pub mod entry;
/// Collaborator interfaces (upstream transport, downstream sessions).
pub mod traits;
/// Per-downstream delivery queue.
pub mod user;

pub use element::{MonitorElement, UpstreamUpdate};
pub use entry::{EntryStats, MonitorCacheEntry};
pub use traits::{MessageSeverity, MonitorRequester, UpstreamChannel, UpstreamMonitor, UpstreamRequester};
pub use user::{MonitorUser, QueueCounts, UserId, UserStats};
