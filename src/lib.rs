//! # chanmon - monitor fan-out cache for protocol gateways
//!
//! A gateway between many downstream clients and a remote source of named,
//! subscribable values ("channels") must hold only one upstream subscription
//! per channel and redistribute every update to each interested client, each
//! consuming through its own bounded buffer.
//!
//! ## Core Concepts
//!
//! - **ChannelCacheEntry**: per-channel handle; lazily creates the monitor entry
//! - **MonitorCacheEntry**: owns the single upstream subscription and fans out updates
//! - **MonitorUser**: one downstream subscription with a fixed pool of buffers
//! - **MonitorElement**: a reusable value-snapshot slot with changed / overrun masks
//!
//! Nothing here owns a thread. Upstream callbacks (`connect`, `event`,
//! `unlisten`) run on the transport's thread; `start`, `stop`, `poll`,
//! `release` and `destroy` run on session threads. No lock is held while a
//! callback runs, and a full consumer queue drops updates instead of blocking
//! the producer.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chanmon::{session_channel, ChannelCacheEntry, MonitorConfig, SessionEvent};
//!
//! let cache = ChannelCacheEntry::new(upstream_channel, MonitorConfig::default());
//! let (requester, events) = session_channel(64);
//! let user = cache.subscribe(weak(&requester));
//!
//! loop {
//!     match events.recv()? {
//!         SessionEvent::Connected { status, .. } => { status?; user.start()?; }
//!         SessionEvent::DataReady { user } => { user.drain(|elem| send(elem.value()))?; }
//!         SessionEvent::Unlisten { .. } => break,
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bitset;
pub mod channel;
pub mod config;
pub mod error;
pub mod monitor;
pub mod session;
pub mod value;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export primary types at crate root for convenience
pub use bitset::BitSet;
pub use channel::ChannelCacheEntry;
pub use config::{MonitorConfig, DEFAULT_QUEUE_SIZE};
pub use error::{MonitorError, MonitorResult, Status};
pub use monitor::{
    EntryStats, MessageSeverity, MonitorCacheEntry, MonitorElement, MonitorRequester, MonitorUser,
    QueueCounts, UpstreamChannel, UpstreamMonitor, UpstreamRequester, UpstreamUpdate, UserId, UserStats,
};
pub use session::{session_channel, session_channel_from_config, ChannelRequester, SessionEvent, SessionReceiver};
pub use value::{FieldDesc, FieldKind, FieldValue, StructValue, ValueType, ValueTypeBuilder};
