//! Pooled buffer slots and the upstream updates copied into them.

use std::sync::Arc;

use crate::bitset::BitSet;
use crate::value::StructValue;

use super::user::UserId;

/// One materialized update drained from the upstream subscription.
///
/// The upstream layer lends this out through `UpstreamMonitor::poll` and
/// expects it back through `UpstreamMonitor::release`.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamUpdate {
    pub value: Arc<StructValue>,
    pub changed: BitSet,
    pub overrun: BitSet,
}

impl UpstreamUpdate {
    /// An update that marks the whole structure as changed.
    #[must_use]
    pub fn whole(value: StructValue) -> Self {
        let mut changed = BitSet::new();
        changed.set(0);
        Self {
            value: Arc::new(value),
            changed,
            overrun: BitSet::new(),
        }
    }
}

/// A reusable value-snapshot slot owned by one [`MonitorUser`](super::MonitorUser).
///
/// At any instant an element is in exactly one of the owner's free pool,
/// filled queue, or held by the consumer between `poll()` and `release()`.
/// It is deliberately not `Clone`: handing it back is a move.
#[derive(Debug)]
pub struct MonitorElement {
    owner: UserId,
    slot: usize,
    value: Arc<StructValue>,
    changed: BitSet,
    overrun: BitSet,
}

impl MonitorElement {
    pub(crate) fn new(owner: UserId, slot: usize, empty: StructValue, mask_bits: usize) -> Self {
        Self {
            owner,
            slot,
            value: Arc::new(empty),
            changed: BitSet::with_capacity(mask_bits),
            overrun: BitSet::with_capacity(mask_bits),
        }
    }

    /// Copy an upstream update into this slot.
    pub(crate) fn fill_from(&mut self, update: &UpstreamUpdate) {
        self.value = Arc::clone(&update.value);
        self.changed.copy_from(&update.changed);
        self.overrun.copy_from(&update.overrun);
    }

    /// Load a cached value, marking everything changed.
    pub(crate) fn fill_whole(&mut self, value: &Arc<StructValue>) {
        self.value = Arc::clone(value);
        self.changed.clear_all();
        self.changed.set(0);
        self.overrun.clear_all();
    }

    /// The user this slot belongs to.
    #[must_use]
    pub const fn owner(&self) -> UserId {
        self.owner
    }

    /// Index of this slot within its owner's pool.
    #[must_use]
    pub const fn slot(&self) -> usize {
        self.slot
    }

    /// Field values of this update.
    #[must_use]
    pub fn value(&self) -> &StructValue {
        &self.value
    }

    /// Shared handle to the snapshot, for consumers that outlive the slot.
    #[must_use]
    pub fn shared_value(&self) -> Arc<StructValue> {
        Arc::clone(&self.value)
    }

    /// Fields that changed; bit 0 means the whole structure.
    #[must_use]
    pub const fn changed(&self) -> &BitSet {
        &self.changed
    }

    /// Fields that changed more than once since the previous update.
    #[must_use]
    pub const fn overrun(&self) -> &BitSet {
        &self.overrun
    }
}
