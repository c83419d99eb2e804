//! The purge step every map runs before it mutates.
//!
//! Each notice names one handle. The entry to purge is the one in the notice's bucket whose key
//! or value slot *is* that handle; an entry that merely holds an equal key is left alone, since
//! it was inserted after the handle died.

use crate::handle::Side;
use crate::policy::Policy;
use crate::queue::{ReclaimQueue, Reclaimed};

/// Drains `queue`, calling `purge` once per notice. `purge` returns whether it removed an entry.
///
/// Returns the number of entries removed.
pub(crate) fn purge_reclaimed<F>(queue: &ReclaimQueue, mut purge: F) -> usize
where
    F: FnMut(&Reclaimed) -> bool,
{
    let mut drained = 0;
    let mut purged = 0;
    for notice in queue.drain() {
        drained += 1;
        if purge(&notice) {
            purged += 1;
        }
    }
    if drained != 0 {
        tracing::trace!(drained, purged, "purged reclaimed entries");
    }
    purged
}

/// Returns `true` if the entry holding `key` and `value` is the one `notice` was posted for.
pub(crate) fn is_entry_of<K, V, KP, VP>(notice: &Reclaimed, key: &KP::Slot, value: &VP::Slot) -> bool
where
    KP: Policy<K>,
    VP: Policy<V>,
{
    match notice.side() {
        Side::Key => KP::is_handle(key, notice),
        Side::Value => VP::is_handle(value, notice),
    }
}
