//! The channel through which dying referents announce themselves to the maps that index them.
//!
//! Posting is a send on an unbounded multi-producer channel, so it never blocks. Draining takes
//! what is pending at the time of the call with non-blocking receives; two drains can never hand
//! out the same notice.

use crate::handle::{RefHandle, Side};
use crossbeam_channel::{unbounded, Receiver, Sender, TryIter};
use std::fmt;
use std::iter::{Fuse, FusedIterator, Take};
use std::ptr;
use std::sync::{Arc, Weak};

/// The map-facing view of a reference handle whose referent has been reclaimed.
pub(crate) trait Reclaimable: Send + Sync {
    /// The hash of the entry the handle belongs to.
    fn hash(&self) -> u64;
    fn side(&self) -> Side;
}

type Notice = Arc<dyn Reclaimable>;

/// A queue of handles whose referents have been reclaimed.
///
/// Each map owns one queue. Every handle the map creates is registered with its referent, and the
/// referent's last drop posts the handle here. Notices arrive asynchronously and with no ordering
/// guarantee relative to map operations.
#[derive(Clone)]
pub struct ReclaimQueue {
    channel: Arc<Channel>,
}

struct Channel {
    sender: Sender<Notice>,
    receiver: Receiver<Notice>,
}

impl ReclaimQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            channel: Arc::new(Channel { sender, receiver }),
        }
    }

    /// Takes every notice posted so far.
    ///
    /// The returned iterator never blocks and yields at most the notices pending when it was
    /// created; notices posted after the call are left for the next drain. Notices it is dropped
    /// before yielding stay queued.
    pub fn drain(&self) -> Drain<'_> {
        let receiver = &self.channel.receiver;
        Drain {
            notices: receiver.try_iter().take(receiver.len()).fuse(),
        }
    }

    /// Returns `true` if no notice is pending.
    pub fn is_empty(&self) -> bool {
        self.channel.receiver.is_empty()
    }

    /// The number of pending notices.
    pub fn len(&self) -> usize {
        self.channel.receiver.len()
    }

    pub(crate) fn subscription(&self, handle: Weak<dyn Reclaimable>) -> Subscription {
        Subscription {
            handle,
            channel: Arc::downgrade(&self.channel),
        }
    }
}

impl Default for ReclaimQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReclaimQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReclaimQueue")
            .field("pending", &self.len())
            .finish()
    }
}

/// A registration of one handle with one referent.
///
/// Fired (at most once, since it is consumed) when the referent is dropped. Neither the handle nor
/// the queue is kept alive by the registration: a handle that is already gone has no entry left
/// to purge, and a queue that is gone has no map left to purge it from.
pub(crate) struct Subscription {
    handle: Weak<dyn Reclaimable>,
    channel: Weak<Channel>,
}

impl Subscription {
    pub(crate) fn notify(self) {
        if let (Some(handle), Some(channel)) = (self.handle.upgrade(), self.channel.upgrade()) {
            // the receiver lives next to the sender, so the channel is never disconnected here
            let _ = channel.sender.send(handle);
        }
    }

    pub(crate) fn is_stale(&self) -> bool {
        self.handle.strong_count() == 0 || self.channel.strong_count() == 0
    }
}

/// A handle drained from a [`ReclaimQueue`].
#[derive(Clone)]
pub struct Reclaimed {
    handle: Notice,
}

impl Reclaimed {
    /// The hash of the map entry the reclaimed handle belonged to.
    pub fn hash(&self) -> u64 {
        self.handle.hash()
    }

    /// Whether the handle held a key or a value.
    pub fn side(&self) -> Side {
        self.handle.side()
    }

    /// Returns `true` if this notice is for exactly `handle` (identity, not equality).
    pub fn is<T>(&self, handle: &RefHandle<T>) -> bool {
        ptr::addr_eq(Arc::as_ptr(&self.handle), handle.as_ptr())
    }
}

impl fmt::Debug for Reclaimed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reclaimed")
            .field("hash", &self.hash())
            .field("side", &self.side())
            .finish()
    }
}

/// The notices taken by one call to [`ReclaimQueue::drain`].
pub struct Drain<'q> {
    notices: Fuse<Take<TryIter<'q, Notice>>>,
}

impl Iterator for Drain<'_> {
    type Item = Reclaimed;

    fn next(&mut self) -> Option<Reclaimed> {
        self.notices.next().map(|handle| Reclaimed { handle })
    }
}

impl FusedIterator for Drain<'_> {}

impl fmt::Debug for Drain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Drain").finish_non_exhaustive()
    }
}
