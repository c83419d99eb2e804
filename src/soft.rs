//! Retention of softly held referents.
//!
//! There is no memory-pressure signal to hook into, so a soft slot is modelled as a weak slot
//! whose referent is additionally kept alive by the map for a while. The map keeps strong clones
//! of the most recently inserted soft referents in a bounded FIFO; once a referent falls out of
//! that window (or the owner calls [`SoftRetainer::release_all`]), it behaves exactly like a weak
//! referent.

use crate::tracked::Tracked;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;

/// Number of soft referents a map retains unless configured otherwise.
pub const DEFAULT_SOFT_CAPACITY: usize = 64;

/// A retained referent, and the address identifying it.
type Retained = (usize, Box<dyn Send + Sync>);

/// A bounded FIFO of strong references to softly held referents.
pub struct SoftRetainer {
    capacity: usize,
    retained: Mutex<VecDeque<Retained>>,
}

impl SoftRetainer {
    /// Creates a retainer that keeps at most `capacity` referents alive.
    ///
    /// A capacity of zero disables retention, so soft slots degrade to weak slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            retained: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_SOFT_CAPACITY))),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The number of referents currently retained.
    pub fn len(&self) -> usize {
        self.retained.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keeps `referent` alive until it is evicted by newer retentions or released.
    ///
    /// Retaining the most recently retained referent again is a no-op, so repeated insertions of
    /// one referent do not crowd others out.
    pub(crate) fn retain<T: Send + Sync + 'static>(&self, referent: Tracked<T>) {
        if self.capacity == 0 {
            return;
        }
        let addr = Tracked::addr(&referent);
        let evicted = {
            let mut retained = self.retained.lock();
            if retained.back().is_some_and(|(last, _)| *last == addr) {
                return;
            }
            retained.push_back((addr, Box::new(referent)));
            if retained.len() > self.capacity {
                retained.pop_front()
            } else {
                None
            }
        };
        // an eviction may be the last strong reference, whose drop then posts to a queue. keep
        // that outside the lock.
        drop(evicted);
    }

    /// Releases every retained referent, returning how many were released.
    pub fn release_all(&self) -> usize {
        let released = std::mem::take(&mut *self.retained.lock());
        let n = released.len();
        if n != 0 {
            tracing::debug!(released = n, "released soft references");
        }
        n
    }
}

impl Default for SoftRetainer {
    fn default() -> Self {
        Self::new(DEFAULT_SOFT_CAPACITY)
    }
}

impl fmt::Debug for SoftRetainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftRetainer")
            .field("capacity", &self.capacity)
            .field("retained", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Tracked;

    #[test]
    fn evicts_oldest_first() {
        let r = SoftRetainer::new(2);
        let a = Tracked::new(1);
        let b = Tracked::new(2);
        let c = Tracked::new(3);
        r.retain(a.clone());
        r.retain(b.clone());
        assert_eq!(Tracked::strong_count(&a), 2);
        r.retain(c.clone());
        assert_eq!(r.len(), 2);
        assert_eq!(Tracked::strong_count(&a), 1);
        assert_eq!(Tracked::strong_count(&b), 2);
        assert_eq!(Tracked::strong_count(&c), 2);
    }

    #[test]
    fn zero_capacity_retains_nothing() {
        let r = SoftRetainer::new(0);
        let a = Tracked::new(1);
        r.retain(a.clone());
        assert!(r.is_empty());
        assert_eq!(Tracked::strong_count(&a), 1);
    }

    #[test]
    fn release_all() {
        let r = SoftRetainer::default();
        let a = Tracked::new(1);
        let b = Tracked::new(2);
        r.retain(a.clone());
        r.retain(b.clone());
        assert_eq!(r.release_all(), 2);
        assert_eq!(Tracked::strong_count(&a), 1);
        assert_eq!(Tracked::strong_count(&b), 1);
        assert_eq!(r.release_all(), 0);
    }

    #[test]
    fn repeated_retention_takes_one_slot() {
        let r = SoftRetainer::new(2);
        let a = Tracked::new(1);
        let b = Tracked::new(2);
        r.retain(a.clone());
        r.retain(b.clone());
        r.retain(b.clone());
        r.retain(b.clone());
        assert_eq!(r.len(), 2);
        assert_eq!(Tracked::strong_count(&a), 2);
        assert_eq!(Tracked::strong_count(&b), 2);

        // only a repeat of the newest retention is skipped
        r.retain(a.clone());
        assert_eq!(r.len(), 2);
        assert_eq!(Tracked::strong_count(&a), 2);
        assert_eq!(Tracked::strong_count(&b), 2);
    }
}
