use crate::queue::Subscription;
use parking_lot::Mutex;
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt::{self, Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::{Arc, Weak};

/// Subscriptions are pruned of stale entries whenever the list reaches a power of two at least
/// this large.
const PRUNE_THRESHOLD: usize = 8;

/// A reference-counted owner of a value that reference-aware maps can index weakly.
///
/// `Tracked` is to this crate what [`Arc`] is to the standard library: cloning is cheap, and the
/// value is dropped when the last clone goes away. The difference is what happens at that moment:
/// every map that indexes the value through a weak or soft slot is notified, exactly once, so
/// that it can purge the entry the next time it drains its [`ReclaimQueue`](crate::ReclaimQueue).
///
/// ```
/// use refmap::{Tracked, WeakValueHashMap};
///
/// let mut map: WeakValueHashMap<&str, String> = WeakValueHashMap::new();
/// let value = Tracked::new(String::from("hello"));
/// map.put("greeting", value.clone());
/// assert_eq!(map.get(&"greeting").as_deref().map(String::as_str), Some("hello"));
///
/// drop(value);
/// assert!(map.get(&"greeting").is_none());
/// assert_eq!(map.len(), 0);
/// ```
pub struct Tracked<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    value: T,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        // the strong count is already zero here, so every subscribed handle observes its referent
        // as gone before its notification can be drained.
        for subscription in self.subscriptions.get_mut().drain(..) {
            subscription.notify();
        }
    }
}

impl<T> Tracked<T> {
    /// Wraps `value` so it can be held weakly by reference-aware maps.
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Inner {
                value,
                subscriptions: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Returns `true` if the two `Tracked`s point to the same allocation.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.inner, &other.inner)
    }

    /// Returns the number of `Tracked` clones of this value.
    pub fn strong_count(this: &Self) -> usize {
        Arc::strong_count(&this.inner)
    }

    /// The address of the shared allocation, identifying this value among its clones.
    pub(crate) fn addr(this: &Self) -> usize {
        Arc::as_ptr(&this.inner) as usize
    }

    pub(crate) fn downgrade(this: &Self) -> WeakTracked<T> {
        WeakTracked(Arc::downgrade(&this.inner))
    }

    pub(crate) fn subscribe(&self, subscription: Subscription) {
        let mut subscriptions = self.inner.subscriptions.lock();
        let n = subscriptions.len();
        if n >= PRUNE_THRESHOLD && n.is_power_of_two() {
            subscriptions.retain(|s| !s.is_stale());
        }
        subscriptions.push(subscription);
    }
}

/// A non-owning pointer to a [`Tracked`] value.
pub(crate) struct WeakTracked<T>(Weak<Inner<T>>);

impl<T> WeakTracked<T> {
    pub(crate) fn upgrade(&self) -> Option<Tracked<T>> {
        self.0.upgrade().map(|inner| Tracked { inner })
    }

    pub(crate) fn is_dangling(&self) -> bool {
        self.0.strong_count() == 0
    }
}

impl<T> Clone for Tracked<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner.value
    }
}

impl<T> AsRef<T> for Tracked<T> {
    fn as_ref(&self) -> &T {
        self
    }
}

impl<T> Borrow<T> for Tracked<T> {
    fn borrow(&self) -> &T {
        self
    }
}

impl<T> From<T> for Tracked<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: Default> Default for Tracked<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Debug> Debug for Tracked<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&**self, f)
    }
}

impl<T: Display> Display for Tracked<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&**self, f)
    }
}

impl<T: PartialEq> PartialEq for Tracked<T> {
    fn eq(&self, other: &Self) -> bool {
        **self == **other
    }
}

impl<T: Eq> Eq for Tracked<T> {}

impl<T: PartialOrd> PartialOrd for Tracked<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        (**self).partial_cmp(&**other)
    }
}

impl<T: Ord> Ord for Tracked<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (**self).cmp(&**other)
    }
}

impl<T: Hash> Hash for Tracked<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (**self).hash(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deref_and_eq() {
        let a = Tracked::new(5);
        let b = a.clone();
        assert_eq!(*a, 5);
        assert!(Tracked::ptr_eq(&a, &b));
        assert_eq!(Tracked::strong_count(&a), 2);
        assert_eq!(a, Tracked::new(5));
        assert!(!Tracked::ptr_eq(&a, &Tracked::new(5)));
    }

    #[test]
    fn weak_dangles_after_last_drop() {
        let a = Tracked::new(String::from("a"));
        let w = Tracked::downgrade(&a);
        assert!(!w.is_dangling());
        assert_eq!(w.upgrade().as_deref().map(String::as_str), Some("a"));
        drop(a);
        assert!(w.is_dangling());
        assert!(w.upgrade().is_none());
    }
}
