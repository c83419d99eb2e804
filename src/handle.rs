use crate::queue::{Reclaimable, ReclaimQueue};
use crate::strategy::HashingStrategy;
use crate::tracked::{Tracked, WeakTracked};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

/// Which slot of a map entry a [`RefHandle`] occupies.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    /// The handle holds the entry's key.
    Key,
    /// The handle holds the entry's value.
    Value,
}

/// A reclaimable slot of a map entry.
///
/// A handle holds its referent without keeping it alive, and remembers the hash of the entry it
/// belongs to. That hash is computed once, when the handle is created, and never changes, so the
/// handle can still be located in its map after the referent is gone.
///
/// Two handles compare equal if they are the same handle, or if both referents are still alive and
/// equal. A handle whose referent has been reclaimed is therefore only equal to itself, which is
/// what guarantees that its entry is purged exactly once.
pub struct RefHandle<T> {
    inner: Arc<HandleInner<T>>,
}

struct HandleInner<T> {
    hash: u64,
    side: Side,
    referent: WeakTracked<T>,
}

impl<T: Send + Sync> Reclaimable for HandleInner<T> {
    fn hash(&self) -> u64 {
        self.hash
    }

    fn side(&self) -> Side {
        self.side
    }
}

impl<T> RefHandle<T>
where
    T: Send + Sync + 'static,
{
    /// Creates a key handle for `referent`, hashed through `strategy`.
    ///
    /// When the last [`Tracked`] clone of `referent` is dropped, the handle is posted to `queue`.
    pub fn new<H>(referent: &Tracked<T>, strategy: &H, queue: &ReclaimQueue) -> Self
    where
        H: HashingStrategy<T> + ?Sized,
    {
        Self::register(referent, strategy.hash(referent), Side::Key, queue)
    }

    /// Creates a value handle for `referent` that belongs to the entry whose key hashes to
    /// `key_hash`.
    pub fn for_value(referent: &Tracked<T>, key_hash: u64, queue: &ReclaimQueue) -> Self {
        Self::register(referent, key_hash, Side::Value, queue)
    }

    pub(crate) fn register(
        referent: &Tracked<T>,
        hash: u64,
        side: Side,
        queue: &ReclaimQueue,
    ) -> Self {
        let inner = Arc::new(HandleInner {
            hash,
            side,
            referent: Tracked::downgrade(referent),
        });
        let erased: Arc<dyn Reclaimable> = inner.clone();
        let erased: Weak<dyn Reclaimable> = Arc::downgrade(&erased);
        referent.subscribe(queue.subscription(erased));
        Self { inner }
    }
}

impl<T> RefHandle<T> {
    /// Returns the referent, or `None` if it has been reclaimed.
    ///
    /// `None` must be treated as "not present". It does not mean the key stays absent: a new
    /// handle for an equal key may already have been created by a later insertion.
    pub fn dereference(&self) -> Option<Tracked<T>> {
        self.inner.referent.upgrade()
    }

    /// The hash this handle was created with.
    pub fn hash(&self) -> u64 {
        self.inner.hash
    }

    /// Whether this handle holds a key or a value.
    pub fn side(&self) -> Side {
        self.inner.side
    }

    /// Returns `true` once the referent has been reclaimed.
    pub fn is_reclaimed(&self) -> bool {
        self.inner.referent.is_dangling()
    }

    /// Returns `true` if `this` and `other` are the same handle.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.inner, &other.inner)
    }

    pub(crate) fn as_ptr(&self) -> *const () {
        Arc::as_ptr(&self.inner).cast()
    }

    /// Runs `f` on the referent if it is still alive.
    pub(crate) fn with_referent<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.dereference().map(|referent| f(&referent))
    }

    /// Returns `true` if this handle's referent is alive and equal to `key` under `strategy`.
    pub fn matches<H>(&self, key: &T, strategy: &H) -> bool
    where
        H: HashingStrategy<T> + ?Sized,
    {
        self.with_referent(|referent| strategy.equals(referent, key))
            .unwrap_or(false)
    }
}

impl<T> Clone for RefHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: PartialEq> PartialEq for RefHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        if Self::ptr_eq(self, other) {
            return true;
        }
        match (self.dereference(), other.dereference()) {
            (Some(a), Some(b)) => *a == *b,
            _ => false,
        }
    }
}

impl<T> Hash for RefHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.inner.hash)
    }
}

impl<T: fmt::Debug> fmt::Debug for RefHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("RefHandle");
        d.field("hash", &self.inner.hash).field("side", &self.inner.side);
        match self.dereference() {
            Some(referent) => d.field("referent", &*referent),
            None => d.field("referent", &format_args!("<reclaimed>")),
        };
        d.finish()
    }
}
