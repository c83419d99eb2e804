//! How each side of a map entry holds its referent.
//!
//! A map is parameterized by one [`Policy`] for its keys and one for its values. The policy
//! decides what callers hand in and get back (`Owned`), what the table stores (`Slot`), and how a
//! stored slot relates to the notices drained from the map's [`ReclaimQueue`].

use crate::concurrent::ConcurrentRefHashMap;
use crate::handle::{RefHandle, Side};
use crate::local::RefHashMap;
use crate::queue::{ReclaimQueue, Reclaimed};
use crate::soft::SoftRetainer;
use crate::strategy::Canonical;
use crate::tracked::Tracked;

mod sealed {
    pub trait Sealed {}
}

/// A reference policy for one side of a map entry.
///
/// This trait is sealed; the policies are [`Strong`], [`Weak`] and [`Soft`].
pub trait Policy<T>: sealed::Sealed + Send + Sync + 'static {
    /// What callers insert and get back.
    type Owned: Clone;

    /// What the map stores.
    type Slot: Clone;

    /// Keeps the referent of a freshly created slot alive until the insertion has completed, so
    /// that its reclamation can never be observed before its entry exists.
    type KeepAlive;

    /// Whether slots of this policy can lose their referent.
    const RECLAIMABLE: bool;

    fn referent(owned: &Self::Owned) -> &T;

    /// Turns `owned` into a slot for the entry hashed to `hash`.
    fn into_slot(
        owned: Self::Owned,
        hash: u64,
        side: Side,
        queue: &ReclaimQueue,
    ) -> (Self::Slot, Self::KeepAlive);

    /// Returns the referent if it is still alive.
    fn upgrade(slot: &Self::Slot) -> Option<Self::Owned>;

    fn with_referent<R>(slot: &Self::Slot, f: impl FnOnce(&T) -> R) -> Option<R>;

    fn is_live(slot: &Self::Slot) -> bool;

    /// Returns `true` if `notice` was posted for exactly this slot.
    fn is_handle(slot: &Self::Slot, notice: &Reclaimed) -> bool;

    /// Returns `true` if `a` and `b` are the same reclaimable slot.
    fn same_slot(a: &Self::Slot, b: &Self::Slot) -> bool;

    /// Called once an insertion has succeeded.
    fn retain(keep_alive: &Self::KeepAlive, retainer: &SoftRetainer) {
        let _ = (keep_alive, retainer);
    }

    /// Called when an insertion kept a stored slot in place of the one it was given.
    fn retain_slot(slot: &Self::Slot, retainer: &SoftRetainer) {
        let _ = (slot, retainer);
    }
}

/// The referent is stored directly and never reclaimed.
#[derive(Copy, Clone, Debug, Default)]
pub struct Strong;

/// The referent is held by a [`RefHandle`] and reclaimed as soon as the last [`Tracked`] clone
/// outside the map is dropped.
#[derive(Copy, Clone, Debug, Default)]
pub struct Weak;

/// Like [`Weak`], but the map also keeps recently inserted referents alive in its
/// [`SoftRetainer`].
#[derive(Copy, Clone, Debug, Default)]
pub struct Soft;

impl sealed::Sealed for Strong {}
impl sealed::Sealed for Weak {}
impl sealed::Sealed for Soft {}

impl<T: Clone> Policy<T> for Strong {
    type Owned = T;
    type Slot = T;
    type KeepAlive = ();

    const RECLAIMABLE: bool = false;

    fn referent(owned: &T) -> &T {
        owned
    }

    fn into_slot(owned: T, _: u64, _: Side, _: &ReclaimQueue) -> (T, ()) {
        (owned, ())
    }

    fn upgrade(slot: &T) -> Option<T> {
        Some(slot.clone())
    }

    fn with_referent<R>(slot: &T, f: impl FnOnce(&T) -> R) -> Option<R> {
        Some(f(slot))
    }

    fn is_live(_: &T) -> bool {
        true
    }

    fn is_handle(_: &T, _: &Reclaimed) -> bool {
        false
    }

    fn same_slot(_: &T, _: &T) -> bool {
        false
    }
}

macro_rules! reclaimable_policy {
    ($policy:ident) => {
        impl<T: Send + Sync + 'static> Policy<T> for $policy {
            type Owned = Tracked<T>;
            type Slot = RefHandle<T>;
            type KeepAlive = Tracked<T>;

            const RECLAIMABLE: bool = true;

            fn referent(owned: &Tracked<T>) -> &T {
                owned
            }

            fn into_slot(
                owned: Tracked<T>,
                hash: u64,
                side: Side,
                queue: &ReclaimQueue,
            ) -> (RefHandle<T>, Tracked<T>) {
                (RefHandle::register(&owned, hash, side, queue), owned)
            }

            fn upgrade(slot: &RefHandle<T>) -> Option<Tracked<T>> {
                slot.dereference()
            }

            fn with_referent<R>(slot: &RefHandle<T>, f: impl FnOnce(&T) -> R) -> Option<R> {
                slot.with_referent(f)
            }

            fn is_live(slot: &RefHandle<T>) -> bool {
                !slot.is_reclaimed()
            }

            fn is_handle(slot: &RefHandle<T>, notice: &Reclaimed) -> bool {
                notice.is(slot)
            }

            fn same_slot(a: &RefHandle<T>, b: &RefHandle<T>) -> bool {
                RefHandle::ptr_eq(a, b)
            }

            reclaimable_policy!(@retain $policy);
        }
    };
    (@retain Weak) => {};
    (@retain Soft) => {
        fn retain(keep_alive: &Tracked<T>, retainer: &SoftRetainer) {
            retainer.retain(keep_alive.clone());
        }

        fn retain_slot(slot: &RefHandle<T>, retainer: &SoftRetainer) {
            if let Some(referent) = slot.dereference() {
                retainer.retain(referent);
            }
        }
    };
}

reclaimable_policy!(Weak);
reclaimable_policy!(Soft);

/// A map whose keys are held weakly.
pub type WeakKeyHashMap<K, V, H = Canonical> = RefHashMap<K, V, Weak, Strong, H>;
/// A map whose keys are held softly.
pub type SoftKeyHashMap<K, V, H = Canonical> = RefHashMap<K, V, Soft, Strong, H>;
/// A map whose values are held weakly.
pub type WeakValueHashMap<K, V, H = Canonical> = RefHashMap<K, V, Strong, Weak, H>;
/// A map whose values are held softly.
pub type SoftValueHashMap<K, V, H = Canonical> = RefHashMap<K, V, Strong, Soft, H>;
pub type WeakKeyWeakValueHashMap<K, V, H = Canonical> = RefHashMap<K, V, Weak, Weak, H>;
pub type SoftKeySoftValueHashMap<K, V, H = Canonical> = RefHashMap<K, V, Soft, Soft, H>;
pub type WeakKeySoftValueHashMap<K, V, H = Canonical> = RefHashMap<K, V, Weak, Soft, H>;
pub type SoftKeyWeakValueHashMap<K, V, H = Canonical> = RefHashMap<K, V, Soft, Weak, H>;

/// A concurrent map whose keys are held weakly.
pub type ConcurrentWeakKeyHashMap<K, V, H = Canonical> =
    ConcurrentRefHashMap<K, V, Weak, Strong, H>;
/// A concurrent map whose keys are held softly.
pub type ConcurrentSoftKeyHashMap<K, V, H = Canonical> =
    ConcurrentRefHashMap<K, V, Soft, Strong, H>;
/// A concurrent map whose values are held weakly.
pub type ConcurrentWeakValueHashMap<K, V, H = Canonical> =
    ConcurrentRefHashMap<K, V, Strong, Weak, H>;
/// A concurrent map whose values are held softly.
pub type ConcurrentSoftValueHashMap<K, V, H = Canonical> =
    ConcurrentRefHashMap<K, V, Strong, Soft, H>;
pub type ConcurrentWeakKeyWeakValueHashMap<K, V, H = Canonical> =
    ConcurrentRefHashMap<K, V, Weak, Weak, H>;
pub type ConcurrentSoftKeySoftValueHashMap<K, V, H = Canonical> =
    ConcurrentRefHashMap<K, V, Soft, Soft, H>;
pub type ConcurrentWeakKeySoftValueHashMap<K, V, H = Canonical> =
    ConcurrentRefHashMap<K, V, Weak, Soft, H>;
pub type ConcurrentSoftKeyWeakValueHashMap<K, V, H = Canonical> =
    ConcurrentRefHashMap<K, V, Soft, Weak, H>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strong_slots_are_never_reclaimed() {
        let queue = ReclaimQueue::new();
        let (slot, ()) = <Strong as Policy<i32>>::into_slot(4, 0, Side::Value, &queue);
        assert!(<Strong as Policy<i32>>::is_live(&slot));
        assert_eq!(<Strong as Policy<i32>>::upgrade(&slot), Some(4));
        assert!(!<Strong as Policy<i32>>::same_slot(&slot, &slot));
    }

    #[test]
    fn soft_retains_on_request() {
        let queue = ReclaimQueue::new();
        let retainer = SoftRetainer::new(4);
        let owned = Tracked::new(9);
        let (slot, keep) = <Soft as Policy<i32>>::into_slot(owned, 1, Side::Value, &queue);
        <Soft as Policy<i32>>::retain(&keep, &retainer);
        drop(keep);
        assert!(<Soft as Policy<i32>>::is_live(&slot));
        retainer.release_all();
        assert!(!<Soft as Policy<i32>>::is_live(&slot));
        let notice = queue.drain().next().expect("posted on release");
        assert!(<Soft as Policy<i32>>::is_handle(&slot, &notice));
    }

    #[test]
    fn weak_does_not_retain() {
        let queue = ReclaimQueue::new();
        let retainer = SoftRetainer::new(4);
        let (slot, keep) = <Weak as Policy<i32>>::into_slot(Tracked::new(9), 1, Side::Key, &queue);
        <Weak as Policy<i32>>::retain(&keep, &retainer);
        assert!(retainer.is_empty());
        drop(keep);
        assert!(!<Weak as Policy<i32>>::is_live(&slot));
    }
}
