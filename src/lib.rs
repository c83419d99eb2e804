//! Hash maps whose entries disappear once their keys or values are no longer used elsewhere.
//!
//! A reference-aware map holds each side of an entry according to a [`Policy`]:
//!
//!  - [`Strong`]: the map owns the key or value, as a normal map would.
//!  - [`Weak`]: the map holds a [`RefHandle`] to a [`Tracked`] value. Once the last `Tracked`
//!    clone outside the map is dropped, the entry is as good as gone: lookups miss it, and the
//!    next mutation of the map removes it.
//!  - [`Soft`]: like `Weak`, but the map also keeps a bounded number of recently inserted
//!    referents alive itself, which makes soft maps useful as caches.
//!
//! The maps come in a single-threaded flavor, [`RefHashMap`], and a concurrent one,
//! [`ConcurrentRefHashMap`]. Both are usually used through aliases that fix the policies, such as
//! [`WeakValueHashMap`] or [`ConcurrentWeakKeyHashMap`].
//!
//! # Reclamation
//!
//! When a `Tracked` value is dropped for the last time, every handle registered on it is posted,
//! exactly once, to the [`ReclaimQueue`] of the map that created it. Maps drain their queue at
//! the start of every mutating operation and purge the entry that holds exactly the posted
//! handle. A handle's hash is computed once, when it is created, so the entry can still be found
//! after its referent is gone; and handle identity (not key equality) decides which entry to
//! purge, so a purge can never remove a newer entry for an equal key.
//!
//! Reclamation timing is entirely up to the program: nothing is collected behind its back, and
//! nothing is guaranteed to be collected at any particular time.
//!
//! ```
//! use refmap::{Tracked, WeakKeyWeakValueHashMap};
//!
//! let mut map: WeakKeyWeakValueHashMap<String, u64> = WeakKeyWeakValueHashMap::new();
//! let key = Tracked::new(String::from("answer"));
//! let value = Tracked::new(42);
//! map.put(key.clone(), value.clone());
//! assert_eq!(map.get(&String::from("answer")).as_deref(), Some(&42));
//!
//! // either side going away is enough
//! drop(value);
//! assert_eq!(map.len(), 0);
//! ```
//!
//! # Hashing
//!
//! Keys are hashed and compared through a [`HashingStrategy`] supplied when the map is created.
//! [`Canonical`] uses the key's own `Hash` and `Eq` implementations with [`DefaultHashBuilder`];
//! [`Identity`] compares reclaimable keys by address; [`CaseInsensitive`] and [`FnStrategy`]
//! cover the rest. Integer-keyed maps ([`IntRefHashMap`], [`ConcurrentIntRefHashMap`]) use
//! [`IntHash`] and take their keys by value.
//!
//! # Concurrency
//!
//! [`ConcurrentRefHashMap`] is built on a bin-locked hash table. Reads are lock-free and writes
//! lock only the bin they modify. When the table fills up, its bins are moved to a table of twice
//! the size while readers carry on. Memory of removed entries is reclaimed through [`seize`].
//!
//! Queries whose answer may be invalidated by a concurrent reclamation before the caller can act
//! on it are refused: [`contains_key`](RefHashMap::contains_key) and
//! [`contains_value`](RefHashMap::contains_value) return [`Error::AmbiguousQuery`] on maps with
//! reclaimable values, and [`ConcurrentRefHashMap::put_all`] returns [`Error::Unsupported`].

mod concurrent;
mod counter;
mod drain;
mod error;
mod handle;
mod int;
mod local;
mod node;
mod policy;
mod queue;
mod raw;
mod reclaim;
mod snapshot;
mod soft;
mod strategy;
mod tracked;

pub use concurrent::ConcurrentRefHashMap;
pub use error::{Error, Result};
pub use handle::{RefHandle, Side};
pub use int::{
    ConcurrentIntRefHashMap, ConcurrentIntSoftValueHashMap, ConcurrentIntWeakValueHashMap,
    IntHash, IntKey, IntRefHashMap, IntSoftValueHashMap, IntWeakValueHashMap,
};
pub use local::RefHashMap;
pub use policy::{
    ConcurrentSoftKeyHashMap, ConcurrentSoftKeySoftValueHashMap, ConcurrentSoftKeyWeakValueHashMap,
    ConcurrentSoftValueHashMap, ConcurrentWeakKeyHashMap, ConcurrentWeakKeySoftValueHashMap,
    ConcurrentWeakKeyWeakValueHashMap, ConcurrentWeakValueHashMap, Policy, Soft,
    SoftKeyHashMap, SoftKeySoftValueHashMap, SoftKeyWeakValueHashMap, SoftValueHashMap, Strong,
    Weak, WeakKeyHashMap, WeakKeySoftValueHashMap, WeakKeyWeakValueHashMap, WeakValueHashMap,
};
pub use queue::{Drain, ReclaimQueue, Reclaimed};
pub use snapshot::Snapshot;
pub use soft::{SoftRetainer, DEFAULT_SOFT_CAPACITY};
pub use strategy::{CaseInsensitive, Canonical, FnStrategy, HashingStrategy, Identity};
pub use tracked::Tracked;

/// Default hasher for [`Canonical`].
pub type DefaultHashBuilder = ahash::RandomState;
