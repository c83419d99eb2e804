use crate::drain;
use crate::error::{Error, Result};
use crate::handle::Side;
use crate::policy::Policy;
use crate::queue::ReclaimQueue;
use crate::snapshot::Snapshot;
use crate::soft::SoftRetainer;
use crate::strategy::{Canonical, HashingStrategy};
use hashbrown::hash_table::Entry;
use hashbrown::HashTable;
use std::fmt;
use std::marker::PhantomData;

struct Bucket<KS, VS> {
    hash: u64,
    key: KS,
    value: VS,
}

/// A single-threaded hash map whose keys and values are held according to the
/// [`Policy`]s `KP` and `VP`.
///
/// Entries whose reclaimable key or value has been dropped are purged the next time the map is
/// mutated or measured: [`put`](Self::put), [`remove`](Self::remove), [`clear`](Self::clear),
/// [`len`](Self::len) and [`is_empty`](Self::is_empty) all drain the map's reclaim queue first.
/// Lookups do not drain, but never return a reclaimed key or value.
///
/// Most code uses one of the aliases, such as [`WeakValueHashMap`](crate::WeakValueHashMap) or
/// [`WeakKeyHashMap`](crate::WeakKeyHashMap).
///
/// ```
/// use refmap::{Tracked, WeakKeyHashMap};
///
/// let mut sessions: WeakKeyHashMap<String, u32> = WeakKeyHashMap::new();
/// let user = Tracked::new(String::from("ferris"));
/// sessions.put(user.clone(), 3);
/// assert_eq!(sessions.get(&String::from("ferris")), Some(3));
///
/// drop(user);
/// assert!(sessions.is_empty());
/// ```
pub struct RefHashMap<K, V, KP, VP, H = Canonical>
where
    KP: Policy<K>,
    VP: Policy<V>,
{
    table: HashTable<Bucket<KP::Slot, VP::Slot>>,
    strategy: H,
    queue: ReclaimQueue,
    soft: SoftRetainer,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, KP, VP, H> RefHashMap<K, V, KP, VP, H>
where
    KP: Policy<K>,
    VP: Policy<V>,
    H: HashingStrategy<K> + Default,
{
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::with_strategy(H::default())
    }

    /// Creates an empty map with room for at least `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_strategy(capacity, H::default())
    }
}

impl<K, V, KP, VP, H> Default for RefHashMap<K, V, KP, VP, H>
where
    KP: Policy<K>,
    VP: Policy<V>,
    H: HashingStrategy<K> + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, KP, VP, H> RefHashMap<K, V, KP, VP, H>
where
    KP: Policy<K>,
    VP: Policy<V>,
    H: HashingStrategy<K>,
{
    /// Creates an empty map that hashes and compares keys with `strategy`.
    pub fn with_strategy(strategy: H) -> Self {
        Self::with_capacity_and_strategy(0, strategy)
    }

    /// Creates an empty map with room for at least `capacity` entries, hashing keys with
    /// `strategy`.
    pub fn with_capacity_and_strategy(capacity: usize, strategy: H) -> Self {
        Self {
            table: HashTable::with_capacity(capacity),
            strategy,
            queue: ReclaimQueue::new(),
            soft: SoftRetainer::default(),
            _marker: PhantomData,
        }
    }

    /// Sets how many softly held referents the map keeps alive. Zero makes soft slots behave
    /// like weak ones.
    pub fn with_soft_capacity(mut self, capacity: usize) -> Self {
        self.soft = SoftRetainer::new(capacity);
        self
    }

    pub fn strategy(&self) -> &H {
        &self.strategy
    }

    /// The number of entries the map can hold without reallocating.
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    fn find(&self, key: &K) -> Option<&Bucket<KP::Slot, VP::Slot>> {
        let hash = self.strategy.hash(key);
        let strategy = &self.strategy;
        self.table.find(hash, |b| {
            b.hash == hash && KP::with_referent(&b.key, |k| strategy.equals(k, key)).unwrap_or(false)
        })
    }

    /// Returns the value for `key`.
    ///
    /// This does not drain the map. A mapping whose key or value has been reclaimed, but not yet
    /// purged, is reported as absent.
    pub fn get(&self, key: &K) -> Option<VP::Owned> {
        VP::upgrade(&self.find(key)?.value)
    }

    /// Returns the value for `key`, or `default` if there is none.
    pub fn get_or_default(&self, key: &K, default: VP::Owned) -> VP::Owned {
        self.get(key).unwrap_or(default)
    }

    /// Maps `key` to `value`, returning the previous value if it was still alive.
    ///
    /// If the map already holds an equal key, that key is kept and only the value is replaced.
    pub fn put(&mut self, key: KP::Owned, value: VP::Owned) -> Option<VP::Owned> {
        self.drain();

        let hash = self.strategy.hash(KP::referent(&key));
        let (key_slot, key_alive) = KP::into_slot(key, hash, Side::Key, &self.queue);
        let (value_slot, value_alive) = VP::into_slot(value, hash, Side::Value, &self.queue);

        let strategy = &self.strategy;
        let old = match self.table.entry(
            hash,
            |b| b.hash == hash && keys_match::<K, KP, H>(strategy, &b.key, &key_slot),
            |b| b.hash,
        ) {
            Entry::Occupied(mut entry) => {
                // the stored key stays, so it is the one to retain
                let bucket = entry.get_mut();
                KP::retain_slot(&bucket.key, &self.soft);
                let old = std::mem::replace(&mut bucket.value, value_slot);
                VP::upgrade(&old)
            }
            Entry::Vacant(entry) => {
                entry.insert(Bucket {
                    hash,
                    key: key_slot,
                    value: value_slot,
                });
                KP::retain(&key_alive, &self.soft);
                None
            }
        };

        VP::retain(&value_alive, &self.soft);
        old
    }

    /// Puts every pair of `entries`.
    pub fn put_all<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (KP::Owned, VP::Owned)>,
    {
        for (key, value) in entries {
            self.put(key, value);
        }
    }

    /// Removes the mapping for `key`, returning its value if it was still alive.
    pub fn remove(&mut self, key: &K) -> Option<VP::Owned> {
        self.drain();

        let hash = self.strategy.hash(key);
        let strategy = &self.strategy;
        let entry = self
            .table
            .find_entry(hash, |b| {
                b.hash == hash
                    && KP::with_referent(&b.key, |k| strategy.equals(k, key)).unwrap_or(false)
            })
            .ok()?;
        let (bucket, _) = entry.remove();
        VP::upgrade(&bucket.value)
    }

    /// Removes every mapping.
    pub fn clear(&mut self) {
        self.table.clear();
        self.drain();
    }

    /// The number of entries, after purging reclaimed ones.
    ///
    /// With reclaimable keys or values the answer can be out of date as soon as it is returned.
    pub fn len(&mut self) -> usize {
        self.drain();
        self.table.len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the map holds a live mapping for `key`.
    ///
    /// # Errors
    ///
    /// [`Error::AmbiguousQuery`] if values are reclaimable, since the value could be gone by the
    /// time the answer is acted on. Use [`get`](Self::get) instead.
    pub fn contains_key(&self, key: &K) -> Result<bool> {
        if VP::RECLAIMABLE {
            return Err(Error::AmbiguousQuery {
                operation: "contains_key",
            });
        }
        Ok(self.find(key).is_some_and(|b| VP::is_live(&b.value)))
    }

    /// Returns `true` if some live entry maps to `value`.
    ///
    /// # Errors
    ///
    /// [`Error::AmbiguousQuery`] if values are reclaimable.
    pub fn contains_value(&self, value: &V) -> Result<bool>
    where
        V: PartialEq,
    {
        if VP::RECLAIMABLE {
            return Err(Error::AmbiguousQuery {
                operation: "contains_value",
            });
        }
        Ok(self.table.iter().any(|b| {
            KP::is_live(&b.key) && VP::with_referent(&b.value, |v| v == value).unwrap_or(false)
        }))
    }

    fn snapshot<T>(&self, mut f: impl FnMut(KP::Owned, VP::Owned) -> T) -> Snapshot<T> {
        let items = self
            .table
            .iter()
            .filter_map(|b| Some(f(KP::upgrade(&b.key)?, VP::upgrade(&b.value)?)))
            .collect();
        Snapshot::new(items)
    }

    /// A snapshot of the keys of every live entry.
    pub fn keys(&self) -> Snapshot<KP::Owned> {
        self.snapshot(|k, _| k)
    }

    /// A snapshot of the values of every live entry.
    pub fn values(&self) -> Snapshot<VP::Owned> {
        self.snapshot(|_, v| v)
    }

    /// A snapshot of every live entry.
    pub fn entries(&self) -> Snapshot<(KP::Owned, VP::Owned)> {
        self.snapshot(|k, v| (k, v))
    }

    /// Purges every entry whose key or value has been reclaimed, returning how many were removed.
    pub fn drain_reclaimed(&mut self) -> usize {
        self.drain()
    }

    /// Stops keeping softly held referents alive. Those that are not referenced elsewhere are
    /// reclaimed, and purged by the next drain.
    ///
    /// Returns the number of retentions released.
    pub fn release_soft(&self) -> usize {
        self.soft.release_all()
    }

    fn drain(&mut self) -> usize {
        let table = &mut self.table;
        drain::purge_reclaimed(&self.queue, |notice| {
            let hash = notice.hash();
            match table.find_entry(hash, |b| {
                b.hash == hash && drain::is_entry_of::<K, V, KP, VP>(notice, &b.key, &b.value)
            }) {
                Ok(entry) => {
                    let _ = entry.remove();
                    true
                }
                Err(_) => false,
            }
        })
    }
}

/// Returns `true` if two key slots hold live, equal keys.
pub(crate) fn keys_match<K, KP, H>(strategy: &H, stored: &KP::Slot, new: &KP::Slot) -> bool
where
    KP: Policy<K>,
    H: HashingStrategy<K> + ?Sized,
{
    KP::with_referent(new, |n| {
        KP::with_referent(stored, |s| strategy.equals(s, n)).unwrap_or(false)
    })
    .unwrap_or(false)
}

impl<K, V, KP, VP, H> Extend<(KP::Owned, VP::Owned)> for RefHashMap<K, V, KP, VP, H>
where
    KP: Policy<K>,
    VP: Policy<V>,
    H: HashingStrategy<K>,
{
    fn extend<I: IntoIterator<Item = (KP::Owned, VP::Owned)>>(&mut self, iter: I) {
        self.put_all(iter);
    }
}

impl<K, V, KP, VP, H> fmt::Debug for RefHashMap<K, V, KP, VP, H>
where
    KP: Policy<K>,
    VP: Policy<V>,
    KP::Owned: fmt::Debug,
    VP::Owned: fmt::Debug,
    H: HashingStrategy<K>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries()).finish()
    }
}
