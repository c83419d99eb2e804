use crate::drain;
use crate::error::{Error, Result};
use crate::handle::Side;
use crate::local::keys_match;
use crate::policy::Policy;
use crate::queue::ReclaimQueue;
use crate::raw::{HashTable, PutResult};
use crate::reclaim::LocalGuard;
use crate::snapshot::Snapshot;
use crate::soft::SoftRetainer;
use crate::strategy::{Canonical, HashingStrategy};
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;

/// A concurrent hash map whose keys and values are held according to the [`Policy`]s `KP` and
/// `VP`.
///
/// All operations take `&self`. Reads never block; writes lock only the bin they touch. Every
/// mutating operation first purges the entries whose reclaimable key or value has been dropped.
///
/// A purge and an explicit update can race on the same key. Purging only ever removes the entry
/// holding exactly the reclaimed handle, and the conditional operations
/// ([`put_if_absent`](Self::put_if_absent), [`remove_if`](Self::remove_if),
/// [`replace_if`](Self::replace_if)) compare and swap against the handle they observed, so a
/// race can neither corrupt the map nor bring a reclaimed entry back.
///
/// ```
/// use refmap::{ConcurrentWeakValueHashMap, Tracked};
/// use std::sync::Arc;
///
/// let cache: Arc<ConcurrentWeakValueHashMap<u32, String>> = Arc::default();
/// let page = Tracked::new(String::from("<html>"));
/// cache.put(80, page.clone());
///
/// let reader = {
///     let cache = Arc::clone(&cache);
///     std::thread::spawn(move || cache.get(&80).map(|page| page.len()))
/// };
/// assert_eq!(reader.join().unwrap(), Some(6));
///
/// drop(page);
/// assert_eq!(cache.get(&80), None);
/// assert_eq!(cache.len(), 0);
/// ```
pub struct ConcurrentRefHashMap<K, V, KP, VP, H = Canonical>
where
    KP: Policy<K>,
    VP: Policy<V>,
{
    table: HashTable<KP::Slot, VP::Slot>,
    strategy: H,
    queue: ReclaimQueue,
    soft: SoftRetainer,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, KP, VP, H> ConcurrentRefHashMap<K, V, KP, VP, H>
where
    KP: Policy<K>,
    VP: Policy<V>,
    H: HashingStrategy<K> + Default,
{
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::with_strategy(H::default())
    }

    /// Creates an empty map with room for `capacity` entries before it has to resize.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_strategy(capacity, H::default())
    }
}

impl<K, V, KP, VP, H> Default for ConcurrentRefHashMap<K, V, KP, VP, H>
where
    KP: Policy<K>,
    VP: Policy<V>,
    H: HashingStrategy<K> + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, KP, VP, H> ConcurrentRefHashMap<K, V, KP, VP, H>
where
    KP: Policy<K>,
    VP: Policy<V>,
    H: HashingStrategy<K>,
{
    pub fn with_strategy(strategy: H) -> Self {
        Self::with_capacity_and_strategy(0, strategy)
    }

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

    fn key_matches<'a>(&'a self, key: &'a K) -> impl Fn(&KP::Slot) -> bool + 'a {
        move |slot| KP::with_referent(slot, |k| self.strategy.equals(k, key)).unwrap_or(false)
    }

    fn slots_match(&self, stored: &KP::Slot, new: &KP::Slot) -> bool {
        keys_match::<K, KP, H>(&self.strategy, stored, new)
    }

    fn drain_with(&self, guard: &LocalGuard<'_>) -> usize {
        drain::purge_reclaimed(&self.queue, |notice| {
            self.table
                .replace_node(
                    notice.hash(),
                    |k, v| drain::is_entry_of::<K, V, KP, VP>(notice, k, v),
                    None,
                    guard,
                )
                .is_some()
        })
    }

    /// Returns the value for `key`.
    ///
    /// This never drains, and never blocks. A mapping whose key or value has been reclaimed is
    /// reported as absent.
    pub fn get(&self, key: &K) -> Option<VP::Owned> {
        let guard = self.table.guard();
        let hash = self.strategy.hash(key);
        let (_, value) = self.table.get(hash, self.key_matches(key), &guard)?;
        VP::upgrade(value)
    }

    /// Returns the value for `key`, or `default` if there is none.
    pub fn get_or_default(&self, key: &K, default: VP::Owned) -> VP::Owned {
        self.get(key).unwrap_or(default)
    }

    /// Maps `key` to `value`, returning the previous value if it was still alive.
    pub fn put(&self, key: KP::Owned, value: VP::Owned) -> Option<VP::Owned> {
        let guard = self.table.guard();
        self.drain_with(&guard);

        let hash = self.strategy.hash(KP::referent(&key));
        let (key_slot, key_alive) = KP::into_slot(key, hash, Side::Key, &self.queue);
        let (value_slot, value_alive) = VP::into_slot(value, hash, Side::Value, &self.queue);

        let old = match self.table.put(
            hash,
            key_slot,
            value_slot,
            |stored, new| self.slots_match(stored, new),
            false,
            &guard,
        ) {
            PutResult::Inserted => {
                KP::retain(&key_alive, &self.soft);
                None
            }
            PutResult::Replaced { key: stored, old } => {
                // the node kept its key, so that is the one to retain
                KP::retain_slot(stored, &self.soft);
                VP::upgrade(old)
            }
            PutResult::Exists { .. } => unreachable!("put always replaces"),
        };

        VP::retain(&value_alive, &self.soft);
        old
    }

    /// Maps `key` to `value` unless a live mapping for `key` exists, in which case that mapping's
    /// value is returned and the map is left unchanged.
    ///
    /// A mapping whose value has been reclaimed, but not yet purged, does not count: it is
    /// replaced, atomically, provided it still holds the same reclaimed value when the swap is
    /// attempted. If it does not, the whole operation is retried.
    pub fn put_if_absent(&self, key: KP::Owned, value: VP::Owned) -> Option<VP::Owned> {
        let guard = self.table.guard();

        let hash = self.strategy.hash(KP::referent(&key));
        let (mut key_slot, key_alive) = KP::into_slot(key, hash, Side::Key, &self.queue);
        let (mut value_slot, value_alive) = VP::into_slot(value, hash, Side::Value, &self.queue);

        loop {
            self.drain_with(&guard);

            match self.table.put(
                hash,
                key_slot,
                value_slot,
                |stored, new| self.slots_match(stored, new),
                true,
                &guard,
            ) {
                PutResult::Inserted => break,
                PutResult::Replaced { .. } => unreachable!("put_if_absent never replaces"),
                PutResult::Exists {
                    current,
                    not_inserted: (k, v),
                } => {
                    if let Some(live) = VP::upgrade(current) {
                        return Some(live);
                    }

                    let stale = current.clone();
                    if let Some((stored, _)) = self.table.replace_node(
                        hash,
                        |sk, sv| VP::same_slot(sv, &stale) && self.slots_match(sk, &k),
                        Some(v.clone()),
                        &guard,
                    ) {
                        tracing::trace!(hash, "put_if_absent replaced an unpurged reclaimed value");
                        KP::retain_slot(stored, &self.soft);
                        VP::retain(&value_alive, &self.soft);
                        return None;
                    }
                    tracing::trace!(hash, "put_if_absent lost a race against a purge, retrying");
                    key_slot = k;
                    value_slot = v;
                }
            }
        }

        KP::retain(&key_alive, &self.soft);
        VP::retain(&value_alive, &self.soft);
        None
    }

    /// Returns the live value for `key`, inserting `value` first if there is none.
    ///
    /// Whichever value ends up in the map is returned, so concurrent callers for the same key all
    /// see the same value.
    pub fn get_or_insert(&self, key: KP::Owned, value: VP::Owned) -> VP::Owned {
        match self.put_if_absent(key, value.clone()) {
            Some(existing) => existing,
            None => value,
        }
    }

    /// Always fails: a bulk insertion cannot be made atomic with respect to reclamation.
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`], unconditionally. Insert the entries one at a time instead.
    pub fn put_all<I>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (KP::Owned, VP::Owned)>,
    {
        let _ = entries;
        Err(Error::Unsupported {
            operation: "put_all",
        })
    }

    /// Removes the mapping for `key`, returning its value if it was still alive.
    pub fn remove(&self, key: &K) -> Option<VP::Owned> {
        let guard = self.table.guard();
        self.drain_with(&guard);

        let hash = self.strategy.hash(key);
        let matches = self.key_matches(key);
        let (_, old) = self
            .table
            .replace_node(hash, |k, _| matches(k), None, &guard)?;
        VP::upgrade(old)
    }

    /// Removes the mapping for `key` only if its value is alive and equal to `value`.
    pub fn remove_if(&self, key: &K, value: &V) -> bool
    where
        V: PartialEq,
    {
        let guard = self.table.guard();
        self.drain_with(&guard);

        let hash = self.strategy.hash(key);
        let matches = self.key_matches(key);
        self.table
            .replace_node(
                hash,
                |k, v| matches(k) && VP::with_referent(v, |v| v == value).unwrap_or(false),
                None,
                &guard,
            )
            .is_some()
    }

    /// Replaces the value for `key` with `new` only if its current value is alive and equal to
    /// `old`.
    pub fn replace_if(&self, key: &K, old: &V, new: VP::Owned) -> bool
    where
        V: PartialEq,
    {
        let guard = self.table.guard();
        self.drain_with(&guard);

        let hash = self.strategy.hash(key);
        let (value_slot, value_alive) = VP::into_slot(new, hash, Side::Value, &self.queue);
        let matches = self.key_matches(key);
        let replaced = self
            .table
            .replace_node(
                hash,
                |k, v| matches(k) && VP::with_referent(v, |v| v == old).unwrap_or(false),
                Some(value_slot),
                &guard,
            )
            .is_some();
        if replaced {
            VP::retain(&value_alive, &self.soft);
        }
        replaced
    }

    /// Replaces the value for `key` with `value`, but only if `key` has a live mapping. Returns
    /// the replaced value.
    pub fn replace(&self, key: &K, value: VP::Owned) -> Option<VP::Owned> {
        let guard = self.table.guard();
        self.drain_with(&guard);

        let hash = self.strategy.hash(key);
        let (value_slot, value_alive) = VP::into_slot(value, hash, Side::Value, &self.queue);
        let matches = self.key_matches(key);
        // holding the upgraded value keeps it alive between the check and the swap
        let previous = Cell::new(None);
        self.table.replace_node(
            hash,
            |k, v| {
                if !matches(k) {
                    return false;
                }
                let live = VP::upgrade(v);
                let found = live.is_some();
                previous.set(live);
                found
            },
            Some(value_slot),
            &guard,
        )?;
        VP::retain(&value_alive, &self.soft);
        previous.into_inner()
    }

    /// Removes every mapping.
    pub fn clear(&self) {
        let guard = self.table.guard();
        self.table.clear(&guard);
        self.drain_with(&guard);
    }

    /// The number of entries, after purging reclaimed ones.
    ///
    /// The count is approximate under concurrent modification, and with reclaimable keys or
    /// values it can be out of date as soon as it is returned.
    pub fn len(&self) -> usize {
        let guard = self.table.guard();
        self.drain_with(&guard);
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the map holds a live mapping for `key`.
    ///
    /// # Errors
    ///
    /// [`Error::AmbiguousQuery`] if values are reclaimable. Use [`get`](Self::get) instead.
    pub fn contains_key(&self, key: &K) -> Result<bool> {
        if VP::RECLAIMABLE {
            return Err(Error::AmbiguousQuery {
                operation: "contains_key",
            });
        }
        let guard = self.table.guard();
        let hash = self.strategy.hash(key);
        Ok(self.table.get(hash, self.key_matches(key), &guard).is_some())
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
        let guard = self.table.guard();
        let mut found = false;
        self.table.for_each(&guard, |k, v| {
            found = found
                || (KP::is_live(k) && VP::with_referent(v, |v| v == value).unwrap_or(false));
        });
        Ok(found)
    }

    fn snapshot<T>(&self, mut f: impl FnMut(KP::Owned, VP::Owned) -> T) -> Snapshot<T> {
        let guard = self.table.guard();
        let mut items = Vec::new();
        self.table.for_each(&guard, |k, v| {
            if let (Some(k), Some(v)) = (KP::upgrade(k), VP::upgrade(v)) {
                items.push(f(k, v));
            }
        });
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
    pub fn drain_reclaimed(&self) -> usize {
        let guard = self.table.guard();
        self.drain_with(&guard)
    }

    /// Stops keeping softly held referents alive, returning the number of retentions released.
    pub fn release_soft(&self) -> usize {
        self.soft.release_all()
    }
}

impl<K, V, KP, VP, H> fmt::Debug for ConcurrentRefHashMap<K, V, KP, VP, H>
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

#[cfg(test)]
mod tests {
    use crate::raw::PutResult;
    use crate::strategy::HashingStrategy;
    use crate::{
        ConcurrentSoftKeyHashMap, ConcurrentWeakValueHashMap, Error, RefHandle, ReclaimQueue,
        Tracked,
    };

    #[test]
    fn reclaimed_mapping_does_not_block_put_if_absent() {
        let map: ConcurrentWeakValueHashMap<&str, i32> = ConcurrentWeakValueHashMap::new();
        let old = Tracked::new(1);
        assert!(map.put_if_absent("k", old.clone()).is_none());
        drop(old);

        let new = Tracked::new(2);
        assert!(map.put_if_absent("k", new.clone()).is_none());
        assert_eq!(map.get(&"k").as_deref(), Some(&2));

        let other = Tracked::new(3);
        assert_eq!(map.put_if_absent("k", other).as_deref(), Some(&2));
    }

    #[test]
    fn reclaimable_values_reject_contains() {
        let map: ConcurrentWeakValueHashMap<&str, i32> = ConcurrentWeakValueHashMap::new();
        assert_eq!(
            map.contains_key(&"k"),
            Err(Error::AmbiguousQuery {
                operation: "contains_key"
            })
        );
        assert!(matches!(
            map.put_all(Vec::new()),
            Err(Error::Unsupported { .. })
        ));
    }

    #[test]
    fn put_if_absent_swaps_out_an_unpurged_reclaimed_value() {
        let map: ConcurrentWeakValueHashMap<&str, i32> = ConcurrentWeakValueHashMap::new();
        let hash = HashingStrategy::<&str>::hash(&map.strategy, &"k");

        // register the stored value on a queue this map never drains, so its entry outlives
        // the referent
        let elsewhere = ReclaimQueue::new();
        let stale = Tracked::new(1);
        {
            let guard = map.table.guard();
            let slot = RefHandle::for_value(&stale, hash, &elsewhere);
            assert!(matches!(
                map.table.put(hash, "k", slot, |a, b| a == b, false, &guard),
                PutResult::Inserted
            ));
        }
        drop(stale);
        assert_eq!(map.drain_reclaimed(), 0);
        assert_eq!(map.table.len(), 1);
        assert_eq!(elsewhere.len(), 1);

        let winner = Tracked::new(2);
        assert!(map.put_if_absent("k", winner.clone()).is_none());
        // the node was reused, not purged and reinserted
        assert_eq!(map.table.len(), 1);
        assert!(Tracked::ptr_eq(
            &map.get(&"k").expect("the winner is mapped"),
            &winner
        ));

        assert_eq!(map.put_if_absent("k", Tracked::new(3)).as_deref(), Some(&2));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn equal_key_update_retains_the_stored_key() {
        let map: ConcurrentSoftKeyHashMap<String, u32> =
            ConcurrentSoftKeyHashMap::new().with_soft_capacity(1);
        assert_eq!(map.put(Tracked::new(String::from("a")), 1), None);
        assert_eq!(map.put(Tracked::new(String::from("a")), 2), Some(1));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&String::from("a")), Some(2));
    }
}
