use super::Table;
use crate::counter::ConcurrentCounter;
use crate::node::{BinEntry, Node};
use crate::reclaim::{Atomic, Collector, LocalGuard, RetireShared, Shared};
use std::fmt;
use std::sync::atomic::{AtomicIsize, Ordering};

/// The largest possible table capacity. Tables stop doubling once they reach it.
const MAXIMUM_CAPACITY: usize = 1 << 30;

/// The default initial table capacity.  Must be a power of 2
/// (i.e., at least 1) and at most `MAXIMUM_CAPACITY`.
const DEFAULT_CAPACITY: usize = 16;

macro_rules! load_factor {
    ($n: expr) => {
        // ¾ n = n - n/4 = n - (n >> 2)
        $n - ($n >> 2)
    };
}

/// The outcome of [`HashTable::put`].
pub(crate) enum PutResult<'g, K, V> {
    Inserted,
    /// The matching node's value was replaced. `key` is the key the node kept; the new key was
    /// dropped.
    Replaced {
        key: &'g K,
        old: &'g V,
    },
    /// `no_replacement` was set and a matching node exists. The rejected key and value are
    /// handed back.
    Exists {
        current: &'g V,
        not_inserted: (K, V),
    },
}

/// A concurrent hash table keyed by precomputed hashes.
///
/// The table never hashes or compares keys itself: every operation is given the hash and a
/// predicate that decides whether a stored key (and value) is the one the caller is after.
pub(crate) struct HashTable<K, V> {
    /// The array of bins. Lazily initialized upon first insertion.
    /// Size is always a power of two. Accessed directly by iterators.
    table: Atomic<Table<K, V>>,

    /// The number of entries, as a striped counter.
    count: ConcurrentCounter,

    /// Table initialization and resizing control.  When negative, the
    /// table is being initialized or resized: -1 for initialization or
    /// resizing. Otherwise, when table is null, holds the initial table
    /// size to use upon creation, or 0 for default. After initialization,
    /// holds the next element count value upon which to resize the table.
    size_ctl: AtomicIsize,

    collector: Collector,
}

unsafe impl<K: Send + Sync, V: Send + Sync> Send for HashTable<K, V> {}
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for HashTable<K, V> {}

impl<K, V> HashTable<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            table: Atomic::null(),
            count: ConcurrentCounter::new(),
            size_ctl: AtomicIsize::new(0),
            collector: Collector::new(),
        }
    }

    /// Creates a table sized to hold `capacity` entries without resizing.
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        if capacity == 0 {
            return Self::new();
        }
        let cap = if capacity >= (MAXIMUM_CAPACITY >> 1) {
            MAXIMUM_CAPACITY
        } else {
            (capacity + (capacity >> 1) + 1).next_power_of_two()
        };
        let table = Self::new();
        table.size_ctl.store(cap as isize, Ordering::SeqCst);
        table
    }

    /// Pins the current thread, keeping everything loaded through the returned guard alive.
    pub(crate) fn guard(&self) -> LocalGuard<'_> {
        self.collector.enter()
    }

    /// An approximation of the number of entries.
    pub(crate) fn len(&self) -> usize {
        let n = self.count.sum(Ordering::Relaxed);
        if n < 0 {
            0
        } else {
            n as usize
        }
    }
}

impl<K, V> HashTable<K, V>
where
    K: Clone,
{
    fn init_table<'g>(&'g self, guard: &'g LocalGuard<'_>) -> Shared<'g, Table<K, V>> {
        loop {
            let table = self.table.load(Ordering::SeqCst, guard);
            // safety: we loaded the table while the thread was pinned, so it won't be reclaimed
            // until the guard is dropped.
            if !table.is_null() && !unsafe { table.deref() }.is_empty() {
                break table;
            }
            // try to allocate the table
            let mut sc = self.size_ctl.load(Ordering::SeqCst);
            if sc < 0 {
                // we lost the initialization race; just spin
                std::thread::yield_now();
                continue;
            }

            if self
                .size_ctl
                .compare_exchange(sc, -1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                // we get to do it!
                let mut table = self.table.load(Ordering::SeqCst, guard);

                // safety: same as above
                if table.is_null() || unsafe { table.deref() }.is_empty() {
                    let n = if sc > 0 {
                        sc as usize
                    } else {
                        DEFAULT_CAPACITY
                    };
                    let new_table = Shared::boxed(Table::new(n));
                    table = new_table;
                    self.table.store(new_table, Ordering::SeqCst);
                    sc = load_factor!(n as isize)
                }
                self.size_ctl.store(sc, Ordering::SeqCst);
                break table;
            }
        }
    }

    /// Returns the key and value of the node for `hash` whose key `matches`.
    pub(crate) fn get<'g, F>(
        &'g self,
        hash: u64,
        matches: F,
        guard: &'g LocalGuard<'_>,
    ) -> Option<(&'g K, &'g V)>
    where
        F: Fn(&K) -> bool,
    {
        let table = self.table.load(Ordering::SeqCst, guard);
        if table.is_null() {
            return None;
        }

        // safety: we loaded the table while the thread was pinned, so it won't be reclaimed
        // until the guard is dropped.
        let table = unsafe { table.deref() };
        if table.is_empty() {
            return None;
        }
        let bini = table.bini(hash);
        let bin = table.bin(bini, guard);
        if bin.is_null() {
            return None;
        }
        // safety: bin is a valid pointer.
        //
        // there are two cases when a bin pointer is invalidated:
        //
        //  1. if the table was resized, bin is a move entry, and the resize has completed. in
        //     that case, the table (and all its heads) will be retired.
        //  2. if the table is being resized, bin may be swapped with a move entry. the old bin
        //     will then be retired.
        //
        // in both cases, we held the guard when we got the reference to the bin. if any such
        // swap happened, it must have happened _after_ we read. since we did the read while
        // the thread was pinned, the value won't be dropped until after we release our guard.
        let node = table.find(unsafe { bin.deref() }, hash, &matches, guard)?;

        let v = node.value.load(Ordering::SeqCst, guard);
        assert!(!v.is_null());
        // safety: the lifetime of the reference is bound to the guard supplied which means that
        // the value will come out of scope before the value gets invalidated.
        Some((&node.key, unsafe { v.deref() }))
    }

    /// Inserts `key` and `value` under `hash`.
    ///
    /// `matches(stored, new)` decides whether a node already holds the key. If one does, its value
    /// is replaced, or, with `no_replacement`, left alone and the pair handed back.
    pub(crate) fn put<'g, F>(
        &'g self,
        hash: u64,
        mut key: K,
        value: V,
        matches: F,
        no_replacement: bool,
        guard: &'g LocalGuard<'_>,
    ) -> PutResult<'g, K, V>
    where
        F: Fn(&K, &K) -> bool,
    {
        let value = Shared::boxed(value);
        let mut table = self.table.load(Ordering::SeqCst, guard);

        loop {
            // safety: see argument below for !is_null case
            if table.is_null() || unsafe { table.deref() }.is_empty() {
                table = self.init_table(guard);
                continue;
            }

            // safety: table is a valid pointer.
            //
            // we are in one of three cases:
            //
            //  1. if table is the one we read before the loop, then we read it while the thread
            //     was pinned, so it won't be reclaimed until after we release the guard.
            //  2. if table is one we read from init_table, then the same argument holds.
            //  3. if table is the value of next_table for a Moved we found, then the table we
            //     read it from was read under our guard, and so is next_table.
            let t = unsafe { table.deref() };

            let bini = t.bini(hash);
            let bin = t.bin(bini, guard);
            if bin.is_null() {
                // fast path -- bin is empty so stick us at the front
                let node = Shared::boxed(BinEntry::Node(Node::new(
                    hash,
                    key,
                    Atomic::from(value),
                    Atomic::null(),
                )));
                match t.cas_bin(bini, bin, node, guard) {
                    Ok(_old_null_ptr) => {
                        self.add_count(1, true, guard);
                        return PutResult::Inserted;
                    }
                    Err(changed) => {
                        assert!(!changed.current.is_null());
                        // safety: the node was never published, so we still own it.
                        let BinEntry::Node(node) = *(unsafe { changed.new.into_box() }) else {
                            unreachable!("we only ever try to insert Nodes");
                        };
                        key = node.key;
                        continue;
                    }
                }
            }

            // slow path -- bin is non-empty
            //
            // safety: bin is a valid pointer (see the argument in `get`).
            let head = match *unsafe { bin.deref() } {
                BinEntry::Moved => {
                    table = t.next_table(guard);
                    continue;
                }
                BinEntry::Node(ref head) => head,
            };

            // fast path -- check first node without acquiring the lock
            if no_replacement && head.hash == hash && matches(&head.key, &key) {
                let current = head.value.load(Ordering::SeqCst, guard);
                // safety: `value` was never published, and `current` is protected by the guard.
                let rejected = *unsafe { value.into_box() };
                return PutResult::Exists {
                    current: unsafe { current.deref() },
                    not_inserted: (key, rejected),
                };
            }

            let head_lock = head.lock.lock();

            // need to check that this is _still_ the head
            let current_head = t.bin(bini, guard);
            if current_head != bin {
                // nope -- try again from the start
                continue;
            }

            // yes, it is still the head, so we can now "own" the bin
            // note that there can still be readers in the bin!
            let mut n = head;
            loop {
                if n.hash == hash && matches(&n.key, &key) {
                    let current = n.value.load(Ordering::SeqCst, guard);
                    if no_replacement {
                        // safety: as above
                        let rejected = *unsafe { value.into_box() };
                        drop(head_lock);
                        return PutResult::Exists {
                            current: unsafe { current.deref() },
                            not_inserted: (key, rejected),
                        };
                    }

                    let now_garbage = n.value.swap(value, Ordering::SeqCst, guard);
                    drop(head_lock);
                    // NOTE: now_garbage == current
                    //
                    // safety: the value is no longer reachable from the table, and readers that
                    // loaded it earlier hold guards that delay its reclamation.
                    unsafe { guard.retire_shared(now_garbage) };
                    return PutResult::Replaced {
                        key: &n.key,
                        old: unsafe { now_garbage.deref() },
                    };
                }

                let next = n.next.load(Ordering::SeqCst, guard);
                if next.is_null() {
                    // we're at the end of the bin -- stick the node here!
                    let node = Shared::boxed(BinEntry::Node(Node::new(
                        hash,
                        key,
                        Atomic::from(value),
                        Atomic::null(),
                    )));
                    n.next.store(node, Ordering::SeqCst);
                    break;
                }
                // safety: next is protected by the guard
                n = unsafe { next.deref() }
                    .as_node()
                    .unwrap_or_else(|| unreachable!("BinEntry::Node only points to BinEntry::Node"));
            }
            drop(head_lock);
            self.add_count(1, true, guard);
            return PutResult::Inserted;
        }
    }

    /// Replaces the value of, or removes, the node for `hash` whose key and value are `select`ed.
    ///
    /// If `new_value` is `None`, the node is removed. Returns the key and old value of the node
    /// that was replaced or removed.
    pub(crate) fn replace_node<'g, F>(
        &'g self,
        hash: u64,
        select: F,
        mut new_value: Option<V>,
        guard: &'g LocalGuard<'_>,
    ) -> Option<(&'g K, &'g V)>
    where
        F: Fn(&K, &V) -> bool,
    {
        let mut table = self.table.load(Ordering::SeqCst, guard);

        loop {
            if table.is_null() {
                break None;
            }

            // safety: table is a valid pointer (see the argument in `put`).
            let t = unsafe { table.deref() };
            if t.is_empty() {
                break None;
            }

            let bini = t.bini(hash);
            let bin = t.bin(bini, guard);
            if bin.is_null() {
                break None;
            }

            // safety: bin is a valid pointer (see the argument in `get`).
            let head = match *unsafe { bin.deref() } {
                BinEntry::Moved => {
                    table = t.next_table(guard);
                    continue;
                }
                BinEntry::Node(ref head) => head,
            };

            let head_lock = head.lock.lock();

            // need to check that this is _still_ the head
            if t.bin(bini, guard) != bin {
                continue;
            }

            let mut e = bin;
            let mut pred: Shared<'_, BinEntry<K, V>> = Shared::null();
            loop {
                // safety: e is protected by the guard, and is a Node (see `find`).
                let n = unsafe { e.deref() }
                    .as_node()
                    .unwrap_or_else(|| unreachable!("BinEntry::Node only points to BinEntry::Node"));
                let next = n.next.load(Ordering::SeqCst, guard);
                let ev = n.value.load(Ordering::SeqCst, guard);
                // safety: values are never null, and ev is protected by the guard.
                let old = unsafe { ev.deref() };

                if n.hash == hash && select(&n.key, old) {
                    match new_value.take() {
                        Some(nv) => {
                            n.value.store(Shared::boxed(nv), Ordering::SeqCst);
                            drop(head_lock);
                            // safety: the old value is no longer reachable, and readers hold
                            // guards.
                            unsafe { guard.retire_shared(ev) };
                        }
                        None => {
                            if pred.is_null() {
                                t.store_bin(bini, next);
                            } else {
                                // safety: pred is protected by the guard, and is a Node.
                                let p = unsafe { pred.deref() }.as_node().unwrap_or_else(|| {
                                    unreachable!("BinEntry::Node only points to BinEntry::Node")
                                });
                                p.next.store(next, Ordering::SeqCst);
                            }
                            drop(head_lock);
                            // safety: the node and its value have been unlinked, and readers
                            // hold guards.
                            unsafe {
                                guard.retire_shared(e);
                                guard.retire_shared(ev);
                            }
                            self.add_count(-1, false, guard);
                        }
                    }
                    return Some((&n.key, old));
                }

                pred = e;
                if next.is_null() {
                    return None;
                }
                e = next;
            }
        }
    }

    /// Removes every entry.
    pub(crate) fn clear(&self, guard: &LocalGuard<'_>) {
        let table = self.table.load(Ordering::SeqCst, guard);
        if table.is_null() {
            return;
        }
        // safety: the table was loaded under the guard
        let t = unsafe { table.deref() };
        let mut delta = 0;
        for i in 0..t.len() {
            delta += self.clear_bin(t, i, guard);
        }
        if delta != 0 {
            self.add_count(-delta, false, guard);
        }
    }

    fn clear_bin<'g>(&'g self, t: &'g Table<K, V>, i: usize, guard: &'g LocalGuard<'_>) -> isize {
        loop {
            let bin = t.bin(i, guard);
            if bin.is_null() {
                return 0;
            }
            // safety: bin is a valid pointer (see the argument in `get`).
            let head = match *unsafe { bin.deref() } {
                BinEntry::Moved => {
                    // safety: see `Table::find`.
                    let next = unsafe { t.next_table(guard).deref() };
                    return self.clear_bin(next, i, guard) + self.clear_bin(next, i + t.len(), guard);
                }
                BinEntry::Node(ref head) => head,
            };

            let head_lock = head.lock.lock();
            if t.bin(i, guard) != bin {
                continue;
            }
            t.store_bin(i, Shared::null());
            drop(head_lock);

            let mut removed = 0;
            let mut e = bin;
            while !e.is_null() {
                // safety: the bin was unlinked while we held its lock, so we are the only ones
                // retiring its nodes. readers hold guards.
                let n = unsafe { e.deref() }
                    .as_node()
                    .unwrap_or_else(|| unreachable!("BinEntry::Node only points to BinEntry::Node"));
                let next = n.next.load(Ordering::SeqCst, guard);
                unsafe {
                    guard.retire_shared(n.value.load(Ordering::SeqCst, guard));
                    guard.retire_shared(e);
                }
                removed += 1;
                e = next;
            }
            return removed;
        }
    }

    /// Calls `f` on every entry present in the table at some point during the traversal.
    pub(crate) fn for_each<'g, F>(&'g self, guard: &'g LocalGuard<'_>, mut f: F)
    where
        F: FnMut(&'g K, &'g V),
    {
        let table = self.table.load(Ordering::SeqCst, guard);
        if table.is_null() {
            return;
        }
        // safety: the table was loaded under the guard
        let t = unsafe { table.deref() };
        for i in 0..t.len() {
            Self::visit_bin(t, i, guard, &mut f);
        }
    }

    fn visit_bin<'g, F>(t: &'g Table<K, V>, i: usize, guard: &'g LocalGuard<'_>, f: &mut F)
    where
        F: FnMut(&'g K, &'g V),
    {
        let mut e = t.bin(i, guard);
        if e.is_null() {
            return;
        }
        // safety: bin is a valid pointer (see the argument in `get`).
        if let BinEntry::Moved = *unsafe { e.deref() } {
            // safety: see `Table::find`.
            let next = unsafe { t.next_table(guard).deref() };
            Self::visit_bin(next, i, guard, f);
            Self::visit_bin(next, i + t.len(), guard, f);
            return;
        }
        while !e.is_null() {
            // safety: e is protected by the guard
            let n = unsafe { e.deref() }
                .as_node()
                .unwrap_or_else(|| unreachable!("BinEntry::Node only points to BinEntry::Node"));
            let v = n.value.load(Ordering::SeqCst, guard);
            // safety: values are never null, and v is protected by the guard.
            f(&n.key, unsafe { v.deref() });
            e = n.next.load(Ordering::SeqCst, guard);
        }
    }

    /// Adds to count, and if `check_resize` is set and the table is now too small, transfers.
    fn add_count(&self, n: isize, check_resize: bool, guard: &LocalGuard<'_>) {
        self.count.add(n);

        if !check_resize {
            return;
        }

        loop {
            let sc = self.size_ctl.load(Ordering::SeqCst);
            let s = self.count.sum(Ordering::SeqCst);
            if s < sc || sc < 0 {
                // not big enough, or somebody else is resizing
                break;
            }
            let table = self.table.load(Ordering::SeqCst, guard);
            if table.is_null() {
                break;
            }
            // safety: the table was loaded under the guard
            let n = unsafe { table.deref() }.len();
            if n >= MAXIMUM_CAPACITY {
                break;
            }

            if self
                .size_ctl
                .compare_exchange(sc, -1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                self.transfer(table, guard);
            }
        }
    }

    /// Moves every node of `table` into a new table of twice the size, then makes the new table
    /// current. The caller must have claimed the resize by setting `size_ctl` to -1.
    fn transfer<'g>(&'g self, table: Shared<'g, Table<K, V>>, guard: &'g LocalGuard<'_>) {
        // safety: table was read while `guard` was held, so it won't be reclaimed.
        let t = unsafe { table.deref() };
        let n = t.len();
        tracing::debug!(from = n, to = n << 1, "resizing");

        let next_table = Shared::boxed(Table::new(n << 1));
        // safety: we just allocated it
        let nt = unsafe { next_table.deref() };

        for i in 0..n {
            loop {
                let bin = t.bin(i, guard);
                if bin.is_null() {
                    if t
                        .cas_bin(i, bin, t.get_moved(next_table, guard), guard)
                        .is_ok()
                    {
                        break;
                    }
                    continue;
                }

                // safety: bin is protected by the guard
                let head = match *unsafe { bin.deref() } {
                    BinEntry::Moved => unreachable!("a bin is only moved by its table's transfer"),
                    BinEntry::Node(ref head) => head,
                };

                let head_lock = head.lock.lock();
                if t.bin(i, guard) != bin {
                    continue;
                }

                // split the bin by the bit that the doubled mask adds. nodes are copied, sharing
                // their value with the original, since readers may still be traversing the old
                // bin.
                let mut low = Shared::null();
                let mut high = Shared::null();
                let mut e = bin;
                while !e.is_null() {
                    // safety: e is protected by the guard
                    let node = unsafe { e.deref() }.as_node().unwrap_or_else(|| {
                        unreachable!("BinEntry::Node only points to BinEntry::Node")
                    });
                    let value = node.value.load(Ordering::SeqCst, guard);
                    let low_half = node.hash & n as u64 == 0;
                    let copy = Shared::boxed(BinEntry::Node(Node::new(
                        node.hash,
                        node.key.clone(),
                        Atomic::from(value),
                        Atomic::from(if low_half { low } else { high }),
                    )));
                    if low_half {
                        low = copy;
                    } else {
                        high = copy;
                    }
                    e = node.next.load(Ordering::SeqCst, guard);
                }
                nt.store_bin(i, low);
                nt.store_bin(i + n, high);
                t.store_bin(i, t.get_moved(next_table, guard));
                drop(head_lock);

                // the old nodes are unreachable from the old table now. their values live on in
                // the copies, so only the nodes themselves are retired.
                let mut e = bin;
                while !e.is_null() {
                    // safety: as above
                    let next = unsafe { e.deref() }
                        .as_node()
                        .map(|node| node.next.load(Ordering::SeqCst, guard))
                        .unwrap_or_else(Shared::null);
                    unsafe { guard.retire_shared(e) };
                    e = next;
                }
                break;
            }
        }

        self.table.store(next_table, Ordering::SeqCst);
        // safety: the old table is no longer the current table, and every bin in it forwards to
        // next_table. threads that still hold it also hold guards.
        unsafe { guard.retire_shared(table) };
        self.size_ctl
            .store(load_factor!((n << 1) as isize), Ordering::SeqCst);
    }
}

impl<K, V> Drop for HashTable<K, V> {
    fn drop(&mut self) {
        // a transfer completes within the operation that started it, so only the current table
        // holds nodes; retired tables and nodes are reclaimed when the collector is dropped.
        let table = std::mem::replace(&mut self.table, Atomic::null()).into_ptr();
        if table.is_null() {
            return;
        }
        // safety: we have &mut self, so no guard into the table can be outstanding.
        let mut table = unsafe { Box::from_raw(table) };
        table.drop_bins();
    }
}

impl<K, V> fmt::Debug for HashTable<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashTable")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
