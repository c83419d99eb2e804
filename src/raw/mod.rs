//! The concurrent table backing [`ConcurrentRefHashMap`](crate::ConcurrentRefHashMap).
//!
//! Bins are singly-linked lists of nodes. Readers traverse bins without locking; writers lock the
//! first node of a bin and then check that it is still the first node. A resize copies every bin
//! into a table of twice the size, leaving a `Moved` marker behind so that readers and writers
//! that still hold the old table know to look in the next one.

mod map;

pub(crate) use map::{HashTable, PutResult};

use crate::node::*;
use crate::reclaim::{self, Atomic, LocalGuard, Shared};
use std::sync::atomic::Ordering;

#[derive(Debug)]
pub(crate) struct Table<K, V> {
    bins: Box<[Atomic<BinEntry<K, V>>]>,

    // since a Moved does not contain associated information,
    // one instance is sufficient and shared across all bins in this table
    moved: Atomic<BinEntry<K, V>>,

    // safety: next_table is a valid pointer if it was read as consequence of loading _this_
    // table from `HashTable.table` and reading a BinEntry::Moved while still holding the guard
    // used for that load. a table is only retired once it has been replaced as the current
    // table, and the guard pins everything retired after it was entered.
    next_table: Atomic<Table<K, V>>,
}

impl<K, V> Table<K, V> {
    pub(crate) fn new(bins: usize) -> Self {
        Self {
            bins: (0..bins).map(|_| Atomic::null()).collect(),
            moved: Atomic::from(Shared::boxed(BinEntry::Moved)),
            next_table: Atomic::null(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.bins.len()
    }

    /// Returns this table's forwarding entry, recording `for_table` as where it forwards to.
    pub(crate) fn get_moved<'g>(
        &'g self,
        for_table: Shared<'g, Table<K, V>>,
        guard: &'g LocalGuard<'_>,
    ) -> Shared<'g, BinEntry<K, V>> {
        match self.next_table(guard) {
            t if t.is_null() => {
                if let Err(changed) = self.next_table.compare_exchange(
                    Shared::null(),
                    for_table,
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                    guard,
                ) {
                    assert_eq!(changed.current, for_table);
                }
            }
            t => {
                assert_eq!(t, for_table);
            }
        }
        self.moved.load(Ordering::SeqCst, guard)
    }

    /// Finds the node for `hash` whose key `matches`, starting at the head `bin`.
    pub(crate) fn find<'g, F>(
        &'g self,
        bin: &'g BinEntry<K, V>,
        hash: u64,
        matches: &F,
        guard: &'g LocalGuard<'_>,
    ) -> Option<&'g Node<K, V>>
    where
        F: Fn(&K) -> bool,
    {
        match *bin {
            BinEntry::Node(_) => {
                let mut node = bin;
                loop {
                    let n = node
                        .as_node()
                        .unwrap_or_else(|| unreachable!("BinEntry::Node only points to BinEntry::Node"));

                    if n.hash == hash && matches(&n.key) {
                        return Some(n);
                    }
                    let next = n.next.load(Ordering::SeqCst, guard);
                    if next.is_null() {
                        return None;
                    }
                    // safety: next will only be dropped, if bin are dropped. bin won't be dropped
                    // until the guard is released.
                    node = unsafe { next.deref() };
                }
            }
            BinEntry::Moved => {
                // safety: `self` is a reference to the old table. We got that under the given
                // guard. Since we have not yet dropped that guard, _this_ table has not been
                // reclaimed, and so the _later_ table in `next_table`, _definitely_ hasn't.
                let mut table = unsafe { self.next_table(guard).deref() };

                loop {
                    if table.is_empty() {
                        return None;
                    }
                    let bini = table.bini(hash);
                    let bin = table.bin(bini, guard);
                    if bin.is_null() {
                        return None;
                    }
                    // safety: the table is protected by the guard, and so is the bin.
                    let bin = unsafe { bin.deref() };

                    match *bin {
                        BinEntry::Node(_) => break table.find(bin, hash, matches, guard),
                        BinEntry::Moved => {
                            // safety: same as above.
                            table = unsafe { table.next_table(guard).deref() };
                            continue;
                        }
                    }
                }
            }
        }
    }

    /// Frees every node and value in this table.
    pub(crate) fn drop_bins(&mut self) {
        // we have &mut self _and_ all references we have returned are bound to the lifetime of a
        // guard, which borrows the map, so there cannot be any outstanding references to anything
        // in the table.
        for bin in Vec::from(std::mem::take(&mut self.bins)) {
            let mut p = bin.into_ptr();
            if p.is_null() {
                // bin was never used
                continue;
            }

            // safety: same as above. a shared Moved is freed by `drop`, not here.
            if let BinEntry::Moved = unsafe { &*p } {
                continue;
            }

            while !p.is_null() {
                // safety: we own the bin, and nodes are not shared across the table
                let entry = unsafe { Box::from_raw(p) };
                let BinEntry::Node(node) = *entry else {
                    unreachable!("BinEntry::Node only points to BinEntry::Node");
                };

                // safety: a node's value is always non-null and owned by the node
                drop(unsafe { node.value.into_box() });
                p = node.next.into_ptr();
            }
        }
    }
}

impl<K, V> Drop for Table<K, V> {
    fn drop(&mut self) {
        // nodes are either freed by drop_bins or transferred to a new table, so all bins are
        // empty or point to the shared Moved. it is freed here, independently of whether
        // drop_bins was called.
        let moved = std::mem::replace(&mut self.moved, Atomic::null());
        // safety: `moved` is allocated together with the table and we have mut access to it.
        drop(unsafe { moved.into_box() });

        // NOTE that the current table _is not_ responsible for retiring the _next_ table
    }
}

impl<K, V> Table<K, V> {
    #[inline]
    pub(crate) fn bini(&self, hash: u64) -> usize {
        let mask = self.bins.len() as u64 - 1;
        (hash & mask) as usize
    }

    #[inline]
    pub(crate) fn bin<'g>(
        &'g self,
        i: usize,
        guard: &'g LocalGuard<'_>,
    ) -> Shared<'g, BinEntry<K, V>> {
        self.bins[i].load(Ordering::Acquire, guard)
    }

    #[inline]
    #[allow(clippy::type_complexity)]
    pub(crate) fn cas_bin<'g>(
        &'g self,
        i: usize,
        current: Shared<'_, BinEntry<K, V>>,
        new: Shared<'g, BinEntry<K, V>>,
        guard: &'g LocalGuard<'_>,
    ) -> Result<Shared<'g, BinEntry<K, V>>, reclaim::CompareExchangeError<'g, BinEntry<K, V>>> {
        self.bins[i].compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire, guard)
    }

    #[inline]
    pub(crate) fn store_bin(&self, i: usize, new: Shared<'_, BinEntry<K, V>>) {
        self.bins[i].store(new, Ordering::Release)
    }

    #[inline]
    pub(crate) fn next_table<'g>(&'g self, guard: &'g LocalGuard<'_>) -> Shared<'g, Table<K, V>> {
        self.next_table.load(Ordering::SeqCst, guard)
    }
}
