use crate::reclaim::Atomic;
use parking_lot::Mutex;

/// Entry in a bin.
///
/// Will _generally_ be `Node`. Any entry that is not first in the bin, will be a `Node`.
pub(crate) enum BinEntry<K, V> {
    Node(Node<K, V>),
    /// The bin has been transferred to the table's `next_table`.
    Moved,
}

impl<K, V> BinEntry<K, V> {
    pub(crate) fn as_node(&self) -> Option<&Node<K, V>> {
        if let BinEntry::Node(ref n) = *self {
            Some(n)
        } else {
            None
        }
    }
}

/// Key-value entry.
///
/// The value lives in its own allocation so that it can be swapped, and retired, without
/// touching the node.
pub(crate) struct Node<K, V> {
    pub(crate) hash: u64,
    pub(crate) key: K,
    pub(crate) value: Atomic<V>,
    pub(crate) next: Atomic<BinEntry<K, V>>,
    pub(crate) lock: Mutex<()>,
}

impl<K, V> Node<K, V> {
    pub(crate) fn new(hash: u64, key: K, value: Atomic<V>, next: Atomic<BinEntry<K, V>>) -> Self {
        Self {
            hash,
            key,
            value,
            next,
            lock: Mutex::new(()),
        }
    }
}
