//! How reclamation shows through the maps: when entries go away, and what can never happen.

use refmap::*;
use std::sync::Arc;

#[test]
fn key_handle_hash_is_stable() {
    let queue = ReclaimQueue::new();
    let strategy = Canonical::<DefaultHashBuilder>::default();
    let key = Tracked::new(String::from("stable"));
    let handle = RefHandle::new(&key, &strategy, &queue);
    let before = handle.hash();
    assert_eq!(before, HashingStrategy::<String>::hash(&strategy, &key));

    drop(key);
    assert!(handle.is_reclaimed());
    assert_eq!(handle.hash(), before);
    let notice = queue.drain().next().expect("a notice for the dead key");
    assert_eq!(notice.hash(), before);
    assert_eq!(notice.side(), Side::Key);
    assert!(notice.is(&handle));
}

#[test]
fn value_handle_carries_the_key_hash() {
    let queue = ReclaimQueue::new();
    let value = Tracked::new(1);
    let handle = RefHandle::for_value(&value, 1234, &queue);
    assert_eq!(handle.hash(), 1234);
    assert_eq!(handle.side(), Side::Value);
    drop(value);
    let notice = queue.drain().next().expect("a notice for the dead value");
    assert_eq!(notice.hash(), 1234);
    assert_eq!(notice.side(), Side::Value);
}

#[test]
fn at_most_one_notice_per_handle() {
    let queue = ReclaimQueue::new();
    let strategy = Canonical::<DefaultHashBuilder>::default();
    let key = Tracked::new(7u32);
    let first = RefHandle::new(&key, &strategy, &queue);
    let second = RefHandle::new(&key, &strategy, &queue);

    drop(key);
    let notices: Vec<_> = queue.drain().collect();
    assert_eq!(notices.len(), 2);
    assert_eq!(notices.iter().filter(|n| n.is(&first)).count(), 1);
    assert_eq!(notices.iter().filter(|n| n.is(&second)).count(), 1);
    assert!(queue.drain().next().is_none());
    assert!(queue.is_empty());
}

#[test]
fn handle_equality() {
    let queue = ReclaimQueue::new();
    let strategy = Canonical::<DefaultHashBuilder>::default();
    let a = Tracked::new(5u32);
    let b = Tracked::new(5u32);
    let ha = RefHandle::new(&a, &strategy, &queue);
    let hb = RefHandle::new(&b, &strategy, &queue);

    // equal referents while both are alive
    assert_eq!(ha, hb);
    assert!(ha.matches(&5, &strategy));

    // identity only once one is gone
    drop(a);
    assert_ne!(ha, hb);
    assert_eq!(ha, ha.clone());
    assert!(!ha.matches(&5, &strategy));
    assert!(hb.matches(&5, &strategy));
}

#[test]
fn dropped_handles_post_nothing() {
    let queue = ReclaimQueue::new();
    let value = Tracked::new(0);
    let handle = RefHandle::for_value(&value, 0, &queue);
    drop(handle);
    drop(value);
    assert!(queue.is_empty());
}

#[test]
fn drain_is_idempotent() {
    let mut map = WeakValueHashMap::<u32, u32>::new();
    let values: Vec<_> = (0..10).map(Tracked::new).collect();
    for v in &values {
        map.put(**v, v.clone());
    }
    drop(values);
    assert_eq!(map.drain_reclaimed(), 10);
    assert_eq!(map.drain_reclaimed(), 0);
    assert_eq!(map.len(), 0);
}

#[test]
fn reclaimed_entry_is_never_resurrected() {
    let mut map = WeakValueHashMap::<&str, u32>::new();
    let old = Tracked::new(1);
    map.put("k", old.clone());
    drop(old);

    // the purge for `old` runs inside this put, and must not touch the new mapping
    let new = Tracked::new(2);
    assert!(map.put("k", new.clone()).is_none());
    assert_eq!(map.get(&"k").as_deref(), Some(&2));
    assert_eq!(map.len(), 1);
}

#[test]
fn late_notice_leaves_a_newer_equal_key_alone() {
    let mut map = WeakKeyHashMap::<String, u32>::new();
    let first = Tracked::new(String::from("k"));
    map.put(first.clone(), 1);
    map.remove(&String::from("k"));

    let second = Tracked::new(String::from("k"));
    map.put(second.clone(), 2);

    // the first key's handle is gone with its entry, so this posts nothing for the map to act on
    drop(first);
    assert_eq!(map.len(), 1);
    assert_eq!(map.get(&String::from("k")), Some(2));
}

#[test]
fn concurrent_late_notice_leaves_a_newer_entry_alone() {
    let map = ConcurrentWeakValueHashMap::<&str, u32>::new();
    let old = Tracked::new(1);
    map.put("k", old.clone());
    let new = Tracked::new(2);
    // the old value's handle can outlive its node until memory is reclaimed, so its notice may
    // still be drained after the mapping has been replaced
    map.put("k", new.clone());
    drop(old);

    assert_eq!(map.len(), 1);
    assert_eq!(map.get(&"k").as_deref(), Some(&2));
}

#[test]
fn lookups_never_return_reclaimed_referents() {
    let map = ConcurrentWeakKeyWeakValueHashMap::<u32, u32>::new();
    let k = Tracked::new(1);
    let v = Tracked::new(10);
    map.put(k.clone(), v.clone());
    drop(v);

    // not yet drained, but already invisible
    assert!(map.get(&1).is_none());
    assert!(map.keys().next().is_none());
    assert!(map.entries().next().is_none());
    assert_eq!(map.drain_reclaimed(), 1);
}

#[test]
fn snapshot_is_unaffected_by_later_changes() {
    let map = ConcurrentWeakValueHashMap::<u32, u32>::new();
    let values: Vec<_> = (0..4).map(Tracked::new).collect();
    for v in &values {
        map.put(**v, v.clone());
    }
    let snapshot = map.entries();
    map.clear();
    drop(values);
    assert_eq!(map.len(), 0);

    let mut seen: Vec<_> = snapshot.map(|(k, v)| (k, *v)).collect();
    seen.sort_unstable();
    assert_eq!(seen, vec![(0, 0), (1, 1), (2, 2), (3, 3)]);
}

#[test]
fn referents_shared_between_maps() {
    let mut a = WeakValueHashMap::<u32, String>::new();
    let b = ConcurrentWeakValueHashMap::<u32, String>::new();
    let v = Tracked::new(String::from("shared"));
    a.put(1, v.clone());
    b.put(2, v.clone());

    drop(v);
    // each map receives its own notice
    assert_eq!(a.len(), 0);
    assert_eq!(b.len(), 0);
}

#[test]
fn notices_are_posted_from_any_thread() {
    let map = Arc::new(ConcurrentWeakValueHashMap::<usize, usize>::new());
    let values: Vec<_> = (0..64).map(Tracked::new).collect();
    for (i, v) in values.iter().enumerate() {
        map.put(i, v.clone());
    }

    let dropper = std::thread::spawn(move || drop(values));
    dropper.join().expect("failed to join thread");
    assert_eq!(map.drain_reclaimed(), 64);
    assert!(map.is_empty());
}

#[test]
fn dropping_the_map_first_is_fine() {
    let v = Tracked::new(3);
    {
        let map = ConcurrentWeakValueHashMap::<u32, u32>::new();
        map.put(1, v.clone());
        let mut local = WeakValueHashMap::<u32, u32>::new();
        local.put(1, v.clone());
    }
    // both queues are gone; this must not post anywhere
    drop(v);
}
