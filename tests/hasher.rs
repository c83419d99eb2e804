use refmap::*;
use std::sync::Arc;

fn zero_hash() -> FnStrategy<fn(&u32) -> u64, fn(&u32, &u32) -> bool> {
    FnStrategy::new(|_| 0, |a, b| a == b)
}

#[test]
fn everything_collides() {
    let mut map: WeakValueHashMap<u32, u32, _> = RefHashMap::with_strategy(zero_hash());
    let values: Vec<_> = (0..32).map(Tracked::new).collect();
    for v in &values {
        map.put(**v, v.clone());
    }
    assert_eq!(map.len(), 32);
    for i in 0..32 {
        assert_eq!(map.get(&i).as_deref(), Some(&i));
    }

    // purging picks the reclaimed entry out of a bucket full of others
    let mut values = values;
    let gone = values.remove(17);
    drop(gone);
    assert_eq!(map.len(), 31);
    assert!(map.get(&17).is_none());
    assert_eq!(map.get(&18).as_deref(), Some(&18));
}

#[test]
fn everything_collides_concurrently() {
    let map: Arc<ConcurrentWeakValueHashMap<u32, u32, _>> =
        Arc::new(ConcurrentRefHashMap::with_strategy(zero_hash()));
    let values: Arc<Vec<_>> = Arc::new((0..64).map(Tracked::new).collect());

    let mut handles = Vec::new();
    for t in 0..num_cpus::get().clamp(2, 8) {
        let map = Arc::clone(&map);
        let values = Arc::clone(&values);
        handles.push(std::thread::spawn(move || {
            for v in values.iter().skip(t) {
                map.put(**v, v.clone());
            }
        }));
    }
    for h in handles {
        h.join().expect("failed to join thread");
    }

    assert_eq!(map.len(), 64);
    assert!(map.remove(&3).is_some());
    assert_eq!(map.len(), 63);
    drop(values);
    assert_eq!(map.len(), 0);
}

#[test]
fn case_insensitive_keys() {
    let mut map: WeakKeyHashMap<String, u32, CaseInsensitive> = RefHashMap::new();
    let upper = Tracked::new(String::from("HELLO"));
    let lower = Tracked::new(String::from("hello"));
    map.put(upper.clone(), 1);
    assert_eq!(map.put(lower.clone(), 2), Some(1));
    assert_eq!(map.get(&String::from("HeLLo")), Some(2));
    assert_eq!(map.len(), 1);

    // the first key object is the one kept, so dropping the second changes nothing
    drop(lower);
    assert_eq!(map.len(), 1);
    drop(upper);
    assert_eq!(map.len(), 0);
}

#[test]
fn identity_keys() {
    let mut map: WeakKeyHashMap<String, u32, Identity> = RefHashMap::new();
    let a = Tracked::new(String::from("same"));
    let b = Tracked::new(String::from("same"));
    map.put(a.clone(), 1);
    map.put(b.clone(), 2);
    // equal strings, different objects
    assert_eq!(map.len(), 2);
    assert_eq!(map.get(&*a), Some(1));
    assert_eq!(map.get(&*b), Some(2));
    assert_eq!(map.get(&String::from("same")), None);

    drop(a);
    assert_eq!(map.len(), 1);
    assert_eq!(map.get(&*b), Some(2));
}

#[test]
fn custom_build_hasher() {
    let strategy = Canonical::with_hasher(std::collections::hash_map::RandomState::new());
    let mut map: WeakValueHashMap<u32, u32, _> = RefHashMap::with_strategy(strategy);
    let v = Tracked::new(5);
    map.put(5, v.clone());
    assert_eq!(map.get(&5).as_deref(), Some(&5));
    assert!(map.strategy().equals(&1u32, &1u32));
}
