use refmap::*;
use std::sync::{Arc, Barrier};

#[test]
fn reclaimed_value_disappears() {
    let mut map = WeakValueHashMap::<&str, Vec<u8>>::new();
    let obj = Tracked::new(vec![1, 2, 3]);
    map.put("a", obj.clone());
    drop(obj);

    assert!(map.get(&"a").is_none());
    assert_eq!(map.len(), 0);
}

#[test]
fn int_keyed_put_returns_previous() {
    let mut map: IntWeakValueHashMap<&str> = IntRefHashMap::new();
    let x = Tracked::new("x");
    let y = Tracked::new("y");
    assert!(map.put(1, x.clone()).is_none());
    assert_eq!(map.get(1).as_deref(), Some(&"x"));
    assert_eq!(map.put(1, y.clone()).as_deref(), Some(&"x"));
    assert_eq!(map.get(1).as_deref(), Some(&"y"));
}

#[test]
fn put_if_absent_has_exactly_one_winner() {
    for _ in 0..64 {
        let map = Arc::new(ConcurrentWeakValueHashMap::<&str, usize>::new());
        let barrier = Arc::new(Barrier::new(2));

        let racers: Vec<_> = (0..2)
            .map(|i| {
                let map = Arc::clone(&map);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let mine = Tracked::new(i);
                    barrier.wait();
                    let seen = map.put_if_absent("k", mine.clone());
                    (mine, seen)
                })
            })
            .collect();
        let results: Vec<_> = racers
            .into_iter()
            .map(|h| h.join().expect("failed to join thread"))
            .collect();

        let winners: Vec<_> = results.iter().filter(|(_, seen)| seen.is_none()).collect();
        assert_eq!(winners.len(), 1);
        let (winner, _) = winners[0];
        let (_, loser_saw) = results
            .iter()
            .find(|(_, seen)| seen.is_some())
            .expect("one loser");
        assert!(Tracked::ptr_eq(
            loser_saw.as_ref().expect("loser saw the winner"),
            winner
        ));
        assert!(Tracked::ptr_eq(
            &map.get(&"k").expect("winner is mapped"),
            winner
        ));
    }
}

#[test]
fn get_or_insert_has_a_single_value() {
    let map = Arc::new(ConcurrentWeakKeyWeakValueHashMap::<String, usize>::new());
    let key = Tracked::new(String::from("k"));
    let n = num_cpus::get().clamp(2, 8);
    let barrier = Arc::new(Barrier::new(n));

    let handles: Vec<_> = (0..n)
        .map(|i| {
            let map = Arc::clone(&map);
            let barrier = Arc::clone(&barrier);
            let key = key.clone();
            std::thread::spawn(move || {
                let mine = Tracked::new(i);
                barrier.wait();
                map.get_or_insert(key, mine)
            })
        })
        .collect();
    let values: Vec<Tracked<usize>> = handles
        .into_iter()
        .map(|h| h.join().expect("failed to join thread"))
        .collect();

    for v in &values[1..] {
        assert!(Tracked::ptr_eq(v, &values[0]));
    }
    assert_eq!(map.len(), 1);
    drop(values);
    assert_eq!(map.len(), 0);
}

#[test]
fn put_if_absent_races_against_reclamation() {
    // a value is dropped while other threads keep trying to claim its key. whoever claims it
    // after the drop must end up mapped, and the map must never hold more than one entry.
    let map = Arc::new(ConcurrentWeakValueHashMap::<u32, usize>::new());
    let n = num_cpus::get().clamp(2, 8);

    for round in 0..32 {
        let first = Tracked::new(usize::MAX);
        assert!(map.put_if_absent(round, first.clone()).is_none());

        let barrier = Arc::new(Barrier::new(n + 1));
        let handles: Vec<_> = (0..n)
            .map(|i| {
                let map = Arc::clone(&map);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let mine = Tracked::new(i);
                    barrier.wait();
                    let got = map.get_or_insert(round, mine);
                    let mapped = map.get(&round);
                    (got, mapped)
                })
            })
            .collect();
        barrier.wait();
        drop(first);

        let results: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("failed to join thread"))
            .collect();
        for (got, mapped) in &results {
            // while a thread holds `got` its value cannot be reclaimed, so if the thread got
            // a new value the map still maps to a live one
            if **got != usize::MAX {
                assert!(mapped.is_some());
            }
        }
        drop(results);
        assert!(map.len() <= 1);
    }
}
