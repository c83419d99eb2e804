use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rayon::prelude::*;
use refmap::{ConcurrentWeakValueHashMap, IntWeakValueHashMap, Tracked, WeakValueHashMap};

const SIZE: usize = 1000;
const ITER: u64 = 32 * 1024;

fn values(n: usize) -> Vec<Tracked<usize>> {
    (0..n).map(Tracked::new).collect()
}

fn local_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("local_insert");
    group.throughput(Throughput::Elements(SIZE as u64));
    let vs = values(SIZE);

    group.bench_function("weak_value", |b| {
        b.iter(|| {
            let mut map = WeakValueHashMap::<usize, usize>::with_capacity(SIZE);
            for (i, v) in vs.iter().enumerate() {
                map.put(i, v.clone());
            }
            black_box(map)
        })
    });

    group.bench_function("int_weak_value", |b| {
        b.iter(|| {
            let mut map: IntWeakValueHashMap<usize, usize> =
                IntWeakValueHashMap::with_capacity(SIZE);
            for (i, v) in vs.iter().enumerate() {
                map.put(i, v.clone());
            }
            black_box(map)
        })
    });

    group.finish();
}

fn local_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("local_lookup");
    group.throughput(Throughput::Elements(SIZE as u64));
    let vs = values(SIZE);
    let mut map = WeakValueHashMap::<usize, usize>::with_capacity(SIZE);
    for (i, v) in vs.iter().enumerate() {
        map.put(i, v.clone());
    }

    group.bench_function("hit", |b| {
        b.iter(|| {
            for i in 0..SIZE {
                black_box(map.get(&i));
            }
        })
    });
    group.bench_function("miss", |b| {
        b.iter(|| {
            for i in SIZE..2 * SIZE {
                black_box(map.get(&i));
            }
        })
    });

    group.finish();
}

fn local_churn(c: &mut Criterion) {
    // insert values that die immediately, so every put also purges the previous one
    let mut group = c.benchmark_group("local_churn");
    group.throughput(Throughput::Elements(SIZE as u64));

    group.bench_function("put_and_reclaim", |b| {
        let mut map = WeakValueHashMap::<usize, usize>::with_capacity(SIZE);
        b.iter(|| {
            for i in 0..SIZE {
                map.put(i, Tracked::new(i));
            }
            black_box(map.len())
        })
    });

    group.finish();
}

fn task_insert_concurrent(vs: &[Tracked<usize>]) -> ConcurrentWeakValueHashMap<usize, usize> {
    let map = ConcurrentWeakValueHashMap::with_capacity(vs.len());
    vs.par_iter().enumerate().for_each(|(i, v)| {
        map.put(i, v.clone());
    });
    map
}

fn concurrent_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_insert");
    group.throughput(Throughput::Elements(ITER));
    let max = num_cpus::get();
    let vs = values(ITER as usize);

    for threads in 1..=max {
        group.bench_with_input(
            BenchmarkId::from_parameter(threads),
            &threads,
            |b, &threads| {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .unwrap();
                pool.install(|| b.iter(|| task_insert_concurrent(&vs)));
            },
        );
    }

    group.finish();
}

fn concurrent_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_get");
    group.throughput(Throughput::Elements(ITER));
    let max = num_cpus::get();
    let vs = values(ITER as usize);
    let map = task_insert_concurrent(&vs);

    for threads in 1..=max {
        group.bench_with_input(
            BenchmarkId::from_parameter(threads),
            &threads,
            |b, &threads| {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .unwrap();
                pool.install(|| {
                    b.iter(|| {
                        (0..ITER as usize).into_par_iter().for_each(|i| {
                            assert!(map.get(&i).is_some());
                        });
                    })
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    local_insert,
    local_lookup,
    local_churn,
    concurrent_insert,
    concurrent_get
);
criterion_main!(benches);
