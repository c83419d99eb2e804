use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};

/// A striped counter.
///
/// An update first tries the shared base once; under contention it falls back to one of several
/// cells, picked per thread, so that concurrent writers mostly touch different cache lines.
#[derive(Debug)]
pub(crate) struct ConcurrentCounter {
    base: AtomicIsize,
    cells: Box<[AtomicIsize]>,
}

impl ConcurrentCounter {
    pub(crate) fn new() -> Self {
        Self {
            base: AtomicIsize::new(0),
            cells: (0..num_cpus::get().next_power_of_two())
                .map(|_| AtomicIsize::new(0))
                .collect(),
        }
    }

    pub(crate) fn add(&self, value: isize) {
        let base = self.base.load(Ordering::SeqCst);
        if self
            .base
            .compare_exchange(base, base + value, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            return;
        }

        let cell = &self.cells[probe() & (self.cells.len() - 1)];
        cell.fetch_add(value, Ordering::SeqCst);
    }

    pub(crate) fn sum(&self, ordering: Ordering) -> isize {
        let sum: isize = self.cells.iter().map(|c| c.load(ordering)).sum();

        self.base.load(ordering) + sum
    }
}

fn probe() -> usize {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    thread_local! {
        static PROBE: usize = NEXT.fetch_add(1, Ordering::Relaxed);
    }
    PROBE.with(|p| *p)
}
