use std::sync::{Arc, Barrier, Mutex};

use meshloc::ProcessGroup;

/// A process group made of threads, reducing through shared memory.
pub struct ThreadGroup {
    rank: usize,
    shared: Arc<Shared>,
}

struct Shared {
    barrier: Barrier,
    slots: Mutex<Vec<Vec<f64>>>,
}

impl ThreadGroup {
    /// Creates one group handle per rank, to be moved into the threads.
    pub fn create(size: usize) -> Vec<Self> {
        let shared = Arc::new(Shared {
            barrier: Barrier::new(size),
            slots: Mutex::new(vec![Vec::new(); size]),
        });
        (0..size)
            .map(|rank| Self {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    fn all_reduce(&self, values: &mut [f64], op: fn(f64, f64) -> f64) {
        self.shared.slots.lock().unwrap()[self.rank] = values.to_vec();
        self.shared.barrier.wait();
        {
            let slots = self.shared.slots.lock().unwrap();
            for (i, value) in values.iter_mut().enumerate() {
                *value = slots.iter().map(|slot| slot[i]).fold(*value, op);
            }
        }
        // Nobody overwrites its slot before everybody has read them all
        self.shared.barrier.wait();
    }
}

impl ProcessGroup for ThreadGroup {
    fn size(&self) -> usize {
        self.shared.slots.lock().unwrap().len()
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn all_reduce_min(&self, values: &mut [f64]) {
        self.all_reduce(values, f64::min);
    }

    fn all_reduce_max(&self, values: &mut [f64]) {
        self.all_reduce(values, f64::max);
    }
}
