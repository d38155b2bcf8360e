//! Per-key debouncer (§4.9): the Nth call within `delay` after the first
//! cancels pending older calls for the same key; only the last one fires, at
//! `delay` after the latest call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

/// One generation counter per key. A scheduled action only runs if its
/// generation is still the newest recorded for that key when its delay
/// elapses — any later `schedule` call for the same key bumps the counter
/// and makes earlier-scheduled actions no-ops.
#[derive(Default)]
pub struct Debouncer {
    delay: Duration,
    generations: DashMap<String, Arc<AtomicU64>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self { delay, generations: DashMap::new() }
    }

    /// Schedules `action` to run `delay` from now, unless a newer call for
    /// the same `key` arrives first.
    pub fn schedule<F>(&self, key: String, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let counter = self.generations.entry(key).or_insert_with(|| Arc::new(AtomicU64::new(0))).clone();
        let my_generation = counter.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = self.delay;
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            if counter.load(Ordering::SeqCst) == my_generation {
                action();
            }
        });
    }
}
