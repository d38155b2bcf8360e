//! `analyzeCache` (§4.9, §5): request coalescing so concurrent
//! invalidate/get pairs do not start two analyses for the same repository.
//! A request arriving while one is already in flight receives that run's
//! result if its invalidation predates the run's start; otherwise it waits
//! for the *next* run.

use std::sync::{Arc, Condvar, Mutex};

use dashmap::DashMap;

use iccheck_core::{CloneSet, Result};

#[derive(Default)]
struct Slot {
    /// Bumped on every `invalidate`; a request captures this at entry as
    /// the version it needs a result "as of".
    version: u64,
    /// The version an in-flight computation was started to satisfy, if any.
    computing_version: Option<u64>,
    /// The version the most recently completed computation covers.
    completed_version: Option<u64>,
    result: Option<Arc<Vec<CloneSet>>>,
}

type SlotHandle = Arc<(Mutex<Slot>, Condvar)>;

#[derive(Default)]
pub struct AnalyzeCache {
    slots: DashMap<String, SlotHandle>,
}

impl AnalyzeCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot_for(&self, key: &str) -> SlotHandle {
        self.slots.entry(key.to_string()).or_insert_with(|| Arc::new((Mutex::new(Slot::default()), Condvar::new()))).clone()
    }

    /// Bumps the invalidation version for `key`, so the next `get_or_compute`
    /// call for it will not be satisfied by a computation that started
    /// before this call.
    pub fn invalidate(&self, key: &str) {
        let handle = self.slot_for(key);
        let mut slot = handle.0.lock().expect("analyze cache mutex poisoned");
        slot.version += 1;
    }

    /// Coalesced get: runs `compute` at most once per distinct invalidation
    /// version, regardless of how many callers ask concurrently.
    pub fn get_or_compute<F>(&self, key: &str, compute: F) -> Result<Arc<Vec<CloneSet>>>
    where
        F: FnOnce() -> Result<Vec<CloneSet>>,
    {
        let handle = self.slot_for(key);
        let (mutex, condvar) = &*handle;
        let mut slot = mutex.lock().expect("analyze cache mutex poisoned");
        let my_version = slot.version;

        loop {
            if slot.completed_version.is_some_and(|v| v >= my_version) {
                return Ok(slot.result.clone().expect("completed_version implies a result"));
            }
            if slot.computing_version.is_some() {
                slot = condvar.wait(slot).expect("analyze cache condvar poisoned");
                continue;
            }
            slot.computing_version = Some(slot.version.max(my_version));
            let computing_for = slot.computing_version.unwrap();
            drop(slot);

            let computed = compute();

            slot = mutex.lock().expect("analyze cache mutex poisoned");
            slot.computing_version = None;
            match computed {
                Ok(sets) => {
                    let sets = Arc::new(sets);
                    slot.result = Some(sets.clone());
                    slot.completed_version = Some(computing_for);
                    condvar.notify_all();
                    if computing_for >= my_version {
                        return Ok(sets);
                    }
                    // A concurrent invalidate raced in after we captured
                    // `computing_for`; loop to compute again for the newer
                    // version this caller actually needs.
                }
                Err(e) => {
                    condvar.notify_all();
                    return Err(e);
                }
            }
        }
    }
}
