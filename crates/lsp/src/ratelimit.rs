//! Leaky-bucket rate limiter (§5): sized so that analysis consumes at most
//! `target_utilization` of wall clock over a trailing `horizon`. A single
//! mutex-guarded "add, possibly sleep" region serializes utilization
//! accounting across concurrent analyses.

use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Bucket {
    busy_ms: f64,
    last_update: Instant,
}

pub struct RateLimiter {
    capacity_ms: f64,
    target_utilization: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(horizon: Duration, target_utilization: f64) -> Self {
        Self {
            capacity_ms: horizon.as_secs_f64() * 1000.0 * target_utilization,
            target_utilization,
            bucket: Mutex::new(Bucket { busy_ms: 0.0, last_update: Instant::now() }),
        }
    }

    /// Default: 25% of a 30-second horizon, per the LSP service's resource
    /// budget.
    pub fn default_for_lsp() -> Self {
        Self::new(Duration::from_secs(30), 0.25)
    }

    /// Records `elapsed` busy time just spent, leaking the bucket by however
    /// much wall-clock time passed since the last call, then blocks the
    /// caller if the bucket now exceeds capacity — the overflow divided by
    /// the target utilization, so the caller's subsequent idle time restores
    /// the target ratio.
    pub fn record(&self, elapsed: Duration) {
        let mut bucket = self.bucket.lock().expect("rate limiter mutex poisoned");
        let now = Instant::now();
        let leaked = now.duration_since(bucket.last_update).as_secs_f64() * 1000.0 * self.target_utilization;
        bucket.busy_ms = (bucket.busy_ms - leaked).max(0.0);
        bucket.last_update = now;
        bucket.busy_ms += elapsed.as_secs_f64() * 1000.0;

        if bucket.busy_ms > self.capacity_ms {
            let overflow = bucket.busy_ms - self.capacity_ms;
            bucket.busy_ms = self.capacity_ms;
            let sleep_ms = (overflow / self.target_utilization).round().max(0.0) as u64;
            std::thread::sleep(Duration::from_millis(sleep_ms));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn light_load_never_sleeps() {
        let limiter = RateLimiter::new(Duration::from_millis(200), 0.25);
        let start = Instant::now();
        limiter.record(Duration::from_millis(1));
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn heavy_load_forces_a_sleep() {
        let limiter = RateLimiter::new(Duration::from_millis(100), 0.25);
        let start = Instant::now();
        // A single call far exceeding the 25ms capacity must make the
        // caller pay back the overflow before returning.
        limiter.record(Duration::from_millis(200));
        assert!(start.elapsed() >= Duration::from_millis(100));
    }
}
