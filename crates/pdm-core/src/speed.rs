//! Process-wide download speed accounting.
//!
//! Jobs only ever add bytes; readers sample a rate over the interval since
//! their previous sample.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

#[derive(Debug)]
pub struct SpeedMeter {
    total: AtomicU64,
    last_sample: Mutex<(Instant, u64)>,
}

impl Default for SpeedMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeedMeter {
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            last_sample: Mutex::new((Instant::now(), 0)),
        }
    }

    pub fn add_bytes(&self, n: u64) {
        self.total.fetch_add(n, Ordering::Relaxed);
    }

    /// Bytes received since the meter was created.
    pub fn total_bytes(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Average rate in bytes per second since the previous call (0 if no time elapsed).
    pub fn sample_bytes_per_sec(&self) -> f64 {
        let now = Instant::now();
        let total = self.total_bytes();
        let mut last = self.last_sample.lock().unwrap_or_else(PoisonError::into_inner);
        let elapsed = now.duration_since(last.0).as_secs_f64();
        let delta = total.saturating_sub(last.1);
        *last = (now, total);
        if elapsed <= 0.0 {
            return 0.0;
        }
        delta as f64 / elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn counts_bytes_and_rate() {
        let meter = SpeedMeter::new();
        meter.add_bytes(1000);
        meter.add_bytes(24);
        assert_eq!(meter.total_bytes(), 1024);
        std::thread::sleep(Duration::from_millis(20));
        let rate = meter.sample_bytes_per_sec();
        assert!(rate > 0.0);
        // Nothing new since the last sample.
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(meter.sample_bytes_per_sec(), 0.0);
    }
}
