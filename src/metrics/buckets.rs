//! Fixed-granularity ring of time-bucketed accumulators
//!
//! Gives O(1) amortized record and O(buckets) window-average at the cost
//! of granularity-bounded imprecision, with memory bounded independently
//! of request rate.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    /// Epoch (time / granularity) this slot was last written for
    epoch: u64,
    /// Wall time of the most recent write in this epoch
    written: Option<Instant>,
    value: f64,
}

/// A ring of floating-point buckets covering `window` at `granularity`.
#[derive(Debug)]
pub struct TimedBuckets {
    origin: Instant,
    window: Duration,
    granularity: Duration,
    buckets: Vec<Bucket>,
}

impl TimedBuckets {
    /// Create a ring of ⌈window / granularity⌉ buckets.
    ///
    /// # Panics
    ///
    /// Panics when `granularity` is zero or exceeds `window`.
    pub fn new(window: Duration, granularity: Duration) -> Self {
        assert!(!granularity.is_zero(), "granularity must be positive");
        assert!(
            granularity <= window,
            "granularity must not exceed the window"
        );
        let n = window.as_nanos().div_ceil(granularity.as_nanos()) as usize;
        Self {
            origin: Instant::now(),
            window,
            granularity,
            buckets: vec![Bucket::default(); n],
        }
    }

    fn epoch_of(&self, time: Instant) -> u64 {
        let elapsed = time.saturating_duration_since(self.origin);
        (elapsed.as_nanos() / self.granularity.as_nanos()) as u64
    }

    /// Record `value` into the bucket covering `time`. The first write of
    /// an epoch overwrites the slot; later writes in the same epoch add.
    pub fn record(&mut self, time: Instant, value: f64) {
        let epoch = self.epoch_of(time);
        let idx = (epoch % self.buckets.len() as u64) as usize;
        let bucket = &mut self.buckets[idx];
        if bucket.written.is_some() && bucket.epoch == epoch {
            bucket.value += value;
        } else {
            bucket.epoch = epoch;
            bucket.value = value;
        }
        bucket.written = Some(time);
    }

    /// Mean of all buckets whose write-time lies in `(now − window, now]`;
    /// 0 when none do.
    pub fn window_average(&self, now: Instant) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;
        for bucket in &self.buckets {
            let Some(written) = bucket.written else {
                continue;
            };
            if written > now {
                continue;
            }
            if now.saturating_duration_since(written) < self.window {
                sum += bucket.value;
                count += 1;
            }
        }
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    /// Length of the covered window.
    pub fn window(&self) -> Duration {
        self.window
    }
}
