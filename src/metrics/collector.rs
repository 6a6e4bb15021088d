//! Periodic drain of request statistics into sliding windows
//!
//! Each target owns one collector. Once activated it ticks at the bucket
//! granularity, reporting the `RequestStats` interval into the stable and
//! panic windows for both average concurrency and request count, until
//! its context is cancelled.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::metrics::{RequestStats, TimedBuckets};

struct Windows {
    concurrency: TimedBuckets,
    concurrency_panic: TimedBuckets,
    request_count: TimedBuckets,
    request_count_panic: TimedBuckets,
}

/// Sliding-window metric collector for one target.
pub struct Collector {
    key: String,
    stats: RequestStats,
    windows: Mutex<Windows>,
    /// Bucket bin size; also the report interval
    granularity: Duration,
}

impl Collector {
    pub fn new(
        key: impl Into<String>,
        stable_window: Duration,
        panic_window: Duration,
        granularity: Duration,
    ) -> Self {
        Self {
            key: key.into(),
            stats: RequestStats::new(),
            windows: Mutex::new(Windows {
                concurrency: TimedBuckets::new(stable_window, granularity),
                concurrency_panic: TimedBuckets::new(panic_window, granularity),
                request_count: TimedBuckets::new(stable_window, granularity),
                request_count_panic: TimedBuckets::new(panic_window, granularity),
            }),
            granularity,
        }
    }

    /// The target key this collector serves.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The request statistics fed by the relay hooks.
    pub fn stats(&self) -> &RequestStats {
        &self.stats
    }

    /// Drain one report interval into all four windows.
    pub fn collect(&self, now: Instant) {
        let report = self.stats.report(now);
        let mut windows = self.windows.lock().unwrap();
        windows.concurrency.record(now, report.average_concurrency);
        windows
            .concurrency_panic
            .record(now, report.average_concurrency);
        windows.request_count.record(now, report.request_count);
        windows
            .request_count_panic
            .record(now, report.request_count);
    }

    /// Stable-window average, panic-window average, and instantaneous
    /// concurrency.
    pub fn stable_and_panic_and_instant_concurrency(&self, now: Instant) -> (f64, f64, f64) {
        let windows = self.windows.lock().unwrap();
        (
            windows.concurrency.window_average(now),
            windows.concurrency_panic.window_average(now),
            self.stats.instant_concurrency(),
        )
    }

    /// Stable- and panic-window request-count averages.
    pub fn stable_and_panic_request_count(&self, now: Instant) -> (f64, f64) {
        let windows = self.windows.lock().unwrap();
        (
            windows.request_count.window_average(now),
            windows.request_count_panic.window_average(now),
        )
    }

    /// Tick forever at the collection granularity until `ctx` ends.
    pub async fn run(&self, ctx: CancellationToken) {
        tracing::debug!(key = %self.key, "Starting collector");
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + self.granularity, self.granularity);
        loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => return,
                _ = ticker.tick() => self.collect(Instant::now()),
            }
        }
    }
}
