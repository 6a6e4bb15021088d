//! Per-target concurrency statistics
//!
//! Tracks instantaneous concurrency and its time integral between
//! reports. All operations are linearizable under the stats' own mutex
//! and hold it only for arithmetic, so the relay hooks stay non-blocking.

use std::sync::Mutex;
use std::time::Instant;

/// A drained report covering the interval since the previous report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsReport {
    /// Time-weighted average concurrency over the interval; 0 when no
    /// time has elapsed
    pub average_concurrency: f64,
    /// Requests admitted during the interval
    pub request_count: f64,
}

#[derive(Debug, Default)]
struct StatsInner {
    concurrency: f64,
    concurrency_integral: f64,
    request_count: f64,
    last_change: Option<Instant>,
    seconds_in_use: f64,
}

impl StatsInner {
    /// Advance the integral to `now`.
    fn advance(&mut self, now: Instant) {
        let Some(last) = self.last_change else {
            self.last_change = Some(now);
            return;
        };
        let since = now.saturating_duration_since(last);
        if since.is_zero() {
            return;
        }
        let secs = since.as_secs_f64();
        self.seconds_in_use += secs;
        self.concurrency_integral += self.concurrency * secs;
        self.last_change = Some(now);
    }

    fn reset(&mut self) {
        self.concurrency_integral = 0.0;
        self.request_count = 0.0;
        self.seconds_in_use = 0.0;
    }
}

/// Concurrency tracker for one target.
#[derive(Debug, Default)]
pub struct RequestStats {
    inner: Mutex<StatsInner>,
}

impl RequestStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request entering the target. Returns the new concurrency.
    pub fn req_in(&self, now: Instant) -> f64 {
        let mut inner = self.inner.lock().unwrap();
        inner.advance(now);
        inner.concurrency += 1.0;
        inner.request_count += 1.0;
        inner.concurrency
    }

    /// Record a request leaving the target. Returns the new concurrency.
    ///
    /// # Panics
    ///
    /// A `req_out` without a matching prior `req_in` is a programming
    /// error and panics.
    pub fn req_out(&self, now: Instant) -> f64 {
        let mut inner = self.inner.lock().unwrap();
        inner.advance(now);
        inner.concurrency -= 1.0;
        assert!(
            inner.concurrency >= 0.0,
            "concurrency underflow: req_out without matching req_in"
        );
        inner.concurrency
    }

    /// Drain the interval since the last report and reset the integral.
    pub fn report(&self, now: Instant) -> StatsReport {
        let mut inner = self.inner.lock().unwrap();
        inner.advance(now);
        let report = StatsReport {
            average_concurrency: if inner.seconds_in_use > 0.0 {
                inner.concurrency_integral / inner.seconds_in_use
            } else {
                0.0
            },
            request_count: inner.request_count,
        };
        inner.reset();
        report
    }

    /// Current concurrency; no side effects.
    pub fn instant_concurrency(&self) -> f64 {
        self.inner.lock().unwrap().concurrency
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_req_in_out_returns_concurrency() {
        let stats = RequestStats::new();
        let t0 = Instant::now();
        assert_eq!(stats.req_in(t0), 1.0);
        assert_eq!(stats.req_in(t0), 2.0);
        assert_eq!(stats.req_out(t0), 1.0);
        assert_eq!(stats.req_out(t0), 0.0);
    }

    #[test]
    fn test_concurrency_conservation() {
        let stats = RequestStats::new();
        let t0 = Instant::now();
        for _ in 0..10 {
            stats.req_in(t0);
        }
        for _ in 0..4 {
            stats.req_out(t0);
        }
        assert_eq!(stats.instant_concurrency(), 6.0);
    }

    #[test]
    #[should_panic(expected = "concurrency underflow")]
    fn test_req_out_without_req_in_panics() {
        let stats = RequestStats::new();
        stats.req_out(Instant::now());
    }

    #[test]
    fn test_report_average_concurrency() {
        let stats = RequestStats::new();
        let t0 = Instant::now();
        // Concurrency 2 for 1s, then 1 for 1s: integral = 3, avg = 1.5
        stats.req_in(t0);
        stats.req_in(t0);
        stats.req_out(t0 + Duration::from_secs(1));
        let report = stats.report(t0 + Duration::from_secs(2));
        assert!((report.average_concurrency - 1.5).abs() < 1e-9);
        assert_eq!(report.request_count, 2.0);
    }

    #[test]
    fn test_report_zero_elapsed() {
        let stats = RequestStats::new();
        let t0 = Instant::now();
        stats.req_in(t0);
        // Same instant: no seconds in use yet.
        let report = stats.report(t0);
        assert_eq!(report.average_concurrency, 0.0);
        assert_eq!(report.request_count, 1.0);
    }

    #[test]
    fn test_report_resets_interval() {
        let stats = RequestStats::new();
        let t0 = Instant::now();
        stats.req_in(t0);
        let _ = stats.report(t0 + Duration::from_secs(1));

        // Second interval: concurrency stays 1 for 2s, count resets.
        let report = stats.report(t0 + Duration::from_secs(3));
        assert!((report.average_concurrency - 1.0).abs() < 1e-9);
        assert_eq!(report.request_count, 0.0);
    }

    #[test]
    fn test_instant_concurrency_no_side_effects() {
        let stats = RequestStats::new();
        let t0 = Instant::now();
        stats.req_in(t0);
        assert_eq!(stats.instant_concurrency(), 1.0);
        assert_eq!(stats.instant_concurrency(), 1.0);
        let report = stats.report(t0 + Duration::from_secs(1));
        assert!((report.average_concurrency - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_round_trip_back_to_initial() {
        let stats = RequestStats::new();
        let t0 = Instant::now();
        let _ = stats.report(t0);

        // Up to 3, back to 0, drain the interval.
        for _ in 0..3 {
            stats.req_in(t0 + Duration::from_millis(10));
        }
        for _ in 0..3 {
            stats.req_out(t0 + Duration::from_millis(20));
        }
        let _ = stats.report(t0 + Duration::from_millis(30));

        // Post-report state matches the initial post-report state.
        assert_eq!(stats.instant_concurrency(), 0.0);
        let report = stats.report(t0 + Duration::from_millis(40));
        assert_eq!(report.average_concurrency, 0.0);
        assert_eq!(report.request_count, 0.0);
    }

    #[test]
    fn test_non_monotonic_now_is_ignored() {
        let stats = RequestStats::new();
        let t0 = Instant::now();
        stats.req_in(t0 + Duration::from_secs(1));
        // An earlier `now` must not produce a negative interval.
        stats.req_out(t0);
        let report = stats.report(t0 + Duration::from_secs(1));
        assert!(report.average_concurrency >= 0.0);
    }
}
