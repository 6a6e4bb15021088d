//! Scaling deciders — per-target desired-replica computation
//!
//! A decider owns its target's metric collector and turns the observed
//! stable/panic/instant concurrency into a desired replica count.
//! Reconcile calls for one key are serialized by the autoscaler's work
//! queue; observers read the last decision through an atomic.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::KpaConfig;
use crate::metrics::{Collector, DelayWindow};
use crate::workload::{Request, Response};

/// Per-target scaling decision capability.
pub trait Decider: Send + Sync {
    /// Record a request entering; returns the instant concurrency.
    fn req_in(&self, req: &Request) -> f64;

    /// Record a request leaving; returns the instant concurrency.
    fn req_out(&self, res: &Response) -> f64;

    /// Start the decider's collector exactly once. Returns true on the
    /// activating call, false on every later call.
    fn activate(&self, ctx: &CancellationToken) -> bool;

    /// Compute the desired replica count given the current ready count.
    fn reconcile(&self, now: Instant, current_ready: usize) -> usize;

    /// The last computed desired replica count.
    fn desired(&self) -> usize;
}

/// Mutable decision state, touched only by the worker that owns this
/// key's reconciliation.
struct DecisionState {
    /// Set while in panic mode; refreshed while over threshold
    panic_start: Option<Instant>,
    /// Scale-down floor while panicking
    max_panic_replicas: usize,
    /// Lags downscale decisions; absent when the delay is zero
    delay_window: Option<DelayWindow>,
}

/// Knative-Pod-Autoscaler-style decider.
pub struct KpaDecider {
    key: String,
    collector: Arc<Collector>,
    active: AtomicBool,

    target_value: f64,
    max_scale_up_rate: f64,
    max_scale_down_rate: f64,
    stable_window: Duration,
    panic_threshold: f64,

    state: Mutex<DecisionState>,
    desired: AtomicUsize,
}

/// Bucket granularity for the collector; also its report cadence.
const COLLECT_GRANULARITY: Duration = Duration::from_secs(1);

impl KpaDecider {
    pub fn new(key: impl Into<String>, cfg: &KpaConfig) -> Self {
        let key = key.into();
        let delay = cfg.scale_down_delay();
        Self {
            collector: Arc::new(Collector::new(
                key.clone(),
                cfg.stable_window(),
                cfg.panic_window(),
                COLLECT_GRANULARITY,
            )),
            key,
            active: AtomicBool::new(false),
            target_value: cfg.target_concurrency,
            max_scale_up_rate: cfg.max_scale_up_rate,
            max_scale_down_rate: cfg.max_scale_down_rate,
            stable_window: cfg.stable_window(),
            panic_threshold: cfg.panic_threshold(),
            state: Mutex::new(DecisionState {
                panic_start: None,
                max_panic_replicas: 0,
                delay_window: (!delay.is_zero())
                    .then(|| DelayWindow::new(delay, cfg.tick_interval())),
            }),
            desired: AtomicUsize::new(0),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The collector feeding this decider; exposed for tests that drive
    /// window contents directly.
    pub fn collector(&self) -> &Arc<Collector> {
        &self.collector
    }

    /// Whether the decider is currently in panic mode.
    pub fn panicking(&self) -> bool {
        self.state.lock().unwrap().panic_start.is_some()
    }
}

impl Decider for KpaDecider {
    fn req_in(&self, _req: &Request) -> f64 {
        self.collector.stats().req_in(Instant::now())
    }

    fn req_out(&self, _res: &Response) -> f64 {
        self.collector.stats().req_out(Instant::now())
    }

    fn activate(&self, ctx: &CancellationToken) -> bool {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        tracing::debug!(key = %self.key, "Starting KPA decider");
        let collector = self.collector.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move { collector.run(ctx).await });
        true
    }

    fn reconcile(&self, now: Instant, current_ready: usize) -> usize {
        let (stable, panic, instant) = self
            .collector
            .stable_and_panic_and_instant_concurrency(now);

        let scaling_from_zero = current_ready == 0;
        // Use 1 if 0, otherwise the scale up/down rates won't work.
        let effective_ready = current_ready.max(1) as f64;

        let mut upper = (self.max_scale_up_rate * effective_ready).ceil();
        let mut lower = (effective_ready / self.max_scale_down_rate).floor();
        if scaling_from_zero && instant > 0.0 {
            // Ensure at least one pod while traffic is in flight.
            upper = upper.max(1.0);
            lower = lower.max(1.0);
        }

        let dspc = (stable / self.target_value).ceil();
        let dppc = (panic / self.target_value).ceil();

        let desired_stable = dspc.clamp(lower, upper) as usize;
        let desired_panic = dppc.clamp(lower, upper) as usize;

        let over_threshold = dppc / effective_ready >= self.panic_threshold;

        let mut state = self.state.lock().unwrap();
        match state.panic_start {
            None if over_threshold => {
                tracing::debug!(key = %self.key, "entering panic mode");
                state.panic_start = Some(now);
            }
            Some(_) if over_threshold => {
                // Still over threshold: extend the panic window.
                state.panic_start = Some(now);
            }
            Some(start)
                if !over_threshold && now >= start + self.stable_window =>
            {
                // The surge has made its way into the stable metric.
                tracing::debug!(key = %self.key, "exiting panic mode");
                state.panic_start = None;
                state.max_panic_replicas = 0;
            }
            _ => {}
        }

        let mut desired = desired_stable;
        if state.panic_start.is_some() {
            // The stable metric can exceed the panic one in edge cases;
            // provision for the larger of the two.
            let candidate = desired_stable.max(desired_panic);
            if candidate > state.max_panic_replicas {
                tracing::debug!(
                    key = %self.key,
                    from = state.max_panic_replicas,
                    to = candidate,
                    "raising panic-mode replica floor"
                );
                state.max_panic_replicas = candidate;
            } else if candidate < state.max_panic_replicas {
                tracing::debug!(
                    key = %self.key,
                    want = candidate,
                    keep = state.max_panic_replicas,
                    "holding scale down in panic mode"
                );
            }
            desired = state.max_panic_replicas;
        }

        if let Some(window) = state.delay_window.as_mut() {
            window.record(now, desired);
            let delayed = window.current();
            if delayed != desired {
                tracing::debug!(
                    key = %self.key,
                    want = desired,
                    staying = delayed,
                    "delaying scale down"
                );
                desired = delayed;
            }
        }

        tracing::trace!(
            key = %self.key,
            stable, panic, instant,
            current = current_ready,
            desired,
            range = ?(lower, upper),
            "reconciled"
        );

        self.desired.store(desired, Ordering::SeqCst);
        desired
    }

    fn desired(&self) -> usize {
        self.desired.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    /// Target 1, up 10x, down 2x, stable 60s, panic 6s, threshold
    /// 2.0, no delay, tick 1s.
    fn test_config() -> KpaConfig {
        KpaConfig {
            target_concurrency: 1.0,
            max_scale_up_rate: 10.0,
            max_scale_down_rate: 2.0,
            stable_window_seconds: 60.0,
            panic_window_percentage: 10.0,
            panic_threshold_percentage: 200.0,
            scale_down_delay_seconds: 0,
            tick_interval_seconds: 1,
            ..KpaConfig::default()
        }
    }

    /// Hold concurrency `value` for one bucket ending at `t + 1s` and
    /// collect it, returning that instant.
    fn feed_one_bucket(decider: &KpaDecider, value: f64, t: Instant) -> Instant {
        for _ in 0..value as usize {
            decider.collector().stats().req_in(t);
        }
        let now = t + secs(1);
        for _ in 0..value as usize {
            decider.collector().stats().req_out(now);
        }
        decider.collector().collect(now);
        now
    }

    /// Fill the stable window with 54 buckets of `stable_fill` followed
    /// by 6 buckets of `fresh`, so the panic window (6 buckets) reads
    /// `fresh` while the stable window reads the blend.
    fn feed_windows(decider: &KpaDecider, stable_fill: f64, fresh: f64, t0: Instant) -> Instant {
        let mut t = t0;
        // 54 old buckets visible only to the stable window.
        for _ in 0..54 {
            t = feed_one_bucket(decider, stable_fill, t);
        }
        // 6 fresh buckets visible to both.
        for _ in 0..6 {
            t = feed_one_bucket(decider, fresh, t);
        }
        t
    }

    #[test]
    fn test_panic_entry() {
        // A fresh spike pushes the panic window over threshold
        // while the stable window still reads low.
        let decider = KpaDecider::new("default/hello", &test_config());
        let mut t = Instant::now();
        t = feed_one_bucket(&decider, 1.0, t);
        let (stable, _, _) = decider
            .collector()
            .stable_and_panic_and_instant_concurrency(t);
        assert!((stable - 1.0).abs() < 1e-9);

        // Spike of 3.0: both windows now average (1 + 3) / 2 = 2.
        t = feed_one_bucket(&decider, 3.0, t);
        let desired = decider.reconcile(t, 1);
        // dppc = 2, over = 2/1 ≥ 2.0 → enter panic; desired = max(2, 2).
        assert!(decider.panicking());
        assert_eq!(desired, 2);
    }

    #[test]
    fn test_panic_entry_literal() {
        // Panic window isolated: panic=3 while only old 1.0
        // buckets fill the stable window.
        let decider = KpaDecider::new("default/hello", &test_config());
        let mut t = Instant::now();
        for _ in 0..59 {
            t = feed_one_bucket(&decider, 1.0, t);
        }
        // Hold concurrency 3 for one bucket, then advance `now` until
        // the spike is the only bucket left inside the panic window.
        for _ in 0..3 {
            decider.collector().stats().req_in(t);
        }
        let spike_end = t + secs(1);
        for _ in 0..3 {
            decider.collector().stats().req_out(spike_end);
        }
        decider.collector().collect(spike_end);
        let now = spike_end + secs(5);
        let (_, panic, _) = decider
            .collector()
            .stable_and_panic_and_instant_concurrency(now);
        assert!((panic - 3.0).abs() < 1e-9);

        let desired = decider.reconcile(now, 1);
        // dppc = 3, over = 3/1 ≥ 2.0 → panic; desired = max(dspc, 3) = 3.
        assert!(decider.panicking());
        assert_eq!(desired, 3);
    }

    #[test]
    fn test_panic_floor_holds() {
        // After reaching 3 in panic, decaying load keeps 3.
        let decider = KpaDecider::new("default/hello", &test_config());
        let t0 = Instant::now();
        let t = feed_windows(&decider, 0.0, 3.0, t0);
        let desired = decider.reconcile(t, 1);
        assert!(decider.panicking());
        assert_eq!(desired, 3);

        // Panic window decays to 1.0 while the stable window still holds
        // the surge; candidate max(dspc, dppc) ≤ 3 keeps the floor.
        let mut t = t;
        for _ in 0..6 {
            t = feed_one_bucket(&decider, 1.0, t);
        }
        let desired = decider.reconcile(t, 3);
        assert!(decider.panicking());
        assert_eq!(desired, 3);
    }

    #[test]
    fn test_panic_monotone_desired() {
        // While panicking the desired sequence never decreases.
        let decider = KpaDecider::new("default/hello", &test_config());
        let mut t = Instant::now();
        t = feed_windows(&decider, 0.0, 4.0, t);
        let mut last = decider.reconcile(t, 1);
        assert!(decider.panicking());
        for fill in [3.0, 2.0, 5.0, 1.0] {
            t = feed_one_bucket(&decider, fill, t);
            let desired = decider.reconcile(t, last);
            if decider.panicking() {
                assert!(desired >= last, "panic desired decreased: {} < {}", desired, last);
            }
            last = desired;
        }
    }

    #[test]
    fn test_panic_exit_after_stable_window() {
        // Quiet traffic for a stable window past the last
        // over-threshold tick clears panic state.
        let decider = KpaDecider::new("default/hello", &test_config());
        let mut t = Instant::now();
        t = feed_windows(&decider, 0.0, 4.0, t);
        assert!(decider.reconcile(t, 1) >= 4);
        assert!(decider.panicking());

        // 61 quiet ticks: dppc falls under threshold and the stable
        // window elapses after the last refresh.
        let mut desired = 0;
        for _ in 0..61 {
            t = feed_one_bucket(&decider, 1.0, t);
            desired = decider.reconcile(t, 4);
        }
        assert!(!decider.panicking());
        // Back in stable mode the decider follows the stable window
        // (bounded below by the scale-down rate).
        assert!(desired <= 2);
        let state = decider.state.lock().unwrap();
        assert_eq!(state.max_panic_replicas, 0);
    }

    #[test]
    fn test_scale_from_zero_kick() {
        // Zero ready, zero windows, but traffic in flight clamps the
        // bounds to at least one pod.
        let decider = KpaDecider::new("default/hello", &test_config());
        let t0 = Instant::now();
        decider.collector().stats().req_in(t0);
        let desired = decider.reconcile(t0 + Duration::from_millis(500), 0);
        assert_eq!(desired, 1);
    }

    #[test]
    fn test_scale_from_zero_no_traffic_stays_zero() {
        let decider = KpaDecider::new("default/hello", &test_config());
        let desired = decider.reconcile(Instant::now(), 0);
        assert_eq!(desired, 0);
    }

    #[test]
    fn test_rate_bounds_respected() {
        // Desired stays within the per-tick rate caps.
        let decider = KpaDecider::new("default/hello", &test_config());
        let mut t = Instant::now();
        t = feed_windows(&decider, 100.0, 100.0, t);
        for ready in [1usize, 4, 10, 64] {
            let desired = decider.reconcile(t, ready);
            let upper = (10.0 * ready as f64).ceil() as usize;
            let lower = (ready as f64 / 2.0).floor() as usize;
            assert!(desired >= lower && desired <= upper);
            t = feed_one_bucket(&decider, 100.0, t);
        }
    }

    #[test]
    fn test_scale_down_bounded_by_rate() {
        let decider = KpaDecider::new("default/hello", &test_config());
        let mut t = Instant::now();
        // Windows at zero, 10 ready: lower bound = floor(10/2) = 5.
        t = feed_one_bucket(&decider, 0.0, t);
        let desired = decider.reconcile(t, 10);
        assert_eq!(desired, 5);
    }

    #[test]
    fn test_scale_down_delay_lags_decrease() {
        // Short stable window so load drops show up fast; 10-tick delay.
        let cfg = KpaConfig {
            stable_window_seconds: 6.0,
            panic_window_percentage: 100.0,
            scale_down_delay_seconds: 10,
            ..test_config()
        };
        let decider = KpaDecider::new("default/hello", &cfg);
        let mut t = Instant::now();
        for _ in 0..6 {
            t = feed_one_bucket(&decider, 6.0, t);
        }
        assert_eq!(decider.reconcile(t, 6), 6);

        // Load vanishes: the undelayed decision falls to the rate-bound
        // floor of 3, but the delay window holds 6.
        for _ in 0..3 {
            t = feed_one_bucket(&decider, 0.0, t);
        }
        assert_eq!(decider.reconcile(t, 6), 6, "scale down must be delayed");

        // Once the delay window rolls past the old maximum, the decrease
        // is applied.
        let mut desired = 6;
        for _ in 0..11 {
            t = feed_one_bucket(&decider, 0.0, t);
            desired = decider.reconcile(t, 6);
        }
        assert_eq!(desired, 3);
    }

    #[test]
    fn test_desired_observable() {
        let decider = KpaDecider::new("default/hello", &test_config());
        assert_eq!(decider.desired(), 0);
        let mut t = Instant::now();
        t = feed_one_bucket(&decider, 5.0, t);
        let desired = decider.reconcile(t, 1);
        assert_eq!(decider.desired(), desired);
    }

    #[tokio::test]
    async fn test_activate_exactly_once() {
        let decider = KpaDecider::new("default/hello", &test_config());
        let ctx = CancellationToken::new();
        assert!(decider.activate(&ctx));
        assert!(!decider.activate(&ctx));
        assert!(!decider.activate(&ctx));
        ctx.cancel();
    }
}
