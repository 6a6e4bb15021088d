//! Max-over-window filter used to lag scale-down decisions
//!
//! Scale-ups pass through immediately (a new maximum is visible as soon
//! as it is recorded); scale-downs only take effect once every slot
//! holding the old maximum has been overwritten, i.e. after the window
//! has fully elapsed. Do not construct one when the delay is zero: a
//! single-slot window is almost, but not exactly, a pass-through, since
//! two records in the same interval keep the larger value rather than
//! the most recent.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    epoch: u64,
    value: usize,
}

/// Fixed-size max-over-window filter over replica counts.
#[derive(Debug)]
pub struct DelayWindow {
    origin: Instant,
    granularity: Duration,
    slots: Vec<Slot>,
}

impl DelayWindow {
    /// Create a window of ⌈window / granularity⌉ ≥ 1 slots.
    ///
    /// # Panics
    ///
    /// Panics when `granularity` or `window` is zero.
    pub fn new(window: Duration, granularity: Duration) -> Self {
        assert!(!granularity.is_zero(), "granularity must be positive");
        assert!(!window.is_zero(), "window must be positive");
        let n = window.as_nanos().div_ceil(granularity.as_nanos()).max(1) as usize;
        Self {
            origin: Instant::now(),
            granularity,
            slots: vec![Slot::default(); n],
        }
    }

    /// Record `value` into the slot covering `time`, keeping the maximum
    /// seen in that slot for its epoch.
    pub fn record(&mut self, time: Instant, value: usize) {
        let elapsed = time.saturating_duration_since(self.origin);
        let epoch = (elapsed.as_nanos() / self.granularity.as_nanos()) as u64;
        let idx = (epoch % self.slots.len() as u64) as usize;
        let slot = &mut self.slots[idx];
        if slot.epoch == epoch {
            slot.value = slot.value.max(value);
        } else {
            slot.epoch = epoch;
            slot.value = value;
        }
    }

    /// Maximum of all currently-held slots. Slots are refreshed on every
    /// record cycle, so stale values roll off as their index is reused.
    pub fn current(&self) -> usize {
        self.slots.iter().map(|s| s.value).max().unwrap_or(0)
    }
}
