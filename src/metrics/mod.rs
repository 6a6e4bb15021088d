//! Concurrency metrics — per-target statistics and sliding time windows
//!
//! `RequestStats` integrates instantaneous concurrency over time,
//! `TimedBuckets` aggregates its periodic reports into fixed-granularity
//! windows, and `Collector` ties the two together on a ticker. The
//! `DelayWindow` max filter lags scale-down decisions.

pub mod buckets;
pub mod collector;
pub mod delay;
pub mod stats;

pub use buckets::TimedBuckets;
pub use collector::Collector;
pub use delay::DelayWindow;
pub use stats::{RequestStats, StatsReport};
