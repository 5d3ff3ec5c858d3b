//! Sampling side of the daemon. Each accumulator owns its state behind its own lock and is driven
//! by its own [collector::DataCollectionModule] task.

use chrono::Duration;

pub mod activity;
pub mod background;
pub mod collector;
pub mod foreground;
pub mod subject;

/// Rounds to the nearest whole second. Negative durations count as zero.
pub fn whole_seconds(duration: Duration) -> u64 {
    (duration.num_milliseconds().max(0) as u64 + 500) / 1000
}

/// [whole_seconds] for values read back from disk.
pub fn whole_seconds_f64(seconds: f64) -> u64 {
    if !seconds.is_finite() || seconds <= 0. {
        return 0;
    }
    seconds.round() as u64
}

/// Inverse of [whole_seconds] for restored values, keeping sub-second precision.
pub fn from_seconds(seconds: f64) -> Duration {
    if !seconds.is_finite() || seconds <= 0. {
        return Duration::zero();
    }
    Duration::milliseconds((seconds * 1000.).round() as i64)
}
