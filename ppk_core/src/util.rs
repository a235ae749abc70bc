//! Common time and counting helpers for ppk_core.
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock time as epoch milliseconds; 0 if the clock is before 1970.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

/// Samples covering `duration_s` at `rate_hz`, rounding half up.
///
/// Negative or non-finite durations yield 0; counts beyond `usize` saturate,
/// so callers that allocate must bound the result.
#[inline]
pub fn sample_count_for(duration_s: f64, rate_hz: u32) -> usize {
    let exact = duration_s * f64::from(rate_hz);
    if !exact.is_finite() || exact <= 0.0 {
        return 0;
    }
    (exact + 0.5).floor() as usize
}
