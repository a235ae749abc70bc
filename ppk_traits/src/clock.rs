use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Monotonic time source used by the acquisition engine for read deadlines,
/// retry backoff and capture windows.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);

    /// Time elapsed since `epoch`, saturating at zero.
    fn since(&self, epoch: Instant) -> Duration {
        self.now().saturating_duration_since(epoch)
    }

    /// True once `deadline` has been reached.
    fn is_past(&self, deadline: Instant) -> bool {
        self.now() >= deadline
    }
}

/// Wall-clock backed implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        thread::sleep(d);
    }
}

/// Deterministic clock for tests and offline replay.
///
/// `sleep(d)` advances the clock by `d` instantly and records the request, so
/// backoff schedules can be asserted without waiting for them.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    inner: Arc<Mutex<ManualState>>,
}

#[derive(Debug, Default)]
struct ManualState {
    offset: Duration,
    sleeps: Vec<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            inner: Arc::new(Mutex::new(ManualState::default())),
        }
    }

    /// Move time forward without recording a sleep.
    pub fn advance(&self, d: Duration) {
        if let Ok(mut st) = self.inner.lock() {
            st.offset = st.offset.saturating_add(d);
        }
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.inner
            .lock()
            .map(|st| st.sleeps.clone())
            .unwrap_or_default()
    }

    /// Sum of all recorded sleeps.
    pub fn total_slept(&self) -> Duration {
        self.sleeps().into_iter().sum()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let off = self
            .inner
            .lock()
            .map(|st| st.offset)
            .unwrap_or(Duration::ZERO);
        self.origin + off
    }

    fn sleep(&self, d: Duration) {
        if let Ok(mut st) = self.inner.lock() {
            st.offset = st.offset.saturating_add(d);
            st.sleeps.push(d);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_records_sleeps_and_advances() {
        let clock = ManualClock::new();
        let t0 = clock.now();
        clock.sleep(Duration::from_millis(10));
        clock.sleep(Duration::from_millis(20));
        clock.advance(Duration::from_millis(5));
        assert_eq!(clock.since(t0), Duration::from_millis(35));
        assert_eq!(clock.total_slept(), Duration::from_millis(30));
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[test]
    fn deadline_check() {
        let clock = ManualClock::new();
        let deadline = clock.now() + Duration::from_millis(3);
        assert!(!clock.is_past(deadline));
        clock.advance(Duration::from_millis(3));
        assert!(clock.is_past(deadline));
    }
}
