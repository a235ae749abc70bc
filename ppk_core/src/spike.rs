//! Smoothing of the transient that follows a range switch.
//!
//! Two exponential moving averages run over every sample. For a few samples
//! after a switch the output is the average instead of the raw value; the
//! least sensitive range uses the slower average and ignores the first two
//! samples after the switch entirely.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpikeFilterCfg {
    pub alpha: f64,
    pub alpha_slow: f64,
    /// Samples smoothed after each switch.
    pub samples: u8,
}

impl Default for SpikeFilterCfg {
    fn default() -> Self {
        Self {
            alpha: 0.18,
            alpha_slow: 0.06,
            samples: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpikeFilter {
    cfg: SpikeFilterCfg,
    slow_range: u8,
    avg: Option<f64>,
    avg_slow: Option<f64>,
    prev_range: Option<u8>,
    after_spike: u8,
    same_range_run: u32,
}

impl SpikeFilter {
    pub fn new(cfg: SpikeFilterCfg, slow_range: u8) -> Self {
        Self {
            cfg,
            slow_range,
            avg: None,
            avg_slow: None,
            prev_range: None,
            after_spike: 0,
            same_range_run: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.cfg, self.slow_range);
    }

    pub fn process(&mut self, value: f64, range: u8) -> f64 {
        let prev_avg = self.avg;
        let prev_slow = self.avg_slow;
        let (avg, slow) = match (self.avg, self.avg_slow) {
            (Some(a), Some(s)) => (
                self.cfg.alpha * value + (1.0 - self.cfg.alpha) * a,
                self.cfg.alpha_slow * value + (1.0 - self.cfg.alpha_slow) * s,
            ),
            _ => (value, value),
        };
        self.avg = Some(avg);
        self.avg_slow = Some(slow);

        let prev = *self.prev_range.get_or_insert(range);
        let mut out = value;
        if prev != range || self.after_spike > 0 {
            if prev == range {
                self.same_range_run += 1;
            } else {
                self.same_range_run = 0;
                self.after_spike = self.cfg.samples;
            }
            if range == self.slow_range {
                if self.same_range_run < 2 {
                    self.avg = prev_avg.or(Some(avg));
                    self.avg_slow = prev_slow.or(Some(slow));
                }
                out = self.avg_slow.unwrap_or(value);
            } else {
                out = avg;
            }
            self.after_spike = self.after_spike.saturating_sub(1);
        }
        self.prev_range = Some(range);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_through_without_switch() {
        let mut f = SpikeFilter::new(SpikeFilterCfg::default(), 4);
        for v in [1.0, 5.0, 2.0] {
            assert_eq!(f.process(v, 1), v);
        }
    }

    #[test]
    fn smooths_a_few_samples_after_switch() {
        let mut f = SpikeFilter::new(SpikeFilterCfg::default(), 4);
        for _ in 0..10 {
            f.process(10.0, 1);
        }
        let first = f.process(1000.0, 2);
        assert!(first < 1000.0 && first > 10.0);
        f.process(1000.0, 2);
        f.process(1000.0, 2);
        // window of three samples has passed
        assert_eq!(f.process(1000.0, 2), 1000.0);
    }

    #[test]
    fn slow_range_holds_previous_average() {
        let mut f = SpikeFilter::new(SpikeFilterCfg::default(), 4);
        for _ in 0..10 {
            f.process(10.0, 3);
        }
        let v = f.process(50_000.0, 4);
        assert!((v - 10.0).abs() < 1e-9);
    }
}
