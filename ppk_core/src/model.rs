//! Power-profile data model shared by the engine, the codec and the builder.
use std::time::Duration;

use crate::error::{PpkError, Result};
use crate::minimap::Minimap;

/// Number of digital inputs carried in `Sample::logic`.
pub const DIGITAL_CHANNELS: u8 = 8;
/// Container format version written by this crate.
pub const FORMAT_VERSION: u32 = 2;
pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 100_000;

/// One measurement instant. Its time offset is implied by its index.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Sample {
    pub current_ua: f32,
    /// Digital channel bitmask, bit n = channel Dn.
    pub logic: u16,
}

impl Sample {
    pub fn new(current_ua: f32, logic: u16) -> Result<Self> {
        if !current_ua.is_finite() {
            return Err(PpkError::InvalidParameter(format!(
                "current must be finite, got {current_ua}"
            )));
        }
        Ok(Self { current_ua, logic })
    }

    #[inline]
    pub fn channel(&self, ch: u8) -> bool {
        ch < 16 && self.logic & (1 << ch) != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub sample_rate_hz: u32,
    /// Wall-clock start, epoch milliseconds.
    pub start_system_time_ms: i64,
    pub format_version: u32,
    pub label: Option<String>,
}

impl Metadata {
    pub fn new(sample_rate_hz: u32) -> Result<Self> {
        if sample_rate_hz == 0 {
            return Err(PpkError::InvalidParameter(
                "sample rate must be > 0".into(),
            ));
        }
        Ok(Self {
            sample_rate_hz,
            start_system_time_ms: 0,
            format_version: FORMAT_VERSION,
            label: None,
        })
    }

    pub fn with_start_time_ms(mut self, ms: i64) -> Self {
        self.start_system_time_ms = ms;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Summary over the whole buffer; recomputed on every call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    pub mean_ua: f64,
    pub min_ua: f32,
    pub max_ua: f32,
    pub p99_ua: f32,
    pub duration_s: f64,
    /// Integrated charge in microcoulombs.
    pub charge_uc: f64,
}

/// Ordered, append-only samples plus their metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    metadata: Metadata,
    samples: Vec<Sample>,
}

impl SampleBuffer {
    pub fn new(metadata: Metadata) -> Result<Self> {
        Self::from_parts(metadata, Vec::new())
    }

    pub fn with_capacity(metadata: Metadata, capacity: usize) -> Result<Self> {
        let mut b = Self::new(metadata)?;
        b.samples.reserve(capacity);
        Ok(b)
    }

    /// Assemble a buffer, rejecting a zero rate or any non-finite current.
    pub fn from_parts(metadata: Metadata, samples: Vec<Sample>) -> Result<Self> {
        if metadata.sample_rate_hz == 0 {
            return Err(PpkError::InvalidParameter(
                "sample rate must be > 0".into(),
            ));
        }
        if let Some(i) = samples.iter().position(|s| !s.current_ua.is_finite()) {
            return Err(PpkError::InvalidParameter(format!(
                "sample {i} has non-finite current"
            )));
        }
        Ok(Self { metadata, samples })
    }

    pub fn push(&mut self, sample: Sample) -> Result<()> {
        if !sample.current_ua.is_finite() {
            return Err(PpkError::InvalidParameter(format!(
                "sample {} has non-finite current",
                self.samples.len()
            )));
        }
        self.samples.push(sample);
        Ok(())
    }

    pub fn extend_from(&mut self, other: &SampleBuffer) {
        self.samples.extend_from_slice(&other.samples);
    }

    #[inline]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Mutable access to digital channels only; currents stay immutable.
    pub fn logic_mut(&mut self) -> impl Iterator<Item = &mut u16> {
        self.samples.iter_mut().map(|s| &mut s.logic)
    }

    #[inline]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn set_label(&mut self, label: Option<String>) {
        self.metadata.label = label;
    }

    pub fn set_start_time_ms(&mut self, ms: i64) {
        self.metadata.start_system_time_ms = ms;
    }

    #[inline]
    pub fn sample_rate_hz(&self) -> u32 {
        self.metadata.sample_rate_hz
    }

    #[inline]
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Offset of sample `index` from the start of the recording.
    pub fn time_of(&self, index: usize) -> Duration {
        Duration::from_secs_f64(index as f64 / f64::from(self.sample_rate_hz()))
    }

    pub fn duration(&self) -> Duration {
        self.time_of(self.samples.len())
    }

    pub fn minimap(&self) -> Minimap {
        Minimap::compute(&self.samples)
    }

    /// `None` for an empty buffer.
    pub fn stats(&self) -> Option<Stats> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sum = 0.0f64;
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for s in &self.samples {
            sum += f64::from(s.current_ua);
            min = min.min(s.current_ua);
            max = max.max(s.current_ua);
        }
        let n = self.samples.len();
        let mean = sum / n as f64;
        let mut sorted: Vec<f32> = self.samples.iter().map(|s| s.current_ua).collect();
        sorted.sort_by(f32::total_cmp);
        let rank = ((n as f64) * 0.99).ceil() as usize;
        let p99 = sorted[rank.clamp(1, n) - 1];
        let duration_s = self.duration().as_secs_f64();
        Some(Stats {
            mean_ua: mean,
            min_ua: min,
            max_ua: max,
            p99_ua: p99,
            duration_s,
            charge_uc: mean * duration_s,
        })
    }
}
