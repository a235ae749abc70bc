//! Synthetic power profiles.
//!
//! [`build`] turns a segment list into a [`SampleBuffer`]. It is pure: the same
//! segments, rate and seed always give bit-identical samples. Noise is additive
//! and mean-zero and is never clamped.
use std::f64::consts::TAU;
use std::ops::Range;
use std::path::Path;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{PpkError, Result};
use crate::model::{DEFAULT_SAMPLE_RATE_HZ, DIGITAL_CHANNELS, Metadata, Sample, SampleBuffer};
use crate::util::sample_count_for;

/// Width of the bell used for spikes, as `exp(-((t - 0.5)^2) / SPIKE_WIDTH)`.
const SPIKE_WIDTH: f64 = 0.04;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseShape {
    /// Normal, standard deviation = amplitude.
    #[default]
    Gaussian,
    /// Flat over `[-amplitude, amplitude]`.
    Uniform,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Noise {
    pub amplitude_ua: f64,
    pub shape: NoiseShape,
}

impl Noise {
    pub const NONE: Self = Self {
        amplitude_ua: 0.0,
        shape: NoiseShape::Gaussian,
    };

    pub fn gaussian(amplitude_ua: f64) -> Self {
        Self {
            amplitude_ua,
            shape: NoiseShape::Gaussian,
        }
    }

    pub fn uniform(amplitude_ua: f64) -> Self {
        Self {
            amplitude_ua,
            shape: NoiseShape::Uniform,
        }
    }

    fn sample(&self, rng: &mut ChaCha8Rng) -> f64 {
        let a = self.amplitude_ua;
        if a <= 0.0 {
            return 0.0;
        }
        match self.shape {
            NoiseShape::Gaussian => {
                // Box-Muller; u1 in (0, 1] keeps ln finite.
                let u1 = 1.0 - rng.r#gen::<f64>();
                let u2 = rng.r#gen::<f64>();
                a * (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos()
            }
            NoiseShape::Uniform => rng.gen_range(-a..=a),
        }
    }
}

/// One piece of a synthetic profile. `logic` is the digital mask held for
/// the whole segment (0 when absent).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Segment {
    Phase {
        #[serde(default)]
        name: String,
        current_ua: f64,
        duration_s: f64,
        #[serde(default)]
        noise: Noise,
        #[serde(default)]
        logic: Option<u16>,
    },
    /// Linear; the first and last samples hit the endpoints exactly.
    Ramp {
        #[serde(default)]
        name: String,
        start_ua: f64,
        end_ua: f64,
        duration_s: f64,
        #[serde(default)]
        noise: Noise,
        #[serde(default)]
        logic: Option<u16>,
    },
    /// Bell-shaped transient peaking mid-segment.
    Spike {
        #[serde(default)]
        name: String,
        peak_ua: f64,
        duration_s: f64,
        #[serde(default)]
        logic: Option<u16>,
    },
}

impl Segment {
    pub fn name(&self) -> &str {
        match self {
            Self::Phase { name, .. } | Self::Ramp { name, .. } | Self::Spike { name, .. } => name,
        }
    }

    pub fn duration_s(&self) -> f64 {
        match *self {
            Self::Phase { duration_s, .. }
            | Self::Ramp { duration_s, .. }
            | Self::Spike { duration_s, .. } => duration_s,
        }
    }

    fn logic(&self) -> u16 {
        match *self {
            Self::Phase { logic, .. } | Self::Ramp { logic, .. } | Self::Spike { logic, .. } => {
                logic.unwrap_or(0)
            }
        }
    }

    fn set_logic(&mut self, mask: Option<u16>) {
        match self {
            Self::Phase { logic, .. } | Self::Ramp { logic, .. } | Self::Spike { logic, .. } => {
                *logic = mask;
            }
        }
    }

    fn validate(&self, idx: usize) -> Result<()> {
        let bad = |what: &str| {
            Err(PpkError::InvalidParameter(format!(
                "segment {idx} ('{}'): {what}",
                self.name()
            )))
        };
        let d = self.duration_s();
        if !d.is_finite() || d < 0.0 {
            return bad("duration must be finite and >= 0");
        }
        let (finite, noise) = match self {
            Self::Phase {
                current_ua, noise, ..
            } => (current_ua.is_finite(), Some(noise)),
            Self::Ramp {
                start_ua,
                end_ua,
                noise,
                ..
            } => (start_ua.is_finite() && end_ua.is_finite(), Some(noise)),
            Self::Spike { peak_ua, .. } => (peak_ua.is_finite(), None),
        };
        if !finite {
            return bad("current must be finite");
        }
        if let Some(n) = noise
            && (!n.amplitude_ua.is_finite() || n.amplitude_ua < 0.0)
        {
            return bad("noise amplitude must be finite and >= 0");
        }
        if self.logic() >> DIGITAL_CHANNELS != 0 {
            return bad("digital mask uses channels above D7");
        }
        Ok(())
    }

    fn render(&self, n: usize, rng: &mut ChaCha8Rng, out: &mut Vec<f64>) {
        match *self {
            Self::Phase {
                current_ua, noise, ..
            } => {
                for _ in 0..n {
                    out.push(current_ua + noise.sample(rng));
                }
            }
            Self::Ramp {
                start_ua,
                end_ua,
                noise,
                ..
            } => {
                for i in 0..n {
                    let level = if i + 1 == n && n > 1 {
                        end_ua
                    } else if n > 1 {
                        start_ua + (end_ua - start_ua) * (i as f64 / (n - 1) as f64)
                    } else {
                        start_ua
                    };
                    out.push(level + noise.sample(rng));
                }
            }
            Self::Spike { peak_ua, .. } => {
                let denom = n.saturating_sub(1).max(1) as f64;
                for i in 0..n {
                    let t = i as f64 / denom;
                    out.push(peak_ua * (-((t - 0.5).powi(2)) / SPIKE_WIDTH).exp());
                }
            }
        }
    }
}

/// Sample index range covered by one segment of a built profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentSpan {
    pub name: String,
    pub samples: Range<usize>,
}

/// Where each segment lands in the output of [`build`].
pub fn spans(segments: &[Segment], sample_rate_hz: u32) -> Vec<SegmentSpan> {
    let mut at = 0usize;
    segments
        .iter()
        .map(|s| {
            let n = sample_count_for(s.duration_s(), sample_rate_hz);
            let end = at.saturating_add(n);
            let span = SegmentSpan {
                name: s.name().to_string(),
                samples: at..end,
            };
            at = end;
            span
        })
        .collect()
}

/// Upper bound on the samples one built profile may hold (8 GiB of samples).
pub const MAX_SAMPLES: usize = 1 << 30;

/// Render `segments` at `sample_rate_hz` using noise seeded by `seed`.
///
/// Profiles longer than [`MAX_SAMPLES`] are rejected before anything is
/// allocated.
pub fn build(segments: &[Segment], sample_rate_hz: u32, seed: u64) -> Result<SampleBuffer> {
    build_with(segments, Metadata::new(sample_rate_hz)?, seed)
}

fn build_with(segments: &[Segment], metadata: Metadata, seed: u64) -> Result<SampleBuffer> {
    let rate = metadata.sample_rate_hz;
    for (i, s) in segments.iter().enumerate() {
        s.validate(i)?;
    }
    let mut counts = Vec::with_capacity(segments.len());
    let mut total = 0usize;
    for (idx, seg) in segments.iter().enumerate() {
        let n = sample_count_for(seg.duration_s(), rate);
        total = total
            .checked_add(n)
            .filter(|&t| t <= MAX_SAMPLES)
            .ok_or_else(|| {
                PpkError::InvalidParameter(format!(
                    "segment {idx} ('{}') takes the profile past {MAX_SAMPLES} samples",
                    seg.name()
                ))
            })?;
        counts.push(n);
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut samples = Vec::with_capacity(total);
    let mut levels = Vec::new();
    for (idx, (seg, &n)) in segments.iter().zip(&counts).enumerate() {
        levels.clear();
        seg.render(n, &mut rng, &mut levels);
        let logic = seg.logic();
        for &v in &levels {
            let current_ua = v as f32;
            if !current_ua.is_finite() {
                return Err(PpkError::InvalidParameter(format!(
                    "segment {idx} ('{}') produces a current outside f32 range",
                    seg.name()
                )));
            }
            samples.push(Sample { current_ua, logic });
        }
    }
    tracing::debug!(segments = segments.len(), samples = samples.len(), seed, "profile built");
    SampleBuffer::from_parts(metadata, samples)
}

/// Fluent construction of a segment list.
///
/// `digital` sets the mask for every segment added after it.
#[derive(Debug, Clone)]
pub struct ProfileBuilder {
    sample_rate_hz: u32,
    seed: u64,
    digital: Option<u16>,
    label: Option<String>,
    start_time_ms: i64,
    segments: Vec<Segment>,
}

impl Default for ProfileBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE_HZ)
    }
}

impl ProfileBuilder {
    pub fn new(sample_rate_hz: u32) -> Self {
        Self {
            sample_rate_hz,
            seed: 0,
            digital: None,
            label: None,
            start_time_ms: 0,
            segments: Vec::new(),
        }
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn start_time_ms(mut self, ms: i64) -> Self {
        self.start_time_ms = ms;
        self
    }

    pub fn digital(mut self, mask: u16) -> Self {
        self.digital = Some(mask);
        self
    }

    pub fn segment(mut self, mut seg: Segment) -> Self {
        if self.digital.is_some() {
            seg.set_logic(self.digital);
        }
        self.segments.push(seg);
        self
    }

    pub fn phase(self, name: &str, current_ua: f64, duration_s: f64, noise: Noise) -> Self {
        self.segment(Segment::Phase {
            name: name.to_string(),
            current_ua,
            duration_s,
            noise,
            logic: None,
        })
    }

    pub fn ramp(
        self,
        name: &str,
        start_ua: f64,
        end_ua: f64,
        duration_s: f64,
        noise: Noise,
    ) -> Self {
        self.segment(Segment::Ramp {
            name: name.to_string(),
            start_ua,
            end_ua,
            duration_s,
            noise,
            logic: None,
        })
    }

    pub fn spike(self, name: &str, peak_ua: f64, duration_s: f64) -> Self {
        self.segment(Segment::Spike {
            name: name.to_string(),
            peak_ua,
            duration_s,
            logic: None,
        })
    }

    /// `cycles` repetitions of a sleep phase followed by a wake phase.
    pub fn periodic_wake(
        mut self,
        sleep_ua: f64,
        sleep_s: f64,
        wake_ua: f64,
        wake_s: f64,
        cycles: usize,
        noise: Noise,
    ) -> Self {
        for i in 0..cycles {
            self = self
                .phase(&format!("sleep_{i}"), sleep_ua, sleep_s, noise)
                .phase(&format!("wake_{i}"), wake_ua, wake_s, noise);
        }
        self
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn spans(&self) -> Vec<SegmentSpan> {
        spans(&self.segments, self.sample_rate_hz)
    }

    pub fn build(&self) -> Result<SampleBuffer> {
        let mut meta = Metadata::new(self.sample_rate_hz)?.with_start_time_ms(self.start_time_ms);
        if let Some(l) = &self.label {
            meta = meta.with_label(l.clone());
        }
        build_with(&self.segments, meta, self.seed)
    }
}

fn default_rate() -> u32 {
    DEFAULT_SAMPLE_RATE_HZ
}

/// A profile described in TOML:
///
/// ```toml
/// sample_rate_hz = 100000
/// seed = 7
///
/// [[segments]]
/// kind = "phase"
/// name = "sleep"
/// current_ua = 3.5
/// duration_s = 1.0
/// noise = { amplitude_ua = 0.2, shape = "uniform" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSpec {
    #[serde(default = "default_rate")]
    pub sample_rate_hz: u32,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub start_time_ms: i64,
    pub segments: Vec<Segment>,
}

impl ProfileSpec {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text)
            .map_err(|e| PpkError::InvalidParameter(format!("profile description: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PpkError::io(path.display().to_string(), &e))?;
        Self::from_toml(&text)
    }

    pub fn builder(&self) -> ProfileBuilder {
        let mut b = ProfileBuilder::new(self.sample_rate_hz)
            .seed(self.seed)
            .start_time_ms(self.start_time_ms);
        if let Some(l) = &self.label {
            b = b.label(l.clone());
        }
        b.segments.clone_from(&self.segments);
        b
    }

    pub fn build(&self) -> Result<SampleBuffer> {
        self.builder().build()
    }
}
