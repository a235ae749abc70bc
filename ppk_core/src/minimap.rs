//! Bounded min/max overview of a recording.
use crate::model::Sample;

/// Upper bound on the number of (min, max) pairs.
pub const MINIMAP_MAX_ELEMENTS: usize = 10_000;
/// Bytes per serialized pair: two little-endian f32.
pub const PAIR_SIZE: usize = 8;

/// Smallest power-of-two window keeping `n` samples within the element cap.
pub fn window_for(n: usize) -> usize {
    let mut w = 1usize;
    while n.div_ceil(w) > MINIMAP_MAX_ELEMENTS {
        w *= 2;
    }
    w
}

#[derive(Debug, Clone, PartialEq)]
pub struct Minimap {
    window: usize,
    pairs: Vec<(f32, f32)>,
}

impl Minimap {
    pub fn compute(samples: &[Sample]) -> Self {
        let window = window_for(samples.len());
        let pairs = samples
            .chunks(window)
            .map(|chunk| {
                chunk.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), s| {
                    (lo.min(s.current_ua), hi.max(s.current_ua))
                })
            })
            .collect();
        Self { window, pairs }
    }

    /// Samples per pair.
    #[inline]
    pub fn window(&self) -> usize {
        self.window
    }

    #[inline]
    pub fn pairs(&self) -> &[(f32, f32)] {
        &self.pairs
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pairs.len() * PAIR_SIZE);
        for (lo, hi) in &self.pairs {
            out.extend_from_slice(&lo.to_le_bytes());
            out.extend_from_slice(&hi.to_le_bytes());
        }
        out
    }

    /// Parse a stored minimap for a recording of `sample_count` samples.
    ///
    /// Returns `None` when the bytes cannot be this recording's overview:
    /// ragged length, wrong pair count, non-finite values or `min > max`.
    pub fn from_bytes(bytes: &[u8], sample_count: usize) -> Option<Self> {
        if bytes.len() % PAIR_SIZE != 0 {
            return None;
        }
        let window = window_for(sample_count);
        if bytes.len() / PAIR_SIZE != sample_count.div_ceil(window) {
            return None;
        }
        let mut pairs = Vec::with_capacity(bytes.len() / PAIR_SIZE);
        for chunk in bytes.chunks_exact(PAIR_SIZE) {
            let lo = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let hi = f32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
            if !lo.is_finite() || !hi.is_finite() || lo > hi {
                return None;
            }
            pairs.push((lo, hi));
        }
        Some(Self { window, pairs })
    }
}
