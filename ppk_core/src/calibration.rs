//! Per-range calibration: `current_ua = adc * gain + offset`.
use crate::error::{PpkError, Result};

/// ADC volts per count on the PPK2 front end (Vref / (2^14 * 4 * 2.5)).
pub const ADC_MULT: f64 = 1.8 / 163_840.0;
/// The PPK2 reports ADC readings in quarter counts.
const ADC_SCALE: f64 = 4.0;

const DEFAULT_R: [f64; 5] = [1031.64, 101.65, 10.15, 0.94, 0.043];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationEntry {
    /// Raw range code as carried in the frame.
    pub range: u8,
    /// microamps per ADC count
    pub gain: f64,
    /// microamps
    pub offset: f64,
}

impl CalibrationEntry {
    #[inline]
    pub fn apply(&self, adc: u16) -> f64 {
        f64::from(adc) * self.gain + self.offset
    }
}

/// Immutable table ordered from most to least sensitive range.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeTable {
    entries: Vec<CalibrationEntry>,
}

impl RangeTable {
    pub fn new(entries: Vec<CalibrationEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(PpkError::InvalidParameter(
                "calibration table is empty".into(),
            ));
        }
        for (i, e) in entries.iter().enumerate() {
            if !e.gain.is_finite() || e.gain == 0.0 || !e.offset.is_finite() {
                return Err(PpkError::InvalidParameter(format!(
                    "calibration for range {} must have finite non-zero gain and finite offset",
                    e.range
                )));
            }
            if i > 0 && entries[i - 1].range >= e.range {
                return Err(PpkError::InvalidParameter(
                    "calibration ranges must be strictly increasing".into(),
                ));
            }
        }
        Ok(Self { entries })
    }

    pub fn lookup(&self, range: u8) -> Option<&CalibrationEntry> {
        self.entries
            .binary_search_by_key(&range, |e| e.range)
            .ok()
            .map(|i| &self.entries[i])
    }

    pub fn entries(&self) -> &[CalibrationEntry] {
        &self.entries
    }

    pub fn max_range(&self) -> Option<u8> {
        self.entries.last().map(|e| e.range)
    }

    /// Linear table from the instrument's own modifiers at supply voltage `vdd_mv`.
    ///
    /// The firmware model also has a small quadratic `gs` term, which a
    /// gain/offset table cannot carry; it is ignored here.
    pub fn from_modifiers(m: &Modifiers, vdd_mv: u16, range_count: u8) -> Result<Self> {
        let vdd_v = f64::from(vdd_mv) / 1000.0;
        let mut entries = Vec::with_capacity(usize::from(range_count));
        for range in 0..range_count {
            let i = usize::from(range);
            let r = m.r.get(i).copied().unwrap_or(0.0);
            if !r.is_finite() || r <= 0.0 {
                return Err(PpkError::InvalidParameter(format!(
                    "shunt resistance for range {range} must be > 0, got {r}"
                )));
            }
            let k = ADC_MULT / r;
            let ug = m.ug.get(i).copied().unwrap_or(1.0);
            let gi = m.gi.get(i).copied().unwrap_or(1.0);
            let o = m.o.get(i).copied().unwrap_or(0.0);
            let s = m.s.get(i).copied().unwrap_or(0.0);
            let ii = m.i.get(i).copied().unwrap_or(0.0);
            entries.push(CalibrationEntry {
                range,
                gain: ug * gi * ADC_SCALE * k * 1e6,
                offset: ug * (-o * gi * k + s * vdd_v + ii) * 1e6,
            });
        }
        Self::new(entries)
    }
}

/// Per-range correction constants reported by the instrument.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Modifiers {
    pub r: Vec<f64>,
    pub gs: Vec<f64>,
    pub gi: Vec<f64>,
    pub o: Vec<f64>,
    pub s: Vec<f64>,
    pub i: Vec<f64>,
    pub ug: Vec<f64>,
}

impl Modifiers {
    pub fn ppk2_defaults(ranges: usize) -> Self {
        let r = (0..ranges)
            .map(|i| DEFAULT_R.get(i).copied().unwrap_or(1.0))
            .collect();
        Self {
            r,
            gs: vec![1.0; ranges],
            gi: vec![1.0; ranges],
            o: vec![0.0; ranges],
            s: vec![0.0; ranges],
            i: vec![0.0; ranges],
            ug: vec![1.0; ranges],
        }
    }

    /// Set `prefix[idx]`; unknown prefixes and out-of-table indices are ignored.
    pub fn set(&mut self, prefix: &str, idx: usize, value: f64) {
        let slot = match prefix {
            "r" => &mut self.r,
            "gs" => &mut self.gs,
            "gi" => &mut self.gi,
            "o" => &mut self.o,
            "s" => &mut self.s,
            "i" => &mut self.i,
            "ug" => &mut self.ug,
            _ => return,
        };
        if let Some(v) = slot.get_mut(idx) {
            *v = value;
        }
    }
}
