//! Measurement frame decoder.
//!
//! Autoranging state is a [`RangeState`] value threaded through
//! [`decode_frame`]; [`Decoder`] wraps it with byte reassembly, sample-counter
//! gap tracking and the optional spike filter.
use std::collections::VecDeque;

use ppk_config::{FrameLayout, RawFrame};

use crate::calibration::RangeTable;
use crate::error::{PpkError, Result};
use crate::model::Sample;
use crate::spike::{SpikeFilter, SpikeFilterCfg};

/// Cumulative lost samples after which a loud warning is logged (~5 ms at 100 kHz).
const DATALOSS_WARN_THRESHOLD: u64 = 500;

/// Active range plus the number of readings still to discard after a switch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeState {
    pub active: Option<u8>,
    pub pending_drop: u8,
}

/// Fixed inputs of the per-frame decode step.
#[derive(Debug, Clone, Copy)]
pub struct DecodeCtx<'a> {
    pub table: &'a RangeTable,
    /// Codes at or above this are reserved.
    pub range_count: u8,
    pub settle_drop: u8,
    pub device: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Sample { current_ua: f64, logic: u16, range: u8 },
    /// Reading discarded while the front end settles after a switch.
    Settling { range: u8 },
    /// Per-frame fault; drop and continue.
    Rejected(PpkError),
}

/// Decode one frame. `Err` is a fault that ends the stream (no calibration
/// for a valid range code); everything recoverable is `FrameOutcome::Rejected`.
pub fn decode_frame(
    state: RangeState,
    frame: RawFrame,
    ctx: &DecodeCtx<'_>,
    offset: u64,
) -> Result<(RangeState, FrameOutcome)> {
    if frame.range >= ctx.range_count {
        return Ok((
            state,
            FrameOutcome::Rejected(PpkError::Decode {
                offset,
                detail: format!("reserved range code {}", frame.range),
            }),
        ));
    }
    let entry = ctx
        .table
        .lookup(frame.range)
        .ok_or_else(|| PpkError::Calibration {
            device: ctx.device.to_string(),
            range: frame.range,
        })?;

    let mut next = state;
    match state.active {
        None => {
            next.active = Some(frame.range);
            next.pending_drop = 0;
        }
        Some(active) if active != frame.range => {
            next.active = Some(frame.range);
            next.pending_drop = ctx.settle_drop;
        }
        Some(_) => {}
    }
    if next.pending_drop > 0 {
        next.pending_drop -= 1;
        return Ok((next, FrameOutcome::Settling { range: frame.range }));
    }

    let current = entry.apply(frame.adc);
    if !current.is_finite() || !(current as f32).is_finite() {
        return Ok((
            next,
            FrameOutcome::Rejected(PpkError::Decode {
                offset,
                detail: format!(
                    "non-finite current from adc {} in range {}",
                    frame.adc, frame.range
                ),
            }),
        ));
    }
    Ok((
        next,
        FrameOutcome::Sample {
            current_ua: current,
            logic: frame.logic,
            range: frame.range,
        },
    ))
}

/// Running counters exposed to callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub frames: u64,
    pub samples: u64,
    /// Malformed frames dropped (reserved range, non-finite result).
    pub dropped_frames: u64,
    /// Readings discarded after range switches.
    pub settling_dropped: u64,
    pub range_switches: u64,
    /// Frames the instrument sent that never arrived, from counter gaps.
    pub lost_samples: u64,
}

#[derive(Debug, Clone)]
pub struct DecoderCfg {
    pub layout: FrameLayout,
    pub range_count: u8,
    pub settle_drop: u8,
    pub spike_filter: Option<SpikeFilterCfg>,
    pub device: String,
}

pub struct Decoder {
    cfg: DecoderCfg,
    table: RangeTable,
    state: RangeState,
    partial: Vec<u8>,
    offset: u64,
    expected_counter: Option<u8>,
    dropped_since_valid: u64,
    stats: DecodeStats,
    spike: Option<SpikeFilter>,
    last_fault: Option<PpkError>,
}

impl Decoder {
    pub fn new(cfg: DecoderCfg, table: RangeTable) -> Self {
        let spike = cfg
            .spike_filter
            .map(|c| SpikeFilter::new(c, cfg.range_count.saturating_sub(1)));
        Self {
            cfg,
            table,
            state: RangeState::default(),
            partial: Vec::new(),
            offset: 0,
            expected_counter: None,
            dropped_since_valid: 0,
            stats: DecodeStats::default(),
            spike,
            last_fault: None,
        }
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    pub fn range_state(&self) -> RangeState {
        self.state
    }

    /// Most recent per-frame fault, for diagnostics.
    pub fn last_fault(&self) -> Option<&PpkError> {
        self.last_fault.as_ref()
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn partial_len(&self) -> usize {
        self.partial.len()
    }

    /// Decode every complete frame in `bytes` (plus any carried-over partial
    /// frame), appending samples to `out`.
    ///
    /// On `Err` the samples decoded before the failing frame are already in `out`.
    pub fn feed(&mut self, bytes: &[u8], out: &mut VecDeque<Sample>) -> Result<()> {
        let size = self.cfg.layout.frame_size();
        let mut input = std::mem::take(&mut self.partial);
        input.extend_from_slice(bytes);
        let mut chunks = input.chunks_exact(size);
        for chunk in chunks.by_ref() {
            let raw = self.cfg.layout.decode(chunk);
            let offset = self.offset;
            self.offset += size as u64;
            self.stats.frames += 1;
            self.step(raw, offset, out)?;
        }
        self.partial = chunks.remainder().to_vec();
        Ok(())
    }

    fn step(&mut self, raw: RawFrame, offset: u64, out: &mut VecDeque<Sample>) -> Result<()> {
        let ctx = DecodeCtx {
            table: &self.table,
            range_count: self.cfg.range_count,
            settle_drop: self.cfg.settle_drop,
            device: &self.cfg.device,
        };
        let before = self.state.active;
        let (next, outcome) = decode_frame(self.state, raw, &ctx, offset)?;
        if let (Some(a), Some(b)) = (before, next.active)
            && a != b
        {
            self.stats.range_switches += 1;
            tracing::trace!(device = %self.cfg.device, from = a, to = b, "range switch");
        }
        self.state = next;

        match outcome {
            FrameOutcome::Rejected(e) => {
                self.stats.dropped_frames += 1;
                self.dropped_since_valid += 1;
                tracing::debug!(device = %self.cfg.device, error = %e, "dropped frame");
                self.last_fault = Some(e);
            }
            FrameOutcome::Settling { .. } => {
                self.track_counter(raw.counter);
                self.stats.settling_dropped += 1;
            }
            FrameOutcome::Sample {
                current_ua,
                logic,
                range,
            } => {
                self.track_counter(raw.counter);
                let value = match self.spike.as_mut() {
                    Some(f) => f.process(current_ua, range),
                    None => current_ua,
                };
                self.stats.samples += 1;
                out.push_back(Sample {
                    current_ua: value as f32,
                    logic,
                });
            }
        }
        Ok(())
    }

    fn track_counter(&mut self, counter: Option<u8>) {
        let Some(counter) = counter else {
            return;
        };
        let modulus = self.cfg.layout.counter_modulus();
        if let Some(expected) = self.expected_counter
            && counter != expected
        {
            let gap = (u16::from(counter) + modulus - u16::from(expected)) % modulus;
            let lost = u64::from(gap).saturating_sub(self.dropped_since_valid);
            if lost > 0 {
                let before = self.stats.lost_samples;
                self.stats.lost_samples += lost;
                tracing::debug!(device = %self.cfg.device, lost, "sample counter gap");
                if before < DATALOSS_WARN_THRESHOLD
                    && self.stats.lost_samples >= DATALOSS_WARN_THRESHOLD
                {
                    tracing::warn!(
                        device = %self.cfg.device,
                        total = self.stats.lost_samples,
                        "significant data loss; check the USB link and host load"
                    );
                }
            }
        }
        self.expected_counter = Some(((u16::from(counter) + 1) % modulus) as u8);
        self.dropped_since_valid = 0;
    }
}
