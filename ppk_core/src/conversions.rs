//! Conversions from `ppk_config` types to `ppk_core` runtime types.

use std::time::Duration;

use crate::calibration::{CalibrationEntry, RangeTable};
use crate::config::EngineCfg;
use crate::device::{DeviceOptions, DeviceSelector};
use crate::error::{PpkError, Result};
use crate::protocol::DeviceMode;

// ── EngineCfg ────────────────────────────────────────────────────────────────

impl From<&ppk_config::StreamCfg> for EngineCfg {
    fn from(c: &ppk_config::StreamCfg) -> Self {
        Self {
            read_timeout: Duration::from_millis(c.read_timeout_ms),
            max_retries: c.max_retries,
            backoff: Duration::from_millis(c.backoff_ms),
            settle_drop: c.settle_drop,
            spike_filter: c.spike_filter,
            identify_timeout: Duration::from_millis(c.identify_timeout_ms),
            ack_timeout: Duration::from_millis(c.ack_timeout_ms),
            read_chunk: c.read_chunk,
            ..Self::default()
        }
    }
}

// ── RangeTable ───────────────────────────────────────────────────────────────

impl TryFrom<&ppk_config::CalibrationTable> for RangeTable {
    type Error = PpkError;

    fn try_from(t: &ppk_config::CalibrationTable) -> Result<Self> {
        Self::new(
            t.entries
                .iter()
                .map(|r| CalibrationEntry {
                    range: r.range,
                    gain: r.gain,
                    offset: r.offset,
                })
                .collect(),
        )
    }
}

// ── DeviceMode ───────────────────────────────────────────────────────────────

impl From<ppk_config::MeterMode> for DeviceMode {
    fn from(m: ppk_config::MeterMode) -> Self {
        match m {
            ppk_config::MeterMode::Source => Self::SourceMeter,
            ppk_config::MeterMode::Ampere => Self::AmpereMeter,
        }
    }
}

// ── DeviceSelector ───────────────────────────────────────────────────────────

impl From<&ppk_config::DeviceCfg> for DeviceSelector {
    fn from(c: &ppk_config::DeviceCfg) -> Self {
        match &c.port {
            Some(p) => Self::Port(p.clone()),
            None => Self::Auto {
                vid: c.usb_vid,
                pid: c.usb_pid,
            },
        }
    }
}

impl DeviceOptions {
    /// Options for a validated config. An explicit `calibration` (for example
    /// from a CSV) takes precedence over the config's inline table.
    pub fn from_config(
        cfg: &ppk_config::Config,
        calibration: Option<&ppk_config::CalibrationTable>,
    ) -> Result<Self> {
        let inline = cfg
            .calibration
            .as_ref()
            .map(ppk_config::CalibrationTable::try_from)
            .transpose()
            .map_err(|e| PpkError::InvalidParameter(format!("calibration: {e}")))?;
        let table = calibration
            .or(inline.as_ref())
            .map(RangeTable::try_from)
            .transpose()?;
        let mut opts = Self::default()
            .with_profile(cfg.profile())
            .with_engine(EngineCfg::from(&cfg.stream));
        if let Some(t) = table {
            opts = opts.with_calibration(t);
        }
        Ok(opts)
    }
}
