#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas, device profiles and calibration parsing for the profiler.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - `DeviceProfile` describes one instrument revision (opcodes + frame layout).
//! - Calibration CSV loader enforces headers and checks range ordering.
use serde::Deserialize;

mod profile;

pub use profile::{AckPolicy, CommandTable, DeviceProfile, FrameLayout, RawFrame};

/// Calibration CSV schema.
///
/// Expected headers:
/// range,gain,offset
///
/// Example:
/// range,gain,offset
/// 0,0.0106,-0.02
/// 1,0.1077,0.0
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct CalibrationRow {
    pub range: u8,
    /// microamps per ADC count
    pub gain: f64,
    /// microamps
    #[serde(default)]
    pub offset: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DeviceCfg {
    /// Explicit serial port; when absent the port is discovered by USB id.
    pub port: Option<String>,
    pub usb_vid: u16,
    pub usb_pid: u16,
    pub baud: u32,
}

impl Default for DeviceCfg {
    fn default() -> Self {
        Self {
            port: None,
            usb_vid: 0x1915,
            usb_pid: 0xC00A,
            baud: 115_200,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StreamCfg {
    /// Per-read timeout on the byte channel (ms)
    pub read_timeout_ms: u64,
    /// Consecutive failed reads tolerated before the stream ends
    pub max_retries: u32,
    /// Linear backoff step between retries (ms)
    pub backoff_ms: u64,
    /// Readings discarded after each range switch
    pub settle_drop: u8,
    /// Smooth the transient that follows a range switch
    pub spike_filter: bool,
    /// Max wait for the identification response at open (ms)
    pub identify_timeout_ms: u64,
    /// Max wait for a mode-select echo (ms)
    pub ack_timeout_ms: u64,
    /// Bytes requested per channel read
    pub read_chunk: usize,
}

impl Default for StreamCfg {
    fn default() -> Self {
        Self {
            read_timeout_ms: 100,
            max_retries: 3,
            backoff_ms: 10,
            settle_drop: 1,
            spike_filter: false,
            identify_timeout_ms: 2000,
            ack_timeout_ms: 500,
            read_chunk: 4096,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MeterMode {
    #[default]
    Source,
    Ampere,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SourceCfg {
    pub mode: MeterMode,
    pub voltage_mv: u16,
    /// Power the device under test once the instrument is configured
    pub power_on: bool,
}

impl Default for SourceCfg {
    fn default() -> Self {
        Self {
            mode: MeterMode::Source,
            voltage_mv: 3700,
            power_on: true,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PersistedCalibration {
    #[serde(default)]
    pub entries: Vec<CalibrationRow>,
}

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceCfg,
    #[serde(default)]
    pub stream: StreamCfg,
    #[serde(default)]
    pub source: SourceCfg,
    #[serde(default)]
    pub logging: Logging,
    /// Instrument revision override; the built-in PPK2 profile otherwise.
    #[serde(default)]
    pub profile: Option<DeviceProfile>,
    /// Optional explicit calibration; preferred over the instrument's own modifiers.
    #[serde(default)]
    pub calibration: Option<PersistedCalibration>,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Validated per-range calibration, ordered by range code.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationTable {
    pub entries: Vec<CalibrationRow>,
}

impl CalibrationTable {
    /// Rows must be non-empty, strictly increasing by range code, with finite
    /// non-zero gains and finite offsets.
    pub fn from_rows(rows: Vec<CalibrationRow>) -> eyre::Result<Self> {
        if rows.is_empty() {
            eyre::bail!("calibration requires at least one row");
        }
        for (i, r) in rows.iter().enumerate() {
            if !r.gain.is_finite() || r.gain == 0.0 {
                eyre::bail!(
                    "calibration gain for range {} must be finite and non-zero",
                    r.range
                );
            }
            if !r.offset.is_finite() {
                eyre::bail!("calibration offset for range {} must be finite", r.range);
            }
            if i > 0 && rows[i - 1].range >= r.range {
                if rows[i - 1].range == r.range {
                    eyre::bail!("calibration rows have duplicate range {}", r.range);
                }
                eyre::bail!("calibration ranges must be strictly increasing");
            }
        }
        Ok(Self { entries: rows })
    }

    pub fn max_range(&self) -> Option<u8> {
        self.entries.last().map(|r| r.range)
    }
}

impl TryFrom<Vec<CalibrationRow>> for CalibrationTable {
    type Error = eyre::Report;
    fn try_from(rows: Vec<CalibrationRow>) -> Result<Self, Self::Error> {
        Self::from_rows(rows)
    }
}

impl TryFrom<&PersistedCalibration> for CalibrationTable {
    type Error = eyre::Report;
    fn try_from(p: &PersistedCalibration) -> Result<Self, Self::Error> {
        Self::from_rows(p.entries.clone())
    }
}

pub fn load_calibration_csv(path: &std::path::Path) -> eyre::Result<CalibrationTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open calibration CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["range", "gain", "offset"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "calibration CSV must have headers 'range,gain,offset', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<CalibrationRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }

    CalibrationTable::try_from(rows)
}

impl Config {
    /// Profile in effect: the `[profile]` override or the built-in PPK2 revision.
    pub fn profile(&self) -> DeviceProfile {
        self.profile.clone().unwrap_or_default()
    }

    pub fn validate(&self) -> eyre::Result<()> {
        let profile = self.profile();
        profile.validate()?;

        // Device
        if self.device.baud == 0 {
            eyre::bail!("device.baud must be > 0");
        }
        if let Some(port) = &self.device.port
            && port.trim().is_empty()
        {
            eyre::bail!("device.port must not be empty when set");
        }

        // Stream
        if self.stream.read_timeout_ms == 0 {
            eyre::bail!("stream.read_timeout_ms must be >= 1");
        }
        if self.stream.read_timeout_ms > 60_000 {
            eyre::bail!("stream.read_timeout_ms is unreasonably large (>60s)");
        }
        if self.stream.max_retries > 1000 {
            eyre::bail!("stream.max_retries must be <= 1000");
        }
        if self.stream.identify_timeout_ms == 0 {
            eyre::bail!("stream.identify_timeout_ms must be >= 1");
        }
        if self.stream.ack_timeout_ms == 0 {
            eyre::bail!("stream.ack_timeout_ms must be >= 1");
        }
        if self.stream.read_chunk < profile.frame.frame_size() {
            eyre::bail!(
                "stream.read_chunk must be >= one frame ({} bytes)",
                profile.frame.frame_size()
            );
        }

        // Source
        if !profile.vdd_span().contains(&self.source.voltage_mv) {
            eyre::bail!(
                "source.voltage_mv must be in [{}, {}] mV",
                profile.vdd_min_mv,
                profile.vdd_max_mv
            );
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        // Calibration
        if let Some(cal) = &self.calibration {
            let table = CalibrationTable::try_from(cal)?;
            if let Some(max) = table.max_range()
                && max >= profile.range_count
            {
                eyre::bail!(
                    "calibration range {max} is reserved by profile {} ({} ranges)",
                    profile.name,
                    profile.range_count
                );
            }
        }

        Ok(())
    }
}
