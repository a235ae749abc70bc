//! Device handle: owns the byte channel, runs the identification exchange,
//! sends control commands and hands out the measurement stream.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use ppk_config::{AckPolicy, DeviceProfile};
use ppk_traits::{ByteChannel, ChannelError, Clock, MonotonicClock};

use crate::calibration::{Modifiers, RangeTable};
use crate::config::EngineCfg;
use crate::error::{PpkError, Result};
use crate::hw_error::{ChannelFault, classify, map_open_error};
use crate::model::{Metadata, SampleBuffer};
use crate::protocol::metadata::{self, DeviceMetadata};
use crate::protocol::{Command, DecodeStats, Decoder, DecoderCfg, DeviceMode};
use crate::spike::SpikeFilterCfg;
use crate::stream::MeasurementStream;
use crate::util::now_epoch_ms;

/// User gains outside this band are reset to 1.0 when a device is opened.
const USER_GAIN_BAND: std::ops::RangeInclusive<f64> = 0.9..=1.1;

/// Shared cancellation flag for a running measurement.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Which instrument to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    /// First port whose USB descriptor matches.
    Auto { vid: u16, pid: u16 },
    Port(String),
}

impl std::fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto { vid, pid } => write!(f, "usb {vid:04x}:{pid:04x}"),
            Self::Port(p) => f.write_str(p),
        }
    }
}

/// Everything a device handle is constructed from.
#[derive(Clone)]
pub struct DeviceOptions {
    pub profile: DeviceProfile,
    /// Explicit calibration; derived from the instrument's modifiers when absent.
    pub calibration: Option<RangeTable>,
    pub engine: EngineCfg,
    pub clock: Arc<dyn Clock + Send + Sync>,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            profile: DeviceProfile::ppk2(),
            calibration: None,
            engine: EngineCfg::default(),
            clock: Arc::new(MonotonicClock::new()),
        }
    }
}

impl std::fmt::Debug for DeviceOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceOptions")
            .field("profile", &self.profile.name)
            .field("calibration", &self.calibration)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl DeviceOptions {
    pub fn with_profile(mut self, profile: DeviceProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_calibration(mut self, table: RangeTable) -> Self {
        self.calibration = Some(table);
        self
    }

    pub fn with_engine(mut self, engine: EngineCfg) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Idle,
    Streaming,
    Disconnected,
}

/// Result of [`Device::measure`]: whatever was captured, plus the fault that
/// ended the capture early, if any.
#[derive(Debug, Clone)]
pub struct Capture {
    pub buffer: SampleBuffer,
    pub stats: DecodeStats,
    pub terminal: Option<PpkError>,
}

pub struct Device<C: ByteChannel> {
    pub(crate) channel: C,
    pub(crate) id: String,
    pub(crate) profile: DeviceProfile,
    table: RangeTable,
    derived_table: bool,
    info: DeviceMetadata,
    pub(crate) engine: EngineCfg,
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,
    mode: DeviceMode,
    vdd_mv: u16,
    power: bool,
    pub(crate) state: DeviceState,
    stop: StopHandle,
}

#[cfg(feature = "hardware")]
impl Device<ppk_hardware::SerialChannel> {
    /// Locate and open a USB instrument.
    pub fn open(selector: &DeviceSelector, baud: u32, options: DeviceOptions) -> Result<Self> {
        let port = match selector {
            DeviceSelector::Port(p) => p.clone(),
            DeviceSelector::Auto { vid, pid } => ppk_hardware::find_ports(*vid, *pid)
                .map_err(|e| map_open_error(&selector.to_string(), &e))?
                .into_iter()
                .next()
                .ok_or_else(|| PpkError::DeviceNotFound {
                    selector: selector.to_string(),
                })?,
        };
        Self::open_with(&port, options, |p| {
            ppk_hardware::SerialChannel::open(p, baud).map_err(|e| Box::new(e) as ChannelError)
        })
    }
}

impl<C: ByteChannel> Device<C> {
    /// Open through `connect` and identify the instrument.
    pub fn open_with<F>(selector: &str, options: DeviceOptions, connect: F) -> Result<Self>
    where
        F: FnOnce(&str) -> std::result::Result<C, ChannelError>,
    {
        let channel = connect(selector).map_err(|e| map_open_error(selector, &*e))?;
        Self::attach(channel, options)
    }

    /// Identify the instrument on an already-open channel.
    ///
    /// Halts any stream left running, reads the identification text, programs
    /// the regulator and resets out-of-band user gains.
    pub fn attach(channel: C, options: DeviceOptions) -> Result<Self> {
        let DeviceOptions {
            profile,
            calibration,
            engine,
            clock,
        } = options;
        if let Some(max) = calibration.as_ref().and_then(RangeTable::max_range)
            && max >= profile.range_count
        {
            return Err(PpkError::InvalidParameter(format!(
                "calibration covers range {max} but profile {} defines {} ranges",
                profile.name, profile.range_count
            )));
        }
        let id = channel.id().to_string();
        let derived_table = calibration.is_none();
        // Nominal table until the instrument's own modifiers are known.
        let table = match calibration {
            Some(t) => t,
            None => RangeTable::from_modifiers(
                &Modifiers::ppk2_defaults(usize::from(profile.range_count)),
                profile.vdd_min_mv,
                profile.range_count,
            )?,
        };
        let mut dev = Self {
            channel,
            id,
            table,
            derived_table,
            info: DeviceMetadata::default(),
            engine,
            clock,
            mode: DeviceMode::SourceMeter,
            vdd_mv: profile.vdd_min_mv,
            power: false,
            state: DeviceState::Idle,
            stop: StopHandle::new(),
            profile,
        };
        dev.identify()?;
        Ok(dev)
    }

    fn identify(&mut self) -> Result<()> {
        self.send(Command::AverageStop)?;
        self.drain()?;
        self.send(Command::GetMetadata)?;
        let term = self.profile.metadata_terminator.clone();
        let (bytes, done) = self.read_until(self.engine.identify_timeout, |b| {
            metadata::is_complete(&String::from_utf8_lossy(b), &term)
        })?;
        if !done {
            return Err(PpkError::DeviceProtocol {
                device: self.id.clone(),
                detail: format!(
                    "no identification response within {:?} ({} bytes received)",
                    self.engine.identify_timeout,
                    bytes.len()
                ),
            });
        }
        let text = String::from_utf8_lossy(&bytes);
        let mut info = metadata::parse(&text, &term, self.profile.range_count).map_err(|detail| {
            PpkError::DeviceProtocol {
                device: self.id.clone(),
                detail,
            }
        })?;

        let cmds = &self.profile.commands;
        self.mode = info
            .mode
            .and_then(|m| DeviceMode::from_code(m, cmds))
            .unwrap_or(DeviceMode::SourceMeter);
        let span = self.profile.vdd_span();
        self.vdd_mv = info
            .vdd_mv
            .filter(|v| span.contains(v))
            .unwrap_or_else(|| 3700u16.clamp(*span.start(), *span.end()));
        self.send(Command::RegulatorSet { mv: self.vdd_mv })?;

        for range in 0..self.profile.range_count {
            let i = usize::from(range);
            let Some(ug) = info.modifiers.ug.get(i).copied() else {
                continue;
            };
            if !USER_GAIN_BAND.contains(&ug) {
                tracing::warn!(device = %self.id, range, gain = ug, "user gain out of band, resetting to 1.0");
                self.send(Command::SetUserGain { range, gain: 1.0 })?;
                info.modifiers.set("ug", i, 1.0);
            }
        }
        self.info = info;
        if self.derived_table {
            self.rebuild_table()?;
        }
        tracing::info!(
            device = %self.id,
            profile = %self.profile.name,
            hw = ?self.info.hw,
            vdd_mv = self.vdd_mv,
            mode = %self.mode,
            derived_calibration = self.derived_table,
            "instrument identified"
        );
        Ok(())
    }

    fn rebuild_table(&mut self) -> Result<()> {
        self.table =
            RangeTable::from_modifiers(&self.info.modifiers, self.vdd_mv, self.profile.range_count)
                .map_err(|e| PpkError::DeviceProtocol {
                    device: self.id.clone(),
                    detail: format!("cannot derive calibration: {e}"),
                })?;
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn range_table(&self) -> &RangeTable {
        &self.table
    }

    /// Identification data reported by the instrument.
    pub fn info(&self) -> &DeviceMetadata {
        &self.info
    }

    pub fn mode(&self) -> DeviceMode {
        self.mode
    }

    pub fn source_voltage_mv(&self) -> u16 {
        self.vdd_mv
    }

    pub fn power_on(&self) -> bool {
        self.power
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Flag observed by every stream this device starts.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    fn ensure_idle(&self, action: &str) -> Result<()> {
        match self.state {
            DeviceState::Idle => Ok(()),
            DeviceState::Streaming => Err(PpkError::InvalidState(format!(
                "cannot {action} while a measurement is running on {}",
                self.id
            ))),
            DeviceState::Disconnected => Err(PpkError::DeviceDisconnected {
                device: self.id.clone(),
                detail: format!("cannot {action}"),
            }),
        }
    }

    pub fn set_mode(&mut self, mode: DeviceMode) -> Result<()> {
        self.ensure_idle("change mode")?;
        let cmd = Command::SetPowerMode(mode);
        let expected = cmd.encode(&self.profile.commands);
        self.send(cmd)?;
        if self.profile.mode_ack == AckPolicy::Echo {
            let (got, done) = self.read_until(self.engine.ack_timeout, |b| {
                b.windows(expected.len()).any(|w| w == expected.as_slice())
            })?;
            if !done {
                let detail = if got.is_empty() {
                    format!("no acknowledgement for mode select within {:?}", self.engine.ack_timeout)
                } else {
                    format!("unexpected acknowledgement {got:02X?}, wanted {expected:02X?}")
                };
                return Err(PpkError::DeviceProtocol {
                    device: self.id.clone(),
                    detail,
                });
            }
        }
        self.mode = mode;
        tracing::info!(device = %self.id, mode = %mode, "mode set");
        Ok(())
    }

    /// Program the source voltage. Validated before anything is sent.
    pub fn set_source_voltage(&mut self, mv: u16) -> Result<()> {
        let span = self.profile.vdd_span();
        if !span.contains(&mv) {
            return Err(PpkError::InvalidParameter(format!(
                "source voltage {mv} mV outside {}..={} mV",
                span.start(),
                span.end()
            )));
        }
        self.ensure_idle("set the source voltage")?;
        if self.mode != DeviceMode::SourceMeter {
            return Err(PpkError::InvalidState(
                "source voltage requires source-meter mode".into(),
            ));
        }
        self.send(Command::RegulatorSet { mv })?;
        self.vdd_mv = mv;
        if self.derived_table {
            self.rebuild_table()?;
        }
        tracing::info!(device = %self.id, vdd_mv = mv, "source voltage set");
        Ok(())
    }

    pub fn set_power(&mut self, on: bool) -> Result<()> {
        self.ensure_idle("toggle DUT power")?;
        self.send(Command::DeviceRunning { on })?;
        self.power = on;
        tracing::info!(device = %self.id, on, "DUT power");
        Ok(())
    }

    /// Program the firmware's per-range user gain.
    pub fn set_user_gain(&mut self, range: u8, gain: f32) -> Result<()> {
        if range >= self.profile.range_count {
            return Err(PpkError::InvalidParameter(format!(
                "range {range} outside 0..{}",
                self.profile.range_count
            )));
        }
        if !gain.is_finite() || gain <= 0.0 {
            return Err(PpkError::InvalidParameter(format!(
                "user gain must be finite and > 0, got {gain}"
            )));
        }
        self.ensure_idle("set a user gain")?;
        self.send(Command::SetUserGain { range, gain })?;
        self.info.modifiers.set("ug", usize::from(range), f64::from(gain));
        if self.derived_table {
            self.rebuild_table()?;
        }
        Ok(())
    }

    /// Begin streaming. Only one stream may be active per handle.
    pub fn start_measurement(&mut self) -> Result<MeasurementStream<'_, C>> {
        self.ensure_idle("start a measurement")?;
        self.stop.clear();
        self.send(Command::AverageStart)?;
        self.state = DeviceState::Streaming;
        tracing::info!(device = %self.id, "measurement started");
        let decoder = self.new_decoder();
        Ok(MeasurementStream::new(self, decoder))
    }

    /// Halt streaming and discard whatever the instrument still had in flight.
    ///
    /// No-op when nothing is streaming.
    pub fn stop_measurement(&mut self) -> Result<()> {
        if self.state != DeviceState::Streaming {
            return Ok(());
        }
        self.send(Command::AverageStop)?;
        let discarded = self.drain()?;
        self.state = DeviceState::Idle;
        tracing::info!(device = %self.id, discarded, "measurement stopped");
        Ok(())
    }

    /// Stream for `duration` (or until the stop handle fires) into a buffer.
    pub fn measure(&mut self, duration: Duration) -> Result<Capture> {
        let meta = Metadata::new(self.profile.sample_rate_hz)?.with_start_time_ms(now_epoch_ms());
        let rate = self.profile.sample_rate_hz;
        let expected = (duration.as_secs_f64() * f64::from(rate)) as usize;
        let mut buffer = SampleBuffer::with_capacity(meta, expected.min(1 << 26))?;
        let deadline: Instant = self.clock.now() + duration;

        let mut stream = self.start_measurement()?;
        stream.set_deadline(deadline);
        let mut terminal = None;
        loop {
            match stream.next_sample() {
                Ok(Some(s)) => buffer.push(s)?,
                Ok(None) => break,
                Err(e) => {
                    terminal = Some(e);
                    break;
                }
            }
        }
        let stats = stream.stats();
        drop(stream);
        if let Some(e) = &terminal {
            tracing::error!(device = %self.id, error = %e, samples = buffer.sample_count(), "capture ended early");
        }
        Ok(Capture {
            buffer,
            stats,
            terminal,
        })
    }

    fn new_decoder(&self) -> Decoder {
        Decoder::new(
            DecoderCfg {
                layout: self.profile.frame,
                range_count: self.profile.range_count,
                settle_drop: self.engine.settle_drop,
                spike_filter: self.engine.spike_filter.then(SpikeFilterCfg::default),
                device: self.id.clone(),
            },
            self.table.clone(),
        )
    }

    pub(crate) fn send(&mut self, cmd: Command) -> Result<()> {
        let bytes = cmd.encode(&self.profile.commands);
        tracing::debug!(device = %self.id, command = cmd.name(), bytes = ?bytes, "send");
        self.channel.write(&bytes).map_err(|e| match classify(&*e) {
            ChannelFault::Gone(detail) => {
                self.state = DeviceState::Disconnected;
                PpkError::DeviceDisconnected {
                    device: self.id.clone(),
                    detail,
                }
            }
            ChannelFault::Transient(detail) => PpkError::DeviceProtocol {
                device: self.id.clone(),
                detail: format!("{} not sent: {detail}", cmd.name()),
            },
        })
    }

    /// Discard pending input until the channel goes quiet. Returns bytes dropped.
    fn drain(&mut self) -> Result<usize> {
        let mut buf = vec![0u8; self.engine.read_chunk.max(64)];
        let mut total = 0usize;
        while total < self.engine.drain_limit {
            match self.channel.read(&mut buf, self.engine.read_timeout) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) => match classify(&*e) {
                    ChannelFault::Gone(detail) => {
                        self.state = DeviceState::Disconnected;
                        return Err(PpkError::DeviceDisconnected {
                            device: self.id.clone(),
                            detail,
                        });
                    }
                    ChannelFault::Transient(_) => break,
                },
            }
        }
        Ok(total)
    }

    /// Read until `done` holds for the accumulated bytes or `timeout` passes.
    ///
    /// Time is charged both from the clock and from the read timeouts spent,
    /// so a clock that does not advance on its own still ends the wait.
    fn read_until<F>(&mut self, timeout: Duration, done: F) -> Result<(Vec<u8>, bool)>
    where
        F: Fn(&[u8]) -> bool,
    {
        let deadline = self.clock.now() + timeout;
        let mut waited = Duration::ZERO;
        let mut acc = Vec::new();
        let mut buf = vec![0u8; 256];
        loop {
            if done(&acc) {
                return Ok((acc, true));
            }
            if waited >= timeout || self.clock.is_past(deadline) {
                return Ok((acc, false));
            }
            let step = self.engine.read_timeout.min(timeout - waited);
            match self.channel.read(&mut buf, step) {
                Ok(0) => waited += step,
                Ok(n) => acc.extend_from_slice(&buf[..n]),
                Err(e) => match classify(&*e) {
                    ChannelFault::Gone(detail) => {
                        self.state = DeviceState::Disconnected;
                        return Err(PpkError::DeviceDisconnected {
                            device: self.id.clone(),
                            detail,
                        });
                    }
                    ChannelFault::Transient(detail) => {
                        tracing::debug!(device = %self.id, %detail, "transient read error");
                        waited += step;
                    }
                },
            }
        }
    }
}
