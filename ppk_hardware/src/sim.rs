//! Simulated PPK2-class instrument.
//!
//! Speaks the same byte protocol as the real device: answers the metadata
//! query, echoes mode-select commands (when its profile says so), and streams
//! frames packed with the profile's layout while measuring. A [`SimHandle`]
//! shared with the test lets it inject raw bytes, script read faults, pull the
//! plug, and inspect what the host wrote.
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use ppk_config::{DeviceProfile, RawFrame};
use ppk_traits::{ByteChannel, ChannelError};

use crate::error::HwError;

/// Default per-range shunt resistances reported by a PPK2 (ohms).
pub const DEFAULT_RESISTORS: [f64; 5] = [1031.64, 101.65, 10.15, 0.94, 0.043];

/// Build the identification text a PPK2 sends in answer to the metadata query.
pub fn metadata_text(vdd_mv: u16, mode: u8, resistors: &[f64]) -> String {
    let mut lines = Vec::new();
    for (i, r) in resistors.iter().enumerate() {
        lines.push(format!("R{i}: {r}"));
    }
    for (prefix, default) in [
        ("GS", 1.0),
        ("GI", 1.0),
        ("O", 0.0),
        ("S", 0.0),
        ("I", 0.0),
        ("UG", 1.0),
    ] {
        for i in 0..resistors.len() {
            lines.push(format!("{prefix}{i}: {default:.1}"));
        }
    }
    lines.push(format!("VDD: {vdd_mv}"));
    lines.push(format!("Mode: {mode}"));
    lines.push("HW: 9".into());
    lines.push("END".into());
    lines.join("\n")
}

/// Scripted outcome of one `read` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFault {
    /// Nothing arrives before the timeout.
    Timeout,
    /// Transient link error; the next read may succeed.
    Transient,
    /// Link gone for good.
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimLevel {
    pub range: u8,
    pub adc: u16,
}

/// Live signal streamed while measuring: the levels repeat in order, each
/// held for `hold_frames` frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimSignal {
    pub levels: Vec<SimLevel>,
    pub hold_frames: u32,
    pub logic: u16,
}

impl SimSignal {
    pub fn constant(range: u8, adc: u16) -> Self {
        Self {
            levels: vec![SimLevel { range, adc }],
            hold_frames: 1,
            logic: 0,
        }
    }

    /// Alternate between two levels every `hold_frames` frames.
    pub fn square(low: SimLevel, high: SimLevel, hold_frames: u32) -> Self {
        Self {
            levels: vec![low, high],
            hold_frames: hold_frames.max(1),
            logic: 0,
        }
    }

    pub fn with_logic(mut self, logic: u16) -> Self {
        self.logic = logic;
        self
    }

    fn frame(&self, index: u64, counter: Option<u8>) -> RawFrame {
        let level = if self.levels.is_empty() {
            SimLevel { range: 0, adc: 0 }
        } else {
            let slot = index / u64::from(self.hold_frames.max(1));
            self.levels[(slot % self.levels.len() as u64) as usize]
        };
        RawFrame {
            adc: level.adc,
            range: level.range,
            counter,
            logic: self.logic,
        }
    }
}

#[derive(Debug)]
struct SimState {
    profile: DeviceProfile,
    metadata: Option<String>,
    echo: bool,
    signal: Option<SimSignal>,
    frames_per_read: usize,
    paced: bool,

    rx: VecDeque<u8>,
    faults: VecDeque<SimFault>,
    write_faults: usize,
    written: Vec<Vec<u8>>,
    connected: bool,
    measuring: bool,
    started: Option<Instant>,
    emitted: u64,
    vdd_mv: Option<u16>,
    powered: bool,
    user_gains: Vec<(u8, f32)>,
}

impl SimState {
    fn on_command(&mut self, bytes: &[u8]) {
        let Some(&op) = bytes.first() else {
            return;
        };
        let cmds = &self.profile.commands;
        if op == cmds.get_metadata {
            if let Some(text) = &self.metadata {
                self.rx.extend(text.as_bytes());
                self.rx.push_back(b'\n');
            }
        } else if op == cmds.average_start {
            self.measuring = true;
            self.started = Some(Instant::now());
            self.emitted = 0;
        } else if op == cmds.average_stop || op == cmds.reset {
            self.measuring = false;
        } else if op == cmds.set_power_mode {
            if self.echo {
                self.rx.extend(bytes);
            }
        } else if op == cmds.regulator_set && bytes.len() >= 3 {
            self.vdd_mv = Some(u16::from_be_bytes([bytes[1], bytes[2]]));
        } else if op == cmds.device_running_set && bytes.len() >= 2 {
            self.powered = bytes[1] != 0;
        } else if op == cmds.set_user_gains && bytes.len() >= 6 {
            let gain = f32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
            self.user_gains.push((bytes[1], gain));
        }
    }

    /// Queue the frames due now, at most `room` bytes worth.
    fn generate(&mut self, room: usize) {
        let Some(signal) = self.signal.clone() else {
            return;
        };
        let layout = self.profile.frame;
        let size = layout.frame_size().max(1);
        let cap = (room / size).max(1) as u64;
        let due = if self.paced {
            let elapsed = self.started.map_or(Duration::ZERO, |t| t.elapsed());
            let target = (elapsed.as_secs_f64() * f64::from(self.profile.sample_rate_hz)) as u64;
            target.saturating_sub(self.emitted)
        } else {
            self.frames_per_read as u64
        };
        let modulus = u64::from(layout.counter_modulus());
        for _ in 0..due.min(cap) {
            let counter = layout
                .has_counter()
                .then(|| (self.emitted % modulus) as u8);
            let frame = signal.frame(self.emitted, counter);
            self.rx.extend(layout.encode(frame));
            self.emitted += 1;
        }
    }
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process instrument implementing [`ByteChannel`].
pub struct SimulatedPpk {
    id: String,
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedPpk {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPpk {
    /// PPK2 profile, default identification text, no live signal.
    pub fn new() -> Self {
        Self::with_profile(DeviceProfile::ppk2())
    }

    pub fn with_profile(profile: DeviceProfile) -> Self {
        let echo = profile.mode_ack == ppk_config::AckPolicy::Echo;
        let ranges = usize::from(profile.range_count).min(DEFAULT_RESISTORS.len());
        let metadata = metadata_text(3700, 2, &DEFAULT_RESISTORS[..ranges.max(1)]);
        Self {
            id: "sim".into(),
            state: Arc::new(Mutex::new(SimState {
                profile,
                metadata: Some(metadata),
                echo,
                signal: None,
                frames_per_read: 256,
                paced: false,
                rx: VecDeque::new(),
                faults: VecDeque::new(),
                write_faults: 0,
                written: Vec::new(),
                connected: true,
                measuring: false,
                started: None,
                emitted: 0,
                vdd_mv: None,
                powered: false,
                user_gains: Vec::new(),
            })),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Replace the identification text (must include the terminator line).
    pub fn with_metadata(self, text: impl Into<String>) -> Self {
        lock(&self.state).metadata = Some(text.into());
        self
    }

    /// Never answer the metadata query.
    pub fn silent(self) -> Self {
        lock(&self.state).metadata = None;
        self
    }

    pub fn with_echo(self, echo: bool) -> Self {
        lock(&self.state).echo = echo;
        self
    }

    pub fn with_signal(self, signal: SimSignal) -> Self {
        lock(&self.state).signal = Some(signal);
        self
    }

    /// Frames produced per read when not paced.
    pub fn with_frames_per_read(self, n: usize) -> Self {
        lock(&self.state).frames_per_read = n.max(1);
        self
    }

    /// Emit frames at the profile's sample rate against the wall clock.
    pub fn paced(self, paced: bool) -> Self {
        lock(&self.state).paced = paced;
        self
    }

    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl ByteChannel for SimulatedPpk {
    fn id(&self) -> &str {
        &self.id
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        let mut st = lock(&self.state);
        if !st.connected {
            return Err(Box::new(HwError::Disconnected(self.id.clone())));
        }
        if st.write_faults > 0 {
            st.write_faults -= 1;
            return Err(Box::new(HwError::Serial("simulated write fault".into())));
        }
        st.written.push(bytes.to_vec());
        st.on_command(bytes);
        tracing::trace!(port = %self.id, len = bytes.len(), "sim write");
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ChannelError> {
        let mut st = lock(&self.state);
        match st.faults.pop_front() {
            Some(SimFault::Timeout) => return Ok(0),
            Some(SimFault::Transient) => {
                return Err(Box::new(HwError::Serial("simulated transient fault".into())));
            }
            Some(SimFault::Disconnect) => st.connected = false,
            None => {}
        }
        if !st.connected {
            return Err(Box::new(HwError::Disconnected(self.id.clone())));
        }
        if st.rx.is_empty() && st.measuring {
            st.generate(buf.len());
        }
        if st.rx.is_empty() {
            let paced = st.paced;
            drop(st);
            if paced {
                std::thread::sleep(timeout.min(Duration::from_millis(1)));
            }
            return Ok(0);
        }
        let n = buf.len().min(st.rx.len());
        for (dst, src) in buf.iter_mut().zip(st.rx.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

/// Test-side view of a [`SimulatedPpk`].
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    /// Queue raw bytes for the host to read.
    pub fn inject(&self, bytes: &[u8]) {
        lock(&self.state).rx.extend(bytes);
    }

    /// Queue frames packed with the simulator's layout.
    pub fn inject_frames(&self, frames: &[RawFrame]) {
        let mut st = lock(&self.state);
        let layout = st.profile.frame;
        for f in frames {
            let bytes = layout.encode(*f);
            st.rx.extend(bytes);
        }
    }

    /// Script the outcome of the next `n` reads.
    pub fn fail_next_reads(&self, fault: SimFault, n: usize) {
        let mut st = lock(&self.state);
        for _ in 0..n {
            st.faults.push_back(fault);
        }
    }

    /// Fail the next `n` writes with a transient serial error. Failed
    /// writes are not recorded.
    pub fn fail_next_writes(&self, n: usize) {
        lock(&self.state).write_faults += n;
    }

    pub fn disconnect(&self) {
        lock(&self.state).connected = false;
    }

    /// Every command the host wrote, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        lock(&self.state).written.clone()
    }

    /// Commands whose first byte is `opcode`.
    pub fn written_with(&self, opcode: u8) -> Vec<Vec<u8>> {
        self.written()
            .into_iter()
            .filter(|c| c.first() == Some(&opcode))
            .collect()
    }

    pub fn is_measuring(&self) -> bool {
        lock(&self.state).measuring
    }

    /// Bytes queued but not yet read by the host.
    pub fn pending(&self) -> usize {
        lock(&self.state).rx.len()
    }

    pub fn vdd_mv(&self) -> Option<u16> {
        lock(&self.state).vdd_mv
    }

    pub fn powered(&self) -> bool {
        lock(&self.state).powered
    }

    pub fn user_gains(&self) -> Vec<(u8, f32)> {
        lock(&self.state).user_gains.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_millis(5);

    fn read_all(sim: &mut SimulatedPpk) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            let n = sim.read(&mut buf, T).unwrap();
            if n == 0 {
                return out;
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    #[test]
    fn answers_metadata_query() {
        let mut sim = SimulatedPpk::new();
        sim.write(&[0x19]).unwrap();
        let text = String::from_utf8(read_all(&mut sim)).unwrap();
        assert!(text.starts_with("R0: 1031.64"));
        assert!(text.contains("VDD: 3700"));
        assert!(text.trim_end().ends_with("END"));
    }

    #[test]
    fn silent_sim_never_answers() {
        let mut sim = SimulatedPpk::new().silent();
        sim.write(&[0x19]).unwrap();
        assert!(read_all(&mut sim).is_empty());
    }

    #[test]
    fn echoes_mode_select() {
        let mut sim = SimulatedPpk::new();
        sim.write(&[0x11, 0x01]).unwrap();
        assert_eq!(read_all(&mut sim), vec![0x11, 0x01]);
    }

    #[test]
    fn streams_counted_frames_while_measuring() {
        let mut sim = SimulatedPpk::new()
            .with_signal(SimSignal::constant(2, 1000))
            .with_frames_per_read(3);
        let h = sim.handle();
        sim.write(&[0x06]).unwrap();
        assert!(h.is_measuring());
        let mut buf = [0u8; 64];
        let n = sim.read(&mut buf, T).unwrap();
        assert_eq!(n, 12);
        let layout = ppk_config::FrameLayout::ppk2();
        let counters: Vec<_> = buf[..n]
            .chunks(4)
            .map(|c| layout.decode(c).counter)
            .collect();
        assert_eq!(counters, vec![Some(0), Some(1), Some(2)]);
        sim.write(&[0x07]).unwrap();
        assert!(!h.is_measuring());
        assert_eq!(sim.read(&mut buf, T).unwrap(), 0);
    }

    #[test]
    fn scripted_faults_then_disconnect() {
        let mut sim = SimulatedPpk::new();
        let h = sim.handle();
        h.inject(&[1, 2, 3]);
        h.fail_next_reads(SimFault::Timeout, 1);
        h.fail_next_reads(SimFault::Transient, 1);
        let mut buf = [0u8; 8];
        assert_eq!(sim.read(&mut buf, T).unwrap(), 0);
        assert!(sim.read(&mut buf, T).is_err());
        assert_eq!(sim.read(&mut buf, T).unwrap(), 3);
        h.disconnect();
        let err = sim.read(&mut buf, T).unwrap_err();
        assert!(err.to_string().contains("disconnected"));
        assert!(sim.write(&[0x06]).is_err());
    }

    #[test]
    fn records_regulator_power_and_gains() {
        let mut sim = SimulatedPpk::new();
        let h = sim.handle();
        sim.write(&[0x0D, 0x0E, 0x74]).unwrap();
        sim.write(&[0x0C, 0x01]).unwrap();
        let mut cmd = vec![0x25, 3];
        cmd.extend_from_slice(&1.0f32.to_le_bytes());
        sim.write(&cmd).unwrap();
        assert_eq!(h.vdd_mv(), Some(3700));
        assert!(h.powered());
        assert_eq!(h.user_gains(), vec![(3, 1.0)]);
        assert_eq!(h.written_with(0x0D).len(), 1);
    }
}
