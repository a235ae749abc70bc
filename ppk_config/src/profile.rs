//! Instrument profile: the versioned command-opcode table and the wire frame
//! layout of one firmware/hardware revision.
//!
//! Supporting a new revision means supplying a new profile (built-in or TOML),
//! not changing the engine.
use serde::Deserialize;

/// How the instrument confirms mode-select commands.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AckPolicy {
    /// Firmware is silent; the command is considered applied once written.
    None,
    /// Firmware echoes the command bytes back before streaming resumes.
    #[default]
    Echo,
}

/// Opcodes understood by the instrument firmware.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct CommandTable {
    pub average_start: u8,
    pub average_stop: u8,
    pub device_running_set: u8,
    pub regulator_set: u8,
    pub set_power_mode: u8,
    pub get_metadata: u8,
    pub reset: u8,
    pub set_user_gains: u8,
    /// Argument of `set_power_mode` selecting ampere-meter operation.
    pub power_mode_ampere: u8,
    /// Argument of `set_power_mode` selecting source-meter operation.
    pub power_mode_source: u8,
}

impl Default for CommandTable {
    fn default() -> Self {
        Self {
            average_start: 0x06,
            average_stop: 0x07,
            device_running_set: 0x0C,
            regulator_set: 0x0D,
            set_power_mode: 0x11,
            get_metadata: 0x19,
            reset: 0x20,
            set_user_gains: 0x25,
            power_mode_ampere: 1,
            power_mode_source: 2,
        }
    }
}

impl CommandTable {
    fn opcodes(&self) -> [u8; 8] {
        [
            self.average_start,
            self.average_stop,
            self.device_running_set,
            self.regulator_set,
            self.set_power_mode,
            self.get_metadata,
            self.reset,
            self.set_user_gains,
        ]
    }
}

/// One measurement frame split into its fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawFrame {
    pub adc: u16,
    pub range: u8,
    /// Rolling sample counter, when the layout carries one.
    pub counter: Option<u8>,
    pub logic: u16,
}

/// Bit packing of a little-endian measurement frame (at most 32 bits).
///
/// The ADC reading always starts at bit 0.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct FrameLayout {
    pub size: u8,
    pub adc_bits: u8,
    pub range_shift: u8,
    pub range_bits: u8,
    pub counter_shift: u8,
    /// 0 when frames carry no counter.
    pub counter_bits: u8,
    pub logic_shift: u8,
    pub logic_bits: u8,
}

impl Default for FrameLayout {
    fn default() -> Self {
        Self::ppk2()
    }
}

#[inline]
fn field(word: u32, shift: u8, bits: u8) -> u32 {
    if bits == 0 {
        return 0;
    }
    let mask = if bits >= 32 { u32::MAX } else { (1u32 << bits) - 1 };
    (word >> shift) & mask
}

#[inline]
fn place(value: u32, shift: u8, bits: u8) -> u32 {
    if bits == 0 {
        return 0;
    }
    field(value, 0, bits) << shift
}

impl FrameLayout {
    /// PPK2 stream: 14-bit ADC, 3-bit range, 6-bit counter, 8 logic channels in 4 bytes.
    pub const fn ppk2() -> Self {
        Self {
            size: 4,
            adc_bits: 14,
            range_shift: 14,
            range_bits: 3,
            counter_shift: 18,
            counter_bits: 6,
            logic_shift: 24,
            logic_bits: 8,
        }
    }

    /// 3-byte frame: 14-bit ADC packed with a 2-bit range field, then one logic byte.
    pub const fn compact() -> Self {
        Self {
            size: 3,
            adc_bits: 14,
            range_shift: 14,
            range_bits: 2,
            counter_shift: 0,
            counter_bits: 0,
            logic_shift: 16,
            logic_bits: 8,
        }
    }

    #[inline]
    pub fn frame_size(&self) -> usize {
        usize::from(self.size)
    }

    pub fn has_counter(&self) -> bool {
        self.counter_bits > 0
    }

    /// Modulus of the rolling counter (e.g. 64 for a 6-bit counter).
    pub fn counter_modulus(&self) -> u16 {
        1u16 << self.counter_bits.min(8)
    }

    /// Split one frame. `bytes` must hold at least `frame_size()` bytes.
    pub fn decode(&self, bytes: &[u8]) -> RawFrame {
        let mut word = 0u32;
        for (i, b) in bytes.iter().take(self.frame_size()).enumerate() {
            word |= u32::from(*b) << (8 * i);
        }
        RawFrame {
            adc: field(word, 0, self.adc_bits) as u16,
            range: field(word, self.range_shift, self.range_bits) as u8,
            counter: self
                .has_counter()
                .then(|| field(word, self.counter_shift, self.counter_bits) as u8),
            logic: field(word, self.logic_shift, self.logic_bits) as u16,
        }
    }

    /// Pack a frame; fields wider than the layout are truncated.
    pub fn encode(&self, frame: RawFrame) -> Vec<u8> {
        let word = place(u32::from(frame.adc), 0, self.adc_bits)
            | place(u32::from(frame.range), self.range_shift, self.range_bits)
            | place(
                u32::from(frame.counter.unwrap_or(0)),
                self.counter_shift,
                self.counter_bits,
            )
            | place(u32::from(frame.logic), self.logic_shift, self.logic_bits);
        word.to_le_bytes()[..self.frame_size()].to_vec()
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(1..=4).contains(&self.size) {
            return Err(format!("frame.size must be 1..=4 bytes, got {}", self.size));
        }
        if self.adc_bits == 0 || self.adc_bits > 16 {
            return Err("frame.adc_bits must be 1..=16".into());
        }
        if self.range_bits == 0 || self.range_bits > 8 {
            return Err("frame.range_bits must be 1..=8".into());
        }
        if self.counter_bits > 8 {
            return Err("frame.counter_bits must be <= 8".into());
        }
        if self.logic_bits > 16 {
            return Err("frame.logic_bits must be <= 16".into());
        }
        let width = u32::from(self.size) * 8;
        let fields = [
            ("adc", 0u8, self.adc_bits),
            ("range", self.range_shift, self.range_bits),
            ("counter", self.counter_shift, self.counter_bits),
            ("logic", self.logic_shift, self.logic_bits),
        ];
        let mut used = 0u64;
        for (name, shift, bits) in fields {
            if bits == 0 {
                continue;
            }
            let end = u32::from(shift) + u32::from(bits);
            if end > width {
                return Err(format!(
                    "frame.{name} field ends at bit {end}, beyond the {width}-bit frame"
                ));
            }
            let mask = ((1u64 << bits) - 1) << shift;
            if used & mask != 0 {
                return Err(format!("frame.{name} field overlaps another field"));
            }
            used |= mask;
        }
        Ok(())
    }
}

/// Everything the engine needs to know about one instrument revision.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DeviceProfile {
    pub name: String,
    pub revision: u32,
    /// Nominal streaming rate in Hz.
    pub sample_rate_hz: u32,
    /// Range codes `0..range_count` are defined; higher codes are reserved.
    pub range_count: u8,
    pub vdd_min_mv: u16,
    pub vdd_max_mv: u16,
    /// Line that terminates the identification (metadata) response.
    pub metadata_terminator: String,
    pub mode_ack: AckPolicy,
    pub commands: CommandTable,
    pub frame: FrameLayout,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self::ppk2()
    }
}

impl DeviceProfile {
    /// Built-in profile for the Power Profiler Kit II.
    pub fn ppk2() -> Self {
        Self {
            name: "ppk2".into(),
            revision: 1,
            sample_rate_hz: 100_000,
            range_count: 5,
            vdd_min_mv: 800,
            vdd_max_mv: 5000,
            metadata_terminator: "END".into(),
            mode_ack: AckPolicy::Echo,
            commands: CommandTable::default(),
            frame: FrameLayout::ppk2(),
        }
    }

    pub fn vdd_span(&self) -> std::ops::RangeInclusive<u16> {
        self.vdd_min_mv..=self.vdd_max_mv
    }

    pub fn validate(&self) -> eyre::Result<()> {
        self.frame
            .validate()
            .map_err(|e| eyre::eyre!("profile {}: {e}", self.name))?;
        if self.sample_rate_hz == 0 {
            eyre::bail!("profile.sample_rate_hz must be > 0");
        }
        if self.range_count == 0 {
            eyre::bail!("profile.range_count must be >= 1");
        }
        let codes = 1u32 << self.frame.range_bits;
        if u32::from(self.range_count) > codes {
            eyre::bail!(
                "profile.range_count {} does not fit a {}-bit range field",
                self.range_count,
                self.frame.range_bits
            );
        }
        if self.vdd_min_mv >= self.vdd_max_mv {
            eyre::bail!("profile.vdd_min_mv must be < profile.vdd_max_mv");
        }
        if self.metadata_terminator.trim().is_empty() {
            eyre::bail!("profile.metadata_terminator must not be empty");
        }
        let ops = self.commands.opcodes();
        for (i, a) in ops.iter().enumerate() {
            if ops[i + 1..].contains(a) {
                eyre::bail!("profile.commands: opcode 0x{a:02X} is assigned twice");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ppk2_frame_fields_split() {
        // adc=1000, range=2, counter=5, logic=0x81
        let word: u32 = 1000 | (2 << 14) | (5 << 18) | (0x81 << 24);
        let f = FrameLayout::ppk2().decode(&word.to_le_bytes());
        assert_eq!(f.adc, 1000);
        assert_eq!(f.range, 2);
        assert_eq!(f.counter, Some(5));
        assert_eq!(f.logic, 0x81);
    }

    #[test]
    fn compact_frame_has_no_counter() {
        let layout = FrameLayout::compact();
        let bytes = layout.encode(RawFrame {
            adc: 0x3FFF,
            range: 3,
            counter: Some(9),
            logic: 0xA5,
        });
        assert_eq!(bytes.len(), 3);
        let f = layout.decode(&bytes);
        assert_eq!(f.adc, 0x3FFF);
        assert_eq!(f.range, 3);
        assert_eq!(f.counter, None);
        assert_eq!(f.logic, 0xA5);
    }

    #[test]
    fn overlapping_fields_rejected() {
        let layout = FrameLayout {
            range_shift: 12,
            ..FrameLayout::ppk2()
        };
        let err = layout.validate().expect_err("adc and range overlap");
        assert!(err.contains("overlaps"));
    }

    #[test]
    fn builtin_profile_is_valid() {
        DeviceProfile::ppk2().validate().unwrap();
    }

    #[test]
    fn duplicate_opcode_rejected() {
        let mut p = DeviceProfile::ppk2();
        p.commands.average_stop = p.commands.average_start;
        let err = p.validate().expect_err("duplicate opcode");
        assert!(format!("{err}").contains("assigned twice"));
    }
}
