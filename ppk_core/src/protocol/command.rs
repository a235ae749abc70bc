use ppk_config::CommandTable;

/// Whether the instrument supplies the DUT itself or measures an external supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    SourceMeter,
    AmpereMeter,
}

impl DeviceMode {
    pub fn code(self, table: &CommandTable) -> u8 {
        match self {
            Self::SourceMeter => table.power_mode_source,
            Self::AmpereMeter => table.power_mode_ampere,
        }
    }

    pub fn from_code(code: u8, table: &CommandTable) -> Option<Self> {
        if code == table.power_mode_source {
            Some(Self::SourceMeter)
        } else if code == table.power_mode_ampere {
            Some(Self::AmpereMeter)
        } else {
            None
        }
    }
}

impl std::fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::SourceMeter => "source",
            Self::AmpereMeter => "ampere",
        })
    }
}

/// Host to instrument commands; opcodes come from the injected table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    AverageStart,
    AverageStop,
    GetMetadata,
    Reset,
    SetPowerMode(DeviceMode),
    RegulatorSet { mv: u16 },
    DeviceRunning { on: bool },
    SetUserGain { range: u8, gain: f32 },
}

impl Command {
    pub fn encode(&self, t: &CommandTable) -> Vec<u8> {
        match *self {
            Self::AverageStart => vec![t.average_start],
            Self::AverageStop => vec![t.average_stop],
            Self::GetMetadata => vec![t.get_metadata],
            Self::Reset => vec![t.reset],
            Self::SetPowerMode(mode) => vec![t.set_power_mode, mode.code(t)],
            Self::RegulatorSet { mv } => {
                let [hi, lo] = mv.to_be_bytes();
                vec![t.regulator_set, hi, lo]
            }
            Self::DeviceRunning { on } => vec![t.device_running_set, u8::from(on)],
            Self::SetUserGain { range, gain } => {
                let mut v = vec![t.set_user_gains, range];
                v.extend_from_slice(&gain.to_le_bytes());
                v
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AverageStart => "average_start",
            Self::AverageStop => "average_stop",
            Self::GetMetadata => "get_metadata",
            Self::Reset => "reset",
            Self::SetPowerMode(_) => "set_power_mode",
            Self::RegulatorSet { .. } => "regulator_set",
            Self::DeviceRunning { .. } => "device_running_set",
            Self::SetUserGain { .. } => "set_user_gains",
        }
    }
}
