use thiserror::Error;

/// Every failure the acquisition engine, codec and builder can report.
///
/// Variants carry the context needed to diagnose the fault without
/// re-running: device id, file path, byte offset or raw range code.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PpkError {
    #[error("no instrument found matching '{selector}'")]
    DeviceNotFound { selector: String },
    #[error("cannot claim {device}: {reason}")]
    DevicePermission { device: String, reason: String },
    #[error("protocol error on {device}: {detail}")]
    DeviceProtocol { device: String, detail: String },
    #[error("{device} disconnected: {detail}")]
    DeviceDisconnected { device: String, detail: String },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("no calibration for range code {range} on {device}")]
    Calibration { device: String, range: u8 },
    #[error("bad frame at byte {offset}: {detail}")]
    Decode { offset: u64, detail: String },
    #[error("corrupt file {path}: {detail}")]
    CorruptFile { path: String, detail: String },
    #[error("{path}: unsupported format version {version}")]
    UnsupportedVersion { path: String, version: u64 },
    #[error("io error on {path}: {detail}")]
    Io { path: String, detail: String },
}

impl PpkError {
    pub(crate) fn corrupt(path: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::CorruptFile {
            path: path.into(),
            detail: detail.into(),
        }
    }

    pub(crate) fn io(path: impl Into<String>, e: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            detail: e.to_string(),
        }
    }

    /// True for faults after which the stream cannot continue.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Decode { .. })
    }
}

pub type Result<T> = std::result::Result<T, PpkError>;
