use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("no instrument found: {0}")]
    NotFound(String),
    #[error("permission denied opening {port}: {reason}")]
    PermissionDenied { port: String, reason: String },
    #[error("port {port} busy: {reason}")]
    Busy { port: String, reason: String },
    #[error("read timeout")]
    Timeout,
    #[error("instrument disconnected: {0}")]
    Disconnected(String),
    #[error("serial error: {0}")]
    Serial(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
