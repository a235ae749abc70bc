//! Maps `Box<dyn Error>` from the channel boundary to typed faults.
//!
//! `ppk_traits::ByteChannel` uses `Box<dyn Error + Send + Sync>` so any
//! transport can plug in; this module classifies those errors, with an
//! optional feature-gated path for `ppk_hardware::HwError` downcasting.

use crate::error::PpkError;

/// How the engine should react to a channel error.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelFault {
    /// Retry after backoff.
    Transient(String),
    /// The link is gone; end the stream.
    Gone(String),
}

/// Classify a channel error for the retry policy.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn classify(e: &(dyn std::error::Error + 'static)) -> ChannelFault {
    #[cfg(feature = "hardware-errors")]
    {
        use ppk_hardware::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::Timeout | HwError::Serial(_) | HwError::Io(_) => {
                    ChannelFault::Transient(hw.to_string())
                }
                other => ChannelFault::Gone(other.to_string()),
            };
        }
    }

    // Fallback: string-based detection
    let s = e.to_string();
    let lower = s.to_lowercase();
    if lower.contains("disconnect") || lower.contains("no such device") || lower.contains("broken pipe")
    {
        ChannelFault::Gone(s)
    } else {
        ChannelFault::Transient(s)
    }
}

/// Map an error raised while opening a channel.
pub fn map_open_error(selector: &str, e: &(dyn std::error::Error + 'static)) -> PpkError {
    #[cfg(feature = "hardware-errors")]
    {
        use ppk_hardware::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::NotFound(_) => PpkError::DeviceNotFound {
                    selector: selector.to_string(),
                },
                HwError::PermissionDenied { port, reason } | HwError::Busy { port, reason } => {
                    PpkError::DevicePermission {
                        device: port.clone(),
                        reason: reason.clone(),
                    }
                }
                other => PpkError::DeviceProtocol {
                    device: selector.to_string(),
                    detail: other.to_string(),
                },
            };
        }
    }

    let s = e.to_string();
    let lower = s.to_lowercase();
    if lower.contains("not found") || lower.contains("no such") {
        PpkError::DeviceNotFound {
            selector: selector.to_string(),
        }
    } else if lower.contains("permission") || lower.contains("busy") || lower.contains("denied") {
        PpkError::DevicePermission {
            device: selector.to_string(),
            reason: s,
        }
    } else {
        PpkError::DeviceProtocol {
            device: selector.to_string(),
            detail: s,
        }
    }
}
