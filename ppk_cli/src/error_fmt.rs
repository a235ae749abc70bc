//! Human-readable error descriptions and structured JSON error formatting.

use ppk_core::PpkError;

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(pe) = err.downcast_ref::<PpkError>() {
        return match pe {
            PpkError::DeviceNotFound { selector } => format!(
                "What happened: No instrument matched '{selector}'.\nLikely causes: Profiler unplugged, wrong USB id in [device], or the port name changed.\nHow to fix: Check the cable, list ports with your OS tools, or pass --port explicitly."
            ),
            PpkError::DevicePermission { device, reason } => format!(
                "What happened: Could not claim {device} ({reason}).\nLikely causes: Another program holds the port, or the user lacks access to serial devices.\nHow to fix: Close other profiler software; on Linux add yourself to the dialout group or install a udev rule."
            ),
            PpkError::DeviceProtocol { device, detail } => format!(
                "What happened: {device} answered unexpectedly ({detail}).\nLikely causes: Firmware that does not match the device profile, or a port that is not a profiler.\nHow to fix: Update the profiler firmware or set a matching [profile] in the config."
            ),
            PpkError::DeviceDisconnected { device, detail } => format!(
                "What happened: {device} went away during the run ({detail}).\nLikely causes: Cable pulled, USB hub reset, or the link stopped delivering data.\nHow to fix: Reconnect the instrument and rerun; raise stream.max_retries if the link is merely slow. Samples captured so far were kept."
            ),
            PpkError::CorruptFile { path, detail } => format!(
                "What happened: {path} is not a readable recording ({detail}).\nLikely causes: Truncated copy, interrupted write, or a file of another type.\nHow to fix: Re-export or re-record the file."
            ),
            PpkError::UnsupportedVersion { path, version } => format!(
                "What happened: {path} uses format version {version}.\nLikely causes: The file was written by a newer or much older tool.\nHow to fix: Re-save it as format version 2."
            ),
            PpkError::Calibration { device, range } => format!(
                "What happened: {device} reported range {range}, which has no calibration entry.\nLikely causes: A calibration table that covers fewer ranges than the instrument.\nHow to fix: Add a row for range {range} to the calibration CSV or [calibration] table."
            ),
            PpkError::InvalidParameter(msg) => format!(
                "What happened: Invalid parameter ({msg}).\nLikely causes: Out-of-range value on the command line or in a profile/config file.\nHow to fix: Correct the value and rerun."
            ),
            PpkError::InvalidState(msg) => format!(
                "What happened: Operation not allowed right now ({msg}).\nLikely causes: The instrument is streaming or in the wrong meter mode.\nHow to fix: Stop the measurement or switch [source].mode first."
            ),
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    // String-based heuristics for errors coming from config loading
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("calibration csv must have headers") {
        return "Invalid headers in calibration CSV. Expected 'range,gain,offset'.".to_string();
    }

    if lower.contains("parse config") || lower.contains("must be") {
        let detail = err
            .chain()
            .last()
            .map_or_else(|| msg.clone(), ToString::to_string);
        return format!(
            "What happened: Configuration is invalid ({detail}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes per error kind; everything else exits 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match err.downcast_ref::<PpkError>() {
        Some(PpkError::DeviceNotFound { .. }) => 3,
        Some(PpkError::DevicePermission { .. }) => 4,
        Some(PpkError::DeviceProtocol { .. }) => 5,
        Some(PpkError::DeviceDisconnected { .. }) => 6,
        Some(PpkError::CorruptFile { .. }) => 7,
        Some(PpkError::UnsupportedVersion { .. }) => 8,
        _ => 1,
    }
}

pub fn error_kind_name(err: &eyre::Report) -> &'static str {
    match err.downcast_ref::<PpkError>() {
        Some(PpkError::DeviceNotFound { .. }) => "DeviceNotFound",
        Some(PpkError::DevicePermission { .. }) => "DevicePermission",
        Some(PpkError::DeviceProtocol { .. }) => "DeviceProtocol",
        Some(PpkError::DeviceDisconnected { .. }) => "DeviceDisconnected",
        Some(PpkError::InvalidParameter(_)) => "InvalidParameter",
        Some(PpkError::InvalidState(_)) => "InvalidState",
        Some(PpkError::Calibration { .. }) => "Calibration",
        Some(PpkError::Decode { .. }) => "Decode",
        Some(PpkError::CorruptFile { .. }) => "CorruptFile",
        Some(PpkError::UnsupportedVersion { .. }) => "UnsupportedVersion",
        Some(PpkError::Io { .. }) => "Io",
        None => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    serde_json::json!({
        "reason": error_kind_name(err),
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
    })
    .to_string()
}
