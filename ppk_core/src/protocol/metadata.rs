//! Identification text returned by the instrument in answer to the metadata query.
//!
//! The response is a sequence of `KEY: value` lines (`R0: 1031.64`, `VDD: 3700`,
//! ...) closed by a terminator line. Keys are case-insensitive; `nan`/`-nan`
//! values mean "not calibrated" and fall back to defaults.
use std::collections::BTreeMap;

use crate::calibration::Modifiers;

/// Parsed identification response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceMetadata {
    pub modifiers: Modifiers,
    pub vdd_mv: Option<u16>,
    /// Firmware mode code (2 = source meter, 1 = ampere meter).
    pub mode: Option<u8>,
    pub hw: Option<u32>,
    /// Every key/value seen, lowercased keys; `None` for nan.
    pub raw: BTreeMap<String, Option<f64>>,
}

/// True once `text` contains a line equal to `terminator`.
pub fn is_complete(text: &str, terminator: &str) -> bool {
    text.lines().any(|l| l.trim() == terminator)
}

fn parse_value(v: &str) -> Result<Option<f64>, String> {
    let v = v.trim();
    if v.eq_ignore_ascii_case("nan") || v.eq_ignore_ascii_case("-nan") {
        return Ok(None);
    }
    v.parse::<f64>()
        .map(Some)
        .map_err(|_| format!("non-numeric value '{v}'"))
}

/// Split a key like `ug3` into (`ug`, 3).
fn indexed(key: &str) -> Option<(&str, usize)> {
    let split = key.find(|c: char| c.is_ascii_digit())?;
    let (prefix, idx) = key.split_at(split);
    idx.parse().ok().map(|i| (prefix, i))
}

pub fn parse(text: &str, terminator: &str, range_count: u8) -> Result<DeviceMetadata, String> {
    let mut meta = DeviceMetadata {
        modifiers: Modifiers::ppk2_defaults(usize::from(range_count)),
        ..DeviceMetadata::default()
    };
    let mut terminated = false;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == terminator {
            terminated = true;
            break;
        }
        let Some((key, value)) = line.split_once(':') else {
            return Err(format!("malformed metadata line '{line}'"));
        };
        let key = key.trim().to_ascii_lowercase();
        let value = parse_value(value)?;
        meta.raw.insert(key.clone(), value);

        match key.as_str() {
            "vdd" => meta.vdd_mv = value.map(|v| v.round().clamp(0.0, f64::from(u16::MAX)) as u16),
            "mode" => meta.mode = value.map(|v| v as u8),
            "hw" => meta.hw = value.map(|v| v as u32),
            _ => {
                if let (Some((prefix, idx)), Some(v)) = (indexed(&key), value) {
                    meta.modifiers.set(prefix, idx, v);
                }
            }
        }
    }
    if !terminated {
        return Err(format!("metadata not terminated by '{terminator}'"));
    }
    Ok(meta)
}
