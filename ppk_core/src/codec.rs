//! `.ppk2` container: a zip archive holding
//!
//! - `session.raw`: 6-byte little-endian frames, `f32` microamps then `u16` logic
//! - `metadata.json`: `sampleRate`, `startSystemTime`, `formatVersion`, optional `label`
//! - `minimap.raw`: 8-byte `(min f32, max f32)` pairs
//!
//! Output is deterministic: fixed entry order, timestamps, permissions and
//! compression level. The minimap is derived data; a missing or unusable one is
//! recomputed on load rather than rejected.
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::atomic::write_atomic;
use crate::error::{PpkError, Result};
use crate::minimap::Minimap;
use crate::model::{FORMAT_VERSION, Metadata, Sample, SampleBuffer};

pub const SESSION_ENTRY: &str = "session.raw";
pub const METADATA_ENTRY: &str = "metadata.json";
pub const MINIMAP_ENTRY: &str = "minimap.raw";
/// Bytes per sample in `session.raw`.
pub const FRAME_SIZE: usize = 6;

const DEFLATE_LEVEL: i64 = 6;

/// Where an [`Archive`]'s minimap came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinimapOrigin {
    Stored,
    Recomputed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Archive {
    pub buffer: SampleBuffer,
    pub minimap: Minimap,
    pub minimap_origin: MinimapOrigin,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MetadataJson<'a> {
    sample_rate: u32,
    start_system_time: i64,
    format_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<&'a str>,
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(DEFLATE_LEVEL))
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644)
}

/// Serialize samples as `session.raw` frames.
pub fn encode_session(samples: &[Sample]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * FRAME_SIZE);
    for s in samples {
        out.extend_from_slice(&s.current_ua.to_le_bytes());
        out.extend_from_slice(&s.logic.to_le_bytes());
    }
    out
}

/// Parse `session.raw` bytes. `source` names the file in errors.
pub fn decode_session(bytes: &[u8], source: &str) -> Result<Vec<Sample>> {
    if bytes.len() % FRAME_SIZE != 0 {
        return Err(PpkError::corrupt(
            source,
            format!(
                "{SESSION_ENTRY} is {} bytes, not a whole number of {FRAME_SIZE}-byte frames",
                bytes.len()
            ),
        ));
    }
    let mut samples = Vec::with_capacity(bytes.len() / FRAME_SIZE);
    for (i, f) in bytes.chunks_exact(FRAME_SIZE).enumerate() {
        let current_ua = f32::from_le_bytes([f[0], f[1], f[2], f[3]]);
        if !current_ua.is_finite() {
            return Err(PpkError::corrupt(
                source,
                format!("non-finite current in sample {i}"),
            ));
        }
        samples.push(Sample {
            current_ua,
            logic: u16::from_le_bytes([f[4], f[5]]),
        });
    }
    Ok(samples)
}

fn zip_err(source: &str, e: &zip::result::ZipError) -> PpkError {
    match e {
        zip::result::ZipError::Io(io) => PpkError::io(source, io),
        other => PpkError::corrupt(source, other.to_string()),
    }
}

/// Write the archive for `buffer` into `w`.
///
/// Only [`FORMAT_VERSION`] can be written; metadata carrying any other
/// version is rejected so that loading the file gives back the same buffer.
pub fn write_archive<W: Write + Seek>(buffer: &SampleBuffer, w: W) -> Result<W> {
    let source = "<archive>";
    let meta = buffer.metadata();
    if meta.format_version != FORMAT_VERSION {
        return Err(PpkError::UnsupportedVersion {
            path: source.into(),
            version: u64::from(meta.format_version),
        });
    }
    let json = serde_json::to_vec(&MetadataJson {
        sample_rate: meta.sample_rate_hz,
        start_system_time: meta.start_system_time_ms,
        format_version: meta.format_version,
        label: meta.label.as_deref(),
    })
    .map_err(|e| PpkError::InvalidParameter(format!("metadata not serializable: {e}")))?;

    let mut zip = ZipWriter::new(w);
    let entries: [(&str, Vec<u8>); 3] = [
        (SESSION_ENTRY, encode_session(buffer.samples())),
        (METADATA_ENTRY, json),
        (MINIMAP_ENTRY, buffer.minimap().to_bytes()),
    ];
    for (name, bytes) in entries {
        zip.start_file(name, entry_options())
            .map_err(|e| zip_err(source, &e))?;
        zip.write_all(&bytes).map_err(|e| PpkError::io(source, &e))?;
    }
    zip.finish().map_err(|e| zip_err(source, &e))
}

fn read_entry<R: Read + Seek>(
    zip: &mut ZipArchive<R>,
    name: &str,
    source: &str,
) -> Result<Option<Vec<u8>>> {
    let mut file = match zip.by_name(name) {
        Ok(f) => f,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(PpkError::corrupt(source, format!("{name}: {e}"))),
    };
    let mut out = Vec::new();
    file.read_to_end(&mut out)
        .map_err(|e| PpkError::corrupt(source, format!("{name}: {e}")))?;
    Ok(Some(out))
}

fn field<'v>(root: &'v Value, flat: &str, nested: &str) -> Option<&'v Value> {
    root.get(flat)
        .or_else(|| root.get("metadata").and_then(|m| m.get(nested)))
}

fn integral(v: &Value) -> Option<i64> {
    if let Some(i) = v.as_i64() {
        return Some(i);
    }
    v.as_f64()
        .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15)
        .map(|f| f as i64)
}

/// Parse `metadata.json`. Unknown fields are ignored.
fn parse_metadata(bytes: &[u8], source: &str) -> Result<Metadata> {
    let root: Value = serde_json::from_slice(bytes)
        .map_err(|e| PpkError::corrupt(source, format!("{METADATA_ENTRY}: {e}")))?;
    if !root.is_object() {
        return Err(PpkError::corrupt(
            source,
            format!("{METADATA_ENTRY} is not an object"),
        ));
    }
    let version = root
        .get("formatVersion")
        .ok_or_else(|| PpkError::corrupt(source, "formatVersion missing"))?;
    let version = version
        .as_u64()
        .ok_or_else(|| PpkError::corrupt(source, format!("formatVersion {version} is not a version number")))?;
    if version != u64::from(FORMAT_VERSION) {
        return Err(PpkError::UnsupportedVersion {
            path: source.to_string(),
            version,
        });
    }

    let rate = field(&root, "sampleRate", "samplesPerSecond")
        .ok_or_else(|| PpkError::corrupt(source, "sampleRate missing"))?;
    let rate = integral(rate)
        .and_then(|r| u32::try_from(r).ok())
        .filter(|r| *r > 0)
        .ok_or_else(|| PpkError::corrupt(source, format!("sampleRate {rate} must be a positive integer")))?;
    let start = field(&root, "startSystemTime", "startSystemTime")
        .ok_or_else(|| PpkError::corrupt(source, "startSystemTime missing"))?;
    let start = integral(start)
        .ok_or_else(|| PpkError::corrupt(source, format!("startSystemTime {start} is not an integer")))?;

    let mut meta = Metadata::new(rate)?.with_start_time_ms(start);
    if let Some(label) = root.get("label").and_then(Value::as_str) {
        meta = meta.with_label(label);
    }
    Ok(meta)
}

/// Read an archive from `r`. `source` names it in errors.
pub fn read_archive<R: Read + Seek>(r: R, source: &str) -> Result<Archive> {
    let mut zip = ZipArchive::new(r).map_err(|e| PpkError::corrupt(source, e.to_string()))?;
    let session = read_entry(&mut zip, SESSION_ENTRY, source)?
        .ok_or_else(|| PpkError::corrupt(source, format!("{SESSION_ENTRY} missing")))?;
    let meta = read_entry(&mut zip, METADATA_ENTRY, source)?
        .ok_or_else(|| PpkError::corrupt(source, format!("{METADATA_ENTRY} missing")))?;
    let metadata = parse_metadata(&meta, source)?;
    let samples = decode_session(&session, source)?;
    let buffer = SampleBuffer::from_parts(metadata, samples)
        .map_err(|e| PpkError::corrupt(source, e.to_string()))?;

    let stored = read_entry(&mut zip, MINIMAP_ENTRY, source)?;
    let (minimap, minimap_origin) =
        match stored.as_deref().and_then(|b| Minimap::from_bytes(b, buffer.sample_count())) {
            Some(m) => (m, MinimapOrigin::Stored),
            None => {
                tracing::debug!(
                    path = source,
                    present = stored.is_some(),
                    "minimap unusable, recomputing"
                );
                (buffer.minimap(), MinimapOrigin::Recomputed)
            }
        };
    Ok(Archive {
        buffer,
        minimap,
        minimap_origin,
    })
}

/// Serialize into memory.
pub fn to_bytes(buffer: &SampleBuffer) -> Result<Vec<u8>> {
    Ok(write_archive(buffer, Cursor::new(Vec::new()))?.into_inner())
}

pub fn save(buffer: &SampleBuffer, path: &Path) -> Result<()> {
    let bytes = to_bytes(buffer)?;
    let shown = path.display().to_string();
    write_atomic(path, &bytes).map_err(|e| PpkError::io(&shown, &e))?;
    tracing::info!(
        path = %shown,
        samples = buffer.sample_count(),
        bytes = bytes.len(),
        "archive saved"
    );
    Ok(())
}

/// Load an archive along with its minimap.
pub fn open(path: &Path) -> Result<Archive> {
    let shown = path.display().to_string();
    let bytes = std::fs::read(path).map_err(|e| PpkError::io(&shown, &e))?;
    let archive = read_archive(Cursor::new(bytes), &shown)?;
    tracing::debug!(
        path = %shown,
        samples = archive.buffer.sample_count(),
        minimap = ?archive.minimap_origin,
        "archive loaded"
    );
    Ok(archive)
}

pub fn load(path: &Path) -> Result<SampleBuffer> {
    open(path).map(|a| a.buffer)
}
