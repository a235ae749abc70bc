//! Offline commands: synthesize, inspect and annotate recordings.

use std::collections::BTreeMap;
use std::path::Path;

use eyre::{Result, WrapErr};
use ppk_core::events::SerialMarkers;
use ppk_core::{Archive, MinimapOrigin, ProfileSpec, SampleBuffer, codec, parse_serial_events};
use serde_json::json;

pub fn run_synth(profile: &Path, out: &Path, seed: Option<u64>) -> Result<SampleBuffer> {
    let mut spec = ProfileSpec::load(profile)?;
    if let Some(seed) = seed {
        spec.seed = seed;
    }
    let buffer = spec.build()?;
    codec::save(&buffer, out)?;
    tracing::info!(
        path = %out.display(),
        samples = buffer.sample_count(),
        seed = spec.seed,
        "synthetic recording saved"
    );
    Ok(buffer)
}

pub fn run_info(file: &Path) -> Result<Archive> {
    Ok(codec::open(file)?)
}

/// One-object summary of an archive, shared by `info` and the JSON output of
/// the other commands.
pub fn summary_json(buffer: &SampleBuffer) -> serde_json::Value {
    let meta = buffer.metadata();
    let mut v = json!({
        "samples": buffer.sample_count(),
        "sample_rate_hz": meta.sample_rate_hz,
        "start_system_time_ms": meta.start_system_time_ms,
        "format_version": meta.format_version,
        "label": meta.label,
    });
    if let Some(s) = buffer.stats() {
        v["duration_s"] = json!(s.duration_s);
        v["mean_ua"] = json!(s.mean_ua);
        v["min_ua"] = json!(s.min_ua);
        v["max_ua"] = json!(s.max_ua);
        v["p99_ua"] = json!(s.p99_ua);
        v["charge_uc"] = json!(s.charge_uc);
    }
    v
}

pub fn print_info(path: &Path, archive: &Archive, as_json: bool) {
    let b = &archive.buffer;
    let origin = match archive.minimap_origin {
        MinimapOrigin::Stored => "stored",
        MinimapOrigin::Recomputed => "recomputed",
    };
    if as_json {
        let mut v = summary_json(b);
        v["minimap"] = json!({
            "entries": archive.minimap.len(),
            "window": archive.minimap.window(),
            "origin": origin,
        });
        println!("{v}");
        return;
    }
    let meta = b.metadata();
    println!("{}", path.display());
    println!("  label:        {}", meta.label.as_deref().unwrap_or("-"));
    println!("  samples:      {}", b.sample_count());
    println!("  rate:         {} Hz", meta.sample_rate_hz);
    println!("  started (ms): {}", meta.start_system_time_ms);
    match b.stats() {
        Some(s) => {
            println!("  duration:     {:.6} s", s.duration_s);
            println!(
                "  current (uA): mean {:.3} / min {:.3} / max {:.3} / p99 {:.3}",
                s.mean_ua, s.min_ua, s.max_ua, s.p99_ua
            );
            println!("  charge:       {:.3} uC", s.charge_uc);
        }
        None => println!("  (empty recording)"),
    }
    println!(
        "  minimap:      {} entries, window {} ({origin})",
        archive.minimap.len(),
        archive.minimap.window()
    );
}

pub struct AnnotateArgs<'a> {
    pub file: &'a Path,
    pub log: &'a Path,
    pub channels: &'a [(String, u8)],
    pub out: Option<&'a Path>,
    pub legend: Option<&'a Path>,
}

/// Drive digital channels from a DUT log and write the recording back.
/// Returns the annotated buffer and the number of events applied.
pub fn run_annotate(args: &AnnotateArgs<'_>) -> Result<(SampleBuffer, usize)> {
    let mut map = BTreeMap::new();
    for (name, ch) in args.channels {
        if map.insert(name.clone(), *ch).is_some() {
            eyre::bail!("event '{name}' is mapped more than once");
        }
    }
    let text = std::fs::read_to_string(args.log)
        .wrap_err_with(|| format!("read serial log {}", args.log.display()))?;
    let mapper = parse_serial_events(&text, &map, &SerialMarkers::default())?;
    let mut buffer = codec::load(args.file)?;
    mapper.apply(&mut buffer);

    let out = args.out.unwrap_or(args.file);
    codec::save(&buffer, out)?;
    if let Some(legend) = args.legend {
        mapper.save_legend(legend)?;
    }
    let events = mapper.events().len();
    tracing::info!(path = %out.display(), events, channels = map.len(), "recording annotated");
    Ok((buffer, events))
}
