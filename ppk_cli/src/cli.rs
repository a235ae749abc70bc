//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "ppk", version, about = "Power profiler capture and archive tool")]
pub struct Cli {
    /// Path to config TOML (typed); built-in defaults when absent
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Optional calibration CSV (strict header: range,gain,offset)
    #[arg(long, value_name = "FILE")]
    pub calibration: Option<PathBuf>,

    /// Print results and errors as JSON instead of text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); falls back to [logging].level
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a synthetic recording from a profile TOML
    Synth {
        /// Profile description (sample rate, seed, segments)
        #[arg(long, value_name = "FILE")]
        profile: PathBuf,
        /// Output archive (.ppk2)
        #[arg(short, long, value_name = "FILE")]
        out: PathBuf,
        /// Override the profile's noise seed
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Summarize an archive
    Info {
        /// Archive to read
        file: PathBuf,
    },
    /// Record from an instrument into an archive
    Measure {
        /// Capture length in seconds
        #[arg(long, value_name = "SECONDS")]
        duration: f64,
        /// Output archive (.ppk2)
        #[arg(short, long, value_name = "FILE")]
        out: PathBuf,
        /// Use the built-in simulated instrument
        #[arg(long, action = ArgAction::SetTrue)]
        sim: bool,
        /// Serial port; overrides [device].port and USB discovery
        #[arg(long, value_name = "PATH")]
        port: Option<String>,
        /// Label stored in the archive metadata
        #[arg(long)]
        label: Option<String>,
    },
    /// Drive digital channels of a recording from a DUT serial log
    Annotate {
        /// Archive to annotate
        file: PathBuf,
        /// Serial log with lines such as `T=0.5 GPS_STARTED`
        #[arg(long, value_name = "FILE")]
        log: PathBuf,
        /// Event to channel mapping, repeatable (e.g. `--channel GPS=0`)
        #[arg(long = "channel", value_name = "NAME=N", value_parser = parse_channel, required = true)]
        channels: Vec<(String, u8)>,
        /// Where to write the annotated archive; in place when absent
        #[arg(short, long, value_name = "FILE")]
        out: Option<PathBuf>,
        /// Also write the channel legend JSON here
        #[arg(long, value_name = "FILE")]
        legend: Option<PathBuf>,
    },
    /// Quick health check (config, calibration, simulated or attached instrument)
    SelfCheck,
}

pub fn parse_channel(s: &str) -> Result<(String, u8), String> {
    let (name, ch) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=N, got '{s}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("event name must not be empty".into());
    }
    let ch = ch
        .trim()
        .parse::<u8>()
        .map_err(|e| format!("bad channel number in '{s}': {e}"))?;
    Ok((name.to_string(), ch))
}
