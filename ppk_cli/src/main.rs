mod archive;
mod cli;
mod error_fmt;
mod measure;

use std::path::Path;

use clap::Parser;
use eyre::{Result, WrapErr};
use ppk_config::{CalibrationTable, Config, Logging};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::archive::{AnnotateArgs, print_info, run_annotate, run_info, run_synth, summary_json};
use crate::cli::{Cli, Commands, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};
use crate::measure::{MeasureArgs, run_measure};

fn main() {
    let _ = color_eyre::install();
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    let mut guard = None;
    let result = setup(&cli, &mut guard).and_then(|(cfg, calib)| run(&cli, &cfg, calib.as_ref()));
    if let Err(e) = result {
        tracing::error!(error = %e, "command failed");
        if JSON_MODE.get().copied().unwrap_or(false) {
            println!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        // Flush the file sink before exiting.
        drop(guard);
        std::process::exit(exit_code_for_error(&e));
    }
}

fn setup(cli: &Cli, guard: &mut Option<WorkerGuard>) -> Result<(Config, Option<CalibrationTable>)> {
    let cfg = load_config(cli.config.as_deref())?;
    let level = cli
        .log_level
        .clone()
        .or_else(|| cfg.logging.level.clone())
        .unwrap_or_else(|| "info".to_string());
    *guard = init_tracing(cli.json, &level, &cfg.logging)?;
    let calib = cli
        .calibration
        .as_deref()
        .map(ppk_config::load_calibration_csv)
        .transpose()?;
    Ok((cfg, calib))
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let cfg = ppk_config::load_toml(&text)
        .wrap_err_with(|| format!("parse config {}", path.display()))?;
    cfg.validate()
        .wrap_err_with(|| format!("invalid configuration in {}", path.display()))?;
    Ok(cfg)
}

/// Console layer on stderr (pretty or JSON) plus an optional JSON-lines file sink.
fn init_tracing(json: bool, level: &str, logging: &Logging) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .wrap_err_with(|| format!("bad log level '{level}'"))?;

    let (pretty, json_console) = if json {
        (
            None,
            Some(fmt::layer().json().with_writer(std::io::stderr)),
        )
    } else {
        (
            Some(fmt::layer().with_target(false).with_writer(std::io::stderr)),
            None,
        )
    };

    let mut guard = None;
    let file_layer = match logging.file.as_deref() {
        Some(file) => {
            let path = Path::new(file);
            let dir = path
                .parent()
                .filter(|d| !d.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| eyre::eyre!("logging.file '{file}' has no file name"))?;
            let appender = match logging.rotation.as_deref() {
                Some("daily") => tracing_appender::rolling::daily(dir, name),
                Some("hourly") => tracing_appender::rolling::hourly(dir, name),
                _ => tracing_appender::rolling::never(dir, name),
            };
            let (writer, g) = tracing_appender::non_blocking(appender);
            guard = Some(g);
            Some(fmt::layer().json().with_ansi(false).with_writer(writer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(pretty)
        .with(json_console)
        .with(file_layer)
        .try_init()
        .wrap_err("install tracing subscriber")?;
    Ok(guard)
}

fn run(cli: &Cli, cfg: &Config, calib: Option<&CalibrationTable>) -> Result<()> {
    match &cli.cmd {
        Commands::Synth { profile, out, seed } => {
            let buffer = run_synth(profile, out, *seed)?;
            if cli.json {
                let mut v = summary_json(&buffer);
                v["path"] = out.display().to_string().into();
                println!("{v}");
            } else {
                println!(
                    "Wrote {} samples at {} Hz to {}",
                    buffer.sample_count(),
                    buffer.sample_rate_hz(),
                    out.display()
                );
            }
        }
        Commands::Info { file } => {
            let archive = run_info(file)?;
            print_info(file, &archive, cli.json);
        }
        Commands::Measure {
            duration,
            out,
            sim,
            port,
            label,
        } => {
            let capture = run_measure(
                cfg,
                calib,
                &MeasureArgs {
                    duration_s: *duration,
                    out,
                    sim: *sim,
                    port: port.as_deref(),
                    label: label.as_deref(),
                },
            )?;
            let s = &capture.stats;
            if cli.json {
                let mut v = summary_json(&capture.buffer);
                v["path"] = out.display().to_string().into();
                v["decode"] = serde_json::json!({
                    "frames": s.frames,
                    "dropped_frames": s.dropped_frames,
                    "settling_dropped": s.settling_dropped,
                    "range_switches": s.range_switches,
                    "lost_samples": s.lost_samples,
                });
                println!("{v}");
            } else {
                println!(
                    "Recorded {} samples to {} (dropped {}, lost {})",
                    capture.buffer.sample_count(),
                    out.display(),
                    s.dropped_frames,
                    s.lost_samples
                );
            }
            if let Some(e) = capture.terminal {
                return Err(eyre::Report::new(e));
            }
        }
        Commands::Annotate {
            file,
            log,
            channels,
            out,
            legend,
        } => {
            let (buffer, events) = run_annotate(&AnnotateArgs {
                file,
                log,
                channels,
                out: out.as_deref(),
                legend: legend.as_deref(),
            })?;
            let target = out.as_deref().unwrap_or(file);
            if cli.json {
                let mut v = summary_json(&buffer);
                v["path"] = target.display().to_string().into();
                v["events"] = events.into();
                println!("{v}");
            } else {
                println!("Applied {events} events to {}", target.display());
            }
        }
        Commands::SelfCheck => self_check(cfg, calib, cli.json)?,
    }
    Ok(())
}

/// Config and calibration were already validated by `setup`; this exercises
/// the acquisition path against the simulator and lists any real instruments.
fn self_check(cfg: &Config, calib: Option<&CalibrationTable>, as_json: bool) -> Result<()> {
    use ppk_core::{Device, DeviceOptions};
    use ppk_hardware::{SimSignal, SimulatedPpk};
    use std::time::Duration;

    let options = DeviceOptions::from_config(cfg, calib)?;
    let sim = SimulatedPpk::with_profile(cfg.profile())
        .with_signal(SimSignal::constant(0, 1000))
        .paced(true);
    let mut device = Device::attach(sim, options).wrap_err("attach simulated instrument")?;
    let capture = device.measure(Duration::from_millis(20))?;
    if let Some(e) = capture.terminal {
        return Err(eyre::Report::new(e)).wrap_err("simulated capture failed");
    }

    #[cfg(feature = "hardware")]
    let ports = ppk_hardware::find_ports(cfg.device.usb_vid, cfg.device.usb_pid)
        .wrap_err("enumerate serial ports")?;
    #[cfg(not(feature = "hardware"))]
    let ports: Vec<String> = Vec::new();

    if as_json {
        println!(
            "{}",
            serde_json::json!({
                "ok": true,
                "profile": cfg.profile().name,
                "sim_samples": capture.buffer.sample_count(),
                "ports": ports,
            })
        );
    } else {
        println!("profile: {}", cfg.profile().name);
        println!("simulated capture: {} samples", capture.buffer.sample_count());
        if ports.is_empty() {
            println!("instruments: none detected");
        } else {
            println!("instruments: {}", ports.join(", "));
        }
        println!("self-check ok");
    }
    Ok(())
}
