//! Instrument capture: config mapping, device assembly and the recording run.

use std::path::Path;
use std::time::Duration;

use eyre::{Result, WrapErr};
use ppk_config::{CalibrationTable, Config, MeterMode};
use ppk_core::{Capture, Device, DeviceMode, DeviceOptions, codec};
use ppk_hardware::{SimFault, SimLevel, SimSignal, SimulatedPpk};
use ppk_traits::ByteChannel;

/// Fault injected into the simulated instrument by integration tests.
const SIM_FAULT_ENV: &str = "PPK_TEST_SIM_FAULT";

pub struct MeasureArgs<'a> {
    pub duration_s: f64,
    pub out: &'a Path,
    pub sim: bool,
    pub port: Option<&'a str>,
    pub label: Option<&'a str>,
}

pub fn run_measure(
    cfg: &Config,
    calib: Option<&CalibrationTable>,
    args: &MeasureArgs<'_>,
) -> Result<Capture> {
    if !args.duration_s.is_finite() || args.duration_s <= 0.0 {
        eyre::bail!("--duration must be a positive number of seconds");
    }
    let duration = Duration::from_secs_f64(args.duration_s);
    let options = DeviceOptions::from_config(cfg, calib)?;

    let mut capture = if args.sim {
        let sim = simulated(cfg);
        let handle = sim.handle();
        let mut device = Device::attach(sim, options)?;
        configure(&mut device, cfg)?;
        match std::env::var(SIM_FAULT_ENV).as_deref() {
            Ok("unplug") => handle.fail_next_reads(SimFault::Disconnect, 1),
            Ok("stall") => handle.fail_next_reads(
                SimFault::Timeout,
                cfg.stream.max_retries as usize + 1,
            ),
            _ => {}
        }
        record(&mut device, duration)?
    } else {
        let mut device = open_hardware(cfg, args.port, options)?;
        configure(&mut device, cfg)?;
        record(&mut device, duration)?
    };

    if let Some(label) = args.label {
        capture.buffer.set_label(Some(label.to_string()));
    }
    codec::save(&capture.buffer, args.out)?;
    tracing::info!(
        path = %args.out.display(),
        samples = capture.buffer.sample_count(),
        dropped = capture.stats.dropped_frames,
        lost = capture.stats.lost_samples,
        "recording saved"
    );
    Ok(capture)
}

/// Apply `[source]`: meter mode, regulator voltage and DUT power.
fn configure<C: ByteChannel>(device: &mut Device<C>, cfg: &Config) -> Result<()> {
    device.set_mode(DeviceMode::from(cfg.source.mode))?;
    if cfg.source.mode == MeterMode::Source {
        device.set_source_voltage(cfg.source.voltage_mv)?;
    }
    device.set_power(cfg.source.power_on)?;
    Ok(())
}

fn record<C: ByteChannel>(device: &mut Device<C>, duration: Duration) -> Result<Capture> {
    // Ctrl-C ends the capture early; what was recorded is still saved.
    let stop = device.stop_handle();
    ctrlc::set_handler(move || {
        tracing::warn!("interrupt received; stopping measurement");
        stop.request();
    })
    .wrap_err("install Ctrl-C handler")?;

    tracing::info!(device = %device.id(), duration_s = duration.as_secs_f64(), "measurement start");
    Ok(device.measure(duration)?)
}

fn simulated(cfg: &Config) -> SimulatedPpk {
    // 50 ms at a low range, then 50 ms at a high one.
    let hold = cfg.profile().sample_rate_hz / 20;
    SimulatedPpk::with_profile(cfg.profile())
        .with_signal(SimSignal::square(
            SimLevel { range: 1, adc: 300 },
            SimLevel { range: 3, adc: 900 },
            hold,
        ))
        .paced(true)
}

#[cfg(feature = "hardware")]
fn open_hardware(
    cfg: &Config,
    port: Option<&str>,
    options: DeviceOptions,
) -> Result<Device<ppk_hardware::SerialChannel>> {
    let selector = port.map_or_else(
        || ppk_core::DeviceSelector::from(&cfg.device),
        |p| ppk_core::DeviceSelector::Port(p.to_string()),
    );
    Device::open(&selector, cfg.device.baud, options)
        .wrap_err_with(|| format!("open instrument ({selector})"))
}

#[cfg(not(feature = "hardware"))]
fn open_hardware(
    _cfg: &Config,
    _port: Option<&str>,
    _options: DeviceOptions,
) -> Result<Device<SimulatedPpk>> {
    eyre::bail!("this build has no serial support; rebuild with --features hardware or pass --sim")
}
