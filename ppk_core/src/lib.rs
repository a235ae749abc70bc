#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Acquisition and persistence engine for PPK2-class power profilers
//! (hardware-agnostic).
//!
//! All instrument I/O goes through `ppk_traits::ByteChannel`; time goes
//! through `ppk_traits::Clock`.
//!
//! ## Architecture
//!
//! - **Model**: `Sample`, `SampleBuffer`, `Metadata`, `Minimap` (`model`, `minimap`)
//! - **Protocol**: commands, identification text, frame decoding with
//!   autoranging (`protocol`), per-range calibration (`calibration`)
//! - **Device**: `Device` handle and the pull-based `MeasurementStream`
//! - **Codec**: the zip-based `.ppk2` container (`codec`)
//! - **Builder**: seeded synthetic profiles (`synth`)
//! - **Events**: DUT events overlaid on digital channels (`events`)
//!
//! Currents are microamps throughout.

pub mod atomic;
pub mod calibration;
pub mod codec;
pub mod config;
pub mod conversions;
pub mod device;
pub mod error;
pub mod events;
pub mod hw_error;
pub mod minimap;
pub mod model;
pub mod protocol;
pub mod spike;
pub mod stream;
pub mod synth;
pub mod util;

pub use calibration::{CalibrationEntry, Modifiers, RangeTable};
pub use codec::{Archive, MinimapOrigin};
pub use config::EngineCfg;
pub use device::{Capture, Device, DeviceOptions, DeviceSelector, DeviceState, StopHandle};
pub use error::{PpkError, Result};
pub use events::{EventMapper, Legend, parse_serial_events};
pub use minimap::{MINIMAP_MAX_ELEMENTS, Minimap};
pub use model::{DIGITAL_CHANNELS, FORMAT_VERSION, Metadata, Sample, SampleBuffer, Stats};
pub use protocol::{DecodeStats, DeviceMode};
pub use stream::{MeasurementStream, StreamState};
pub use synth::{Noise, NoiseShape, ProfileBuilder, ProfileSpec, Segment};
