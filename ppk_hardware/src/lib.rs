//! Byte-channel implementations for PPK2-class instruments: an in-process
//! simulator and, with the `hardware` feature, the USB serial transport.
pub mod error;
#[cfg(feature = "hardware")]
pub mod serial;
pub mod sim;

pub use error::HwError;
#[cfg(feature = "hardware")]
pub use serial::{SerialChannel, find_ports};
pub use sim::{DEFAULT_RESISTORS, SimFault, SimHandle, SimLevel, SimSignal, SimulatedPpk, metadata_text};

/// Nordic Semiconductor USB vendor id.
pub const NORDIC_VID: u16 = 0x1915;
/// PPK2 USB product id.
pub const PPK2_PID: u16 = 0xC00A;
pub const PPK2_BAUD: u32 = 115_200;
