pub mod clock;

use std::time::Duration;

pub use clock::{Clock, ManualClock, MonotonicClock};

/// Error type crossing the channel boundary. The core maps it to typed faults.
pub type ChannelError = Box<dyn std::error::Error + Send + Sync>;

/// Duplex byte channel to a measurement instrument.
///
/// `read` blocks for at most `timeout`; `Ok(0)` means nothing arrived in time.
pub trait ByteChannel {
    /// Identifier used in error context and logs (port path, "sim", ...).
    fn id(&self) -> &str;

    fn write(&mut self, bytes: &[u8]) -> Result<(), ChannelError>;

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ChannelError>;
}

impl<T: ByteChannel + ?Sized> ByteChannel for Box<T> {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        (**self).write(bytes)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ChannelError> {
        (**self).read(buf, timeout)
    }
}
