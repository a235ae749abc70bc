//! Pull-based measurement stream.
//!
//! A [`MeasurementStream`] borrows its [`Device`] mutably, so a second stream
//! cannot be started while one is alive. Samples come out in acquisition
//! order; a terminal fault is delivered once, after every sample decoded
//! before it.
use std::collections::VecDeque;
use std::time::Instant;

use ppk_traits::ByteChannel;

use crate::device::{Device, DeviceState, StopHandle};
use crate::error::{PpkError, Result};
use crate::hw_error::{ChannelFault, classify};
use crate::model::Sample;
use crate::protocol::{DecodeStats, Decoder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Running,
    /// Stop sent; handing out what was already decoded.
    Draining,
    Finished,
    Failed,
}

pub struct MeasurementStream<'d, C: ByteChannel> {
    device: &'d mut Device<C>,
    decoder: Decoder,
    ready: VecDeque<Sample>,
    buf: Vec<u8>,
    state: StreamState,
    stop: StopHandle,
    deadline: Option<Instant>,
    pending_error: Option<PpkError>,
    terminal: Option<PpkError>,
    retries: u32,
}

impl<'d, C: ByteChannel> MeasurementStream<'d, C> {
    pub(crate) fn new(device: &'d mut Device<C>, decoder: Decoder) -> Self {
        let buf = vec![0u8; device.engine.read_chunk.max(device.profile.frame.frame_size())];
        let stop = device.stop_handle();
        Self {
            device,
            decoder,
            ready: VecDeque::new(),
            buf,
            state: StreamState::Running,
            stop,
            deadline: None,
            pending_error: None,
            terminal: None,
            retries: 0,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn stats(&self) -> DecodeStats {
        self.decoder.stats()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Stop on its own once `deadline` passes.
    pub fn set_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    /// The fault that ended the stream, if it failed.
    pub fn terminal_error(&self) -> Option<&PpkError> {
        self.terminal.as_ref()
    }

    /// Halt acquisition. Samples decoded so far remain available.
    ///
    /// If the stop command cannot be delivered the stream ends `Failed` and
    /// the error is returned here rather than from `next_sample`.
    pub fn stop(&mut self) -> Result<()> {
        if self.state == StreamState::Running {
            if let Err(e) = self.halt() {
                self.pending_error = None;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Draining only once the instrument took the stop command.
    fn halt(&mut self) -> Result<()> {
        match self.device.stop_measurement() {
            Ok(()) => {
                self.state = StreamState::Draining;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(device = %self.device.id, error = %e, "stop not delivered");
                self.mark_failed(e.clone());
                Err(e)
            }
        }
    }

    /// Next sample, `Ok(None)` once the stream has ended.
    pub fn next_sample(&mut self) -> Result<Option<Sample>> {
        loop {
            if let Some(s) = self.ready.pop_front() {
                return Ok(Some(s));
            }
            match self.state {
                StreamState::Finished => return Ok(None),
                StreamState::Draining => {
                    self.state = StreamState::Finished;
                    return Ok(None);
                }
                StreamState::Failed => {
                    return match self.pending_error.take() {
                        Some(e) => Err(e),
                        None => Ok(None),
                    };
                }
                StreamState::Running => {}
            }
            let expired = self
                .deadline
                .is_some_and(|d| self.device.clock.is_past(d));
            if self.stop.is_requested() || expired {
                tracing::debug!(device = %self.device.id, expired, "stream halting");
                // A failed halt leaves the stream Failed with the error pending.
                let _ = self.halt();
                continue;
            }
            self.fill();
        }
    }

    /// One read attempt; decoded samples land in `ready`.
    fn fill(&mut self) {
        let timeout = self.device.engine.read_timeout;
        match self.device.channel.read(&mut self.buf, timeout) {
            Ok(0) => self.retry("no data within read timeout".to_string()),
            Ok(n) => {
                self.retries = 0;
                if let Err(e) = self.decoder.feed(&self.buf[..n], &mut self.ready) {
                    self.fail(e);
                }
            }
            Err(e) => match classify(&*e) {
                ChannelFault::Transient(detail) => self.retry(detail),
                ChannelFault::Gone(detail) => {
                    let err = PpkError::DeviceDisconnected {
                        device: self.device.id.clone(),
                        detail,
                    };
                    self.fail(err);
                }
            },
        }
    }

    fn retry(&mut self, detail: String) {
        self.retries += 1;
        let max = self.device.engine.max_retries;
        if self.retries > max {
            let err = PpkError::DeviceDisconnected {
                device: self.device.id.clone(),
                detail: format!("{detail} after {max} retries"),
            };
            self.fail(err);
            return;
        }
        let wait = self.device.engine.backoff * self.retries;
        tracing::debug!(device = %self.device.id, attempt = self.retries, ?wait, %detail, "read retry");
        self.device.clock.sleep(wait);
    }

    fn fail(&mut self, err: PpkError) {
        tracing::warn!(device = %self.device.id, error = %err, "stream failed");
        if !matches!(err, PpkError::DeviceDisconnected { .. }) {
            if let Err(stop_err) = self.device.stop_measurement() {
                tracing::warn!(device = %self.device.id, error = %stop_err, "stop after failure");
            }
        }
        self.mark_failed(err);
    }

    fn mark_failed(&mut self, err: PpkError) {
        if matches!(err, PpkError::DeviceDisconnected { .. }) {
            self.device.state = DeviceState::Disconnected;
        }
        self.terminal = Some(err.clone());
        self.pending_error = Some(err);
        self.state = StreamState::Failed;
    }
}

impl<C: ByteChannel> Iterator for MeasurementStream<'_, C> {
    type Item = Result<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_sample().transpose()
    }
}
