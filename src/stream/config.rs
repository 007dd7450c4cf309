use std::time::Duration;

use crate::{Error, ErrorKind, LogConfig};

/// Endpoint receiving samples from the device.
pub const SAMPLE_EP_IN: u8 = 0x81;

/// Endpoint sending samples to the device.
pub const SAMPLE_EP_OUT: u8 = 0x01;

/// Buffers must hold a whole number of blocks of this many samples.
pub const SAMPLES_PER_BLOCK: usize = 1024;

/// Direction of a sample stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    /// Device to host.
    Rx,

    /// Host to device.
    Tx,
}

impl Direction {
    /// Bulk endpoint address used for this direction.
    pub fn endpoint(self) -> u8 {
        match self {
            Direction::Rx => SAMPLE_EP_IN,
            Direction::Tx => SAMPLE_EP_OUT,
        }
    }
}

/// Sample buffer layout.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Format {
    /// Interleaved signed 16-bit I/Q samples.
    Sc16Q11,

    /// `Sc16Q11` samples framed in packets carrying metadata.
    ///
    /// Transmit buffers in this format are sent with their own length
    /// rather than the full buffer size.
    Sc16Q11Meta,
}

impl Format {
    /// Size of one sample in bytes.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Format::Sc16Q11 | Format::Sc16Q11Meta => 4,
        }
    }

    /// Number of whole samples in `bytes`.
    pub fn bytes_to_samples(self, bytes: usize) -> usize {
        bytes / self.bytes_per_sample()
    }
}

/// Parameters of a stream, fixed at creation.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub(crate) direction: Direction,
    pub(crate) format: Format,
    pub(crate) num_transfers: usize,
    pub(crate) samples_per_buffer: usize,
    pub(crate) transfer_timeout: Duration,
    pub(crate) event_interval: Duration,
    pub(crate) log: LogConfig,
}

impl StreamConfig {
    /// Default configuration for a stream in `direction` carrying `format` samples.
    pub fn new(direction: Direction, format: Format) -> Self {
        Self {
            direction,
            format,
            num_transfers: 16,
            samples_per_buffer: 8192,
            transfer_timeout: Duration::from_secs(1),
            event_interval: Duration::from_millis(15),
            log: LogConfig::default(),
        }
    }

    /// Set the number of transfers that may be in flight at once.
    ///
    /// This is the capacity of the stream's transfer pool.
    pub fn with_num_transfers(mut self, num_transfers: usize) -> Self {
        self.num_transfers = num_transfers;
        self
    }

    /// Set the size of each sample buffer, in samples.
    pub fn with_samples_per_buffer(mut self, samples: usize) -> Self {
        self.samples_per_buffer = samples;
        self
    }

    /// Set the timeout the transport applies to each transfer. Zero means none.
    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    /// Set the longest time a single event pump may block in [`Stream::run`][crate::Stream::run].
    pub fn with_event_interval(mut self, interval: Duration) -> Self {
        self.event_interval = interval;
        self
    }

    /// Set the verbosity of the stream's diagnostics.
    pub fn with_log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    /// Transfer direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Sample format.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Number of transfers in the pool.
    pub fn num_transfers(&self) -> usize {
        self.num_transfers
    }

    /// Size of each sample buffer, in samples.
    pub fn samples_per_buffer(&self) -> usize {
        self.samples_per_buffer
    }

    /// Size of a full sample buffer in bytes.
    pub fn buffer_bytes(&self) -> usize {
        self.samples_per_buffer * self.format.bytes_per_sample()
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.num_transfers == 0 {
            return Err(Error::new(
                ErrorKind::InvalidParam,
                "stream needs at least one transfer",
            ));
        }
        if self.samples_per_buffer == 0 || self.samples_per_buffer % SAMPLES_PER_BLOCK != 0 {
            return Err(Error::new(
                ErrorKind::InvalidParam,
                "buffer size must be a non-zero multiple of 1024 samples",
            ));
        }
        Ok(())
    }

    /// Number of bytes to transfer for `buffer`.
    pub(crate) fn submission_len(&self, buffer: &[u8]) -> Result<usize, Error> {
        let len = match (self.direction, self.format) {
            (Direction::Tx, Format::Sc16Q11Meta) => buffer.len(),
            _ => self.buffer_bytes(),
        };
        if len == 0 {
            Err(Error::new(ErrorKind::InvalidParam, "empty buffer"))
        } else if buffer.len() < len {
            Err(Error::new(
                ErrorKind::InvalidParam,
                "buffer is smaller than the stream's buffer size",
            ))
        } else {
            Ok(len)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation() {
        let base = StreamConfig::new(Direction::Rx, Format::Sc16Q11);
        assert!(base.validate().is_ok());
        assert_eq!(base.buffer_bytes(), 8192 * 4);

        let err = base.clone().with_num_transfers(0).validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParam);

        let err = base.with_samples_per_buffer(1000).validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParam);
    }

    #[test]
    fn submission_length() {
        let rx = StreamConfig::new(Direction::Rx, Format::Sc16Q11Meta)
            .with_samples_per_buffer(1024);
        assert_eq!(rx.submission_len(&[0; 4096]).unwrap(), 4096);
        assert_eq!(rx.submission_len(&[0; 8192]).unwrap(), 4096);
        assert!(rx.submission_len(&[0; 100]).is_err());

        let tx_meta = StreamConfig::new(Direction::Tx, Format::Sc16Q11Meta)
            .with_samples_per_buffer(1024);
        assert_eq!(tx_meta.submission_len(&[0; 100]).unwrap(), 100);
        assert!(tx_meta.submission_len(&[]).is_err());
    }

    #[test]
    fn endpoints() {
        assert_eq!(Direction::Rx.endpoint(), 0x81);
        assert_eq!(Direction::Tx.endpoint(), 0x01);
        assert_eq!(Format::Sc16Q11.bytes_to_samples(4096), 1024);
    }
}
