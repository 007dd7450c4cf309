//! Asynchronous sample streaming for USB-attached software-defined radios.
//!
//! A [`Stream`] moves a continuous sequence of sample buffers between the
//! host and a device through a fixed pool of recycled bulk transfers. It
//! runs on top of any [`Transport`], the small set of asynchronous transfer
//! primitives a USB backend provides.
//!
//! Device discovery, opening, and configuration are the job of the backend
//! that constructs the transport. [`transport::sim::SimTransport`] is an
//! in-memory backend for exercising streams without hardware.

mod diag;
pub use diag::LogConfig;

mod error;
pub use error::{Error, ErrorKind};

pub mod transport;
pub use transport::{TransferStatus, Transport, TransportError};

mod stream;
pub use stream::{
    Completed, Direction, Format, NextBuffer, Rejected, SlotStatus, Stream, StreamCallback,
    StreamConfig, StreamState, SAMPLES_PER_BLOCK, SAMPLE_EP_IN, SAMPLE_EP_OUT,
};
