//! Contract between the stream engine and the USB transport beneath it.
//!
//! A [`Transport`] stands for one open device. The engine only needs four
//! things from it: allocate a reusable transfer handle, submit a bulk
//! transfer on a handle, request cancellation of a handle's transfer, and
//! pump the transport's event machinery so completions get delivered.
//! Opening, closing, and synchronous control requests are left to whoever
//! constructs the transport.

use std::{fmt::Display, time::Duration};

use crate::ErrorKind;

pub mod sim;

/// Failure codes reported by a [`Transport`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TransportError {
    /// Input/output error.
    Io,

    /// Invalid parameter.
    InvalidParam,

    /// Access denied (insufficient permissions).
    Access,

    /// No such device (it may have been disconnected).
    NoDevice,

    /// Entity not found. Returned when cancelling a transfer that is not pending.
    NotFound,

    /// Resource busy.
    Busy,

    /// Operation timed out.
    Timeout,

    /// Overflow.
    Overflow,

    /// Pipe error.
    Pipe,

    /// System call interrupted.
    Interrupted,

    /// Insufficient memory.
    NoMem,

    /// Operation not supported or unimplemented on this platform.
    NotSupported,

    /// Other error.
    Other,
}

impl Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransportError::Io => "input/output error",
            TransportError::InvalidParam => "invalid parameter",
            TransportError::Access => "access denied",
            TransportError::NoDevice => "no such device",
            TransportError::NotFound => "entity not found",
            TransportError::Busy => "resource busy",
            TransportError::Timeout => "operation timed out",
            TransportError::Overflow => "overflow",
            TransportError::Pipe => "broken pipe",
            TransportError::Interrupted => "system call interrupted",
            TransportError::NoMem => "insufficient memory",
            TransportError::NotSupported => "operation not supported",
            TransportError::Other => "other error",
        };
        f.write_str(s)
    }
}

impl std::error::Error for TransportError {}

/// Transfer status.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    /// Transfer completed without error. This does not mean the full
    /// requested length was transferred.
    Completed,

    /// Transfer was cancelled.
    Cancelled,

    /// Endpoint in a STALL condition.
    Stall,

    /// Transfer failed.
    Error,

    /// Device sent more data than requested.
    Overflow,

    /// Transfer timed out.
    TimedOut,

    /// Device disconnected.
    NoDevice,

    /// Unknown or backend-specific error.
    Unknown,
}

impl TransferStatus {
    /// Error category of a fault status, or `None` for `Completed` and `Cancelled`.
    pub fn error_kind(self) -> Option<ErrorKind> {
        match self {
            TransferStatus::Completed | TransferStatus::Cancelled => None,
            TransferStatus::Stall | TransferStatus::Error | TransferStatus::Overflow => {
                Some(ErrorKind::Io)
            }
            TransferStatus::TimedOut => Some(ErrorKind::Timeout),
            TransferStatus::NoDevice => Some(ErrorKind::NoDevice),
            TransferStatus::Unknown => Some(ErrorKind::Unexpected),
        }
    }
}

/// Callback invoked exactly once when a submitted transfer finishes.
pub type CompletionFn = Box<dyn FnOnce(TransferCompletion) + Send>;

/// One bulk transfer handed to [`Transport::submit`].
pub struct Submission {
    /// Endpoint address. Bit 7 set means IN.
    pub endpoint: u8,

    /// Data to send, or space to receive into. Owned by the transport
    /// until the completion is delivered.
    pub buffer: Vec<u8>,

    /// Number of bytes to transfer, at most `buffer.len()`.
    pub length: usize,

    /// Transport-level timeout. `Duration::ZERO` means none.
    pub timeout: Duration,

    /// Opaque value echoed back in [`TransferCompletion::context`].
    pub context: usize,

    /// Called from [`Transport::handle_events`] when the transfer finishes.
    pub on_complete: CompletionFn,
}

/// Status and data returned on transfer completion.
///
/// A transfer can return partial data even in the case of failure or
/// cancellation, so this carries both rather than being a `Result`.
#[derive(Debug)]
pub struct TransferCompletion {
    /// The `context` of the originating [`Submission`].
    pub context: usize,

    /// Indicates successful completion or error.
    pub status: TransferStatus,

    /// The submitted buffer, returned for re-use.
    pub buffer: Vec<u8>,

    /// Requested length of the transfer.
    pub length: usize,

    /// Number of bytes actually transferred.
    pub actual_length: usize,
}

/// Error returned when the transport refuses a submission.
///
/// The buffer is handed back so the caller keeps ownership of it.
#[derive(Debug)]
pub struct SubmitError {
    pub error: TransportError,
    pub buffer: Vec<u8>,
}

/// An open device that can run asynchronous bulk transfers.
pub trait Transport: Send + Sync + 'static {
    /// Reusable per-transfer state. Released when dropped.
    type Transfer: Send + Sync + 'static;

    /// Allocate a transfer handle.
    fn alloc_transfer(&self) -> Result<Self::Transfer, TransportError>;

    /// Submit a transfer on an idle handle. On success, `submission.on_complete`
    /// must eventually be called exactly once from [`handle_events`][Self::handle_events].
    ///
    /// The callback may be invoked on another thread before this returns, and
    /// must never be invoked while the transport holds an internal lock.
    fn submit(&self, transfer: &Self::Transfer, submission: Submission) -> Result<(), SubmitError>;

    /// Request cancellation of the transfer pending on `transfer`.
    ///
    /// Returns `TransportError::NotFound` if nothing is pending on it.
    fn cancel(&self, transfer: &Self::Transfer) -> Result<(), TransportError>;

    /// Deliver pending completions, waiting at most `max_wait` for one to
    /// arrive. Returns `Ok` on timeout.
    fn handle_events(&self, max_wait: Duration) -> Result<(), TransportError>;
}
