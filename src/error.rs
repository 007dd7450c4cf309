use std::{fmt::Display, io};

use crate::transport::{TransferStatus, TransportError};

/// Error returned from stream operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub(crate) kind: ErrorKind,
    pub(crate) source: Option<TransportError>,
    pub(crate) message: &'static str,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self {
            kind,
            source: None,
            message,
        }
    }

    pub(crate) fn from_transport(err: TransportError, message: &'static str) -> Self {
        Self {
            kind: err.into(),
            source: Some(err),
            message,
        }
    }

    /// Error recorded for a transfer that completed with a fault status.
    ///
    /// Returns `None` for statuses that are not faults.
    pub(crate) fn from_status(status: TransferStatus) -> Option<Self> {
        let message = match status {
            TransferStatus::Completed | TransferStatus::Cancelled => return None,
            TransferStatus::Stall => "endpoint stalled",
            TransferStatus::Error => "transfer failed",
            TransferStatus::Overflow => "transfer overflowed",
            TransferStatus::TimedOut => "transfer timed out",
            TransferStatus::NoDevice => "device disconnected",
            TransferStatus::Unknown => "unexpected transfer status",
        };
        status.error_kind().map(|kind| Error::new(kind, message))
    }

    /// Get the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get the transport failure this error was mapped from, if any.
    pub fn transport_error(&self) -> Option<TransportError> {
        self.source
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(source) = self.source {
            write!(f, " ({source})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Error::from_transport(err, "transport operation failed")
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match err.kind {
            ErrorKind::Io => io::ErrorKind::Other,
            ErrorKind::InvalidParam => io::ErrorKind::InvalidInput,
            ErrorKind::NoDevice => io::ErrorKind::NotConnected,
            ErrorKind::Timeout => io::ErrorKind::TimedOut,
            ErrorKind::OutOfMemory => io::ErrorKind::OutOfMemory,
            ErrorKind::Unsupported => io::ErrorKind::Unsupported,
            ErrorKind::PermissionDenied => io::ErrorKind::PermissionDenied,
            ErrorKind::WouldBlock => io::ErrorKind::WouldBlock,
            ErrorKind::Unexpected => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/// General category of error as part of an [`Error`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Low-level I/O failure, including endpoint stalls and overflows.
    Io,

    /// An argument or configuration value was rejected.
    InvalidParam,

    /// The device is busy, disconnected, or otherwise unavailable.
    NoDevice,

    /// An operation did not complete in time.
    Timeout,

    /// Transfer resources could not be allocated.
    OutOfMemory,

    /// The operation is not supported by the transport.
    Unsupported,

    /// Insufficient permissions to access the device.
    PermissionDenied,

    /// A nonblocking submission found no free transfer slot.
    WouldBlock,

    /// Uncategorized error.
    Unexpected,
}

impl From<TransportError> for ErrorKind {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Io => ErrorKind::Io,
            TransportError::InvalidParam => ErrorKind::InvalidParam,
            TransportError::Busy | TransportError::NoDevice => ErrorKind::NoDevice,
            TransportError::Timeout => ErrorKind::Timeout,
            TransportError::NoMem => ErrorKind::OutOfMemory,
            TransportError::NotSupported => ErrorKind::Unsupported,
            TransportError::Access => ErrorKind::PermissionDenied,
            TransportError::Overflow
            | TransportError::Pipe
            | TransportError::Interrupted
            | TransportError::NotFound
            | TransportError::Other => ErrorKind::Unexpected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_mapping() {
        use TransportError::*;
        let table = [
            (Io, ErrorKind::Io),
            (InvalidParam, ErrorKind::InvalidParam),
            (Busy, ErrorKind::NoDevice),
            (NoDevice, ErrorKind::NoDevice),
            (Timeout, ErrorKind::Timeout),
            (NoMem, ErrorKind::OutOfMemory),
            (NotSupported, ErrorKind::Unsupported),
            (Access, ErrorKind::PermissionDenied),
            (Overflow, ErrorKind::Unexpected),
            (Pipe, ErrorKind::Unexpected),
            (Interrupted, ErrorKind::Unexpected),
            (NotFound, ErrorKind::Unexpected),
            (Other, ErrorKind::Unexpected),
        ];
        for (err, kind) in table {
            assert_eq!(ErrorKind::from(err), kind, "{err:?}");
        }
    }

    #[test]
    fn status_faults() {
        assert_eq!(Error::from_status(TransferStatus::Completed), None);
        assert_eq!(Error::from_status(TransferStatus::Cancelled), None);
        assert_eq!(
            Error::from_status(TransferStatus::Stall).map(|e| e.kind()),
            Some(ErrorKind::Io)
        );
        assert_eq!(
            Error::from_status(TransferStatus::TimedOut).map(|e| e.kind()),
            Some(ErrorKind::Timeout)
        );
        assert_eq!(
            Error::from_status(TransferStatus::NoDevice).map(|e| e.kind()),
            Some(ErrorKind::NoDevice)
        );
        assert_eq!(
            Error::from_status(TransferStatus::Unknown).map(|e| e.kind()),
            Some(ErrorKind::Unexpected)
        );
    }

    #[test]
    fn display_includes_transport_code() {
        let err = Error::from_transport(TransportError::Pipe, "failed to submit transfer");
        assert_eq!(err.to_string(), "failed to submit transfer (broken pipe)");
        assert_eq!(err.transport_error(), Some(TransportError::Pipe));

        let io_err: io::Error = Error::new(ErrorKind::WouldBlock, "no slot").into();
        assert_eq!(io_err.kind(), io::ErrorKind::WouldBlock);
    }
}
