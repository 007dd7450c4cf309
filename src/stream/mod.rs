//! Sample streams over a pool of recycled transfers.
//!
//! A [`Stream`] keeps up to [`num_transfers`][StreamConfig::with_num_transfers]
//! bulk transfers in flight on the sample endpoint. Buffers come either from
//! the stream's [`StreamCallback`] (pull mode, [`Stream::run`]) or from the
//! caller directly (push mode, [`Stream::submit_buffer`]). In push mode some
//! thread must still pump the transport's events, usually by calling `run`
//! with a callback that returns [`NextBuffer::NoData`].
//!
//! ### Example (receive)
//!
//! ```no_run
//! use std::sync::Arc;
//! use sdr_stream::{
//!     transport::sim::SimTransport, Completed, Direction, Format, NextBuffer, Stream,
//!     StreamConfig,
//! };
//!
//! let config = StreamConfig::new(Direction::Rx, Format::Sc16Q11)
//!     .with_num_transfers(8)
//!     .with_samples_per_buffer(4096);
//! let buffer_bytes = config.buffer_bytes();
//!
//! let mut received = 0;
//! let callback = move |done: Option<Completed>| match done {
//!     Some(_) if received >= 1_000_000 => NextBuffer::Shutdown,
//!     Some(c) => {
//!         received += c.num_samples;
//!         NextBuffer::Buffer(c.buffer)
//!     }
//!     None => NextBuffer::Buffer(vec![0; buffer_bytes]),
//! };
//! let stream = Stream::new(Arc::new(SimTransport::auto()), config, callback).unwrap();
//! stream.run().unwrap();
//! ```

use std::{
    fmt::Display,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use log::Level;
use once_cell::sync::OnceCell;

use crate::{diag::diag, transport::Transport, Error};

mod completion;
mod config;
mod pool;
mod state;
mod submit;

pub use config::{Direction, Format, StreamConfig, SAMPLES_PER_BLOCK, SAMPLE_EP_IN, SAMPLE_EP_OUT};
pub use pool::SlotStatus;
pub use state::StreamState;

use pool::TransferPool;
use submit::Wait;


/// How long dropping an unfinished stream waits for its transfers to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// What the stream should do after a buffer is handed to the callback.
#[derive(Debug)]
pub enum NextBuffer {
    /// Submit this buffer next.
    Buffer(Vec<u8>),

    /// Nothing to submit right now.
    NoData,

    /// Stop the stream.
    Shutdown,
}

/// A buffer returned by a successfully completed transfer.
#[derive(Debug)]
pub struct Completed {
    /// The buffer, returned to the callback's ownership.
    pub buffer: Vec<u8>,

    /// Number of bytes requested.
    pub length: usize,

    /// Number of bytes actually transferred.
    pub actual_length: usize,

    /// `actual_length` in samples.
    pub num_samples: usize,
}

/// Supplies buffers to a stream and takes them back.
///
/// Called with the stream's lock held, from [`Stream::run`] and from
/// whichever thread delivers transfer completions. It must not call
/// methods on the stream; return [`NextBuffer::Shutdown`] to stop it.
pub trait StreamCallback: Send + 'static {
    /// Provide the next buffer to submit.
    ///
    /// `completed` is `None` while the stream is filling its transfers
    /// initially, and the finished buffer afterwards.
    fn next_buffer(&mut self, completed: Option<Completed>) -> NextBuffer;

    /// Take back a buffer that will not be passed to `next_buffer`, such as
    /// one returned by a cancelled transfer.
    fn reclaim(&mut self, buffer: Vec<u8>) {
        drop(buffer);
    }
}

impl<F> StreamCallback for F
where
    F: FnMut(Option<Completed>) -> NextBuffer + Send + 'static,
{
    fn next_buffer(&mut self, completed: Option<Completed>) -> NextBuffer {
        self(completed)
    }
}

/// Error returned from [`Stream::submit_buffer`], handing the buffer back.
#[derive(Debug)]
pub struct Rejected {
    /// Why the buffer was not submitted.
    pub error: Error,

    /// The buffer, returned to the caller.
    pub buffer: Vec<u8>,
}

impl Display for Rejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "buffer rejected: {}", self.error)
    }
}

impl std::error::Error for Rejected {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<Rejected> for Error {
    fn from(rejected: Rejected) -> Self {
        rejected.error
    }
}

/// Everything guarded by the stream lock.
pub(crate) struct Inner<H> {
    state: StreamState,
    pool: TransferPool<H>,
    callback: Box<dyn StreamCallback>,
}

pub(crate) struct Shared<T: Transport> {
    transport: Arc<T>,
    config: StreamConfig,
    inner: Mutex<Inner<T::Transfer>>,

    /// Signalled when a slot becomes available or the stream stops running.
    can_submit: Condvar,

    /// First fatal error. Never replaced once set.
    error: OnceCell<Error>,
}

impl<T: Transport> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Inner<T::Transfer>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> StreamState {
        self.lock().state
    }

    fn record_error(&self, error: Error) {
        if self.error.set(error).is_err() {
            diag!(
                self.config.log,
                Level::Debug,
                "Stream already failed, dropping later error"
            );
        }
    }

    /// Leave `Running`, waking any submitter blocked on a slot.
    fn begin_shutdown(&self, inner: &mut Inner<T::Transfer>) {
        if inner.state.begin_shutdown() {
            self.can_submit.notify_all();
        }
    }

    /// While shutting down, finish once drained or cancel whatever is still in flight.
    fn advance_shutdown(&self, inner: &mut Inner<T::Transfer>) {
        if inner.state.finish_drain(inner.pool.is_drained()) {
            diag!(self.config.log, Level::Debug, "Stream done");
            self.can_submit.notify_all();
        } else if inner.state == StreamState::ShuttingDown {
            inner.pool.cancel_all(&*self.transport);
        }
    }

    /// Shutdown requested by the user.
    fn shutdown(&self) {
        let mut inner = self.lock();
        let drained = inner.pool.is_drained();
        inner.state.request_shutdown(drained);
        self.can_submit.notify_all();
        self.advance_shutdown(&mut inner);
    }
}

/// A stream of sample buffers between the host and one endpoint of a device.
///
/// Dropping a stream that has not finished cancels its outstanding transfers
/// and waits briefly for them to drain.
pub struct Stream<T: Transport> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport> Stream<T> {
    /// Allocate the stream's transfers.
    ///
    /// Fails with [`ErrorKind::InvalidParam`][crate::ErrorKind::InvalidParam]
    /// for an invalid `config`, and with
    /// [`ErrorKind::OutOfMemory`][crate::ErrorKind::OutOfMemory] if any
    /// transfer cannot be allocated, in which case none are kept.
    pub fn new(
        transport: Arc<T>,
        config: StreamConfig,
        callback: impl StreamCallback,
    ) -> Result<Self, Error> {
        config.validate()?;
        let pool = TransferPool::new(&*transport, config.num_transfers, config.log)?;
        diag!(
            config.log,
            Level::Debug,
            "Initialized {:?} stream with {} transfers of {} bytes",
            config.direction,
            config.num_transfers,
            config.buffer_bytes()
        );

        Ok(Stream {
            shared: Arc::new(Shared {
                transport,
                config,
                inner: Mutex::new(Inner {
                    state: StreamState::Running,
                    pool,
                    callback: Box::new(callback),
                }),
                can_submit: Condvar::new(),
                error: OnceCell::new(),
            }),
        })
    }

    /// Fill the transfer pool from the callback and process events until the
    /// stream is done.
    ///
    /// Returns the first fatal error the stream encountered, if any.
    pub fn run(&self) -> Result<(), Error> {
        self.shared.run()
    }

    /// Submit a buffer, waiting for a free transfer if none is available.
    ///
    /// `None` waits indefinitely. Fails with
    /// [`ErrorKind::Timeout`][crate::ErrorKind::Timeout] if no transfer
    /// frees up in time.
    pub fn submit_buffer(
        &self,
        buffer: Vec<u8>,
        timeout: Option<Duration>,
    ) -> Result<(), Rejected> {
        // A deadline past what `Instant` can represent is never reached.
        let wait = timeout
            .and_then(|timeout| Instant::now().checked_add(timeout))
            .map_or(Wait::Forever, Wait::Until);
        self.shared.submit_buffer(buffer, wait)
    }

    /// Submit a buffer if a transfer is free, otherwise fail with
    /// [`ErrorKind::WouldBlock`][crate::ErrorKind::WouldBlock].
    pub fn try_submit_buffer(&self, buffer: Vec<u8>) -> Result<(), Rejected> {
        self.shared.submit_buffer(buffer, Wait::NonBlocking)
    }

    /// Stop the stream.
    ///
    /// The stream is done immediately if nothing is in flight, otherwise
    /// outstanding transfers are cancelled and it finishes once they return.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    /// First fatal error encountered by the stream.
    pub fn error(&self) -> Option<Error> {
        self.shared.error.get().cloned()
    }

    /// Number of transfers that could be submitted right now.
    pub fn num_available(&self) -> usize {
        self.shared.lock().pool.num_available()
    }

    /// Total number of transfers.
    pub fn capacity(&self) -> usize {
        self.shared.lock().pool.capacity()
    }

    /// Status of the transfer slot at `index`, or `None` if out of range.
    pub fn slot_status(&self, index: usize) -> Option<SlotStatus> {
        self.shared.lock().pool.status(index)
    }

    /// Whether a transfer has ever completed out of submission order.
    pub fn saw_out_of_order(&self) -> bool {
        self.shared.lock().pool.saw_out_of_order()
    }

    /// Configuration the stream was created with.
    pub fn config(&self) -> &StreamConfig {
        &self.shared.config
    }

    /// Transport the stream's transfers run on.
    pub fn transport(&self) -> &Arc<T> {
        &self.shared.transport
    }
}

impl<T: Transport> Drop for Stream<T> {
    fn drop(&mut self) {
        let shared = &self.shared;
        if shared.state() == StreamState::Done {
            return;
        }

        shared.shutdown();
        let deadline = Instant::now() + DRAIN_TIMEOUT;
        while shared.state() != StreamState::Done {
            if Instant::now() >= deadline {
                diag!(
                    shared.config.log,
                    Level::Warn,
                    "Stream dropped before its transfers drained"
                );
                break;
            }
            let interval = shared.config.event_interval;
            if let Err(err) = shared.transport.handle_events(interval) {
                diag!(
                    shared.config.log,
                    Level::Warn,
                    "Event processing failed while draining: {err}"
                );
            }
        }
    }
}
