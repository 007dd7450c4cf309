use std::{
    sync::{Arc, MutexGuard, PoisonError},
    time::Instant,
};

use log::Level;

use super::{Inner, NextBuffer, Rejected, Shared, SlotStatus, StreamState};
use crate::{
    diag::diag,
    transport::{Submission, SubmitError, Transport, TransportError},
    Error, ErrorKind,
};

/// How long a push submission may wait for a free transfer.
#[derive(Debug, Copy, Clone)]
pub(super) enum Wait {
    NonBlocking,
    Until(Instant),
    Forever,
}

type Guard<'a, T> = MutexGuard<'a, Inner<<T as Transport>::Transfer>>;

impl<T: Transport> Shared<T> {
    /// Submit `buffer` on the next available slot.
    ///
    /// The lock is released around the transport's submit call, so a
    /// completion for another slot may run in between; the pool is consistent
    /// at that point. On failure the slot is rolled back and the buffer
    /// returned.
    ///
    /// Precondition: at least one slot is available.
    pub(super) fn submit_one<'a>(
        self: &'a Arc<Self>,
        mut inner: Guard<'a, T>,
        buffer: Vec<u8>,
    ) -> (Guard<'a, T>, Result<(), Rejected>) {
        let length = match self.config.submission_len(&buffer) {
            Ok(length) => length,
            Err(error) => return (inner, Err(Rejected { error, buffer })),
        };
        let Some(index) = inner.pool.find_available() else {
            let error = Error::new(ErrorKind::Unexpected, "no transfer available");
            return (inner, Err(Rejected { error, buffer }));
        };

        let transfer = inner.pool.mark_in_flight(index);
        let shared = Arc::clone(self);
        let submission = Submission {
            endpoint: self.config.direction.endpoint(),
            buffer,
            length,
            timeout: self.config.transfer_timeout,
            context: index,
            on_complete: Box::new(move |completion| shared.handle_completion(completion)),
        };

        // Submitting with the stream lock held would order it before the
        // transport's event lock, the reverse of the completion path.
        drop(inner);
        let result = self.transport.submit(&transfer, submission);
        let mut inner = self.lock();

        match result {
            Ok(()) => {
                if inner.state != StreamState::Running {
                    // Shutdown began while unlocked, possibly before this
                    // transfer existed to be cancelled.
                    if inner.pool.status(index) != Some(SlotStatus::Available) {
                        inner.pool.cancel(index, &*self.transport);
                    }
                    self.advance_shutdown(&mut inner);
                }
                (inner, Ok(()))
            }
            Err(SubmitError { error, buffer }) => {
                diag!(
                    self.config.log,
                    Level::Error,
                    "Failed to submit transfer: {error}"
                );
                inner.pool.rollback(index);
                // Another submitter may be waiting for this slot.
                self.can_submit.notify_one();
                self.advance_shutdown(&mut inner);
                let error = Error::from_transport(error, "failed to submit transfer");
                (inner, Err(Rejected { error, buffer }))
            }
        }
    }

    /// Push a caller-supplied buffer, waiting for a slot according to `wait`.
    pub(super) fn submit_buffer(
        self: &Arc<Self>,
        buffer: Vec<u8>,
        wait: Wait,
    ) -> Result<(), Rejected> {
        if let Err(error) = self.config.submission_len(&buffer) {
            return Err(Rejected { error, buffer });
        }

        let mut inner = self.lock();
        loop {
            if inner.state != StreamState::Running {
                let error = Error::new(ErrorKind::Unexpected, "stream is not running");
                return Err(Rejected { error, buffer });
            }
            if inner.pool.num_available() > 0 {
                break;
            }
            match wait {
                Wait::NonBlocking => {
                    diag!(
                        self.config.log,
                        Level::Debug,
                        "Non-blocking buffer submission requested, but no transfers are currently available"
                    );
                    let error = Error::new(ErrorKind::WouldBlock, "no transfers available");
                    return Err(Rejected { error, buffer });
                }
                Wait::Forever => {
                    inner = self
                        .can_submit
                        .wait(inner)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Wait::Until(deadline) => {
                    let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                        diag!(
                            self.config.log,
                            Level::Debug,
                            "Timed out waiting for a transfer to become available"
                        );
                        let error =
                            Error::new(ErrorKind::Timeout, "timed out waiting for a transfer");
                        return Err(Rejected { error, buffer });
                    };
                    inner = self
                        .can_submit
                        .wait_timeout(inner, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }

        self.submit_one(inner, buffer).1
    }

    /// Pull loop: prime the pool from the callback, then pump events until done.
    pub(super) fn run(self: &Arc<Self>) -> Result<(), Error> {
        let mut inner = self.lock();
        for _ in 0..inner.pool.capacity() {
            if inner.state != StreamState::Running || inner.pool.num_available() == 0 {
                break;
            }
            let next = inner.callback.next_buffer(None);
            match next {
                NextBuffer::Shutdown => {
                    let drained = inner.pool.is_drained();
                    inner.state.request_shutdown(drained);
                    self.can_submit.notify_all();
                    self.advance_shutdown(&mut inner);
                    break;
                }
                NextBuffer::NoData => break,
                NextBuffer::Buffer(buffer) => {
                    let (guard, result) = self.submit_one(inner, buffer);
                    inner = guard;
                    if let Err(Rejected { error, buffer }) = result {
                        inner.callback.reclaim(buffer);
                        self.record_error(error);
                        self.begin_shutdown(&mut inner);
                        self.advance_shutdown(&mut inner);
                        break;
                    }
                }
            }
        }
        drop(inner);

        while self.state() != StreamState::Done {
            match self.transport.handle_events(self.config.event_interval) {
                Ok(()) | Err(TransportError::Interrupted) => {}
                Err(err) => {
                    diag!(
                        self.config.log,
                        Level::Warn,
                        "Unexpected value from events processing: {err}"
                    );
                    let mut inner = self.lock();
                    self.record_error(Error::from_transport(err, "event processing failed"));
                    self.begin_shutdown(&mut inner);
                    self.advance_shutdown(&mut inner);
                }
            }
        }

        match self.error.get() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}
