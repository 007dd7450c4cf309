use std::sync::Arc;

use log::Level;

use super::{Completed, Format, NextBuffer, Rejected, Shared, StreamState};
use crate::{
    diag::diag,
    transport::{TransferCompletion, TransferStatus, Transport},
    Error,
};

impl<T: Transport> Shared<T> {
    /// Completion callback for every transfer the stream submits.
    ///
    /// Returns the slot to the pool, records faults, and while running asks
    /// the stream callback for the next buffer and resubmits it. Once
    /// shutting down, each completion re-broadcasts cancellation until the
    /// last transfer is back.
    pub(super) fn handle_completion(self: &Arc<Self>, completion: TransferCompletion) {
        let log = self.config.log;
        let TransferCompletion {
            context,
            status,
            buffer,
            length,
            actual_length,
        } = completion;

        let mut inner = self.lock();

        if inner.pool.mark_available(context) {
            self.can_submit.notify_one();
        } else {
            diag!(
                log,
                Level::Error,
                "Unable to find transfer for slot {context}"
            );
            self.begin_shutdown(&mut inner);
        }

        match status {
            TransferStatus::Completed => {}
            TransferStatus::Cancelled => {
                // Expected while tearing down.
                self.begin_shutdown(&mut inner);
            }
            fault => {
                diag!(
                    log,
                    Level::Error,
                    "Transfer on slot {context} failed with {fault:?} after {actual_length} of {length} bytes"
                );
                if let Some(error) = Error::from_status(fault) {
                    self.record_error(error);
                }
                self.begin_shutdown(&mut inner);
            }
        }

        if inner.state == StreamState::Running {
            if self.config.format == Format::Sc16Q11 && actual_length != length {
                diag!(
                    log,
                    Level::Warn,
                    "Received short transfer: {actual_length} of {length} bytes"
                );
            }

            let completed = Completed {
                buffer,
                length,
                actual_length,
                num_samples: self.config.format.bytes_to_samples(actual_length),
            };
            let next = inner.callback.next_buffer(Some(completed));
            match next {
                NextBuffer::Shutdown => self.begin_shutdown(&mut inner),
                NextBuffer::NoData => {}
                NextBuffer::Buffer(next) => {
                    let (guard, result) = self.submit_one(inner, next);
                    inner = guard;
                    // No caller to report to from here, so the stream goes down.
                    if let Err(Rejected { error, buffer }) = result {
                        inner.callback.reclaim(buffer);
                        self.record_error(error);
                        self.begin_shutdown(&mut inner);
                    }
                }
            }
        } else {
            inner.callback.reclaim(buffer);
        }

        self.advance_shutdown(&mut inner);
    }
}
