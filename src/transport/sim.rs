//! In-memory transport for driving streams without hardware.
//!
//! Transfers submitted to a [`SimTransport`] sit in a pending list until they
//! are completed, either by the test harness (`complete_next`,
//! `complete_all`) or automatically on every pump when created with
//! [`SimTransport::auto`]. Completion callbacks run from
//! [`Transport::handle_events`] on the pumping thread, with the transport's
//! own lock released, the same way a libusb event loop dispatches them.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Condvar, Mutex, MutexGuard,
    },
    time::{Duration, Instant},
};

use slab::Slab;

use super::{
    Submission, SubmitError, TransferCompletion, TransferStatus, Transport, TransportError,
};

/// Handle allocated by [`SimTransport::alloc_transfer`].
#[derive(Debug)]
pub struct SimTransfer {
    id: usize,
    live: Arc<AtomicUsize>,
}

impl SimTransfer {
    /// Allocation-order identifier of this handle.
    pub fn id(&self) -> usize {
        self.id
    }
}

impl Drop for SimTransfer {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

struct SimPending {
    transfer_id: usize,
    submission: Submission,
    outcome: Option<(TransferStatus, usize)>,
}

#[derive(Default)]
struct SimState {
    pending: Slab<SimPending>,

    /// Slab keys in submission order.
    order: VecDeque<usize>,

    auto_complete: bool,
    allocations: usize,
    next_id: usize,
    submitted: usize,
    fill: u8,

    fail_alloc_at: Option<usize>,
    fail_submit: VecDeque<TransportError>,
    fail_pump: Option<TransportError>,
    submit_hook: Option<Box<dyn FnOnce() + Send>>,
}

impl SimState {
    fn find(&self, transfer_id: usize) -> Option<usize> {
        self.order
            .iter()
            .copied()
            .find(|&key| self.pending[key].transfer_id == transfer_id)
    }

    fn nth_unfinished(&self, n: usize) -> Option<usize> {
        self.order
            .iter()
            .copied()
            .filter(|&key| self.pending[key].outcome.is_none())
            .nth(n)
    }

    fn has_ready(&self) -> bool {
        self.order
            .iter()
            .any(|&key| self.pending[key].outcome.is_some())
    }
}

/// Simulated USB device with scriptable completions and fault injection.
#[derive(Default)]
pub struct SimTransport {
    state: Mutex<SimState>,
    ready: Condvar,
    live: Arc<AtomicUsize>,
}

impl SimTransport {
    /// Create a transport whose transfers complete only when scripted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport that successfully completes every pending transfer
    /// on each call to `handle_events`.
    pub fn auto() -> Self {
        let t = Self::default();
        t.lock().auto_complete = true;
        t
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enable or disable auto-completion.
    pub fn set_auto_complete(&self, auto: bool) {
        self.lock().auto_complete = auto;
        self.ready.notify_all();
    }

    /// Make the `n`th (zero-based) call to `alloc_transfer` fail with `NoMem`.
    pub fn fail_alloc_at(&self, n: usize) {
        self.lock().fail_alloc_at = Some(n);
    }

    /// Reject the next submission with `err`. Calls queue up.
    pub fn fail_next_submit(&self, err: TransportError) {
        self.lock().fail_submit.push_back(err);
    }

    /// Make the next `handle_events` call return `err`.
    pub fn fail_next_pump(&self, err: TransportError) {
        self.lock().fail_pump = Some(err);
    }

    /// Run `hook` inside the next `submit` call, before the transfer is
    /// registered and with no transport lock held.
    pub fn before_next_submit(&self, hook: impl FnOnce() + Send + 'static) {
        self.lock().submit_hook = Some(Box::new(hook));
    }

    /// Finish the oldest unfinished transfer with `status`.
    ///
    /// A `Completed` transfer reports its full requested length, any other
    /// status reports zero bytes. Returns `false` if nothing was pending.
    pub fn complete_next(&self, status: TransferStatus) -> bool {
        self.finish(0, status, None)
    }

    /// Finish the oldest unfinished transfer with `status` and `actual_length` bytes.
    pub fn complete_next_with_length(&self, status: TransferStatus, actual_length: usize) -> bool {
        self.finish(0, status, Some(actual_length))
    }

    /// Finish the `n`th oldest unfinished transfer, out of submission order.
    pub fn complete_nth(&self, n: usize, status: TransferStatus) -> bool {
        self.finish(n, status, None)
    }

    /// Finish every unfinished transfer with `status`. Returns how many were finished.
    pub fn complete_all(&self, status: TransferStatus) -> usize {
        let mut n = 0;
        while self.complete_next(status) {
            n += 1;
        }
        n
    }

    fn finish(&self, n: usize, status: TransferStatus, actual_length: Option<usize>) -> bool {
        let mut state = self.lock();
        let Some(key) = state.nth_unfinished(n) else {
            return false;
        };
        let pending = &mut state.pending[key];
        let actual = actual_length.unwrap_or(match status {
            TransferStatus::Completed => pending.submission.length,
            _ => 0,
        });
        tracing::trace!(
            "sim transfer {} finishing with {:?}, {} bytes",
            pending.transfer_id,
            status,
            actual
        );
        pending.outcome = Some((status, actual.min(pending.submission.length)));
        drop(state);
        self.ready.notify_all();
        true
    }

    /// Number of transfer handles currently allocated and not yet dropped.
    pub fn live_transfers(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Number of transfers submitted whose completion has not been delivered.
    pub fn in_flight(&self) -> usize {
        self.lock().pending.len()
    }

    /// Total number of accepted submissions.
    pub fn submitted(&self) -> usize {
        self.lock().submitted
    }
}

impl Transport for SimTransport {
    type Transfer = SimTransfer;

    fn alloc_transfer(&self) -> Result<SimTransfer, TransportError> {
        let mut state = self.lock();
        let n = state.allocations;
        state.allocations += 1;
        if state.fail_alloc_at == Some(n) {
            tracing::debug!("sim allocation {n} failing");
            return Err(TransportError::NoMem);
        }
        let id = state.next_id;
        state.next_id += 1;
        self.live.fetch_add(1, Ordering::AcqRel);
        Ok(SimTransfer {
            id,
            live: self.live.clone(),
        })
    }

    fn submit(&self, transfer: &SimTransfer, submission: Submission) -> Result<(), SubmitError> {
        let hook = self.lock().submit_hook.take();
        if let Some(hook) = hook {
            hook();
        }

        let mut state = self.lock();
        let error = if let Some(err) = state.fail_submit.pop_front() {
            Some(err)
        } else if state.find(transfer.id).is_some() {
            Some(TransportError::Busy)
        } else if submission.length > submission.buffer.len() {
            Some(TransportError::InvalidParam)
        } else {
            None
        };
        if let Some(error) = error {
            tracing::debug!(
                "sim rejecting submission on transfer {}: {error}",
                transfer.id
            );
            return Err(SubmitError {
                error,
                buffer: submission.buffer,
            });
        }

        tracing::trace!(
            "sim transfer {} submitted on ep {:02x}, {} bytes",
            transfer.id,
            submission.endpoint,
            submission.length
        );
        let outcome = state
            .auto_complete
            .then_some((TransferStatus::Completed, submission.length));
        let key = state.pending.insert(SimPending {
            transfer_id: transfer.id,
            submission,
            outcome,
        });
        state.order.push_back(key);
        state.submitted += 1;
        drop(state);
        self.ready.notify_all();
        Ok(())
    }

    fn cancel(&self, transfer: &SimTransfer) -> Result<(), TransportError> {
        let mut state = self.lock();
        let Some(key) = state.find(transfer.id) else {
            return Err(TransportError::NotFound);
        };
        let pending = &mut state.pending[key];
        if pending.outcome.is_some() {
            return Err(TransportError::NotFound);
        }
        tracing::trace!("sim transfer {} cancelled", transfer.id);
        pending.outcome = Some((TransferStatus::Cancelled, 0));
        drop(state);
        self.ready.notify_all();
        Ok(())
    }

    fn handle_events(&self, max_wait: Duration) -> Result<(), TransportError> {
        let deadline = Instant::now() + max_wait;
        let mut state = self.lock();
        if let Some(err) = state.fail_pump.take() {
            return Err(err);
        }

        loop {
            if state.auto_complete {
                let keys: Vec<usize> = state.order.iter().copied().collect();
                for key in keys {
                    let pending = &mut state.pending[key];
                    if pending.outcome.is_none() {
                        pending.outcome =
                            Some((TransferStatus::Completed, pending.submission.length));
                    }
                }
            }
            if state.has_ready() {
                break;
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return Ok(());
            };
            state = self
                .ready
                .wait_timeout(state, remaining)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }

        let mut completions = Vec::new();
        let order = std::mem::take(&mut state.order);
        for key in order {
            if state.pending[key].outcome.is_none() {
                state.order.push_back(key);
                continue;
            }
            let SimPending {
                transfer_id,
                submission,
                outcome,
            } = state.pending.remove(key);
            let (status, actual_length) = outcome.unwrap_or((TransferStatus::Unknown, 0));
            let mut buffer = submission.buffer;
            if submission.endpoint & 0x80 != 0 {
                for byte in &mut buffer[..actual_length] {
                    *byte = state.fill;
                    state.fill = state.fill.wrapping_add(1);
                }
            }
            tracing::trace!("sim transfer {transfer_id} delivering {status:?}");
            completions.push((
                submission.on_complete,
                TransferCompletion {
                    context: submission.context,
                    status,
                    buffer,
                    length: submission.length,
                    actual_length,
                },
            ));
        }
        drop(state);

        for (on_complete, completion) in completions {
            on_complete(completion);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    fn submission(
        endpoint: u8,
        len: usize,
        context: usize,
    ) -> (Submission, mpsc::Receiver<TransferCompletion>) {
        let (tx, rx) = mpsc::channel();
        let s = Submission {
            endpoint,
            buffer: vec![0; len],
            length: len,
            timeout: Duration::ZERO,
            context,
            on_complete: Box::new(move |c| tx.send(c).unwrap()),
        };
        (s, rx)
    }

    #[test]
    fn manual_completion_in_order() {
        let sim = SimTransport::new();
        let a = sim.alloc_transfer().unwrap();
        let b = sim.alloc_transfer().unwrap();
        let (sa, ra) = submission(0x81, 8, 0);
        let (sb, rb) = submission(0x81, 8, 1);
        sim.submit(&a, sa).unwrap();
        sim.submit(&b, sb).unwrap();
        assert_eq!(sim.in_flight(), 2);

        sim.handle_events(Duration::from_millis(1)).unwrap();
        assert!(ra.try_recv().is_err());

        assert!(sim.complete_next(TransferStatus::Completed));
        sim.handle_events(Duration::from_millis(1)).unwrap();
        let c = ra.try_recv().unwrap();
        assert_eq!(c.context, 0);
        assert_eq!(c.actual_length, 8);
        assert_eq!(c.buffer, (0..8).collect::<Vec<u8>>());
        assert!(rb.try_recv().is_err());
        assert_eq!(sim.in_flight(), 1);
    }

    #[test]
    fn cancel_and_not_found() {
        let sim = SimTransport::new();
        let a = sim.alloc_transfer().unwrap();
        assert_eq!(sim.cancel(&a), Err(TransportError::NotFound));

        let (sa, ra) = submission(0x01, 4, 7);
        sim.submit(&a, sa).unwrap();
        sim.cancel(&a).unwrap();
        assert_eq!(sim.cancel(&a), Err(TransportError::NotFound));
        sim.handle_events(Duration::ZERO).unwrap();
        let c = ra.try_recv().unwrap();
        assert_eq!(c.status, TransferStatus::Cancelled);
        assert_eq!(c.actual_length, 0);
    }

    #[test]
    fn busy_handle_and_injected_failures() {
        let sim = SimTransport::new();
        sim.fail_alloc_at(1);
        let a = sim.alloc_transfer().unwrap();
        assert_eq!(sim.alloc_transfer().unwrap_err(), TransportError::NoMem);
        assert_eq!(sim.live_transfers(), 1);

        let (s1, _r1) = submission(0x01, 4, 0);
        sim.submit(&a, s1).unwrap();
        let (s2, _r2) = submission(0x01, 4, 0);
        let err = sim.submit(&a, s2).unwrap_err();
        assert_eq!(err.error, TransportError::Busy);
        assert_eq!(err.buffer.len(), 4);

        sim.fail_next_pump(TransportError::Io);
        assert_eq!(sim.handle_events(Duration::ZERO), Err(TransportError::Io));

        drop(a);
        assert_eq!(sim.live_transfers(), 0);
    }

    #[test]
    fn submit_hook_runs_once_before_registration() {
        let sim = Arc::new(SimTransport::new());
        let a = sim.alloc_transfer().unwrap();
        let (seen_tx, seen_rx) = mpsc::channel();
        let inner = sim.clone();
        sim.before_next_submit(move || seen_tx.send(inner.in_flight()).unwrap());

        let (s1, _r1) = submission(0x01, 4, 0);
        sim.submit(&a, s1).unwrap();
        assert_eq!(seen_rx.try_recv(), Ok(0));
        assert_eq!(sim.in_flight(), 1);

        sim.cancel(&a).unwrap();
        sim.handle_events(Duration::ZERO).unwrap();
        let (s2, _r2) = submission(0x01, 4, 0);
        sim.submit(&a, s2).unwrap();
        assert!(seen_rx.try_recv().is_err());
    }

    #[test]
    fn pump_times_out_when_idle() {
        let sim = SimTransport::new();
        let start = Instant::now();
        sim.handle_events(Duration::from_millis(20)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
