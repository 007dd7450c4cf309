use std::sync::Arc;

use log::Level;

use crate::{
    diag::diag,
    transport::{Transport, TransportError},
    Error, ErrorKind, LogConfig,
};

/// State of one transfer slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SlotStatus {
    /// Free to carry the next submission.
    Available,

    /// Submitted to the transport, completion not yet delivered.
    InFlight,

    /// Cancellation requested, completion not yet delivered.
    CancelPending,
}

struct Slot<H> {
    transfer: Arc<H>,
    status: SlotStatus,
}

/// Fixed set of transfer handles reused round-robin.
///
/// Not synchronized itself: the owning stream keeps it behind its lock.
pub(crate) struct TransferPool<H> {
    slots: Vec<Slot<H>>,
    num_available: usize,

    /// Slot expected to be submitted next.
    next_index: usize,

    /// Set the first time a completion frees a slot other than `next_index`.
    saw_out_of_order: bool,

    log: LogConfig,
}

impl<H> TransferPool<H> {
    /// Allocate `capacity` transfer handles from `transport`.
    ///
    /// Either every handle is allocated or none survive: handles allocated
    /// before a failure are released before returning the error.
    pub(crate) fn new<T>(transport: &T, capacity: usize, log: LogConfig) -> Result<Self, Error>
    where
        T: Transport<Transfer = H>,
    {
        let slots = (0..capacity)
            .map(|_| {
                transport.alloc_transfer().map(|transfer| Slot {
                    transfer: Arc::new(transfer),
                    status: SlotStatus::Available,
                })
            })
            .collect::<Result<Vec<_>, TransportError>>()
            .map_err(|err| {
                diag!(log, Level::Error, "Failed to allocate transfers: {err}");
                // Whatever the transport reported, running out of handles is a memory failure.
                Error {
                    kind: ErrorKind::OutOfMemory,
                    source: Some(err),
                    message: "failed to allocate transfers",
                }
            })?;

        Ok(TransferPool {
            slots,
            num_available: capacity,
            next_index: 0,
            saw_out_of_order: false,
            log,
        })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn num_available(&self) -> usize {
        self.num_available
    }

    #[cfg(test)]
    pub(crate) fn next_index(&self) -> usize {
        self.next_index
    }

    pub(crate) fn saw_out_of_order(&self) -> bool {
        self.saw_out_of_order
    }

    pub(crate) fn status(&self, index: usize) -> Option<SlotStatus> {
        self.slots.get(index).map(|s| s.status)
    }

    /// Every slot is back to `Available`.
    pub(crate) fn is_drained(&self) -> bool {
        self.num_available == self.slots.len()
    }

    /// Find the first available slot at or after `next_index`, wrapping.
    pub(crate) fn find_available(&mut self) -> Option<usize> {
        let n = self.slots.len();
        let index = (0..n)
            .map(|offset| (self.next_index + offset) % n)
            .find(|&i| self.slots[i].status == SlotStatus::Available)?;

        if index != self.next_index && !self.saw_out_of_order {
            diag!(
                self.log,
                Level::Warn,
                "Transfer callback occurred out of order. (Warning only this time.)"
            );
            self.saw_out_of_order = true;
        }
        Some(index)
    }

    /// Claim an available slot for a submission and return its handle.
    pub(crate) fn mark_in_flight(&mut self, index: usize) -> Arc<H> {
        let n = self.slots.len();
        let slot = &mut self.slots[index];
        debug_assert_eq!(slot.status, SlotStatus::Available);
        debug_assert!(self.num_available > 0);
        slot.status = SlotStatus::InFlight;
        self.num_available -= 1;
        self.next_index = (index + 1) % n;
        slot.transfer.clone()
    }

    /// Return a completed slot to the pool.
    ///
    /// Returns `false` without changing anything if `index` does not name a
    /// slot with a transfer outstanding.
    pub(crate) fn mark_available(&mut self, index: usize) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) if slot.status != SlotStatus::Available => {
                slot.status = SlotStatus::Available;
                self.num_available += 1;
                true
            }
            _ => false,
        }
    }

    /// Undo `mark_in_flight` after the transport rejected the submission, so
    /// the same slot is tried next.
    pub(crate) fn rollback(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        debug_assert_ne!(slot.status, SlotStatus::Available);
        slot.status = SlotStatus::Available;
        self.num_available += 1;
        self.next_index = index;
    }

    /// Request cancellation of every in-flight transfer.
    pub(crate) fn cancel_all<T>(&mut self, transport: &T)
    where
        T: Transport<Transfer = H>,
    {
        for index in 0..self.slots.len() {
            if self.slots[index].status == SlotStatus::InFlight {
                self.cancel(index, transport);
            }
        }
    }

    /// Request cancellation of one slot's transfer.
    ///
    /// `NotFound` means the transfer already finished and its completion is
    /// on the way, so it counts as a successful request.
    pub(crate) fn cancel<T>(&mut self, index: usize, transport: &T)
    where
        T: Transport<Transfer = H>,
    {
        let slot = &mut self.slots[index];
        match transport.cancel(&slot.transfer) {
            Ok(()) | Err(TransportError::NotFound) => slot.status = SlotStatus::CancelPending,
            Err(err) => diag!(self.log, Level::Error, "Error canceling transfer: {err}"),
        }
    }
}

impl<H> Drop for TransferPool<H> {
    fn drop(&mut self) {
        if !self.is_drained() {
            diag!(
                self.log,
                Level::Warn,
                "Releasing transfer pool with {} transfers outstanding",
                self.slots.len() - self.num_available
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::transport::{
        sim::{SimTransfer, SimTransport},
        Submission, TransferStatus,
    };

    fn pool(sim: &SimTransport, n: usize) -> TransferPool<SimTransfer> {
        TransferPool::new(sim, n, LogConfig::default()).unwrap()
    }

    fn submit(sim: &SimTransport, pool: &mut TransferPool<SimTransfer>) -> usize {
        let index = pool.find_available().unwrap();
        let transfer = pool.mark_in_flight(index);
        sim.submit(
            &transfer,
            Submission {
                endpoint: 0x01,
                buffer: vec![0; 4],
                length: 4,
                timeout: Duration::ZERO,
                context: index,
                on_complete: Box::new(|_| {}),
            },
        )
        .unwrap();
        index
    }

    #[test]
    fn create_all_available() {
        for n in 1..=8 {
            let sim = SimTransport::new();
            let p = pool(&sim, n);
            assert_eq!(p.capacity(), n);
            assert_eq!(p.num_available(), n);
            assert_eq!(p.next_index(), 0);
            assert!(p.is_drained());
            assert!((0..n).all(|i| p.status(i) == Some(SlotStatus::Available)));
            assert_eq!(sim.live_transfers(), n);
        }
    }

    #[test]
    fn create_failure_releases_everything() {
        let sim = SimTransport::new();
        sim.fail_alloc_at(1);
        let err = TransferPool::new(&sim, 3, LogConfig::off()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::OutOfMemory);
        assert_eq!(sim.live_transfers(), 0);
    }

    #[test]
    fn round_robin() {
        let sim = SimTransport::new();
        let mut p = pool(&sim, 3);
        assert_eq!(submit(&sim, &mut p), 0);
        assert_eq!(submit(&sim, &mut p), 1);
        assert_eq!(p.num_available(), 1);
        assert_eq!(p.next_index(), 2);

        assert!(p.mark_available(0));
        assert_eq!(p.num_available(), 2);
        assert_eq!(submit(&sim, &mut p), 2);
        assert_eq!(p.next_index(), 0);
        assert!(!p.saw_out_of_order());
        assert_eq!(submit(&sim, &mut p), 0);
        assert_eq!(p.num_available(), 0);
        assert_eq!(p.find_available(), None);
    }

    #[test]
    fn out_of_order_is_sticky() {
        let sim = SimTransport::new();
        let mut p = pool(&sim, 3);
        for _ in 0..3 {
            submit(&sim, &mut p);
        }
        // Slot 1 frees up while slot 0 is expected next.
        assert!(p.mark_available(1));
        assert_eq!(p.find_available(), Some(1));
        assert!(p.saw_out_of_order());
        assert_eq!(p.status(0), Some(SlotStatus::InFlight));
    }

    #[test]
    fn mark_available_rejects_unknown_slots() {
        let sim = SimTransport::new();
        let mut p = pool(&sim, 2);
        assert!(!p.mark_available(0));
        assert!(!p.mark_available(5));
        assert_eq!(p.num_available(), 2);
    }

    #[test]
    fn rollback_restores_cursor() {
        let sim = SimTransport::new();
        let mut p = pool(&sim, 2);
        submit(&sim, &mut p);
        let index = p.find_available().unwrap();
        let _transfer = p.mark_in_flight(index);
        assert_eq!(p.next_index(), 0);
        p.rollback(index);
        assert_eq!(p.next_index(), 1);
        assert_eq!(p.num_available(), 1);
        assert_eq!(p.status(1), Some(SlotStatus::Available));
    }

    #[test]
    fn cancel_all_marks_pending() {
        let sim = SimTransport::new();
        let mut p = pool(&sim, 3);
        submit(&sim, &mut p);
        submit(&sim, &mut p);

        p.cancel_all(&sim);
        assert_eq!(p.status(0), Some(SlotStatus::CancelPending));
        assert_eq!(p.status(1), Some(SlotStatus::CancelPending));
        assert_eq!(p.status(2), Some(SlotStatus::Available));

        // Idempotent.
        p.cancel_all(&sim);
        assert_eq!(p.status(0), Some(SlotStatus::CancelPending));
        assert_eq!(p.num_available(), 1);

        sim.handle_events(Duration::ZERO).unwrap();
        assert!(p.mark_available(0));
        assert!(p.mark_available(1));
        assert!(p.is_drained());
    }

    #[test]
    fn cancel_after_completion_is_benign() {
        let sim = SimTransport::new();
        let mut p = pool(&sim, 1);
        submit(&sim, &mut p);
        sim.complete_next(TransferStatus::Completed);
        p.cancel_all(&sim);
        assert_eq!(p.status(0), Some(SlotStatus::CancelPending));
    }

    #[test]
    fn cancel_all_with_nothing_in_flight() {
        let sim = SimTransport::new();
        let mut p = pool(&sim, 2);
        p.cancel_all(&sim);
        assert!(p.is_drained());
    }
}
