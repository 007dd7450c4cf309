/// Lifecycle of a stream.
///
/// `Running` → `ShuttingDown` → `Done`, with a direct `Running` → `Done`
/// when shutdown is requested before anything was submitted. `Done` is
/// terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StreamState {
    /// Buffers flow normally.
    Running,

    /// No new buffers are submitted; outstanding transfers are being cancelled.
    ShuttingDown,

    /// Every transfer has come back. Nothing further happens.
    Done,
}

impl StreamState {
    /// Stop accepting buffers and start draining. Returns `true` if this
    /// call left `Running`.
    pub(crate) fn begin_shutdown(&mut self) -> bool {
        if *self == StreamState::Running {
            *self = StreamState::ShuttingDown;
            true
        } else {
            false
        }
    }

    /// Shutdown requested by the user. With nothing outstanding there is
    /// nothing to drain, so the stream finishes immediately.
    pub(crate) fn request_shutdown(&mut self, drained: bool) {
        match (*self, drained) {
            (StreamState::Done, _) => {}
            (_, true) => *self = StreamState::Done,
            (_, false) => *self = StreamState::ShuttingDown,
        }
    }

    /// Finish draining. Returns `true` if this call reached `Done`.
    pub(crate) fn finish_drain(&mut self, drained: bool) -> bool {
        if *self == StreamState::ShuttingDown && drained {
            *self = StreamState::Done;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::StreamState::{self, *};

    #[test]
    fn begin_shutdown_only_from_running() {
        let mut s = Running;
        assert!(s.begin_shutdown());
        assert_eq!(s, ShuttingDown);
        assert!(!s.begin_shutdown());
        assert_eq!(s, ShuttingDown);

        let mut s = Done;
        assert!(!s.begin_shutdown());
        assert_eq!(s, Done);
    }

    #[test]
    fn request_shutdown() {
        let mut s = Running;
        s.request_shutdown(true);
        assert_eq!(s, Done);

        let mut s = Running;
        s.request_shutdown(false);
        assert_eq!(s, ShuttingDown);
        s.request_shutdown(true);
        assert_eq!(s, Done);
    }

    #[test]
    fn done_is_terminal() {
        let mut s: StreamState = Done;
        s.request_shutdown(false);
        assert!(!s.finish_drain(true));
        assert!(!s.begin_shutdown());
        assert_eq!(s, Done);
    }

    #[test]
    fn finish_drain_needs_drained_pool() {
        let mut s = ShuttingDown;
        assert!(!s.finish_drain(false));
        assert_eq!(s, ShuttingDown);
        assert!(s.finish_drain(true));
        assert_eq!(s, Done);

        let mut s = Running;
        assert!(!s.finish_drain(true));
        assert_eq!(s, Running);
    }
}
