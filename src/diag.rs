use log::{Level, LevelFilter};

/// Verbosity of the diagnostics a stream emits.
///
/// Each stream owns its own `LogConfig`, so two streams in one process can
/// log at different levels. Messages that pass this filter are forwarded to
/// the [`log`] facade, where the installed logger applies its own filtering.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LogConfig {
    level: LevelFilter,
}

impl LogConfig {
    /// Emit diagnostics at `level` and more severe.
    pub const fn new(level: LevelFilter) -> Self {
        Self { level }
    }

    /// Suppress all stream diagnostics.
    pub const fn off() -> Self {
        Self::new(LevelFilter::Off)
    }

    /// Most verbose level that is emitted.
    pub fn level(&self) -> LevelFilter {
        self.level
    }

    /// Change the verbosity.
    ///
    /// A stream copies its `LogConfig` at creation, so this only affects
    /// streams created afterwards.
    pub fn set_level(&mut self, level: LevelFilter) {
        self.level = level;
    }

    #[inline]
    pub(crate) fn enabled(&self, level: Level) -> bool {
        level <= self.level
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new(LevelFilter::Info)
    }
}

/// Log through the facade if the stream's [`LogConfig`] allows `$lvl`.
macro_rules! diag {
    ($cfg:expr, $lvl:expr, $($arg:tt)+) => {{
        let lvl = $lvl;
        if $cfg.enabled(lvl) {
            log::log!(target: "sdr_stream", lvl, $($arg)+);
        }
    }};
}
pub(crate) use diag;
