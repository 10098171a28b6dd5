/// Receives progress of a long-running listing and answers cancellation checks.
///
/// Data sources call `is_canceled` between units of work and stop early when
/// it returns `true`.
pub trait ProgressReporter: Send + Sync {
    fn begin_task(&self, label: &str, total_units: u64);

    fn worked(&self, units: u64);

    fn is_canceled(&self) -> bool;

    fn done(&self);
}

/// Reporter that discards progress and never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn begin_task(&self, _label: &str, _total_units: u64) {}

    fn worked(&self, _units: u64) {}

    fn is_canceled(&self) -> bool {
        false
    }

    fn done(&self) {}
}
