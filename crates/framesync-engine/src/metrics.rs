//! Per-frame performance metrics for the render loop.
//!
//! [`FrameMetrics`] captures timing and mailbox activity for a single
//! frame; [`RuntimeCounters`] accumulates across the runtime's lifetime.

/// Timing and mailbox metrics collected during a single frame.
///
/// All durations are in microseconds. The runtime populates these after
/// each `run_frame()` call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameMetrics {
    /// Time spent draining the mailbox, including the post-drain publish.
    pub drain_us: u64,
    /// Time spent in the per-frame user callback.
    pub update_us: u64,
    /// Wall-clock time for the entire frame.
    pub total_us: u64,
    /// Merge operations applied during the drain.
    pub merged: usize,
    /// Render-thread tasks run during the drain.
    pub tasks: usize,
    /// Merge operations that failed and were skipped, plus panicked tasks.
    pub failed_merges: usize,
}

/// Cumulative counters since the runtime was created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RuntimeCounters {
    /// Frames executed.
    pub frames: u64,
    /// Merge operations applied successfully.
    pub merges_applied: u64,
    /// Failed merges and panicked tasks.
    pub merge_failures: u64,
    /// Render-thread tasks run (successful or not).
    pub tasks_run: u64,
}

impl RuntimeCounters {
    pub(crate) fn record(&mut self, frame: &FrameMetrics) {
        self.frames += 1;
        self.merges_applied += frame.merged as u64;
        self.merge_failures += frame.failed_merges as u64;
        self.tasks_run += frame.tasks as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_metrics_are_zero() {
        let m = FrameMetrics::default();
        assert_eq!(m.total_us, 0);
        assert_eq!(m.drain_us, 0);
        assert_eq!(m.merged, 0);
        assert_eq!(RuntimeCounters::default().frames, 0);
    }

    #[test]
    fn counters_accumulate() {
        let mut c = RuntimeCounters::default();
        let frame = FrameMetrics {
            merged: 3,
            tasks: 1,
            failed_merges: 2,
            ..FrameMetrics::default()
        };
        c.record(&frame);
        c.record(&frame);
        assert_eq!(c.frames, 2);
        assert_eq!(c.merges_applied, 6);
        assert_eq!(c.merge_failures, 4);
        assert_eq!(c.tasks_run, 2);
    }
}
