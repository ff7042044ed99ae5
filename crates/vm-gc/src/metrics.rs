//! GC metrics and statistics.

use std::time::{Duration, Instant};

/// Statistics from one collection cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcMetrics {
    /// Wall time of the whole cycle.
    pub duration: Duration,
    /// Duration of root scanning and marking.
    pub mark_duration: Duration,
    /// Duration of the three sweep passes.
    pub sweep_duration: Duration,
    /// Objects found reachable.
    pub objects_marked: usize,
    /// Arrays found reachable.
    pub arrays_marked: usize,
    /// Object entries erased.
    pub objects_reclaimed: usize,
    /// Array entries erased.
    pub arrays_reclaimed: usize,
    /// Elements released together with the erased arrays.
    pub elements_released: usize,
    /// Monitor entries erased.
    pub monitors_reclaimed: usize,
    /// Frames whose roots were scanned.
    pub frames_scanned: usize,
    /// Collections run by this collector, this one included.
    pub total_collections: usize,
}

impl GcMetrics {
    /// Create a `GcMetrics` with every field zeroed.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            duration: Duration::ZERO,
            mark_duration: Duration::ZERO,
            sweep_duration: Duration::ZERO,
            objects_marked: 0,
            arrays_marked: 0,
            objects_reclaimed: 0,
            arrays_reclaimed: 0,
            elements_released: 0,
            monitors_reclaimed: 0,
            frames_scanned: 0,
            total_collections: 0,
        }
    }

    /// Heap values (objects and arrays) erased.
    #[must_use]
    pub const fn values_reclaimed(&self) -> usize {
        self.objects_reclaimed + self.arrays_reclaimed
    }

    /// Heap values (objects and arrays) that survived.
    #[must_use]
    pub const fn values_surviving(&self) -> usize {
        self.objects_marked + self.arrays_marked
    }
}

/// Captures the durations of the mark and sweep phases.
///
/// # Example
///
/// ```
/// use vm_gc::metrics::PhaseTimer;
///
/// let mut timer = PhaseTimer::new();
/// timer.start();
/// // ... root scan and mark ...
/// timer.end_mark();
///
/// timer.start();
/// // ... sweep ...
/// timer.end_sweep();
/// assert!(timer.total() >= timer.mark);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseTimer {
    /// Mark phase time.
    pub mark: Duration,
    /// Sweep phase time.
    pub sweep: Duration,
    current_start: Option<Instant>,
}

impl PhaseTimer {
    /// Create a timer with both durations zeroed.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            mark: Duration::ZERO,
            sweep: Duration::ZERO,
            current_start: None,
        }
    }

    /// Start timing a phase.
    pub fn start(&mut self) {
        self.current_start = Some(Instant::now());
    }

    /// End the mark phase and record its duration.
    pub fn end_mark(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.mark = start.elapsed();
        }
    }

    /// End the sweep phase and record its duration.
    pub fn end_sweep(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.sweep = start.elapsed();
        }
    }

    /// Sum of the recorded phases.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.mark + self.sweep
    }
}
