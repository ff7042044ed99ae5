//! GC tracing support.
//!
//! When the `tracing` feature is enabled, this module provides structured
//! spans and events for collection cycles. Without the feature only the
//! [`GcId`] type remains so callers can keep passing it around.

#[cfg(feature = "tracing")]
pub mod internal {
    use std::sync::atomic::{AtomicU64, Ordering};
    use tracing::{span, Level};

    /// Phases of a mark-and-sweep cycle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum GcPhase {
        /// Root scanning and transitive marking.
        Mark,
        /// Reclaiming unmarked entries.
        Sweep,
    }

    /// Identifier correlating every event of one collection cycle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GcId(pub u64);

    static NEXT_GC_ID: AtomicU64 = AtomicU64::new(1);

    /// Generate the next unique cycle ID.
    pub fn next_gc_id() -> GcId {
        GcId(NEXT_GC_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Span covering a whole collection cycle.
    pub fn trace_gc_collection(policy: &str, gc_id: GcId) -> span::EnteredSpan {
        span!(Level::DEBUG, "gc_collect", policy = policy, gc_id = gc_id.0).entered()
    }

    /// Span covering one phase of a cycle.
    pub fn trace_phase(phase: GcPhase) -> span::EnteredSpan {
        span!(Level::DEBUG, "gc_phase", phase = ?phase).entered()
    }

    /// Log the start of a phase along with the live value count.
    pub fn log_phase_start(phase: GcPhase, values_before: usize) {
        tracing::debug!(phase = ?phase, values_before, "phase_start");
    }

    /// Log the end of the mark phase.
    pub fn log_mark_end(objects_marked: usize, arrays_marked: usize, frames: usize) {
        tracing::debug!(
            phase = ?GcPhase::Mark,
            objects_marked,
            arrays_marked,
            frames,
            "phase_end"
        );
    }

    /// Log the end of the sweep phase.
    pub fn log_sweep_end(objects: usize, arrays: usize, monitors: usize) {
        tracing::debug!(
            phase = ?GcPhase::Sweep,
            objects_reclaimed = objects,
            arrays_reclaimed = arrays,
            monitors_reclaimed = monitors,
            "phase_end"
        );
    }
}

#[cfg(not(feature = "tracing"))]
pub mod internal {
    /// Stub type when tracing is disabled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GcId(pub u64);

    /// Stub function when tracing is disabled.
    pub const fn next_gc_id() -> GcId {
        GcId(0)
    }
}

pub use internal::GcId;
