//! The cycle driver.
//!
//! A [`Collector`] owns the worker pool, the mark bitmaps and the safepoint
//! barrier of one VM. The allocator raises memory pressure with
//! [`Collector::request_collection`] or [`Collector::notify_allocation`];
//! the next [`Collector::collect`] then runs a full stop-the-world
//! mark-and-sweep cycle on the calling thread, fanning the work out to the
//! pool. Without pressure `collect` is a no-op.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use super::mark::{MarkBitmaps, Tracer};
use super::pool::WorkerPool;
use super::roots::RootScanner;
use super::safepoint::Safepoint;
use super::sweep;
use super::sync::{LockGuard, LockOrder};
use crate::config::{GcConfig, GcPolicy};
use crate::error::GcError;
use crate::heap::HeapStats;
use crate::metrics::{GcMetrics, PhaseTimer};
use crate::runtime::{CallStack, RuntimeContext};
use crate::value::{HeapRef, Offset, Slot};

#[cfg(feature = "tracing")]
use crate::tracing::internal::{
    log_mark_end, log_phase_start, log_sweep_end, next_gc_id, trace_gc_collection, trace_phase,
    GcPhase,
};

/// Type for collection condition functions.
pub type CollectCondition = fn(&HeapStats) -> bool;

/// Live heap values at which [`default_collect_condition`] asks for a cycle.
pub const DEFAULT_COLLECT_THRESHOLD: usize = 1 << 16;

/// The default collection condition.
///
/// Returns `true` once the heap holds [`DEFAULT_COLLECT_THRESHOLD`] objects
/// and arrays.
#[must_use]
pub const fn default_collect_condition(stats: &HeapStats) -> bool {
    stats.values() >= DEFAULT_COLLECT_THRESHOLD
}

/// State guarded by the cycle lock.
#[derive(Debug, Default)]
struct CycleState {
    memory_pressure: bool,
    last_metrics: Option<GcMetrics>,
    total_collections: usize,
}

/// Parallel stop-the-world mark-and-sweep collector.
pub struct Collector {
    context: RuntimeContext,
    config: GcConfig,
    pool: WorkerPool,
    bitmaps: Arc<MarkBitmaps>,
    tracer: Tracer,
    roots: RootScanner,
    safepoint: Safepoint,
    cycle: Mutex<CycleState>,
    condition: Mutex<CollectCondition>,
}

impl Collector {
    /// Build a collector for `context` and spawn its workers.
    ///
    /// # Errors
    ///
    /// Returns [`GcError::WorkerSpawn`] if a worker thread cannot be spawned.
    pub fn new(context: RuntimeContext, config: GcConfig) -> Result<Self, GcError> {
        let pool = WorkerPool::new(config.workers, &config.worker_name)?;
        let bitmaps = Arc::new(MarkBitmaps::new());
        let tracer = Tracer::new(Arc::clone(&context.heap), Arc::clone(&bitmaps));
        let roots = RootScanner::new(tracer.clone(), Arc::clone(&context.method_area));
        let safepoint = Safepoint::new(Arc::clone(&context.executor))
            .with_hang_warning(config.safepoint_timeout);

        Ok(Self {
            context,
            config,
            pool,
            bitmaps,
            tracer,
            roots,
            safepoint,
            cycle: Mutex::new(CycleState::default()),
            condition: Mutex::new(default_collect_condition),
        })
    }

    /// The runtime this collector works on.
    #[must_use]
    pub const fn context(&self) -> &RuntimeContext {
        &self.context
    }

    /// The configuration the collector was built with.
    #[must_use]
    pub const fn config(&self) -> &GcConfig {
        &self.config
    }

    /// The worker pool.
    #[must_use]
    pub const fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// The safepoint barrier mutators pause at.
    #[must_use]
    pub const fn safepoint(&self) -> &Safepoint {
        &self.safepoint
    }

    /// Pause the calling mutator until every mutator has arrived.
    ///
    /// Blocks forever if some mutator never arrives.
    pub fn arrive_and_wait(&self) {
        self.safepoint.arrive_and_wait();
    }

    /// Raise memory pressure so the next [`collect`](Self::collect) runs.
    pub fn request_collection(&self) {
        let _order = LockGuard::new(LockOrder::Cycle);
        self.cycle.lock().memory_pressure = true;
    }

    /// Whether memory pressure is raised.
    #[must_use]
    pub fn is_collection_requested(&self) -> bool {
        let _order = LockGuard::new(LockOrder::Cycle);
        self.cycle.lock().memory_pressure
    }

    /// Evaluate the collection condition against the heap and raise memory
    /// pressure if it holds. Returns the condition's verdict.
    pub fn notify_allocation(&self) -> bool {
        let condition = *self.condition.lock();
        let stats = self.context.heap.stats();
        let triggered = condition(&stats);
        if triggered {
            self.request_collection();
        }
        triggered
    }

    /// Replace the collection condition.
    pub fn set_collect_condition(&self, condition: CollectCondition) {
        *self.condition.lock() = condition;
    }

    /// Run a cycle over the frames of `stack` if memory pressure is raised.
    ///
    /// Returns `None` without doing anything when there is no pressure.
    ///
    /// # Panics
    ///
    /// Panics if a marking or sweeping task hit a broken heap invariant, such
    /// as a reference to an entry missing from its container. The collector
    /// is back in its idle state when the panic leaves this call.
    pub fn collect(&self, stack: &CallStack, policy: GcPolicy) -> Option<GcMetrics> {
        self.collect_stacks(std::slice::from_ref(stack), policy)
    }

    /// [`collect`](Self::collect) using the configured policy.
    pub fn collect_default(&self, stack: &CallStack) -> Option<GcMetrics> {
        self.collect(stack, self.config.policy)
    }

    /// Run a cycle over the frames of every stack in `stacks`, one per
    /// mutator thread, if memory pressure is raised.
    ///
    /// # Panics
    ///
    /// See [`collect`](Self::collect).
    pub fn collect_stacks(&self, stacks: &[CallStack], policy: GcPolicy) -> Option<GcMetrics> {
        let _order = LockGuard::new(LockOrder::Cycle);
        let mut cycle = self.cycle.lock();
        if !cycle.memory_pressure {
            return None;
        }
        if self.pool.is_shut_down() {
            #[cfg(feature = "tracing")]
            tracing::warn!("collection requested after shutdown");
            return None;
        }

        let mut metrics = match policy {
            GcPolicy::MarkAndSweep => self.mark_and_sweep(stacks, policy),
        };

        cycle.memory_pressure = false;
        cycle.total_collections += 1;
        metrics.total_collections = cycle.total_collections;
        cycle.last_metrics = Some(metrics);
        Some(metrics)
    }

    fn mark_and_sweep(&self, stacks: &[CallStack], policy: GcPolicy) -> GcMetrics {
        #[cfg(feature = "tracing")]
        let gc_id = next_gc_id();
        #[cfg(feature = "tracing")]
        let _gc_span = trace_gc_collection(policy.name(), gc_id);
        #[cfg(not(feature = "tracing"))]
        let _ = policy;

        let start = Instant::now();
        let mut timer = PhaseTimer::new();
        let _idle = IdleOnExit(self);

        self.bitmaps.clear();
        self.pool.signal_work();

        timer.start();
        let (scan, objects_marked, arrays_marked, live) = {
            #[cfg(feature = "tracing")]
            let _span = trace_phase(GcPhase::Mark);
            #[cfg(feature = "tracing")]
            log_phase_start(GcPhase::Mark, self.context.heap.stats().values());

            let scan = self
                .roots
                .scan(&self.pool, stacks)
                .unwrap_or_else(|e| reraise(&e));
            let objects_marked = self.bitmaps.objects().marked_count();
            let arrays_marked = self.bitmaps.arrays().marked_count();
            let live = self.bitmaps.freeze();

            #[cfg(feature = "tracing")]
            log_mark_end(objects_marked, arrays_marked, scan.frames);
            (scan, objects_marked, arrays_marked, live)
        };
        timer.end_mark();

        timer.start();
        let swept = {
            #[cfg(feature = "tracing")]
            let _span = trace_phase(GcPhase::Sweep);
            #[cfg(feature = "tracing")]
            log_phase_start(GcPhase::Sweep, objects_marked + arrays_marked);

            let swept = sweep::sweep(&self.pool, &self.context.heap, &live)
                .unwrap_or_else(|e| reraise(&e));

            #[cfg(feature = "tracing")]
            log_sweep_end(swept.objects, swept.arrays, swept.monitors);
            swept
        };
        timer.end_sweep();

        GcMetrics {
            duration: start.elapsed(),
            mark_duration: timer.mark,
            sweep_duration: timer.sweep,
            objects_marked,
            arrays_marked,
            objects_reclaimed: swept.objects,
            arrays_reclaimed: swept.arrays,
            elements_released: swept.elements,
            monitors_reclaimed: swept.monitors,
            frames_scanned: scan.frames,
            total_collections: 0,
        }
    }

    /// Mark everything reachable from `slot` into the current bitmaps.
    /// Returns how many entries were newly marked.
    ///
    /// Marks made outside a cycle are discarded when the next cycle starts.
    ///
    /// # Panics
    ///
    /// Panics if a reference names an entry missing from its container.
    pub fn mark(&self, slot: Slot) -> usize {
        self.tracer.mark(slot)
    }

    /// Whether the object at `offset` is marked.
    #[must_use]
    pub fn is_marked_object(&self, offset: Offset) -> bool {
        self.bitmaps.is_marked(HeapRef::Object(offset))
    }

    /// Whether the array at `offset` is marked.
    #[must_use]
    pub fn is_marked_array(&self, offset: Offset) -> bool {
        self.bitmaps.is_marked(HeapRef::Array(offset))
    }

    /// Metrics of the most recent cycle.
    #[must_use]
    pub fn last_metrics(&self) -> Option<GcMetrics> {
        let _order = LockGuard::new(LockOrder::Cycle);
        self.cycle.lock().last_metrics
    }

    /// Cycles run so far.
    #[must_use]
    pub fn total_collections(&self) -> usize {
        let _order = LockGuard::new(LockOrder::Cycle);
        self.cycle.lock().total_collections
    }

    /// Stop the worker pool. Later cycles are skipped. Also happens on drop.
    ///
    /// Blocks until a cycle running on another thread has finished.
    pub fn shutdown(&self) {
        let _order = LockGuard::new(LockOrder::Cycle);
        let _cycle = self.cycle.lock();
        self.pool.finalize();
    }
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .field("safepoint", &self.safepoint)
            .finish_non_exhaustive()
    }
}

/// Puts the collector back in its idle state when a cycle ends, including
/// when a task panic is re-raised out of it.
struct IdleOnExit<'a>(&'a Collector);

impl Drop for IdleOnExit<'_> {
    fn drop(&mut self) {
        self.0.bitmaps.clear();
        self.0.pool.signal_wait();
    }
}

#[cold]
fn reraise(error: &GcError) -> ! {
    panic!("{error}")
}

#[cfg(test)]
mod tests {
    use super::{default_collect_condition, Collector, DEFAULT_COLLECT_THRESHOLD};
    use crate::config::{GcConfig, GcPolicy};
    use crate::heap::{Heap, HeapStats, ObjectData};
    use crate::runtime::{CallStack, RuntimeContext};
    use crate::value::HeapRef;
    use std::sync::Arc;

    fn collector(heap: &Arc<Heap>) -> Collector {
        Collector::new(RuntimeContext::with_heap(Arc::clone(heap), 1), GcConfig::new(2)).unwrap()
    }

    #[test]
    fn test_default_condition_threshold() {
        let below = HeapStats {
            objects: DEFAULT_COLLECT_THRESHOLD - 1,
            ..HeapStats::default()
        };
        let at = HeapStats {
            arrays: DEFAULT_COLLECT_THRESHOLD,
            ..HeapStats::default()
        };
        assert!(!default_collect_condition(&below));
        assert!(default_collect_condition(&at));
    }

    #[test]
    fn test_no_pressure_is_noop() {
        let heap = Arc::new(Heap::new());
        heap.insert_object(1, ObjectData::default());
        let collector = collector(&heap);

        assert!(collector.collect(&CallStack::new(), GcPolicy::MarkAndSweep).is_none());
        assert_eq!(heap.stats().objects, 1);
        assert_eq!(collector.total_collections(), 0);
    }

    #[test]
    fn test_notify_allocation_uses_condition() {
        let heap = Arc::new(Heap::new());
        let collector = collector(&heap);
        collector.set_collect_condition(|stats| stats.values() > 0);

        assert!(!collector.notify_allocation());
        heap.insert_object(1, ObjectData::default());
        assert!(collector.notify_allocation());
        assert!(collector.is_collection_requested());
    }

    #[test]
    fn test_cycle_resets_state() {
        let heap = Arc::new(Heap::new());
        heap.insert_object(1, ObjectData::default());
        let collector = collector(&heap);
        collector.request_collection();

        let metrics = collector.collect_default(&CallStack::new()).unwrap();

        assert_eq!(metrics.objects_reclaimed, 1);
        assert_eq!(metrics.total_collections, 1);
        assert!(!collector.is_collection_requested());
        assert!(!collector.pool().is_work_enabled());
        assert!(!collector.is_marked_object(1));
        assert_eq!(collector.last_metrics(), Some(metrics));
    }

    #[test]
    fn test_diagnostic_mark() {
        let heap = Arc::new(Heap::new());
        heap.insert_object(1, ObjectData::new(vec![Some(HeapRef::Object(2))]));
        heap.insert_object(2, ObjectData::default());
        let collector = collector(&heap);

        assert_eq!(collector.mark(Some(HeapRef::Object(1))), 2);
        assert!(collector.is_marked_object(2));
        assert!(!collector.is_marked_array(2));
    }

    #[test]
    fn test_collect_after_shutdown_is_skipped() {
        let heap = Arc::new(Heap::new());
        heap.insert_object(1, ObjectData::default());
        let collector = collector(&heap);
        collector.shutdown();
        collector.request_collection();

        assert!(collector.collect(&CallStack::new(), GcPolicy::MarkAndSweep).is_none());
        assert_eq!(heap.stats().objects, 1);
    }
}
