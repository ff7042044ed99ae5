//! Sweep phase.
//!
//! The object, array and monitor containers are swept by three independent
//! pool tasks. Each task owns exactly one container and reads the frozen
//! [`LiveSet`], so no two tasks touch the same lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::mark::LiveSet;
use super::pool::WorkerPool;
use super::sync::{LockGuard, LockOrder};
use crate::error::GcError;
use crate::heap::{ArrayData, Heap};
use crate::value::Offset;

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Object entries erased.
    pub objects: usize,
    /// Array entries erased.
    pub arrays: usize,
    /// Elements released with the erased arrays.
    pub elements: usize,
    /// Monitor entries erased.
    pub monitors: usize,
}

/// Erase every entry of `container` whose offset fails `is_live` and hand
/// the erased payloads back.
fn erase_dead<V>(
    container: &RwLock<HashMap<Offset, V>>,
    is_live: impl Fn(Offset) -> bool,
) -> Vec<V> {
    let _order = LockGuard::new(LockOrder::HeapContainer);
    let mut entries = container.write();
    let dead: Vec<Offset> = entries
        .keys()
        .copied()
        .filter(|&offset| !is_live(offset))
        .collect();
    dead.iter().filter_map(|offset| entries.remove(offset)).collect()
}

/// Erase unmarked objects. Returns how many were erased.
pub fn sweep_objects(heap: &Heap, live: &LiveSet) -> usize {
    erase_dead(heap.object_container(), |offset| live.is_object_live(offset)).len()
}

/// Erase unmarked arrays, releasing their elements and backing storage.
/// Returns `(arrays erased, elements released)`.
pub fn sweep_arrays(heap: &Heap, live: &LiveSet) -> (usize, usize) {
    let dead = erase_dead(heap.array_container(), |offset| live.is_array_live(offset));
    let arrays = dead.len();
    let elements = dead.into_iter().map(ArrayData::release).sum();
    (arrays, elements)
}

/// Erase monitors whose offset is marked in neither bitmap.
/// Returns how many were erased.
pub fn sweep_monitors(heap: &Heap, live: &LiveSet) -> usize {
    erase_dead(heap.monitor_container(), |offset| {
        live.is_object_live(offset) || live.is_array_live(offset)
    })
    .len()
}

/// Run the three sweep passes concurrently on `pool` and wait for all of
/// them.
///
/// # Errors
///
/// [`GcError::TaskPanicked`] or [`GcError::PoolShutDown`] from the first pass
/// that failed. The other passes have still finished.
pub fn sweep(
    pool: &WorkerPool,
    heap: &Arc<Heap>,
    live: &Arc<LiveSet>,
) -> Result<SweepStats, GcError> {
    let objects = {
        let (heap, live) = (Arc::clone(heap), Arc::clone(live));
        pool.submit(move || sweep_objects(&heap, &live))
    };
    let arrays = {
        let (heap, live) = (Arc::clone(heap), Arc::clone(live));
        pool.submit(move || sweep_arrays(&heap, &live))
    };
    let monitors = {
        let (heap, live) = (Arc::clone(heap), Arc::clone(live));
        pool.submit(move || sweep_monitors(&heap, &live))
    };

    let objects = objects.try_join();
    let arrays = arrays.try_join();
    let monitors = monitors.try_join();

    let objects = objects?;
    let (arrays, elements) = arrays?;
    let monitors = monitors?;
    Ok(SweepStats {
        objects,
        arrays,
        elements,
        monitors,
    })
}

#[cfg(test)]
mod tests {
    use super::{sweep, sweep_arrays, sweep_monitors, sweep_objects};
    use crate::gc::mark::MarkBitmaps;
    use crate::gc::pool::WorkerPool;
    use crate::heap::{ArrayData, Heap, Monitor, ObjectData};
    use crate::value::HeapRef;
    use std::sync::Arc;

    #[test]
    fn test_sweep_objects_keeps_marked() {
        let heap = Heap::new();
        heap.insert_object(1, ObjectData::default());
        heap.insert_object(2, ObjectData::default());
        let bitmaps = MarkBitmaps::new();
        bitmaps.mark(HeapRef::Object(1));

        assert_eq!(sweep_objects(&heap, &bitmaps.freeze()), 1);
        assert!(heap.contains(HeapRef::Object(1)));
        assert!(!heap.contains(HeapRef::Object(2)));
    }

    #[test]
    fn test_sweep_arrays_releases_counted_elements() {
        let heap = Heap::new();
        heap.insert_array(1, ArrayData::from_parts(2, vec![None; 5]));
        heap.insert_array(2, ArrayData::with_length(3));
        heap.insert_array(3, ArrayData::with_length(4));
        let bitmaps = MarkBitmaps::new();
        bitmaps.mark(HeapRef::Array(3));

        assert_eq!(sweep_arrays(&heap, &bitmaps.freeze()), (2, 5));
        assert_eq!(heap.stats().arrays, 1);
    }

    #[test]
    fn test_monitor_survives_in_either_bitmap() {
        let heap = Heap::new();
        for offset in 1..=3 {
            heap.insert_monitor(offset, Monitor::new());
        }
        let bitmaps = MarkBitmaps::new();
        bitmaps.mark(HeapRef::Object(1));
        bitmaps.mark(HeapRef::Array(2));

        assert_eq!(sweep_monitors(&heap, &bitmaps.freeze()), 1);
        assert!(heap.contains_monitor(1));
        assert!(heap.contains_monitor(2));
        assert!(!heap.contains_monitor(3));
    }

    #[test]
    fn test_parallel_sweep_totals() {
        let heap = Arc::new(Heap::new());
        heap.insert_object(1, ObjectData::default());
        heap.insert_array(2, ArrayData::with_length(2));
        heap.insert_monitor(2, Monitor::new());
        let pool = WorkerPool::new(3, "sweep").unwrap();
        pool.signal_work();

        let stats = sweep(&pool, &heap, &MarkBitmaps::new().freeze()).unwrap();

        assert_eq!(stats.objects, 1);
        assert_eq!(stats.arrays, 1);
        assert_eq!(stats.elements, 2);
        assert_eq!(stats.monitors, 1);
        assert_eq!(heap.stats().values(), 0);
    }
}
