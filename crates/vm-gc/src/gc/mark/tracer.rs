//! Reachability walker.
//!
//! Marking a slot records the referenced entry in the bitmap of its kind and
//! then follows its outgoing references. The bitmap insert doubles as the
//! visited check: an entry is only descended into by the call that newly
//! marked it, which bounds the walk on cyclic graphs and lets several tracers
//! share one pair of bitmaps.
//!
//! Pending entries live on an explicit worklist, so long reference chains do
//! not grow the thread stack.

use std::sync::Arc;

use super::bitmap::MarkBitmaps;
use crate::heap::Heap;
use crate::value::{HeapRef, Slot, Trace, Visitor};

/// Marks entries of one heap into one pair of bitmaps.
#[derive(Debug, Clone)]
pub struct Tracer {
    heap: Arc<Heap>,
    bitmaps: Arc<MarkBitmaps>,
}

impl Tracer {
    /// Create a tracer over `heap` writing into `bitmaps`.
    #[must_use]
    pub const fn new(heap: Arc<Heap>, bitmaps: Arc<MarkBitmaps>) -> Self {
        Self { heap, bitmaps }
    }

    /// The bitmaps this tracer fills.
    #[must_use]
    pub const fn bitmaps(&self) -> &Arc<MarkBitmaps> {
        &self.bitmaps
    }

    /// Mark everything reachable from `slot`.
    ///
    /// Returns how many entries this call marked for the first time. A null
    /// slot marks nothing.
    ///
    /// # Panics
    ///
    /// Panics with `heap invariant violated` if a reference names an offset
    /// missing from its container.
    pub fn mark(&self, slot: Slot) -> usize {
        let mut visitor = MarkVisitor::new(&self.bitmaps);
        visitor.visit(slot);
        self.drain(&mut visitor);
        visitor.newly_marked
    }

    /// Mark everything reachable from any of `slots`.
    pub fn mark_all(&self, slots: &[Slot]) -> usize {
        let mut visitor = MarkVisitor::new(&self.bitmaps);
        slots.trace(&mut visitor);
        self.drain(&mut visitor);
        visitor.newly_marked
    }

    fn drain(&self, visitor: &mut MarkVisitor<'_>) {
        while let Some(reference) = visitor.worklist.pop() {
            match reference {
                HeapRef::Object(offset) => {
                    let Some(fields) = self.heap.fields(offset) else {
                        missing(reference)
                    };
                    fields.trace(visitor);
                }
                HeapRef::Array(offset) => {
                    let Some((_, elements)) = self.heap.elements(offset) else {
                        missing(reference)
                    };
                    elements.trace(visitor);
                }
            }
        }
    }
}

#[cold]
#[track_caller]
fn missing(reference: HeapRef) -> ! {
    panic!("heap invariant violated: {reference:?} is not in its container")
}

/// Visitor that marks each reported slot and queues the newly marked ones.
struct MarkVisitor<'a> {
    bitmaps: &'a MarkBitmaps,
    worklist: Vec<HeapRef>,
    newly_marked: usize,
}

impl<'a> MarkVisitor<'a> {
    const fn new(bitmaps: &'a MarkBitmaps) -> Self {
        Self {
            bitmaps,
            worklist: Vec::new(),
            newly_marked: 0,
        }
    }
}

impl Visitor for MarkVisitor<'_> {
    fn visit(&mut self, slot: Slot) {
        let Some(reference) = slot else { return };
        if self.bitmaps.mark(reference) {
            self.newly_marked += 1;
            self.worklist.push(reference);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Tracer;
    use crate::gc::mark::MarkBitmaps;
    use crate::heap::{ArrayData, Heap, ObjectData};
    use crate::value::HeapRef;
    use std::sync::Arc;

    fn tracer(heap: Heap) -> Tracer {
        Tracer::new(Arc::new(heap), Arc::new(MarkBitmaps::new()))
    }

    #[test]
    fn test_null_slot_is_noop() {
        let tracer = tracer(Heap::new());
        assert_eq!(tracer.mark(None), 0);
        assert_eq!(tracer.bitmaps().objects().marked_count(), 0);
    }

    #[test]
    fn test_cycle_terminates() {
        let heap = Heap::new();
        heap.insert_object(1, ObjectData::new(vec![Some(HeapRef::Array(2))]));
        heap.insert_array(2, ArrayData::new(vec![Some(HeapRef::Object(1))]));
        let tracer = tracer(heap);

        assert_eq!(tracer.mark(Some(HeapRef::Object(1))), 2);
        assert_eq!(tracer.mark(Some(HeapRef::Array(2))), 0);
        assert!(tracer.bitmaps().is_marked(HeapRef::Array(2)));
    }

    #[test]
    fn test_array_walk_bounded_by_count() {
        let heap = Heap::new();
        heap.insert_object(1, ObjectData::default());
        heap.insert_object(2, ObjectData::default());
        heap.insert_array(
            3,
            ArrayData::from_parts(1, vec![Some(HeapRef::Object(1)), Some(HeapRef::Object(2))]),
        );
        let tracer = tracer(heap);

        tracer.mark(Some(HeapRef::Array(3)));

        assert!(tracer.bitmaps().is_marked(HeapRef::Object(1)));
        assert!(!tracer.bitmaps().is_marked(HeapRef::Object(2)));
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let heap = Heap::new();
        let depth = 100_000;
        for offset in 1..depth {
            heap.insert_object(offset, ObjectData::new(vec![Some(HeapRef::Object(offset + 1))]));
        }
        heap.insert_object(depth, ObjectData::default());
        let tracer = tracer(heap);

        assert_eq!(tracer.mark(Some(HeapRef::Object(1))), depth);
    }

    #[test]
    #[should_panic(expected = "heap invariant violated")]
    fn test_dangling_reference_panics() {
        let heap = Heap::new();
        heap.insert_object(1, ObjectData::new(vec![Some(HeapRef::Object(42))]));
        tracer(heap).mark(Some(HeapRef::Object(1)));
    }
}
