//! Mark bitmaps: the per-cycle sets of offsets proven reachable.
//!
//! There is one bitmap per container kind because the object and array
//! containers are swept independently. Insertion happens once per reachable
//! entry from many marking threads at once, so each bitmap sits behind its
//! own [`SpinLock`].

use std::collections::HashSet;
use std::sync::Arc;

use crate::gc::sync::{LockOrder, SpinLock};
use crate::value::{HeapRef, Offset};

/// A set of offsets marked live during the current cycle.
///
/// # Example
///
/// ```
/// use vm_gc::gc::mark::MarkBitmap;
///
/// let bitmap = MarkBitmap::new();
/// assert!(bitmap.mark(4));
/// assert!(!bitmap.mark(4));
/// assert!(bitmap.is_marked(4));
/// ```
#[derive(Debug, Default)]
pub struct MarkBitmap {
    marked: SpinLock<HashSet<Offset>>,
}

impl MarkBitmap {
    /// Create an empty bitmap.
    #[must_use]
    pub fn new() -> Self {
        Self {
            marked: SpinLock::new(HashSet::new(), LockOrder::MarkBitmap),
        }
    }

    /// Mark `offset` live.
    ///
    /// Returns `true` if the offset was not marked before this call. The
    /// insert and the test happen under one lock acquisition, so exactly one
    /// of several racing markers sees `true`.
    pub fn mark(&self, offset: Offset) -> bool {
        self.marked.lock().insert(offset)
    }

    /// Check whether `offset` has been marked this cycle.
    #[must_use]
    pub fn is_marked(&self, offset: Offset) -> bool {
        self.marked.lock().contains(&offset)
    }

    /// Number of marked offsets.
    #[must_use]
    pub fn marked_count(&self) -> usize {
        self.marked.lock().len()
    }

    /// Forget every mark.
    pub fn clear(&self) {
        self.marked.lock().clear();
    }

    /// Move the marks out, leaving the bitmap empty.
    fn take(&self) -> HashSet<Offset> {
        std::mem::take(&mut *self.marked.lock())
    }
}

/// The object and array bitmaps of one collector.
#[derive(Debug, Default)]
pub struct MarkBitmaps {
    objects: MarkBitmap,
    arrays: MarkBitmap,
}

impl MarkBitmaps {
    /// Create an empty pair of bitmaps.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the entry named by `reference` in the bitmap matching its kind.
    /// Returns `true` if it was newly marked.
    pub fn mark(&self, reference: HeapRef) -> bool {
        match reference {
            HeapRef::Object(offset) => self.objects.mark(offset),
            HeapRef::Array(offset) => self.arrays.mark(offset),
        }
    }

    /// Check whether the entry named by `reference` is marked.
    #[must_use]
    pub fn is_marked(&self, reference: HeapRef) -> bool {
        match reference {
            HeapRef::Object(offset) => self.objects.is_marked(offset),
            HeapRef::Array(offset) => self.arrays.is_marked(offset),
        }
    }

    /// The object bitmap.
    #[must_use]
    pub const fn objects(&self) -> &MarkBitmap {
        &self.objects
    }

    /// The array bitmap.
    #[must_use]
    pub const fn arrays(&self) -> &MarkBitmap {
        &self.arrays
    }

    /// Clear both bitmaps.
    pub fn clear(&self) {
        self.objects.clear();
        self.arrays.clear();
    }

    /// End the mark phase: move both bitmaps into an immutable [`LiveSet`]
    /// and leave them empty for the next cycle.
    ///
    /// Must only be called once every marking task has been joined; marks
    /// inserted afterwards land in the next cycle's bitmaps.
    #[must_use]
    pub fn freeze(&self) -> Arc<LiveSet> {
        Arc::new(LiveSet {
            objects: self.objects.take(),
            arrays: self.arrays.take(),
        })
    }
}

/// The frozen result of a mark phase, shared read-only by the sweep tasks.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LiveSet {
    objects: HashSet<Offset>,
    arrays: HashSet<Offset>,
}

impl LiveSet {
    /// Whether the object at `offset` survived marking.
    #[must_use]
    pub fn is_object_live(&self, offset: Offset) -> bool {
        self.objects.contains(&offset)
    }

    /// Whether the array at `offset` survived marking.
    #[must_use]
    pub fn is_array_live(&self, offset: Offset) -> bool {
        self.arrays.contains(&offset)
    }

    /// Live object offsets.
    #[must_use]
    pub const fn objects(&self) -> &HashSet<Offset> {
        &self.objects
    }

    /// Live array offsets.
    #[must_use]
    pub const fn arrays(&self) -> &HashSet<Offset> {
        &self.arrays
    }
}
