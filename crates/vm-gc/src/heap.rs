//! Heap containers.
//!
//! The heap owns three independent offset-keyed containers: objects, arrays
//! and monitors. The collector only reads entries and erases dead ones; the
//! insertion and allocation entry points here exist for the interpreter and
//! for tests that need to build a heap graph.
//!
//! Objects and arrays draw their offsets from one counter, so an offset names
//! at most one value. A monitor is keyed by the offset of the value it guards.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::ThreadId;

use parking_lot::RwLock;

use crate::gc::sync::{LockGuard, LockOrder};
use crate::value::{HeapRef, Offset, Slot, Trace, Visitor};

/// First offset handed out by [`Heap::allocate_object`] and friends.
pub const FIRST_OFFSET: Offset = 1;

/// Payload of an object entry: its field slots in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectData {
    fields: Vec<Slot>,
}

impl ObjectData {
    /// Create an object with the given fields.
    #[must_use]
    pub const fn new(fields: Vec<Slot>) -> Self {
        Self { fields }
    }

    /// Create an object with `count` null fields.
    #[must_use]
    pub fn with_field_count(count: usize) -> Self {
        Self {
            fields: vec![None; count],
        }
    }

    /// The field slots.
    #[must_use]
    pub fn fields(&self) -> &[Slot] {
        &self.fields
    }

    /// Overwrite field `index`. Returns `false` if out of range.
    pub fn set_field(&mut self, index: usize, value: Slot) -> bool {
        self.fields.get_mut(index).map(|slot| *slot = value).is_some()
    }
}

impl Trace for ObjectData {
    fn trace(&self, visitor: &mut impl Visitor) {
        self.fields.trace(visitor);
    }
}

/// Payload of an array entry: a stored element count and the backing slots.
///
/// Only the first `length` slots are elements; the backing collection may be
/// longer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayData {
    length: usize,
    elements: Box<[Slot]>,
}

impl ArrayData {
    /// Create an array whose length is the number of `elements`.
    #[must_use]
    pub fn new(elements: Vec<Slot>) -> Self {
        Self {
            length: elements.len(),
            elements: elements.into_boxed_slice(),
        }
    }

    /// Create an array of `length` null elements.
    #[must_use]
    pub fn with_length(length: usize) -> Self {
        Self::new(vec![None; length])
    }

    /// Create an array with an explicit element count over a possibly larger
    /// backing collection.
    ///
    /// # Panics
    ///
    /// Panics if `length` exceeds the backing collection.
    #[must_use]
    pub fn from_parts(length: usize, elements: Vec<Slot>) -> Self {
        assert!(
            length <= elements.len(),
            "array length {length} exceeds backing storage of {}",
            elements.len()
        );
        Self {
            length,
            elements: elements.into_boxed_slice(),
        }
    }

    /// The stored element count.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.length
    }

    /// Returns `true` if the array has no elements.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The elements, bounded by the stored count.
    #[must_use]
    pub fn elements(&self) -> &[Slot] {
        &self.elements[..self.length]
    }

    /// Overwrite element `index`. Returns `false` if out of range.
    pub fn set_element(&mut self, index: usize, value: Slot) -> bool {
        if index >= self.length {
            return false;
        }
        self.elements[index] = value;
        true
    }

    /// Release the elements and the backing collection.
    ///
    /// Consumes the payload, so nothing can touch the storage afterwards.
    /// Returns the number of elements released.
    pub fn release(self) -> usize {
        let Self { length, elements } = self;
        let released = elements.iter().take(length).count();
        drop(elements);
        released
    }
}

impl Trace for ArrayData {
    fn trace(&self, visitor: &mut impl Visitor) {
        self.elements().trace(visitor);
    }
}

/// A synchronization record associated with a heap value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Monitor {
    owner: Option<ThreadId>,
    recursion: u32,
}

impl Monitor {
    /// Create an unowned monitor.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            owner: None,
            recursion: 0,
        }
    }

    /// The owning thread, if any.
    #[must_use]
    pub const fn owner(&self) -> Option<ThreadId> {
        self.owner
    }

    /// How many times the owner has entered the monitor.
    #[must_use]
    pub const fn recursion(&self) -> u32 {
        self.recursion
    }

    /// Enter the monitor on behalf of `thread`. Returns `false` if another
    /// thread owns it.
    pub fn enter(&mut self, thread: ThreadId) -> bool {
        match self.owner {
            Some(owner) if owner != thread => false,
            _ => {
                self.owner = Some(thread);
                self.recursion += 1;
                true
            }
        }
    }

    /// Leave the monitor once. Returns `false` if `thread` is not the owner.
    pub fn exit(&mut self, thread: ThreadId) -> bool {
        if self.owner != Some(thread) {
            return false;
        }
        self.recursion -= 1;
        if self.recursion == 0 {
            self.owner = None;
        }
        true
    }
}

/// Entry counts of the three containers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Live object entries.
    pub objects: usize,
    /// Live array entries.
    pub arrays: usize,
    /// Live monitor entries.
    pub monitors: usize,
}

impl HeapStats {
    /// Objects plus arrays.
    #[must_use]
    pub const fn values(&self) -> usize {
        self.objects + self.arrays
    }
}

/// The VM heap: object, array and monitor containers.
#[derive(Debug)]
pub struct Heap {
    objects: RwLock<HashMap<Offset, ObjectData>>,
    arrays: RwLock<HashMap<Offset, ArrayData>>,
    monitors: RwLock<HashMap<Offset, Monitor>>,
    next_offset: AtomicUsize,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    /// Create an empty heap.
    #[must_use]
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            arrays: RwLock::new(HashMap::new()),
            monitors: RwLock::new(HashMap::new()),
            next_offset: AtomicUsize::new(FIRST_OFFSET),
        }
    }

    fn reserve_past(&self, offset: Offset) {
        self.next_offset.fetch_max(offset + 1, Ordering::Relaxed);
    }

    /// Insert an object at a caller-chosen offset, replacing any previous one.
    pub fn insert_object(&self, offset: Offset, object: ObjectData) -> HeapRef {
        let _order = LockGuard::new(LockOrder::HeapContainer);
        self.reserve_past(offset);
        self.objects.write().insert(offset, object);
        HeapRef::Object(offset)
    }

    /// Insert an array at a caller-chosen offset, replacing any previous one.
    pub fn insert_array(&self, offset: Offset, array: ArrayData) -> HeapRef {
        let _order = LockGuard::new(LockOrder::HeapContainer);
        self.reserve_past(offset);
        self.arrays.write().insert(offset, array);
        HeapRef::Array(offset)
    }

    /// Associate a monitor with `offset`.
    pub fn insert_monitor(&self, offset: Offset, monitor: Monitor) {
        let _order = LockGuard::new(LockOrder::HeapContainer);
        self.monitors.write().insert(offset, monitor);
    }

    /// Store an object at a fresh offset.
    pub fn allocate_object(&self, object: ObjectData) -> HeapRef {
        let offset = self.next_offset.fetch_add(1, Ordering::Relaxed);
        self.insert_object(offset, object)
    }

    /// Store an array at a fresh offset.
    pub fn allocate_array(&self, array: ArrayData) -> HeapRef {
        let offset = self.next_offset.fetch_add(1, Ordering::Relaxed);
        self.insert_array(offset, array)
    }

    /// Overwrite field `index` of the object at `offset`.
    /// Returns `false` if there is no such object or field.
    pub fn set_field(&self, offset: Offset, index: usize, value: Slot) -> bool {
        let _order = LockGuard::new(LockOrder::HeapContainer);
        self.objects
            .write()
            .get_mut(&offset)
            .is_some_and(|object| object.set_field(index, value))
    }

    /// Overwrite element `index` of the array at `offset`.
    /// Returns `false` if there is no such array or element.
    pub fn set_element(&self, offset: Offset, index: usize, value: Slot) -> bool {
        let _order = LockGuard::new(LockOrder::HeapContainer);
        self.arrays
            .write()
            .get_mut(&offset)
            .is_some_and(|array| array.set_element(index, value))
    }

    /// The field references of the object at `offset`.
    #[must_use]
    pub fn fields(&self, offset: Offset) -> Option<Vec<Slot>> {
        let _order = LockGuard::new(LockOrder::HeapContainer);
        self.objects
            .read()
            .get(&offset)
            .map(|object| object.fields().to_vec())
    }

    /// The `(count, elements)` pair of the array at `offset`.
    #[must_use]
    pub fn elements(&self, offset: Offset) -> Option<(usize, Vec<Slot>)> {
        let _order = LockGuard::new(LockOrder::HeapContainer);
        self.arrays
            .read()
            .get(&offset)
            .map(|array| (array.len(), array.elements().to_vec()))
    }

    /// Whether the entry named by `reference` exists.
    #[must_use]
    pub fn contains(&self, reference: HeapRef) -> bool {
        let _order = LockGuard::new(LockOrder::HeapContainer);
        match reference {
            HeapRef::Object(offset) => self.objects.read().contains_key(&offset),
            HeapRef::Array(offset) => self.arrays.read().contains_key(&offset),
        }
    }

    /// Whether a monitor is associated with `offset`.
    #[must_use]
    pub fn contains_monitor(&self, offset: Offset) -> bool {
        let _order = LockGuard::new(LockOrder::HeapContainer);
        self.monitors.read().contains_key(&offset)
    }

    /// Run `f` on the monitor associated with `offset`.
    pub fn with_monitor<R>(&self, offset: Offset, f: impl FnOnce(&mut Monitor) -> R) -> Option<R> {
        let _order = LockGuard::new(LockOrder::HeapContainer);
        self.monitors.write().get_mut(&offset).map(f)
    }

    /// Current entry counts.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let _order = LockGuard::new(LockOrder::HeapContainer);
        HeapStats {
            objects: self.objects.read().len(),
            arrays: self.arrays.read().len(),
            monitors: self.monitors.read().len(),
        }
    }

    pub(crate) const fn object_container(&self) -> &RwLock<HashMap<Offset, ObjectData>> {
        &self.objects
    }

    pub(crate) const fn array_container(&self) -> &RwLock<HashMap<Offset, ArrayData>> {
        &self.arrays
    }

    pub(crate) const fn monitor_container(&self) -> &RwLock<HashMap<Offset, Monitor>> {
        &self.monitors
    }
}

#[cfg(test)]
mod tests {
    use super::{ArrayData, Heap, Monitor, ObjectData};
    use crate::value::HeapRef;

    #[test]
    fn test_allocate_skips_inserted_offsets() {
        let heap = Heap::new();
        heap.insert_object(10, ObjectData::default());

        let next = heap.allocate_array(ArrayData::with_length(2));

        assert_eq!(next, HeapRef::Array(11));
        assert!(heap.contains(HeapRef::Object(10)));
        assert!(!heap.contains(HeapRef::Array(10)));
    }

    #[test]
    fn test_array_elements_bounded_by_length() {
        let array = ArrayData::from_parts(
            1,
            vec![Some(HeapRef::Object(1)), Some(HeapRef::Object(2))],
        );

        assert_eq!(array.len(), 1);
        assert_eq!(array.elements(), &[Some(HeapRef::Object(1))]);
        assert_eq!(array.release(), 1);
    }

    #[test]
    #[should_panic(expected = "exceeds backing storage")]
    fn test_array_length_cannot_exceed_storage() {
        let _ = ArrayData::from_parts(3, vec![None]);
    }

    #[test]
    fn test_field_and_element_accessors() {
        let heap = Heap::new();
        let object = heap.allocate_object(ObjectData::with_field_count(2));
        let array = heap.allocate_array(ArrayData::with_length(1));

        assert!(heap.set_field(object.offset(), 1, Some(array)));
        assert!(heap.set_element(array.offset(), 0, Some(object)));
        assert!(!heap.set_element(array.offset(), 1, Some(object)));

        assert_eq!(heap.fields(object.offset()), Some(vec![None, Some(array)]));
        assert_eq!(heap.elements(array.offset()), Some((1, vec![Some(object)])));
        assert_eq!(heap.fields(999), None);
    }

    #[test]
    fn test_monitor_enter_exit() {
        let heap = Heap::new();
        heap.insert_monitor(1, Monitor::new());
        let me = std::thread::current().id();

        assert_eq!(heap.with_monitor(1, |m| m.enter(me)), Some(true));
        assert_eq!(heap.with_monitor(1, |m| m.enter(me)), Some(true));
        assert_eq!(heap.with_monitor(1, |m| m.recursion()), Some(2));
        assert_eq!(heap.with_monitor(1, |m| m.exit(me) && m.exit(me)), Some(true));
        assert_eq!(heap.with_monitor(1, |m| m.owner()), Some(None));
        assert_eq!(heap.stats().monitors, 1);
    }
}
