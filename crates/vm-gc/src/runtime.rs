//! Runtime collaborators the collector reads roots from.
//!
//! A [`CallStack`] is a chain of [`Frame`]s linked top to bottom. Each frame
//! exposes a fixed-size operand stack and a fixed-size local variable table.
//! The [`MethodArea`] holds the loaded [`Class`]es and their static fields.
//! The executor reports how many mutator threads are running through
//! [`MutatorThreads`], which the safepoint barrier uses as its quorum.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::gc::sync::{LockGuard, LockOrder};
use crate::heap::Heap;
use crate::value::Slot;

/// One activation record.
#[derive(Debug)]
pub struct Frame {
    stack: RwLock<Vec<Slot>>,
    locals: RwLock<Vec<Slot>>,
    next: Option<Arc<Frame>>,
}

impl Frame {
    /// Create a frame with `max_stack` operand slots and `max_locals` local
    /// slots, all null, linked above `next`.
    #[must_use]
    pub fn new(max_stack: usize, max_locals: usize, next: Option<Arc<Self>>) -> Self {
        Self {
            stack: RwLock::new(vec![None; max_stack]),
            locals: RwLock::new(vec![None; max_locals]),
            next,
        }
    }

    /// Declared operand stack size.
    #[must_use]
    pub fn max_stack(&self) -> usize {
        self.stack.read().len()
    }

    /// Declared local variable count.
    #[must_use]
    pub fn max_locals(&self) -> usize {
        self.locals.read().len()
    }

    /// The frame below this one.
    #[must_use]
    pub const fn next(&self) -> Option<&Arc<Self>> {
        self.next.as_ref()
    }

    /// Store `value` in operand slot `index`. Returns `false` if out of bounds.
    pub fn set_stack(&self, index: usize, value: Slot) -> bool {
        let _order = LockGuard::new(LockOrder::HeapContainer);
        self.stack.write().get_mut(index).map(|slot| *slot = value).is_some()
    }

    /// Store `value` in local slot `index`. Returns `false` if out of bounds.
    pub fn set_local(&self, index: usize, value: Slot) -> bool {
        let _order = LockGuard::new(LockOrder::HeapContainer);
        self.locals.write().get_mut(index).map(|slot| *slot = value).is_some()
    }

    /// Snapshot of the operand stack slots.
    #[must_use]
    pub fn stack_slots(&self) -> Vec<Slot> {
        let _order = LockGuard::new(LockOrder::HeapContainer);
        self.stack.read().clone()
    }

    /// Snapshot of the local variable slots.
    #[must_use]
    pub fn local_slots(&self) -> Vec<Slot> {
        let _order = LockGuard::new(LockOrder::HeapContainer);
        self.locals.read().clone()
    }
}

/// A mutator thread's frame chain.
#[derive(Debug, Clone, Default)]
pub struct CallStack {
    top: Option<Arc<Frame>>,
}

impl CallStack {
    /// An empty call stack.
    #[must_use]
    pub const fn new() -> Self {
        Self { top: None }
    }

    /// Push a new frame and return it so its slots can be filled in.
    pub fn push(&mut self, max_stack: usize, max_locals: usize) -> Arc<Frame> {
        let frame = Arc::new(Frame::new(max_stack, max_locals, self.top.take()));
        self.top = Some(Arc::clone(&frame));
        frame
    }

    /// Pop the top frame.
    pub fn pop(&mut self) -> Option<Arc<Frame>> {
        let top = self.top.take()?;
        self.top = top.next().cloned();
        Some(top)
    }

    /// The top frame.
    #[must_use]
    pub const fn top(&self) -> Option<&Arc<Frame>> {
        self.top.as_ref()
    }

    /// Iterate frames from top to bottom.
    pub fn iter(&self) -> Frames<'_> {
        Frames {
            current: self.top.as_ref(),
        }
    }

    /// Number of frames.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.iter().count()
    }
}

/// Iterator over a [`CallStack`], top frame first.
#[derive(Debug)]
pub struct Frames<'a> {
    current: Option<&'a Arc<Frame>>,
}

impl<'a> Iterator for Frames<'a> {
    type Item = &'a Arc<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        let frame = self.current?;
        self.current = frame.next();
        Some(frame)
    }
}

impl<'a> IntoIterator for &'a CallStack {
    type Item = &'a Arc<Frame>;
    type IntoIter = Frames<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A loaded class. Its static fields are keyed by field index.
#[derive(Debug)]
pub struct Class {
    name: String,
    static_fields: RwLock<BTreeMap<usize, Slot>>,
}

impl Class {
    /// Create a class with no static fields.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            static_fields: RwLock::new(BTreeMap::new()),
        }
    }

    /// The class name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set static field `key`.
    pub fn set_static(&self, key: usize, value: Slot) {
        let _order = LockGuard::new(LockOrder::HeapContainer);
        self.static_fields.write().insert(key, value);
    }

    /// Snapshot of the static field slots, in key order.
    #[must_use]
    pub fn static_slots(&self) -> Vec<Slot> {
        let _order = LockGuard::new(LockOrder::HeapContainer);
        self.static_fields.read().values().copied().collect()
    }
}

/// The set of loaded classes.
#[derive(Debug, Default)]
pub struct MethodArea {
    classes: RwLock<HashMap<String, Arc<Class>>>,
}

impl MethodArea {
    /// An empty method area.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `class`, replacing any class of the same name.
    pub fn load(&self, class: Class) -> Arc<Class> {
        let class = Arc::new(class);
        self.classes
            .write()
            .insert(class.name().to_owned(), Arc::clone(&class));
        class
    }

    /// Look a class up by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Class>> {
        self.classes.read().get(name).cloned()
    }

    /// Every loaded class.
    #[must_use]
    pub fn classes(&self) -> Vec<Arc<Class>> {
        self.classes.read().values().cloned().collect()
    }
}

/// The executor's view of running mutator threads.
pub trait MutatorThreads: Send + Sync {
    /// How many mutator threads must reach a safepoint before a cycle runs.
    fn thread_count(&self) -> usize;
}

/// A counter of registered mutator threads.
#[derive(Debug, Default)]
pub struct ThreadRegistry {
    count: AtomicUsize,
}

impl ThreadRegistry {
    /// A registry with `count` threads already registered.
    #[must_use]
    pub const fn with_count(count: usize) -> Self {
        Self {
            count: AtomicUsize::new(count),
        }
    }

    /// Register one mutator thread. Returns the new count.
    pub fn register(&self) -> usize {
        self.count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Unregister one mutator thread. Returns the new count.
    pub fn unregister(&self) -> usize {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
            .map_or(0, |previous| previous.saturating_sub(1))
    }
}

impl MutatorThreads for ThreadRegistry {
    fn thread_count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

/// Everything a collector needs from the running VM.
#[derive(Clone)]
pub struct RuntimeContext {
    /// The heap being collected.
    pub heap: Arc<Heap>,
    /// Loaded classes, for static roots.
    pub method_area: Arc<MethodArea>,
    /// The executor, for the mutator thread count.
    pub executor: Arc<dyn MutatorThreads>,
}

impl RuntimeContext {
    /// Bundle the collaborators.
    #[must_use]
    pub fn new(
        heap: Arc<Heap>,
        method_area: Arc<MethodArea>,
        executor: Arc<dyn MutatorThreads>,
    ) -> Self {
        Self {
            heap,
            method_area,
            executor,
        }
    }

    /// A context with an empty method area and a registry of `threads`
    /// mutators.
    #[must_use]
    pub fn with_heap(heap: Arc<Heap>, threads: usize) -> Self {
        Self::new(
            heap,
            Arc::new(MethodArea::new()),
            Arc::new(ThreadRegistry::with_count(threads)),
        )
    }
}

impl std::fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("heap", &self.heap.stats())
            .field("classes", &self.method_area.classes().len())
            .field("mutators", &self.executor.thread_count())
            .finish()
    }
}
