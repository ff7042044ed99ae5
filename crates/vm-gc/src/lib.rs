//! A parallel stop-the-world garbage collector for a bytecode VM heap.
//!
//! `vm-gc` reclaims unreachable objects and arrays from an offset-keyed heap
//! once the allocator signals memory pressure. Mutator threads pause at a
//! safepoint barrier, and the triggering thread runs one **mark-and-sweep**
//! cycle that fans root scanning and sweeping out to a fixed worker pool.
//!
//! # Features
//!
//! - **Parallel marking**: two tasks per call frame plus one static-field task,
//!   all marking into shared per-kind bitmaps behind spin locks
//! - **Parallel sweep**: objects, arrays and monitors are swept concurrently
//! - **Cycle safe**: the bitmap insert doubles as the visited check
//! - **Non-moving**: offsets never change, erased entries are simply gone
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use vm_gc::{
//!     CallStack, Collector, GcConfig, GcPolicy, Heap, HeapRef, ObjectData, RuntimeContext,
//! };
//!
//! let heap = Arc::new(Heap::new());
//! let kept = heap.allocate_object(ObjectData::default());
//! heap.allocate_object(ObjectData::default());
//!
//! let mut stack = CallStack::new();
//! stack.push(0, 1).set_local(0, Some(kept));
//!
//! let context = RuntimeContext::with_heap(Arc::clone(&heap), 1);
//! let collector = Collector::new(context, GcConfig::new(2))?;
//! collector.request_collection();
//! let metrics = collector.collect(&stack, GcPolicy::MarkAndSweep).unwrap();
//!
//! assert_eq!(metrics.objects_reclaimed, 1);
//! assert!(heap.contains(kept));
//! # Ok::<(), vm_gc::GcError>(())
//! ```
//!
//! # Safepoints
//!
//! Every mutator calls [`Collector::arrive_and_wait`] before a cycle. The
//! barrier has no timeout: a mutator that never arrives blocks the others.
//! [`GcConfig::safepoint_timeout`] only turns such a hang into periodic
//! warnings.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod config;
mod error;
pub mod gc;
pub mod heap;
pub mod metrics;
pub mod runtime;
pub mod tracing;
mod value;

pub use config::{GcConfig, GcPolicy, UnknownPolicy};
pub use error::GcError;
pub use gc::{default_collect_condition, CollectCondition, Collector, Safepoint};
pub use heap::{ArrayData, Heap, HeapStats, Monitor, ObjectData};
pub use metrics::GcMetrics;
pub use runtime::{
    CallStack, Class, Frame, MethodArea, MutatorThreads, RuntimeContext, ThreadRegistry,
};
pub use value::{HeapRef, Offset, Slot, Trace, Visitor};
