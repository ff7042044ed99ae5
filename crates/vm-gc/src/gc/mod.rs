//! Garbage collection coordination.
//!
//! This module provides the collector and the pieces it is built from:
//! - Stop-the-world safepoint barrier for mutator threads
//! - Worker pool running root scan and sweep tasks
//! - Mark bitmaps and the tracer that fills them
//! - Lock ordering discipline for deadlock prevention

pub mod collector;
pub mod mark;
pub mod pool;
pub mod roots;
pub mod safepoint;
pub mod sweep;
pub mod sync;

pub use collector::{
    default_collect_condition, CollectCondition, Collector, DEFAULT_COLLECT_THRESHOLD,
};
pub use mark::{LiveSet, MarkBitmap, MarkBitmaps, Tracer};
pub use pool::{TaskGroup, TaskHandle, WorkerPool};
pub use roots::{RootScan, RootScanner};
pub use safepoint::Safepoint;
pub use sweep::SweepStats;
