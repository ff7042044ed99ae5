//! Root scanning.
//!
//! Each frame contributes two pool tasks, one for its operand stack and one
//! for its local variable table. A single further task walks the static
//! fields of every loaded class. Frame tasks are queued first so they can
//! run alongside the static walk; the static task is awaited before the
//! frame tasks are.

use std::sync::Arc;

use super::mark::Tracer;
use super::pool::{TaskGroup, WorkerPool};
use crate::error::GcError;
use crate::runtime::{CallStack, Frame, MethodArea};

/// Counts from one root scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RootScan {
    /// Frames whose slots were marked.
    pub frames: usize,
    /// Static field slots visited.
    pub static_slots: usize,
}

/// Feeds the roots of a running VM to a [`Tracer`].
#[derive(Debug, Clone)]
pub struct RootScanner {
    tracer: Tracer,
    method_area: Arc<MethodArea>,
}

impl RootScanner {
    /// Create a scanner marking through `tracer`.
    #[must_use]
    pub const fn new(tracer: Tracer, method_area: Arc<MethodArea>) -> Self {
        Self {
            tracer,
            method_area,
        }
    }

    /// Mark everything reachable from the frames of `stacks` and from static
    /// fields, running the work on `pool`.
    ///
    /// Every issued task has finished when this returns, whether or not one
    /// of them failed.
    ///
    /// # Errors
    ///
    /// [`GcError::TaskPanicked`] if a marking task panicked (the static
    /// walk's failure is reported first), or [`GcError::PoolShutDown`] if the
    /// pool no longer accepts work.
    pub fn scan(&self, pool: &WorkerPool, stacks: &[CallStack]) -> Result<RootScan, GcError> {
        let mut group = TaskGroup::new();
        let mut frames = 0;
        for frame in stacks.iter().flat_map(CallStack::iter) {
            self.spawn_frame(pool, &mut group, frame)?;
            frames += 1;
        }

        let tracer = self.tracer.clone();
        let method_area = Arc::clone(&self.method_area);
        let statics = pool.submit(move || mark_statics(&tracer, &method_area));

        let statics = statics.try_join();
        let marked_frames = group.wait();
        let static_slots = statics?;
        marked_frames?;

        Ok(RootScan {
            frames,
            static_slots,
        })
    }

    fn spawn_frame(
        &self,
        pool: &WorkerPool,
        group: &mut TaskGroup,
        frame: &Arc<Frame>,
    ) -> Result<(), GcError> {
        let tracer = self.tracer.clone();
        let stack_frame = Arc::clone(frame);
        group.spawn(pool, move || {
            tracer.mark_all(&stack_frame.stack_slots());
        })?;

        let tracer = self.tracer.clone();
        let local_frame = Arc::clone(frame);
        group.spawn(pool, move || {
            tracer.mark_all(&local_frame.local_slots());
        })
    }
}

fn mark_statics(tracer: &Tracer, method_area: &MethodArea) -> usize {
    method_area
        .classes()
        .iter()
        .map(|class| {
            let slots = class.static_slots();
            tracer.mark_all(&slots);
            slots.len()
        })
        .sum()
}
