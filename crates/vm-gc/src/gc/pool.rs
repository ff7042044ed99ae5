//! Fixed-size worker pool for root scanning and sweeping.
//!
//! Workers block until work is enabled with [`WorkerPool::signal_work`], then
//! pop tasks off a shared FIFO queue until it is empty. Once a worker has
//! started draining it keeps going even if [`WorkerPool::signal_wait`] clears
//! the flag, and only returns to the blocked state when the queue runs dry.
//!
//! Completion is reported two ways. [`WorkerPool::submit`] hands back a
//! [`TaskHandle`] carrying the task's result. A [`TaskGroup`] counts down a set
//! of fire-and-forget tasks and collects their panics.
//!
//! The queue lock is never held while a task runs, and no other collector lock
//! is taken while it is held, so it does not take part in the lock ordering.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver};
use crossbeam::sync::WaitGroup;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::{panic_message, GcError};

type Task = Box<dyn FnOnce() + Send + 'static>;
type TaskResult<T> = Result<T, Box<dyn Any + Send + 'static>>;

#[derive(Default)]
struct PoolQueue {
    tasks: VecDeque<Task>,
    work_enabled: bool,
    shutdown: bool,
}

#[derive(Default)]
struct Shared {
    queue: Mutex<PoolQueue>,
    signal: Condvar,
}

/// A fixed set of worker threads sharing one task queue.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    name: String,
    worker_count: usize,
}

impl WorkerPool {
    /// Spawn `workers` threads named `"{name}-{index}"`. Zero is clamped to 1.
    ///
    /// # Errors
    ///
    /// Returns [`GcError::WorkerSpawn`] if the OS refuses a thread. Workers
    /// spawned before the failure are shut down again.
    pub fn new(workers: usize, name: &str) -> Result<Self, GcError> {
        let worker_count = workers.max(1);
        let pool = Self {
            shared: Arc::new(Shared::default()),
            workers: Mutex::new(Vec::with_capacity(worker_count)),
            name: name.to_owned(),
            worker_count,
        };

        for index in 0..worker_count {
            let shared = Arc::clone(&pool.shared);
            let handle = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || worker_loop(&shared))
                .map_err(|e| GcError::WorkerSpawn(e.to_string()))?;
            pool.workers.lock().push(handle);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(pool = name, workers = worker_count, "worker_pool_spawned");

        Ok(pool)
    }

    /// Number of worker threads.
    #[must_use]
    pub const fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Tasks waiting in the queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().tasks.len()
    }

    /// Whether the work flag is set.
    #[must_use]
    pub fn is_work_enabled(&self) -> bool {
        self.shared.queue.lock().work_enabled
    }

    /// Whether [`finalize`](Self::finalize) has run.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shared.queue.lock().shutdown
    }

    /// Queue `f` and return a handle to its result.
    ///
    /// After [`finalize`](Self::finalize) the task is dropped unrun and the
    /// handle reports [`GcError::PoolShutDown`].
    pub fn submit<T, F>(&self, f: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = channel::bounded(1);
        // Rejected tasks are dropped along with `tx`, which the handle sees
        // as a disconnect.
        let _ = self.enqueue(Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(f));
            let _ = tx.send(result);
        }));
        TaskHandle { rx }
    }

    /// Queue `f` without a result handle.
    ///
    /// # Errors
    ///
    /// Returns [`GcError::PoolShutDown`] after [`finalize`](Self::finalize).
    pub fn execute<F>(&self, f: F) -> Result<(), GcError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(Box::new(f))
    }

    fn enqueue(&self, task: Task) -> Result<(), GcError> {
        let mut queue = self.shared.queue.lock();
        if queue.shutdown {
            return Err(GcError::PoolShutDown);
        }
        queue.tasks.push_back(task);
        let enabled = queue.work_enabled;
        drop(queue);
        if enabled {
            self.shared.signal.notify_one();
        }
        Ok(())
    }

    /// Set the work flag and wake every worker.
    pub fn signal_work(&self) {
        self.shared.queue.lock().work_enabled = true;
        self.shared.signal.notify_all();
    }

    /// Clear the work flag. Workers finish draining the queue, then block.
    pub fn signal_wait(&self) {
        self.shared.queue.lock().work_enabled = false;
    }

    /// Stop the pool: run what is already queued, then join every worker.
    ///
    /// Idempotent. Also called on drop.
    pub fn finalize(&self) {
        {
            let mut queue = self.shared.queue.lock();
            queue.work_enabled = true;
            queue.shutdown = true;
        }
        self.shared.signal.notify_all();

        let workers = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return;
        }
        let current = thread::current().id();
        for worker in workers {
            // A task that drops the last owner of the pool runs on a worker;
            // that worker cannot join itself.
            if worker.thread().id() == current {
                continue;
            }
            let _ = worker.join();
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(pool = %self.name, "worker_pool_finalized");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.finalize();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("worker_count", &self.worker_count)
            .field("queued", &self.queued())
            .field("work_enabled", &self.is_work_enabled())
            .finish()
    }
}

fn worker_loop(shared: &Shared) {
    let mut queue = shared.queue.lock();
    let mut draining = false;
    loop {
        if let Some(task) = next_task(&mut queue, draining) {
            draining = true;
            MutexGuard::unlocked(&mut queue, task);
            continue;
        }
        draining = false;
        if queue.shutdown {
            break;
        }
        shared.signal.wait(&mut queue);
    }
}

fn next_task(queue: &mut PoolQueue, draining: bool) -> Option<Task> {
    if queue.work_enabled || draining {
        queue.tasks.pop_front()
    } else {
        None
    }
}

/// Completion handle returned by [`WorkerPool::submit`].
#[must_use = "dropping a TaskHandle detaches the task"]
pub struct TaskHandle<T> {
    rx: Receiver<TaskResult<T>>,
}

impl<T> TaskHandle<T> {
    /// Block until the task finishes and return its value.
    ///
    /// # Panics
    ///
    /// Resumes the task's panic on this thread, and panics if the pool was
    /// shut down before the task ran.
    pub fn join(self) -> T {
        match self.rx.recv() {
            Ok(Ok(value)) => value,
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(_) => panic!("{}", GcError::PoolShutDown),
        }
    }

    /// Block until the task finishes.
    ///
    /// # Errors
    ///
    /// [`GcError::TaskPanicked`] if the task panicked, or
    /// [`GcError::PoolShutDown`] if it was dropped unrun.
    pub fn try_join(self) -> Result<T, GcError> {
        match self.rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => Err(GcError::TaskPanicked(panic_message(payload.as_ref()))),
            Err(_) => Err(GcError::PoolShutDown),
        }
    }

    /// Whether the task has produced a result.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        !self.rx.is_empty()
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Countdown barrier over a batch of pool tasks.
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use vm_gc::gc::pool::{TaskGroup, WorkerPool};
///
/// let pool = WorkerPool::new(2, "doc").unwrap();
/// pool.signal_work();
/// let hits = Arc::new(AtomicUsize::new(0));
/// let mut group = TaskGroup::new();
/// for _ in 0..8 {
///     let hits = Arc::clone(&hits);
///     group.spawn(&pool, move || {
///         hits.fetch_add(1, Ordering::Relaxed);
///     }).unwrap();
/// }
/// group.wait().unwrap();
/// assert_eq!(hits.load(Ordering::Relaxed), 8);
/// ```
#[derive(Default)]
pub struct TaskGroup {
    pending: WaitGroup,
    panics: Arc<Mutex<Vec<String>>>,
    spawned: usize,
}

impl TaskGroup {
    /// An empty group.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `f` on `pool` as a member of this group.
    ///
    /// # Errors
    ///
    /// Returns [`GcError::PoolShutDown`] if the pool no longer accepts work.
    pub fn spawn<F>(&mut self, pool: &WorkerPool, f: F) -> Result<(), GcError>
    where
        F: FnOnce() + Send + 'static,
    {
        let pending = self.pending.clone();
        let panics = Arc::clone(&self.panics);
        pool.execute(move || {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
                panics.lock().push(panic_message(payload.as_ref()));
            }
            drop(pending);
        })?;
        self.spawned += 1;
        Ok(())
    }

    /// Number of tasks spawned through this group.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.spawned
    }

    /// Whether no task has been spawned.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.spawned == 0
    }

    /// Block until every spawned task has finished.
    ///
    /// # Errors
    ///
    /// Returns [`GcError::TaskPanicked`] with the first recorded panic message
    /// if any task panicked.
    pub fn wait(self) -> Result<(), GcError> {
        self.pending.wait();
        let mut panics = std::mem::take(&mut *self.panics.lock());
        if panics.is_empty() {
            Ok(())
        } else {
            Err(GcError::TaskPanicked(panics.swap_remove(0)))
        }
    }
}

impl std::fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGroup")
            .field("spawned", &self.spawned)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::{TaskGroup, WorkerPool};
    use crate::error::GcError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_tasks_wait_for_work_signal() {
        let pool = WorkerPool::new(2, "gate").unwrap();
        let handle = pool.submit(|| 7);

        std::thread::sleep(Duration::from_millis(20));
        assert!(!handle.is_finished());
        assert_eq!(pool.queued(), 1);

        pool.signal_work();
        assert_eq!(handle.join(), 7);
    }

    #[test]
    fn test_single_worker_runs_fifo() {
        let pool = WorkerPool::new(1, "fifo").unwrap();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..5)
            .map(|i| {
                let order = Arc::clone(&order);
                pool.submit(move || order.lock().push(i))
            })
            .collect();

        pool.signal_work();
        for handle in handles {
            handle.join();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_try_join_reports_panic() {
        let pool = WorkerPool::new(1, "panic").unwrap();
        pool.signal_work();

        let handle = pool.submit(|| -> usize { panic!("task failed") });
        assert_eq!(handle.try_join(), Err(GcError::TaskPanicked("task failed".into())));

        // The worker survives a panicking task.
        assert_eq!(pool.submit(|| 1).join(), 1);
    }

    #[test]
    #[should_panic(expected = "resumed")]
    fn test_join_resumes_panic() {
        let pool = WorkerPool::new(1, "resume").unwrap();
        pool.signal_work();
        pool.submit(|| panic!("resumed")).join();
    }

    #[test]
    fn test_finalize_drains_queue_and_rejects_new_work() {
        let pool = WorkerPool::new(2, "finalize").unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let ran = Arc::clone(&ran);
            pool.execute(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.finalize();
        pool.finalize();

        assert_eq!(ran.load(Ordering::SeqCst), 4);
        assert!(pool.is_shut_down());
        assert_eq!(pool.submit(|| 1).try_join(), Err(GcError::PoolShutDown));
        assert_eq!(pool.execute(|| {}), Err(GcError::PoolShutDown));
    }

    #[test]
    fn test_task_group_collects_panics() {
        let pool = WorkerPool::new(3, "group").unwrap();
        pool.signal_work();

        let mut group = TaskGroup::new();
        group.spawn(&pool, || {}).unwrap();
        group.spawn(&pool, || panic!("frame scan failed")).unwrap();
        group.spawn(&pool, || {}).unwrap();
        assert_eq!(group.len(), 3);

        assert_eq!(
            group.wait(),
            Err(GcError::TaskPanicked("frame scan failed".into()))
        );
    }

    #[test]
    fn test_empty_group_waits_immediately() {
        let group = TaskGroup::new();
        assert!(group.is_empty());
        assert_eq!(group.wait(), Ok(()));
    }
}
